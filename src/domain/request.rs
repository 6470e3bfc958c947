//! Request-level inputs to an admission decision.

use crate::domain::identity::AnonymousIdentity;

/// Prefix the chat frontend gives to session ids of callers who never logged in.
pub const ANONYMOUS_ID_PREFIX: &str = "anonymous_";

/// Identity already resolved by the host application, if any.
///
/// The quota layer does not authenticate anybody. It only needs to know
/// whether a resolved caller counts as anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerIdentity {
    /// A session explicitly tagged as anonymous.
    Anonymous(String),
    /// Any other identified caller.
    Authenticated(String),
}

impl CallerIdentity {
    /// Classify a user id produced by the host's session layer.
    ///
    /// Ids beginning with `anonymous_` are anonymous, everything else is
    /// authenticated.
    ///
    /// ```
    /// use anon_quota::CallerIdentity;
    ///
    /// assert!(CallerIdentity::from_user_id("anonymous_4f2a").is_anonymous());
    /// assert!(!CallerIdentity::from_user_id("u-1842").is_anonymous());
    /// ```
    pub fn from_user_id(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.starts_with(ANONYMOUS_ID_PREFIX) {
            CallerIdentity::Anonymous(id)
        } else {
            CallerIdentity::Authenticated(id)
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, CallerIdentity::Anonymous(_))
    }

    pub fn id(&self) -> &str {
        match self {
            CallerIdentity::Anonymous(id) | CallerIdentity::Authenticated(id) => id,
        }
    }
}

/// Everything the admission policy looks at for one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    client_addr: String,
    user_agent: Option<String>,
    path: String,
    query: Option<String>,
    caller: Option<CallerIdentity>,
}

impl RequestContext {
    /// Context for a request from `client_addr` to `path`, with no agent
    /// string, no query and no resolved caller.
    pub fn new(client_addr: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client_addr: client_addr.into(),
            user_agent: None,
            path: path.into(),
            query: None,
            caller: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the raw query string (without the leading `?`).
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn client_addr(&self) -> &str {
        &self.client_addr
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn caller(&self) -> Option<&CallerIdentity> {
        self.caller.as_ref()
    }

    /// True when no caller was resolved or the caller is tagged anonymous.
    pub fn is_anonymous(&self) -> bool {
        self.caller.as_ref().map_or(true, CallerIdentity::is_anonymous)
    }

    /// Fingerprint of the requester, derived from address and agent string.
    pub fn anonymous_identity(&self) -> AnonymousIdentity {
        AnonymousIdentity::derive(&self.client_addr, self.user_agent.as_deref())
    }
}
