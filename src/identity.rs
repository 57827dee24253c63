//! Caller identity as seen by authorization.
//!
//! The transport decides who the caller is; the executor only reads the
//! result. An absent identity and an unauthenticated one are treated the
//! same way.

use std::collections::HashSet;

/// The authenticated principal behind a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    subject: Option<String>,
    scopes: HashSet<String>,
    roles: HashSet<String>,
    authenticated: bool,
}

impl Identity {
    /// An unauthenticated caller with no scopes or roles.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated caller identified by `subject`.
    pub fn authenticated(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            authenticated: true,
            ..Self::default()
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Add scopes from a space-delimited OAuth scope string.
    pub fn with_scope_string(self, scope: &str) -> Self {
        self.with_scopes(scope.split_whitespace())
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn scopes(&self) -> &HashSet<String> {
        &self.scopes
    }

    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_is_not_authenticated() {
        let identity = Identity::anonymous();
        assert!(!identity.is_authenticated());
        assert!(identity.subject().is_none());
    }

    #[test]
    fn test_scope_string_splits_on_whitespace() {
        let identity = Identity::authenticated("alice").with_scope_string("read  write\tadmin");
        assert!(identity.has_scope("read"));
        assert!(identity.has_scope("write"));
        assert!(identity.has_scope("admin"));
        assert_eq!(identity.scopes().len(), 3);
    }

    #[test]
    fn test_roles() {
        let identity = Identity::authenticated("bob").with_roles(["ops"]);
        assert!(identity.has_role("ops"));
        assert!(!identity.has_role("admin"));
        assert_eq!(identity.subject(), Some("bob"));
    }
}
