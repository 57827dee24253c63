//! Authorization stage: decides whether a caller may see or use a capability.
//!
//! Rules, in order:
//!
//! 1. A public capability is always allowed.
//! 2. Otherwise the caller must be authenticated.
//! 3. The caller must hold every required scope and every required role.
//! 4. Every guard must allow, evaluated in declaration order. The first deny
//!    stops evaluation. A guard that errors or panics denies.
//!
//! Listing silently drops denied capabilities. Invocation turns a denial
//! into either not-found or forbidden, see [`DenialBehavior`].

use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::capability::CapabilityMeta;
use crate::filter::DenialBehavior;
use crate::guard::{Guard, GuardRef};
use crate::identity::Identity;

/// Who may use a capability.
///
/// Declared at provider level, capability level, or both. Merging happens
/// when a capability is attached to its provider.
#[derive(Clone, Default)]
pub struct AccessPolicy {
    public: bool,
    required_scopes: BTreeSet<String>,
    required_roles: BTreeSet<String>,
    guards: Vec<GuardRef>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow every caller, including anonymous ones, and skip all checks
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn require_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scopes.insert(scope.into());
        self
    }

    pub fn require_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes
            .extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn require_role(mut self, role: impl Into<String>) -> Self {
        self.required_roles.insert(role.into());
        self
    }

    pub fn require_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn guard(mut self, guard: GuardRef) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn required_scopes(&self) -> &BTreeSet<String> {
        &self.required_scopes
    }

    pub fn required_roles(&self) -> &BTreeSet<String> {
        &self.required_roles
    }

    pub fn guards(&self) -> &[GuardRef] {
        &self.guards
    }

    /// True when scopes, roles or guards are declared
    pub fn has_requirements(&self) -> bool {
        !self.required_scopes.is_empty() || !self.required_roles.is_empty() || !self.guards.is_empty()
    }

    /// Combine an outer (provider) policy with an inner (capability) one.
    ///
    /// A public inner policy makes the result public. A public outer policy
    /// only does so when the inner one declares no requirements of its own,
    /// so a capability that asks for a scope, role or guard keeps it under a
    /// public provider. Scopes and roles are unioned. Outer guards run before
    /// inner guards.
    pub fn merged(&self, inner: &AccessPolicy) -> AccessPolicy {
        AccessPolicy {
            public: inner.public || (self.public && !inner.has_requirements()),
            required_scopes: self
                .required_scopes
                .union(&inner.required_scopes)
                .cloned()
                .collect(),
            required_roles: self
                .required_roles
                .union(&inner.required_roles)
                .cloned()
                .collect(),
            guards: self
                .guards
                .iter()
                .chain(inner.guards.iter())
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("public", &self.public)
            .field("required_scopes", &self.required_scopes)
            .field("required_roles", &self.required_roles)
            .field(
                "guards",
                &self.guards.iter().map(|g| g.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Why access was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// No identity, or an identity that is not authenticated
    Unauthenticated,
    MissingScopes(Vec<String>),
    MissingRoles(Vec<String>),
    GuardRejected { guard: String },
    /// The guard errored or panicked
    GuardFailed { guard: String, error: String },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Unauthenticated => write!(f, "authentication required"),
            Denial::MissingScopes(scopes) => {
                write!(f, "missing required scopes: {}", scopes.join(", "))
            }
            Denial::MissingRoles(roles) => {
                write!(f, "missing required roles: {}", roles.join(", "))
            }
            Denial::GuardRejected { guard } => write!(f, "rejected by guard {}", guard),
            Denial::GuardFailed { guard, .. } => write!(f, "guard {} failed", guard),
        }
    }
}

/// Outcome of an invocation check that did not allow the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Report the capability as nonexistent
    NotFound,
    /// Report that the caller lacks permission
    Forbidden(Denial),
}

async fn run_guard(guard: &dyn Guard, identity: &Identity, meta: &CapabilityMeta) -> Result<(), Denial> {
    let outcome = AssertUnwindSafe(guard.evaluate(identity, meta))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(Denial::GuardRejected {
            guard: guard.name().to_string(),
        }),
        Ok(Err(err)) => {
            tracing::warn!(
                guard = guard.name(),
                capability = %meta.name,
                error = %err,
                "Guard failed; denying access"
            );
            Err(Denial::GuardFailed {
                guard: guard.name().to_string(),
                error: err.to_string(),
            })
        }
        Err(_) => {
            tracing::warn!(
                guard = guard.name(),
                capability = %meta.name,
                "Guard panicked; denying access"
            );
            Err(Denial::GuardFailed {
                guard: guard.name().to_string(),
                error: "guard panicked".to_string(),
            })
        }
    }
}

/// Evaluate a policy for a caller.
///
/// `global_guards` run after the policy's own guards and, like them, are
/// skipped for public capabilities.
pub async fn decide(
    policy: &AccessPolicy,
    global_guards: &[GuardRef],
    meta: &CapabilityMeta,
    identity: Option<&Identity>,
) -> Result<(), Denial> {
    if policy.public {
        return Ok(());
    }

    let Some(identity) = identity.filter(|i| i.is_authenticated()) else {
        return Err(Denial::Unauthenticated);
    };

    let missing: Vec<String> = policy
        .required_scopes
        .iter()
        .filter(|scope| !identity.has_scope(scope))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(Denial::MissingScopes(missing));
    }

    let missing: Vec<String> = policy
        .required_roles
        .iter()
        .filter(|role| !identity.has_role(role))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(Denial::MissingRoles(missing));
    }

    for guard in policy.guards.iter().chain(global_guards.iter()) {
        run_guard(guard.as_ref(), identity, meta).await?;
    }

    Ok(())
}

/// Whether a capability appears in the caller's listing.
pub async fn can_list(
    policy: &AccessPolicy,
    global_guards: &[GuardRef],
    meta: &CapabilityMeta,
    identity: Option<&Identity>,
) -> bool {
    match decide(policy, global_guards, meta, identity).await {
        Ok(()) => true,
        Err(denial) => {
            tracing::trace!(
                kind = %meta.kind,
                capability = %meta.name,
                reason = %denial,
                "Capability hidden from listing"
            );
            false
        }
    }
}

/// Whether the caller may invoke a capability.
///
/// An unauthenticated caller always gets [`AccessError::NotFound`]; an
/// authenticated one gets whatever `behavior` prescribes.
pub async fn can_invoke(
    policy: &AccessPolicy,
    global_guards: &[GuardRef],
    meta: &CapabilityMeta,
    identity: Option<&Identity>,
    behavior: &DenialBehavior,
) -> Result<(), AccessError> {
    match decide(policy, global_guards, meta, identity).await {
        Ok(()) => Ok(()),
        Err(Denial::Unauthenticated) => Err(AccessError::NotFound),
        Err(denial) => {
            tracing::debug!(
                kind = %meta.kind,
                capability = %meta.name,
                reason = %denial,
                "Invocation denied"
            );
            if behavior.hides_denied() {
                Err(AccessError::NotFound)
            } else {
                Err(AccessError::Forbidden(denial))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::capability::CapabilityKind;
    use crate::error::BoxError;
    use crate::guard::{async_guard_fn, guard_fn};

    fn meta() -> CapabilityMeta {
        CapabilityMeta::new(CapabilityKind::Tool, "forecast")
    }

    fn alice() -> Identity {
        Identity::authenticated("alice")
            .with_scopes(["weather:read"])
            .with_roles(["analyst"])
    }

    #[tokio::test]
    async fn test_public_allows_everyone() {
        let deny_all = guard_fn("deny", |_, _| false);
        let policy = AccessPolicy::new()
            .public()
            .require_scope("admin")
            .guard(deny_all);

        assert!(can_list(&policy, &[], &meta(), None).await);
        assert!(can_list(&policy, &[], &meta(), Some(&Identity::anonymous())).await);
        assert!(
            can_invoke(&policy, &[], &meta(), None, &DenialBehavior::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_anonymous_denied_as_not_found() {
        let policy = AccessPolicy::new();
        assert!(!can_list(&policy, &[], &meta(), None).await);
        assert_eq!(
            can_invoke(&policy, &[], &meta(), None, &DenialBehavior::default()).await,
            Err(AccessError::NotFound)
        );
        assert_eq!(
            can_invoke(
                &policy,
                &[],
                &meta(),
                Some(&Identity::anonymous()),
                &DenialBehavior::default()
            )
            .await,
            Err(AccessError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_scopes_and_roles() {
        let policy = AccessPolicy::new()
            .require_scope("weather:read")
            .require_role("analyst");
        assert!(decide(&policy, &[], &meta(), Some(&alice())).await.is_ok());

        let policy = AccessPolicy::new().require_scopes(["weather:read", "weather:write"]);
        assert_eq!(
            decide(&policy, &[], &meta(), Some(&alice())).await,
            Err(Denial::MissingScopes(vec!["weather:write".to_string()]))
        );

        let policy = AccessPolicy::new().require_role("admin");
        assert_eq!(
            decide(&policy, &[], &meta(), Some(&alice())).await,
            Err(Denial::MissingRoles(vec!["admin".to_string()]))
        );
    }

    #[tokio::test]
    async fn test_guards_are_anded_and_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = calls.clone();
            guard_fn("counted", move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            })
        };

        let allow = guard_fn("allow", |_, _| true);
        let deny = guard_fn("deny", |_, _| false);

        let both_allow = AccessPolicy::new()
            .guard(allow.clone())
            .guard(counted.clone());
        assert!(decide(&both_allow, &[], &meta(), Some(&alice())).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let first_denies = AccessPolicy::new().guard(deny).guard(counted);
        assert_eq!(
            decide(&first_denies, &[], &meta(), Some(&alice())).await,
            Err(Denial::GuardRejected {
                guard: "deny".to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_guard_denies() {
        let failing = async_guard_fn("flaky", |_, _| async {
            Err::<bool, BoxError>("upstream unavailable".into())
        });
        let policy = AccessPolicy::new().guard(failing);
        let denial = decide(&policy, &[], &meta(), Some(&alice()))
            .await
            .unwrap_err();
        assert!(matches!(denial, Denial::GuardFailed { ref guard, .. } if guard == "flaky"));
    }

    #[tokio::test]
    async fn test_panicking_guard_denies() {
        let panicking = guard_fn("boom", |_, _| panic!("guard bug"));
        let policy = AccessPolicy::new().guard(panicking);
        assert!(!can_list(&policy, &[], &meta(), Some(&alice())).await);
    }

    #[tokio::test]
    async fn test_global_guards_apply_to_non_public_only() {
        let deny = guard_fn("maintenance", |_, _| false);
        let globals = vec![deny];

        assert!(!can_list(&AccessPolicy::new(), &globals, &meta(), Some(&alice())).await);
        assert!(can_list(&AccessPolicy::new().public(), &globals, &meta(), None).await);
    }

    #[tokio::test]
    async fn test_denial_behavior() {
        let policy = AccessPolicy::new().require_role("admin");

        let forbidden =
            can_invoke(&policy, &[], &meta(), Some(&alice()), &DenialBehavior::Forbidden).await;
        assert!(matches!(forbidden, Err(AccessError::Forbidden(Denial::MissingRoles(_)))));

        let hidden =
            can_invoke(&policy, &[], &meta(), Some(&alice()), &DenialBehavior::NotFound).await;
        assert_eq!(hidden, Err(AccessError::NotFound));
    }

    #[test]
    fn test_merge() {
        let outer = AccessPolicy::new()
            .require_scope("a")
            .guard(guard_fn("outer", |_, _| true));
        let inner = AccessPolicy::new()
            .require_scope("b")
            .require_role("r")
            .guard(guard_fn("inner", |_, _| true));

        let merged = outer.merged(&inner);
        assert!(!merged.is_public());
        assert_eq!(
            merged.required_scopes().iter().cloned().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(merged.required_roles().contains("r"));
        let names: Vec<&str> = merged.guards().iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["outer", "inner"]);

        assert!(AccessPolicy::new().merged(&AccessPolicy::new().public()).is_public());
        assert!(AccessPolicy::new().public().merged(&AccessPolicy::new()).is_public());
    }

    #[tokio::test]
    async fn test_public_provider_keeps_capability_requirements() {
        let provider = AccessPolicy::new().public();
        for inner in [
            AccessPolicy::new().require_scope("admin"),
            AccessPolicy::new().require_role("ops"),
            AccessPolicy::new().guard(guard_fn("never", |_, _| false)),
        ] {
            let merged = provider.merged(&inner);
            assert!(!merged.is_public(), "{merged:?}");
            assert_eq!(
                can_invoke(&merged, &[], &meta(), None, &DenialBehavior::Forbidden).await,
                Err(AccessError::NotFound)
            );
            assert!(!can_list(&merged, &[], &meta(), None).await);
        }
    }
}
