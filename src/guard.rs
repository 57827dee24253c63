//! Guards: caller-supplied authorization predicates.
//!
//! A guard sees the caller's [`Identity`] and the [`CapabilityMeta`] of the
//! capability being listed or invoked, and answers allow or deny. Guards can
//! be async so they may consult external state.
//!
//! ```rust
//! use mcp_host::guard::{self, GuardRef};
//!
//! let ops_only: GuardRef = guard::guard_fn("ops-only", |identity, _meta| identity.has_role("ops"));
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::CapabilityMeta;
use crate::error::BoxError;
use crate::identity::Identity;

/// An authorization predicate.
///
/// Returning `Err` counts as a deny.
#[async_trait]
pub trait Guard: Send + Sync {
    async fn evaluate(
        &self,
        identity: &Identity,
        capability: &CapabilityMeta,
    ) -> Result<bool, BoxError>;

    /// Name used in logs and denial reasons
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared, type-erased guard
pub type GuardRef = Arc<dyn Guard>;

/// Guard backed by a synchronous closure
pub struct FnGuard<F> {
    name: String,
    check: F,
}

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&Identity, &CapabilityMeta) -> bool + Send + Sync,
{
    async fn evaluate(
        &self,
        identity: &Identity,
        capability: &CapabilityMeta,
    ) -> Result<bool, BoxError> {
        Ok((self.check)(identity, capability))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnGuard<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGuard").field("name", &self.name).finish()
    }
}

/// Guard backed by an async closure.
///
/// The closure receives owned copies so the returned future can be `'static`.
pub struct AsyncFnGuard<F> {
    name: String,
    check: F,
}

#[async_trait]
impl<F, Fut> Guard for AsyncFnGuard<F>
where
    F: Fn(Identity, CapabilityMeta) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    async fn evaluate(
        &self,
        identity: &Identity,
        capability: &CapabilityMeta,
    ) -> Result<bool, BoxError> {
        (self.check)(identity.clone(), capability.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build a guard from a synchronous predicate.
pub fn guard_fn<F>(name: impl Into<String>, check: F) -> GuardRef
where
    F: Fn(&Identity, &CapabilityMeta) -> bool + Send + Sync + 'static,
{
    Arc::new(FnGuard {
        name: name.into(),
        check,
    })
}

/// Build a guard from an async predicate.
pub fn async_guard_fn<F, Fut>(name: impl Into<String>, check: F) -> GuardRef
where
    F: Fn(Identity, CapabilityMeta) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    Arc::new(AsyncFnGuard {
        name: name.into(),
        check,
    })
}

/// Guard that admits only the listed subjects.
#[derive(Debug, Clone)]
pub struct SubjectAllowList {
    subjects: Vec<String>,
}

impl SubjectAllowList {
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subjects: subjects.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Guard for SubjectAllowList {
    async fn evaluate(
        &self,
        identity: &Identity,
        _capability: &CapabilityMeta,
    ) -> Result<bool, BoxError> {
        Ok(identity
            .subject()
            .is_some_and(|subject| self.subjects.iter().any(|s| s == subject)))
    }

    fn name(&self) -> &str {
        "subject-allow-list"
    }
}
