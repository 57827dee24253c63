//! What an authenticated caller is told when invocation is denied.
//!
//! Anonymous callers are always told the capability does not exist. For
//! authenticated callers a server chooses between revealing the denial
//! (the default) and folding it into not-found as well.
//!
//! ```rust
//! use mcp_host::{DenialBehavior, JsonRpcError};
//!
//! let behavior = DenialBehavior::custom(|meta, denial| {
//!     JsonRpcError::forbidden(format!("{} is not available on your plan ({})", meta.name, denial))
//! });
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::authz::{AccessError, Denial};
use crate::capability::CapabilityMeta;
use crate::error::JsonRpcError;

type DenialFn = dyn Fn(&CapabilityMeta, &Denial) -> JsonRpcError + Send + Sync;

/// Behavior when an authenticated caller invokes a capability it may not use.
#[derive(Clone, Default)]
pub enum DenialBehavior {
    /// Return a forbidden error (`-32007`), revealing that the capability exists.
    #[default]
    Forbidden,
    /// Return the same error as for a nonexistent capability.
    NotFound,
    /// Build the error with an application-specific function.
    Custom(Arc<DenialFn>),
}

impl std::fmt::Debug for DenialBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forbidden => write!(f, "Forbidden"),
            Self::NotFound => write!(f, "NotFound"),
            Self::Custom(_) => write!(f, "Custom(...)"),
        }
    }
}

impl DenialBehavior {
    /// Create a custom denial behavior with the given error generator.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&CapabilityMeta, &Denial) -> JsonRpcError + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub(crate) fn hides_denied(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Generate the JSON-RPC error for a failed access check.
    ///
    /// `requested` is the name or URI the caller asked for. It differs from
    /// `meta.name` when a URI matched a resource template, and only the
    /// requested form may appear in the error.
    pub fn to_error(
        &self,
        meta: &CapabilityMeta,
        requested: &str,
        access: &AccessError,
    ) -> JsonRpcError {
        match access {
            AccessError::NotFound => JsonRpcError::unknown_capability(meta.kind, requested),
            AccessError::Forbidden(denial) => match self {
                Self::Custom(f) => f(meta, denial),
                _ => JsonRpcError::forbidden(format!(
                    "Access to {} '{}' denied: {}",
                    meta.kind, requested, denial
                )),
            },
        }
    }
}

/// Serializable form of [`DenialBehavior`] for configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialMode {
    #[default]
    Forbidden,
    NotFound,
}

impl From<DenialMode> for DenialBehavior {
    fn from(mode: DenialMode) -> Self {
        match mode {
            DenialMode::Forbidden => DenialBehavior::Forbidden,
            DenialMode::NotFound => DenialBehavior::NotFound,
        }
    }
}
