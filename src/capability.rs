//! Shared pieces of tools, resources, and prompts.
//!
//! Every registered capability carries the same core: metadata guards can
//! inspect, an access policy, an optional argument schema, and a binding
//! that says how its handler gets invoked.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::authz::AccessPolicy;
use crate::context::RequestContext;
use crate::error::ToolError;
use crate::provider::{Instance, ProviderKey};
use crate::schema::ArgumentSchema;

/// The three kinds of capability a server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Tool => write!(f, "tool"),
            CapabilityKind::Resource => write!(f, "resource"),
            CapabilityKind::Prompt => write!(f, "prompt"),
        }
    }
}

/// Read-only view of a capability, handed to guards.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityMeta {
    pub kind: CapabilityKind,
    /// Registry key: tool name, prompt name, resource URI, or URI template
    pub name: String,
    pub description: Option<String>,
    pub annotations: Map<String, Value>,
    /// Type name of the owning provider, for provider-bound capabilities
    pub provider: Option<&'static str>,
}

impl CapabilityMeta {
    pub(crate) fn new(kind: CapabilityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: None,
            annotations: Map::new(),
            provider: None,
        }
    }
}

pub(crate) type HandlerFuture = BoxFuture<'static, Result<Value, ToolError>>;

type ClosureFn = dyn Fn(RequestContext, Value) -> HandlerFuture + Send + Sync;
type ProviderFn = dyn Fn(Instance, RequestContext, Value) -> HandlerFuture + Send + Sync;

/// How a capability's handler obtains its receiver.
#[derive(Clone)]
pub enum Binding {
    /// A free closure carrying its own state. Never resolved through the
    /// container.
    Closure(Arc<ClosureFn>),
    /// A method on a provider whose instance is resolved per invocation.
    Provider {
        key: ProviderKey,
        call: Arc<ProviderFn>,
    },
}

impl Binding {
    pub fn provider_key(&self) -> Option<ProviderKey> {
        match self {
            Binding::Closure(_) => None,
            Binding::Provider { key, .. } => Some(*key),
        }
    }

    /// Run the handler. `instance` must be present for provider bindings.
    pub(crate) fn call(
        &self,
        instance: Option<Instance>,
        ctx: RequestContext,
        args: Value,
    ) -> HandlerFuture {
        match (self, instance) {
            (Binding::Closure(f), _) => f(ctx, args),
            (Binding::Provider { call, .. }, Some(instance)) => call(instance, ctx, args),
            (Binding::Provider { key, .. }, None) => {
                let message = format!("no instance resolved for provider {}", key.type_name());
                Box::pin(async move { Err(ToolError::new(message)) })
            }
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Closure(_) => f.write_str("Binding::Closure"),
            Binding::Provider { key, .. } => f
                .debug_struct("Binding::Provider")
                .field("provider", &key.type_name())
                .finish(),
        }
    }
}

/// Core shared by every registered capability.
#[derive(Clone, Debug)]
pub struct CapabilityCore {
    pub(crate) meta: CapabilityMeta,
    pub(crate) policy: AccessPolicy,
    pub(crate) parameters: Option<ArgumentSchema>,
    pub(crate) binding: Binding,
}

impl CapabilityCore {
    pub fn meta(&self) -> &CapabilityMeta {
        &self.meta
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn parameters(&self) -> Option<&ArgumentSchema> {
        self.parameters.as_ref()
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Attach to a provider: record its name and put its policy in front.
    pub(crate) fn adopt_provider(&mut self, provider: &'static str, policy: &AccessPolicy) {
        self.meta.provider = Some(provider);
        self.policy = policy.merged(&self.policy);
    }
}

fn decode<I: DeserializeOwned>(args: Value) -> Result<I, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::user(format!("Invalid arguments: {}", e)))
}

fn encode<R: Serialize>(output: R) -> Result<Value, ToolError> {
    serde_json::to_value(output).map_err(ToolError::from)
}

/// Closure handler taking deserialized input.
pub(crate) fn typed_closure<I, F, Fut, R, E>(handler: F) -> Binding
where
    I: DeserializeOwned + Send + 'static,
    F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Serialize,
    E: Into<ToolError>,
{
    let handler = Arc::new(handler);
    Binding::Closure(Arc::new(move |ctx: RequestContext, args: Value| -> HandlerFuture {
        let handler = handler.clone();
        Box::pin(async move {
            let input = decode::<I>(args)?;
            let output = handler(ctx, input).await.map_err(Into::into)?;
            encode(output)
        })
    }))
}

/// Closure handler taking the raw argument object.
pub(crate) fn raw_closure<F, Fut, R, E>(handler: F) -> Binding
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Serialize,
    E: Into<ToolError>,
{
    let handler = Arc::new(handler);
    Binding::Closure(Arc::new(move |ctx: RequestContext, args: Value| -> HandlerFuture {
        let handler = handler.clone();
        Box::pin(async move {
            let output = handler(ctx, args).await.map_err(Into::into)?;
            encode(output)
        })
    }))
}

/// Provider method taking deserialized input.
pub(crate) fn typed_provider<P, I, F, Fut, R, E>(handler: F) -> Binding
where
    P: Send + Sync + 'static,
    I: DeserializeOwned + Send + 'static,
    F: Fn(Arc<P>, RequestContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Serialize,
    E: Into<ToolError>,
{
    let handler = Arc::new(handler);
    Binding::Provider {
        key: ProviderKey::of::<P>(),
        call: Arc::new(
            move |instance: Instance, ctx: RequestContext, args: Value| -> HandlerFuture {
                let handler = handler.clone();
                Box::pin(async move {
                    let provider = instance.downcast::<P>().map_err(|_| {
                        ToolError::new(format!("resolved instance is not a {}", type_name::<P>()))
                    })?;
                    let input = decode::<I>(args)?;
                    let output = handler(provider, ctx, input).await.map_err(Into::into)?;
                    encode(output)
                })
            },
        ),
    }
}

/// Provider method taking the raw argument object.
pub(crate) fn raw_provider<P, F, Fut, R, E>(handler: F) -> Binding
where
    P: Send + Sync + 'static,
    F: Fn(Arc<P>, RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Serialize,
    E: Into<ToolError>,
{
    typed_provider::<P, Value, _, _, _, _>(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Input {
        n: i64,
    }

    struct Counter {
        base: i64,
    }

    #[tokio::test]
    async fn test_typed_closure_decodes_and_encodes() {
        let binding = typed_closure(|_ctx, input: Input| async move {
            Ok::<_, ToolError>(json!({"doubled": input.n * 2}))
        });
        let ctx = RequestContext::new(RequestId::Number(1));
        let out = binding.call(None, ctx, json!({"n": 4})).await.unwrap();
        assert_eq!(out, json!({"doubled": 8}));
    }

    #[tokio::test]
    async fn test_typed_closure_reports_decode_failure_as_user_error() {
        let binding =
            typed_closure(|_ctx, input: Input| async move { Ok::<_, ToolError>(input.n) });
        let ctx = RequestContext::new(RequestId::Number(1));
        let err = binding.call(None, ctx, json!({"n": "x"})).await.unwrap_err();
        assert!(err.is_user_facing());
        assert!(err.message().starts_with("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_provider_binding_uses_instance() {
        let binding = typed_provider(|counter: Arc<Counter>, _ctx, input: Input| async move {
            Ok::<_, ToolError>(counter.base + input.n)
        });
        assert_eq!(binding.provider_key(), Some(ProviderKey::of::<Counter>()));

        let instance: Instance = Arc::new(Counter { base: 10 });
        let ctx = RequestContext::new(RequestId::Number(1));
        let out = binding
            .call(Some(instance), ctx, json!({"n": 5}))
            .await
            .unwrap();
        assert_eq!(out, json!(15));
    }

    #[tokio::test]
    async fn test_provider_binding_without_instance_fails() {
        let binding = raw_provider(|_c: Arc<Counter>, _ctx, _args| async move {
            Ok::<_, ToolError>("never")
        });
        let ctx = RequestContext::new(RequestId::Number(1));
        let err = binding.call(None, ctx, json!({})).await.unwrap_err();
        assert!(!err.is_user_facing());
    }
}
