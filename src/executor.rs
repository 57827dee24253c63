//! Request-scoped capability executor.
//!
//! Every invocation runs the same pipeline:
//!
//! 1. look the capability up (dynamic entries first, then static)
//! 2. authorize the caller
//! 3. resolve the owning provider's instance, for provider-bound handlers
//! 4. validate the arguments against the capability's schema
//! 5. run the handler
//! 6. normalize its return value
//!
//! Steps 1 and 2 may fail with a JSON-RPC error (unknown capability or
//! forbidden). Failures from steps 3 to 6, panics included, become an
//! [`ErrorResult`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};

use crate::authz::{can_invoke, can_list};
use crate::capability::{CapabilityCore, CapabilityKind};
use crate::context::RequestContext;
use crate::error::JsonRpcError;
use crate::filter::DenialBehavior;
use crate::guard::GuardRef;
use crate::identity::Identity;
use crate::protocol::{
    CallToolResult, GetPromptResult, PromptDefinition, ReadResourceResult, ResourceDefinition,
    ResourceTemplateDefinition, ToolDefinition,
};
use crate::provider::Container;
use crate::registry::{CapabilityRegistry, Entry};
use crate::result::{ErrorResult, InvocationResult, normalize_prompt, normalize_resource, normalize_tool};
use crate::schema::validate;

/// Runs list and invoke operations against one server's registry.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<CapabilityRegistry>,
    container: Container,
    global_guards: Arc<[GuardRef]>,
    denial: DenialBehavior,
}

impl Executor {
    pub(crate) fn new(
        registry: Arc<CapabilityRegistry>,
        container: Container,
        global_guards: Vec<GuardRef>,
        denial: DenialBehavior,
    ) -> Self {
        Self {
            registry,
            container,
            global_guards: global_guards.into(),
            denial,
        }
    }

    async fn visible<T: Entry>(&self, entries: Vec<Arc<T>>, identity: Option<&Identity>) -> Vec<Arc<T>> {
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let core = entry.core();
            if can_list(&core.policy, &self.global_guards, &core.meta, identity).await {
                out.push(entry);
            }
        }
        out
    }

    pub async fn list_tools(&self, identity: Option<&Identity>) -> Vec<ToolDefinition> {
        self.visible(self.registry.tools.list(), identity)
            .await
            .iter()
            .map(|t| t.definition())
            .collect()
    }

    pub async fn list_resources(&self, identity: Option<&Identity>) -> Vec<ResourceDefinition> {
        self.visible(self.registry.resources.list(), identity)
            .await
            .iter()
            .map(|r| r.definition())
            .collect()
    }

    pub async fn list_resource_templates(
        &self,
        identity: Option<&Identity>,
    ) -> Vec<ResourceTemplateDefinition> {
        self.visible(self.registry.templates.list(), identity)
            .await
            .iter()
            .map(|t| t.definition())
            .collect()
    }

    pub async fn list_prompts(&self, identity: Option<&Identity>) -> Vec<PromptDefinition> {
        self.visible(self.registry.prompts.list(), identity)
            .await
            .iter()
            .map(|p| p.definition())
            .collect()
    }

    /// Invoke a tool and return the normalized result.
    ///
    /// Fails only when the tool is unknown to the caller or access is
    /// denied. Everything else is reported inside the result.
    pub async fn invoke_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: RequestContext,
    ) -> Result<InvocationResult, JsonRpcError> {
        let Some(tool) = self.registry.tools.find(name) else {
            tracing::debug!(tool = %name, "Unknown tool");
            return Err(JsonRpcError::unknown_capability(CapabilityKind::Tool, name));
        };
        self.authorize(&tool.core, name, &ctx).await?;

        tracing::debug!(tool = %name, "Calling tool");
        let result = match self.run(&tool.core, ctx, arguments).await {
            Ok(raw) => normalize_tool(raw, tool.output_schema()),
            Err(error) => InvocationResult::Error(error),
        };
        if let InvocationResult::Error(error) = &result {
            tracing::debug!(tool = %name, error = %error, "Tool returned an error result");
        }
        Ok(result)
    }

    /// [`invoke_tool`](Self::invoke_tool) in wire form.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: RequestContext,
    ) -> Result<CallToolResult, JsonRpcError> {
        self.invoke_tool(name, arguments, ctx).await.map(Into::into)
    }

    /// Read a resource. Fixed URIs take precedence over template matches.
    ///
    /// Matching templates are tried in listing order and the first one the
    /// caller may use wins. When every match is denied, the first denial is
    /// reported against the requested URI, never the template.
    pub async fn read_resource(
        &self,
        uri: &str,
        ctx: RequestContext,
    ) -> Result<ReadResourceResult, JsonRpcError> {
        let (core, mime_type, arguments) = if let Some(resource) = self.registry.resources.find(uri) {
            self.authorize(&resource.core, uri, &ctx).await?;
            (
                resource.core.clone(),
                resource.mime_type().map(str::to_string),
                Value::Object(Map::new()),
            )
        } else {
            let mut first_denial = None;
            let mut matched = None;
            for template in self.registry.templates.list() {
                let Some(vars) = template.match_uri(uri) else {
                    continue;
                };
                match self.authorize(&template.core, uri, &ctx).await {
                    Ok(()) => {
                        matched = Some((template, vars));
                        break;
                    }
                    Err(denied) => {
                        first_denial.get_or_insert(denied);
                    }
                }
            }
            let Some((template, vars)) = matched else {
                return Err(first_denial.unwrap_or_else(|| {
                    tracing::debug!(uri = %uri, "Unknown resource");
                    JsonRpcError::unknown_capability(CapabilityKind::Resource, uri)
                }));
            };
            (
                template.core.clone(),
                template.mime_type().map(str::to_string),
                Value::Object(vars),
            )
        };

        tracing::debug!(uri = %uri, "Reading resource");
        let raw = self
            .run(&core, ctx, arguments)
            .await
            .map_err(ErrorResult::into_jsonrpc)?;
        normalize_resource(uri, mime_type.as_deref(), raw).map_err(ErrorResult::into_jsonrpc)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
        ctx: RequestContext,
    ) -> Result<GetPromptResult, JsonRpcError> {
        let Some(prompt) = self.registry.prompts.find(name) else {
            tracing::debug!(prompt = %name, "Unknown prompt");
            return Err(JsonRpcError::unknown_capability(CapabilityKind::Prompt, name));
        };
        self.authorize(&prompt.core, name, &ctx).await?;

        let arguments: Map<String, Value> = arguments
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        tracing::debug!(prompt = %name, "Getting prompt");
        let raw = self
            .run(&prompt.core, ctx, Value::Object(arguments))
            .await
            .map_err(ErrorResult::into_jsonrpc)?;
        normalize_prompt(prompt.core.meta.description.as_deref(), raw)
            .map_err(ErrorResult::into_jsonrpc)
    }

    async fn authorize(
        &self,
        core: &CapabilityCore,
        requested: &str,
        ctx: &RequestContext,
    ) -> Result<(), JsonRpcError> {
        can_invoke(
            &core.policy,
            &self.global_guards,
            &core.meta,
            ctx.identity(),
            &self.denial,
        )
        .await
        .map_err(|access| self.denial.to_error(&core.meta, requested, &access))
    }

    /// Resolve, validate and invoke. Never panics outward.
    async fn run(
        &self,
        core: &CapabilityCore,
        ctx: RequestContext,
        arguments: Value,
    ) -> Result<Value, ErrorResult> {
        let ctx = ctx.with_logger(core.meta.name.clone());
        let stages = async {
            let instance = match core.binding.provider_key() {
                None => None,
                Some(key) => {
                    let instance = self.container.resolve(key, ctx.scope()).await.map_err(|e| {
                        tracing::warn!(
                            provider = key.type_name(),
                            capability = %core.meta.name,
                            error = %e,
                            "Failed to resolve provider"
                        );
                        ErrorResult::new(format!(
                            "Error: failed to resolve provider {}: {}",
                            key.type_name(),
                            e
                        ))
                    })?;
                    Some(instance)
                }
            };

            let arguments =
                validate(core.parameters.as_ref(), arguments).map_err(ErrorResult::validation)?;

            core.binding
                .call(instance, ctx, arguments)
                .await
                .map_err(|e| ErrorResult::from_tool_error(&e))
        };

        match AssertUnwindSafe(stages).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let error = ErrorResult::from_panic(panic);
                tracing::warn!(capability = %core.meta.name, error = %error, "Handler panicked");
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("container", &self.container)
            .field("global_guards", &self.global_guards.len())
            .field("denial", &self.denial)
            .finish()
    }
}
