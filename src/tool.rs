//! Tool definition and builder API
//!
//! Tools are either free closures (usable for static and dynamic
//! registration) or methods of a provider (declared through
//! [`ProviderDef::tool`](crate::ProviderDef::tool)).
//!
//! ```rust
//! use mcp_host::{ToolBuilder, ToolError};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct EchoInput { message: String }
//!
//! let tool = ToolBuilder::new("echo")
//!     .description("Echo a message")
//!     .read_only()
//!     .public()
//!     .handler(|input: EchoInput| async move { Ok::<_, ToolError>(input.message) })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(tool.name(), "echo");
//! ```

use std::future::Future;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::authz::AccessPolicy;
use crate::capability::{
    Binding, CapabilityCore, CapabilityKind, CapabilityMeta, raw_closure, typed_closure,
};
use crate::context::RequestContext;
use crate::error::{Error, Result, ToolError};
use crate::guard::GuardRef;
use crate::protocol::ToolDefinition;
use crate::schema::ArgumentSchema;

/// Validate a tool name.
///
/// Tool names must be:
/// - 1-128 characters long
/// - Contain only alphanumeric characters, underscores, hyphens, and dots
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::composition("Tool name cannot be empty"));
    }
    if name.len() > 128 {
        return Err(Error::composition(format!(
            "Tool name '{}' exceeds maximum length of 128 characters (got {})",
            name,
            name.len()
        )));
    }
    if let Some(invalid_char) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-' && *c != '.')
    {
        return Err(Error::composition(format!(
            "Tool name '{}' contains invalid character '{}'. Only alphanumeric, underscore, hyphen, and dot are allowed.",
            name, invalid_char
        )));
    }
    Ok(())
}

/// A registered tool
#[derive(Clone, Debug)]
pub struct Tool {
    pub(crate) core: CapabilityCore,
    title: Option<String>,
    output_schema: Option<ArgumentSchema>,
}

impl Tool {
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.core.meta.name
    }

    pub fn core(&self) -> &CapabilityCore {
        &self.core
    }

    pub fn output_schema(&self) -> Option<&ArgumentSchema> {
        self.output_schema.as_ref()
    }

    /// Definition as returned by tools/list
    pub fn definition(&self) -> ToolDefinition {
        let meta = &self.core.meta;
        ToolDefinition {
            name: meta.name.clone(),
            title: self.title.clone(),
            description: meta.description.clone(),
            input_schema: self
                .core
                .parameters
                .as_ref()
                .map(|s| s.raw().clone())
                .unwrap_or_else(|| json!({ "type": "object" })),
            output_schema: self.output_schema.as_ref().map(|s| s.raw().clone()),
            annotations: if meta.annotations.is_empty() {
                None
            } else {
                Some(meta.annotations.clone())
            },
        }
    }
}

/// Builder for tools
#[derive(Debug, Clone)]
pub struct ToolBuilder {
    name: String,
    title: Option<String>,
    description: Option<String>,
    parameters: Option<Value>,
    output_schema: Option<Value>,
    annotations: Map<String, Value>,
    policy: AccessPolicy,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            parameters: None,
            output_schema: None,
            annotations: Map::new(),
            policy: AccessPolicy::default(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Explicit input schema, used by raw handlers
    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    /// Declare an output schema; structured return values are validated
    /// against it.
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Declare the output schema of `T`.
    pub fn output_type<T: JsonSchema>(self) -> Self {
        let schema = schemars::schema_for!(T);
        match serde_json::to_value(schema) {
            Ok(value) => self.output_schema(value),
            Err(_) => self,
        }
    }

    /// Attach a free-form annotation
    pub fn annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }

    /// The tool does not modify its environment
    pub fn read_only(self) -> Self {
        self.annotation("readOnlyHint", Value::Bool(true))
    }

    pub fn destructive(self, destructive: bool) -> Self {
        self.annotation("destructiveHint", Value::Bool(destructive))
    }

    /// Repeated calls with the same arguments have no additional effect
    pub fn idempotent(self) -> Self {
        self.annotation("idempotentHint", Value::Bool(true))
    }

    pub fn open_world(self, open_world: bool) -> Self {
        self.annotation("openWorldHint", Value::Bool(open_world))
    }

    pub fn public(mut self) -> Self {
        self.policy = self.policy.public();
        self
    }

    pub fn require_scope(mut self, scope: impl Into<String>) -> Self {
        self.policy = self.policy.require_scope(scope);
        self
    }

    pub fn require_role(mut self, role: impl Into<String>) -> Self {
        self.policy = self.policy.require_role(role);
        self
    }

    pub fn guard(mut self, guard: GuardRef) -> Self {
        self.policy = self.policy.guard(guard);
        self
    }

    /// Handler taking deserialized input; the input schema is derived from `I`.
    pub fn handler<I, F, Fut, R, E>(self, handler: F) -> ToolBuilderWithHandler
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        self.handler_with_context(move |_ctx: RequestContext, input: I| handler(input))
    }

    /// Handler taking the request context and deserialized input.
    pub fn handler_with_context<I, F, Fut, R, E>(self, handler: F) -> ToolBuilderWithHandler
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        ToolBuilderWithHandler {
            schema: SchemaSource::Derived(ArgumentSchema::for_type::<I>()),
            builder: self,
            binding: typed_closure::<I, F, Fut, R, E>(handler),
        }
    }

    /// Handler taking raw JSON arguments, validated against
    /// [`parameters`](Self::parameters) when given.
    pub fn raw_handler<F, Fut, R, E>(self, handler: F) -> ToolBuilderWithHandler
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        ToolBuilderWithHandler {
            schema: SchemaSource::Declared,
            builder: self,
            binding: raw_closure::<F, Fut, R, E>(handler),
        }
    }

    pub(crate) fn bind_typed<I: JsonSchema>(self, binding: Binding) -> Result<Tool> {
        ToolBuilderWithHandler {
            schema: SchemaSource::Derived(ArgumentSchema::for_type::<I>()),
            builder: self,
            binding,
        }
        .build()
    }

    pub(crate) fn bind(self, binding: Binding) -> Result<Tool> {
        ToolBuilderWithHandler {
            schema: SchemaSource::Declared,
            builder: self,
            binding,
        }
        .build()
    }
}

enum SchemaSource {
    /// From the handler's input type
    Derived(Result<ArgumentSchema>),
    /// From `parameters(..)`, if any
    Declared,
}

/// A tool builder with its handler attached
pub struct ToolBuilderWithHandler {
    builder: ToolBuilder,
    schema: SchemaSource,
    binding: Binding,
}

impl ToolBuilderWithHandler {
    /// Validate the name and compile schemas.
    pub fn build(self) -> Result<Tool> {
        let ToolBuilder {
            name,
            title,
            description,
            parameters,
            output_schema,
            annotations,
            policy,
        } = self.builder;

        validate_tool_name(&name)?;

        let parameters = match (self.schema, parameters) {
            (_, Some(explicit)) => Some(ArgumentSchema::new(explicit)?),
            (SchemaSource::Derived(derived), None) => Some(derived?),
            (SchemaSource::Declared, None) => None,
        };
        let output_schema = output_schema.map(ArgumentSchema::new).transpose()?;

        let mut meta = CapabilityMeta::new(CapabilityKind::Tool, name);
        meta.description = description;
        meta.annotations = annotations;

        Ok(Tool {
            core: CapabilityCore {
                meta,
                policy,
                parameters,
                binding: self.binding,
            },
            title,
            output_schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    #[test]
    fn test_valid_tool_names() {
        for name in ["add", "get_weather", "v1.search", "my-tool", "A"] {
            assert!(validate_tool_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_tool_names() {
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("has space").is_err());
        assert!(validate_tool_name("slash/name").is_err());
        assert!(validate_tool_name(&"x".repeat(129)).is_err());
        assert!(validate_tool_name(&"x".repeat(128)).is_ok());
    }

    #[test]
    fn test_definition_from_typed_handler() {
        let tool = ToolBuilder::new("add")
            .description("Add two numbers")
            .read_only()
            .handler(|input: AddInput| async move { Ok::<_, ToolError>(input.a + input.b) })
            .build()
            .unwrap();

        let def = tool.definition();
        assert_eq!(def.name, "add");
        assert_eq!(def.description.as_deref(), Some("Add two numbers"));
        assert_eq!(def.input_schema["type"], "object");
        assert!(def.input_schema["properties"]["a"].is_object());
        assert_eq!(
            def.annotations.unwrap().get("readOnlyHint"),
            Some(&Value::Bool(true))
        );
        assert!(def.output_schema.is_none());
    }

    #[test]
    fn test_raw_handler_without_parameters_has_open_schema() {
        let tool = ToolBuilder::new("raw")
            .raw_handler(|_ctx, args: Value| async move { Ok::<_, ToolError>(args) })
            .build()
            .unwrap();
        assert!(tool.core().parameters().is_none());
        assert_eq!(tool.definition().input_schema, json!({"type": "object"}));
    }

    #[test]
    fn test_explicit_parameters_override() {
        let tool = ToolBuilder::new("raw")
            .parameters(json!({"type": "object", "required": ["q"]}))
            .raw_handler(|_ctx, args: Value| async move { Ok::<_, ToolError>(args) })
            .build()
            .unwrap();
        assert_eq!(tool.definition().input_schema["required"], json!(["q"]));
    }

    #[test]
    fn test_invalid_name_fails_build() {
        let err = ToolBuilder::new("bad name")
            .raw_handler(|_ctx, _args: Value| async move { Ok::<_, ToolError>("x") })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Composition(_)));
    }

    #[test]
    fn test_policy_is_kept() {
        let tool = ToolBuilder::new("deploy")
            .require_scope("deploy")
            .require_role("ops")
            .raw_handler(|_ctx, _args: Value| async move { Ok::<_, ToolError>("ok") })
            .build()
            .unwrap();
        let policy = tool.core().policy();
        assert!(!policy.is_public());
        assert!(policy.required_scopes().contains("deploy"));
        assert!(policy.required_roles().contains("ops"));
    }
}
