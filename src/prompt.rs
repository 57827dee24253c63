//! Prompt definition and builder API
//!
//! Prompts take string arguments and return messages. The published
//! argument list is read from the same schema that validates a
//! `prompts/get` call, so the two cannot drift apart.
//!
//! ```rust
//! use mcp_host::{PromptBuilder, ToolError};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct ReviewArgs {
//!     /// The code to review
//!     code: String,
//!     language: Option<String>,
//! }
//!
//! let prompt = PromptBuilder::new("code_review")
//!     .description("Review a snippet")
//!     .public()
//!     .handler(|_ctx, args: ReviewArgs| async move {
//!         let lang = args.language.unwrap_or_else(|| "text".into());
//!         Ok::<_, ToolError>(format!("Review this {lang}:\n{}", args.code))
//!     })
//!     .unwrap();
//!
//! let def = prompt.definition();
//! assert_eq!(def.arguments.len(), 2);
//! ```

use std::future::Future;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::authz::AccessPolicy;
use crate::capability::{
    Binding, CapabilityCore, CapabilityKind, CapabilityMeta, raw_closure, typed_closure,
};
use crate::context::RequestContext;
use crate::error::{Error, Result, ToolError};
use crate::guard::GuardRef;
use crate::protocol::{GetPromptResult, PromptArgument, PromptDefinition, PromptMessage};
use crate::schema::ArgumentSchema;

/// A registered prompt
#[derive(Clone, Debug)]
pub struct Prompt {
    pub(crate) core: CapabilityCore,
}

impl Prompt {
    pub fn builder(name: impl Into<String>) -> PromptBuilder {
        PromptBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.core.meta.name
    }

    pub fn core(&self) -> &CapabilityCore {
        &self.core
    }

    /// Get the prompt definition for prompts/list
    pub fn definition(&self) -> PromptDefinition {
        let arguments = self
            .core
            .parameters
            .as_ref()
            .map(|schema| {
                schema
                    .parameters()
                    .into_iter()
                    .map(|p| PromptArgument {
                        name: p.name,
                        description: p.description,
                        required: p.required,
                    })
                    .collect()
            })
            .unwrap_or_default();

        PromptDefinition {
            name: self.name().to_string(),
            description: self.core.meta.description.clone(),
            arguments,
        }
    }
}

/// Builder for prompts
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    name: String,
    description: Option<String>,
    arguments: Vec<PromptArgument>,
    policy: AccessPolicy,
}

impl PromptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            policy: AccessPolicy::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare a required argument. Declared arguments take precedence over
    /// a schema derived from the handler's input type.
    pub fn required_arg(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: Some(description.into()),
            required: true,
        });
        self
    }

    /// Declare an optional argument
    pub fn optional_arg(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: Some(description.into()),
            required: false,
        });
        self
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

    /// Handler taking typed arguments; the argument list is derived from `I`
    /// unless arguments were declared explicitly.
    pub fn handler<I, F, Fut, R, E>(self, handler: F) -> Result<Prompt>
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        self.bind_typed::<I>(typed_closure::<I, F, Fut, R, E>(handler))
    }

    /// Handler taking the argument object as raw JSON.
    pub fn raw_handler<F, Fut, R, E>(self, handler: F) -> Result<Prompt>
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        self.bind(raw_closure::<F, Fut, R, E>(handler))
    }

    /// A prompt that always returns the same messages
    pub fn static_prompt(self, messages: Vec<PromptMessage>) -> Result<Prompt> {
        let description = self.description.clone();
        self.raw_handler(move |_ctx, _args| {
            let result = GetPromptResult {
                description: description.clone(),
                messages: messages.clone(),
            };
            async move { Ok::<_, ToolError>(result) }
        })
    }

    /// A prompt that returns a single user message
    pub fn user_message(self, text: impl Into<String>) -> Result<Prompt> {
        self.static_prompt(vec![PromptMessage::user(text)])
    }

    pub(crate) fn bind_typed<I: JsonSchema>(self, binding: Binding) -> Result<Prompt> {
        let schema = if self.arguments.is_empty() {
            Some(ArgumentSchema::for_type::<I>()?)
        } else {
            None
        };
        self.finish(schema, binding)
    }

    pub(crate) fn bind(self, binding: Binding) -> Result<Prompt> {
        self.finish(None, binding)
    }

    fn finish(self, derived: Option<ArgumentSchema>, binding: Binding) -> Result<Prompt> {
        if self.name.is_empty() {
            return Err(Error::composition("Prompt name cannot be empty"));
        }

        let parameters = if self.arguments.is_empty() {
            derived
        } else {
            Some(ArgumentSchema::string_fields(self.arguments.iter().map(
                |a| (a.name.as_str(), a.description.as_deref(), a.required),
            ))?)
        };

        let mut meta = CapabilityMeta::new(CapabilityKind::Prompt, self.name);
        meta.description = self.description;
        Ok(Prompt {
            core: CapabilityCore {
                meta,
                policy: self.policy,
                parameters,
                binding,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct GreetArgs {
        /// Who to greet
        name: String,
    }

    #[test]
    fn test_arguments_derived_from_input_type() {
        let prompt = PromptBuilder::new("greet")
            .handler(|_ctx, args: GreetArgs| async move {
                Ok::<_, ToolError>(format!("Hello, {}!", args.name))
            })
            .unwrap();

        let def = prompt.definition();
        assert_eq!(def.arguments.len(), 1);
        assert_eq!(def.arguments[0].name, "name");
        assert!(def.arguments[0].required);
        assert_eq!(def.arguments[0].description.as_deref(), Some("Who to greet"));
    }

    #[test]
    fn test_declared_arguments_drive_schema() {
        let prompt = PromptBuilder::new("summarize")
            .description("Summarize text")
            .required_arg("text", "Text to summarize")
            .optional_arg("length", "Target length")
            .raw_handler(|_ctx, args: Value| async move { Ok::<_, ToolError>(args.to_string()) })
            .unwrap();

        let def = prompt.definition();
        assert_eq!(def.description.as_deref(), Some("Summarize text"));
        assert_eq!(def.arguments.len(), 2);

        let schema = prompt.core().parameters().unwrap();
        assert!(schema.issues(&json!({"text": "x"})).is_empty());
        assert!(!schema.issues(&json!({"length": "short"})).is_empty());
    }

    #[test]
    fn test_raw_prompt_without_arguments_has_no_schema() {
        let prompt = PromptBuilder::new("hello").user_message("Hi").unwrap();
        assert!(prompt.core().parameters().is_none());
        assert!(prompt.definition().arguments.is_empty());
    }

    #[tokio::test]
    async fn test_static_prompt_returns_messages() {
        let prompt = PromptBuilder::new("hello")
            .description("Say hi")
            .user_message("Hi there")
            .unwrap();
        let ctx = RequestContext::new(RequestId::Number(1));
        let raw = prompt
            .core()
            .binding()
            .call(None, ctx, json!({}))
            .await
            .unwrap();
        let result: GetPromptResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.description.as_deref(), Some("Say hi"));
        assert_eq!(result.messages[0].content.as_text(), Some("Hi there"));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(PromptBuilder::new("").user_message("x").is_err());
    }
}
