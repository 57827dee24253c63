//! Invocation results and normalization of handler return values.
//!
//! Handlers may return a bare string, a single content item, a structured
//! value, or a full protocol envelope. Normalization turns any of these
//! into one [`InvocationResult`], applying the first matching rule:
//!
//! 1. A string becomes a text result.
//! 2. An object with a `type` field is a single content item.
//! 3. When the tool declares an output schema, the value is validated and
//!    returned as a structured result.
//! 4. Anything else must already be a valid envelope.
//!
//! Handler errors and panics never escape: they become [`ErrorResult`]s.

use std::any::Any;
use std::fmt;

use serde_json::{Value, json};

use crate::error::{JsonRpcError, ToolError};
use crate::protocol::{
    CallToolResult, Content, GetPromptResult, PromptMessage, PromptRole, ReadResourceResult,
    ResourceContent,
};
use crate::schema::{ArgumentSchema, ValidationIssue};

/// Outcome of a tool invocation, before wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Text(TextResult),
    Structured(StructuredResult),
    Error(ErrorResult),
}

impl InvocationResult {
    pub fn is_error(&self) -> bool {
        matches!(self, InvocationResult::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextResult {
    pub content: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResult {
    pub value: Value,
    /// Human-readable rendering sent alongside the structured value
    pub content: Vec<Content>,
}

/// A failed invocation, expressed as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResult {
    pub message: String,
    /// Field-level detail for validation failures
    pub issues: Vec<ValidationIssue>,
}

impl ErrorResult {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    /// Arguments did not satisfy the declared schema.
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        let detail = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            message: format!("Invalid arguments: {}", detail),
            issues,
        }
    }

    /// The handler returned an error. User-facing messages pass verbatim.
    pub fn from_tool_error(err: &ToolError) -> Self {
        if err.is_user_facing() {
            Self::new(err.message())
        } else {
            Self::new(format!("Error: {}", err.message()))
        }
    }

    /// The handler panicked.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new(format!("Error: handler panicked: {}", detail))
    }

    /// Wire form for results that carry no error flag (resources, prompts).
    ///
    /// Validation failures become `invalid_params` with the issues attached
    /// as `data`; everything else becomes `internal_error`.
    pub fn into_jsonrpc(self) -> JsonRpcError {
        if self.issues.is_empty() {
            JsonRpcError::internal_error(self.message)
        } else {
            JsonRpcError::invalid_params(self.message).with_data(json!({ "issues": self.issues }))
        }
    }
}

impl fmt::Display for ErrorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<InvocationResult> for CallToolResult {
    fn from(result: InvocationResult) -> Self {
        match result {
            InvocationResult::Text(text) => CallToolResult {
                content: text.content,
                is_error: false,
                structured_content: None,
            },
            InvocationResult::Structured(structured) => CallToolResult {
                content: structured.content,
                is_error: false,
                structured_content: Some(structured.value),
            },
            InvocationResult::Error(error) => {
                let structured_content = if error.issues.is_empty() {
                    None
                } else {
                    Some(json!({ "issues": error.issues }))
                };
                CallToolResult {
                    content: vec![Content::text(error.message)],
                    is_error: true,
                    structured_content,
                }
            }
        }
    }
}

/// Parse a single content item if `raw` looks like one (rule 2).
fn as_content(raw: &Value) -> Option<Content> {
    let object = raw.as_object()?;
    if !object.get("type").is_some_and(Value::is_string) {
        return None;
    }
    serde_json::from_value(raw.clone()).ok()
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Normalize a tool handler's return value.
pub fn normalize_tool(raw: Value, output_schema: Option<&ArgumentSchema>) -> InvocationResult {
    if let Value::String(text) = raw {
        return InvocationResult::Text(TextResult {
            content: vec![Content::text(text)],
        });
    }

    if let Some(content) = as_content(&raw) {
        return InvocationResult::Text(TextResult {
            content: vec![content],
        });
    }

    if let Some(schema) = output_schema {
        let issues = schema.issues(&raw);
        if !issues.is_empty() {
            let detail = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return InvocationResult::Error(ErrorResult {
                message: format!("Error: output does not match declared schema: {}", detail),
                issues,
            });
        }
        return InvocationResult::Structured(StructuredResult {
            content: vec![Content::text(render(&raw))],
            value: raw,
        });
    }

    match serde_json::from_value::<CallToolResult>(raw) {
        Ok(envelope) if envelope.is_error => InvocationResult::Error(ErrorResult::new(
            envelope.all_text(),
        )),
        Ok(envelope) => match envelope.structured_content {
            Some(value) => InvocationResult::Structured(StructuredResult {
                value,
                content: envelope.content,
            }),
            None => InvocationResult::Text(TextResult {
                content: envelope.content,
            }),
        },
        Err(e) => InvocationResult::Error(ErrorResult::new(format!(
            "Error: handler returned an invalid tool result: {}",
            e
        ))),
    }
}

fn content_to_resource(uri: &str, mime_type: Option<&str>, content: Content) -> ResourceContent {
    match content {
        Content::Text { text, .. } => ResourceContent {
            uri: uri.to_string(),
            mime_type: mime_type.map(str::to_string),
            text: Some(text),
            blob: None,
        },
        Content::Image {
            data, mime_type, ..
        }
        | Content::Audio {
            data, mime_type, ..
        } => ResourceContent {
            uri: uri.to_string(),
            mime_type: Some(mime_type),
            text: None,
            blob: Some(data),
        },
        Content::Resource { resource, .. } => resource,
    }
}

/// Normalize a resource handler's return value.
///
/// `uri` is the URI that was read and `mime_type` the declared default.
pub fn normalize_resource(
    uri: &str,
    mime_type: Option<&str>,
    raw: Value,
) -> Result<ReadResourceResult, ErrorResult> {
    if let Value::String(text) = raw {
        return Ok(ReadResourceResult {
            contents: vec![ResourceContent {
                uri: uri.to_string(),
                mime_type: mime_type.map(str::to_string),
                text: Some(text),
                blob: None,
            }],
        });
    }

    if let Some(content) = as_content(&raw) {
        return Ok(ReadResourceResult {
            contents: vec![content_to_resource(uri, mime_type, content)],
        });
    }

    if raw.get("contents").is_some() {
        return serde_json::from_value(raw).map_err(|e| {
            ErrorResult::new(format!(
                "Error: handler returned an invalid resource result: {}",
                e
            ))
        });
    }

    match serde_json::from_value::<ResourceContent>(raw) {
        Ok(content) if content.text.is_some() || content.blob.is_some() => {
            Ok(ReadResourceResult {
                contents: vec![content],
            })
        }
        Ok(_) => Err(ErrorResult::new(
            "Error: resource content has neither text nor blob",
        )),
        Err(e) => Err(ErrorResult::new(format!(
            "Error: handler returned an invalid resource result: {}",
            e
        ))),
    }
}

/// Normalize a prompt handler's return value.
///
/// `description` fills in the result description when the handler omits it.
pub fn normalize_prompt(
    description: Option<&str>,
    raw: Value,
) -> Result<GetPromptResult, ErrorResult> {
    let fallback = || description.map(str::to_string);

    if let Value::String(text) = raw {
        return Ok(GetPromptResult {
            description: fallback(),
            messages: vec![PromptMessage::user(text)],
        });
    }

    if let Some(content) = as_content(&raw) {
        return Ok(GetPromptResult {
            description: fallback(),
            messages: vec![PromptMessage {
                role: PromptRole::User,
                content,
            }],
        });
    }

    match serde_json::from_value::<GetPromptResult>(raw) {
        Ok(mut result) => {
            if result.description.is_none() {
                result.description = fallback();
            }
            Ok(result)
        }
        Err(e) => Err(ErrorResult::new(format!(
            "Error: handler returned an invalid prompt result: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_becomes_text() {
        let result = normalize_tool(json!("X"), None);
        assert_eq!(
            result,
            InvocationResult::Text(TextResult {
                content: vec![Content::text("X")]
            })
        );
    }

    #[test]
    fn test_single_content_item() {
        let result = normalize_tool(
            json!({"type": "image", "data": "AAAA", "mimeType": "image/png"}),
            None,
        );
        let InvocationResult::Text(text) = result else {
            panic!("expected text result");
        };
        assert!(matches!(text.content[0], Content::Image { .. }));
    }

    #[test]
    fn test_structured_with_output_schema() {
        let schema = ArgumentSchema::new(json!({
            "type": "object",
            "properties": {"temp": {"type": "number"}},
            "required": ["temp"]
        }))
        .unwrap();

        let result = normalize_tool(json!({"temp": 21.5}), Some(&schema));
        let InvocationResult::Structured(structured) = result else {
            panic!("expected structured result");
        };
        assert_eq!(structured.value, json!({"temp": 21.5}));
        assert!(structured.content[0].as_text().unwrap().contains("21.5"));

        let result = normalize_tool(json!({"temp": "warm"}), Some(&schema));
        let InvocationResult::Error(error) = result else {
            panic!("expected error result");
        };
        assert_eq!(error.issues[0].path, "/temp");
    }

    #[test]
    fn test_envelope() {
        let result = normalize_tool(
            json!({"content": [{"type": "text", "text": "ok"}]}),
            None,
        );
        assert!(matches!(result, InvocationResult::Text(_)));

        let result = normalize_tool(
            json!({"content": [{"type": "text", "text": "nope"}], "isError": true}),
            None,
        );
        assert_eq!(result, InvocationResult::Error(ErrorResult::new("nope")));

        let result = normalize_tool(
            json!({"content": [], "structuredContent": {"a": 1}}),
            None,
        );
        assert!(matches!(result, InvocationResult::Structured(_)));
    }

    #[test]
    fn test_unrecognized_value_is_error() {
        let result = normalize_tool(json!(42), None);
        assert!(result.is_error());
        let result = normalize_tool(json!({"temp": 1}), None);
        assert!(result.is_error());
    }

    #[test]
    fn test_tool_error_messages() {
        let user = ErrorResult::from_tool_error(&ToolError::user("City not supported"));
        assert_eq!(user.message, "City not supported");

        let generic = ErrorResult::from_tool_error(&ToolError::new("boom"));
        assert_eq!(generic.message, "Error: boom");
    }

    #[test]
    fn test_panic_payloads() {
        let err = ErrorResult::from_panic(Box::new("bad index"));
        assert!(err.message.contains("bad index"));
        let err = ErrorResult::from_panic(Box::new(String::from("owned")));
        assert!(err.message.contains("owned"));
    }

    #[test]
    fn test_error_envelope_carries_issues() {
        let error = ErrorResult::validation(vec![ValidationIssue {
            path: "/city".into(),
            message: "\"city\" is a required property".into(),
        }]);
        let wire = CallToolResult::from(InvocationResult::Error(error));
        assert!(wire.is_error);
        assert!(wire.all_text().contains("/city"));
        assert_eq!(
            wire.structured_content.unwrap()["issues"][0]["path"],
            json!("/city")
        );
    }

    #[test]
    fn test_resource_normalization() {
        let result = normalize_resource("config://app", Some("application/json"), json!("{}")).unwrap();
        assert_eq!(result.contents[0].uri, "config://app");
        assert_eq!(result.contents[0].mime_type.as_deref(), Some("application/json"));

        let result = normalize_resource(
            "img://logo",
            None,
            json!({"type": "image", "data": "AAAA", "mimeType": "image/png"}),
        )
        .unwrap();
        assert_eq!(result.contents[0].blob.as_deref(), Some("AAAA"));

        let result = normalize_resource(
            "x://y",
            None,
            json!({"contents": [{"uri": "x://y", "text": "a"}, {"uri": "x://y#2", "text": "b"}]}),
        )
        .unwrap();
        assert_eq!(result.contents.len(), 2);

        assert!(normalize_resource("x://y", None, json!(3)).is_err());
    }

    #[test]
    fn test_prompt_normalization() {
        let result = normalize_prompt(Some("Review code"), json!("Please review")).unwrap();
        assert_eq!(result.description.as_deref(), Some("Review code"));
        assert_eq!(result.messages, vec![PromptMessage::user("Please review")]);

        let result = normalize_prompt(
            None,
            json!({"messages": [{"role": "assistant", "content": {"type": "text", "text": "hi"}}]}),
        )
        .unwrap();
        assert_eq!(result.messages[0].role, PromptRole::Assistant);

        assert!(normalize_prompt(None, json!({"nope": true})).is_err());
    }
}
