//! Resource definition and builder API
//!
//! Resources are addressed by URI. A [`Resource`] serves one fixed URI; a
//! [`ResourceTemplate`] serves every URI matching an RFC 6570 level-1
//! template such as `db://users/{id}`, handing the extracted variables to
//! its handler as the argument object.
//!
//! Handlers may return a plain string (text content at the read URI), a
//! single content item, a full `ReadResourceResult`, or a bare
//! `ResourceContent`.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::authz::AccessPolicy;
use crate::capability::{
    Binding, CapabilityCore, CapabilityKind, CapabilityMeta, raw_closure, typed_closure,
};
use crate::context::RequestContext;
use crate::error::{Error, Result, ToolError};
use crate::guard::GuardRef;
use crate::protocol::{ResourceDefinition, ResourceTemplateDefinition};
use crate::schema::ArgumentSchema;

/// A resource with a fixed URI
#[derive(Clone, Debug)]
pub struct Resource {
    pub(crate) core: CapabilityCore,
    name: String,
    mime_type: Option<String>,
}

impl Resource {
    pub fn builder(uri: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder::new(uri)
    }

    pub fn uri(&self) -> &str {
        &self.core.meta.name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn core(&self) -> &CapabilityCore {
        &self.core
    }

    /// Get the resource definition for resources/list
    pub fn definition(&self) -> ResourceDefinition {
        ResourceDefinition {
            uri: self.uri().to_string(),
            name: self.name.clone(),
            description: self.core.meta.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Builder for resources
///
/// ```rust
/// use mcp_host::ResourceBuilder;
///
/// let readme = ResourceBuilder::new("file:///README.md")
///     .name("README")
///     .mime_type("text/markdown")
///     .public()
///     .text("# Hello")
///     .unwrap();
/// assert_eq!(readme.uri(), "file:///README.md");
/// ```
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    uri: String,
    name: Option<String>,
    description: Option<String>,
    mime_type: Option<String>,
    policy: AccessPolicy,
}

impl ResourceBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
            description: None,
            mime_type: None,
            policy: AccessPolicy::default(),
        }
    }

    /// Set the resource name (human-readable). Defaults to the URI.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the MIME type of the resource
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
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

    /// Set the handler function for reading the resource
    pub fn handler<F, Fut, R, E>(self, handler: F) -> Result<Resource>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        self.bind(raw_closure(move |ctx: RequestContext, _args: Value| {
            handler(ctx)
        }))
    }

    /// Create a static text resource
    pub fn text(self, content: impl Into<String>) -> Result<Resource> {
        let content = content.into();
        self.handler(move |_ctx| {
            let content = content.clone();
            async move { Ok::<_, ToolError>(content) }
        })
    }

    /// Create a static JSON resource
    pub fn json(mut self, value: Value) -> Result<Resource> {
        self.mime_type = Some("application/json".to_string());
        let text = serde_json::to_string_pretty(&value)?;
        self.text(text)
    }

    pub(crate) fn bind(self, binding: Binding) -> Result<Resource> {
        if self.uri.is_empty() {
            return Err(Error::composition("Resource URI cannot be empty"));
        }
        let name = self.name.unwrap_or_else(|| self.uri.clone());
        let mut meta = CapabilityMeta::new(CapabilityKind::Resource, self.uri);
        meta.description = self.description;
        Ok(Resource {
            core: CapabilityCore {
                meta,
                policy: self.policy,
                parameters: None,
                binding,
            },
            name,
            mime_type: self.mime_type,
        })
    }
}

/// A parameterized resource: URIs matching the template are served by one
/// handler.
#[derive(Clone, Debug)]
pub struct ResourceTemplate {
    pub(crate) core: CapabilityCore,
    name: String,
    mime_type: Option<String>,
    pattern: regex::Regex,
    variables: Vec<String>,
}

impl ResourceTemplate {
    pub fn builder(uri_template: impl Into<String>) -> ResourceTemplateBuilder {
        ResourceTemplateBuilder::new(uri_template)
    }

    pub fn uri_template(&self) -> &str {
        &self.core.meta.name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn core(&self) -> &CapabilityCore {
        &self.core
    }

    /// Variable names in order of appearance
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Get the template definition for resources/templates/list
    pub fn definition(&self) -> ResourceTemplateDefinition {
        ResourceTemplateDefinition {
            uri_template: self.uri_template().to_string(),
            name: self.name.clone(),
            description: self.core.meta.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    /// Match `uri` against the template.
    ///
    /// Returns the extracted variables as a JSON object of strings.
    pub fn match_uri(&self, uri: &str) -> Option<Map<String, Value>> {
        self.pattern.captures(uri).map(|caps| {
            self.variables
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    caps.get(i + 1)
                        .map(|m| (name.clone(), Value::String(m.as_str().to_string())))
                })
                .collect()
        })
    }
}

/// Builder for resource templates
///
/// ```rust
/// use mcp_host::{ResourceTemplateBuilder, ToolError};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct UserVars { id: String }
///
/// let users = ResourceTemplateBuilder::new("db://users/{id}")
///     .name("User Records")
///     .require_scope("users:read")
///     .handler(|_ctx, vars: UserVars| async move {
///         Ok::<_, ToolError>(format!("user {}", vars.id))
///     })
///     .unwrap();
/// assert!(users.match_uri("db://users/42").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ResourceTemplateBuilder {
    uri_template: String,
    name: Option<String>,
    description: Option<String>,
    mime_type: Option<String>,
    policy: AccessPolicy,
}

impl ResourceTemplateBuilder {
    /// Templates use RFC 6570 level-1 syntax:
    /// - `{var}` matches any non-slash characters
    /// - `{+var}` matches anything, slashes included
    pub fn new(uri_template: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: None,
            description: None,
            mime_type: None,
            policy: AccessPolicy::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the MIME type hint for resources from this template
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
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

    /// Set the handler. It receives the URI variables deserialized as `I`
    /// (use `serde_json::Map<String, Value>` to take them as-is).
    pub fn handler<I, F, Fut, R, E>(self, handler: F) -> Result<ResourceTemplate>
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        self.bind(typed_closure::<I, F, Fut, R, E>(handler))
    }

    pub(crate) fn bind(self, binding: Binding) -> Result<ResourceTemplate> {
        let (pattern, variables) = compile_uri_template(&self.uri_template)?;
        let parameters =
            ArgumentSchema::string_fields(variables.iter().map(|v| (v.as_str(), None, true)))?;
        let name = self.name.unwrap_or_else(|| self.uri_template.clone());

        let mut meta = CapabilityMeta::new(CapabilityKind::Resource, self.uri_template);
        meta.description = self.description;
        Ok(ResourceTemplate {
            core: CapabilityCore {
                meta,
                policy: self.policy,
                parameters: Some(parameters),
                binding,
            },
            name,
            mime_type: self.mime_type,
            pattern,
            variables,
        })
    }
}

/// Compile a URI template into an anchored regex and its variable names.
fn compile_uri_template(template: &str) -> Result<(regex::Regex, Vec<String>)> {
    let mut pattern = String::from("^");
    let mut variables = Vec::new();

    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let is_reserved = chars.peek() == Some(&'+');
            if is_reserved {
                chars.next();
            }

            let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            if var_name.is_empty() {
                return Err(Error::composition(format!(
                    "URI template '{}' has an empty variable",
                    template
                )));
            }
            if variables.contains(&var_name) {
                return Err(Error::composition(format!(
                    "URI template '{}' repeats variable '{}'",
                    template, var_name
                )));
            }
            variables.push(var_name);

            if is_reserved {
                pattern.push_str("(.+)");
            } else {
                pattern.push_str("([^/]+)");
            }
        } else {
            pattern.push_str(&regex::escape(&c.to_string()));
        }
    }

    pattern.push('$');

    let regex = regex::Regex::new(&pattern).map_err(|e| {
        Error::composition(format!("Invalid URI template '{}': {}", template, e))
    })?;

    Ok((regex, variables))
}
