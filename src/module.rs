//! Composition roots.
//!
//! A [`Module`] groups providers and free-standing capabilities. A server is
//! built from one root module; only what is reachable from that root through
//! [`Module::import`] is discovered. Two servers built from different roots
//! never see each other's capabilities, even if both import a shared module:
//! each gets its own copy of the capabilities and its own provider instances.
//!
//! ```rust
//! use mcp_host::{Module, ProviderDef, ToolBuilder, ToolError};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Clock;
//!
//! let clock = ProviderDef::value(Clock).public().raw_tool(
//!     ToolBuilder::new("now"),
//!     |_clock: Arc<Clock>, _ctx, _args: Value| async move { Ok::<_, ToolError>("12:00") },
//! );
//!
//! let shared = Module::new("time").provider(clock);
//! let root = Module::new("app").import(shared);
//! assert_eq!(root.name(), "app");
//! ```

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::prompt::Prompt;
use crate::provider::{ProviderDef, ProviderEntry, ProviderKey};
use crate::resource::{Resource, ResourceTemplate};
use crate::tool::Tool;

/// A named group of providers, capabilities, and imported modules.
#[derive(Clone)]
pub struct Module {
    name: String,
    providers: Vec<ProviderEntry>,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    templates: Vec<ResourceTemplate>,
    prompts: Vec<Prompt>,
    imports: Vec<Module>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            tools: Vec::new(),
            resources: Vec::new(),
            templates: Vec::new(),
            prompts: Vec::new(),
            imports: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a provider together with the capabilities it backs.
    pub fn provider<P: Send + Sync + 'static>(mut self, def: ProviderDef<P>) -> Self {
        self.providers.push(def.into_entry());
        self
    }

    /// Add a closure-backed tool
    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn resource_template(mut self, template: ResourceTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Make another module's providers and capabilities part of this one.
    pub fn import(mut self, module: Module) -> Self {
        self.imports.push(module);
        self
    }

    /// Walk this module and its imports, depth first, root first.
    ///
    /// A module reachable along several paths is visited once (by name).
    /// Within a module, provider-backed capabilities come first in provider
    /// order, then free-standing ones in insertion order.
    pub(crate) fn discover(&self) -> Result<Discovery> {
        let mut discovery = Discovery::default();
        let mut visited = HashSet::new();
        self.visit(&mut visited, &mut discovery)?;
        discovery.check_unique()?;
        Ok(discovery)
    }

    fn visit(&self, visited: &mut HashSet<String>, out: &mut Discovery) -> Result<()> {
        if !visited.insert(self.name.clone()) {
            return Ok(());
        }
        tracing::debug!(module = %self.name, "Discovering module");

        for entry in &self.providers {
            if let Some(error) = entry.errors.first() {
                return Err(Error::composition(format!(
                    "module {}: provider {}: {}",
                    self.name,
                    entry.key.type_name(),
                    error
                )));
            }
            if let Some(owner) = out.provider_owners.get(&entry.key) {
                return Err(Error::composition(format!(
                    "provider {} is declared by both module {} and module {}",
                    entry.key.type_name(),
                    owner,
                    self.name
                )));
            }
            out.provider_owners.insert(entry.key, self.name.clone());
            out.tools.extend(entry.tools.iter().cloned());
            out.resources.extend(entry.resources.iter().cloned());
            out.templates.extend(entry.templates.iter().cloned());
            out.prompts.extend(entry.prompts.iter().cloned());
            out.providers.push(entry.clone());
        }

        out.tools.extend(self.tools.iter().cloned());
        out.resources.extend(self.resources.iter().cloned());
        out.templates.extend(self.templates.iter().cloned());
        out.prompts.extend(self.prompts.iter().cloned());

        for import in &self.imports {
            import.visit(visited, out)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field(
                "providers",
                &self
                    .providers
                    .iter()
                    .map(|p| p.key.type_name())
                    .collect::<Vec<_>>(),
            )
            .field("tools", &self.tools.len())
            .field("resources", &self.resources.len())
            .field("templates", &self.templates.len())
            .field("prompts", &self.prompts.len())
            .field(
                "imports",
                &self.imports.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Everything reachable from a root module, in discovery order.
#[derive(Default)]
pub(crate) struct Discovery {
    pub(crate) providers: Vec<ProviderEntry>,
    pub(crate) tools: Vec<Tool>,
    pub(crate) resources: Vec<Resource>,
    pub(crate) templates: Vec<ResourceTemplate>,
    pub(crate) prompts: Vec<Prompt>,
    pub(crate) provider_owners: HashMap<ProviderKey, String>,
}

impl Discovery {
    fn check_unique(&self) -> Result<()> {
        unique("tool", self.tools.iter().map(|t| t.name()))?;
        unique("resource", self.resources.iter().map(|r| r.uri()))?;
        unique(
            "resource template",
            self.templates.iter().map(|t| t.uri_template()),
        )?;
        unique("prompt", self.prompts.iter().map(|p| p.name()))?;
        Ok(())
    }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::composition(format!(
                "{} '{}' is declared more than once",
                kind, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::error::{BoxError, ToolError};
    use crate::tool::ToolBuilder;

    struct Weather;
    struct Billing;

    fn echo(name: &str) -> Tool {
        ToolBuilder::new(name)
            .raw_handler(|_ctx, args: Value| async move { Ok::<_, ToolError>(args) })
            .build()
            .unwrap()
    }

    fn weather() -> ProviderDef<Weather> {
        ProviderDef::singleton(|_| async { Ok::<_, BoxError>(Weather) }).raw_tool(
            ToolBuilder::new("forecast"),
            |_w: Arc<Weather>, _ctx, _args: Value| async move { Ok::<_, ToolError>("sunny") },
        )
    }

    #[test]
    fn test_discovery_order_root_first() {
        let shared = Module::new("shared").tool(echo("b"));
        let root = Module::new("root")
            .provider(weather())
            .tool(echo("a"))
            .import(shared);

        let found = root.discover().unwrap();
        let names: Vec<_> = found.tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["forecast", "a", "b"]);
        assert_eq!(found.providers.len(), 1);
        assert_eq!(found.tools[0].core().meta().provider, Some(std::any::type_name::<Weather>()));
    }

    #[test]
    fn test_shared_module_visited_once() {
        let shared = Module::new("shared").tool(echo("ping"));
        let left = Module::new("left").import(shared.clone());
        let right = Module::new("right").import(shared);
        let root = Module::new("root").import(left).import(right);

        let found = root.discover().unwrap();
        assert_eq!(found.tools.len(), 1);
    }

    #[test]
    fn test_unimported_module_not_discovered() {
        let _other = Module::new("other").tool(echo("hidden"));
        let root = Module::new("root").tool(echo("visible"));
        let found = root.discover().unwrap();
        assert!(found.tools.iter().all(|t| t.name() != "hidden"));
    }

    #[test]
    fn test_duplicate_tool_name_is_composition_error() {
        let root = Module::new("root")
            .tool(echo("dup"))
            .import(Module::new("child").tool(echo("dup")));
        let err = root.discover().err().unwrap();
        assert!(err.to_string().contains("dup"));
    }

    #[test]
    fn test_duplicate_provider_is_composition_error() {
        let billing = || ProviderDef::singleton(|_| async { Ok::<_, BoxError>(Billing) });
        let root = Module::new("root")
            .provider(billing())
            .import(Module::new("child").provider(billing()));
        let err = root.discover().err().unwrap();
        assert!(err.to_string().contains("Billing"));
    }

    #[test]
    fn test_builder_error_surfaces_at_discovery() {
        let broken = ProviderDef::singleton(|_| async { Ok::<_, BoxError>(Billing) }).raw_tool(
            ToolBuilder::new("bad name"),
            |_b: Arc<Billing>, _ctx, _args: Value| async move { Ok::<_, ToolError>("x") },
        );
        let err = Module::new("root").provider(broken).discover().err().unwrap();
        assert!(matches!(err, Error::Composition(_)));
    }
}
