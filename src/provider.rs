//! Providers and the per-server instance container.
//!
//! A provider is a type whose instances back provider-bound capabilities.
//! Each provider declares a [`Lifetime`]:
//!
//! - [`Lifetime::Singleton`]: one instance per server, created at bootstrap.
//! - [`Lifetime::Request`]: one instance per request, created on first use
//!   inside that request and dropped with it.
//!
//! Factories receive a [`Resolver`] for their declared dependencies.
//!
//! ```rust
//! use std::sync::Arc;
//! use mcp_host::{BoxError, ProviderDef, Resolver};
//!
//! struct Db;
//! struct Repo { db: Arc<Db> }
//!
//! let db = ProviderDef::singleton(|_: Resolver| async { Ok::<_, BoxError>(Db) });
//! let repo = ProviderDef::per_request(|r: Resolver| async move {
//!     Ok::<_, BoxError>(Repo { db: r.get::<Db>().await? })
//! })
//! .depends_on::<Db>();
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::authz::AccessPolicy;
use crate::capability::{raw_provider, typed_provider};
use crate::context::RequestContext;
use crate::error::{BoxError, Error, Result, ToolError};
use crate::guard::GuardRef;
use crate::prompt::{Prompt, PromptBuilder};
use crate::resource::{Resource, ResourceBuilder, ResourceTemplate, ResourceTemplateBuilder};
use crate::tool::{Tool, ToolBuilder};

/// A type-erased provider instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// How long a provider instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    Singleton,
    Request,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Singleton => write!(f, "singleton"),
            Lifetime::Request => write!(f, "request"),
        }
    }
}

/// Identifies a provider by its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ProviderKey {
    pub fn of<P: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            type_name: type_name::<P>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

type FactoryFuture = BoxFuture<'static, std::result::Result<Instance, BoxError>>;
type Factory = Arc<dyn Fn(Resolver) -> FactoryFuture + Send + Sync>;

/// Declaration of a provider of type `P`, with the capabilities it backs.
pub struct ProviderDef<P> {
    lifetime: Lifetime,
    factory: Factory,
    dependencies: Vec<ProviderKey>,
    policy: AccessPolicy,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    templates: Vec<ResourceTemplate>,
    prompts: Vec<Prompt>,
    errors: Vec<String>,
    _provider: PhantomData<fn() -> P>,
}

impl<P: Send + Sync + 'static> ProviderDef<P> {
    fn with_factory<F, Fut, E>(lifetime: Lifetime, factory: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<P, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let erased: Factory = Arc::new(move |resolver: Resolver| -> FactoryFuture {
            let fut = factory(resolver);
            Box::pin(async move {
                let instance = fut.await.map_err(Into::into)?;
                Ok(Arc::new(instance) as Instance)
            })
        });
        Self {
            lifetime,
            factory: erased,
            dependencies: Vec::new(),
            policy: AccessPolicy::default(),
            tools: Vec::new(),
            resources: Vec::new(),
            templates: Vec::new(),
            prompts: Vec::new(),
            errors: Vec::new(),
            _provider: PhantomData,
        }
    }

    /// One instance per server, built at bootstrap.
    pub fn singleton<F, Fut, E>(factory: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<P, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_factory(Lifetime::Singleton, factory)
    }

    /// Singleton wrapping an already-built value.
    pub fn value(instance: P) -> Self
    where
        P: Clone,
    {
        Self::singleton(move |_| {
            let instance = instance.clone();
            async move { Ok::<_, BoxError>(instance) }
        })
    }

    /// One instance per request, built on first use within the request.
    pub fn per_request<F, Fut, E>(factory: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<P, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_factory(Lifetime::Request, factory)
    }

    /// Declare a dependency resolved by the factory. Checked at bootstrap.
    pub fn depends_on<D: 'static>(mut self) -> Self {
        self.dependencies.push(ProviderKey::of::<D>());
        self
    }

    /// Make every capability of this provider public.
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

    /// Guard applied to every capability of this provider, ahead of
    /// capability-level guards.
    pub fn guard(mut self, guard: GuardRef) -> Self {
        self.policy = self.policy.guard(guard);
        self
    }

    /// Add a tool backed by a method of `P`.
    pub fn tool<I, F, Fut, R, E>(mut self, builder: ToolBuilder, handler: F) -> Self
    where
        I: schemars::JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(Arc<P>, RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        let built = builder.bind_typed::<I>(typed_provider::<P, I, F, Fut, R, E>(handler));
        match built {
            Ok(item) => self.tools.push(item),
            Err(err) => self.errors.push(err.to_string()),
        }
        self
    }

    /// Add a tool backed by a method of `P` taking raw JSON arguments.
    ///
    /// The input schema comes from [`ToolBuilder::parameters`], if set.
    pub fn raw_tool<F, Fut, R, E>(mut self, builder: ToolBuilder, handler: F) -> Self
    where
        F: Fn(Arc<P>, RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        let built = builder.bind(raw_provider::<P, F, Fut, R, E>(handler));
        match built {
            Ok(item) => self.tools.push(item),
            Err(err) => self.errors.push(err.to_string()),
        }
        self
    }

    /// Add a resource backed by a method of `P`.
    pub fn resource<F, Fut, R, E>(mut self, builder: ResourceBuilder, handler: F) -> Self
    where
        F: Fn(Arc<P>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        let binding = raw_provider::<P, _, _, _, _>(move |provider: Arc<P>, ctx, _args| {
            handler(provider, ctx)
        });
        let built = builder.bind(binding);
        match built {
            Ok(item) => self.resources.push(item),
            Err(err) => self.errors.push(err.to_string()),
        }
        self
    }

    /// Add a resource template backed by a method of `P`. The handler
    /// receives the URI variables deserialized as `I`.
    pub fn resource_template<I, F, Fut, R, E>(
        mut self,
        builder: ResourceTemplateBuilder,
        handler: F,
    ) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(Arc<P>, RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        let built = builder.bind(typed_provider::<P, I, F, Fut, R, E>(handler));
        match built {
            Ok(item) => self.templates.push(item),
            Err(err) => self.errors.push(err.to_string()),
        }
        self
    }

    /// Add a prompt backed by a method of `P`.
    pub fn prompt<I, F, Fut, R, E>(mut self, builder: PromptBuilder, handler: F) -> Self
    where
        I: schemars::JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(Arc<P>, RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<ToolError>,
    {
        let built = builder.bind_typed::<I>(typed_provider::<P, I, F, Fut, R, E>(handler));
        match built {
            Ok(item) => self.prompts.push(item),
            Err(err) => self.errors.push(err.to_string()),
        }
        self
    }

    pub(crate) fn into_entry(self) -> ProviderEntry {
        let key = ProviderKey::of::<P>();
        let mut entry = ProviderEntry {
            key,
            lifetime: self.lifetime,
            factory: self.factory,
            dependencies: self.dependencies,
            tools: self.tools,
            resources: self.resources,
            templates: self.templates,
            prompts: self.prompts,
            errors: self.errors,
        };
        let name = key.type_name();
        for tool in &mut entry.tools {
            tool.core.adopt_provider(name, &self.policy);
        }
        for resource in &mut entry.resources {
            resource.core.adopt_provider(name, &self.policy);
        }
        for template in &mut entry.templates {
            template.core.adopt_provider(name, &self.policy);
        }
        for prompt in &mut entry.prompts {
            prompt.core.adopt_provider(name, &self.policy);
        }
        entry
    }
}

/// Type-erased provider declaration, as collected by modules.
#[derive(Clone)]
pub(crate) struct ProviderEntry {
    pub(crate) key: ProviderKey,
    pub(crate) lifetime: Lifetime,
    pub(crate) factory: Factory,
    pub(crate) dependencies: Vec<ProviderKey>,
    pub(crate) tools: Vec<Tool>,
    pub(crate) resources: Vec<Resource>,
    pub(crate) templates: Vec<ResourceTemplate>,
    pub(crate) prompts: Vec<Prompt>,
    pub(crate) errors: Vec<String>,
}

struct Slot {
    lifetime: Lifetime,
    factory: Factory,
    dependencies: Arc<[ProviderKey]>,
    singleton: OnceCell<Instance>,
}

/// Per-server provider instances.
///
/// Each server owns exactly one container, so singletons are never shared
/// between servers even when they are built from the same module.
#[derive(Clone)]
pub struct Container {
    slots: Arc<HashMap<ProviderKey, Slot>>,
}

impl Container {
    /// Verify the provider graph and build the container.
    ///
    /// Fails on a missing dependency, a singleton depending on a
    /// request-lifetime provider, or a dependency cycle.
    pub(crate) fn new(entries: &[ProviderEntry]) -> Result<Self> {
        let by_key: HashMap<ProviderKey, &ProviderEntry> =
            entries.iter().map(|e| (e.key, e)).collect();

        for entry in entries {
            for dep in &entry.dependencies {
                let Some(target) = by_key.get(dep) else {
                    return Err(Error::composition(format!(
                        "provider {} depends on {}, which is not provided",
                        entry.key.type_name(),
                        dep.type_name()
                    )));
                };
                if entry.lifetime == Lifetime::Singleton && target.lifetime == Lifetime::Request {
                    return Err(Error::composition(format!(
                        "singleton provider {} cannot depend on request-lifetime provider {}",
                        entry.key.type_name(),
                        dep.type_name()
                    )));
                }
            }
        }

        detect_cycles(entries, &by_key)?;

        let slots = entries
            .iter()
            .map(|e| {
                (
                    e.key,
                    Slot {
                        lifetime: e.lifetime,
                        factory: e.factory.clone(),
                        dependencies: e.dependencies.clone().into(),
                        singleton: OnceCell::new(),
                    },
                )
            })
            .collect();
        Ok(Self {
            slots: Arc::new(slots),
        })
    }

    /// Build every singleton now, so construction failures surface at
    /// bootstrap instead of on first use.
    pub(crate) async fn instantiate_singletons(&self) -> Result<()> {
        for (key, slot) in self.slots.iter() {
            if slot.lifetime != Lifetime::Singleton {
                continue;
            }
            self.resolve_in(*key, None).await.map_err(|e| {
                Error::composition(format!(
                    "failed to construct provider {}: {}",
                    key.type_name(),
                    e
                ))
            })?;
            tracing::debug!(provider = key.type_name(), "Singleton provider ready");
        }
        Ok(())
    }

    pub fn lifetime(&self, key: ProviderKey) -> Option<Lifetime> {
        self.slots.get(&key).map(|s| s.lifetime)
    }

    pub fn contains(&self, key: ProviderKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Resolve the instance bound to `key` for the request owning `scope`.
    pub async fn resolve(
        &self,
        key: ProviderKey,
        scope: &RequestScope,
    ) -> std::result::Result<Instance, BoxError> {
        self.resolve_in(key, Some(scope)).await
    }

    async fn resolve_in(
        &self,
        key: ProviderKey,
        scope: Option<&RequestScope>,
    ) -> std::result::Result<Instance, BoxError> {
        let Some(slot) = self.slots.get(&key) else {
            return Err(format!("provider {} is not registered", key.type_name()).into());
        };

        match slot.lifetime {
            Lifetime::Singleton => {
                let resolver = Resolver {
                    container: self.clone(),
                    owner: key,
                    dependencies: slot.dependencies.clone(),
                    scope: None,
                };
                slot.singleton
                    .get_or_try_init(|| (slot.factory)(resolver))
                    .await
                    .cloned()
            }
            Lifetime::Request => {
                let Some(scope) = scope else {
                    return Err(format!(
                        "request-lifetime provider {} cannot be resolved outside a request",
                        key.type_name()
                    )
                    .into());
                };
                let cell = scope.cell(key);
                let resolver = Resolver {
                    container: self.clone(),
                    owner: key,
                    dependencies: slot.dependencies.clone(),
                    scope: Some(scope.clone()),
                };
                cell.get_or_try_init(|| (slot.factory)(resolver))
                    .await
                    .cloned()
            }
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field(
                "providers",
                &self.slots.keys().map(|k| k.type_name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn detect_cycles(entries: &[ProviderEntry], by_key: &HashMap<ProviderKey, &ProviderEntry>) -> Result<()> {
    fn visit(
        key: ProviderKey,
        by_key: &HashMap<ProviderKey, &ProviderEntry>,
        done: &mut HashSet<ProviderKey>,
        path: &mut Vec<ProviderKey>,
    ) -> Result<()> {
        if done.contains(&key) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|k| *k == key) {
            let cycle: Vec<&str> = path[start..]
                .iter()
                .chain(std::iter::once(&key))
                .map(|k| k.type_name())
                .collect();
            return Err(Error::composition(format!(
                "provider dependency cycle: {}",
                cycle.join(" -> ")
            )));
        }
        path.push(key);
        if let Some(entry) = by_key.get(&key) {
            for dep in &entry.dependencies {
                visit(*dep, by_key, done, path)?;
            }
        }
        path.pop();
        done.insert(key);
        Ok(())
    }

    let mut done = HashSet::new();
    for entry in entries {
        visit(entry.key, by_key, &mut done, &mut Vec::new())?;
    }
    Ok(())
}

/// Instances created for a single request.
///
/// Cloned into the request's context; the instances are dropped when the
/// last clone goes away.
#[derive(Clone, Default)]
pub struct RequestScope {
    cells: Arc<Mutex<HashMap<ProviderKey, Arc<OnceCell<Instance>>>>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: ProviderKey) -> Arc<OnceCell<Instance>> {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.entry(key).or_default().clone()
    }

    /// Number of request-lifetime instances created so far
    pub fn len(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.values().filter(|c| c.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("instances", &self.len())
            .finish()
    }
}

/// Handle given to provider factories for resolving their dependencies.
///
/// Only dependencies declared with [`ProviderDef::depends_on`] resolve, so
/// every edge a factory can follow was checked when the server was built.
#[derive(Clone)]
pub struct Resolver {
    container: Container,
    owner: ProviderKey,
    dependencies: Arc<[ProviderKey]>,
    scope: Option<RequestScope>,
}

impl Resolver {
    /// Resolve a declared dependency of type `D`.
    pub async fn get<D: Send + Sync + 'static>(&self) -> std::result::Result<Arc<D>, BoxError> {
        let key = ProviderKey::of::<D>();
        if !self.dependencies.contains(&key) {
            return Err(format!(
                "provider {} resolved {} without declaring it; add .depends_on::<{}>()",
                self.owner.type_name(),
                key.type_name(),
                key.type_name()
            )
            .into());
        }
        let instance = self.container.resolve_in(key, self.scope.as_ref()).await?;
        instance
            .downcast::<D>()
            .map_err(|_| format!("provider {} resolved to a different type", key.type_name()).into())
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("owner", &self.owner.type_name())
            .field("in_request", &self.scope.is_some())
            .finish()
    }
}
