//! Resource abstraction layer
//!
//! Every resource type the engine can nuke is a [`ResourceType`]. Concrete
//! types are built from a [`Resource`] descriptor which binds together a
//! scoped client factory, a lister, a [`DeletionStrategy`] and the optional
//! capabilities (permission verifier, first-seen tagging).
//!
//! # Module Structure
//!
//! - [`strategy`] - Deletion strategies shared by all resource types
//! - [`registry`] - Ordered list of resource type constructors
//!
//! # Example
//!
//! ```ignore
//! let disks = Resource::new("compute-disks", factory, lister, DeletionStrategy::simple_batch(delete))
//!     .batch_size(20)
//!     .with_permission_verifier(verify);
//! ```

pub mod registry;
pub mod strategy;

pub use registry::{Registry, ResourceConstructor};
pub use strategy::{DeletionStrategy, NukeOutcome, NukeResult, Step};

use crate::config::NukeConfig;
use crate::error::NukeError;
use crate::filter::{FilterRule, ResourceValue};
use crate::first_seen::{get_or_create_first_seen, TagWriter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Region name used for the synthetic project-wide partition
pub const GLOBAL_REGION: &str = "global";

/// Batch size used when a resource type does not pick its own
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Logical partition a resource type is evaluated in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub region: String,
    pub is_global: bool,
}

impl Scope {
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            is_global: false,
        }
    }

    pub fn global() -> Self {
        Self {
            region: GLOBAL_REGION.to_string(),
            is_global: true,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.region)
    }
}

/// Everything a provider call needs: the scoped client, where it runs, and
/// the run's cancellation token
#[derive(Clone)]
pub struct CallContext<C> {
    pub client: C,
    pub scope: Scope,
    pub type_name: String,
    pub cancel: CancellationToken,
}

/// A resource enumerated by a lister, not yet filtered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    /// Handle passed to the nuker
    pub identifier: String,
    pub name: Option<String>,
    /// Native creation time, if the provider exposes one
    pub time: Option<DateTime<Utc>>,
    pub tags: HashMap<String, String>,
}

impl Candidate {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            name: Some(identifier.clone()),
            identifier,
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn created_at(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.time = time;
        self
    }

    pub fn tagged(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Filter input for this candidate, with `time` standing in for a
    /// missing creation time
    pub fn to_value(&self, time: Option<DateTime<Utc>>) -> ResourceValue {
        ResourceValue::new(self.name.clone(), self.time.or(time), self.tags.clone())
    }
}

/// Uniform contract the engine drives every resource type through
#[async_trait]
pub trait ResourceType: Send + Sync {
    fn type_name(&self) -> &str;

    /// Global types are evaluated once per run, in the global scope
    fn is_global(&self) -> bool;

    fn batch_size(&self) -> usize;

    /// Scope set by [`ResourceType::init`]
    fn scope(&self) -> Option<&Scope>;

    fn filter_rule(&self, config: &NukeConfig) -> FilterRule;

    /// Build the scoped client. Must be called exactly once, before anything
    /// else that talks to the provider.
    async fn init(&self, scope: Scope, cancel: CancellationToken) -> Result<(), NukeError>;

    /// Page through every candidate in the scope
    async fn list(&self, filter: Arc<FilterRule>) -> Result<Vec<Candidate>, NukeError>;

    /// Dry-run the delete for one identifier, `None` if the type has no verifier
    async fn verify_permission(&self, identifier: &str) -> Option<Result<(), NukeError>>;

    /// First-seen time for a candidate without a native timestamp, `None` if
    /// the type does not use first-seen tagging or the candidate has a time
    async fn first_seen(&self, candidate: &Candidate) -> Option<Result<DateTime<Utc>, NukeError>>;

    async fn nuke(&self, identifiers: &[String]) -> NukeOutcome;
}

type ClientFactory<C> =
    Arc<dyn Fn(Scope) -> BoxFuture<'static, anyhow::Result<C>> + Send + Sync>;

type Lister<C> = Arc<
    dyn Fn(CallContext<C>, Arc<FilterRule>) -> BoxFuture<'static, anyhow::Result<Vec<Candidate>>>
        + Send
        + Sync,
>;

type PermissionVerifier<C> = strategy::DeleteFn<C>;

type TagWriteFn<C> = Arc<
    dyn Fn(CallContext<C>, String, HashMap<String, String>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

type ConfigGetter = Arc<dyn Fn(&NukeConfig) -> FilterRule + Send + Sync>;

/// Resource descriptor, generic over the per-type client handle `C`
pub struct Resource<C> {
    type_name: String,
    batch_size: usize,
    is_global: bool,
    client_factory: ClientFactory<C>,
    lister: Lister<C>,
    strategy: DeletionStrategy<C>,
    permission_verifier: Option<PermissionVerifier<C>>,
    tag_writer: Option<TagWriteFn<C>>,
    config_getter: Option<ConfigGetter>,
    context: OnceLock<CallContext<C>>,
}

impl<C> Resource<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new<F, FFut, L, LFut>(
        type_name: impl Into<String>,
        client_factory: F,
        lister: L,
        strategy: DeletionStrategy<C>,
    ) -> Self
    where
        F: Fn(Scope) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = anyhow::Result<C>> + Send + 'static,
        L: Fn(CallContext<C>, Arc<FilterRule>) -> LFut + Send + Sync + 'static,
        LFut: Future<Output = anyhow::Result<Vec<Candidate>>> + Send + 'static,
    {
        Self {
            type_name: type_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            is_global: false,
            client_factory: Arc::new(move |scope| Box::pin(client_factory(scope))),
            lister: Arc::new(move |ctx, filter| Box::pin(lister(ctx, filter))),
            strategy,
            permission_verifier: None,
            tag_writer: None,
            config_getter: None,
            context: OnceLock::new(),
        }
    }

    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_permission_verifier<V, VFut>(mut self, verifier: V) -> Self
    where
        V: Fn(CallContext<C>, String) -> VFut + Send + Sync + 'static,
        VFut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.permission_verifier = Some(strategy::delete_fn(verifier));
        self
    }

    /// Enable first-seen tagging; `writer` persists the full tag set
    pub fn with_first_seen<W, WFut>(mut self, writer: W) -> Self
    where
        W: Fn(CallContext<C>, String, HashMap<String, String>) -> WFut + Send + Sync + 'static,
        WFut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tag_writer = Some(Arc::new(move |ctx, id, tags| Box::pin(writer(ctx, id, tags))));
        self
    }

    pub fn with_config_getter<G>(mut self, getter: G) -> Self
    where
        G: Fn(&NukeConfig) -> FilterRule + Send + Sync + 'static,
    {
        self.config_getter = Some(Arc::new(getter));
        self
    }

    fn context(&self) -> Result<&CallContext<C>, NukeError> {
        self.context.get().ok_or_else(|| {
            NukeError::Client(format!("{} used before initialization", self.type_name))
        })
    }
}

/// Adapts a resource's tag write closure to the first-seen manager
struct ScopedTagWriter<'a, C> {
    ctx: &'a CallContext<C>,
    write: &'a TagWriteFn<C>,
}

#[async_trait]
impl<C> TagWriter for ScopedTagWriter<'_, C>
where
    C: Clone + Send + Sync + 'static,
{
    async fn write_tags(
        &self,
        identifier: &str,
        tags: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        (self.write)(self.ctx.clone(), identifier.to_string(), tags.clone()).await
    }
}

#[async_trait]
impl<C> ResourceType for Resource<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn is_global(&self) -> bool {
        self.is_global
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn scope(&self) -> Option<&Scope> {
        self.context.get().map(|ctx| &ctx.scope)
    }

    fn filter_rule(&self, config: &NukeConfig) -> FilterRule {
        match &self.config_getter {
            Some(getter) => getter(config),
            None => config.filter_for(&self.type_name),
        }
    }

    async fn init(&self, scope: Scope, cancel: CancellationToken) -> Result<(), NukeError> {
        if self.context.get().is_some() {
            return Err(NukeError::Client(format!(
                "{} initialized twice",
                self.type_name
            )));
        }

        let client = (self.client_factory)(scope.clone())
            .await
            .map_err(|e| NukeError::Client(format!("{e:#}")))?;

        debug!(type_name = %self.type_name, region = %scope, "Initialized client");

        self.context
            .set(CallContext {
                client,
                scope,
                type_name: self.type_name.clone(),
                cancel,
            })
            .map_err(|_| NukeError::Client(format!("{} initialized twice", self.type_name)))
    }

    async fn list(&self, filter: Arc<FilterRule>) -> Result<Vec<Candidate>, NukeError> {
        let ctx = self.context()?;
        if ctx.cancel.is_cancelled() {
            return Err(NukeError::Cancelled);
        }
        (self.lister)(ctx.clone(), filter)
            .await
            .map_err(|e| NukeError::from_anyhow(&e))
    }

    async fn verify_permission(&self, identifier: &str) -> Option<Result<(), NukeError>> {
        let verifier = self.permission_verifier.as_ref()?;
        let ctx = match self.context() {
            Ok(ctx) => ctx,
            Err(e) => return Some(Err(e)),
        };
        Some(
            verifier(ctx.clone(), identifier.to_string())
                .await
                .map_err(|e| NukeError::from_anyhow(&e)),
        )
    }

    async fn first_seen(&self, candidate: &Candidate) -> Option<Result<DateTime<Utc>, NukeError>> {
        let write = self.tag_writer.as_ref()?;
        if candidate.time.is_some() {
            return None;
        }
        let ctx = match self.context() {
            Ok(ctx) => ctx,
            Err(e) => return Some(Err(e)),
        };
        let writer = ScopedTagWriter { ctx, write };
        Some(get_or_create_first_seen(&writer, &candidate.identifier, &candidate.tags).await)
    }

    async fn nuke(&self, identifiers: &[String]) -> NukeOutcome {
        match self.context() {
            Ok(ctx) => {
                self.strategy
                    .execute(ctx, self.batch_size, identifiers)
                    .await
            }
            Err(e) => NukeOutcome {
                results: identifiers
                    .iter()
                    .map(|id| NukeResult::failed(id.clone(), e.clone()))
                    .collect(),
                error: None,
            },
        }
    }
}
