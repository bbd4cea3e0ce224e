//! Registration, configuration and dispatch of tune points.
//!
//! Hooks are registered on a [`TuneEngineBuilder`] at process start, resolved
//! against a [`TuneConfig`] table, and frozen into an immutable [`TuneEngine`]
//! that is shared by reference with the reconciler.

use super::{plugins, ChainOutcome, TuneChain, TuneContext, TunePoint, TuneScope, TuneTrigger};
use crate::errors::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

static EMPTY_CHAIN: TuneChain = TuneChain::new();

/// Ordered hook names per scope and trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TuneConfig(BTreeMap<TuneScope, BTreeMap<TuneTrigger, Vec<String>>>);

impl Default for TuneConfig {
    /// Reports every finished task.
    fn default() -> Self {
        Self::empty().with_hooks(
            TuneScope::Task,
            TuneTrigger::AfterExec,
            [plugins::TASK_REPORT],
        )
    }
}

impl TuneConfig {
    /// Creates a table with no hooks.
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Appends hook names to a trigger.
    #[must_use]
    pub fn with_hooks<I, S>(mut self, scope: TuneScope, trigger: TuneTrigger, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(scope)
            .or_default()
            .entry(trigger)
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Hook names configured for a trigger.
    #[must_use]
    pub fn hooks(&self, scope: TuneScope, trigger: TuneTrigger) -> &[String] {
        self.0
            .get(&scope)
            .and_then(|triggers| triggers.get(&trigger))
            .map_or(&[][..], Vec::as_slice)
    }
}

/// Resolved chains: scope → trigger → chain.
#[derive(Debug, Clone, Default)]
pub struct TuneGroup {
    chains: HashMap<TuneScope, HashMap<TuneTrigger, TuneChain>>,
}

impl TuneGroup {
    /// Returns the chain for a trigger, empty when nothing is configured.
    #[must_use]
    pub fn chain(&self, scope: TuneScope, trigger: TuneTrigger) -> &TuneChain {
        self.chains
            .get(&scope)
            .and_then(|triggers| triggers.get(&trigger))
            .unwrap_or(&EMPTY_CHAIN)
    }
}

/// Collects tune point registrations.
#[derive(Default)]
pub struct TuneEngineBuilder {
    registry: HashMap<TuneScope, HashMap<String, Arc<dyn TunePoint>>>,
}

impl TuneEngineBuilder {
    /// Creates a builder with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with the built-in tune points registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        builder
            .registry
            .entry(TuneScope::Task)
            .or_default()
            .insert(plugins::TASK_REPORT.to_string(), Arc::new(plugins::TaskReport));
        builder
    }

    /// Registers a tune point under a scope.
    ///
    /// Registering the same name twice under one scope is a startup error.
    pub fn register(&mut self, scope: TuneScope, point: Arc<dyn TunePoint>) -> Result<()> {
        let name = point.name().to_string();
        let points = self.registry.entry(scope).or_default();
        if points.contains_key(&name) {
            return Err(ReconcileError::DuplicateTunePoint { scope, name });
        }
        debug!(%scope, tune_point = %name, "registered tune point");
        points.insert(name, point);
        Ok(())
    }

    /// Returns true if a name is registered under a scope.
    #[must_use]
    pub fn is_registered(&self, scope: TuneScope, name: &str) -> bool {
        self.registry
            .get(&scope)
            .is_some_and(|points| points.contains_key(name))
    }

    /// Resolves the configuration table into an engine.
    ///
    /// Every configured name must have been registered under its scope.
    pub fn build(self, config: &TuneConfig) -> Result<TuneEngine> {
        let mut group = TuneGroup::default();
        for (scope, triggers) in &config.0 {
            for (trigger, names) in triggers {
                let mut chain = TuneChain::new();
                for name in names {
                    let point = self
                        .registry
                        .get(scope)
                        .and_then(|points| points.get(name))
                        .ok_or_else(|| ReconcileError::UnknownTunePoint {
                            scope: *scope,
                            trigger: *trigger,
                            name: name.clone(),
                        })?;
                    chain.push(Arc::clone(point));
                }
                group
                    .chains
                    .entry(*scope)
                    .or_default()
                    .insert(*trigger, chain);
            }
        }
        Ok(TuneEngine { group: Some(group) })
    }
}

/// Immutable hook dispatcher.
#[derive(Debug, Clone)]
pub struct TuneEngine {
    group: Option<TuneGroup>,
}

impl TuneEngine {
    /// An initialized engine without any chains.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            group: Some(TuneGroup::default()),
        }
    }

    /// An engine that was never built; every dispatch fails.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self { group: None }
    }

    /// Returns true once the engine was built.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.group.is_some()
    }

    /// Returns the chain for a trigger.
    pub fn chain(&self, scope: TuneScope, trigger: TuneTrigger) -> Result<&TuneChain> {
        self.group
            .as_ref()
            .map(|group| group.chain(scope, trigger))
            .ok_or(ReconcileError::AopNotInitialized)
    }

    /// Runs the chain selected by the context's scope and trigger.
    ///
    /// Hook failures never surface here; only an uninitialized engine is an error.
    pub async fn handle(&self, ctx: &TuneContext) -> Result<()> {
        self.handle_with_outcome(ctx).await.map(|_| ())
    }

    /// Like [`TuneEngine::handle`], returning what each hook did.
    pub async fn handle_with_outcome(&self, ctx: &TuneContext) -> Result<ChainOutcome> {
        let chain = self.chain(ctx.scope, ctx.trigger)?;
        Ok(chain.handle(ctx).await)
    }
}
