// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deferred loader registry
//!
//! Bindings are named, level-tagged lazy loaders. A query that references a
//! binding's name materializes it first. On scope exit the registry decides,
//! per binding, whether its data has to be replayed into the reinstated
//! document, whether it is dropped, or whether it stays registered.

pub mod matcher;

pub use matcher::NameMatcher;

use crate::context::{ContextResult, JsonContext};
use async_trait::async_trait;
use rustc_hash::FxHashSet;
use std::fmt;

/// Error type returned by loaders
pub type LoaderError = anyhow::Error;

/// Produces context data on demand.
///
/// `load_data` may be called more than once: after a scope rewind the
/// registry replays loaders whose data was discarded with the scope.
#[async_trait]
pub trait Loader: Send {
    /// Whether `load_data` has completed at least once
    fn has_loaded(&self) -> bool;

    /// Load the data and add it to `ctx`
    async fn load_data(&mut self, ctx: &mut JsonContext) -> Result<(), LoaderError>;
}

/// A loader bound to the name it provides
pub struct DeferredLoader {
    name: String,
    matcher: NameMatcher,
    loader: Box<dyn Loader>,
}

impl DeferredLoader {
    /// Bind `loader` to `name`
    pub fn new(name: impl Into<String>, loader: impl Loader + 'static) -> ContextResult<Self> {
        Self::from_boxed(name, Box::new(loader))
    }

    /// Bind an already boxed loader to `name`
    pub fn from_boxed(name: impl Into<String>, loader: Box<dyn Loader>) -> ContextResult<Self> {
        let name = name.into();
        let matcher = NameMatcher::new(&name)?;
        Ok(Self {
            name,
            matcher,
            loader,
        })
    }

    /// Name of the binding
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for DeferredLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredLoader")
            .field("name", &self.name)
            .field("loaded", &self.loader.has_loaded())
            .finish()
    }
}

struct Binding {
    id: u64,
    level: usize,
    name: String,
    matcher: NameMatcher,
    // None while the loader runs
    loader: Option<Box<dyn Loader>>,
}

/// What a rewind has to do once the document has been reverted
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct RewindPlan {
    /// Bindings to load again, oldest first
    pub replay: Vec<u64>,
    /// Bindings to drop once the replays are done
    pub retire: Vec<u64>,
    /// Number of bindings dropped with the discarded scopes
    pub discarded: usize,
}

/// Ordered registry of deferred bindings
#[derive(Default)]
pub(crate) struct DeferredLoaders {
    bindings: Vec<Binding>,
    next_id: u64,
    in_flight: Vec<u64>,
}

impl DeferredLoaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding at `level`, returning its id
    pub fn add(&mut self, loader: DeferredLoader, level: usize) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.bindings.push(Binding {
            id,
            level,
            name: loader.name,
            matcher: loader.matcher,
            loader: Some(loader.loader),
        });
        id
    }

    /// Oldest binding that has to run before `path` can be evaluated.
    ///
    /// While a loader is in flight only bindings registered before it are
    /// considered, so a binding never depends on one that shadows it later.
    pub fn next_match(&self, path: &str, level: usize, attempted: &FxHashSet<u64>) -> Option<u64> {
        let horizon = self.in_flight.last().copied().unwrap_or(u64::MAX);
        self.bindings
            .iter()
            .take_while(|binding| binding.id < horizon)
            .find(|binding| {
                binding.level <= level
                    && !attempted.contains(&binding.id)
                    && binding
                        .loader
                        .as_ref()
                        .is_some_and(|loader| !loader.has_loaded())
                    && binding.matcher.matches(path)
            })
            .map(|binding| binding.id)
    }

    /// Take the loader of `id` out of the registry and mark it in flight
    pub fn begin(&mut self, id: u64) -> Option<(String, Box<dyn Loader>)> {
        let binding = self.bindings.iter_mut().find(|binding| binding.id == id)?;
        let loader = binding.loader.take()?;
        self.in_flight.push(id);
        Some((binding.name.clone(), loader))
    }

    /// Put the loader of `id` back after it ran
    pub fn finish(&mut self, id: u64, loader: Box<dyn Loader>) {
        if let Some(position) = self.in_flight.iter().rposition(|current| *current == id) {
            self.in_flight.remove(position);
        }
        if let Some(binding) = self.bindings.iter_mut().find(|binding| binding.id == id) {
            binding.loader = Some(loader);
        }
    }

    /// Reconcile the registry with a document rewound to `target`.
    ///
    /// Bindings from discarded scopes are removed immediately. The returned
    /// plan lists loaded bindings to replay in registration order and the
    /// bindings to retire after the replays.
    pub fn plan_rewind(&mut self, finalize: bool, target: usize) -> RewindPlan {
        let mut plan = RewindPlan::default();
        let mut discard = FxHashSet::default();

        for binding in self.bindings.iter().rev() {
            if binding.level > target {
                discard.insert(binding.id);
                continue;
            }
            let loaded = binding
                .loader
                .as_ref()
                .is_some_and(|loader| loader.has_loaded());
            if loaded {
                plan.replay.push(binding.id);
                if binding.level == target {
                    plan.retire.push(binding.id);
                }
            } else if !finalize && binding.level == target {
                plan.retire.push(binding.id);
            }
        }

        if !discard.is_empty() {
            self.bindings.retain(|binding| !discard.contains(&binding.id));
        }
        plan.discarded = discard.len();
        plan.replay.reverse();
        plan
    }

    /// Drop the given bindings
    pub fn retire(&mut self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        let ids: FxHashSet<u64> = ids.iter().copied().collect();
        self.bindings.retain(|binding| !ids.contains(&binding.id));
    }

    /// Name of the binding `id`
    pub fn name_of(&self, id: u64) -> Option<&str> {
        self.bindings
            .iter()
            .find(|binding| binding.id == id)
            .map(|binding| binding.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}
