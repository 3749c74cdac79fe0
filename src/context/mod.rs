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

//! Evaluation context
//!
//! [`JsonContext`] owns the document queried by policy expressions, the
//! checkpoint stack used to scope rule evaluation and the registry of
//! deferred loaders. Every query first materializes the deferred entries it
//! references.

pub mod config;
pub mod document;
pub mod error;
pub mod images;
pub mod path;
pub mod size;
mod writers;

pub use config::ContextConfig;
pub use document::Document;
pub use error::{ContextError, ContextResult};
pub use images::{ImageInfo, ImageInfos};
pub use path::{KeyPath, PathError, parse_key_path};
pub use size::SizeGuard;

use crate::deferred::{DeferredLoader, DeferredLoaders, Loader};
use crate::query::{JmesPath, QueryEngine};
use log::{debug, trace};
use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scoped JSON context with deferred loading
pub struct JsonContext {
    config: ContextConfig,
    engine: Arc<dyn QueryEngine>,
    document: Document,
    size: SizeGuard,
    deferred: DeferredLoaders,
    images: ImageInfos,
    deadline: Option<Instant>,
}

impl Default for JsonContext {
    fn default() -> Self {
        Self::new(Arc::new(JmesPath::new()), ContextConfig::default())
    }
}

impl fmt::Debug for JsonContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonContext")
            .field("level", &self.document.level())
            .field("deferred", &self.deferred.len())
            .field("size", &self.size.used())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl JsonContext {
    /// Create an empty context
    pub fn new(engine: Arc<dyn QueryEngine>, config: ContextConfig) -> Self {
        Self {
            size: SizeGuard::new(config.max_context_size),
            config,
            engine,
            document: Document::new(),
            deferred: DeferredLoaders::new(),
            images: ImageInfos::new(),
            deadline: None,
        }
    }

    /// Create a context seeded with an existing JSON object
    pub fn from_value(
        engine: Arc<dyn QueryEngine>,
        config: ContextConfig,
        value: Value,
    ) -> ContextResult<Self> {
        let mut context = Self::new(engine, config);
        context.add_json(value, false)?;
        Ok(context)
    }

    /// Set the instant after which deferred loads are abandoned
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace or clear the load deadline
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Configuration the context was built with
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// The current document
    pub fn data(&self) -> &Value {
        self.document.data()
    }

    /// Number of open scopes
    pub fn level(&self) -> usize {
        self.document.level()
    }

    /// Number of registered deferred bindings
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Bytes accounted against the size ceiling
    pub fn context_size(&self) -> usize {
        self.size.used()
    }

    /// Deep-merge a JSON object into the document
    pub fn add_json(&mut self, data: Value, overwrite: bool) -> ContextResult<()> {
        if !data.is_object() {
            return Err(ContextError::MergeConflict {
                path: String::new(),
                found: ContextError::json_kind(&data),
            });
        }
        let bytes = serialized_len("", &data)?;
        if !overwrite {
            self.document.check_merge(&[], &data, false)?;
        }
        self.reserve(bytes)?;
        self.document.merge_root(data, overwrite)
    }

    /// Merge a raw JSON payload at `name`
    pub fn add_context_entry(&mut self, name: &str, raw: &[u8]) -> ContextResult<()> {
        self.add_raw(name, raw, false)
    }

    /// Replace the value at `name` with a raw JSON payload
    pub fn replace_context_entry(&mut self, name: &str, raw: &[u8]) -> ContextResult<()> {
        self.add_raw(name, raw, true)
    }

    /// Merge a serializable value at the dotted `key`
    pub fn add_variable<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> ContextResult<()> {
        let value = serde_json::to_value(value).map_err(|source| ContextError::Marshal {
            name: key.to_string(),
            source,
        })?;
        let path = parse_key_path(key)?;
        let bytes = serialized_len(key, &value)?;
        self.add_at(key, &path, value, bytes, false)
    }

    /// Register a deferred loader at the current level
    pub fn add_deferred_loader(&mut self, loader: DeferredLoader) {
        let level = self.document.level();
        debug!(target: self.config.log_target.as_str(), "registering deferred loader {} at level {level}", loader.name());
        self.deferred.add(loader, level);
    }

    /// Evaluate `query` against the document.
    ///
    /// Deferred bindings referenced by the query are loaded first.
    pub async fn query(&mut self, query: &str) -> ContextResult<Value> {
        self.load_deferred(query).await?;
        Ok(self.engine.search(query, self.document.data())?)
    }

    /// Like [`JsonContext::query`] but a missing key yields `null`
    pub async fn query_or_null(&mut self, query: &str) -> ContextResult<Value> {
        match self.query(query).await {
            Err(err) if err.is_not_found() => Ok(Value::Null),
            other => other,
        }
    }

    /// Evaluate `query` against arbitrary data with the context's engine
    pub fn search(&self, query: &str, data: &Value) -> ContextResult<Value> {
        Ok(self.engine.search(query, data)?)
    }

    /// Whether `path` evaluates differently on the new and old resource.
    ///
    /// Both resources must be present. A path missing on either side counts
    /// as `null`.
    pub async fn has_changed(&mut self, path: &str) -> ContextResult<bool> {
        self.query("request.object").await?;
        self.query("request.oldObject").await?;
        let current = self.query_or_null(&format!("request.object.{path}")).await?;
        let previous = self
            .query_or_null(&format!("request.oldObject.{path}"))
            .await?;
        Ok(current != previous)
    }

    /// Open a scope
    pub fn checkpoint(&mut self) {
        self.document.checkpoint();
        trace!(target: self.config.log_target.as_str(), "checkpoint, level {}", self.document.level());
    }

    /// Revert the document to the start of the current scope, keeping it open
    pub async fn reset(&mut self) -> ContextResult<()> {
        if !self.document.reset() {
            return Ok(());
        }
        trace!(target: self.config.log_target.as_str(), "reset, level {}", self.document.level());
        self.rewind(false).await
    }

    /// Close the current scope, reverting the document
    pub async fn restore(&mut self) -> ContextResult<()> {
        if !self.document.restore() {
            return Ok(());
        }
        trace!(target: self.config.log_target.as_str(), "restore, level {}", self.document.level());
        self.rewind(true).await
    }

    /// Keep the current value of `name` across the next enclosing restore
    pub fn persist(&mut self, name: &str) -> ContextResult<()> {
        let path = parse_key_path(name)?;
        self.document.persist(name, path);
        Ok(())
    }

    fn add_raw(&mut self, name: &str, raw: &[u8], overwrite: bool) -> ContextResult<()> {
        let value: Value = serde_json::from_slice(raw).map_err(|source| ContextError::Unmarshal {
            name: name.to_string(),
            source,
        })?;
        let path = parse_key_path(name)?;
        self.add_at(name, &path, value, raw.len(), overwrite)
    }

    fn add_at(
        &mut self,
        name: &str,
        path: &[String],
        value: Value,
        bytes: usize,
        overwrite: bool,
    ) -> ContextResult<()> {
        self.document.check_merge(path, &value, overwrite)?;
        self.reserve(bytes)?;
        self.document.apply_merge(path, value, overwrite);
        trace!(target: self.config.log_target.as_str(), "added entry {name} ({bytes} bytes)");
        Ok(())
    }

    fn reserve(&mut self, bytes: usize) -> ContextResult<()> {
        self.size.reserve(bytes).inspect_err(|err| {
            debug!(target: self.config.log_target.as_str(), "rejected entry: {err}");
        })
    }

    async fn load_deferred(&mut self, query: &str) -> ContextResult<()> {
        let level = self.document.level();
        let mut attempted = FxHashSet::default();
        while let Some(id) = self.deferred.next_match(query, level, &attempted) {
            attempted.insert(id);
            self.run_loader(id).await?;
        }
        Ok(())
    }

    async fn run_loader(&mut self, id: u64) -> ContextResult<()> {
        let Some((name, mut loader)) = self.deferred.begin(id) else {
            return Ok(());
        };
        debug!(target: self.config.log_target.as_str(), "loading deferred entry {name}");
        let outcome = self.load_within_budget(&name, loader.as_mut()).await;
        self.deferred.finish(id, loader);
        match &outcome {
            Ok(()) => debug!(target: self.config.log_target.as_str(), "loaded deferred entry {name}"),
            Err(err) => debug!(target: self.config.log_target.as_str(), "failed to load deferred entry {name}: {err}"),
        }
        outcome
    }

    async fn load_within_budget(&mut self, name: &str, loader: &mut dyn Loader) -> ContextResult<()> {
        let remaining = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let budget = match (self.config.load_timeout, remaining) {
            (Some(timeout), Some(remaining)) if remaining < timeout => Some(Budget::Deadline(remaining)),
            (Some(timeout), _) => Some(Budget::Timeout(timeout)),
            (None, Some(remaining)) => Some(Budget::Deadline(remaining)),
            (None, None) => None,
        };

        let result = match budget {
            None => loader.load_data(self).await,
            Some(budget) => match tokio::time::timeout(budget.duration(), loader.load_data(self)).await {
                Ok(result) => result,
                Err(_) => return Err(budget.elapsed(name)),
            },
        };
        result.map_err(|err| ContextError::from_loader(name, err))
    }

    async fn rewind(&mut self, finalize: bool) -> ContextResult<()> {
        let target = self.document.level();
        let plan = self.deferred.plan_rewind(finalize, target);
        if plan.discarded > 0 {
            debug!(target: self.config.log_target.as_str(), "discarded {} deferred loaders above level {target}", plan.discarded);
        }

        let mut outcome = Ok(());
        for id in &plan.replay {
            if let Some(name) = self.deferred.name_of(*id) {
                trace!(target: self.config.log_target.as_str(), "replaying deferred entry {name}");
            }
            if let Err(err) = self.run_loader(*id).await {
                outcome = Err(err);
                break;
            }
        }

        for id in &plan.retire {
            if let Some(name) = self.deferred.name_of(*id) {
                trace!(target: self.config.log_target.as_str(), "retiring deferred entry {name}");
            }
        }
        self.deferred.retire(&plan.retire);
        outcome
    }
}

#[derive(Clone, Copy)]
enum Budget {
    Timeout(Duration),
    Deadline(Duration),
}

impl Budget {
    fn duration(self) -> Duration {
        match self {
            Budget::Timeout(duration) | Budget::Deadline(duration) => duration,
        }
    }

    fn elapsed(self, name: &str) -> ContextError {
        match self {
            Budget::Timeout(timeout) => ContextError::LoadTimeout {
                name: name.to_string(),
                timeout,
            },
            Budget::Deadline(_) => ContextError::DeadlineExceeded {
                name: name.to_string(),
            },
        }
    }
}

fn serialized_len(name: &str, value: &Value) -> ContextResult<usize> {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .map_err(|source| ContextError::Marshal {
            name: name.to_string(),
            source,
        })
}
