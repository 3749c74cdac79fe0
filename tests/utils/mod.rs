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

//! Shared helpers for context integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use policy_context::{
    ContextConfig, DeferredLoader, JmesPath, JsonContext, Loader, LoaderError,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Context with the testing configuration
pub fn new_context() -> JsonContext {
    JsonContext::new(Arc::new(JmesPath::new()), ContextConfig::testing())
}

/// Observations shared between a [`MockLoader`] and the test body
#[derive(Debug, Default)]
pub struct LoaderStats {
    invocations: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl LoaderStats {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// `name=value` records in load order
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Loader that stores a fixed value, or the result of a query when one is set
pub struct MockLoader {
    name: String,
    value: Value,
    query: Option<String>,
    loaded: bool,
    stats: Arc<LoaderStats>,
    journal: Option<Arc<LoaderStats>>,
}

#[async_trait]
impl Loader for MockLoader {
    fn has_loaded(&self) -> bool {
        self.loaded
    }

    async fn load_data(&mut self, ctx: &mut JsonContext) -> Result<(), LoaderError> {
        self.stats.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(query) = &self.query {
            if let Ok(result) = ctx.query(query).await {
                if !result.is_null() {
                    self.value = result;
                }
            }
        }
        let raw = serde_json::to_vec(&self.value)?;
        ctx.add_context_entry(&self.name, &raw)?;
        self.loaded = true;

        let event = format!("{}={}", self.name, display(&self.value));
        self.stats.events.lock().unwrap().push(event.clone());
        if let Some(journal) = &self.journal {
            journal.events.lock().unwrap().push(event);
        }
        Ok(())
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Register a mock loader for `name` that stores `value`
pub fn add_mock(ctx: &mut JsonContext, name: &str, value: impl Into<Value>) -> Arc<LoaderStats> {
    register(ctx, name, value.into(), None, None)
}

/// Register a mock loader that stores the result of `query`, or `value` if the query fails
pub fn add_mock_with_query(
    ctx: &mut JsonContext,
    name: &str,
    value: impl Into<Value>,
    query: &str,
) -> Arc<LoaderStats> {
    register(ctx, name, value.into(), Some(query.to_string()), None)
}

/// Register a mock loader that also records its events into `journal`
pub fn add_mock_journaled(
    ctx: &mut JsonContext,
    name: &str,
    value: impl Into<Value>,
    journal: &Arc<LoaderStats>,
) -> Arc<LoaderStats> {
    register(ctx, name, value.into(), None, Some(journal.clone()))
}

fn register(
    ctx: &mut JsonContext,
    name: &str,
    value: Value,
    query: Option<String>,
    journal: Option<Arc<LoaderStats>>,
) -> Arc<LoaderStats> {
    let stats = Arc::new(LoaderStats::default());
    let loader = MockLoader {
        name: name.to_string(),
        value,
        query,
        loaded: false,
        stats: stats.clone(),
        journal,
    };
    ctx.add_deferred_loader(DeferredLoader::new(name, loader).unwrap());
    stats
}

/// Loader that always fails
pub struct FailingLoader;

#[async_trait]
impl Loader for FailingLoader {
    fn has_loaded(&self) -> bool {
        false
    }

    async fn load_data(&mut self, _ctx: &mut JsonContext) -> Result<(), LoaderError> {
        Err(anyhow::anyhow!("failed to load data"))
    }
}
