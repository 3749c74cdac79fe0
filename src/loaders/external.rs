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

//! Loader for data fetched from outside the context
//!
//! API calls, ConfigMap lookups, global context stores and image registry
//! clients all reduce to "fetch a JSON document, optionally project it, store
//! it under a name". Hosts implement [`DataSource`] for their client, or wrap a
//! closure in [`FnDataSource`].

use crate::context::{ContextResult, JsonContext};
use crate::deferred::{DeferredLoader, Loader, LoaderError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Source of external JSON data
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch the current data
    async fn fetch(&self) -> anyhow::Result<Value>;
}

#[async_trait]
impl DataSource for Value {
    async fn fetch(&self) -> anyhow::Result<Value> {
        Ok(self.clone())
    }
}

/// [`DataSource`] backed by a closure returning a boxed future
pub struct FnDataSource<F>(F);

impl<F> FnDataSource<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync,
{
    /// Source calling `fetch` for every fetch
    pub fn new(fetch: F) -> Self {
        Self(fetch)
    }
}

#[async_trait]
impl<F> DataSource for FnDataSource<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync,
{
    async fn fetch(&self) -> anyhow::Result<Value> {
        (self.0)().await
    }
}

/// Fetches data from a [`DataSource`] and adds it to the context
pub struct ExternalDataLoader {
    name: String,
    source: Arc<dyn DataSource>,
    jmes_path: Option<String>,
    data: Option<Value>,
}

impl ExternalDataLoader {
    /// Loader storing the data of `source` under `name`
    pub fn new(name: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        Self {
            name: name.into(),
            source,
            jmes_path: None,
            data: None,
        }
    }

    /// Project the fetched data through `path` before storing it
    pub fn with_jmes_path(mut self, path: impl Into<String>) -> Self {
        self.jmes_path = Some(path.into());
        self
    }

    /// Bind the loader to its entry name
    pub fn into_deferred(self) -> ContextResult<DeferredLoader> {
        DeferredLoader::new(self.name.clone(), self)
    }
}

impl fmt::Debug for ExternalDataLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalDataLoader")
            .field("name", &self.name)
            .field("jmes_path", &self.jmes_path)
            .field("loaded", &self.data.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Loader for ExternalDataLoader {
    fn has_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Fetches once; replays store the data from the first fetch again
    async fn load_data(&mut self, ctx: &mut JsonContext) -> Result<(), LoaderError> {
        let data = match &self.data {
            Some(data) => data.clone(),
            None => {
                let fetched = self.source.fetch().await?;
                match &self.jmes_path {
                    Some(path) => ctx.search(path, &fetched)?,
                    None => fetched,
                }
            }
        };
        let raw = serde_json::to_vec(&data)?;
        ctx.add_context_entry(&self.name, &raw)?;
        self.data = Some(data);
        Ok(())
    }
}
