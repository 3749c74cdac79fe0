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

//! Variable context entries

use crate::context::{ContextResult, JsonContext};
use crate::deferred::{DeferredLoader, Loader, LoaderError};
use anyhow::anyhow;
use async_trait::async_trait;
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A variable declared by a rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableEntry {
    /// Entry name, a dotted path
    pub name: String,
    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Expression applied to `value`, or to the context when there is no value
    #[serde(default, rename = "jmesPath", skip_serializing_if = "Option::is_none")]
    pub jmes_path: Option<String>,
    /// Fallback when the expression fails or yields null
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Resolves a [`VariableEntry`] and stores the result under its name
#[derive(Debug, Clone)]
pub struct VariableLoader {
    entry: VariableEntry,
    loaded: bool,
}

impl VariableLoader {
    /// Loader for `entry`, not yet evaluated
    pub fn new(entry: VariableEntry) -> Self {
        Self {
            entry,
            loaded: false,
        }
    }

    /// Bind the loader to the entry name
    pub fn into_deferred(self) -> ContextResult<DeferredLoader> {
        DeferredLoader::new(self.entry.name.clone(), self)
    }

    async fn evaluate(&self, ctx: &mut JsonContext) -> Result<Value, LoaderError> {
        let entry = &self.entry;
        let default = entry.default.clone().filter(|value| !value.is_null());

        let output = match (&entry.value, entry.jmes_path.as_deref()) {
            (Some(value), Some(path)) => match ctx.search(path, value) {
                Ok(result) => Some(result),
                Err(err) => match &default {
                    Some(_) => default.clone(),
                    None => {
                        return Err(anyhow::Error::new(err)
                            .context(format!("failed to apply {path} to variable {}", entry.name)));
                    }
                },
            },
            (Some(value), None) => Some(value.clone()),
            (None, Some(path)) => match ctx.query(path).await {
                Ok(Value::Null) => default.clone(),
                Ok(result) => Some(result),
                Err(err) => match &default {
                    Some(_) => default.clone(),
                    None => return Err(err.into()),
                },
            },
            (None, None) => default.clone(),
        };

        match output {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(anyhow!(
                "unable to add context entry for variable {} since it evaluated to null",
                entry.name
            )),
        }
    }
}

#[async_trait]
impl Loader for VariableLoader {
    fn has_loaded(&self) -> bool {
        self.loaded
    }

    async fn load_data(&mut self, ctx: &mut JsonContext) -> Result<(), LoaderError> {
        let output = self.evaluate(ctx).await?;
        trace!(target: ctx.config().log_target.as_str(), "evaluated variable {}", self.entry.name);
        let raw = serde_json::to_vec(&output)?;
        ctx.replace_context_entry(&self.entry.name, &raw)?;
        self.loaded = true;
        Ok(())
    }
}
