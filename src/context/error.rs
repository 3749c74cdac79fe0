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

//! Error types for context operations

use super::path::PathError;
use crate::query::QueryError;
use std::time::Duration;
use thiserror::Error;

/// Result type for context operations
pub type ContextResult<T> = Result<T, ContextError>;

/// Errors raised by the evaluation context
#[derive(Error, Debug)]
pub enum ContextError {
    /// Entry payload is not valid JSON
    #[error("failed to unmarshal entry {name}: {source}")]
    Unmarshal {
        /// Entry name
        name: String,
        /// Underlying parse error
        source: serde_json::Error,
    },

    /// Value could not be serialized into JSON
    #[error("failed to marshal entry {name}: {source}")]
    Marshal {
        /// Entry name
        name: String,
        /// Underlying serialization error
        source: serde_json::Error,
    },

    /// Merge would replace or step through an incompatible value
    #[error("cannot merge at {path}: existing value is {found}")]
    MergeConflict {
        /// Path at which the conflict occurred
        path: String,
        /// JSON kind of the existing value
        found: &'static str,
    },

    /// Cumulative entry size crossed the configured ceiling
    #[error("context size limit exceeded: {size} bytes exceeds limit of {limit} bytes")]
    ContextSizeLimitExceeded {
        /// Size that would have been reached
        size: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// Entry name could not be parsed
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// Query failed to compile or evaluate
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Deferred loader name could not be turned into a matcher
    #[error("invalid deferred loader name {name}: {source}")]
    InvalidMatcher {
        /// Loader name
        name: String,
        /// Regex build error
        source: regex::Error,
    },

    /// Loader failed with its own error
    #[error("failed to load {name}: {source}")]
    Loader {
        /// Binding name
        name: String,
        /// Loader error
        source: anyhow::Error,
    },

    /// Loader exceeded the per-load timeout
    #[error("loading {name} timed out after {timeout:?}")]
    LoadTimeout {
        /// Binding name
        name: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// Evaluation deadline passed while loading
    #[error("evaluation deadline exceeded while loading {name}")]
    DeadlineExceeded {
        /// Binding name
        name: String,
    },
}

impl ContextError {
    /// Whether the error is a query that referenced a missing key
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContextError::Query(QueryError::NotFound { .. }))
    }

    /// Convert an error returned by a loader.
    ///
    /// Context errors raised inside the loader come back unchanged.
    pub fn from_loader(name: &str, error: anyhow::Error) -> Self {
        match error.downcast::<ContextError>() {
            Ok(error) => error,
            Err(source) => ContextError::Loader {
                name: name.to_string(),
                source,
            },
        }
    }

    pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
        use serde_json::Value;
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
