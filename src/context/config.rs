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

//! Context configuration options

use serde::Deserialize;
use std::time::Duration;

/// Default ceiling for the cumulative size of context entries (2 MiB)
pub const DEFAULT_MAX_CONTEXT_SIZE: usize = 2 * 1024 * 1024;

/// Default log target for context events
pub const DEFAULT_LOG_TARGET: &str = "policy_context";

/// Configuration for a [`JsonContext`](super::JsonContext)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextConfig {
    /// Maximum cumulative size in bytes of all entries, 0 disables the check
    pub max_context_size: usize,

    /// Optional time budget for a single deferred load
    #[serde(with = "optional_millis")]
    pub load_timeout: Option<Duration>,

    /// Target used for log records emitted by the context
    pub log_target: String,
}

impl ContextConfig {
    /// Create a configuration with custom settings
    pub fn new(max_context_size: usize, load_timeout: Option<Duration>) -> Self {
        Self {
            max_context_size,
            load_timeout,
            log_target: DEFAULT_LOG_TARGET.to_string(),
        }
    }

    /// Create a configuration without a size ceiling
    pub fn unlimited() -> Self {
        Self {
            max_context_size: 0,
            ..Self::default()
        }
    }

    /// Create a configuration suitable for tests
    pub fn testing() -> Self {
        Self {
            max_context_size: 64 * 1024,
            load_timeout: Some(Duration::from_secs(5)),
            log_target: "policy_context::test".to_string(),
        }
    }

    /// Set the size ceiling
    pub fn with_max_context_size(mut self, bytes: usize) -> Self {
        self.max_context_size = bytes;
        self
    }

    /// Set the per-load timeout
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    /// Set the log target
    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_size: DEFAULT_MAX_CONTEXT_SIZE,
            load_timeout: None,
            log_target: DEFAULT_LOG_TARGET.to_string(),
        }
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
