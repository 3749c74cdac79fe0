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

//! Cumulative size accounting for context entries

use super::error::{ContextError, ContextResult};

/// Running byte count of every payload merged into a context.
///
/// The count is never decremented: replacing a key or rewinding a scope
/// does not give the bytes back.
#[derive(Debug, Clone, Default)]
pub struct SizeGuard {
    used: usize,
    limit: usize,
}

impl SizeGuard {
    /// Create a guard with the given ceiling, 0 disables the check
    pub fn new(limit: usize) -> Self {
        Self { used: 0, limit }
    }

    /// Account for `bytes` more, failing if that would cross the ceiling
    pub fn reserve(&mut self, bytes: usize) -> ContextResult<()> {
        let size = self.used.saturating_add(bytes);
        if self.limit > 0 && size > self.limit {
            return Err(ContextError::ContextSizeLimitExceeded {
                size,
                limit: self.limit,
            });
        }
        self.used = size;
        Ok(())
    }

    /// Bytes accounted so far
    pub fn used(&self) -> usize {
        self.used
    }

    /// Configured ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }
}
