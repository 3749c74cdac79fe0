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

//! Textual matching of query paths against deferred entry names

use crate::context::{ContextError, ContextResult};
use regex::Regex;

/// Matches query text that references a name as a whole token.
///
/// The name must not continue an identifier on either side and must not be
/// the member of another dotted path. A quoted identifier matches only when
/// it quotes exactly the name.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    regex: Regex,
}

impl NameMatcher {
    /// Build a matcher for `name`
    pub fn new(name: &str) -> ContextResult<Self> {
        let escaped = regex::escape(name);
        let pattern = format!(r#"(?:^|[^\w.$"'`])(?:{escaped}(?:$|[^\w])|"{escaped}")"#);
        let regex = Regex::new(&pattern).map_err(|source| ContextError::InvalidMatcher {
            name: name.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// Whether `query` references the name
    pub fn matches(&self, query: &str) -> bool {
        self.regex.is_match(query)
    }
}
