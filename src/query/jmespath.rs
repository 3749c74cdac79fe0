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

//! JMESPath query engine

use super::functions::register_custom_functions;
use super::{CompiledQuery, QueryEngine, QueryError, QueryResult};
use jmespath::ast::Ast;
use jmespath::{Expression, Runtime};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

// Runtime is Sync but not Send, so the static holds a leaked shared reference.
static DEFAULT_RUNTIME: LazyLock<&'static Runtime> = LazyLock::new(|| {
    let mut runtime = Runtime::new();
    runtime.register_builtin_functions();
    register_custom_functions(&mut runtime);
    Box::leak(Box::new(runtime))
});

/// Query engine backed by the `jmespath` crate
#[derive(Clone, Copy)]
pub struct JmesPath {
    runtime: &'static Runtime,
}

impl JmesPath {
    /// Engine with the builtin and custom functions registered
    pub fn new() -> Self {
        Self {
            runtime: *DEFAULT_RUNTIME,
        }
    }

    /// Engine using a caller-provided runtime
    pub fn with_runtime(runtime: &'static Runtime) -> Self {
        Self { runtime }
    }
}

impl Default for JmesPath {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JmesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JmesPath").finish_non_exhaustive()
    }
}

impl QueryEngine for JmesPath {
    fn compile<'a>(&'a self, expression: &str) -> QueryResult<Box<dyn CompiledQuery + 'a>> {
        let compiled = self
            .runtime
            .compile(expression)
            .map_err(|err| QueryError::Compile {
                expression: expression.to_string(),
                message: err.to_string(),
            })?;
        Ok(Box::new(JmesPathQuery { compiled }))
    }
}

struct JmesPathQuery<'a> {
    compiled: Expression<'a>,
}

impl CompiledQuery for JmesPathQuery<'_> {
    fn expression(&self) -> &str {
        self.compiled.as_str()
    }

    fn search(&self, data: &Value) -> QueryResult<Value> {
        let result = self
            .compiled
            .search(data)
            .map_err(|err| self.search_error(err))?;
        if result.is_null() {
            // jmespath yields null for missing keys, tell the two apart
            if let Step::Missing(key) = resolve(self.compiled.as_ast(), data) {
                return Err(QueryError::NotFound { key });
            }
            return Ok(Value::Null);
        }
        serde_json::to_value(&*result).map_err(|err| self.search_error(err))
    }
}

impl JmesPathQuery<'_> {
    fn search_error(&self, err: impl fmt::Display) -> QueryError {
        QueryError::Search {
            expression: self.compiled.as_str().to_string(),
            message: err.to_string(),
        }
    }
}

enum Step<'v> {
    Found(&'v Value),
    Missing(String),
    Unknown,
}

fn resolve<'v>(ast: &Ast, data: &'v Value) -> Step<'v> {
    match ast {
        Ast::Identity { .. } => Step::Found(data),
        Ast::Field { name, .. } => match data {
            Value::Object(map) => match map.get(name) {
                Some(value) => Step::Found(value),
                None => Step::Missing(name.clone()),
            },
            _ => Step::Unknown,
        },
        Ast::Subexpr { lhs, rhs, .. } => match resolve(lhs, data) {
            Step::Found(value) => resolve(rhs, value),
            other => other,
        },
        Ast::Index { idx, .. } => {
            let Value::Array(items) = data else {
                return Step::Unknown;
            };
            let index = if *idx < 0 {
                items.len().checked_sub(idx.unsigned_abs() as usize)
            } else {
                Some(*idx as usize)
            };
            match index.and_then(|i| items.get(i)) {
                Some(value) => Step::Found(value),
                None => Step::Unknown,
            }
        }
        _ => Step::Unknown,
    }
}
