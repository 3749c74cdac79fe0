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

//! Query evaluation against context documents
//!
//! The context only relies on "string path in, JSON value out". The default
//! engine is [`JmesPath`]; hosts can plug in their own through [`QueryEngine`].

pub mod functions;
pub mod jmespath;

pub use self::functions::register_custom_functions;
pub use self::jmespath::JmesPath;

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while compiling or evaluating a query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Expression is not valid
    #[error("failed to compile {expression:?}: {message}")]
    Compile {
        /// Expression as supplied
        expression: String,
        /// Engine message
        message: String,
    },

    /// Expression referenced a key missing from the document
    #[error("Unknown key \"{key}\" in path")]
    NotFound {
        /// Missing key
        key: String,
    },

    /// Evaluation failed at runtime
    #[error("failed to evaluate {expression:?}: {message}")]
    Search {
        /// Expression as supplied
        expression: String,
        /// Engine message
        message: String,
    },
}

/// A compiled path expression
pub trait CompiledQuery {
    /// Source text of the expression
    fn expression(&self) -> &str;

    /// Evaluate the expression against `data`
    fn search(&self, data: &Value) -> QueryResult<Value>;
}

/// Compiles path expressions
pub trait QueryEngine: Send + Sync + fmt::Debug {
    /// Compile `expression`
    fn compile<'a>(&'a self, expression: &str) -> QueryResult<Box<dyn CompiledQuery + 'a>>;

    /// Compile and evaluate `expression` against `data` in one step
    fn search(&self, expression: &str, data: &Value) -> QueryResult<Value> {
        self.compile(expression)?.search(data)
    }
}
