//! Policy evaluation context
//!
//! A checkpointable JSON document that policy rules query with JMESPath,
//! paired with a registry of deferred loaders that fetch data only when a
//! query references it and that stay consistent across nested rule scopes.

pub mod context;
pub mod deferred;
pub mod loaders;
pub mod query;

// Re-export main types
pub use context::{
    ContextConfig, ContextError, ContextResult, ImageInfo, ImageInfos, JsonContext, PathError,
};
pub use deferred::{DeferredLoader, Loader, LoaderError};
pub use loaders::{DataSource, ExternalDataLoader, FnDataSource, VariableEntry, VariableLoader};
pub use query::{CompiledQuery, JmesPath, QueryEngine, QueryError, QueryResult};
