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

//! Checkpointable JSON document
//!
//! The document is always a JSON object. Merges follow JSON merge-patch rules
//! with two restrictions: an object is never merged onto an existing scalar or
//! array, and a path never steps through a non-object value. Both surface as
//! [`ContextError::MergeConflict`] and leave the document untouched, because
//! every merge is validated before anything is written.

use super::error::{ContextError, ContextResult};
use super::path::{DisplayPath, KeyPath};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Current context data plus the snapshots taken at scope entry
#[derive(Debug, Clone)]
pub struct Document {
    current: Value,
    checkpoints: Vec<Value>,
    persisted: IndexMap<String, KeyPath>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self {
            current: Value::Object(Map::new()),
            checkpoints: Vec::new(),
            persisted: IndexMap::new(),
        }
    }

    /// Create a document from an existing JSON object
    pub fn from_value(value: Value) -> ContextResult<Self> {
        if !value.is_object() {
            return Err(ContextError::MergeConflict {
                path: String::new(),
                found: ContextError::json_kind(&value),
            });
        }
        Ok(Self {
            current: value,
            ..Self::new()
        })
    }

    /// The current document
    pub fn data(&self) -> &Value {
        &self.current
    }

    /// Number of open scopes
    pub fn level(&self) -> usize {
        self.checkpoints.len()
    }

    /// Value stored at `path`, if any
    pub fn get(&self, path: &[String]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.current, |value, key| value.as_object()?.get(key))
    }

    /// Validate a merge of `value` at `path` without applying it
    pub fn check_merge(&self, path: &[String], value: &Value, overwrite: bool) -> ContextResult<()> {
        let mut node = &self.current;
        for (depth, key) in path.iter().enumerate() {
            match node {
                Value::Object(map) => match map.get(key) {
                    Some(next) => node = next,
                    None => return Ok(()),
                },
                Value::Null => return Ok(()),
                other => {
                    return Err(ContextError::MergeConflict {
                        path: DisplayPath(&path[..depth]).to_string(),
                        found: ContextError::json_kind(other),
                    });
                }
            }
        }
        if overwrite {
            return Ok(());
        }
        check_value(node, value, path.to_vec())
    }

    /// Merge `value` at `path`.
    ///
    /// With `overwrite` the value at `path` is replaced wholesale, otherwise
    /// objects are deep-merged.
    pub fn merge(&mut self, path: &[String], value: Value, overwrite: bool) -> ContextResult<()> {
        self.check_merge(path, &value, overwrite)?;
        self.apply_merge(path, value, overwrite);
        Ok(())
    }

    /// Merge a top-level JSON object into the document
    pub fn merge_root(&mut self, value: Value, overwrite: bool) -> ContextResult<()> {
        if !value.is_object() {
            return Err(ContextError::MergeConflict {
                path: String::new(),
                found: ContextError::json_kind(&value),
            });
        }
        if overwrite {
            // each top-level key is replaced, the rest of the document stays
            if let Value::Object(entries) = value {
                for (key, entry) in entries {
                    self.apply_merge(std::slice::from_ref(&key), entry, true);
                }
            }
            return Ok(());
        }
        self.merge(&[], value, false)
    }

    /// Apply a merge that already passed [`Document::check_merge`]
    pub(crate) fn apply_merge(&mut self, path: &[String], value: Value, overwrite: bool) {
        let Some((leaf, parents)) = path.split_last() else {
            if overwrite {
                self.current = value;
            } else {
                merge_patch(&mut self.current, value);
            }
            return;
        };
        let mut node = &mut self.current;
        for key in parents {
            node = ensure_object(node)
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let parent = ensure_object(node);
        if value.is_null() {
            parent.shift_remove(leaf);
            return;
        }
        match parent.get_mut(leaf) {
            Some(existing) if !overwrite => merge_patch(existing, value),
            _ => {
                parent.insert(leaf.clone(), strip_nulls(value));
            }
        }
    }

    /// Push a snapshot of the current document
    pub fn checkpoint(&mut self) {
        self.checkpoints.push(self.current.clone());
    }

    /// Reinstate the newest snapshot without popping it.
    ///
    /// Returns false when no scope is open.
    pub fn reset(&mut self) -> bool {
        match self.checkpoints.last() {
            Some(snapshot) => {
                self.current = snapshot.clone();
                true
            }
            None => false,
        }
    }

    /// Pop the newest snapshot and re-apply persisted entries on top of it.
    ///
    /// A persisted entry replaces whatever the snapshot holds along its path,
    /// scalars included, so the pop always completes. Returns false when no
    /// scope is open.
    pub fn restore(&mut self) -> bool {
        let Some(snapshot) = self.checkpoints.pop() else {
            return false;
        };
        let previous = std::mem::replace(&mut self.current, snapshot);
        for (_, path) in std::mem::take(&mut self.persisted) {
            let mut value = Some(&previous);
            for key in path.iter() {
                value = value.and_then(|v| v.as_object()).and_then(|m| m.get(key));
            }
            let Some(value) = value else { continue };
            self.apply_merge(&path, value.clone(), true);
        }
        true
    }

    /// Mark an entry so its value survives the next enclosing restore
    pub fn persist(&mut self, name: &str, path: KeyPath) {
        self.persisted.insert(name.to_string(), path);
    }
}

fn check_value(existing: &Value, incoming: &Value, path: Vec<String>) -> ContextResult<()> {
    let Value::Object(incoming) = incoming else {
        return Ok(());
    };
    match existing {
        Value::Object(existing) => {
            for (key, value) in incoming {
                if let Some(current) = existing.get(key) {
                    let mut nested = path.clone();
                    nested.push(key.clone());
                    check_value(current, value, nested)?;
                }
            }
            Ok(())
        }
        Value::Null => Ok(()),
        other => Err(ContextError::MergeConflict {
            path: DisplayPath(&path).to_string(),
            found: ContextError::json_kind(other),
        }),
    }
}

fn merge_patch(target: &mut Value, patch: Value) {
    let Value::Object(patch) = patch else {
        *target = patch;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let target = ensure_object(target);
    for (key, value) in patch {
        if value.is_null() {
            target.shift_remove(&key);
            continue;
        }
        match target.get_mut(&key) {
            Some(existing) => merge_patch(existing, value),
            None => {
                target.insert(key, strip_nulls(value));
            }
        }
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}
