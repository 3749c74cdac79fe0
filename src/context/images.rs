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

//! Container image references exposed to policies

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Registry assumed when a reference does not name one
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Images grouped by kind (`containers`, `initContainers`, ...) then by container name
pub type ImageInfos = IndexMap<String, IndexMap<String, ImageInfo>>;

/// Parsed container image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub registry: String,
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

impl ImageInfo {
    /// Parse an image reference such as `ghcr.io/org/app:1.2@sha256:...`.
    ///
    /// Returns `None` for an empty reference or an empty repository path.
    pub fn parse(reference: &str) -> Option<Self> {
        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, digest.to_string()),
            None => (reference, String::new()),
        };
        let (rest, tag) = match rest.rfind(':') {
            Some(colon) if !rest[colon..].contains('/') => {
                (&rest[..colon], rest[colon + 1..].to_string())
            }
            _ => (rest, String::new()),
        };
        let tag = if tag.is_empty() && digest.is_empty() {
            "latest".to_string()
        } else {
            tag
        };

        let (registry, path) = match rest.split_once('/') {
            Some((host, path))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host.to_string(), path.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), rest.to_string()),
        };
        if path.is_empty() {
            return None;
        }
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Some(Self {
            registry,
            path,
            name,
            tag,
            digest,
        })
    }

    /// Reference including the tag, ignoring any digest
    pub fn reference_with_tag(&self) -> String {
        if self.registry.is_empty() {
            format!("{}:{}", self.path, self.tag)
        } else {
            format!("{}/{}:{}", self.registry, self.path, self.tag)
        }
    }

    /// JSON form stored in the context
    pub fn to_value(&self) -> Value {
        json!({
            "reference": self.to_string(),
            "referenceWithTag": self.reference_with_tag(),
            "registry": self.registry,
            "path": self.path,
            "name": self.name,
            "tag": self.tag,
            "digest": self.digest,
        })
    }
}

impl fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        f.write_str(&self.path)?;
        if self.digest.is_empty() {
            write!(f, ":{}", self.tag)
        } else {
            write!(f, "@{}", self.digest)
        }
    }
}
