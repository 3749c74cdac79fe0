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

//! Writers for the well-known entries of an admission context

use super::images::{ImageInfo, ImageInfos};
use super::{ContextResult, JsonContext, parse_key_path, serialized_len};
use log::trace;
use serde::Serialize;
use serde_json::{Value, json};

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

impl JsonContext {
    /// Merge an admission request under `request`
    pub fn add_request<T: Serialize + ?Sized>(&mut self, request: &T) -> ContextResult<()> {
        self.add_variable("request", request)
    }

    /// Set `request.object`
    pub fn add_resource(&mut self, resource: Value) -> ContextResult<()> {
        self.overwrite_entry("request.object", resource)
    }

    /// Set `request.oldObject`
    pub fn add_old_resource(&mut self, resource: Value) -> ContextResult<()> {
        self.overwrite_entry("request.oldObject", resource)
    }

    /// Replace `target`
    pub fn set_target_resource(&mut self, resource: Value) -> ContextResult<()> {
        self.overwrite_entry("target", resource)
    }

    /// Set `request.operation`
    pub fn add_operation(&mut self, operation: &str) -> ContextResult<()> {
        self.add_variable("request.operation", operation)
    }

    /// Set `request.namespace`
    pub fn add_namespace(&mut self, namespace: &str) -> ContextResult<()> {
        self.add_variable("request.namespace", namespace)
    }

    /// Merge request user information (roles, cluster roles, user info) under `request`
    pub fn add_user_info<T: Serialize + ?Sized>(&mut self, info: &T) -> ContextResult<()> {
        self.add_variable("request", info)
    }

    /// Add `serviceAccountName` and `serviceAccountNamespace` derived from a
    /// `system:serviceaccount:<namespace>:<name>` user name.
    ///
    /// Both are empty strings for other users.
    pub fn add_service_account(&mut self, user_name: &str) -> ContextResult<()> {
        let account = user_name.strip_prefix(SERVICE_ACCOUNT_PREFIX).unwrap_or("");
        let mut groups = account.split(':');
        let (namespace, name) = match (groups.next(), groups.next()) {
            (Some(namespace), Some(name)) => (namespace, name),
            _ => ("", ""),
        };
        self.add_json(json!({ "serviceAccountName": name }), false)?;
        self.add_json(json!({ "serviceAccountNamespace": namespace }), false)?;
        trace!(target: self.config.log_target.as_str(), "added service account {namespace}/{name}");
        Ok(())
    }

    /// Set the current `foreach` element.
    ///
    /// Writes `element`, `element<nesting>`, `elementIndex` and
    /// `elementIndex<nesting>`, replacing the values of the previous iteration.
    pub fn add_element(&mut self, element: Value, index: usize, nesting: usize) -> ContextResult<()> {
        let mut data = serde_json::Map::new();
        data.insert(format!("element{nesting}"), element.clone());
        data.insert("element".to_string(), element);
        data.insert(format!("elementIndex{nesting}"), json!(index));
        data.insert("elementIndex".to_string(), json!(index));
        self.add_json(Value::Object(data), true)
    }

    /// Set `image` to the details of a single image
    pub fn add_image_info(&mut self, info: &ImageInfo) -> ContextResult<()> {
        self.overwrite_entry("image", info.to_value())
    }

    /// Set `images` and remember them for [`JsonContext::image_info`]
    pub fn add_image_infos(&mut self, images: ImageInfos) -> ContextResult<()> {
        if images.is_empty() {
            return Ok(());
        }
        let value: serde_json::Map<String, Value> = images
            .iter()
            .map(|(kind, entries)| {
                let entries = entries
                    .iter()
                    .map(|(name, info)| (name.clone(), info.to_value()))
                    .collect();
                (kind.clone(), Value::Object(entries))
            })
            .collect();
        self.overwrite_entry("images", Value::Object(value))?;
        self.images = images;
        Ok(())
    }

    /// Images added through [`JsonContext::add_image_infos`]
    pub fn image_info(&self) -> &ImageInfos {
        &self.images
    }

    fn overwrite_entry(&mut self, name: &str, value: Value) -> ContextResult<()> {
        let path = parse_key_path(name)?;
        let bytes = serialized_len(name, &value)?;
        self.add_at(name, &path, value, bytes, true)
    }
}
