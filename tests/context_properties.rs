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

//! Scope, persistence and size properties of the evaluation context

use pretty_assertions::assert_eq;
use futures::future::BoxFuture;
use policy_context::{
    ContextConfig, ContextError, ExternalDataLoader, FnDataSource, JmesPath, JsonContext,
    VariableEntry, VariableLoader,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

mod utils;
use utils::{add_mock, new_context};

fn limited(limit: usize) -> JsonContext {
    JsonContext::new(
        Arc::new(JmesPath::new()),
        ContextConfig::testing().with_max_context_size(limit),
    )
}

#[tokio::test]
async fn test_size_limit_rejects_crossing_entry() {
    let mut ctx = limited(16);
    // "\"0123456789\"" is 12 bytes
    ctx.add_context_entry("a", br#""0123456789""#).unwrap();
    let err = ctx.add_context_entry("b", br#""0123456789""#).unwrap_err();
    match err {
        ContextError::ContextSizeLimitExceeded { size, limit } => {
            assert_eq!(size, 24);
            assert_eq!(limit, 16);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(
        ctx.add_context_entry("b", br#""0123456789""#)
            .unwrap_err()
            .to_string(),
        "context size limit exceeded: 24 bytes exceeds limit of 16 bytes"
    );
    assert!(ctx.query("b").await.unwrap_err().is_not_found());
    assert_eq!(ctx.query("a").await.unwrap(), json!("0123456789"));
    assert_eq!(ctx.context_size(), 12);
}

#[tokio::test]
async fn test_size_is_cumulative_across_replacements() {
    let mut ctx = limited(36);
    for _ in 0..3 {
        ctx.replace_context_entry("a", br#""0123456789""#).unwrap();
    }
    assert!(ctx.replace_context_entry("a", br#""0123456789""#).is_err());
}

#[tokio::test]
async fn test_zero_limit_never_rejects() {
    let mut ctx = JsonContext::new(Arc::new(JmesPath::new()), ContextConfig::unlimited());
    let payload = serde_json::to_vec(&"x".repeat(64 * 1024)).unwrap();
    for i in 0..64 {
        ctx.add_context_entry(&format!("entry{i}"), &payload).unwrap();
    }
    assert!(ctx.context_size() > 4 * 1024 * 1024);
}

#[tokio::test]
async fn test_variable_amplification_hits_limit() {
    let mut ctx = limited(64 * 1024);
    ctx.add_deferred_loader(
        VariableLoader::new(VariableEntry {
            name: "v0".to_string(),
            value: Some(json!("0123456789abcdef")),
            ..VariableEntry::default()
        })
        .into_deferred()
        .unwrap(),
    );
    for i in 1..16 {
        let previous = format!("v{}", i - 1);
        ctx.add_deferred_loader(
            VariableLoader::new(VariableEntry {
                name: format!("v{i}"),
                jmes_path: Some(format!("join('', [{previous}, {previous}])")),
                ..VariableEntry::default()
            })
            .into_deferred()
            .unwrap(),
        );
    }

    let err = ctx.query("v15").await.unwrap_err();
    assert!(
        matches!(err, ContextError::ContextSizeLimitExceeded { limit: 65536, .. }),
        "{err}"
    );
    assert!(ctx.context_size() <= 64 * 1024);
    assert_eq!(
        ctx.query("length(v5)").await.unwrap(),
        json!(16 * 32)
    );
}

#[tokio::test]
async fn test_checkpoint_restore_without_changes() {
    let mut ctx = new_context();
    ctx.add_context_entry("request.object", br#"{"metadata": {"name": "pod", "labels": {"app": "web"}}}"#)
        .unwrap();
    add_mock(&mut ctx, "extra", json!({"n": 1}));
    let before = ctx.query("request.object").await.unwrap();

    ctx.checkpoint();
    ctx.restore().await.unwrap();

    assert_eq!(ctx.query("request.object").await.unwrap(), before);
    assert_eq!(ctx.query("extra.n").await.unwrap(), json!(1));
    assert_eq!(ctx.level(), 0);
}

#[tokio::test]
async fn test_persist_survives_restore() {
    let mut ctx = new_context();
    ctx.add_context_entry("foo", br#""bar""#).unwrap();
    ctx.checkpoint();
    ctx.add_context_entry("foo", br#""baz""#).unwrap();
    ctx.persist("foo").unwrap();
    ctx.restore().await.unwrap();
    assert_eq!(ctx.query("foo").await.unwrap(), json!("baz"));
}

#[tokio::test]
async fn test_persist_is_consumed_by_one_restore() {
    let mut ctx = new_context();
    ctx.add_context_entry("foo", br#""bar""#).unwrap();
    ctx.checkpoint();
    ctx.persist("foo").unwrap();
    ctx.restore().await.unwrap();

    ctx.checkpoint();
    ctx.add_context_entry("foo", br#""qux""#).unwrap();
    ctx.restore().await.unwrap();
    assert_eq!(ctx.query("foo").await.unwrap(), json!("bar"));
}

#[tokio::test]
async fn test_persist_of_nested_key() {
    let mut ctx = new_context();
    ctx.add_context_entry("a", br#"{"b": 1, "c": 2}"#).unwrap();
    ctx.checkpoint();
    ctx.add_context_entry("a.b", b"10").unwrap();
    ctx.add_context_entry("a.c", b"20").unwrap();
    ctx.persist("a.b").unwrap();
    ctx.restore().await.unwrap();
    assert_eq!(ctx.query("a").await.unwrap(), json!({"b": 10, "c": 2}));
}

#[tokio::test]
async fn test_persisted_path_through_scalar_still_closes_scope() {
    let mut ctx = new_context();
    ctx.add_variable("foo", "scalar").unwrap();
    ctx.checkpoint();
    ctx.replace_context_entry("foo", br#"{"bar": 1}"#).unwrap();
    ctx.persist("foo.bar").unwrap();
    let leak = add_mock(&mut ctx, "leak", "leak");

    ctx.restore().await.unwrap();
    assert_eq!(ctx.level(), 0);
    assert_eq!(ctx.deferred_len(), 0);
    assert_eq!(ctx.query("foo").await.unwrap(), json!({"bar": 1}));

    ctx.checkpoint();
    assert!(ctx.query("leak").await.unwrap_err().is_not_found());
    assert_eq!(leak.invocations(), 0);
}

#[tokio::test]
async fn test_external_source_fetched_once_across_resets() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    let source = FnDataSource::new(move || -> BoxFuture<'static, anyhow::Result<Value>> {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"n": 1}))
        })
    });
    let mut ctx = new_context();
    ctx.add_deferred_loader(
        ExternalDataLoader::new("api", Arc::new(source))
            .into_deferred()
            .unwrap(),
    );

    assert_eq!(ctx.query("api.n").await.unwrap(), json!(1));
    ctx.checkpoint();
    for _ in 0..10 {
        assert_eq!(ctx.query("api.n").await.unwrap(), json!(1));
        ctx.reset().await.unwrap();
    }
    ctx.restore().await.unwrap();

    assert_eq!(ctx.query("api.n").await.unwrap(), json!(1));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_has_changed_with_path_on_one_side() {
    let mut ctx = new_context();
    ctx.add_resource(json!({"metadata": {"labels": {"team": "x"}}}))
        .unwrap();
    ctx.add_old_resource(json!({"metadata": {}})).unwrap();

    assert!(ctx.has_changed("metadata.labels.team").await.unwrap());
    assert!(!ctx.has_changed("metadata.annotations").await.unwrap());
}

#[tokio::test]
async fn test_scope_rewind_keeps_outer_bindings() {
    let mut ctx = new_context();
    let outer = add_mock(&mut ctx, "outer", "a");
    ctx.checkpoint();
    let inner = add_mock(&mut ctx, "inner", "b");

    // the outer binding is first loaded inside the inner scope
    assert_eq!(ctx.query("[outer, inner]").await.unwrap(), json!(["a", "b"]));
    ctx.restore().await.unwrap();

    assert!(ctx.query("inner").await.unwrap_err().is_not_found());
    assert_eq!(ctx.query("outer").await.unwrap(), json!("a"));
    assert_eq!(outer.invocations(), 2);
    assert_eq!(inner.invocations(), 1);
}

#[tokio::test]
async fn test_loop_with_elements() {
    let mut ctx = new_context();
    ctx.add_variable("element", "before").unwrap();

    ctx.checkpoint();
    for (index, name) in ["a", "b", "c"].into_iter().enumerate() {
        ctx.reset().await.unwrap();
        ctx.add_element(json!({"name": name}), index, 0).unwrap();
        assert_eq!(ctx.query("element.name").await.unwrap(), json!(name));
        assert_eq!(ctx.query("elementIndex0").await.unwrap(), json!(index));
    }
    ctx.restore().await.unwrap();

    assert_eq!(ctx.query("element").await.unwrap(), json!("before"));
    assert!(ctx.query("elementIndex").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_replay_error_surfaces_from_restore() {
    let mut ctx = limited(30);
    add_mock(&mut ctx, "big", "0123456789");
    ctx.checkpoint();
    ctx.query("big").await.unwrap();
    ctx.add_context_entry("filler", br#""0123456789""#).unwrap();
    let err = ctx.restore().await.unwrap_err();
    assert!(
        matches!(err, ContextError::ContextSizeLimitExceeded { .. }),
        "{err}"
    );
    assert_eq!(ctx.level(), 0);
}

#[tokio::test]
async fn test_context_is_send() {
    fn assert_send<T: Send>(_: &T) {}
    let mut ctx = new_context();
    add_mock(&mut ctx, "value", 1);
    let handle = tokio::spawn(async move {
        let value = ctx.query("value").await.unwrap();
        (ctx, value)
    });
    let (ctx, value) = handle.await.unwrap();
    assert_send(&ctx);
    assert_eq!(value, json!(1));
}
