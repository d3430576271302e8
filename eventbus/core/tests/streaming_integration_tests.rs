// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests over the channel transport.
//!
//! A spawned task plays the downstream extension: it answers each forwarded
//! command with partial results from several concurrent tasks and a final
//! result, the way a streaming extension would.

use eventbus_core::application::dispatcher::Dispatcher;
use eventbus_core::domain::accumulator::MergeStrategy;
use eventbus_core::domain::command::{Command, RequestHandle};
use eventbus_core::domain::config::EventBusConfig;
use eventbus_core::domain::events::AggregatorEvent;
use eventbus_core::domain::result::{CommandReply, ResultValue, StatusCode};
use eventbus_core::infrastructure::channel::{ChannelDownstream, ChannelReplySink, ForwardedCommand};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn object(value: serde_json::Value) -> eventbus_core::domain::command::Properties {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Answers every command with `producers` tasks x `partials` results, then a final.
fn spawn_streaming_extension(
    mut forwarded: mpsc::UnboundedReceiver<ForwardedCommand>,
    producers: usize,
    partials: usize,
) {
    tokio::spawn(async move {
        while let Some(ForwardedCommand { command, results }) = forwarded.recv().await {
            let index = command.properties().get("cmd_index").cloned().unwrap_or_default();
            tokio::spawn(async move {
                let mut tasks = Vec::new();
                for producer in 0..producers {
                    let results = results.clone();
                    tasks.push(tokio::spawn(async move {
                        for part in 0..partials {
                            let mut props = object(json!({"step": "processing", "counter": part}));
                            props.insert(format!("producer_{producer}"), json!(part));
                            results.deliver(ResultValue::ok(props));
                            tokio::task::yield_now().await;
                        }
                    }));
                }
                for task in tasks {
                    task.await.unwrap();
                }
                results.deliver(
                    ResultValue::ok(object(json!({"step": "completed", "cmd_index": index}))).with_final(true),
                );
            });
        }
    });
}

async fn collect_replies(
    reply_rx: &mut mpsc::UnboundedReceiver<(RequestHandle, CommandReply)>,
    expected: usize,
) -> HashMap<RequestHandle, Vec<CommandReply>> {
    let mut replies: HashMap<RequestHandle, Vec<CommandReply>> = HashMap::new();
    for _ in 0..expected {
        let (handle, reply) = tokio::time::timeout(Duration::from_secs(10), reply_rx.recv())
            .await
            .expect("timed out waiting for replies")
            .expect("reply channel closed");
        replies.entry(handle).or_default().push(reply);
    }
    replies
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_streaming_requests_each_reply_once() {
    let (downstream, forwarded) = ChannelDownstream::new();
    let (replies, mut reply_rx) = ChannelReplySink::new();
    let dispatcher = Dispatcher::new(EventBusConfig::default(), Arc::new(downstream), Arc::new(replies));
    spawn_streaming_extension(forwarded, 4, 10);

    let handles: Vec<RequestHandle> = (0..100)
        .map(|i| dispatcher.deliver_command(Command::new("ten_event").with_property("cmd_index", i)))
        .collect();

    let replies = collect_replies(&mut reply_rx, handles.len()).await;
    for (i, handle) in handles.iter().enumerate() {
        let replies = &replies[handle];
        assert_eq!(replies.len(), 1);
        let reply = &replies[0];
        assert_eq!(reply.status, StatusCode::Ok);
        assert_eq!(reply.properties.get("step"), Some(&json!("completed")));
        assert_eq!(reply.properties.get("cmd_index"), Some(&json!(i)));
        for producer in 0..4 {
            assert_eq!(reply.properties.get(&format!("producer_{producer}")), Some(&json!(9)));
        }
    }

    // Nothing else arrives afterwards
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(reply_rx.try_recv().is_err());

    let stats = dispatcher.stats();
    assert_eq!(stats.forwarded, 100);
    assert_eq!(stats.merged, 100 * 4 * 10);
    assert_eq!(stats.replies_ok, 100);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deep_merge_strategy_end_to_end() {
    let config = EventBusConfig {
        merge_strategy: MergeStrategy::Deep,
        ..Default::default()
    };
    let (downstream, mut forwarded) = ChannelDownstream::new();
    let (replies, mut reply_rx) = ChannelReplySink::new();
    let dispatcher = Dispatcher::new(config, Arc::new(downstream), Arc::new(replies));

    let handle = dispatcher.deliver_command(Command::new("ten_event"));
    let ForwardedCommand { results, .. } = forwarded.recv().await.unwrap();
    results.deliver(ResultValue::ok(object(json!({"usage": {"input_tokens": 10}}))));
    results.deliver(ResultValue::ok(object(json!({"usage": {"output_tokens": 4}}))).with_final(true));

    let (replied, reply) = reply_rx.recv().await.unwrap();
    assert_eq!(replied, handle);
    assert_eq!(
        reply.properties.get("usage"),
        Some(&json!({"input_tokens": 10, "output_tokens": 4}))
    );
}

#[tokio::test]
async fn test_pending_timeout_end_to_end() {
    let config = EventBusConfig {
        pending_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let (downstream, mut forwarded) = ChannelDownstream::new();
    let (replies, mut reply_rx) = ChannelReplySink::new();
    let dispatcher = Dispatcher::new(config, Arc::new(downstream), Arc::new(replies));
    let mut events = dispatcher.event_bus().subscribe();

    let handle = dispatcher.deliver_command(Command::new("ten_event"));
    let ForwardedCommand { results, .. } = forwarded.recv().await.unwrap();
    results.deliver(ResultValue::ok(object(json!({"partial_data": "data1"}))));

    let (replied, reply) = tokio::time::timeout(Duration::from_secs(5), reply_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replied, handle);
    assert_eq!(reply.status, StatusCode::Ok);
    assert_eq!(reply.properties.get("partial_data"), Some(&json!("data1")));

    let mut saw_expiry = false;
    while let Ok(event) = events.try_recv() {
        if let AggregatorEvent::ReplySent { reason, .. } = event {
            assert_eq!(reason.to_string(), "expired");
            saw_expiry = true;
        }
    }
    assert!(saw_expiry);
    assert_eq!(dispatcher.stats().expired, 1);
}

#[tokio::test]
async fn test_per_request_event_stream() {
    let (downstream, mut forwarded) = ChannelDownstream::new();
    let (replies, _reply_rx) = ChannelReplySink::new();
    let dispatcher = Dispatcher::new(EventBusConfig::default(), Arc::new(downstream), Arc::new(replies));

    let other = dispatcher.deliver_command(Command::new("ten_event"));
    let handle = dispatcher.deliver_command(Command::new("ten_event"));
    let mut events = dispatcher.event_bus().subscribe_request(handle);

    let first = forwarded.recv().await.unwrap();
    let second = forwarded.recv().await.unwrap();
    assert_eq!(first.results.handle(), other);
    first.results.deliver(ResultValue::ok(object(json!({"a": 1}))).with_final(true));
    second.results.deliver(ResultValue::error(Default::default()));

    match events.recv().await.unwrap() {
        AggregatorEvent::ReplySent { request_id, status, .. } => {
            assert_eq!(request_id, handle);
            assert_eq!(status, StatusCode::Error);
        }
        other => panic!("Unexpected event: {:?}", other),
    }
}
