// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Stress command
//!
//! Wires a [`Dispatcher`] to an in-process streaming extension, pushes many
//! concurrent requests through it and checks that every request received
//! exactly one reply with the expected status and merged data.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use futures::future::join_all;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use eventbus_core::application::dispatcher::{Dispatcher, Downstream, ResultSink};
use eventbus_core::application::stats::StatsSnapshot;
use eventbus_core::domain::command::{Command, Properties, RequestHandle};
use eventbus_core::domain::config::EventBusConfig;
use eventbus_core::domain::result::{CommandReply, ResultValue, StatusCode};
use eventbus_core::infrastructure::channel::{
    ChannelDownstream, ChannelReplySink, ForwardedCommand, UnconnectedDownstream,
};

/// Quiet period after the last expected reply in which nothing else may arrive.
const SETTLE_PERIOD: Duration = Duration::from_millis(200);

#[derive(Args, Debug, Clone)]
pub struct StressArgs {
    /// Number of forwarded requests
    #[arg(short, long, default_value = "100")]
    pub requests: usize,

    /// Concurrent producer tasks per request
    #[arg(short, long, default_value = "4")]
    pub producers: usize,

    /// Partial results sent by each producer
    #[arg(long, default_value = "10")]
    pub partials: usize,

    /// End every Nth request with an error result instead of a final one
    #[arg(long, value_name = "N")]
    pub error_every: Option<usize>,

    /// Extra deliveries sent after each request has completed
    #[arg(long, default_value = "0")]
    pub late: usize,

    /// Commands sent under an unsupported name
    #[arg(long, default_value = "0")]
    pub unsupported: usize,

    /// Run without a downstream; every request is echoed back
    #[arg(long)]
    pub unconnected: bool,

    /// Seconds to wait for all replies
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub metrics: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl Default for StressArgs {
    fn default() -> Self {
        Self {
            requests: 100,
            producers: 4,
            partials: 10,
            error_every: None,
            late: 0,
            unsupported: 0,
            unconnected: false,
            timeout: 30,
            metrics: false,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Merged,
    Failed,
    Echo,
    Rejected,
}

impl Expected {
    fn status(self) -> StatusCode {
        match self {
            Expected::Merged | Expected::Echo => StatusCode::Ok,
            Expected::Failed | Expected::Rejected => StatusCode::Error,
        }
    }
}

fn expected_for(args: &StressArgs, index: usize) -> Expected {
    if args.unconnected {
        return Expected::Echo;
    }
    match args.error_every {
        Some(n) if n > 0 && index % n == n - 1 => Expected::Failed,
        _ => Expected::Merged,
    }
}

#[derive(Debug)]
pub struct StressReport {
    pub requests: usize,
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
    pub in_flight: usize,
    pub violations: Vec<String>,
}

pub async fn execute(args: StressArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = EventBusConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let prometheus = if args.metrics {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install metrics recorder")?,
        )
    } else {
        None
    };

    let report = run(&args, config).await?;

    if args.json {
        let summary = json!({
            "requests": report.requests,
            "elapsed_ms": report.elapsed.as_millis() as u64,
            "in_flight": report.in_flight,
            "violations": report.violations,
            "stats": report.stats,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&report);
    }

    if let Some(handle) = prometheus {
        println!();
        print!("{}", handle.render());
    }

    if !report.violations.is_empty() {
        bail!(
            "{} of {} requests violated the single-reply guarantee",
            report.violations.len(),
            report.requests
        );
    }

    Ok(())
}

/// Drive one workload to completion and check every reply.
pub async fn run(args: &StressArgs, config: EventBusConfig) -> Result<StressReport> {
    if args.error_every == Some(0) {
        bail!("--error-every must be at least 1");
    }

    let (replies, mut reply_rx) = ChannelReplySink::new();
    let downstream: Arc<dyn Downstream> = if args.unconnected {
        Arc::new(UnconnectedDownstream)
    } else {
        let (downstream, forwarded) = ChannelDownstream::new();
        spawn_extension(forwarded, args.clone());
        Arc::new(downstream)
    };
    let event_command = config.event_command_name.clone();
    let dispatcher = Dispatcher::new(config, downstream, Arc::new(replies));

    info!(
        requests = args.requests,
        producers = args.producers,
        partials = args.partials,
        unsupported = args.unsupported,
        "Starting stress run"
    );
    let started = Instant::now();

    let mut expected: HashMap<RequestHandle, (Expected, Command)> =
        HashMap::with_capacity(args.requests + args.unsupported);
    for index in 0..args.requests {
        let command = Command::new(event_command.as_str())
            .with_property("cmd_index", index)
            .with_property("producers", args.producers);
        let handle = dispatcher.deliver_command(command.clone());
        expected.insert(handle, (expected_for(args, index), command));
    }
    for index in 0..args.unsupported {
        let command =
            Command::new(format!("{event_command}_unsupported")).with_property("cmd_index", index);
        let handle = dispatcher.deliver_command(command.clone());
        expected.insert(handle, (Expected::Rejected, command));
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout);
    let mut received: HashMap<RequestHandle, Vec<CommandReply>> = HashMap::new();
    for count in 0..expected.len() {
        let (handle, reply) = tokio::time::timeout_at(deadline, reply_rx.recv())
            .await
            .with_context(|| {
                format!(
                    "Timed out after {}s with {}/{} replies",
                    args.timeout,
                    count,
                    expected.len()
                )
            })?
            .context("Reply channel closed")?;
        received.entry(handle).or_default().push(reply);
    }
    let elapsed = started.elapsed();

    // Late deliveries are still in flight; none of them may produce a reply
    tokio::time::sleep(SETTLE_PERIOD).await;
    while let Ok((handle, reply)) = reply_rx.try_recv() {
        received.entry(handle).or_default().push(reply);
    }

    let mut violations = verify(args, &expected, &received);
    let in_flight = dispatcher.in_flight();
    if in_flight > 0 {
        violations.push(format!("{in_flight} requests still in flight"));
    }

    Ok(StressReport {
        requests: expected.len(),
        elapsed,
        stats: dispatcher.stats(),
        in_flight,
        violations,
    })
}

fn verify(
    args: &StressArgs,
    expected: &HashMap<RequestHandle, (Expected, Command)>,
    received: &HashMap<RequestHandle, Vec<CommandReply>>,
) -> Vec<String> {
    let mut violations = Vec::new();

    for handle in received.keys().filter(|h| !expected.contains_key(*h)) {
        violations.push(format!("{handle}: reply for unknown request"));
    }

    for (handle, (outcome, command)) in expected {
        let replies = received.get(handle).map(Vec::as_slice).unwrap_or_default();
        let reply = match replies {
            [reply] => reply,
            _ => {
                violations.push(format!("{handle}: {} replies", replies.len()));
                continue;
            }
        };

        if reply.status != outcome.status() {
            violations.push(format!(
                "{handle}: expected {} reply, got {}",
                outcome.status(),
                reply.status
            ));
            continue;
        }

        match outcome {
            Expected::Echo if &reply.properties != command.properties() => {
                violations.push(format!("{handle}: echo does not match command"));
            }
            Expected::Merged => {
                if let Some(problem) = check_merged(args, command, &reply.properties) {
                    violations.push(format!("{handle}: {problem}"));
                }
            }
            _ => {}
        }
    }

    violations
}

fn check_merged(args: &StressArgs, command: &Command, merged: &Properties) -> Option<String> {
    if merged.get("status") != Some(&json!("completed")) {
        return Some("final result missing from merge".to_string());
    }
    if merged.get("cmd_index") != command.properties().get("cmd_index") {
        return Some("reply belongs to another request".to_string());
    }
    if args.partials == 0 {
        return None;
    }
    let last = json!(args.partials - 1);
    (0..args.producers)
        .map(|producer| format!("producer_{producer}"))
        .find(|key| merged.get(key) != Some(&last))
        .map(|key| format!("{key} not merged up to its last partial"))
}

fn spawn_extension(mut forwarded: mpsc::UnboundedReceiver<ForwardedCommand>, args: StressArgs) {
    tokio::spawn(async move {
        while let Some(ForwardedCommand { command, results }) = forwarded.recv().await {
            tokio::spawn(answer(command, results, args.clone()));
        }
        debug!("Downstream channel closed");
    });
}

/// Play a streaming extension: concurrent producers send partial results,
/// then one terminal result, then any configured late deliveries.
async fn answer(command: Command, results: ResultSink, args: StressArgs) {
    let index = command
        .properties()
        .get("cmd_index")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;

    let producers = (0..args.producers).map(|producer| {
        let results = results.clone();
        let partials = args.partials;
        tokio::spawn(async move {
            for part in 0..partials {
                let props = partial(producer, part);
                // Odd parts take the wire path a real extension would use
                if part % 2 == 1 {
                    match serde_json::to_vec(&props) {
                        Ok(payload) => results.deliver_json(StatusCode::Ok, false, &payload),
                        Err(e) => warn!("Failed to encode partial result: {}", e),
                    }
                } else {
                    results.deliver(ResultValue::ok(props));
                }
                tokio::task::yield_now().await;
            }
        })
    });
    for joined in join_all(producers).await {
        if let Err(e) = joined {
            warn!(request_id = %results.handle(), "Producer task failed: {}", e);
        }
    }

    let terminal = match expected_for(&args, index) {
        Expected::Failed => {
            ResultValue::error(Properties::new()).with_property("error", "injected_failure")
        }
        _ => ResultValue::ok(Properties::new())
            .with_property("status", "completed")
            .with_property("cmd_index", index)
            .with_final(true),
    };
    results.deliver(terminal);

    for i in 0..args.late {
        let late = match i % 3 {
            0 => ResultValue::ok(Properties::new()).with_property("late", i),
            1 => ResultValue::ok(Properties::new())
                .with_property("late", i)
                .with_final(true),
            _ => ResultValue::error(Properties::new()),
        };
        results.deliver(late);
    }
}

fn partial(producer: usize, part: usize) -> Properties {
    let mut props = Properties::new();
    props.insert("step".to_string(), json!("processing"));
    props.insert("counter".to_string(), json!(part));
    props.insert(format!("producer_{producer}"), json!(part));
    props
}

fn print_summary(report: &StressReport) {
    let stats = &report.stats;
    let seconds = report.elapsed.as_secs_f64();
    let rate = if seconds > 0.0 {
        report.requests as f64 / seconds
    } else {
        0.0
    };

    println!("{}", "Stress run:".bold());
    println!("  Requests: {} in {:.2?} ({:.0}/s)", report.requests, report.elapsed, rate);
    println!(
        "  Commands: {} received, {} forwarded, {} rejected",
        stats.received, stats.forwarded, stats.rejected
    );
    println!(
        "  Deliveries: {} total, {} merged, {} discarded",
        stats.deliveries, stats.merged, stats.discarded
    );
    println!(
        "  Replies: {} ok, {} error, {} expired",
        stats.replies_ok, stats.replies_error, stats.expired
    );
    println!();

    if report.violations.is_empty() {
        println!("{}", "✓ Every request received exactly one reply".green());
    } else {
        println!("{}", "✗ Violations:".red().bold());
        for violation in report.violations.iter().take(20) {
            println!("  {}", violation.red());
        }
        if report.violations.len() > 20 {
            println!("  ... and {} more", report.violations.len() - 20);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> StressArgs {
        StressArgs {
            requests: 20,
            producers: 3,
            partials: 5,
            timeout: 10,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_is_exactly_once() {
        let report = run(&small(), EventBusConfig::default()).await.unwrap();

        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.stats.forwarded, 20);
        assert_eq!(report.stats.merged, 20 * 3 * 5);
        assert_eq!(report.stats.replies_ok, 20);
        assert_eq!(report.in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_with_errors_late_and_unsupported() {
        let args = StressArgs {
            error_every: Some(4),
            late: 6,
            unsupported: 3,
            ..small()
        };
        let report = run(&args, EventBusConfig::default()).await.unwrap();

        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.requests, 23);
        assert_eq!(report.stats.rejected, 3);
        assert_eq!(report.stats.replies_error, 5 + 3);
        assert_eq!(report.stats.replies_ok, 15);
        assert_eq!(report.stats.discarded, 20 * 6);
    }

    #[tokio::test]
    async fn test_run_unconnected_echoes() {
        let args = StressArgs {
            unconnected: true,
            ..small()
        };
        let report = run(&args, EventBusConfig::default()).await.unwrap();

        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.stats.replies_ok, 20);
        assert_eq!(report.stats.merged, 0);
    }

    #[tokio::test]
    async fn test_zero_error_interval_rejected() {
        let args = StressArgs {
            error_every: Some(0),
            ..small()
        };
        assert!(run(&args, EventBusConfig::default()).await.is_err());
    }

    #[test]
    fn test_expected_outcomes() {
        let args = StressArgs {
            error_every: Some(3),
            ..Default::default()
        };
        assert_eq!(expected_for(&args, 0), Expected::Merged);
        assert_eq!(expected_for(&args, 2), Expected::Failed);
        assert_eq!(expected_for(&args, 5), Expected::Failed);

        let unconnected = StressArgs {
            unconnected: true,
            ..args
        };
        assert_eq!(expected_for(&unconnected, 2), Expected::Echo);
    }

    #[test]
    fn test_verify_flags_duplicate_and_missing_replies() {
        let args = StressArgs::default();
        let first = RequestHandle::new();
        let second = RequestHandle::new();
        let expected = HashMap::from([
            (first, (Expected::Rejected, Command::new("x"))),
            (second, (Expected::Rejected, Command::new("y"))),
        ]);
        let received = HashMap::from([(first, vec![CommandReply::error(), CommandReply::error()])]);

        let violations = verify(&args, &expected, &received);
        assert_eq!(violations.len(), 2);
    }
}
