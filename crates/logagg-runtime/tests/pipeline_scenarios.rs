use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use logagg_core::Config;
use logagg_runtime::poll_loop::{Orchestrator, run};
use logagg_runtime::pruner::prune_once;
use tokio_util::sync::CancellationToken;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid RFC3339")
        .with_timezone(&Utc)
}

fn t0() -> DateTime<Utc> {
    ts("2026-02-25T12:00:00Z")
}

/// Canonical temp root so paths compare equal to discovered ones.
fn root(dir: &tempfile::TempDir) -> PathBuf {
    fs::canonicalize(dir.path()).expect("test")
}

fn config(root: &Path) -> Config {
    Config {
        source_files: vec![format!("{}/*/*.log", root.display())],
        agg_window_ms: 5_000,
        ..Config::default()
    }
}

fn append(path: &Path, s: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("test");
    }
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("test");
    f.write_all(s.as_bytes()).expect("test");
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Sum of the `(occurred N time[s])` counts in an aggregate file.
fn total_count(lines: &[String]) -> u64 {
    lines
        .iter()
        .filter_map(|l| l.rsplit_once("(occurred "))
        .filter_map(|(_, tail)| tail.split_whitespace().next())
        .filter_map(|n| n.parse::<u64>().ok())
        .sum()
}

// ── Discovery ──────────────────────────────────────────────────────

#[tokio::test]
async fn file_created_after_startup_is_picked_up_next_tick() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let mut orch = Orchestrator::new(&config(&root)).expect("test");

    let report = orch.tick(t0()).await;
    assert_eq!(report.discovered, 0);

    let source = root.join("billing/service.log");
    append(&source, "INFO: ready\nINFO: ready\n");

    let report = orch.tick(t0() + TimeDelta::seconds(1)).await;
    assert_eq!(report.added, 1);
    assert_eq!(report.lines, 2, "content written before discovery is read");

    assert_eq!(orch.shutdown().await, 1);
    let out = read_lines(&root.join("billing/service-agg.log"));
    assert_eq!(out.len(), 1);
    assert!(out[0].ends_with("INFO: ready (occurred 2 times)"));
}

#[tokio::test]
async fn files_present_at_startup_skip_history() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let source = root.join("api/service.log");
    append(&source, "INFO: old\nINFO: old\n");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    let report = orch.tick(t0()).await;
    assert_eq!(report.added, 1);
    assert_eq!(report.lines, 0);

    append(&source, "WARN: new\n");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(1)).await.lines, 1);

    orch.shutdown().await;
    let out = read_lines(&root.join("api/service-agg.log"));
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("WARN: new"));
}

#[tokio::test]
async fn read_existing_aggregates_history() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    append(&root.join("api/service.log"), "INFO: old\nINFO: old\n");

    let cfg = Config {
        read_existing: true,
        ..config(&root)
    };
    let mut orch = Orchestrator::new(&cfg).expect("test");
    assert_eq!(orch.tick(t0()).await.lines, 2);
}

#[tokio::test]
async fn aggregate_outputs_are_never_tailed() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    append(&root.join("api/service.log"), "");
    append(&root.join("api/service-agg.log"), "[..] INFO: x (occurred 1 time)\n");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    let report = orch.tick(t0()).await;
    assert_eq!(report.discovered, 1);
    assert_eq!(orch.registry().lock().await.len(), 1);
}

#[tokio::test]
async fn vanished_source_is_flushed_and_retired() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let source = root.join("worker/service.log");
    append(&source, "");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    orch.tick(t0()).await;
    append(&source, "ERROR: lost connection\nERROR: lost connection\n");
    orch.tick(t0() + TimeDelta::seconds(1)).await;

    fs::remove_file(&source).expect("test");
    let report = orch.tick(t0() + TimeDelta::seconds(2)).await;
    assert_eq!(report.removed, 1);
    assert!(orch.registry().lock().await.is_empty());

    let out = read_lines(&root.join("worker/service-agg.log"));
    assert_eq!(out.len(), 1);
    assert!(out[0].ends_with("ERROR: lost connection (occurred 2 times)"));

    // Nothing left to flush on shutdown.
    assert_eq!(orch.shutdown().await, 0);
}

#[tokio::test]
async fn source_hidden_for_one_tick_resumes_without_rereading() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let source = root.join("api/service.log");
    let hidden = root.join("api/service.log.hidden");
    append(&source, "");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    orch.tick(t0()).await;
    append(&source, "INFO: ready\nINFO: ready\n");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(1)).await.lines, 2);

    fs::rename(&source, &hidden).expect("test");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(2)).await.removed, 1);

    fs::rename(&hidden, &source).expect("test");
    let report = orch.tick(t0() + TimeDelta::seconds(3)).await;
    assert_eq!(report.added, 1);
    assert_eq!(report.lines, 0, "already aggregated lines are not read again");

    append(&source, "INFO: ready\n");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(4)).await.lines, 1);

    orch.shutdown().await;
    let out = read_lines(&root.join("api/service-agg.log"));
    assert_eq!(out.len(), 2);
    assert_eq!(total_count(&out), 3);
}

#[tokio::test]
async fn startup_file_retried_after_failed_open_still_skips_history() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let source = root.join("api/service.log");
    append(&source, "INFO: old\nINFO: old\n");
    let output = root.join("api/service-agg.log");
    fs::create_dir_all(&output).expect("test");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    assert_eq!(orch.tick(t0()).await.added, 0);

    fs::remove_dir(&output).expect("test");
    let report = orch.tick(t0() + TimeDelta::seconds(1)).await;
    assert_eq!(report.added, 1);
    assert_eq!(report.lines, 0);

    append(&source, "WARN: new\n");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(2)).await.lines, 1);

    orch.shutdown().await;
    let out = read_lines(&output);
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("WARN: new"));
}

// ── Tailing ────────────────────────────────────────────────────────

#[tokio::test]
async fn truncated_source_resumes_from_start() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let source = root.join("api/service.log");
    append(&source, "");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    orch.tick(t0()).await;
    append(&source, "INFO: before rotation, a reasonably long line\n");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(1)).await.lines, 1);

    fs::write(&source, "INFO: after\n").expect("test");
    let report = orch.tick(t0() + TimeDelta::seconds(2)).await;
    assert_eq!(report.lines, 1);
    assert_eq!(report.failed, 0);

    append(&source, "INFO: after\n");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(3)).await.lines, 1);

    orch.shutdown().await;
    let out = read_lines(&root.join("api/service-agg.log"));
    assert_eq!(out.len(), 2);
    assert!(out.iter().any(|l| l.ends_with("INFO: after (occurred 2 times)")));
}

// ── Pruning and flush accounting ──────────────────────────────────

#[tokio::test]
async fn prune_sweep_flushes_quiet_keys_once() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let source = root.join("api/service.log");
    append(&source, "");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    orch.tick(t0()).await;
    append(&source, "INFO: a\nINFO: a\nINFO: b\n");
    orch.tick(t0() + TimeDelta::seconds(1)).await;
    append(&source, "INFO: b\n");
    orch.tick(t0() + TimeDelta::seconds(4)).await;

    let registry = orch.registry();
    // a last seen at 1s, b at 4s; at 7s only a is stale.
    assert_eq!(prune_once(&registry, t0() + TimeDelta::seconds(7)).await, 1);
    assert_eq!(prune_once(&registry, t0() + TimeDelta::seconds(7)).await, 0);
    assert_eq!(prune_once(&registry, t0() + TimeDelta::seconds(10)).await, 1);

    assert_eq!(orch.shutdown().await, 0);
    let out = read_lines(&root.join("api/service-agg.log"));
    assert_eq!(out.len(), 2);
    assert_eq!(total_count(&out), 4);
}

#[tokio::test]
async fn emitted_counts_match_raw_occurrences() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    let source = root.join("api/service.log");
    append(&source, "");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    orch.tick(t0()).await;

    let registry = orch.registry();
    let mut raw = 0u64;
    for second in 1..=30 {
        append(&source, "WARN: retrying upstream\nINFO: heartbeat\n");
        raw += 2;
        let now = t0() + TimeDelta::seconds(second);
        orch.tick(now).await;
        if second % 4 == 0 {
            prune_once(&registry, now).await;
        }
    }
    orch.shutdown().await;

    let out = read_lines(&root.join("api/service-agg.log"));
    assert!(out.len() > 2, "window expiry emits periodically");
    assert_eq!(total_count(&out), raw);
}

// ── Failure isolation ──────────────────────────────────────────────

#[tokio::test]
async fn unopenable_output_does_not_block_other_files() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    append(&root.join("bad/service.log"), "");
    // A directory where the aggregate file should go.
    fs::create_dir_all(root.join("bad/service-agg.log")).expect("test");
    let good = root.join("good/service.log");
    append(&good, "");

    let mut orch = Orchestrator::new(&config(&root)).expect("test");
    let report = orch.tick(t0()).await;
    assert_eq!(report.discovered, 2);
    assert_eq!(report.added, 1);

    append(&good, "INFO: fine\n");
    assert_eq!(orch.tick(t0() + TimeDelta::seconds(1)).await.lines, 1);
    assert_eq!(orch.shutdown().await, 1);
    assert_eq!(read_lines(&root.join("good/service-agg.log")).len(), 1);
}

// ── Full loop ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_flushes_everything_on_cancel() {
    let dir = tempfile::tempdir().expect("test");
    let root = root(&dir);
    append(
        &root.join("api/service.log"),
        "ERROR: disk full\nERROR: disk full\nINFO: started\n",
    );

    let cfg = Config {
        read_existing: true,
        agg_window_ms: 60_000,
        prune_interval_ms: 1_000,
        poll_interval_ms: 20,
        ..config(&root)
    };
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { run(&cfg, cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("shutdown within timeout")
        .expect("task joined")
        .expect("run ok");

    let out = read_lines(&root.join("api/service-agg.log"));
    assert_eq!(out.len(), 2);
    assert!(out.iter().any(|l| l.ends_with("ERROR: disk full (occurred 2 times)")));
    assert!(out.iter().any(|l| l.ends_with("INFO: started (occurred 1 time)")));
}
