//! Poll loop: discovery → reconcile → ingest, plus the pruner task and
//! flush-on-shutdown.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use logagg_core::{Config, LineParser};
use logagg_tail::{DiscoveredFile, TailCursor, discover};

use crate::pipeline::{FilePipeline, PipelineSettings, StartAt};
use crate::pruner::run_pruner;
use crate::registry::{Registry, SharedRegistry};

/// What one tick did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub discovered: usize,
    pub added: usize,
    pub removed: usize,
    pub lines: usize,
    pub flushed: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    patterns: Vec<String>,
    settings: PipelineSettings,
    read_existing: bool,
    parser: Arc<LineParser>,
    registry: SharedRegistry,
    first_pass_done: bool,
    /// Found on the first pass but not yet opened; these honour `read_existing`.
    startup_pending: HashSet<PathBuf>,
    /// Read positions of pipelines retired because their path stopped matching.
    retired: HashMap<PathBuf, TailCursor>,
}

impl Orchestrator {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let parser = LineParser::with_masks(config.mask_rules()?);
        Ok(Self {
            patterns: config.source_files.clone(),
            settings: PipelineSettings {
                window: config.agg_window(),
                max_entries: config.max_entries,
                output_suffix: config.output_suffix.clone(),
            },
            read_existing: config.read_existing,
            parser: Arc::new(parser),
            registry: Registry::shared(),
            first_pass_done: false,
            startup_pending: HashSet::new(),
            retired: HashMap::new(),
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// One poll tick. Lines read during this tick are observed at `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let patterns = self.patterns.clone();
        let suffix = self.settings.output_suffix.clone();
        let discovered =
            match tokio::task::spawn_blocking(move || discover(&patterns, &suffix)).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::error!("discovery task failed: {e}");
                    return TickReport::default();
                }
            };

        let mut report = TickReport {
            discovered: discovered.len(),
            ..TickReport::default()
        };
        let (added, removed) = self.reconcile(discovered).await;
        report.added = added;
        report.removed = removed;

        self.ingest_all(now, &mut report).await;
        report
    }

    /// Start pipelines for new paths and retire those that vanished.
    async fn reconcile(&mut self, discovered: Vec<DiscoveredFile>) -> (usize, usize) {
        if !self.first_pass_done {
            self.first_pass_done = true;
            self.startup_pending = discovered.iter().map(|f| f.path.clone()).collect();
        }

        let (vanished, fresh) = {
            let mut registry = self.registry.lock().await;
            let current: HashSet<&Path> = discovered.iter().map(|f| f.path.as_path()).collect();
            let vanished = registry.retain_only(&current);
            let fresh: Vec<DiscoveredFile> = discovered
                .iter()
                .filter(|f| !registry.contains(&f.path))
                .cloned()
                .collect();
            (vanished, fresh)
        };
        let removed = vanished.len();

        if !vanished.is_empty() {
            let teardown = tokio::task::spawn_blocking(move || {
                vanished
                    .into_iter()
                    .map(|pipeline| {
                        let flushed = pipeline.flush_all();
                        tracing::info!(
                            path = %pipeline.source().display(),
                            flushed,
                            "source file gone, pipeline retired"
                        );
                        (pipeline.source().to_path_buf(), pipeline.cursor())
                    })
                    .collect::<Vec<_>>()
            });
            match teardown.await {
                Ok(cursors) => self.retired.extend(cursors),
                Err(e) => tracing::error!("teardown task failed: {e}"),
            }
        }

        if fresh.is_empty() {
            return (0, removed);
        }

        let settings = self.settings.clone();
        let parser = Arc::clone(&self.parser);
        let planned: Vec<(DiscoveredFile, StartAt)> = fresh
            .into_iter()
            .map(|file| {
                let start = self.start_for(&file.path);
                (file, start)
            })
            .collect();
        let opened = tokio::task::spawn_blocking(move || {
            planned
                .into_iter()
                .map(|(file, start)| {
                    let result = FilePipeline::open(&file, &settings, Arc::clone(&parser), start);
                    (file, start, result)
                })
                .collect::<Vec<_>>()
        })
        .await;
        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!("pipeline setup task failed: {e}");
                return (0, removed);
            }
        };

        let mut added = 0;
        let mut registry = self.registry.lock().await;
        for (file, start, result) in opened {
            match result {
                Ok(pipeline) => {
                    tracing::info!(
                        path = %file.path.display(),
                        pattern = %file.pattern,
                        output = %pipeline.output_path().display(),
                        ?start,
                        "watching source file"
                    );
                    self.retired.remove(&file.path);
                    self.startup_pending.remove(&file.path);
                    registry.insert(pipeline);
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %file.path.display(),
                        error = %e,
                        "cannot start pipeline, retrying next tick"
                    );
                }
            }
        }
        (added, removed)
    }

    /// Returning paths resume where they stopped. Files present at startup
    /// skip their history unless `read_existing`; anything else is new and
    /// read in full.
    fn start_for(&self, path: &Path) -> StartAt {
        if let Some(cursor) = self.retired.get(path) {
            StartAt::Resume(*cursor)
        } else if self.startup_pending.contains(path) && !self.read_existing {
            StartAt::End
        } else {
            StartAt::Start
        }
    }

    /// Ingest every live file in parallel; one blocking task per file.
    async fn ingest_all(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let pipelines = self.registry.lock().await.snapshot();
        let mut tasks = JoinSet::new();
        for pipeline in pipelines {
            tasks.spawn_blocking(move || {
                let result = pipeline.ingest(now);
                (pipeline, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(stats))) => {
                    report.lines += stats.lines;
                    report.flushed += stats.flushed;
                }
                Ok((pipeline, Err(e))) => {
                    report.failed += 1;
                    if e.is_not_found() {
                        tracing::debug!(
                            path = %pipeline.source().display(),
                            "source missing, waiting for discovery to retire it"
                        );
                    } else if pipeline.read_failures() == 1 {
                        tracing::warn!(
                            path = %pipeline.source().display(),
                            error = %e,
                            "read failed, retrying next tick"
                        );
                    } else {
                        tracing::debug!(
                            path = %pipeline.source().display(),
                            failures = pipeline.read_failures(),
                            error = %e,
                            "read still failing"
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("file pipeline task failed: {e}");
                }
            }
        }
    }

    /// Flush every live record of every file and close all outputs.
    pub async fn shutdown(&self) -> usize {
        let pipelines = self.registry.lock().await.drain();
        let flush = tokio::task::spawn_blocking(move || {
            pipelines.iter().map(|p| p.flush_all()).sum::<usize>()
        });
        match flush.await {
            Ok(flushed) => flushed,
            Err(e) => {
                tracing::error!("final flush task failed: {e}");
                0
            }
        }
    }
}

/// Run until `cancel` fires, then flush everything and return.
pub async fn run(config: &Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut orchestrator = Orchestrator::new(config)?;

    let pruner = tokio::spawn(run_pruner(
        orchestrator.registry(),
        config.prune_interval(),
        cancel.child_token(),
    ));

    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = orchestrator.tick(Utc::now()).await;
                if report.added > 0 || report.removed > 0 || report.flushed > 0 {
                    tracing::debug!(?report, "poll tick");
                }
            }
        }
    }

    tracing::info!("shutdown requested, flushing aggregates");
    if let Err(e) = pruner.await {
        tracing::warn!("pruner task ended abnormally: {e}");
    }
    let flushed = orchestrator.shutdown().await;
    tracing::info!(flushed, "all aggregates flushed");
    Ok(())
}
