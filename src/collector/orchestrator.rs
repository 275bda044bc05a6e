//! Bulk collection orchestrator
//!
//! Drives a sweep of one target through `Initializing → Running →
//! {Completed | Aborted | Paused}`. A single task owns the collection state;
//! up to `concurrency` page fetches run concurrently in a
//! [`FuturesUnordered`] pool and their results are absorbed as they complete.
//! On abort or pause the pool is dropped, so no request is sent after the
//! stop is observed, and one final checkpoint is written.

use super::accumulator::Accumulator;
use super::frontier::{Completion, Frontier};
use super::progress::{ProgressHandle, ProgressSnapshot, ProgressState, RunPhase};
use super::stats::RunStats;
use super::CollectError;
use crate::fetcher::{PageFetcher, PageResult};
use crate::metrics;
use crate::output::{ExportConfig, ExportSink};
use crate::registry::{StrategyConfig, TargetConfig, DEFAULT_STATE_DIR};
use crate::resume::{CheckpointStore, CollectionState, Cursor, ResumeError};
use crate::retry::{FailureKind, RetryPolicy};
use crate::shutdown::{SharedShutdown, ShutdownReason};
use crate::transport::{RateLimiter, ReqwestTransport, Transport};
use crate::PageRequest;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The window was exhausted
    Completed,
    /// Authentication failure or failure-rate ceiling
    Aborted(String),
    /// Operator interrupt; resume with `--resume`
    Paused,
}

impl RunOutcome {
    /// Process exit code: 0 completed, 1 aborted, 2 paused
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Aborted(_) => 1,
            RunOutcome::Paused => 2,
        }
    }

    /// Terminal phase for this outcome
    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::Completed => RunPhase::Completed,
            RunOutcome::Aborted(_) => RunPhase::Aborted,
            RunOutcome::Paused => RunPhase::Paused,
        }
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Target id
    pub target: String,
    /// How the run ended
    pub outcome: RunOutcome,
    /// Counters
    pub stats: RunStats,
    /// Distinct items held after the run
    pub collected: usize,
    /// Checkpointed resume position
    pub cursor: Cursor,
    /// Known collection size
    pub total_target: Option<u64>,
    /// Ordinals that failed permanently (all runs)
    pub failed_ordinals: usize,
}

/// Mutable state of one run, owned by the orchestrator loop
struct RunContext {
    state: CollectionState,
    frontier: Frontier,
    accumulator: Accumulator,
    sink: Option<Box<dyn ExportSink>>,
    stats: RunStats,
    progress: ProgressState,
    accepted_since_checkpoint: u64,
    last_checkpoint: Instant,
}

/// Sweeps one target
pub struct Orchestrator {
    target: TargetConfig,
    fetcher: PageFetcher,
    store: CheckpointStore,
    export: Option<ExportConfig>,
    shutdown: SharedShutdown,
    progress: ProgressHandle,
}

impl Orchestrator {
    /// Orchestrator using the HTTP transport described by the target's settings
    pub fn from_target(target: &TargetConfig, shutdown: SharedShutdown) -> Result<Self, CollectError> {
        target.validate().map_err(CollectError::Config)?;
        let settings = &target.settings;

        let mut transport = ReqwestTransport::new(settings.concurrency, settings.request_timeout())?;
        if let Some(per_minute) = settings.requests_per_minute {
            transport = transport.with_rate_limiter(RateLimiter::per_minute(per_minute));
        }

        Ok(Self::with_transport(target, Arc::new(transport), shutdown))
    }

    /// Orchestrator over an arbitrary transport
    pub fn with_transport(
        target: &TargetConfig,
        transport: Arc<dyn Transport>,
        shutdown: SharedShutdown,
    ) -> Self {
        let fetcher = PageFetcher::new(target, transport).with_shutdown(shutdown.clone());
        Self {
            store: CheckpointStore::new(DEFAULT_STATE_DIR, &target.id),
            export: target.export.clone(),
            target: target.clone(),
            fetcher,
            shutdown,
            progress: ProgressHandle::default(),
        }
    }

    /// Keep checkpoints under `dir`
    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.store = CheckpointStore::new(dir, &self.target.id);
        self
    }

    /// Use an explicit checkpoint store
    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = store;
        self
    }

    /// Override the export sink configuration
    pub fn with_export(mut self, export: Option<ExportConfig>) -> Self {
        self.export = export;
        self
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.fetcher = self.fetcher.with_policy(policy);
        self
    }

    /// Handle for reading progress while the run is in flight
    pub fn progress_handle(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Checkpoint store in use
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run the sweep.
    ///
    /// With `resume`, an existing checkpoint is continued; without it, an
    /// existing checkpoint is an error so it is never silently overwritten.
    pub async fn run(self, resume: bool) -> Result<RunReport, CollectError> {
        let span = info_span!("harvest_run", target = %self.target.id, resume);
        self.run_inner(resume).instrument(span).await
    }

    async fn run_inner(self, resume: bool) -> Result<RunReport, CollectError> {
        let settings = self.target.settings.clone();
        info!(
            concurrency = settings.concurrency,
            max_attempts = settings.max_attempts,
            state = %self.store.state_path().display(),
            "Starting collection run"
        );

        let _lock = self.store.lock()?;
        let mut state = self.prepare_state(resume)?;
        state.begin_run();
        let mut stats = RunStats::new(&self.target.id);

        if state.total_target().is_none() {
            self.seed_total(&mut state, &mut stats).await;
        }

        let sink = match &self.export {
            Some(config) => Some(config.open()?),
            None => None,
        };
        let accumulator = if sink.is_some() {
            Accumulator::with_export()
        } else {
            Accumulator::new()
        };

        let frontier = Frontier::new(&self.target.strategy, &state, settings.empty_threshold);
        let progress = ProgressState::new(
            state.collected_count() as u64,
            state.total_target(),
            settings.progress_interval(),
        );
        let mut ctx = RunContext {
            state,
            frontier,
            accumulator,
            sink,
            stats,
            progress,
            accepted_since_checkpoint: 0,
            last_checkpoint: Instant::now(),
        };
        self.publish(RunPhase::Running, &ctx);

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + settings.progress_interval(),
            settings.progress_interval(),
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Time-based saves must fire while every request sits in backoff
        let mut checkpoint_timer = tokio::time::interval_at(
            tokio::time::Instant::now() + settings.checkpoint_interval(),
            settings.checkpoint_interval(),
        );
        checkpoint_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut pool = FuturesUnordered::new();
        loop {
            if self.shutdown.is_shutdown_requested() {
                break;
            }

            while pool.len() < settings.concurrency {
                let Some(ordinal) = ctx.frontier.next_ordinal() else {
                    break;
                };
                let request = self.request_for(ordinal);
                ctx.stats.record_issued();
                let fetcher = &self.fetcher;
                pool.push(async move {
                    let result = fetcher.fetch_page(&request).await;
                    (ordinal, result)
                });
            }

            if pool.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.wait_for_shutdown() => break,
                Some((ordinal, result)) = pool.next() => {
                    self.handle_result(ordinal, result, &mut ctx);
                    self.maybe_checkpoint(&mut ctx);
                    self.publish(RunPhase::Running, &ctx);
                }
                _ = checkpoint_timer.tick() => {
                    self.maybe_checkpoint(&mut ctx);
                    self.publish(RunPhase::Running, &ctx);
                }
                _ = ticker.tick() => self.log_progress(&mut ctx),
            }
        }

        let abandoned = pool.len();
        drop(pool);
        if abandoned > 0 {
            info!(abandoned, "Dropped in-flight requests");
        }

        let outcome = match self.shutdown.reason() {
            Some(ShutdownReason::Abort(cause)) => RunOutcome::Aborted(cause.clone()),
            Some(ShutdownReason::Interrupt) if !ctx.frontier.is_exhausted() => RunOutcome::Paused,
            _ => RunOutcome::Completed,
        };

        self.finish(outcome, ctx)
    }

    fn prepare_state(&self, resume: bool) -> Result<CollectionState, CollectError> {
        match (self.store.load_for(&self.target)?, resume) {
            (Some(state), true) => {
                info!(
                    collected = state.collected_count(),
                    cursor = %state.cursor(),
                    runs = state.run_count(),
                    "Resuming from checkpoint"
                );
                Ok(state)
            }
            (Some(_), false) => Err(CollectError::CheckpointExists {
                path: self.store.state_path().to_path_buf(),
            }),
            (None, resume) => {
                if resume {
                    warn!("No checkpoint to resume from; starting a fresh sweep");
                }
                Ok(CollectionState::new(&self.target.id, &self.target.strategy))
            }
        }
    }

    async fn seed_total(&self, state: &mut CollectionState, stats: &mut RunStats) {
        match self.fetcher.fetch_count().await {
            Ok(Some(total)) => {
                info!(total, "Collection size reported by count query");
                state.set_total_target(Some(total));
            }
            Ok(None) => {}
            Err(failure) if failure.kind == FailureKind::Cancelled => {}
            Err(failure) if failure.kind.is_auth() => {
                stats.record_failure(&failure);
                error!(error = %failure, "Count query rejected credentials");
                self.shutdown
                    .request_abort(format!("authentication failed on count query: {failure}"));
            }
            Err(failure) => {
                warn!(error = %failure, "Count query failed; continuing without a total");
            }
        }
    }

    fn request_for(&self, ordinal: u64) -> PageRequest {
        match &self.target.strategy {
            StrategyConfig::Paged { page_size, .. } => PageRequest::page(ordinal, *page_size),
            StrategyConfig::IdSweep { .. } => PageRequest::id(ordinal),
        }
    }

    fn handle_result(&self, ordinal: u64, result: PageResult, ctx: &mut RunContext) {
        let key = ctx.state.cursor().key_for(ordinal);

        match result {
            Ok(page) => {
                if let Some(total) = page.total_known {
                    if !self.target.strategy.is_id_sweep() && ctx.state.total_target() != Some(total) {
                        debug!(total, "Collection size reported by page");
                        ctx.state.set_total_target(Some(total));
                        ctx.progress.total_expected = Some(total);
                        ctx.frontier.observe_total(total);
                    }
                }

                let empty = page.items.is_empty();
                ctx.stats.record_success(&page.retried, empty);
                let summary = ctx.accumulator.absorb(&mut ctx.state, page.items);
                ctx.stats.record_absorb(summary);
                ctx.progress.update(summary.added);
                ctx.accepted_since_checkpoint += summary.accepted();

                ctx.state.clear_failed(ordinal);
                if empty {
                    debug!(%key, "Empty result");
                    ctx.frontier.complete(ordinal, Completion::Absent);
                } else {
                    ctx.state.note_present(ordinal);
                    ctx.frontier.complete(ordinal, Completion::Present);
                }
            }
            Err(failure) if failure.kind == FailureKind::Cancelled => {
                debug!(%key, "Request abandoned on shutdown");
                return;
            }
            Err(failure) if failure.kind == FailureKind::TerminalNotFound => {
                debug!(%key, "Not found");
                ctx.stats.record_not_found(&failure.retried);
                ctx.state.clear_failed(ordinal);
                ctx.frontier.complete(ordinal, Completion::Absent);
            }
            Err(failure) if failure.kind.is_auth() => {
                ctx.stats.record_failure(&failure);
                error!(
                    %key,
                    status = ?failure.status,
                    message = %failure.message,
                    "Authentication rejected; aborting run"
                );
                self.shutdown
                    .request_abort(format!("authentication failed on {key}: {failure}"));
                return;
            }
            Err(failure) => {
                ctx.stats.record_failure(&failure);
                error!(
                    %key,
                    kind = %failure.kind,
                    status = ?failure.status,
                    attempts = failure.attempts,
                    message = %failure.message,
                    "Request failed permanently"
                );
                ctx.state.mark_failed(ordinal);
                ctx.frontier.complete(ordinal, Completion::Failed);
                self.check_failure_rate(&ctx.stats);
            }
        }

        let cursor = ctx.state.cursor().at(ctx.frontier.watermark());
        ctx.state.set_cursor(cursor);
    }

    fn check_failure_rate(&self, stats: &RunStats) {
        let settings = &self.target.settings;
        if stats.issued < settings.failure_rate_min_requests {
            return;
        }
        let rate = stats.failure_rate();
        if rate > settings.failure_rate_threshold {
            error!(
                failed = stats.failed,
                issued = stats.issued,
                rate,
                threshold = settings.failure_rate_threshold,
                "Failure rate exceeded; aborting run"
            );
            self.shutdown.request_abort(format!(
                "failure rate {:.0}% exceeded {:.0}% after {} requests",
                rate * 100.0,
                settings.failure_rate_threshold * 100.0,
                stats.issued
            ));
        }
    }

    fn maybe_checkpoint(&self, ctx: &mut RunContext) {
        let settings = &self.target.settings;
        let due = ctx.accepted_since_checkpoint >= settings.checkpoint_every_items
            || ctx.last_checkpoint.elapsed() >= settings.checkpoint_interval();
        if !due {
            return;
        }
        if let Err(e) = self.checkpoint(ctx) {
            warn!(error = %e, "Checkpoint failed; will retry at the next boundary");
        }
    }

    /// Export pending items, then save the checkpoint.
    fn checkpoint(&self, ctx: &mut RunContext) -> Result<(), ResumeError> {
        if let Some(sink) = ctx.sink.as_mut() {
            let pending = ctx.accumulator.pending();
            if !pending.is_empty() {
                match sink.export(pending) {
                    Ok(()) => ctx.accumulator.clear_pending(),
                    Err(e) => {
                        ctx.stats.export_failures += 1;
                        warn!(
                            path = %sink.path().display(),
                            pending = pending.len(),
                            error = %e,
                            "Export failed; items kept for the next checkpoint"
                        );
                    }
                }
            }
        }

        ctx.state.mark_checkpoint(Utc::now());
        self.store.save(&ctx.state)?;
        ctx.stats.checkpoints += 1;
        ctx.accepted_since_checkpoint = 0;
        ctx.last_checkpoint = Instant::now();

        info!(
            collected = ctx.state.collected_count(),
            cursor = %ctx.state.cursor(),
            in_flight = ctx.frontier.in_flight(),
            "Checkpoint saved"
        );
        Ok(())
    }

    fn log_progress(&self, ctx: &mut RunContext) {
        if !ctx.progress.should_emit_update() {
            return;
        }
        let watermark = ctx.frontier.watermark();
        let position = match (&self.target.strategy, ctx.frontier.limit()) {
            (StrategyConfig::Paged { .. }, Some(end)) if ctx.frontier.is_bounded() => {
                format!("page {watermark} of {end}")
            }
            _ => ctx.state.cursor().key_for(watermark).to_string(),
        };
        ctx.progress.set_phase(Some(position));
        info!(
            issued = ctx.stats.issued,
            failed = ctx.stats.failed,
            "{}",
            ctx.progress.format_progress()
        );
        ctx.progress.mark_emitted();
    }

    fn publish(&self, phase: RunPhase, ctx: &RunContext) {
        self.progress.publish(ProgressSnapshot {
            phase,
            collected: ctx.state.collected_count(),
            total_target: ctx.state.total_target(),
            cursor: Some(ctx.state.cursor()),
            issued: ctx.stats.issued,
            in_flight: ctx.frontier.in_flight(),
            failed: ctx.stats.failed,
        });
    }

    fn finish(&self, outcome: RunOutcome, mut ctx: RunContext) -> Result<RunReport, CollectError> {
        self.checkpoint(&mut ctx)?;

        if let Some(sink) = ctx.sink.as_mut() {
            if let Err(e) = sink.finish() {
                warn!(path = %sink.path().display(), error = %e, "Failed to close export");
            }
        }

        let phase = outcome.phase();
        ctx.stats.finish(phase.to_string());
        let summary = ctx.stats.format_summary();
        match &outcome {
            RunOutcome::Completed => info!("{summary}"),
            RunOutcome::Paused => warn!("{summary}"),
            RunOutcome::Aborted(cause) => error!(%cause, "{summary}"),
        }
        if let Err(e) = self.store.save_stats(&ctx.stats) {
            warn!(path = %self.store.stats_path().display(), error = %e, "Failed to write run statistics");
        }

        metrics::set_collected(ctx.state.collected_count());
        self.publish(phase, &ctx);

        Ok(RunReport {
            target: self.target.id.clone(),
            outcome,
            collected: ctx.state.collected_count(),
            cursor: ctx.state.cursor(),
            total_target: ctx.state.total_target(),
            failed_ordinals: ctx.state.failed().len(),
            stats: ctx.stats,
        })
    }
}
