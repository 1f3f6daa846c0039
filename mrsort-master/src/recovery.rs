//! Job driver.
//!
//! On startup the master looks at the checkpoint and resumes from the most
//! advanced state it can observe. Exactly one path runs per startup:
//!
//! | Checkpoint                      | Path                                   |
//! |---------------------------------|----------------------------------------|
//! | completion flag                 | purge outputs, clear flag, fresh run    |
//! | status, every chunk done        | combine only                            |
//! | status with pending chunks      | map the pending chunks, combine         |
//! | data only                       | split, map everything, combine          |
//! | chunks only                     | map everything, combine                 |
//! | nothing                         | purge outputs, generate, map, combine   |
//!
//! A saved roster is merged into the registry before any path is chosen.
//! Every path that reaches the end sets the completion flag and clears the
//! job state. Chunks already marked done are never dispatched again.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::checkpoint::{Artifact, CheckpointStore};
use common::config::{Config, Settings};
use common::failures::FailureLog;
use common::output;
use common::planner::{self, ReducerRanges};
use tracing::{info, warn};

use crate::combine::combine_outputs;
use crate::data;
use crate::dispatch::{DispatchPolicy, MapDispatcher, MapPhaseReport};
use crate::worker_registry::{wait_for_workers, SharedRegistry, WorkerRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPath {
    /// A finished job was found and a new one was run from scratch.
    Restart,
    /// Status said every chunk was mapped; only the combine ran.
    MapAlreadyDone,
    /// Only the chunks still pending were mapped.
    ResumePending,
    /// Data was re-split and mapped.
    FromData,
    /// Saved chunks were mapped.
    FromChunks,
    /// Nothing was saved; the job ran from the beginning.
    Fresh,
}

impl fmt::Display for RecoveryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryPath::Restart => "restart after completion",
            RecoveryPath::MapAlreadyDone => "map already done",
            RecoveryPath::ResumePending => "resume pending chunks",
            RecoveryPath::FromData => "resume from data",
            RecoveryPath::FromChunks => "resume from chunks",
            RecoveryPath::Fresh => "fresh run",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct MasterOptions {
    pub dispatch: DispatchPolicy,
    pub registration_deadline: Duration,
    pub registration_poll: Duration,

    /// Pause between planning and the map phase.
    pub pre_map_pause: Duration,
}

impl Default for MasterOptions {
    fn default() -> Self {
        Self {
            dispatch: DispatchPolicy::default(),
            registration_deadline: Duration::from_secs(30),
            registration_poll: Duration::from_millis(500),
            pre_map_pause: Duration::ZERO,
        }
    }
}

pub struct Master {
    settings: Settings,
    store: Arc<CheckpointStore>,
    registry: SharedRegistry,
    output_dir: PathBuf,
    failures: FailureLog,
    options: MasterOptions,

    /// Used instead of generated data on a fresh run.
    input: Option<Vec<i64>>,
}

impl Master {
    /// Workers listed in `config` are registered up front.
    pub fn new(
        config: Config,
        store: Arc<CheckpointStore>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings: config.settings,
            store,
            registry: WorkerRegistry::new(config.workers).shared(),
            output_dir: output_dir.into(),
            failures: FailureLog::disabled(),
            options: MasterOptions::default(),
            input: None,
        }
    }

    pub fn with_options(mut self, options: MasterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_failure_log(mut self, failures: FailureLog) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_input(mut self, input: Vec<i64>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Brings the job to completion from whatever state the checkpoint holds.
    pub async fn run(&self) -> Result<RecoveryPath> {
        if self.store.completed().await {
            info!("[RECOVERY] Previous job completed, starting a new one");
            let purged = output::purge(&self.output_dir).await?;
            info!("[RECOVERY] Purged {purged} output files");
            // Leftovers of a run that stopped between completion and reset.
            self.store.reset().await?;
            self.store.clear_completed().await?;
            self.fresh_run().await?;
            return Ok(RecoveryPath::Restart);
        }

        if let Some(workers) = self.store.load_workers().await {
            let added = self.registry.lock().await.seed(workers);
            info!("[RECOVERY] Restored {added} workers from the saved roster");
        }

        let stage = self.store.stage().await;
        info!("[RECOVERY] Checkpoint stage: {stage}");

        if self.store.load_status().await.is_some() {
            if self.store.all_done().await {
                info!("[RECOVERY] Every chunk already mapped, combining");
                let ranges = self.recover_ranges().await?;
                self.finish(&ranges).await?;
                return Ok(RecoveryPath::MapAlreadyDone);
            }
            if let Some(pending) = self.pending_chunks().await? {
                info!("[RECOVERY] Resuming {} pending chunks", pending.len());
                let ranges = self.recover_ranges().await?;
                self.map_phase(pending, &ranges).await?;
                self.finish(&ranges).await?;
                return Ok(RecoveryPath::ResumePending);
            }
            warn!("[RECOVERY] Status present but no chunks or data to resume, starting over");
            self.store.reset().await?;
            self.fresh_run().await?;
            return Ok(RecoveryPath::Fresh);
        }

        if !self.store.exists(Artifact::Chunks).await {
            if let Some(data) = self.store.load_data().await {
                info!("[RECOVERY] Found {} saved keys, splitting", data.len());
                let chunks = self.split_and_save(&data).await?;
                let ranges = self.recover_ranges().await?;
                self.map_phase(enumerate(chunks), &ranges).await?;
                self.finish(&ranges).await?;
                return Ok(RecoveryPath::FromData);
            }
        }

        if let Some(chunks) = self.store.load_chunks().await {
            info!("[RECOVERY] Found {} saved chunks", chunks.len());
            self.store.init_status(chunks.len()).await?;
            let ranges = self.recover_ranges().await?;
            self.map_phase(enumerate(chunks), &ranges).await?;
            self.finish(&ranges).await?;
            return Ok(RecoveryPath::FromChunks);
        }

        self.fresh_run().await?;
        Ok(RecoveryPath::Fresh)
    }

    async fn fresh_run(&self) -> Result<()> {
        // Nothing saved refers to these files any more.
        let purged = output::purge(&self.output_dir).await?;
        if purged > 0 {
            warn!("[FRESH] Removed {purged} output files left by an abandoned job");
        }

        let (mappers, reducers) = self.await_workers().await?;
        info!(
            "[FRESH] Starting job with {} mappers and {} reducers",
            mappers.len(),
            reducers.len()
        );

        let mut rng = data::rng(self.settings.seed);
        let data = match &self.input {
            Some(input) => input.clone(),
            None => data::generate(&self.settings, &mut rng),
        };
        self.store.save_data(&data).await?;

        let chunks = self.split_and_save(&data).await?;

        let sample = data::draw_sample(
            &data,
            self.settings.sample_fraction,
            self.settings.num_reducers,
            &mut rng,
        );
        let ranges = self.plan_ranges(sample, &reducers).await?;

        self.map_phase(enumerate(chunks), &ranges).await?;
        self.finish(&ranges).await
    }

    async fn await_workers(&self) -> Result<(Vec<String>, Vec<String>)> {
        let (mappers, mut reducers) = wait_for_workers(
            &self.registry,
            self.settings.num_mappers,
            self.settings.num_reducers,
            self.options.registration_deadline,
            self.options.registration_poll,
        )
        .await?;
        reducers.truncate(self.settings.num_reducers);
        Ok((mappers, reducers))
    }

    async fn split_and_save(&self, data: &[i64]) -> Result<Vec<Vec<i64>>> {
        let chunks = data::split(data, self.settings.num_mappers);
        self.store.save_chunks(&chunks).await?;
        self.store.init_status(chunks.len()).await?;
        Ok(chunks)
    }

    /// Computes and saves ranges for `reducers`.
    async fn plan_ranges(&self, sample: Vec<i64>, reducers: &[String]) -> Result<ReducerRanges> {
        let ranges = planner::plan(sample, reducers, self.settings.xi, self.settings.xf);
        if ranges.len() < reducers.len() {
            info!(
                "[PLAN] Sample too uniform, using {} of {} reducers",
                ranges.len(),
                reducers.len()
            );
        }
        for range in ranges.iter() {
            info!("[PLAN] {} owns [{}, {})", range.address, range.lower, range.upper);
        }
        self.store.save_ranges(&ranges).await?;
        Ok(ranges)
    }

    /// The saved ranges, or new ones planned from the saved keys.
    async fn recover_ranges(&self) -> Result<ReducerRanges> {
        if let Some(ranges) = self.store.load_ranges().await {
            if ranges.covers(self.settings.xi, self.settings.xf) {
                return Ok(ranges);
            }
            warn!("[RECOVERY] Saved ranges do not cover the key space, planning again");
        }

        let data = match self.store.load_data().await {
            Some(data) => data,
            None => self
                .store
                .load_chunks()
                .await
                .map(|chunks| chunks.concat())
                .unwrap_or_default(),
        };
        let (_, reducers) = self.await_workers().await?;

        let mut rng = data::rng(self.settings.seed);
        let sample = data::draw_sample(
            &data,
            self.settings.sample_fraction,
            self.settings.num_reducers,
            &mut rng,
        );
        self.plan_ranges(sample, &reducers).await
    }

    /// Pending chunks, re-splitting saved data when the chunk table is gone.
    async fn pending_chunks(&self) -> Result<Option<Vec<(usize, Vec<i64>)>>> {
        if let Some(pending) = self.store.pending_chunks().await {
            return Ok(Some(pending));
        }
        let Some(data) = self.store.load_data().await else {
            return Ok(None);
        };

        // Splitting is deterministic, so ids line up with the saved status.
        warn!("[RECOVERY] Chunk table missing, re-splitting saved data");
        let chunks = data::split(&data, self.settings.num_mappers);
        self.store.save_chunks(&chunks).await?;
        Ok(self.store.pending_chunks().await)
    }

    async fn map_phase(
        &self,
        chunks: Vec<(usize, Vec<i64>)>,
        ranges: &ReducerRanges,
    ) -> Result<MapPhaseReport> {
        let (mappers, _) = self.await_workers().await?;

        if !self.options.pre_map_pause.is_zero() {
            info!("[MAP PHASE] Pausing {:?} before dispatch", self.options.pre_map_pause);
            tokio::time::sleep(self.options.pre_map_pause).await;
        }

        let dispatcher = MapDispatcher::new(
            mappers,
            self.options.dispatch.clone(),
            self.store.clone(),
            self.failures.clone(),
        );
        let report = dispatcher.execute(chunks, ranges).await?;
        if !report.failed.is_empty() {
            warn!(
                "[MAP PHASE] Chunks {:?} could not be mapped, output will be partial",
                report.failed
            );
        }
        Ok(report)
    }

    async fn finish(&self, ranges: &ReducerRanges) -> Result<()> {
        combine_outputs(&self.output_dir, ranges)
            .await
            .context("combining reducer outputs")?;
        self.store.set_completed().await?;
        self.store.reset().await?;
        info!("[DONE] Job complete");
        Ok(())
    }
}

fn enumerate(chunks: Vec<Vec<i64>>) -> Vec<(usize, Vec<i64>)> {
    chunks.into_iter().enumerate().collect()
}
