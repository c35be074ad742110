//! Scheduler: enrolls/withdraws detectors, drives a single global
//! ticker, dispatches due executors onto a bounded worker pool.
//!
//! Follows a `tokio::spawn` + `broadcast::channel(1)` shutdown pattern,
//! generalized from one fixed-purpose background loop to N long-running
//! workers fed by a bounded dispatch channel.

use chrono::{DateTime, Utc};
use shared::model::{Detector, State};
use shared::repo::{DetectorRepo, HostRepo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::checker::{build_checker, Checker};
use crate::pipeline::{Pipeline, PipelineState};
use shared::error::AppError;

/// The scheduler's per-detector wrapper: timing, history, and a per-executor
/// guard ensuring at most one concurrent `check`.
pub struct Executor {
    id: Uuid,
    host_name: String,
    interval: Duration,
    checker: Arc<dyn Checker>,
    timing: Mutex<Option<DateTime<Utc>>>,
    pipeline_state: Mutex<PipelineState>,
    run_guard: Mutex<()>,
}

impl Executor {
    fn new(host_name: String, checker: Arc<dyn Checker>) -> Self {
        let interval = checker.interval();
        Self {
            id: checker.id(),
            host_name,
            interval,
            checker,
            timing: Mutex::new(None),
            pipeline_state: Mutex::new(PipelineState::new()),
            run_guard: Mutex::new(()),
        }
    }

    /// Returns true and pre-stamps `last_run = now` iff this executor is due.
    /// The pre-stamp happens before enqueuing, so a long-running
    /// check is not re-dispatched on the next tick.
    async fn mark_due(&self, now: DateTime<Utc>) -> bool {
        let mut last_run = self.timing.lock().await;
        let due = last_run
            .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default() >= self.interval)
            .unwrap_or(true);
        if due {
            *last_run = Some(now);
        }
        due
    }

    async fn run(&self, pipeline: &Pipeline, detector: &Detector) {
        let _guard = self.run_guard.lock().await;
        let result = self.checker.check().await;
        let mut state = self.pipeline_state.lock().await;
        pipeline.process(&self.host_name, detector, result, &mut state).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
}

struct Entry {
    executor: Arc<Executor>,
    detector: Detector,
}

pub struct Scheduler {
    executors: Arc<RwLock<HashMap<Uuid, Entry>>>,
    detector_repo: Arc<dyn DetectorRepo>,
    host_repo: Arc<dyn HostRepo>,
    bus: EventBus,
    pipeline: Arc<Pipeline>,
    http_client: reqwest::Client,
    worker_count: usize,
    tick: Duration,
    run_state: Mutex<RunState>,
    task_tx: Mutex<Option<mpsc::Sender<Uuid>>>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        detector_repo: Arc<dyn DetectorRepo>,
        host_repo: Arc<dyn HostRepo>,
        bus: EventBus,
        pipeline: Arc<Pipeline>,
        http_client: reqwest::Client,
        worker_count: usize,
        tick: Duration,
    ) -> Self {
        Self {
            executors: Arc::new(RwLock::new(HashMap::new())),
            detector_repo,
            host_repo,
            bus,
            pipeline,
            http_client,
            worker_count,
            tick,
            run_state: Mutex::new(RunState::Stopped),
            task_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.run_state.lock().await == RunState::Running
    }

    /// Opens the task pool, launches `worker_count` workers plus one ticker
    /// driver. No-op error if already running.
    pub async fn start(self: &Arc<Self>) -> shared::Result<()> {
        let mut run_state = self.run_state.lock().await;
        if *run_state == RunState::Running {
            return Err(AppError::conflict("scheduler already running").into());
        }

        let (task_tx, task_rx) = mpsc::channel::<Uuid>(self.worker_count.max(1));
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut handles = Vec::with_capacity(self.worker_count + 1);
        for _ in 0..self.worker_count {
            let task_rx = task_rx.clone();
            let executors = self.executors.clone();
            let pipeline = self.pipeline.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = task_rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.recv() => None,
                            id = rx.recv() => id,
                        }
                    };
                    match next {
                        Some(id) => {
                            let entry = executors.read().await.get(&id).map(|e| (e.executor.clone(), e.detector.clone()));
                            if let Some((executor, detector)) = entry {
                                executor.run(&pipeline, &detector).await;
                            }
                        }
                        None => break,
                    }
                }
            }));
        }

        let driver_executors = self.executors.clone();
        let driver_tx = task_tx.clone();
        let driver_tick = self.tick;
        let mut driver_shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(driver_tick);
            loop {
                tokio::select! {
                    biased;
                    _ = driver_shutdown.recv() => break,
                    _ = interval.tick() => {
                        let now = Utc::now();
                        let executors = driver_executors.read().await;
                        for (id, entry) in executors.iter() {
                            if entry.executor.mark_due(now).await {
                                let _ = driver_tx.send(*id).await;
                            }
                        }
                    }
                }
            }
        }));

        *self.task_tx.lock().await = Some(task_tx);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *self.handles.lock().await = handles;
        *run_state = RunState::Running;
        Ok(())
    }

    /// Signals the driver and workers, drains the task pool, and waits for
    /// every task to exit.
    pub async fn stop(&self) -> shared::Result<()> {
        let mut run_state = self.run_state.lock().await;
        if *run_state != RunState::Running {
            return Err(AppError::conflict("scheduler is not running").into());
        }

        if let Some(shutdown_tx) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown_tx.send(());
        }
        self.task_tx.lock().await.take();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }

        *run_state = RunState::Stopped;
        Ok(())
    }

    /// Enrolls a detector: idempotent no-op if already enrolled.
    pub async fn add_detector(&self, id: Uuid) -> shared::Result<()> {
        if self.executors.read().await.contains_key(&id) {
            return Ok(());
        }

        let detector = self.detector_repo.get(id).await?;
        let host = self.host_repo.get(detector.host_id).await?;
        let checker = build_checker(detector.clone(), self.http_client.clone())?;
        let executor = Arc::new(Executor::new(host.name.clone(), checker));

        self.executors.write().await.insert(
            id,
            Entry {
                executor,
                detector: detector.clone(),
            },
        );

        if let Err(e) = self.bus.new_topic(id).await {
            self.executors.write().await.remove(&id);
            return Err(e);
        }

        let mut active_detector = detector.clone();
        active_detector.active = true;
        if let Err(e) = self.detector_repo.update(active_detector).await {
            self.executors.write().await.remove(&id);
            self.bus.close_topic(id).await;
            return Err(e);
        }

        Ok(())
    }

    /// Bulk convenience; aborts on the first failure.
    pub async fn add_detectors(&self, ids: &[Uuid]) -> shared::Result<()> {
        for id in ids {
            self.add_detector(*id).await?;
        }
        Ok(())
    }

    /// Withdraws a detector. Tolerant of a missing executor.
    pub async fn remove_detector(&self, id: Uuid) {
        let removed = self.executors.write().await.remove(&id);
        if removed.is_none() {
            tracing::debug!(detector_id = %id, "remove_detector: no enrolled executor, ignoring");
        }

        match self.detector_repo.get(id).await {
            Ok(mut detector) => {
                detector.active = false;
                detector.last_state = State::Inactive;
                if let Err(e) = self.detector_repo.update(detector).await {
                    tracing::warn!(detector_id = %id, error = %e, "failed to mark withdrawn detector inactive");
                }
            }
            Err(e) => {
                tracing::debug!(detector_id = %id, error = %e, "withdrawn detector no longer in repository");
            }
        }

        self.bus.close_topic(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::metrics::InMemoryTimeSeriesStore;
    use shared::model::{AddressType, DetectorConfig, DetectorType, HttpDetectorParams};
    use shared::repo::{InMemoryDetectorRepo, InMemoryHostRepo};

    fn sample_host(id: Uuid) -> shared::model::Host {
        shared::model::Host {
            id,
            name: "web1".into(),
            address_type: AddressType::Ipv4,
            address: "10.0.0.1".into(),
            agent_enabled: false,
            active: true,
            last_state: State::Ok,
            tags: vec![],
        }
    }

    fn sample_detector(id: Uuid, host_id: Uuid) -> Detector {
        Detector {
            id,
            host_id,
            name: "homepage".into(),
            detector_type: DetectorType::Http,
            interval_seconds: 1,
            timeout_seconds: 10,
            config: DetectorConfig::Http(HttpDetectorParams {
                url: "https://example.invalid".into(),
                expected_body: None,
                expected_status: 200,
            }),
            active: false,
            last_state: State::Ok,
            last_checked_at: None,
            lookup_version: 0,
        }
    }

    async fn build_scheduler() -> (Arc<Scheduler>, Arc<dyn DetectorRepo>, Arc<dyn HostRepo>) {
        let detector_repo: Arc<dyn DetectorRepo> = Arc::new(InMemoryDetectorRepo::new());
        let host_repo: Arc<dyn HostRepo> = Arc::new(InMemoryHostRepo::new());
        let bus = EventBus::new();
        let notifier = Arc::new(crate::notifier::Notifier::new());
        let ts_store: Arc<dyn shared::metrics::TimeSeriesStore> = Arc::new(InMemoryTimeSeriesStore::new());
        let pipeline = Arc::new(Pipeline::new(detector_repo.clone(), ts_store, bus.clone(), notifier));
        let scheduler = Arc::new(Scheduler::new(
            detector_repo.clone(),
            host_repo.clone(),
            bus,
            pipeline,
            reqwest::Client::new(),
            2,
            Duration::from_millis(50),
        ));
        (scheduler, detector_repo, host_repo)
    }

    #[tokio::test]
    async fn add_detector_twice_is_a_no_op() {
        let (scheduler, detector_repo, host_repo) = build_scheduler().await;
        let host_id = Uuid::new_v4();
        let detector_id = Uuid::new_v4();
        host_repo.create(sample_host(host_id)).await.unwrap();
        detector_repo.create(sample_detector(detector_id, host_id)).await.unwrap();

        scheduler.add_detector(detector_id).await.unwrap();
        scheduler.add_detector(detector_id).await.unwrap();
        assert_eq!(scheduler.executors.read().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_unknown_detector_is_tolerant() {
        let (scheduler, _detector_repo, _host_repo) = build_scheduler().await;
        scheduler.remove_detector(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn start_then_stop_leaves_no_running_state() {
        let (scheduler, _detector_repo, _host_repo) = build_scheduler().await;
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn starting_twice_is_an_error() {
        let (scheduler, _detector_repo, _host_repo) = build_scheduler().await;
        scheduler.start().await.unwrap();
        assert!(scheduler.start().await.is_err());
        scheduler.stop().await.unwrap();
    }
}
