//! Result pipeline: the six steps every completed check passes
//! through, from history append to event publication.
//!
//! Follows a resolve, update, write, log-don't-fail-on-secondary-writes
//! sequencing, generalized from "health row + alert table" to "detector row
//! + metric store + event bus + notifier".

use chrono::{DateTime, Utc};
use shared::model::{CheckHistory, CheckResult, Detector, State};
use shared::repo::DetectorRepo;
use shared::wire::{EventResult, ResultEvent};
use std::sync::Arc;

use crate::bus::EventBus;
use crate::notifier::Notifier;
use shared::metrics::TimeSeriesStore;

/// Per-executor pipeline state that outlives any single check.
pub struct PipelineState {
    pub history: CheckHistory,
    pub first_run: bool,
    pub last_notify: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            history: CheckHistory::new(),
            first_run: true,
            last_notify: None,
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Pipeline {
    detector_repo: Arc<dyn DetectorRepo>,
    ts_store: Arc<dyn TimeSeriesStore>,
    bus: EventBus,
    notifier: Arc<Notifier>,
}

impl Pipeline {
    pub fn new(
        detector_repo: Arc<dyn DetectorRepo>,
        ts_store: Arc<dyn TimeSeriesStore>,
        bus: EventBus,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            detector_repo,
            ts_store,
            bus,
            notifier,
        }
    }

    /// Runs the six pipeline steps for one completed check. Returns the
    /// detector row as it now stands (new `lookup_version` on a successful
    /// repository update, unchanged on conflict).
    pub async fn process(
        &self,
        host_name: &str,
        detector: &Detector,
        mut result: CheckResult,
        state: &mut PipelineState,
    ) -> Detector {
        let now = Utc::now();

        // 1. Stamp host/detector names.
        result.host_name = host_name.to_string();
        result.detector_name = detector.name.clone();

        // 2. Append to history (FIFO, last 3).
        state.history.push(result.state);

        // 3. Update the detector row under optimistic lock; conflicts are
        // logged, not fatal.
        let mut updated = detector.clone();
        updated.last_state = result.state;
        updated.last_checked_at = Some(now);
        let stored = match self.detector_repo.update(updated.clone()).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(detector_id = %detector.id, error = %e, "detector update conflict, not fatal");
                detector.clone()
            }
        };

        // 4. Write the metric, if any; failures are logged only.
        if let Some(metric) = result.metric.clone() {
            if let Err(e) = self.ts_store.write(metric).await {
                tracing::warn!(detector_id = %detector.id, error = %e, "metric write failed, not fatal");
            }
        }

        // 5. Evaluate notification policy and fire if due.
        let should_notify = (state.first_run && result.state != State::Ok)
            || (!state.first_run && state.history.state_changed());
        state.first_run = false;

        let event = ResultEvent {
            host_id: detector.host_id,
            host_name: result.host_name.clone(),
            detector_id: detector.id,
            detector_name: result.detector_name.clone(),
            result: EventResult {
                state: result.state,
                message: result.message.clone(),
            },
        };

        if should_notify {
            state.last_notify = Some(now);
            if let Err(e) = self.notifier.send(&event).await {
                tracing::warn!(detector_id = %detector.id, error = %e, "notifier reported errors");
            }
        }

        // 6. Publish synchronously to the topic keyed by detector id.
        if let Err(e) = self.bus.publish(detector.id, event).await {
            tracing::warn!(detector_id = %detector.id, error = %e, "event publish failed");
        }

        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::metrics::InMemoryTimeSeriesStore;
    use shared::model::{DetectorConfig, DetectorType, HttpDetectorParams};
    use shared::repo::InMemoryDetectorRepo;
    use uuid::Uuid;

    fn sample_detector() -> Detector {
        Detector {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            name: "homepage".into(),
            detector_type: DetectorType::Http,
            interval_seconds: 30,
            timeout_seconds: 10,
            config: DetectorConfig::Http(HttpDetectorParams {
                url: "https://example.com".into(),
                expected_body: None,
                expected_status: 200,
            }),
            active: true,
            last_state: State::Ok,
            last_checked_at: None,
            lookup_version: 0,
        }
    }

    fn ok_result() -> CheckResult {
        CheckResult {
            host_name: String::new(),
            detector_name: String::new(),
            state: State::Ok,
            message: "200 OK".into(),
            metric: None,
        }
    }

    async fn build_pipeline(detector: &Detector) -> (Pipeline, Arc<dyn DetectorRepo>, EventBus) {
        let detector_repo: Arc<dyn DetectorRepo> = Arc::new(InMemoryDetectorRepo::new());
        detector_repo.create(detector.clone()).await.unwrap();
        let ts_store: Arc<dyn TimeSeriesStore> = Arc::new(InMemoryTimeSeriesStore::new());
        let bus = EventBus::new();
        bus.new_topic(detector.id).await.unwrap();
        let notifier = Arc::new(Notifier::new());
        (
            Pipeline::new(detector_repo.clone(), ts_store, bus.clone(), notifier),
            detector_repo,
            bus,
        )
    }

    #[tokio::test]
    async fn first_run_ok_does_not_notify_but_still_publishes() {
        let detector = sample_detector();
        let (pipeline, _repo, bus) = build_pipeline(&detector).await;
        let (_sub_id, mut rx) = bus.subscribe_channel(detector.id).await.unwrap();

        let mut state = PipelineState::new();
        let stored = pipeline.process("web1", &detector, ok_result(), &mut state).await;

        assert!(state.last_notify.is_none());
        assert!(!state.first_run);
        assert_eq!(stored.lookup_version, 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.host_id, detector.host_id);
        assert_eq!(event.detector_id, detector.id);
    }

    #[tokio::test]
    async fn first_run_critical_notifies() {
        let detector = sample_detector();
        let (pipeline, _repo, _bus) = build_pipeline(&detector).await;

        let mut critical = ok_result();
        critical.state = State::Critical;

        let mut state = PipelineState::new();
        pipeline.process("web1", &detector, critical, &mut state).await;
        assert!(state.last_notify.is_some());
    }

    #[tokio::test]
    async fn unchanged_state_after_first_run_does_not_renotify() {
        let detector = sample_detector();
        let (pipeline, _repo, _bus) = build_pipeline(&detector).await;
        let mut state = PipelineState::new();

        pipeline.process("web1", &detector, ok_result(), &mut state).await;
        let first_notify = state.last_notify;
        pipeline.process("web1", &detector, ok_result(), &mut state).await;
        assert_eq!(state.last_notify, first_notify);
    }
}
