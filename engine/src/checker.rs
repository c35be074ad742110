//! Checker abstraction: pluggable probes behind a uniform contract,
//! constructed table-driven by detector type — the sealed-variant
//! polymorphism the data model's `DetectorConfig` already decodes into.

use async_trait::async_trait;
use shared::error::AppError;
use shared::metrics::Metric;
use shared::model::{AgentCommand, CheckResult, Detector, DetectorConfig, State};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The uniform capability set every checker exposes.
#[async_trait]
pub trait Checker: Send + Sync {
    fn id(&self) -> Uuid;
    fn interval(&self) -> Duration;
    fn detector(&self) -> &Detector;
    async fn check(&self) -> CheckResult;
}

/// Builds the checker matching a detector's decoded config, validating the
/// config at construction time ("an invalid config fails enrollment
/// with a typed EINVALID error").
pub fn build_checker(detector: Detector, http_client: reqwest::Client) -> shared::Result<Box<dyn Checker>> {
    detector.validate()?;
    match &detector.config {
        DetectorConfig::Http(_) => Ok(Box::new(HttpChecker::new(detector, http_client))),
        DetectorConfig::Agent(_) => Ok(Box::new(AgentChecker::new(detector, http_client))),
        DetectorConfig::Psql(_) => Ok(Box::new(PsqlChecker::new(detector))),
    }
}

fn base_metric(detector: &Detector, response_time_ms: f64) -> Metric {
    Metric::new("host_metrics", detector.detector_type.to_string())
        .with_field("response_time", response_time_ms)
        .with_tag("host_id", detector.host_id.to_string())
        .with_tag("detector_id", detector.id.to_string())
}

/// The deadline applied to every `check()` call, independent of the
/// detector's own declared timeout.
pub const CHECK_DEADLINE: Duration = Duration::from_secs(10);

// ---- HTTP checker ----

pub struct HttpChecker {
    detector: Detector,
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(detector: Detector, client: reqwest::Client) -> Self {
        Self { detector, client }
    }

    fn params(&self) -> &shared::model::HttpDetectorParams {
        match &self.detector.config {
            DetectorConfig::Http(p) => p,
            _ => unreachable!("HttpChecker constructed from a non-http detector"),
        }
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn id(&self) -> Uuid {
        self.detector.id
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.detector.interval_seconds)
    }

    fn detector(&self) -> &Detector {
        &self.detector
    }

    async fn check(&self) -> CheckResult {
        let params = self.params();
        let start = Instant::now();
        let outcome = tokio::time::timeout(CHECK_DEADLINE, self.client.get(&params.url).send()).await;

        let (state, message, response_time_ms) = match outcome {
            Err(_) => (State::Critical, "request timed out".to_string(), CHECK_DEADLINE.as_millis() as f64),
            Ok(Err(e)) => (State::Critical, format!("request failed: {e}"), start.elapsed().as_millis() as f64),
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let response_time_ms = start.elapsed().as_millis() as f64;
                let expected_ok = params.expected_body.as_ref().map(|s| body.contains(s.as_str())).unwrap_or(true);
                let diagnostic: String = body.chars().take(16).collect();
                if status != params.expected_status {
                    (State::Critical, format!("unexpected status {status}"), response_time_ms)
                } else if !expected_ok {
                    (State::Critical, "expected body not found".to_string(), response_time_ms)
                } else {
                    (State::Ok, diagnostic, response_time_ms)
                }
            }
        };

        CheckResult {
            host_name: String::new(),
            detector_name: self.detector.name.clone(),
            state,
            message,
            metric: Some(base_metric(&self.detector, response_time_ms)),
        }
    }
}

// ---- Agent checker ----

pub struct AgentChecker {
    detector: Detector,
    client: reqwest::Client,
}

impl AgentChecker {
    pub fn new(detector: Detector, client: reqwest::Client) -> Self {
        Self { detector, client }
    }

    fn params(&self) -> &shared::model::AgentDetectorParams {
        match &self.detector.config {
            DetectorConfig::Agent(p) => p,
            _ => unreachable!("AgentChecker constructed from a non-agent detector"),
        }
    }
}

#[async_trait]
impl Checker for AgentChecker {
    fn id(&self) -> Uuid {
        self.detector.id
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.detector.interval_seconds)
    }

    fn detector(&self) -> &Detector {
        &self.detector
    }

    async fn check(&self) -> CheckResult {
        let params = self.params();
        let start = Instant::now();

        if params.command != AgentCommand::CheckCpu {
            return CheckResult {
                host_name: String::new(),
                detector_name: self.detector.name.clone(),
                state: State::Critical,
                message: "not implemented".to_string(),
                metric: Some(base_metric(&self.detector, 0.0)),
            };
        }

        let url = format!("http://{}:{}/execute", params.ip, params.port);
        let outcome = tokio::time::timeout(
            CHECK_DEADLINE,
            self.client
                .post(&url)
                .json(&shared::wire::ExecuteRequest {
                    command: params.command.as_wire_str().to_string(),
                })
                .send(),
        )
        .await;

        let response_time_ms = start.elapsed().as_millis() as f64;
        let (state, message) = match outcome {
            Err(_) => (State::Critical, "agent request timed out".to_string()),
            Ok(Err(e)) => (State::Critical, format!("agent request failed: {e}")),
            Ok(Ok(response)) => match response.json::<shared::wire::ExecuteResponse>().await {
                Err(e) => (State::Critical, format!("invalid agent response: {e}")),
                Ok(body) => match parse_cpu_aggregate(&body.result) {
                    Err(e) => (State::Critical, e.to_string()),
                    Ok(avg) => (threshold_state(avg, params.warn_threshold, params.critical_threshold), format!("cpu avg {avg:.1}%")),
                },
            },
        };

        CheckResult {
            host_name: String::new(),
            detector_name: self.detector.name.clone(),
            state,
            message,
            metric: Some(base_metric(&self.detector, response_time_ms)),
        }
    }
}

/// Threshold policy: critical if `>= critical`, else warn if `>= warn`, else OK.
fn threshold_state(value: f64, warn: f64, critical: f64) -> State {
    if value >= critical {
        State::Critical
    } else if value >= warn {
        State::Warn
    } else {
        State::Ok
    }
}

#[derive(serde::Deserialize)]
struct CpuResult {
    #[serde(rename = "CPUs")]
    cpus: std::collections::BTreeMap<String, f64>,
}

fn parse_cpu_aggregate(result: &[u8]) -> shared::Result<f64> {
    let parsed: CpuResult = serde_json::from_slice(result)
        .map_err(|e| AppError::invalid(format!("invalid check_cpu payload: {e}")))?;
    if parsed.cpus.is_empty() {
        return Err(AppError::invalid("check_cpu payload reported no CPUs").into());
    }
    let sum: f64 = parsed.cpus.values().sum();
    Ok(sum / parsed.cpus.len() as f64)
}

// ---- Postgres reachability checker ----

pub struct PsqlChecker {
    detector: Detector,
}

impl PsqlChecker {
    pub fn new(detector: Detector) -> Self {
        Self { detector }
    }

    fn params(&self) -> &shared::model::PsqlDetectorParams {
        match &self.detector.config {
            DetectorConfig::Psql(p) => p,
            _ => unreachable!("PsqlChecker constructed from a non-psql detector"),
        }
    }
}

#[async_trait]
impl Checker for PsqlChecker {
    fn id(&self) -> Uuid {
        self.detector.id
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.detector.interval_seconds)
    }

    fn detector(&self) -> &Detector {
        &self.detector
    }

    async fn check(&self) -> CheckResult {
        let params = self.params();
        let addr = format!("{}:{}", params.host, params.port);
        let start = Instant::now();

        let outcome = tokio::time::timeout(CHECK_DEADLINE, tokio::net::TcpStream::connect(&addr)).await;
        let response_time_ms = start.elapsed().as_millis() as f64;

        let (state, message) = match outcome {
            Err(_) => (State::Critical, "connect timed out".to_string()),
            Ok(Err(e)) => (State::Critical, format!("connect failed: {e}")),
            Ok(Ok(_)) => (State::Ok, "reachable".to_string()),
        };

        CheckResult {
            host_name: String::new(),
            detector_name: self.detector.name.clone(),
            state,
            message,
            metric: Some(base_metric(&self.detector, response_time_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_state_matches_policy_defaults() {
        assert_eq!(threshold_state(50.0, 85.0, 95.0), State::Ok);
        assert_eq!(threshold_state(90.0, 85.0, 95.0), State::Warn);
        assert_eq!(threshold_state(96.0, 85.0, 95.0), State::Critical);
    }

    #[test]
    fn parse_cpu_aggregate_averages_all_cores() {
        let payload = serde_json::json!({"CPUs": {"cpu_0": 10.0, "cpu_1": 30.0}});
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert_eq!(parse_cpu_aggregate(&bytes).unwrap(), 20.0);
    }

    #[test]
    fn parse_cpu_aggregate_rejects_empty_map() {
        let payload = serde_json::json!({"CPUs": {}});
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert!(parse_cpu_aggregate(&bytes).is_err());
    }
}
