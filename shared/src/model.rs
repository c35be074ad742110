//! Core data model: hosts, detectors, check results, and check history.
//!
//! `Detector::config`'s tagged-by-type decode uses a hand-rolled
//! `Deserialize`: the `type` field picks which `DetectorParams` variant to
//! parse into, so each variant can be validated independently of serde's
//! own enum-tagging machinery.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

use crate::error::AppError;

/// Coarse health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Ok,
    Warn,
    Critical,
    Inactive,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Ok => "OK",
            State::Warn => "WARN",
            State::Critical => "CRITICAL",
            State::Inactive => "INACTIVE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    pub name: String,
    pub address_type: AddressType,
    pub address: String,
    pub agent_enabled: bool,
    pub active: bool,
    pub last_state: State,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Host {
    pub fn validate(&self) -> crate::Result<()> {
        let parsed: Result<IpAddr, _> = self.address.parse();
        match (parsed, self.address_type) {
            (Ok(IpAddr::V4(_)), AddressType::Ipv4) => Ok(()),
            (Ok(IpAddr::V6(_)), AddressType::Ipv6) => Ok(()),
            _ => Err(AppError::invalid(format!(
                "host address '{}' does not parse as declared address type {:?}",
                self.address, self.address_type
            ))
            .into()),
        }
    }

    /// Parsed address, used by checkers that need a concrete socket target.
    pub fn ip_addr(&self) -> crate::Result<IpAddr> {
        self.address
            .parse()
            .map_err(|e| AppError::invalid(format!("invalid host address: {e}")).into())
    }
}

/// Detector type discriminant, driving both config decode and checker
/// construction (the "sealed variant" polymorphism called for in the
/// design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    Http,
    Agent,
    Psql,
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectorType::Http => "http",
            DetectorType::Agent => "agent",
            DetectorType::Psql => "psql",
        };
        write!(f, "{s}")
    }
}

fn default_http_method_status() -> u16 {
    200
}

fn default_agent_port() -> u16 {
    8089
}

fn default_warn_threshold() -> f64 {
    85.0
}

fn default_critical_threshold() -> f64 {
    95.0
}

fn default_psql_port() -> u16 {
    5432
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDetectorParams {
    pub url: String,
    #[serde(default)]
    pub expected_body: Option<String>,
    #[serde(default = "default_http_method_status")]
    pub expected_status: u16,
}

impl HttpDetectorParams {
    fn validate(&self) -> crate::Result<()> {
        if self.url.trim().is_empty() {
            return Err(AppError::invalid("http detector requires a non-empty url").into());
        }
        crate::utils::validate_url(&self.url, false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDetectorParams {
    pub ip: String,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default)]
    pub command: AgentCommand,
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
}

impl AgentDetectorParams {
    fn validate(&self) -> crate::Result<()> {
        if self.ip.trim().is_empty() {
            return Err(AppError::invalid("agent detector requires a non-empty ip").into());
        }
        self.ip
            .parse::<IpAddr>()
            .map_err(|e| AppError::invalid(format!("agent detector ip invalid: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentCommand {
    #[default]
    CheckCpu,
    CheckRam,
    CheckDisk,
    CheckDocker,
    CheckResources,
}

impl AgentCommand {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            AgentCommand::CheckCpu => "check_cpu",
            AgentCommand::CheckRam => "check_ram",
            AgentCommand::CheckDisk => "check_disk",
            AgentCommand::CheckDocker => "check_docker",
            AgentCommand::CheckResources => "check_resources",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsqlDetectorParams {
    pub host: String,
    #[serde(default = "default_psql_port")]
    pub port: u16,
}

impl PsqlDetectorParams {
    fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::invalid("psql detector requires a non-empty host").into());
        }
        Ok(())
    }
}

/// Decoded, type-specific detector configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorConfig {
    Http(HttpDetectorParams),
    Agent(AgentDetectorParams),
    Psql(PsqlDetectorParams),
}

impl DetectorConfig {
    pub fn detector_type(&self) -> DetectorType {
        match self {
            DetectorConfig::Http(_) => DetectorType::Http,
            DetectorConfig::Agent(_) => DetectorType::Agent,
            DetectorConfig::Psql(_) => DetectorType::Psql,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        match self {
            DetectorConfig::Http(p) => p.validate(),
            DetectorConfig::Agent(p) => p.validate(),
            DetectorConfig::Psql(p) => p.validate(),
        }
    }
}

/// Hand-rolled rather than `#[serde(tag = "type")]` so that a detector
/// config with an unrecognized `type` surfaces a descriptive error instead
/// of serde's generic "data did not match any variant" message.
impl<'de> Deserialize<'de> for DetectorConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DetectorConfigVisitor;

        impl<'de> Visitor<'de> for DetectorConfigVisitor {
            type Value = DetectorConfig;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a detector config map with a \"type\" field")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut raw = serde_json::Map::new();
                let mut detector_type: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    let value: serde_json::Value = map.next_value()?;
                    if key == "type" {
                        detector_type = value.as_str().map(|s| s.to_string());
                    }
                    raw.insert(key, value);
                }
                let detector_type = detector_type
                    .ok_or_else(|| de::Error::missing_field("type"))?;
                let value = serde_json::Value::Object(raw);
                match detector_type.as_str() {
                    "http" => serde_json::from_value(value)
                        .map(DetectorConfig::Http)
                        .map_err(de::Error::custom),
                    "agent" => serde_json::from_value(value)
                        .map(DetectorConfig::Agent)
                        .map_err(de::Error::custom),
                    "psql" => serde_json::from_value(value)
                        .map(DetectorConfig::Psql)
                        .map_err(de::Error::custom),
                    other => Err(de::Error::custom(format!(
                        "unknown detector type '{other}'"
                    ))),
                }
            }
        }

        deserializer.deserialize_map(DetectorConfigVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detector {
    pub id: Uuid,
    pub host_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub detector_type: DetectorType,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub config: DetectorConfig,
    pub active: bool,
    pub last_state: State,
    pub last_checked_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Optimistic concurrency token; incremented on every successful update.
    pub lookup_version: u64,
}

impl Detector {
    pub fn validate(&self) -> crate::Result<()> {
        if self.interval_seconds == 0 {
            return Err(AppError::invalid("detector interval must be > 0").into());
        }
        if self.detector_type != self.config.detector_type() {
            return Err(AppError::invalid(
                "detector type does not match the decoded config variant",
            )
            .into());
        }
        self.config.validate()
    }
}

/// The outcome of a single check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub host_name: String,
    pub detector_name: String,
    pub state: State,
    pub message: String,
    pub metric: Option<crate::metrics::Metric>,
}

/// Last 3 results for a given executor, FIFO, nil-tolerant.
#[derive(Debug, Clone, Default)]
pub struct CheckHistory {
    entries: [Option<State>; 3],
}

impl CheckHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new state, dropping the oldest if already at capacity.
    pub fn push(&mut self, state: State) {
        self.entries[0] = self.entries[1];
        self.entries[1] = self.entries[2];
        self.entries[2] = Some(state);
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compares the last two results' states. Nil tolerant: returns false
    /// if either of the last two slots is empty.
    pub fn state_changed(&self) -> bool {
        match (self.entries[1], self.entries[2]) {
            (Some(prev), Some(curr)) => prev != curr,
            _ => false,
        }
    }

    /// Returns false whenever the leading entries are nil (undefined in
    /// the decided behavior; see DESIGN.md).
    pub fn warn_or_critical(&self) -> bool {
        match self.entries[2] {
            Some(State::Warn) | Some(State::Critical) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_retains_last_three_fifo() {
        let mut h = CheckHistory::new();
        assert_eq!(h.len(), 0);
        h.push(State::Ok);
        h.push(State::Warn);
        h.push(State::Critical);
        h.push(State::Ok);
        assert_eq!(h.len(), 3);
        assert_eq!(h.entries, [Some(State::Warn), Some(State::Critical), Some(State::Ok)]);
    }

    #[test]
    fn state_changed_is_nil_tolerant() {
        let mut h = CheckHistory::new();
        assert!(!h.state_changed());
        h.push(State::Ok);
        assert!(!h.state_changed());
        h.push(State::Ok);
        assert!(!h.state_changed());
        h.push(State::Critical);
        assert!(h.state_changed());
    }

    #[test]
    fn warn_or_critical_false_on_leading_nils() {
        let h = CheckHistory::new();
        assert!(!h.warn_or_critical());
    }

    #[test]
    fn detector_config_decodes_by_type_tag() {
        let json = serde_json::json!({
            "type": "http",
            "url": "https://example.com",
            "expected_body": "ok"
        });
        let cfg: DetectorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(cfg.detector_type(), DetectorType::Http);
    }

    #[test]
    fn detector_config_rejects_unknown_type() {
        let json = serde_json::json!({"type": "ftp", "host": "x"});
        let result: std::result::Result<DetectorConfig, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn host_validate_matches_address_family() {
        let host = Host {
            id: Uuid::new_v4(),
            name: "web1".into(),
            address_type: AddressType::Ipv4,
            address: "10.0.0.1".into(),
            agent_enabled: false,
            active: true,
            last_state: State::Ok,
            tags: vec![],
        };
        assert!(host.validate().is_ok());

        let mismatched = Host {
            address: "::1".into(),
            ..host
        };
        assert!(mismatched.validate().is_err());
    }
}
