use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub mod event_buffer;
pub mod filter;
pub mod graph;
pub mod stream_frame;

pub use event_buffer::{EventBuffer, FillOutcome, Identified};

pub const LIVE_FEED_CAPACITY: usize = 30;
pub const ALERT_TICKER_CAPACITY: usize = 3;
pub const DEFAULT_LINK_SUMMARY: &str = "recent traffic";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    /// Maps a source label onto one of the three classes. Unknown labels land on `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "높음" | "high" => Severity::High,
            "낮음" | "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Label the server stores and matches exactly in packet queries.
    pub fn source_label(self) -> &'static str {
        match self {
            Severity::High => "높음",
            Severity::Medium => "중간",
            Severity::Low => "낮음",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Normal,
    Caution,
    Quarantined,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeTone {
    Ok,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBadge {
    pub label: &'static str,
    pub tone: BadgeTone,
}

impl AgentStatus {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "주의" | "caution" | "warning" => AgentStatus::Caution,
            "격리" | "quarantined" | "critical" => AgentStatus::Quarantined,
            _ => AgentStatus::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Normal => "normal",
            AgentStatus::Caution => "caution",
            AgentStatus::Quarantined => "quarantined",
        }
    }

    pub fn badge(self) -> StatusBadge {
        let tone = match self {
            AgentStatus::Normal => BadgeTone::Ok,
            AgentStatus::Caution => BadgeTone::Warn,
            AgentStatus::Quarantined => BadgeTone::Critical,
        };
        StatusBadge {
            label: self.as_str(),
            tone,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single threat observation on an agent-to-agent link.
///
/// Pushed events from the reference server carry no `id`; those get a
/// fingerprint of timestamp, endpoints and threat type as their identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "RawAlertEvent")]
pub struct AlertEvent {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "severity")]
    pub severity_label: String,
    pub threat_type: String,
    pub source_agent: String,
    pub target_agent: String,
    pub protocol_layer: String,
    pub description: String,
    pub resolution: String,
}

#[derive(Deserialize)]
struct RawAlertEvent {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    id: Option<String>,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    threat_type: String,
    #[serde(default)]
    source_agent: String,
    #[serde(default)]
    target_agent: String,
    #[serde(default)]
    protocol_layer: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    resolution: String,
}

impl From<RawAlertEvent> for AlertEvent {
    fn from(raw: RawAlertEvent) -> Self {
        let id = raw.id.unwrap_or_else(|| {
            alert_fingerprint(
                &raw.timestamp,
                &raw.source_agent,
                &raw.target_agent,
                &raw.threat_type,
            )
        });
        Self {
            id,
            timestamp: raw.timestamp,
            severity_label: raw.severity,
            threat_type: raw.threat_type,
            source_agent: raw.source_agent,
            target_agent: raw.target_agent,
            protocol_layer: raw.protocol_layer,
            description: raw.description,
            resolution: raw.resolution,
        }
    }
}

impl AlertEvent {
    pub fn severity(&self) -> Severity {
        Severity::from_label(&self.severity_label)
    }

    pub fn is_critical(&self) -> bool {
        self.severity() == Severity::High
    }
}

impl Identified for AlertEvent {
    fn identity(&self) -> &str {
        &self.id
    }
}

fn alert_fingerprint(timestamp: &str, source: &str, target: &str, threat: &str) -> String {
    format!("fp:{timestamp}|{source}|{target}|{threat}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentNode {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, deserialize_with = "deserialize_status")]
    pub status: AgentStatus,
    #[serde(default, deserialize_with = "deserialize_risk")]
    pub risk_score: f64,
    #[serde(default)]
    pub last_seen: String,
}

impl AgentNode {
    pub fn risk_percent(&self) -> String {
        format!("{:.1}%", self.risk_score * 100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Communication {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub last_activity: String,
    #[serde(default = "default_link_summary", deserialize_with = "deserialize_summary")]
    pub threat_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphNode {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphEdge {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    #[serde(deserialize_with = "deserialize_id")]
    pub from: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub to: String,
    #[serde(default = "default_link_summary", deserialize_with = "deserialize_summary")]
    pub label: String,
    #[serde(default)]
    pub title: String,
}

/// Payload of `GET /api/agents`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentsSnapshot {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default)]
    pub agents: Vec<AgentNode>,
    #[serde(default)]
    pub communications: Vec<Communication>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PacketsPayload {
    #[serde(default)]
    pub packets: Vec<AlertEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertsPayload {
    #[serde(default)]
    pub alerts: Vec<AlertEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistentAgent {
    pub name: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPersistentAgent {
    Name(String),
    Entry {
        #[serde(alias = "agent")]
        name: String,
        #[serde(default, alias = "hits")]
        count: u64,
    },
}

impl From<RawPersistentAgent> for PersistentAgent {
    fn from(raw: RawPersistentAgent) -> Self {
        match raw {
            RawPersistentAgent::Name(name) => Self { name, count: 0 },
            RawPersistentAgent::Entry { name, count } => Self { name, count },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrendPoint {
    #[serde(alias = "label", alias = "window")]
    pub window_label: String,
    #[serde(default)]
    pub count: u64,
}

/// Aggregates from `GET /api/overview`. Counts are computed server-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OverviewMetrics {
    #[serde(default)]
    pub agent_count: u64,
    #[serde(default)]
    pub high_threats: u64,
    #[serde(default)]
    pub communication_count: u64,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub total_packets: u64,
    #[serde(default, deserialize_with = "deserialize_severity_counts")]
    pub severity_counts: BTreeMap<Severity, u64>,
    #[serde(default)]
    pub layer_counts: BTreeMap<String, u64>,
    #[serde(default, deserialize_with = "deserialize_persistent_agents")]
    pub persistent_agents: Vec<PersistentAgent>,
    #[serde(default)]
    pub threat_trend: Vec<TrendPoint>,
}

impl OverviewMetrics {
    pub fn severity_count(&self, severity: Severity) -> u64 {
        self.severity_counts.get(&severity).copied().unwrap_or(0)
    }
}

/// Renders a server timestamp as `YYYY-MM-DD HH:MM:SS`, falling back to a plain `T` swap.
pub fn display_timestamp(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return parsed.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return parsed.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    trimmed.replacen('T', " ", 1)
}

/// Deserialize an ID that can be either a string or a number into a String
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn deserialize_status<'de, D>(deserializer: D) -> Result<AgentStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(label
        .as_deref()
        .map(AgentStatus::from_label)
        .unwrap_or_default())
}

fn deserialize_risk<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    if raw.is_nan() {
        return Ok(0.0);
    }
    Ok(raw.clamp(0.0, 1.0))
}

fn default_link_summary() -> String {
    DEFAULT_LINK_SUMMARY.to_string()
}

fn deserialize_summary<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let summary = Option::<String>::deserialize(deserializer)?;
    Ok(summary
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(default_link_summary))
}

fn deserialize_severity_counts<'de, D>(deserializer: D) -> Result<BTreeMap<Severity, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, u64>>::deserialize(deserializer)?.unwrap_or_default();
    let mut folded = BTreeMap::new();
    for (label, count) in raw {
        *folded.entry(Severity::from_label(&label)).or_insert(0) += count;
    }
    Ok(folded)
}

fn deserialize_persistent_agents<'de, D>(deserializer: D) -> Result<Vec<PersistentAgent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<RawPersistentAgent>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw.into_iter().map(PersistentAgent::from).collect())
}
