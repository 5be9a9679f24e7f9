use crate::config::Config;
use a2a_core::filter::PacketQuery;
use a2a_core::{AgentsSnapshot, AlertEvent, AlertsPayload, OverviewMetrics, PacketsPayload};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {path}")]
    Status { status: u16, path: String },
    #[error("undecodable body from {path}: {message}")]
    Decode { path: String, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PullKind {
    Overview,
    RecentPackets,
    AgentsGraph,
    RecentAlerts,
    Search,
}

impl fmt::Display for PullKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PullKind::Overview => "overview",
            PullKind::RecentPackets => "recent_packets",
            PullKind::AgentsGraph => "agents_graph",
            PullKind::RecentAlerts => "recent_alerts",
            PullKind::Search => "search",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullRequest {
    Overview,
    RecentPackets,
    AgentsGraph,
    RecentAlerts,
    Search(PacketQuery),
}

impl PullRequest {
    pub fn kind(&self) -> PullKind {
        match self {
            PullRequest::Overview => PullKind::Overview,
            PullRequest::RecentPackets => PullKind::RecentPackets,
            PullRequest::AgentsGraph => PullKind::AgentsGraph,
            PullRequest::RecentAlerts => PullKind::RecentAlerts,
            PullRequest::Search(_) => PullKind::Search,
        }
    }
}

/// Issued with every pull; `epoch` identifies the screen session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PullTicket {
    pub kind: PullKind,
    pub seq: u64,
    pub epoch: u64,
}

#[derive(Clone, Debug)]
pub enum PullPayload {
    Overview(OverviewMetrics),
    RecentPackets(Vec<AlertEvent>),
    AgentsGraph(AgentsSnapshot),
    RecentAlerts(Vec<AlertEvent>),
    Search {
        query: PacketQuery,
        packets: Vec<AlertEvent>,
    },
}

#[derive(Clone, Debug)]
pub struct PullOutcome {
    pub ticket: PullTicket,
    pub payload: PullPayload,
}

#[derive(Clone)]
pub struct SnapshotLoader {
    client: reqwest::Client,
    base_url: String,
    tx: mpsc::Sender<PullOutcome>,
}

impl SnapshotLoader {
    pub fn new(config: &Config, tx: mpsc::Sender<PullOutcome>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tx,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T, FetchError> {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| FetchError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    pub async fn fetch_overview(&self) -> Result<OverviewMetrics, FetchError> {
        self.get_json("/api/overview", &[]).await
    }

    pub async fn fetch_recent_packets(&self) -> Result<Vec<AlertEvent>, FetchError> {
        let payload: PacketsPayload = self.get_json("/api/packets/recent", &[]).await?;
        Ok(payload.packets)
    }

    /// Graph nodes and edges, agent records and communications in one pull.
    pub async fn fetch_agents_graph(&self) -> Result<AgentsSnapshot, FetchError> {
        self.get_json("/api/agents", &[]).await
    }

    pub async fn fetch_recent_alerts(&self) -> Result<Vec<AlertEvent>, FetchError> {
        let payload: AlertsPayload = self.get_json("/api/alerts/recent", &[]).await?;
        Ok(payload.alerts)
    }

    pub async fn search_packets(&self, query: &PacketQuery) -> Result<Vec<AlertEvent>, FetchError> {
        let payload: PacketsPayload = self.get_json("/api/packets", &query.to_pairs()).await?;
        Ok(payload.packets)
    }

    pub async fn fetch(&self, request: PullRequest) -> Result<PullPayload, FetchError> {
        match request {
            PullRequest::Overview => self.fetch_overview().await.map(PullPayload::Overview),
            PullRequest::RecentPackets => self
                .fetch_recent_packets()
                .await
                .map(PullPayload::RecentPackets),
            PullRequest::AgentsGraph => self
                .fetch_agents_graph()
                .await
                .map(PullPayload::AgentsGraph),
            PullRequest::RecentAlerts => self
                .fetch_recent_alerts()
                .await
                .map(PullPayload::RecentAlerts),
            PullRequest::Search(query) => {
                let packets = self.search_packets(&query).await?;
                Ok(PullPayload::Search { query, packets })
            }
        }
    }

    /// Runs one pull in the background. Failures are logged and produce no
    /// outcome, so the state behind the slot stays as it was.
    pub fn spawn(&self, ticket: PullTicket, request: PullRequest) {
        let loader = self.clone();
        tokio::spawn(async move {
            match loader.fetch(request).await {
                Ok(payload) => {
                    if loader.tx.send(PullOutcome { ticket, payload }).await.is_err() {
                        debug!("pull_dropped: kind={} receiver closed", ticket.kind);
                    }
                }
                Err(err) => warn!("pull_failed: kind={} seq={} {err}", ticket.kind, ticket.seq),
            }
        });
    }

    /// Issues every bootstrap pull of a screen at once.
    pub fn bootstrap(&self, requests: Vec<(PullTicket, PullRequest)>) {
        for (ticket, request) in requests {
            self.spawn(ticket, request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use a2a_core::Severity;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::time::Duration;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn packet(id: u32, severity: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "timestamp": "2026-02-07T21:00:00",
            "severity": severity,
            "threat_type": "Task Replay",
            "source_agent": "Atlas-Planner",
            "target_agent": "Hermes-Router",
            "protocol_layer": "Layer 3",
            "description": "replayed task",
            "resolution": "blocked"
        })
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/api/overview",
                get(|| async {
                    Json(serde_json::json!({
                        "agent_count": 6,
                        "high_threats": 2,
                        "communication_count": 9,
                        "last_update": "2026-02-07T21:00:00",
                        "total_packets": 40,
                        "severity_counts": {"높음": 2, "high": 1, "낮음": 5},
                        "layer_counts": {"Layer 3": 7},
                        "persistent_agents": ["Nyx-Vault"],
                        "threat_trend": [{"label": "21:00", "count": 3}]
                    }))
                }),
            )
            .route(
                "/api/packets",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    let severity = params.get("severity").cloned().unwrap_or_default();
                    let packets: Vec<serde_json::Value> = [packet(1, "높음"), packet(2, "낮음")]
                        .into_iter()
                        .filter(|item| severity.is_empty() || item["severity"] == severity.as_str())
                        .collect();
                    Json(serde_json::json!({ "packets": packets, "echo": params }))
                }),
            )
            .route(
                "/api/alerts/recent",
                get(|| async { Json(serde_json::json!({ "alerts": [packet(7, "중간")] })) }),
            )
            .route(
                "/api/packets/recent",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route("/api/agents", get(|| async { "not json" }))
    }

    async fn loader(base_url: String) -> (SnapshotLoader, mpsc::Receiver<PullOutcome>) {
        let (tx, rx) = mpsc::channel(8);
        let mut config = test_config();
        config.base_url = base_url;
        (SnapshotLoader::new(&config, tx).expect("client"), rx)
    }

    #[tokio::test]
    async fn overview_folds_severity_labels() {
        let (loader, _rx) = loader(serve(router()).await).await;
        let metrics = loader.fetch_overview().await.expect("overview");
        assert_eq!(metrics.agent_count, 6);
        assert_eq!(metrics.severity_count(Severity::High), 3);
        assert_eq!(metrics.severity_count(Severity::Low), 5);
        assert_eq!(metrics.persistent_agents[0].name, "Nyx-Vault");
        assert_eq!(metrics.threat_trend[0].window_label, "21:00");
    }

    #[tokio::test]
    async fn search_sends_only_filled_fields() {
        let (loader, _rx) = loader(serve(router()).await).await;
        let query = PacketQuery {
            severity: "높음".to_string(),
            ..PacketQuery::default()
        };
        let packets = loader.search_packets(&query).await.expect("search");
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].id, "1");

        let all = loader
            .search_packets(&PacketQuery::default())
            .await
            .expect("unfiltered");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn failures_map_to_fetch_errors() {
        let (loader, _rx) = loader(serve(router()).await).await;
        assert!(matches!(
            loader.fetch_recent_packets().await,
            Err(FetchError::Status { status: 500, .. })
        ));
        assert!(matches!(
            loader.fetch_agents_graph().await,
            Err(FetchError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn spawned_pull_reports_success_and_stays_silent_on_failure() {
        let (loader, mut rx) = loader(serve(router()).await).await;
        let ticket = PullTicket {
            kind: PullKind::RecentAlerts,
            seq: 4,
            epoch: 1,
        };
        loader.bootstrap(vec![
            (ticket, PullRequest::RecentAlerts),
            (
                PullTicket {
                    kind: PullKind::RecentPackets,
                    seq: 5,
                    epoch: 1,
                },
                PullRequest::RecentPackets,
            ),
        ]);

        let outcome = rx.recv().await.expect("outcome");
        assert_eq!(outcome.ticket, ticket);
        let PullPayload::RecentAlerts(alerts) = outcome.payload else {
            panic!("expected alerts payload");
        };
        assert_eq!(alerts[0].id, "7");

        let silent = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(silent.is_err());
    }
}
