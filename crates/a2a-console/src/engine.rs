use crate::snapshot::{PullKind, PullOutcome, PullPayload, PullRequest, PullTicket};
use crate::view::{Screen, ViewSlot};
use a2a_core::filter::{FilterState, PacketQuery, SeverityChip};
use a2a_core::graph::GraphState;
use a2a_core::{
    AlertEvent, Communication, EventBuffer, FillOutcome, OverviewMetrics, ALERT_TICKER_CAPACITY,
    LIVE_FEED_CAPACITY,
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const OVERVIEW_SLOTS: [ViewSlot; 5] = [
    ViewSlot::MetricTiles,
    ViewSlot::SeverityChart,
    ViewSlot::LayerChart,
    ViewSlot::TrendChart,
    ViewSlot::PersistentAgents,
];

const GRAPH_SLOTS: [ViewSlot; 4] = [
    ViewSlot::GraphCanvas,
    ViewSlot::DetailPanel,
    ViewSlot::AgentMiniGraph,
    ViewSlot::Communications,
];

const SELECTION_SLOTS: [ViewSlot; 3] = [
    ViewSlot::GraphCanvas,
    ViewSlot::DetailPanel,
    ViewSlot::AgentMiniGraph,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketResults {
    pub query: PacketQuery,
    pub packets: Vec<AlertEvent>,
}

/// Per-kind sequence bookkeeping for pull completions.
#[derive(Debug, Default)]
struct PullLedger {
    next_seq: u64,
    applied: HashMap<PullKind, u64>,
}

impl PullLedger {
    fn issue(&mut self, kind: PullKind, epoch: u64) -> PullTicket {
        self.next_seq += 1;
        PullTicket {
            kind,
            seq: self.next_seq,
            epoch,
        }
    }

    /// Accepts a completion only if nothing newer of its kind was applied.
    fn accept(&mut self, ticket: PullTicket) -> bool {
        let last = self.applied.entry(ticket.kind).or_insert(0);
        if ticket.seq <= *last {
            return false;
        }
        *last = ticket.seq;
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub pushed: u64,
    pub applied: u64,
    pub stale: u64,
    pub fills_skipped: u64,
}

/// Owns all session state of one screen. Rebuilt on every screen switch.
#[derive(Debug)]
pub struct Engine {
    screen: Screen,
    epoch: u64,
    live_feed: EventBuffer<AlertEvent>,
    ticker: EventBuffer<AlertEvent>,
    recent_packets: Vec<AlertEvent>,
    overview: Option<OverviewMetrics>,
    graph: GraphState,
    packet_results: Option<PacketResults>,
    filter: FilterState,
    show_only_critical: bool,
    ledger: PullLedger,
    dirty: BTreeSet<ViewSlot>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(screen: Screen, epoch: u64) -> Self {
        Self {
            screen,
            epoch,
            live_feed: EventBuffer::with_capacity(LIVE_FEED_CAPACITY),
            ticker: EventBuffer::with_capacity(ALERT_TICKER_CAPACITY),
            recent_packets: Vec::new(),
            overview: None,
            graph: GraphState::default(),
            packet_results: None,
            filter: FilterState::default(),
            show_only_critical: false,
            ledger: PullLedger::default(),
            dirty: screen.slots().iter().copied().collect(),
            stats: EngineStats::default(),
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn live_feed(&self) -> &EventBuffer<AlertEvent> {
        &self.live_feed
    }

    pub fn ticker(&self) -> &EventBuffer<AlertEvent> {
        &self.ticker
    }

    pub fn recent_packets(&self) -> &[AlertEvent] {
        &self.recent_packets
    }

    pub fn overview(&self) -> Option<&OverviewMetrics> {
        self.overview.as_ref()
    }

    pub fn graph(&self) -> &GraphState {
        &self.graph
    }

    pub fn communications(&self) -> &[Communication] {
        &self.graph.snapshot().communications
    }

    pub fn packet_results(&self) -> Option<&PacketResults> {
        self.packet_results.as_ref()
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn show_only_critical(&self) -> bool {
        self.show_only_critical
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    fn shows_any(&self, slots: &[ViewSlot]) -> bool {
        slots.iter().any(|slot| self.screen.has(*slot))
    }

    fn mark(&mut self, slots: &[ViewSlot]) {
        self.dirty.extend(slots.iter().copied());
    }

    fn issue(&mut self, request: PullRequest) -> (PullTicket, PullRequest) {
        let ticket = self.ledger.issue(request.kind(), self.epoch);
        (ticket, request)
    }

    /// Pulls needed by the slots of this screen, one per backing source.
    pub fn bootstrap_requests(&mut self) -> Vec<(PullTicket, PullRequest)> {
        let mut requests = Vec::new();
        if self.shows_any(&OVERVIEW_SLOTS) {
            requests.push(PullRequest::Overview);
        }
        if self.shows_any(&[ViewSlot::LiveFeed, ViewSlot::AlertTicker]) {
            requests.push(PullRequest::RecentAlerts);
        }
        if self.screen.has(ViewSlot::Timeline) {
            requests.push(PullRequest::RecentPackets);
        }
        if self.shows_any(&GRAPH_SLOTS) {
            requests.push(PullRequest::AgentsGraph);
        }
        if self.screen.has(ViewSlot::PacketTable) {
            requests.push(PullRequest::Search(self.filter.form().clone()));
        }
        requests
            .into_iter()
            .map(|request| self.issue(request))
            .collect()
    }

    /// Everything the refresh key re-pulls; buffers are guarded, so only
    /// snapshots change.
    pub fn refresh_requests(&mut self) -> Vec<(PullTicket, PullRequest)> {
        self.bootstrap_requests()
    }

    /// Dispatch target of the push channel. Returns the re-pulls of the
    /// server-side aggregates and packet timeline this screen shows.
    pub fn ingest_push(&mut self, event: AlertEvent) -> Vec<(PullTicket, PullRequest)> {
        self.stats.pushed += 1;
        self.ticker.insert(event.clone());
        self.live_feed.insert(event);
        self.mark(&[ViewSlot::LiveFeed, ViewSlot::AlertTicker]);
        let mut repulls = Vec::new();
        if self.shows_any(&OVERVIEW_SLOTS) {
            repulls.push(self.issue(PullRequest::Overview));
        }
        if self.screen.has(ViewSlot::Timeline) {
            repulls.push(self.issue(PullRequest::RecentPackets));
        }
        repulls
    }

    /// Applies a finished pull unless it is stale; returns whether it landed.
    pub fn apply_pull(&mut self, outcome: PullOutcome) -> bool {
        let PullOutcome { ticket, payload } = outcome;
        if ticket.epoch != self.epoch || !self.ledger.accept(ticket) {
            self.stats.stale += 1;
            debug!(
                "pull_stale: kind={} seq={} epoch={}",
                ticket.kind, ticket.seq, ticket.epoch
            );
            return false;
        }
        self.stats.applied += 1;
        match payload {
            PullPayload::Overview(metrics) => {
                self.overview = Some(metrics);
                self.mark(&OVERVIEW_SLOTS);
            }
            PullPayload::RecentAlerts(alerts) => {
                let feed = self.live_feed.snapshot_fill(alerts.iter().cloned());
                let ticker = self.ticker.snapshot_fill(alerts);
                if feed == FillOutcome::Skipped {
                    self.stats.fills_skipped += 1;
                } else {
                    self.mark(&[ViewSlot::LiveFeed]);
                }
                if ticker == FillOutcome::Skipped {
                    self.stats.fills_skipped += 1;
                } else {
                    self.mark(&[ViewSlot::AlertTicker]);
                }
            }
            PullPayload::RecentPackets(packets) => {
                self.recent_packets = packets;
                self.mark(&[ViewSlot::Timeline]);
            }
            PullPayload::AgentsGraph(snapshot) => {
                self.graph.replace_snapshot(snapshot);
                self.mark(&GRAPH_SLOTS);
            }
            PullPayload::Search { query, packets } => {
                self.packet_results = Some(PacketResults { query, packets });
                self.mark(&[ViewSlot::PacketTable]);
            }
        }
        true
    }

    pub fn apply_chip(&mut self, chip: SeverityChip) -> (PullTicket, PullRequest) {
        let query = self.filter.apply_chip(chip);
        self.mark(&[ViewSlot::PacketTable]);
        self.issue(PullRequest::Search(query))
    }

    pub fn submit_filter(&mut self) -> (PullTicket, PullRequest) {
        let query = self.filter.submit();
        self.mark(&[ViewSlot::PacketTable]);
        self.issue(PullRequest::Search(query))
    }

    /// Form edits only touch local state; nothing is fetched until submit.
    pub fn edit_filter(&mut self, edit: impl FnOnce(&mut FilterState)) {
        edit(&mut self.filter);
        self.mark(&[ViewSlot::PacketTable]);
    }

    pub fn toggle_only_critical(&mut self) {
        self.show_only_critical = !self.show_only_critical;
        self.mark(&[ViewSlot::LiveFeed]);
    }

    pub fn select_next_node(&mut self, step: isize) -> bool {
        let changed = self.graph.select_next_node(step);
        if changed {
            self.mark(&SELECTION_SLOTS);
        }
        changed
    }

    pub fn select_next_edge(&mut self, step: isize) -> bool {
        let changed = self.graph.select_next_edge(step);
        if changed {
            self.mark(&SELECTION_SLOTS);
        }
        changed
    }

    pub fn clear_selection(&mut self) {
        self.graph.clear_selection();
        self.mark(&SELECTION_SLOTS);
    }

    pub fn on_layout_stabilized(&mut self) -> bool {
        self.graph.on_stabilized()
    }

    pub fn mark_dirty(&mut self, slot: ViewSlot) {
        self.dirty.insert(slot);
    }

    pub fn take_dirty(&mut self) -> BTreeSet<ViewSlot> {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a2a_core::{AgentsSnapshot, Severity};

    fn alert(id: u32, severity: &str) -> AlertEvent {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "timestamp": format!("2026-02-07T21:00:{:02}", id % 60),
            "severity": severity,
            "threat_type": "Task Replay",
            "source_agent": "Atlas-Planner",
            "target_agent": "Hermes-Router",
            "protocol_layer": "Layer 3",
            "description": "replayed",
            "resolution": "blocked"
        }))
        .expect("alert fixture")
    }

    fn ids(buffer: &EventBuffer<AlertEvent>) -> Vec<String> {
        buffer.ids().into_iter().map(str::to_string).collect()
    }

    fn outcome(ticket: PullTicket, payload: PullPayload) -> PullOutcome {
        PullOutcome { ticket, payload }
    }

    fn ticket_for(requests: &[(PullTicket, PullRequest)], kind: PullKind) -> PullTicket {
        requests
            .iter()
            .find(|(ticket, _)| ticket.kind == kind)
            .map(|(ticket, _)| *ticket)
            .expect("requested kind")
    }

    #[test]
    fn bootstrap_requests_follow_screen_slots() {
        let kinds = |screen| {
            let mut engine = Engine::new(screen, 1);
            engine
                .bootstrap_requests()
                .into_iter()
                .map(|(ticket, _)| ticket.kind)
                .collect::<Vec<_>>()
        };
        assert_eq!(
            kinds(Screen::Dashboard),
            vec![
                PullKind::Overview,
                PullKind::RecentAlerts,
                PullKind::RecentPackets,
                PullKind::AgentsGraph
            ]
        );
        assert_eq!(
            kinds(Screen::Graph),
            vec![PullKind::Overview, PullKind::RecentAlerts, PullKind::AgentsGraph]
        );
        assert_eq!(kinds(Screen::Packets), vec![PullKind::RecentAlerts, PullKind::Search]);
    }

    #[test]
    fn push_before_bootstrap_is_not_overwritten() {
        let mut engine = Engine::new(Screen::Dashboard, 1);
        let requests = engine.bootstrap_requests();
        engine.take_dirty();

        let repulls = engine.ingest_push(alert(9, "높음"));
        assert_eq!(repulls.len(), 2);

        let applied = engine.apply_pull(outcome(
            ticket_for(&requests, PullKind::RecentAlerts),
            PullPayload::RecentAlerts(vec![alert(3, "낮음"), alert(2, "낮음"), alert(1, "낮음")]),
        ));
        assert!(applied);
        assert_eq!(ids(engine.live_feed()), vec!["9"]);
        assert_eq!(ids(engine.ticker()), vec!["9"]);
        assert_eq!(engine.stats().fills_skipped, 2);
    }

    #[test]
    fn bootstrap_fills_empty_buffers_to_capacity() {
        let mut engine = Engine::new(Screen::Dashboard, 1);
        let requests = engine.bootstrap_requests();
        engine.take_dirty();
        let alerts: Vec<AlertEvent> = (1..=40).rev().map(|id| alert(id, "중간")).collect();
        engine.apply_pull(outcome(
            ticket_for(&requests, PullKind::RecentAlerts),
            PullPayload::RecentAlerts(alerts),
        ));
        assert_eq!(engine.live_feed().len(), LIVE_FEED_CAPACITY);
        assert_eq!(ids(engine.ticker()), vec!["40", "39", "38"]);
        let dirty = engine.take_dirty();
        assert!(dirty.contains(&ViewSlot::LiveFeed));
        assert!(dirty.contains(&ViewSlot::AlertTicker));

        engine.ingest_push(alert(41, "높음"));
        assert_eq!(ids(engine.ticker()), vec!["41", "40", "39"]);
        assert_eq!(engine.live_feed().newest().map(|event| event.id.as_str()), Some("41"));
    }

    #[test]
    fn later_issued_search_wins_over_slow_earlier_one() {
        let mut engine = Engine::new(Screen::Packets, 1);
        let (high_ticket, high) = engine.apply_chip(SeverityChip::Only(Severity::High));
        let (reset_ticket, reset) = engine.apply_chip(SeverityChip::Reset);
        let PullRequest::Search(high_query) = high else {
            panic!("expected search");
        };
        let PullRequest::Search(reset_query) = reset else {
            panic!("expected search");
        };

        assert!(engine.apply_pull(outcome(
            reset_ticket,
            PullPayload::Search {
                query: reset_query.clone(),
                packets: vec![alert(1, "높음"), alert(2, "낮음")],
            },
        )));
        assert!(!engine.apply_pull(outcome(
            high_ticket,
            PullPayload::Search {
                query: high_query,
                packets: vec![alert(1, "높음")],
            },
        )));

        assert_eq!(
            engine.packet_results(),
            Some(&PacketResults {
                query: reset_query,
                packets: vec![alert(1, "높음"), alert(2, "낮음")],
            })
        );
        assert_eq!(engine.stats().stale, 1);
    }

    #[test]
    fn in_order_completions_both_apply() {
        let mut engine = Engine::new(Screen::Packets, 1);
        let (first, _) = engine.submit_filter();
        let (second, _) = engine.submit_filter();
        let payload = || PullPayload::Search {
            query: PacketQuery::default(),
            packets: Vec::new(),
        };
        assert!(engine.apply_pull(outcome(first, payload())));
        assert!(engine.apply_pull(outcome(second, payload())));
    }

    #[test]
    fn completions_from_previous_session_are_dropped() {
        let mut old = Engine::new(Screen::Graph, 1);
        let requests = old.bootstrap_requests();
        let mut engine = Engine::new(Screen::Graph, 2);
        engine.take_dirty();
        let applied = engine.apply_pull(outcome(
            ticket_for(&requests, PullKind::AgentsGraph),
            PullPayload::AgentsGraph(AgentsSnapshot::default()),
        ));
        assert!(!applied);
        assert!(engine.take_dirty().is_empty());
    }

    #[test]
    fn critical_toggle_marks_feed_without_fetching() {
        let mut engine = Engine::new(Screen::Dashboard, 1);
        engine.take_dirty();
        engine.toggle_only_critical();
        assert!(engine.show_only_critical());
        assert_eq!(
            engine.take_dirty().into_iter().collect::<Vec<_>>(),
            vec![ViewSlot::LiveFeed]
        );
    }

    #[test]
    fn packets_screen_push_requests_no_repull() {
        let mut engine = Engine::new(Screen::Packets, 1);
        assert!(engine.ingest_push(alert(1, "높음")).is_empty());
        assert_eq!(ids(engine.ticker()), vec!["1"]);
    }

    fn repull_kinds(repulls: &[(PullTicket, PullRequest)]) -> Vec<PullKind> {
        repulls.iter().map(|(ticket, _)| ticket.kind).collect()
    }

    #[test]
    fn dashboard_push_repulls_overview_and_timeline() {
        let mut engine = Engine::new(Screen::Dashboard, 1);
        let requests = engine.bootstrap_requests();
        assert!(engine.apply_pull(outcome(
            ticket_for(&requests, PullKind::RecentPackets),
            PullPayload::RecentPackets(vec![alert(1, "낮음")]),
        )));
        engine.take_dirty();

        let repulls = engine.ingest_push(alert(2, "높음"));
        assert_eq!(
            repull_kinds(&repulls),
            vec![PullKind::Overview, PullKind::RecentPackets]
        );

        let timeline = ticket_for(&repulls, PullKind::RecentPackets);
        assert!(engine.apply_pull(outcome(
            timeline,
            PullPayload::RecentPackets(vec![alert(2, "높음"), alert(1, "낮음")]),
        )));
        assert_eq!(engine.recent_packets().len(), 2);
        assert!(engine.take_dirty().contains(&ViewSlot::Timeline));
    }

    #[test]
    fn graph_push_repulls_overview_only() {
        let mut engine = Engine::new(Screen::Graph, 1);
        let repulls = engine.ingest_push(alert(1, "중간"));
        assert_eq!(repull_kinds(&repulls), vec![PullKind::Overview]);
    }
}
