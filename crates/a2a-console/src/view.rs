use a2a_core::graph::edge_key;
use a2a_core::{GraphEdge, GraphNode};
use ratatui::text::Line;
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

const STABILIZATION_ITERATIONS: u32 = 120;
const SEED_RADIUS: f64 = 60.0;
const REPULSION: f64 = 1_800.0;
const SPRING: f64 = 0.04;
const REST_LENGTH: f64 = 45.0;
const MAX_STEP: f64 = 4.0;
const FIT_MARGIN: f64 = 0.15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Screen {
    Dashboard,
    Graph,
    Packets,
}

impl Screen {
    pub const ALL: [Screen; 3] = [Screen::Dashboard, Screen::Graph, Screen::Packets];

    pub fn title(self) -> &'static str {
        match self {
            Screen::Dashboard => "Dashboard",
            Screen::Graph => "Graph",
            Screen::Packets => "Packets",
        }
    }

    pub fn slots(self) -> &'static [ViewSlot] {
        match self {
            Screen::Dashboard => &[
                ViewSlot::MetricTiles,
                ViewSlot::AlertTicker,
                ViewSlot::LiveFeed,
                ViewSlot::Timeline,
                ViewSlot::SeverityChart,
                ViewSlot::LayerChart,
                ViewSlot::TrendChart,
                ViewSlot::PersistentAgents,
                ViewSlot::Communications,
            ],
            Screen::Graph => &[
                ViewSlot::MetricTiles,
                ViewSlot::AlertTicker,
                ViewSlot::GraphCanvas,
                ViewSlot::DetailPanel,
                ViewSlot::AgentMiniGraph,
                ViewSlot::Communications,
            ],
            Screen::Packets => &[ViewSlot::AlertTicker, ViewSlot::PacketTable],
        }
    }

    pub fn has(self, slot: ViewSlot) -> bool {
        self.slots().contains(&slot)
    }

    pub fn next(self) -> Self {
        match self {
            Screen::Dashboard => Screen::Graph,
            Screen::Graph => Screen::Packets,
            Screen::Packets => Screen::Dashboard,
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title().to_ascii_lowercase())
    }
}

impl FromStr for Screen {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dashboard" | "index" | "home" => Ok(Screen::Dashboard),
            "graph" | "agents" => Ok(Screen::Graph),
            "packets" | "search" => Ok(Screen::Packets),
            other => Err(format!("unknown screen: {other}")),
        }
    }
}

/// Named presentation targets; a screen lays out a subset of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewSlot {
    MetricTiles,
    AlertTicker,
    LiveFeed,
    Timeline,
    SeverityChart,
    LayerChart,
    TrendChart,
    PersistentAgents,
    Communications,
    PacketTable,
    GraphCanvas,
    DetailPanel,
    AgentMiniGraph,
}

impl ViewSlot {
    pub fn title(self) -> &'static str {
        match self {
            ViewSlot::MetricTiles => "Overview",
            ViewSlot::AlertTicker => "Alerts",
            ViewSlot::LiveFeed => "Live Feed",
            ViewSlot::Timeline => "Timeline",
            ViewSlot::SeverityChart => "Severity",
            ViewSlot::LayerChart => "Layers",
            ViewSlot::TrendChart => "Threat Trend",
            ViewSlot::PersistentAgents => "Persistent Agents",
            ViewSlot::Communications => "Communications",
            ViewSlot::PacketTable => "Packets",
            ViewSlot::GraphCanvas => "Agent Graph",
            ViewSlot::DetailPanel => "Detail",
            ViewSlot::AgentMiniGraph => "Neighbours",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SlotBody {
    Lines(Vec<Line<'static>>),
    Table {
        caption: Vec<Line<'static>>,
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Placeholder(String),
}

impl SlotBody {
    pub fn plain_text(&self) -> String {
        fn flatten(lines: &[Line<'static>]) -> Vec<String> {
            lines
                .iter()
                .map(|line| {
                    line.spans
                        .iter()
                        .map(|span| span.content.as_ref())
                        .collect::<String>()
                })
                .collect()
        }
        match self {
            SlotBody::Lines(lines) => flatten(lines).join("\n"),
            SlotBody::Table {
                caption,
                header,
                rows,
            } => {
                let mut out = flatten(caption);
                out.push(header.join(" | "));
                out.extend(rows.iter().map(|row| row.join(" | ")));
                out.join("\n")
            }
            SlotBody::Placeholder(text) => text.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlotView {
    pub body: SlotBody,
    pub revision: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Bars,
    Trend,
}

/// Retained chart: series data is swapped in place, view state survives.
#[derive(Clone, Debug)]
pub struct ChartHandle {
    kind: ChartKind,
    labels: Vec<String>,
    values: Vec<u64>,
    highlight: Option<usize>,
    window: usize,
    revision: u64,
}

impl ChartHandle {
    fn new(kind: ChartKind) -> Self {
        Self {
            kind,
            labels: Vec::new(),
            values: Vec::new(),
            highlight: None,
            window: 0,
            revision: 0,
        }
    }

    pub fn kind(&self) -> ChartKind {
        self.kind
    }

    pub fn set_series(&mut self, series: impl IntoIterator<Item = (String, u64)>) {
        self.labels.clear();
        self.values.clear();
        for (label, value) in series {
            self.labels.push(label);
            self.values.push(value);
        }
        if let Some(index) = self.highlight {
            if index >= self.values.len() {
                self.highlight = self.values.len().checked_sub(1);
            }
        }
        self.revision += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn highlight(&self) -> Option<usize> {
        self.highlight
    }

    pub fn move_highlight(&mut self, step: isize) {
        if self.values.is_empty() {
            self.highlight = None;
            return;
        }
        let len = self.values.len() as isize;
        let next = match self.highlight {
            Some(index) => (index as isize + step).rem_euclid(len),
            None if step < 0 => len - 1,
            None => 0,
        };
        self.highlight = Some(next as usize);
    }

    /// Trailing points shown by the trend view; zero shows everything.
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn zoom_in(&mut self) {
        let shown = self.visible_range().len();
        if shown > 2 {
            self.window = shown - 1;
        }
    }

    pub fn zoom_out(&mut self) {
        if self.window == 0 {
            return;
        }
        self.window += 1;
        if self.window >= self.values.len() {
            self.window = 0;
        }
    }

    pub fn visible_range(&self) -> std::ops::Range<usize> {
        let len = self.values.len();
        if self.window == 0 || self.window >= len {
            0..len
        } else {
            len - self.window..len
        }
    }

    pub fn points(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutSignal {
    Stabilized,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CanvasNode {
    pub id: String,
    pub label: String,
    pub group: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanvasEdge {
    pub key: String,
    pub from: usize,
    pub to: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: [f64; 2],
    pub y: [f64; 2],
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: [-100.0, 100.0],
            y: [-100.0, 100.0],
        }
    }
}

/// Retained graph drawing with a small force-directed relaxation.
#[derive(Clone, Debug, Default)]
pub struct GraphCanvas {
    nodes: Vec<CanvasNode>,
    edges: Vec<CanvasEdge>,
    viewport: Viewport,
    focus: Option<String>,
    iterations_left: u32,
    revision: u64,
}

impl GraphCanvas {
    pub fn nodes(&self) -> &[CanvasNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[CanvasEdge] {
        &self.edges
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_settling(&self) -> bool {
        self.iterations_left > 0
    }

    /// Node id or edge key drawn highlighted.
    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn set_focus(&mut self, focus: Option<&str>) {
        if self.focus.as_deref() != focus {
            self.focus = focus.map(str::to_string);
            self.revision += 1;
        }
    }

    /// Known nodes keep their position; new ones are seeded on a circle.
    pub fn sync(&mut self, nodes: &[GraphNode], edges: &[GraphEdge]) {
        let previous: HashMap<&str, (f64, f64)> = self
            .nodes
            .iter()
            .map(|node| (node.id.as_str(), (node.x, node.y)))
            .collect();
        let mut changed = previous.len() != nodes.len();
        let count = nodes.len().max(1) as f64;
        let next: Vec<CanvasNode> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let (x, y) = match previous.get(node.id.as_str()) {
                    Some(position) => *position,
                    None => {
                        changed = true;
                        let angle = TAU * index as f64 / count;
                        (SEED_RADIUS * angle.cos(), SEED_RADIUS * angle.sin())
                    }
                };
                CanvasNode {
                    id: node.id.clone(),
                    label: if node.label.is_empty() {
                        node.id.clone()
                    } else {
                        node.label.clone()
                    },
                    group: node.group.clone(),
                    x,
                    y,
                }
            })
            .collect();
        self.nodes = next;

        let index_of: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id.as_str(), index))
            .collect();
        let next_edges: Vec<CanvasEdge> = edges
            .iter()
            .enumerate()
            .filter_map(|(index, edge)| {
                Some(CanvasEdge {
                    key: edge_key(edges, index),
                    from: *index_of.get(edge.from.as_str())?,
                    to: *index_of.get(edge.to.as_str())?,
                })
            })
            .collect();
        if next_edges != self.edges {
            changed = true;
        }
        self.edges = next_edges;

        if changed {
            self.iterations_left = STABILIZATION_ITERATIONS;
        }
        self.revision += 1;
    }

    /// Runs one relaxation pass; reports when the layout has settled.
    pub fn step_layout(&mut self) -> Option<LayoutSignal> {
        if self.iterations_left == 0 {
            return None;
        }
        self.relax();
        self.iterations_left -= 1;
        self.revision += 1;
        if self.iterations_left == 0 {
            Some(LayoutSignal::Stabilized)
        } else {
            None
        }
    }

    fn relax(&mut self) {
        let len = self.nodes.len();
        let mut forces = vec![(0.0_f64, 0.0_f64); len];
        for i in 0..len {
            for j in (i + 1)..len {
                let dx = self.nodes[i].x - self.nodes[j].x;
                let dy = self.nodes[i].y - self.nodes[j].y;
                let dist_sq = (dx * dx + dy * dy).max(0.01);
                let dist = dist_sq.sqrt();
                let push = REPULSION / dist_sq;
                forces[i].0 += push * dx / dist;
                forces[i].1 += push * dy / dist;
                forces[j].0 -= push * dx / dist;
                forces[j].1 -= push * dy / dist;
            }
        }
        for edge in &self.edges {
            if edge.from == edge.to {
                continue;
            }
            let dx = self.nodes[edge.to].x - self.nodes[edge.from].x;
            let dy = self.nodes[edge.to].y - self.nodes[edge.from].y;
            let dist = (dx * dx + dy * dy).sqrt().max(0.1);
            let pull = SPRING * (dist - REST_LENGTH);
            forces[edge.from].0 += pull * dx / dist;
            forces[edge.from].1 += pull * dy / dist;
            forces[edge.to].0 -= pull * dx / dist;
            forces[edge.to].1 -= pull * dy / dist;
        }
        for (node, (fx, fy)) in self.nodes.iter_mut().zip(forces) {
            node.x += fx.clamp(-MAX_STEP, MAX_STEP);
            node.y += fy.clamp(-MAX_STEP, MAX_STEP);
        }
    }

    /// Centers the viewport on the current node cloud.
    pub fn fit(&mut self) {
        if self.nodes.is_empty() {
            self.viewport = Viewport::default();
            return;
        }
        let (mut min_x, mut max_x) = (f64::MAX, f64::MIN);
        let (mut min_y, mut max_y) = (f64::MAX, f64::MIN);
        for node in &self.nodes {
            min_x = min_x.min(node.x);
            max_x = max_x.max(node.x);
            min_y = min_y.min(node.y);
            max_y = max_y.max(node.y);
        }
        let pad_x = ((max_x - min_x) * FIT_MARGIN).max(10.0);
        let pad_y = ((max_y - min_y) * FIT_MARGIN).max(10.0);
        self.viewport = Viewport {
            x: [min_x - pad_x, max_x + pad_x],
            y: [min_y - pad_y, max_y + pad_y],
        };
        self.revision += 1;
    }
}

/// Everything drawn for one screen session.
///
/// Slots outside the active screen are never allocated, so writes to them
/// are dropped. Chart handles and the graph canvas are built on first use
/// and live until the surface itself is replaced.
#[derive(Debug)]
pub struct ViewSurface {
    screen: Screen,
    slots: BTreeMap<ViewSlot, SlotView>,
    charts: BTreeMap<ViewSlot, ChartHandle>,
    canvas: Option<GraphCanvas>,
    chart_builds: u32,
}

impl ViewSurface {
    pub fn new(screen: Screen) -> Self {
        let slots = screen
            .slots()
            .iter()
            .map(|slot| {
                (
                    *slot,
                    SlotView {
                        body: SlotBody::Placeholder("loading...".to_string()),
                        revision: 0,
                    },
                )
            })
            .collect();
        Self {
            screen,
            slots,
            charts: BTreeMap::new(),
            canvas: None,
            chart_builds: 0,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn has(&self, slot: ViewSlot) -> bool {
        self.slots.contains_key(&slot)
    }

    pub fn write(&mut self, slot: ViewSlot, body: SlotBody) -> bool {
        let Some(view) = self.slots.get_mut(&slot) else {
            return false;
        };
        view.body = body;
        view.revision += 1;
        true
    }

    pub fn slot(&self, slot: ViewSlot) -> Option<&SlotView> {
        self.slots.get(&slot)
    }

    pub fn text(&self, slot: ViewSlot) -> Option<String> {
        self.slots.get(&slot).map(|view| view.body.plain_text())
    }

    pub fn chart(&self, slot: ViewSlot) -> Option<&ChartHandle> {
        self.charts.get(&slot)
    }

    pub fn chart_mut(&mut self, slot: ViewSlot, kind: ChartKind) -> Option<&mut ChartHandle> {
        if !self.slots.contains_key(&slot) {
            return None;
        }
        if !self.charts.contains_key(&slot) {
            self.chart_builds += 1;
            self.charts.insert(slot, ChartHandle::new(kind));
        }
        self.charts.get_mut(&slot)
    }

    pub fn chart_builds(&self) -> u32 {
        self.chart_builds
    }

    pub fn canvas(&self) -> Option<&GraphCanvas> {
        self.canvas.as_ref()
    }

    pub fn canvas_mut(&mut self) -> Option<&mut GraphCanvas> {
        if !self.slots.contains_key(&ViewSlot::GraphCanvas) {
            return None;
        }
        Some(self.canvas.get_or_insert_with(GraphCanvas::default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            label: format!("agent-{id}"),
            title: String::new(),
            group: "normal".to_string(),
        }
    }

    fn edge(from: &str, to: &str) -> GraphEdge {
        GraphEdge {
            id: None,
            from: from.to_string(),
            to: to.to_string(),
            label: "recent traffic".to_string(),
            title: String::new(),
        }
    }

    #[test]
    fn writes_to_absent_slots_are_dropped() {
        let mut surface = ViewSurface::new(Screen::Packets);
        assert!(!surface.write(ViewSlot::LiveFeed, SlotBody::Placeholder("x".into())));
        assert!(surface.slot(ViewSlot::LiveFeed).is_none());
        assert!(surface.chart_mut(ViewSlot::SeverityChart, ChartKind::Bars).is_none());
        assert!(surface.canvas_mut().is_none());
        assert!(surface.write(ViewSlot::PacketTable, SlotBody::Placeholder("y".into())));
        assert_eq!(surface.slot(ViewSlot::PacketTable).map(|view| view.revision), Some(1));
    }

    #[test]
    fn chart_handle_is_built_once_and_keeps_view_state() {
        let mut surface = ViewSurface::new(Screen::Dashboard);
        let chart = surface
            .chart_mut(ViewSlot::SeverityChart, ChartKind::Bars)
            .expect("slot present");
        chart.set_series([("high".to_string(), 3), ("medium".to_string(), 1)]);
        chart.move_highlight(1);
        chart.move_highlight(1);

        let chart = surface
            .chart_mut(ViewSlot::SeverityChart, ChartKind::Bars)
            .expect("slot present");
        chart.set_series([
            ("high".to_string(), 4),
            ("medium".to_string(), 2),
            ("low".to_string(), 1),
        ]);
        assert_eq!(chart.highlight(), Some(1));
        assert_eq!(chart.revision(), 2);
        assert_eq!(surface.chart_builds(), 1);
    }

    #[test]
    fn trend_zoom_survives_series_updates() {
        let mut surface = ViewSurface::new(Screen::Dashboard);
        let chart = surface
            .chart_mut(ViewSlot::TrendChart, ChartKind::Trend)
            .expect("slot present");
        chart.set_series((0..6).map(|idx| (format!("t{idx}"), idx)));
        chart.zoom_in();
        chart.zoom_in();
        assert_eq!(chart.visible_range(), 2..6);
        chart.set_series((0..8).map(|idx| (format!("t{idx}"), idx)));
        assert_eq!(chart.visible_range(), 4..8);
        chart.zoom_out();
        chart.zoom_out();
        chart.zoom_out();
        chart.zoom_out();
        assert_eq!(chart.window(), 0);
    }

    #[test]
    fn canvas_keeps_positions_and_stabilizes() {
        let mut canvas = GraphCanvas::default();
        canvas.sync(&[node("1"), node("2")], &[edge("1", "2")]);
        let mut signals = 0;
        while canvas.is_settling() {
            if canvas.step_layout() == Some(LayoutSignal::Stabilized) {
                signals += 1;
            }
        }
        assert_eq!(signals, 1);
        assert_eq!(canvas.step_layout(), None);

        let settled = canvas.nodes()[0].clone();
        canvas.sync(&[node("1"), node("2")], &[edge("1", "2")]);
        assert!(!canvas.is_settling());
        assert_eq!(canvas.nodes()[0], settled);

        canvas.sync(&[node("1"), node("2"), node("3")], &[edge("1", "2"), edge("9", "1")]);
        assert!(canvas.is_settling());
        assert_eq!(canvas.nodes()[0].x, settled.x);
        assert_eq!(canvas.edges().len(), 1);
    }

    #[test]
    fn fit_wraps_node_cloud() {
        let mut canvas = GraphCanvas::default();
        canvas.sync(&[node("1"), node("2"), node("3")], &[]);
        canvas.fit();
        let viewport = canvas.viewport();
        for node in canvas.nodes() {
            assert!(node.x > viewport.x[0] && node.x < viewport.x[1]);
            assert!(node.y > viewport.y[0] && node.y < viewport.y[1]);
        }
        assert_ne!(viewport, Viewport::default());
    }

    #[test]
    fn screen_names_parse() {
        assert_eq!("Graph".parse::<Screen>(), Ok(Screen::Graph));
        assert_eq!(" packets ".parse::<Screen>(), Ok(Screen::Packets));
        assert!("settings".parse::<Screen>().is_err());
        assert!(Screen::Packets.has(ViewSlot::AlertTicker));
        assert!(!Screen::Packets.has(ViewSlot::MetricTiles));
    }
}
