use crate::{display_timestamp, AgentNode, AgentsSnapshot, GraphEdge, GraphNode, StatusBadge};

pub const SELECT_PLACEHOLDER: &str = "select a node or edge";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    pub badge: StatusBadge,
    pub risk: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDetail {
    pub edge_id: String,
    pub from_label: String,
    pub to_label: String,
    pub summary: String,
}

/// What the detail panel should show; consumed by a single renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailPanel {
    Placeholder,
    Agent(AgentProfile),
    Link(LinkDetail),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Node(String),
    Edge(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbour {
    pub label: String,
    pub direction: LinkDirection,
    pub summary: String,
}

/// Identity of an edge: the server id, else `from->to` with a suffix for repeats.
pub fn edge_key(edges: &[GraphEdge], index: usize) -> String {
    let edge = &edges[index];
    if let Some(id) = edge.id.as_deref() {
        return id.to_string();
    }
    let repeats = edges[..index]
        .iter()
        .filter(|other| other.id.is_none() && other.from == edge.from && other.to == edge.to)
        .count();
    if repeats == 0 {
        format!("{}->{}", edge.from, edge.to)
    } else {
        format!("{}->{}#{}", edge.from, edge.to, repeats)
    }
}

#[derive(Debug, Clone)]
pub struct GraphState {
    snapshot: AgentsSnapshot,
    selection: Option<Selection>,
    panel: DetailPanel,
    fitted: bool,
}

impl Default for GraphState {
    fn default() -> Self {
        Self {
            snapshot: AgentsSnapshot::default(),
            selection: None,
            panel: DetailPanel::Placeholder,
            fitted: false,
        }
    }
}

impl GraphState {
    pub fn snapshot(&self) -> &AgentsSnapshot {
        &self.snapshot
    }

    pub fn panel(&self) -> &DetailPanel {
        &self.panel
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn selected_node(&self) -> Option<&str> {
        match self.selection.as_ref() {
            Some(Selection::Node(id)) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn selected_edge(&self) -> Option<&str> {
        match self.selection.as_ref() {
            Some(Selection::Edge(id)) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn edge_keys(&self) -> Vec<String> {
        (0..self.snapshot.edges.len())
            .map(|index| edge_key(&self.snapshot.edges, index))
            .collect()
    }

    /// Swaps in a fresh graph and re-resolves the current selection against it.
    pub fn replace_snapshot(&mut self, snapshot: AgentsSnapshot) {
        self.snapshot = snapshot;
        match self.selection.clone() {
            Some(Selection::Node(id)) => {
                self.select_node(&id);
            }
            Some(Selection::Edge(id)) => {
                self.select_edge(&id);
            }
            None => {}
        }
    }

    /// Returns false on a miss; the panel then keeps whatever it showed before.
    pub fn select_node(&mut self, id: &str) -> bool {
        let Some(agent) = self.snapshot.agents.iter().find(|agent| agent.id == id) else {
            return false;
        };
        self.panel = DetailPanel::Agent(agent_profile(agent));
        self.selection = Some(Selection::Node(id.to_string()));
        true
    }

    pub fn select_edge(&mut self, id: &str) -> bool {
        let edges = &self.snapshot.edges;
        let Some(index) = (0..edges.len()).find(|index| edge_key(edges, *index) == id) else {
            return false;
        };
        let edge = &edges[index];
        let detail = LinkDetail {
            edge_id: id.to_string(),
            from_label: self.node_label(&edge.from),
            to_label: self.node_label(&edge.to),
            summary: edge.label.clone(),
        };
        self.panel = DetailPanel::Link(detail);
        self.selection = Some(Selection::Edge(id.to_string()));
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
        self.panel = DetailPanel::Placeholder;
    }

    /// Moves the node cursor by `step`, wrapping; starts from the first node.
    pub fn select_next_node(&mut self, step: isize) -> bool {
        let ids: Vec<String> = self.snapshot.nodes.iter().map(|node| node.id.clone()).collect();
        let current = self.selected_node().map(str::to_string);
        match cycle(&ids, current.as_deref(), step) {
            Some(id) => self.select_node(&id),
            None => false,
        }
    }

    pub fn select_next_edge(&mut self, step: isize) -> bool {
        let keys = self.edge_keys();
        let current = self.selected_edge().map(str::to_string);
        match cycle(&keys, current.as_deref(), step) {
            Some(id) => self.select_edge(&id),
            None => false,
        }
    }

    /// True only for the first stabilization of this session.
    pub fn on_stabilized(&mut self) -> bool {
        if self.fitted {
            return false;
        }
        self.fitted = true;
        true
    }

    pub fn neighbours(&self, id: &str) -> Vec<Neighbour> {
        self.snapshot
            .edges
            .iter()
            .filter_map(|edge| {
                if edge.from == id {
                    Some(Neighbour {
                        label: self.node_label(&edge.to),
                        direction: LinkDirection::Outbound,
                        summary: edge.label.clone(),
                    })
                } else if edge.to == id {
                    Some(Neighbour {
                        label: self.node_label(&edge.from),
                        direction: LinkDirection::Inbound,
                        summary: edge.label.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn node_label(&self, id: &str) -> String {
        if let Some(node) = self.find_node(id) {
            if !node.label.is_empty() {
                return node.label.clone();
            }
        }
        self.snapshot
            .agents
            .iter()
            .find(|agent| agent.id == id)
            .map(|agent| agent.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.snapshot.nodes.iter().find(|node| node.id == id)
    }
}

fn agent_profile(agent: &AgentNode) -> AgentProfile {
    AgentProfile {
        id: agent.id.clone(),
        name: agent.name.clone(),
        role: agent.role.clone(),
        badge: agent.status.badge(),
        risk: agent.risk_percent(),
        last_seen: display_timestamp(&agent.last_seen),
    }
}

fn cycle(ids: &[String], current: Option<&str>, step: isize) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    let len = ids.len() as isize;
    let next = match current.and_then(|id| ids.iter().position(|candidate| candidate == id)) {
        Some(position) => (position as isize + step).rem_euclid(len),
        None if step < 0 => len - 1,
        None => 0,
    };
    ids.get(next as usize).cloned()
}
