use crate::engine::{Engine, PacketResults};
use crate::stream::StreamState;
use crate::view::{ChartKind, GraphCanvas, Screen, SlotBody, ViewSlot, ViewSurface};
use a2a_core::filter::{FilterState, QueryField};
use a2a_core::graph::{DetailPanel, GraphState, LinkDirection, SELECT_PLACEHOLDER};
use a2a_core::{
    display_timestamp, AlertEvent, BadgeTone, Communication, EventBuffer, OverviewMetrics,
    Severity, LIVE_FEED_CAPACITY,
};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::canvas::{Canvas, Line as CanvasLine};
use ratatui::widgets::{
    Bar, BarChart, BarGroup, Block, Borders, Clear, Paragraph, Row, Sparkline, Table, Wrap,
};

const COMPACT_WIDTH: u16 = 100;

#[derive(Clone, Copy)]
pub struct ConsoleTheme {
    bg: Color,
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
    info: Color,
}

pub fn console_theme() -> ConsoleTheme {
    ConsoleTheme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
        info: Color::Rgb(59, 130, 246),
    }
}

fn severity_color(severity: Severity, theme: ConsoleTheme) -> Color {
    match severity {
        Severity::High => theme.critical,
        Severity::Medium => theme.warn,
        Severity::Low => theme.ok,
    }
}

fn tone_color(tone: BadgeTone, theme: ConsoleTheme) -> Color {
    match tone {
        BadgeTone::Ok => theme.ok,
        BadgeTone::Warn => theme.warn,
        BadgeTone::Critical => theme.critical,
    }
}

fn placeholder(text: &str) -> SlotBody {
    SlotBody::Placeholder(text.to_string())
}

fn short_time(raw: &str) -> String {
    let full = display_timestamp(raw);
    match full.split_once(' ') {
        Some((_, time)) => time.to_string(),
        None => full,
    }
}

fn severity_span(event: &AlertEvent, theme: ConsoleTheme) -> Span<'static> {
    let severity = event.severity();
    Span::styled(
        format!("{:<6}", severity.as_str().to_ascii_uppercase()),
        Style::default()
            .fg(severity_color(severity, theme))
            .add_modifier(Modifier::BOLD),
    )
}

fn event_line(event: &AlertEvent, theme: ConsoleTheme) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("{} ", short_time(&event.timestamp)),
            Style::default().fg(theme.muted),
        ),
        severity_span(event, theme),
        Span::styled(
            format!(" {} ", event.threat_type),
            Style::default().fg(theme.text),
        ),
        Span::styled(
            format!("{} -> {}", event.source_agent, event.target_agent),
            Style::default().fg(theme.accent),
        ),
        Span::styled(
            format!("  {}", event.protocol_layer),
            Style::default().fg(theme.muted),
        ),
    ])
}

pub fn render_metric_tiles(metrics: Option<&OverviewMetrics>, surface: &mut ViewSurface) {
    let theme = console_theme();
    let body = match metrics {
        None => placeholder("no data"),
        Some(metrics) => {
            let updated = metrics
                .last_update
                .as_deref()
                .map(display_timestamp)
                .unwrap_or_else(|| "-".to_string());
            let tile = |label: &str, value: String, color: Color| {
                vec![
                    Span::styled(format!("{label} "), Style::default().fg(theme.muted)),
                    Span::styled(
                        value,
                        Style::default().fg(color).add_modifier(Modifier::BOLD),
                    ),
                    Span::raw("   "),
                ]
            };
            let mut spans = Vec::new();
            spans.extend(tile("Agents", metrics.agent_count.to_string(), theme.text));
            spans.extend(tile(
                "High threats",
                metrics.high_threats.to_string(),
                theme.critical,
            ));
            spans.extend(tile(
                "Links",
                metrics.communication_count.to_string(),
                theme.text,
            ));
            spans.extend(tile("Packets", metrics.total_packets.to_string(), theme.text));
            spans.extend(tile("Updated", updated, theme.muted));
            SlotBody::Lines(vec![Line::from(spans)])
        }
    };
    surface.write(ViewSlot::MetricTiles, body);
}

pub fn render_alert_ticker(ticker: &EventBuffer<AlertEvent>, surface: &mut ViewSurface) {
    let theme = console_theme();
    let body = if ticker.is_empty() {
        placeholder("no alerts yet")
    } else {
        SlotBody::Lines(ticker.iter().map(|event| event_line(event, theme)).collect())
    };
    surface.write(ViewSlot::AlertTicker, body);
}

pub fn render_live_feed(
    feed: &EventBuffer<AlertEvent>,
    only_critical: bool,
    surface: &mut ViewSurface,
) {
    let theme = console_theme();
    let view = feed.to_filtered(|event: &AlertEvent| !only_critical || event.is_critical());
    let body = if view.is_empty() {
        if only_critical && !feed.is_empty() {
            placeholder("no critical events")
        } else {
            placeholder("no events yet")
        }
    } else {
        let mut lines = Vec::new();
        for event in view.iter() {
            lines.push(event_line(event, theme));
            if !event.description.is_empty() {
                lines.push(Line::from(Span::styled(
                    format!("         {}", event.description),
                    Style::default().fg(theme.muted),
                )));
            }
        }
        SlotBody::Lines(lines)
    };
    surface.write(ViewSlot::LiveFeed, body);
}

pub fn render_timeline(packets: &[AlertEvent], surface: &mut ViewSurface) {
    let theme = console_theme();
    let body = if packets.is_empty() {
        placeholder("no packets")
    } else {
        SlotBody::Lines(
            packets
                .iter()
                .map(|packet| {
                    let mut line = event_line(packet, theme);
                    if !packet.resolution.is_empty() {
                        line.spans.push(Span::styled(
                            format!("  [{}]", packet.resolution),
                            Style::default().fg(theme.ok),
                        ));
                    }
                    line
                })
                .collect(),
        )
    };
    surface.write(ViewSlot::Timeline, body);
}

fn render_bar_chart(slot: ViewSlot, series: Vec<(String, u64)>, surface: &mut ViewSurface) {
    let Some(chart) = surface.chart_mut(slot, ChartKind::Bars) else {
        return;
    };
    chart.set_series(series);
    let body = if chart.is_empty() {
        placeholder("no data")
    } else {
        let legend = chart
            .points()
            .map(|(label, value)| format!("{label} {value}"))
            .collect::<Vec<_>>()
            .join("  ");
        SlotBody::Lines(vec![Line::from(legend)])
    };
    surface.write(slot, body);
}

pub fn render_severity_chart(metrics: Option<&OverviewMetrics>, surface: &mut ViewSurface) {
    let series = match metrics {
        Some(metrics) if !metrics.severity_counts.is_empty() => Severity::ALL
            .iter()
            .map(|severity| {
                (
                    severity.as_str().to_string(),
                    metrics.severity_count(*severity),
                )
            })
            .collect(),
        _ => Vec::new(),
    };
    render_bar_chart(ViewSlot::SeverityChart, series, surface);
}

pub fn render_layer_chart(metrics: Option<&OverviewMetrics>, surface: &mut ViewSurface) {
    let series = metrics
        .map(|metrics| {
            metrics
                .layer_counts
                .iter()
                .map(|(layer, count)| (layer.clone(), *count))
                .collect()
        })
        .unwrap_or_default();
    render_bar_chart(ViewSlot::LayerChart, series, surface);
}

pub fn render_trend_chart(metrics: Option<&OverviewMetrics>, surface: &mut ViewSurface) {
    let Some(chart) = surface.chart_mut(ViewSlot::TrendChart, ChartKind::Trend) else {
        return;
    };
    let series = metrics
        .map(|metrics| {
            metrics
                .threat_trend
                .iter()
                .map(|point| (point.window_label.clone(), point.count))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    chart.set_series(series);
    let body = if chart.is_empty() {
        placeholder("no data")
    } else {
        let range = chart.visible_range();
        let labels: Vec<&str> = chart.points().map(|(label, _)| label).collect();
        let first = labels.get(range.start).copied().unwrap_or_default();
        let last = labels
            .get(range.end.saturating_sub(1))
            .copied()
            .unwrap_or_default();
        SlotBody::Lines(vec![Line::from(format!("{first} .. {last}"))])
    };
    surface.write(ViewSlot::TrendChart, body);
}

pub fn render_persistent_agents(metrics: Option<&OverviewMetrics>, surface: &mut ViewSurface) {
    let theme = console_theme();
    let agents = metrics
        .map(|metrics| metrics.persistent_agents.as_slice())
        .unwrap_or_default();
    let body = if agents.is_empty() {
        placeholder("no persistent agents")
    } else {
        SlotBody::Lines(
            agents
                .iter()
                .map(|agent| {
                    let mut spans = vec![Span::styled(
                        agent.name.clone(),
                        Style::default().fg(theme.warn),
                    )];
                    if agent.count > 0 {
                        spans.push(Span::styled(
                            format!("  x{}", agent.count),
                            Style::default().fg(theme.muted),
                        ));
                    }
                    Line::from(spans)
                })
                .collect(),
        )
    };
    surface.write(ViewSlot::PersistentAgents, body);
}

pub fn render_communications(communications: &[Communication], surface: &mut ViewSurface) {
    let theme = console_theme();
    let body = if communications.is_empty() {
        placeholder("no communications")
    } else {
        SlotBody::Lines(
            communications
                .iter()
                .map(|link| {
                    Line::from(vec![
                        Span::styled(
                            format!("{} -> {}", link.source, link.target),
                            Style::default().fg(theme.accent),
                        ),
                        Span::styled(
                            format!("  {}", link.threat_summary),
                            Style::default().fg(theme.text),
                        ),
                        Span::styled(
                            format!("  {}", short_time(&link.last_activity)),
                            Style::default().fg(theme.muted),
                        ),
                    ])
                })
                .collect(),
        )
    };
    surface.write(ViewSlot::Communications, body);
}

fn filter_caption(filter: &FilterState, theme: ConsoleTheme) -> Vec<Line<'static>> {
    let form = filter.form();
    let mut fields = Vec::new();
    for field in QueryField::ALL {
        let focused = filter.editing() == Some(field);
        let value = form.field(field);
        let shown = if focused {
            format!("{value}_")
        } else if value.is_empty() {
            "*".to_string()
        } else {
            value.to_string()
        };
        let style = if focused {
            Style::default()
                .fg(theme.bg)
                .bg(theme.accent)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.text)
        };
        fields.push(Span::styled(
            format!("{}: ", field.label()),
            Style::default().fg(theme.muted),
        ));
        fields.push(Span::styled(shown, style));
        fields.push(Span::raw("  "));
    }

    let mut chips = vec![Span::styled("Severity ", Style::default().fg(theme.muted))];
    for (key, severity) in [('h', Severity::High), ('m', Severity::Medium), ('l', Severity::Low)] {
        let active = filter.active_chip() == Some(severity);
        let style = if active {
            Style::default()
                .fg(theme.bg)
                .bg(severity_color(severity, theme))
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(severity_color(severity, theme))
        };
        chips.push(Span::styled(format!("[{key}] {}", severity.as_str()), style));
        chips.push(Span::raw(" "));
    }
    chips.push(Span::styled("[0] reset", Style::default().fg(theme.muted)));

    vec![Line::from(fields), Line::from(chips)]
}

pub fn render_packet_table(
    results: Option<&PacketResults>,
    filter: &FilterState,
    surface: &mut ViewSurface,
) {
    let theme = console_theme();
    let mut caption = filter_caption(filter, theme);
    let body = match results {
        Some(results) if !results.packets.is_empty() => {
            caption.push(Line::from(Span::styled(
                format!("{} result(s) for {}", results.packets.len(), results.query.summary()),
                Style::default().fg(theme.muted),
            )));
            SlotBody::Table {
                caption,
                header: ["Time", "Severity", "Threat", "Source", "Target", "Layer", "Resolution"]
                    .iter()
                    .map(|title| title.to_string())
                    .collect(),
                rows: results
                    .packets
                    .iter()
                    .map(|packet| {
                        vec![
                            display_timestamp(&packet.timestamp),
                            packet.severity_label.clone(),
                            packet.threat_type.clone(),
                            packet.source_agent.clone(),
                            packet.target_agent.clone(),
                            packet.protocol_layer.clone(),
                            packet.resolution.clone(),
                        ]
                    })
                    .collect(),
            }
        }
        Some(results) => {
            caption.push(Line::from(Span::styled(
                format!("no packets match {}", results.query.summary()),
                Style::default().fg(theme.muted),
            )));
            SlotBody::Lines(caption)
        }
        None => {
            caption.push(Line::from(Span::styled(
                "no data",
                Style::default().fg(theme.muted),
            )));
            SlotBody::Lines(caption)
        }
    };
    surface.write(ViewSlot::PacketTable, body);
}

pub fn render_graph_canvas(graph: &GraphState, surface: &mut ViewSurface) {
    let snapshot = graph.snapshot();
    let focus = graph.selected_node().or(graph.selected_edge());
    let Some(canvas) = surface.canvas_mut() else {
        return;
    };
    canvas.sync(&snapshot.nodes, &snapshot.edges);
    canvas.set_focus(focus);
    let body = if snapshot.nodes.is_empty() {
        placeholder("no agents")
    } else {
        SlotBody::Lines(vec![Line::from(format!(
            "{} agents  {} links",
            snapshot.nodes.len(),
            snapshot.edges.len()
        ))])
    };
    surface.write(ViewSlot::GraphCanvas, body);
}

pub fn render_detail_panel(panel: &DetailPanel, surface: &mut ViewSurface) {
    let theme = console_theme();
    let label = |text: &str| Span::styled(format!("{text:<10}"), Style::default().fg(theme.muted));
    let body = match panel {
        DetailPanel::Placeholder => placeholder(SELECT_PLACEHOLDER),
        DetailPanel::Agent(profile) => SlotBody::Lines(vec![
            Line::from(Span::styled(
                profile.name.clone(),
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(vec![label("Role"), Span::raw(profile.role.clone())]),
            Line::from(vec![
                label("Status"),
                Span::styled(
                    format!(" {} ", profile.badge.label),
                    Style::default()
                        .fg(theme.bg)
                        .bg(tone_color(profile.badge.tone, theme))
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
            Line::from(vec![label("Risk"), Span::raw(profile.risk.clone())]),
            Line::from(vec![label("Last seen"), Span::raw(profile.last_seen.clone())]),
        ]),
        DetailPanel::Link(link) => SlotBody::Lines(vec![
            Line::from(Span::styled(
                format!("{} -> {}", link.from_label, link.to_label),
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(vec![label("Summary"), Span::raw(link.summary.clone())]),
        ]),
    };
    surface.write(ViewSlot::DetailPanel, body);
}

pub fn render_agent_mini_graph(graph: &GraphState, surface: &mut ViewSurface) {
    let theme = console_theme();
    let body = match graph.selected_node() {
        None => placeholder("select a node to list its links"),
        Some(id) => {
            let neighbours = graph.neighbours(id);
            if neighbours.is_empty() {
                placeholder("no links")
            } else {
                let mut lines = vec![Line::from(Span::styled(
                    graph.node_label(id),
                    Style::default()
                        .fg(theme.title)
                        .add_modifier(Modifier::BOLD),
                ))];
                lines.extend(neighbours.into_iter().map(|neighbour| {
                    let arrow = match neighbour.direction {
                        LinkDirection::Outbound => "->",
                        LinkDirection::Inbound => "<-",
                    };
                    Line::from(vec![
                        Span::styled(format!(" {arrow} "), Style::default().fg(theme.accent)),
                        Span::raw(neighbour.label),
                        Span::styled(
                            format!("  {}", neighbour.summary),
                            Style::default().fg(theme.muted),
                        ),
                    ])
                }));
                SlotBody::Lines(lines)
            }
        }
    };
    surface.write(ViewSlot::AgentMiniGraph, body);
}

pub fn render_slot(slot: ViewSlot, engine: &Engine, surface: &mut ViewSurface) {
    if !surface.has(slot) {
        return;
    }
    match slot {
        ViewSlot::MetricTiles => render_metric_tiles(engine.overview(), surface),
        ViewSlot::AlertTicker => render_alert_ticker(engine.ticker(), surface),
        ViewSlot::LiveFeed => {
            render_live_feed(engine.live_feed(), engine.show_only_critical(), surface)
        }
        ViewSlot::Timeline => render_timeline(engine.recent_packets(), surface),
        ViewSlot::SeverityChart => render_severity_chart(engine.overview(), surface),
        ViewSlot::LayerChart => render_layer_chart(engine.overview(), surface),
        ViewSlot::TrendChart => render_trend_chart(engine.overview(), surface),
        ViewSlot::PersistentAgents => render_persistent_agents(engine.overview(), surface),
        ViewSlot::Communications => render_communications(engine.communications(), surface),
        ViewSlot::PacketTable => {
            render_packet_table(engine.packet_results(), engine.filter(), surface)
        }
        ViewSlot::GraphCanvas => render_graph_canvas(engine.graph(), surface),
        ViewSlot::DetailPanel => render_detail_panel(engine.graph().panel(), surface),
        ViewSlot::AgentMiniGraph => render_agent_mini_graph(engine.graph(), surface),
    }
}

/// Re-renders exactly the slots whose backing state changed.
pub fn render_dirty(engine: &mut Engine, surface: &mut ViewSurface) -> usize {
    let dirty = engine.take_dirty();
    for slot in &dirty {
        render_slot(*slot, engine, surface);
    }
    dirty.len()
}

#[derive(Clone, Debug)]
pub struct HeaderStatus {
    pub screen: Screen,
    pub stream: StreamState,
    pub reconnect_pending: bool,
    pub feed_len: usize,
    pub only_critical: bool,
    pub base_url: String,
}

impl HeaderStatus {
    fn stream_label(&self) -> &'static str {
        match self.stream {
            StreamState::Connected => "live",
            StreamState::Connecting => "connecting",
            StreamState::Disconnected if self.reconnect_pending => "reconnecting",
            StreamState::Disconnected => "offline",
        }
    }
}

pub fn draw(frame: &mut ratatui::Frame, header: &HeaderStatus, surface: &ViewSurface, help_open: bool) {
    let size = frame.size();
    let theme = console_theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(size);
    frame.render_widget(render_header(header, theme, size.width), layout[0]);
    match surface.screen() {
        Screen::Dashboard => draw_dashboard(frame, surface, theme, layout[1]),
        Screen::Graph => draw_graph_screen(frame, surface, theme, layout[1]),
        Screen::Packets => draw_packets_screen(frame, surface, theme, layout[1]),
    }
    if help_open {
        render_help_overlay(frame, surface.screen(), theme);
    }
}

fn render_header(header: &HeaderStatus, theme: ConsoleTheme, width: u16) -> Paragraph<'static> {
    let compact = width < COMPACT_WIDTH;
    let inner_width = width.saturating_sub(4) as usize;
    let mut tabs = Vec::new();
    for (index, screen) in Screen::ALL.iter().enumerate() {
        let style = if *screen == header.screen {
            Style::default()
                .fg(theme.bg)
                .bg(theme.accent)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.muted)
        };
        tabs.push(Span::styled(format!(" {} {} ", index + 1, screen.title()), style));
        tabs.push(Span::raw(" "));
    }
    let stream_color = match header.stream {
        StreamState::Connected => theme.ok,
        StreamState::Connecting => theme.info,
        StreamState::Disconnected => theme.warn,
    };
    tabs.push(Span::styled(
        format!("stream: {}", header.stream_label()),
        Style::default().fg(stream_color).add_modifier(Modifier::BOLD),
    ));

    let mut fields = vec![
        format!("Feed: {}/{}", header.feed_len, LIVE_FEED_CAPACITY),
        format!(
            "Filter: {}",
            if header.only_critical { "critical only" } else { "all" }
        ),
    ];
    if !compact {
        fields.push(format!("Server: {}", header.base_url));
    }
    fields.push("? help".to_string());
    let status_line = pack_status(&fields, inner_width.max(12));

    Paragraph::new(Text::from(vec![
        Line::from(tabs),
        Line::from(Span::styled(status_line, Style::default().fg(theme.muted))),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(panel_block("A2A Threat Console", theme, theme.bg))
}

fn panel_block(title: &str, theme: ConsoleTheme, bg: Color) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(bg))
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn draw_dashboard(frame: &mut ratatui::Frame, surface: &ViewSurface, theme: ConsoleTheme, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(6),
            Constraint::Length(9),
            Constraint::Length(7),
        ])
        .split(area);
    draw_slot(frame, surface, theme, ViewSlot::MetricTiles, rows[0]);
    draw_slot(frame, surface, theme, ViewSlot::AlertTicker, rows[1]);
    let middle = split_horizontal(rows[2], &[55, 45]);
    draw_slot(frame, surface, theme, ViewSlot::LiveFeed, middle[0]);
    draw_slot(frame, surface, theme, ViewSlot::Timeline, middle[1]);
    let charts = split_horizontal(rows[3], &[30, 35, 35]);
    draw_slot(frame, surface, theme, ViewSlot::SeverityChart, charts[0]);
    draw_slot(frame, surface, theme, ViewSlot::LayerChart, charts[1]);
    draw_slot(frame, surface, theme, ViewSlot::TrendChart, charts[2]);
    let bottom = split_horizontal(rows[4], &[35, 65]);
    draw_slot(frame, surface, theme, ViewSlot::PersistentAgents, bottom[0]);
    draw_slot(frame, surface, theme, ViewSlot::Communications, bottom[1]);
}

fn draw_graph_screen(
    frame: &mut ratatui::Frame,
    surface: &ViewSurface,
    theme: ConsoleTheme,
    area: Rect,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(10),
            Constraint::Length(7),
        ])
        .split(area);
    draw_slot(frame, surface, theme, ViewSlot::MetricTiles, rows[0]);
    draw_slot(frame, surface, theme, ViewSlot::AlertTicker, rows[1]);
    let middle = split_horizontal(rows[2], &[65, 35]);
    draw_slot(frame, surface, theme, ViewSlot::GraphCanvas, middle[0]);
    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(3)])
        .split(middle[1]);
    draw_slot(frame, surface, theme, ViewSlot::DetailPanel, side[0]);
    draw_slot(frame, surface, theme, ViewSlot::AgentMiniGraph, side[1]);
    draw_slot(frame, surface, theme, ViewSlot::Communications, rows[3]);
}

fn draw_packets_screen(
    frame: &mut ratatui::Frame,
    surface: &ViewSurface,
    theme: ConsoleTheme,
    area: Rect,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(6)])
        .split(area);
    draw_slot(frame, surface, theme, ViewSlot::AlertTicker, rows[0]);
    draw_slot(frame, surface, theme, ViewSlot::PacketTable, rows[1]);
}

fn split_horizontal(area: Rect, percents: &[u16]) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(percents.iter().map(|percent| Constraint::Percentage(*percent)))
        .split(area)
}

fn draw_slot(
    frame: &mut ratatui::Frame,
    surface: &ViewSurface,
    theme: ConsoleTheme,
    slot: ViewSlot,
    area: Rect,
) {
    let Some(view) = surface.slot(slot) else {
        return;
    };
    let block = panel_block(slot.title(), theme, theme.surface);
    match slot {
        ViewSlot::SeverityChart | ViewSlot::LayerChart | ViewSlot::TrendChart => {
            if let Some(chart) = surface.chart(slot).filter(|chart| !chart.is_empty()) {
                draw_chart(frame, slot, chart, block, theme, area);
                return;
            }
        }
        ViewSlot::GraphCanvas => {
            if let Some(canvas) = surface.canvas().filter(|canvas| !canvas.nodes().is_empty()) {
                draw_canvas(frame, canvas, block, theme, area);
                return;
            }
        }
        _ => {}
    }
    draw_body(frame, &view.body, block, theme, area);
}

fn draw_body(
    frame: &mut ratatui::Frame,
    body: &SlotBody,
    block: Block<'static>,
    theme: ConsoleTheme,
    area: Rect,
) {
    match body {
        SlotBody::Lines(lines) => frame.render_widget(
            Paragraph::new(Text::from(lines.clone()))
                .style(Style::default().fg(theme.text).bg(theme.surface))
                .block(block)
                .wrap(Wrap { trim: false }),
            area,
        ),
        SlotBody::Placeholder(text) => frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                text.clone(),
                Style::default()
                    .fg(theme.muted)
                    .add_modifier(Modifier::ITALIC),
            )))
            .style(Style::default().bg(theme.surface))
            .block(block),
            area,
        ),
        SlotBody::Table {
            caption,
            header,
            rows,
        } => {
            let inner = block.inner(area);
            frame.render_widget(block, area);
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(caption.len() as u16), Constraint::Min(0)])
                .split(inner);
            frame.render_widget(
                Paragraph::new(Text::from(caption.clone()))
                    .style(Style::default().fg(theme.text).bg(theme.surface)),
                parts[0],
            );
            let widths = [
                Constraint::Length(19),
                Constraint::Length(8),
                Constraint::Percentage(22),
                Constraint::Percentage(16),
                Constraint::Percentage(16),
                Constraint::Length(9),
                Constraint::Min(8),
            ];
            let table_rows = rows.iter().map(|row| {
                let style = match row.get(1).map(|label| Severity::from_label(label)) {
                    Some(severity) => Style::default().fg(severity_color(severity, theme)),
                    None => Style::default().fg(theme.text),
                };
                Row::new(row.iter().cloned()).style(style)
            });
            frame.render_widget(
                Table::new(table_rows, widths)
                    .header(
                        Row::new(header.iter().cloned()).style(
                            Style::default()
                                .fg(theme.title)
                                .add_modifier(Modifier::BOLD),
                        ),
                    )
                    .style(Style::default().bg(theme.surface)),
                parts[1],
            );
        }
    }
}

fn draw_chart(
    frame: &mut ratatui::Frame,
    slot: ViewSlot,
    chart: &crate::view::ChartHandle,
    block: Block<'static>,
    theme: ConsoleTheme,
    area: Rect,
) {
    match chart.kind() {
        ChartKind::Bars => {
            let count = chart.values().len().max(1) as u16;
            let inner_width = area.width.saturating_sub(2);
            let bar_width = (inner_width / count).saturating_sub(1).clamp(3, 12);
            let bars: Vec<Bar> = chart
                .points()
                .enumerate()
                .map(|(index, (label, value))| {
                    let base = if slot == ViewSlot::SeverityChart {
                        severity_color(Severity::from_label(label), theme)
                    } else {
                        theme.info
                    };
                    let style = if chart.highlight() == Some(index) {
                        Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(base)
                    };
                    Bar::default()
                        .value(value)
                        .label(Line::from(clip_label(label, bar_width as usize)))
                        .style(style)
                        .value_style(Style::default().fg(theme.bg).bg(base))
                })
                .collect();
            frame.render_widget(
                BarChart::default()
                    .block(block)
                    .data(BarGroup::default().bars(&bars))
                    .bar_width(bar_width)
                    .bar_gap(1)
                    .style(Style::default().bg(theme.surface)),
                area,
            );
        }
        ChartKind::Trend => {
            let values = &chart.values()[chart.visible_range()];
            let block = match chart.window() {
                0 => block,
                window => block.title(Span::styled(
                    format!(" last {window} "),
                    Style::default().fg(theme.muted),
                )),
            };
            frame.render_widget(
                Sparkline::default()
                    .block(block)
                    .data(values)
                    .style(Style::default().fg(theme.critical).bg(theme.surface)),
                area,
            );
        }
    }
}

fn draw_canvas(
    frame: &mut ratatui::Frame,
    canvas: &GraphCanvas,
    block: Block<'static>,
    theme: ConsoleTheme,
    area: Rect,
) {
    let viewport = canvas.viewport();
    let focus = canvas.focus();
    let widget = Canvas::default()
        .block(block)
        .background_color(theme.surface)
        .marker(Marker::Braille)
        .x_bounds(viewport.x)
        .y_bounds(viewport.y)
        .paint(move |ctx| {
            for edge in canvas.edges() {
                let (Some(from), Some(to)) = (canvas.nodes().get(edge.from), canvas.nodes().get(edge.to))
                else {
                    continue;
                };
                let color = if focus == Some(edge.key.as_str()) {
                    theme.accent
                } else {
                    theme.border
                };
                ctx.draw(&CanvasLine {
                    x1: from.x,
                    y1: from.y,
                    x2: to.x,
                    y2: to.y,
                    color,
                });
            }
            ctx.layer();
            for node in canvas.nodes() {
                let style = if focus == Some(node.id.as_str()) {
                    Style::default()
                        .fg(theme.bg)
                        .bg(theme.accent)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(group_color(&node.group, theme))
                };
                ctx.print(node.x, node.y, Span::styled(node.label.clone(), style));
            }
        });
    frame.render_widget(widget, area);
}

fn group_color(group: &str, theme: ConsoleTheme) -> Color {
    tone_color(a2a_core::AgentStatus::from_label(group).badge().tone, theme)
}

fn render_help_overlay(frame: &mut ratatui::Frame, screen: Screen, theme: ConsoleTheme) {
    let area = overlay_area(frame.size(), 70, 70);
    let heading = |text: &'static str| {
        Line::from(Span::styled(
            text,
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ))
    };
    let mut lines = vec![
        heading("Navigation"),
        Line::from("  1/2/3    switch screen (Dashboard/Graph/Packets)"),
        Line::from("  Tab      next screen"),
        Line::from("  r        refresh snapshots"),
        Line::from(""),
    ];
    match screen {
        Screen::Dashboard => lines.extend([
            heading("Dashboard"),
            Line::from("  c        toggle critical-only live feed"),
            Line::from("  </>      move severity chart highlight"),
            Line::from("  +/-      zoom threat trend"),
        ]),
        Screen::Graph => lines.extend([
            heading("Graph"),
            Line::from("  n/N      next/previous agent"),
            Line::from("  e/E      next/previous link"),
            Line::from("  Esc      clear selection"),
        ]),
        Screen::Packets => lines.extend([
            heading("Packets"),
            Line::from("  h/m/l    severity chip (high/medium/low)"),
            Line::from("  0        reset filter"),
            Line::from("  /        edit filter form (Tab moves, Enter submits, Esc leaves)"),
        ]),
    }
    lines.extend([
        Line::from(""),
        heading("Session & Exit"),
        Line::from("  ? or F1  toggle this help"),
        Line::from("  q        quit"),
    ]);
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(panel_block("Help", theme, theme.surface))
            .wrap(Wrap { trim: false }),
        area,
    );
}

/// Centres a box covering the given share of `area`.
fn overlay_area(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let scale = |length: u16, percent: u16| {
        (u32::from(length) * u32::from(percent.min(100)) / 100) as u16
    };
    let width = scale(area.width, percent_x);
    let height = scale(area.height, percent_y);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

/// Cuts `label` to `width` characters, marking the cut with `~`.
fn clip_label(label: &str, width: usize) -> String {
    if label.chars().nth(width).is_none() {
        return label.to_string();
    }
    let mut clipped: String = label.chars().take(width.saturating_sub(1)).collect();
    if width > 0 {
        clipped.push('~');
    }
    clipped
}

/// Joins status fields in priority order, skipping any that would overflow
/// `max` so a shorter later field can still show.
fn pack_status(fields: &[String], max: usize) -> String {
    let mut packed = String::new();
    for field in fields.iter().filter(|field| !field.trim().is_empty()) {
        let extra = if packed.is_empty() { 0 } else { 3 };
        if packed.chars().count() + extra + field.chars().count() > max {
            continue;
        }
        if extra > 0 {
            packed.push_str(" | ");
        }
        packed.push_str(field);
    }
    if packed.is_empty() {
        if let Some(first) = fields.first() {
            return clip_label(first, max);
        }
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{PullOutcome, PullPayload, PullRequest};
    use a2a_core::filter::SeverityChip;
    use a2a_core::AgentsSnapshot;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn alert(id: u32, severity: &str) -> AlertEvent {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "timestamp": "2026-02-07T21:04:05",
            "severity": severity,
            "threat_type": "Task Replay",
            "source_agent": "Atlas-Planner",
            "target_agent": "Hermes-Router",
            "protocol_layer": "Layer 3",
            "description": format!("event {id}")
        }))
        .expect("alert fixture")
    }

    fn metrics() -> OverviewMetrics {
        serde_json::from_value(serde_json::json!({
            "agent_count": 6,
            "high_threats": 2,
            "total_packets": 40,
            "severity_counts": {"높음": 2, "중간": 4},
            "layer_counts": {"Layer 2": 1, "Layer 3": 7},
            "persistent_agents": [{"name": "Nyx-Vault", "count": 4}],
            "threat_trend": [{"label": "20:00", "count": 1}, {"label": "21:00", "count": 3}]
        }))
        .expect("metrics fixture")
    }

    fn graph_snapshot() -> AgentsSnapshot {
        serde_json::from_value(serde_json::json!({
            "nodes": [
                {"id": 1, "label": "Atlas-Planner", "group": "정상"},
                {"id": 2, "label": "Hermes-Router", "group": "주의"}
            ],
            "edges": [{"from": 1, "to": 2}],
            "agents": [
                {"id": 1, "name": "Atlas-Planner", "role": "planning", "status": "정상", "risk_score": 0.2, "last_seen": "2026-02-07T20:55:00"},
                {"id": 2, "name": "Hermes-Router", "role": "routing", "status": "주의", "risk_score": 0.613, "last_seen": "2026-02-07T20:58:00"}
            ],
            "communications": [{"source": "Atlas-Planner", "target": "Hermes-Router", "last_activity": "2026-02-07T20:58:00"}]
        }))
        .expect("graph fixture")
    }

    fn apply_all(engine: &mut Engine, payload: impl Fn(&PullRequest) -> Option<PullPayload>) {
        for (ticket, request) in engine.bootstrap_requests() {
            if let Some(payload) = payload(&request) {
                engine.apply_pull(PullOutcome { ticket, payload });
            }
        }
    }

    #[test]
    fn empty_collections_render_placeholders() {
        let mut surface = ViewSurface::new(Screen::Dashboard);
        let feed = EventBuffer::with_capacity(LIVE_FEED_CAPACITY);
        render_live_feed(&feed, false, &mut surface);
        render_timeline(&[], &mut surface);
        render_severity_chart(None, &mut surface);
        render_persistent_agents(None, &mut surface);
        render_communications(&[], &mut surface);
        assert_eq!(surface.text(ViewSlot::LiveFeed).as_deref(), Some("no events yet"));
        assert_eq!(surface.text(ViewSlot::Timeline).as_deref(), Some("no packets"));
        assert_eq!(surface.text(ViewSlot::SeverityChart).as_deref(), Some("no data"));
        assert_eq!(
            surface.text(ViewSlot::PersistentAgents).as_deref(),
            Some("no persistent agents")
        );
        assert_eq!(
            surface.text(ViewSlot::Communications).as_deref(),
            Some("no communications")
        );
    }

    #[test]
    fn absent_slots_are_silent_no_ops() {
        let mut surface = ViewSurface::new(Screen::Packets);
        let feed = EventBuffer::with_capacity(LIVE_FEED_CAPACITY);
        render_live_feed(&feed, true, &mut surface);
        render_severity_chart(Some(&metrics()), &mut surface);
        render_graph_canvas(&GraphState::default(), &mut surface);
        assert!(surface.slot(ViewSlot::LiveFeed).is_none());
        assert!(surface.chart(ViewSlot::SeverityChart).is_none());
        assert!(surface.canvas().is_none());
        assert_eq!(surface.chart_builds(), 0);
    }

    #[test]
    fn critical_filter_narrows_feed_without_touching_buffer() {
        let mut surface = ViewSurface::new(Screen::Dashboard);
        let mut feed = EventBuffer::with_capacity(LIVE_FEED_CAPACITY);
        feed.insert(alert(1, "낮음"));
        feed.insert(alert(2, "높음"));
        render_live_feed(&feed, true, &mut surface);
        let text = surface.text(ViewSlot::LiveFeed).expect("feed");
        assert!(text.contains("event 2"));
        assert!(!text.contains("event 1"));
        assert_eq!(feed.len(), 2);

        let mut calm = EventBuffer::with_capacity(LIVE_FEED_CAPACITY);
        calm.insert(alert(3, "낮음"));
        render_live_feed(&calm, true, &mut surface);
        assert_eq!(surface.text(ViewSlot::LiveFeed).as_deref(), Some("no critical events"));
    }

    #[test]
    fn chart_updates_reuse_handle_and_keep_highlight() {
        let mut surface = ViewSurface::new(Screen::Dashboard);
        render_severity_chart(Some(&metrics()), &mut surface);
        surface
            .chart_mut(ViewSlot::SeverityChart, ChartKind::Bars)
            .expect("chart")
            .move_highlight(1);

        let mut next = metrics();
        next.severity_counts.insert(Severity::Low, 9);
        render_severity_chart(Some(&next), &mut surface);
        render_layer_chart(Some(&next), &mut surface);
        render_layer_chart(Some(&next), &mut surface);

        let chart = surface.chart(ViewSlot::SeverityChart).expect("chart");
        assert_eq!(chart.highlight(), Some(0));
        assert_eq!(chart.revision(), 2);
        assert_eq!(chart.values(), &[2, 4, 9]);
        assert_eq!(surface.chart_builds(), 2);
        assert_eq!(
            surface.text(ViewSlot::SeverityChart).as_deref(),
            Some("high 2  medium 4  low 9")
        );
    }

    #[test]
    fn detail_panel_shows_badge_and_risk() {
        let mut surface = ViewSurface::new(Screen::Graph);
        let mut graph = GraphState::default();
        render_detail_panel(graph.panel(), &mut surface);
        assert_eq!(surface.text(ViewSlot::DetailPanel).as_deref(), Some(SELECT_PLACEHOLDER));

        graph.replace_snapshot(graph_snapshot());
        graph.select_node("2");
        render_detail_panel(graph.panel(), &mut surface);
        render_agent_mini_graph(&graph, &mut surface);
        let detail = surface.text(ViewSlot::DetailPanel).expect("detail");
        assert!(detail.contains("Hermes-Router"));
        assert!(detail.contains("caution"));
        assert!(detail.contains("61.3%"));
        let mini = surface.text(ViewSlot::AgentMiniGraph).expect("mini");
        assert!(mini.contains("<- Atlas-Planner"));
    }

    #[test]
    fn packet_table_keeps_form_visible_when_empty() {
        let mut engine = Engine::new(Screen::Packets, 1);
        let mut surface = ViewSurface::new(Screen::Packets);
        let (ticket, request) = engine.apply_chip(SeverityChip::Only(Severity::High));
        let PullRequest::Search(query) = request else {
            panic!("expected search");
        };
        engine.apply_pull(PullOutcome {
            ticket,
            payload: PullPayload::Search {
                query,
                packets: Vec::new(),
            },
        });
        render_dirty(&mut engine, &mut surface);
        let text = surface.text(ViewSlot::PacketTable).expect("table");
        assert!(text.contains("Severity: 높음"));
        assert!(text.contains("no packets match severity=높음"));
    }

    #[test]
    fn only_dirty_slots_are_redrawn() {
        let mut engine = Engine::new(Screen::Dashboard, 1);
        let mut surface = ViewSurface::new(Screen::Dashboard);
        assert_eq!(render_dirty(&mut engine, &mut surface), Screen::Dashboard.slots().len());
        let before = surface.slot(ViewSlot::Timeline).map(|view| view.revision);

        engine.ingest_push(alert(5, "높음"));
        assert_eq!(render_dirty(&mut engine, &mut surface), 2);
        assert_eq!(surface.slot(ViewSlot::Timeline).map(|view| view.revision), before);
        assert_eq!(surface.slot(ViewSlot::LiveFeed).map(|view| view.revision), Some(2));
        assert_eq!(render_dirty(&mut engine, &mut surface), 0);
    }

    #[test]
    fn every_screen_draws_into_test_backend() {
        for screen in Screen::ALL {
            let mut engine = Engine::new(screen, 1);
            apply_all(&mut engine, |request| match request {
                PullRequest::Overview => Some(PullPayload::Overview(metrics())),
                PullRequest::AgentsGraph => Some(PullPayload::AgentsGraph(graph_snapshot())),
                PullRequest::RecentAlerts => {
                    Some(PullPayload::RecentAlerts(vec![alert(2, "높음"), alert(1, "중간")]))
                }
                PullRequest::RecentPackets => Some(PullPayload::RecentPackets(vec![alert(1, "중간")])),
                PullRequest::Search(query) => Some(PullPayload::Search {
                    query: query.clone(),
                    packets: vec![alert(1, "중간")],
                }),
            });
            engine.select_next_node(1);
            let mut surface = ViewSurface::new(screen);
            render_dirty(&mut engine, &mut surface);

            let header = HeaderStatus {
                screen,
                stream: StreamState::Disconnected,
                reconnect_pending: true,
                feed_len: engine.live_feed().len(),
                only_critical: false,
                base_url: "http://127.0.0.1:5000".to_string(),
            };
            let mut terminal = Terminal::new(TestBackend::new(140, 48)).expect("terminal");
            terminal
                .draw(|frame| draw(frame, &header, &surface, screen == Screen::Graph))
                .expect("draw");
            let rendered: String = terminal
                .backend()
                .buffer()
                .content
                .iter()
                .map(|cell| cell.symbol())
                .collect();
            assert!(rendered.contains("reconnecting"));
            assert!(rendered.contains("Alerts"));
            match screen {
                Screen::Dashboard => assert!(rendered.contains("Live Feed")),
                Screen::Graph => assert!(rendered.contains("Help")),
                Screen::Packets => assert!(rendered.contains("1 result(s)")),
            }
        }
    }

    #[test]
    fn status_line_skips_fields_that_overflow() {
        let fields = vec![
            "Feed: 3/30".to_string(),
            "Server: http://127.0.0.1:5000".to_string(),
            "? help".to_string(),
        ];
        assert_eq!(pack_status(&fields, 20), "Feed: 3/30 | ? help");
        assert_eq!(pack_status(&fields, 5), "Feed~");
        assert_eq!(clip_label("Hermes-Router", 8), "Hermes-~");
        assert_eq!(clip_label("Atlas", 8), "Atlas");
    }

    #[test]
    fn help_overlay_is_centred() {
        let area = overlay_area(Rect::new(0, 0, 100, 40), 70, 70);
        assert_eq!(area, Rect::new(15, 6, 70, 28));
    }
}
