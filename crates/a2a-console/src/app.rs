use crate::config::Config;
use crate::engine::Engine;
use crate::render::{self, HeaderStatus};
use crate::snapshot::{FetchError, PullOutcome, PullRequest, PullTicket, SnapshotLoader};
use crate::stream::{PushTransport, StreamClient, StreamSignal};
use crate::view::{ChartKind, LayoutSignal, Screen, ViewSlot, ViewSurface};
use a2a_core::filter::SeverityChip;
use a2a_core::Severity;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// One console session: the active screen's engine and surface plus the
/// long-lived push and pull plumbing.
pub struct App<T: PushTransport> {
    config: Config,
    engine: Engine,
    surface: ViewSurface,
    stream: StreamClient<T>,
    loader: SnapshotLoader,
    epoch: u64,
    help_open: bool,
}

impl<T: PushTransport> App<T> {
    pub fn new(
        config: Config,
        transport: Arc<T>,
        stream_tx: mpsc::Sender<StreamSignal>,
        pull_tx: mpsc::Sender<PullOutcome>,
    ) -> Result<Self, FetchError> {
        let loader = SnapshotLoader::new(&config, pull_tx)?;
        let stream = StreamClient::new(
            transport,
            stream_tx,
            config.reconnect_delay,
            config.max_frame_bytes,
        );
        Ok(Self {
            engine: Engine::new(config.screen, 0),
            surface: ViewSurface::new(config.screen),
            config,
            stream,
            loader,
            epoch: 0,
            help_open: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn surface(&self) -> &ViewSurface {
        &self.surface
    }

    pub fn help_open(&self) -> bool {
        self.help_open
    }

    pub fn screen(&self) -> Screen {
        self.engine.screen()
    }

    /// Full reset: everything built for the previous screen is dropped.
    pub fn activate(&mut self, screen: Screen) {
        self.stream.disconnect();
        self.epoch += 1;
        self.engine = Engine::new(screen, self.epoch);
        self.surface = ViewSurface::new(screen);
        let requests = self.engine.bootstrap_requests();
        self.loader.bootstrap(requests);
        self.stream.connect();
        info!("screen_activated: screen={screen} epoch={}", self.epoch);
    }

    pub fn shutdown(&mut self) {
        self.stream.disconnect();
        let stats = self.engine.stats();
        info!(
            "session_stats: screen={} pushed={} applied={} stale={} fills_skipped={} reconnects={}",
            self.engine.screen(),
            stats.pushed,
            stats.applied,
            stats.stale,
            stats.fills_skipped,
            self.stream.reconnects()
        );
    }

    pub fn on_stream_signal(&mut self, signal: StreamSignal) {
        if let Some(event) = self.stream.handle_signal(signal) {
            for pull in self.engine.ingest_push(event) {
                self.issue(pull);
            }
        }
    }

    pub fn on_pull(&mut self, outcome: PullOutcome) {
        self.engine.apply_pull(outcome);
    }

    /// Advances the graph layout; the first settle fits the viewport.
    pub fn on_tick(&mut self) {
        let Some(canvas) = self.surface.canvas_mut() else {
            return;
        };
        if canvas.step_layout() == Some(LayoutSignal::Stabilized)
            && self.engine.on_layout_stabilized()
        {
            canvas.fit();
        }
    }

    pub fn render(&mut self) -> usize {
        render::render_dirty(&mut self.engine, &mut self.surface)
    }

    pub fn header(&self) -> HeaderStatus {
        HeaderStatus {
            screen: self.engine.screen(),
            stream: self.stream.state(),
            reconnect_pending: self.stream.reconnect_pending(),
            feed_len: self.engine.live_feed().len(),
            only_critical: self.engine.show_only_critical(),
            base_url: self.config.base_url.clone(),
        }
    }

    fn issue(&self, pull: (PullTicket, PullRequest)) {
        let (ticket, request) = pull;
        self.loader.spawn(ticket, request);
    }

    fn switch_to(&mut self, screen: Screen) {
        if screen != self.engine.screen() {
            self.activate(screen);
        }
    }

    fn refresh(&mut self) {
        let requests = self.engine.refresh_requests();
        self.loader.bootstrap(requests);
    }

    fn apply_chip(&mut self, chip: SeverityChip) {
        if self.screen().has(ViewSlot::PacketTable) {
            let pull = self.engine.apply_chip(chip);
            self.issue(pull);
        }
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.engine.edit_filter(|filter| filter.cancel_edit()),
            KeyCode::Tab | KeyCode::Down => self.engine.edit_filter(|filter| filter.focus_next()),
            KeyCode::BackTab | KeyCode::Up => self.engine.edit_filter(|filter| filter.focus_prev()),
            KeyCode::Backspace => self.engine.edit_filter(|filter| filter.backspace()),
            KeyCode::Enter => {
                let pull = self.engine.submit_filter();
                self.issue(pull);
            }
            KeyCode::Char(ch) => self.engine.edit_filter(|filter| filter.push_char(ch)),
            _ => {}
        }
    }
}

pub fn handle_input<T: PushTransport>(event: Event, app: &mut App<T>) -> bool {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, app),
        _ => false,
    }
}

/// Returns true when the console should exit.
pub fn handle_key<T: PushTransport>(key: KeyEvent, app: &mut App<T>) -> bool {
    if app.engine.filter().editing().is_some() {
        app.handle_form_key(key);
        return false;
    }
    if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
        app.help_open = !app.help_open;
        return false;
    }
    if key.code == KeyCode::Esc && app.help_open {
        app.help_open = false;
        return false;
    }
    if app.help_open {
        return false;
    }

    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('1') => app.switch_to(Screen::Dashboard),
        KeyCode::Char('2') => app.switch_to(Screen::Graph),
        KeyCode::Char('3') => app.switch_to(Screen::Packets),
        KeyCode::Tab => {
            let next = app.screen().next();
            app.switch_to(next);
        }
        KeyCode::Char('r') => app.refresh(),
        KeyCode::Char('c') => app.engine.toggle_only_critical(),
        KeyCode::Char('<') | KeyCode::Char('>') => {
            let step = if key.code == KeyCode::Char('<') { -1 } else { 1 };
            if let Some(chart) = app.surface.chart_mut(ViewSlot::SeverityChart, ChartKind::Bars) {
                chart.move_highlight(step);
            }
        }
        KeyCode::Char('+') | KeyCode::Char('-') => {
            if let Some(chart) = app.surface.chart_mut(ViewSlot::TrendChart, ChartKind::Trend) {
                if key.code == KeyCode::Char('+') {
                    chart.zoom_in();
                } else {
                    chart.zoom_out();
                }
                app.engine.mark_dirty(ViewSlot::TrendChart);
            }
        }
        KeyCode::Char('n') => {
            app.engine.select_next_node(1);
        }
        KeyCode::Char('N') => {
            app.engine.select_next_node(-1);
        }
        KeyCode::Char('e') => {
            app.engine.select_next_edge(1);
        }
        KeyCode::Char('E') => {
            app.engine.select_next_edge(-1);
        }
        KeyCode::Esc => app.engine.clear_selection(),
        KeyCode::Char('h') => app.apply_chip(SeverityChip::Only(Severity::High)),
        KeyCode::Char('m') => app.apply_chip(SeverityChip::Only(Severity::Medium)),
        KeyCode::Char('l') => app.apply_chip(SeverityChip::Only(Severity::Low)),
        KeyCode::Char('0') => app.apply_chip(SeverityChip::Reset),
        KeyCode::Char('/') => {
            if app.screen().has(ViewSlot::PacketTable) {
                app.engine.edit_filter(|filter| filter.begin_edit());
            }
        }
        _ => {}
    }
    false
}
