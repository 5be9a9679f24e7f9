mod app;
mod config;
mod engine;
mod render;
mod snapshot;
mod stream;
mod view;

use app::{handle_input, App};
use clap::Parser;
use config::{init_logging, load_config, Args};
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::sync::Arc;
use stream::SseTransport;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const STREAM_SIGNAL_CAPACITY: usize = 256;
const PULL_QUEUE_CAPACITY: usize = 64;

type ConsoleTerminal = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse());
    init_logging();
    info!(
        "console_start: base_url={} stream_url={} screen={}",
        config.base_url, config.stream_url, config.screen
    );

    let (stream_tx, stream_rx) = mpsc::channel(STREAM_SIGNAL_CAPACITY);
    let (pull_tx, pull_rx) = mpsc::channel(PULL_QUEUE_CAPACITY);
    let transport = Arc::new(SseTransport::new(
        config.stream_url.clone(),
        config.request_timeout,
    )?);
    let screen = config.screen;
    let mut app = App::new(config, transport, stream_tx, pull_tx)?;
    app.activate(screen);

    let mut terminal = setup_terminal()?;
    let result = run(&mut terminal, &mut app, stream_rx, pull_rx).await;
    app.shutdown();
    restore_terminal(&mut terminal)?;
    info!("console_exit");
    result
}

async fn run(
    terminal: &mut ConsoleTerminal,
    app: &mut App<SseTransport>,
    mut stream_rx: mpsc::Receiver<stream::StreamSignal>,
    mut pull_rx: mpsc::Receiver<snapshot::PullOutcome>,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(app.config().tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        app.render();
        let header = app.header();
        terminal.draw(|frame| render::draw(frame, &header, app.surface(), app.help_open()))?;

        tokio::select! {
            Some(signal) = stream_rx.recv() => {
                app.on_stream_signal(signal);
            }
            Some(outcome) = pull_rx.recv() => {
                app.on_pull(outcome);
            }
            _ = ticker.tick() => {
                app.on_tick();
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(event)) => {
                        if handle_input(event, app) {
                            break;
                        }
                    }
                    Some(Err(err)) => warn!("terminal_event_failed: {err}"),
                    None => break,
                }
            }
        }
    }
    Ok(())
}

fn setup_terminal() -> anyhow::Result<ConsoleTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(terminal: &mut ConsoleTerminal) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
