use crate::view::Screen;
use a2a_core::stream_frame::DEFAULT_MAX_FRAME_BYTES;
use clap::Parser;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_STREAM_PATH: &str = "/stream";

#[derive(Parser, Debug)]
#[command(name = "a2a-console", about = "Terminal console for A2A threat telemetry")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub base_url: String,
    #[arg(long, default_value = "")]
    pub stream_path: String,
    /// dashboard, graph or packets
    #[arg(long, default_value = "")]
    pub screen: String,
    #[arg(long, default_value_t = 5)]
    pub reconnect_secs: u64,
    #[arg(long, default_value_t = 5)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 100)]
    pub tick_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub base_url: String,
    pub stream_url: String,
    pub screen: Screen,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub tick: Duration,
    pub max_frame_bytes: usize,
}

pub fn load_config(args: Args) -> Config {
    let base_url = resolve_string(&args.base_url, "A2A_BASE_URL", DEFAULT_BASE_URL)
        .trim_end_matches('/')
        .to_string();
    let stream_path = resolve_string(&args.stream_path, "A2A_STREAM_PATH", DEFAULT_STREAM_PATH);
    let stream_url = join_url(&base_url, &stream_path);
    let screen = resolve_screen(&args.screen);
    Config {
        base_url,
        stream_url,
        screen,
        reconnect_delay: Duration::from_secs(args.reconnect_secs.max(1)),
        request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
        tick: Duration::from_millis(args.tick_ms.clamp(16, 1_000)),
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    }
}

fn resolve_string(arg: &str, env_key: &str, default: &str) -> String {
    if !arg.trim().is_empty() {
        return arg.trim().to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    default.to_string()
}

fn resolve_screen(arg: &str) -> Screen {
    let raw = resolve_string(arg, "A2A_SCREEN", "dashboard");
    match raw.parse() {
        Ok(screen) => screen,
        Err(err) => {
            warn!("config_screen_fallback: {err}");
            Screen::Dashboard
        }
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if path.starts_with('/') {
        format!("{base_url}{path}")
    } else {
        format!("{base_url}/{path}")
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_enabled(key: &str) -> bool {
    std::env::var(key)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

/// Logs go to a sink unless redirected; the terminal belongs to the UI.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(path) = std::env::var("A2A_LOG_FILE")
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        match OpenOptions::new().create(true).append(true).open(path.trim()) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
                return;
            }
            Err(err) => eprintln!("a2a-console: cannot open log file {path}: {err}"),
        }
    }
    if env_enabled("A2A_LOG_STDOUT") {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        base_url: DEFAULT_BASE_URL.to_string(),
        stream_url: format!("{DEFAULT_BASE_URL}{DEFAULT_STREAM_PATH}"),
        screen: Screen::Dashboard,
        reconnect_delay: Duration::from_secs(5),
        request_timeout: Duration::from_secs(2),
        tick: Duration::from_millis(100),
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    }
}
