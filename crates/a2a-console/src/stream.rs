use a2a_core::stream_frame::{DecodeReport, FrameError, SseFrameDecoder};
use a2a_core::AlertEvent;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("read failed: {0}")]
    Read(String),
    #[error("stream closed by server")]
    Closed,
}

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Opens one push connection and yields its raw body chunks.
pub trait PushTransport: Send + Sync + 'static {
    fn open(&self) -> BoxFuture<'_, Result<ByteStream, TransportError>>;
}

pub struct SseTransport {
    client: reqwest::Client,
    url: String,
}

impl SseTransport {
    /// No total timeout on this client: the response body never ends on its own.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl PushTransport for SseTransport {
    fn open(&self) -> BoxFuture<'_, Result<ByteStream, TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }
            let body = response.bytes_stream().map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| TransportError::Read(err.to_string()))
            });
            Ok(body.boxed())
        })
    }
}

/// Messages from background connection and timer tasks. Each carries the
/// generation of the attempt that produced it.
#[derive(Debug)]
pub enum StreamSignal {
    Opened { generation: u64 },
    Event { generation: u64, event: AlertEvent },
    Malformed { generation: u64, error: FrameError },
    Failed { generation: u64, error: TransportError },
    ReconnectDue { generation: u64 },
}

impl StreamSignal {
    fn generation(&self) -> u64 {
        match self {
            StreamSignal::Opened { generation }
            | StreamSignal::Event { generation, .. }
            | StreamSignal::Malformed { generation, .. }
            | StreamSignal::Failed { generation, .. }
            | StreamSignal::ReconnectDue { generation } => *generation,
        }
    }
}

pub struct StreamClient<T: PushTransport> {
    transport: Arc<T>,
    signals: mpsc::Sender<StreamSignal>,
    state: StreamState,
    generation: u64,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    reconnect_delay: Duration,
    max_frame_bytes: usize,
    reconnects: u64,
}

impl<T: PushTransport> StreamClient<T> {
    pub fn new(
        transport: Arc<T>,
        signals: mpsc::Sender<StreamSignal>,
        reconnect_delay: Duration,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            transport,
            signals,
            state: StreamState::Disconnected,
            generation: 0,
            connection: None,
            reconnect: None,
            reconnect_delay,
            max_frame_bytes,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Starts a connection attempt unless one is already running.
    pub fn connect(&mut self) -> bool {
        if self.state != StreamState::Disconnected {
            return false;
        }
        self.cancel_reconnect();
        self.generation += 1;
        self.state = StreamState::Connecting;
        let task = run_connection(
            Arc::clone(&self.transport),
            self.signals.clone(),
            self.generation,
            self.max_frame_bytes,
        );
        self.connection = Some(tokio::spawn(task));
        debug!("stream_connecting: generation={}", self.generation);
        true
    }

    pub fn disconnect(&mut self) {
        self.cancel_reconnect();
        if let Some(handle) = self.connection.take() {
            handle.abort();
        }
        self.generation += 1;
        if self.state != StreamState::Disconnected {
            info!("stream_disconnected");
        }
        self.state = StreamState::Disconnected;
    }

    /// Applies one background signal; returns the event to dispatch, if any.
    pub fn handle_signal(&mut self, signal: StreamSignal) -> Option<AlertEvent> {
        if signal.generation() != self.generation {
            debug!("stream_stale_signal: generation={}", signal.generation());
            return None;
        }
        match signal {
            StreamSignal::Opened { .. } => {
                if self.state == StreamState::Connecting {
                    self.state = StreamState::Connected;
                    info!("stream_connected: generation={}", self.generation);
                }
                None
            }
            StreamSignal::Event { event, .. } => Some(event),
            StreamSignal::Malformed { error, .. } => {
                warn!("stream_malformed_payload: {error}");
                None
            }
            StreamSignal::Failed { error, .. } => {
                warn!("stream_connect_error: {error}");
                self.on_transport_error();
                None
            }
            StreamSignal::ReconnectDue { .. } => {
                if self.reconnect.take().is_some() {
                    self.reconnects += 1;
                    self.connect();
                }
                None
            }
        }
    }

    fn on_transport_error(&mut self) {
        if let Some(handle) = self.connection.take() {
            handle.abort();
        }
        self.state = StreamState::Disconnected;
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();
        let delay = self.reconnect_delay;
        let generation = self.generation;
        let signals = self.signals.clone();
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(StreamSignal::ReconnectDue { generation }).await;
        }));
        info!("stream_reconnect_scheduled: delay_secs={}", delay.as_secs());
    }

    fn cancel_reconnect(&mut self) {
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }
}

impl<T: PushTransport> Drop for StreamClient<T> {
    fn drop(&mut self) {
        self.cancel_reconnect();
        if let Some(handle) = self.connection.take() {
            handle.abort();
        }
    }
}

async fn run_connection<T: PushTransport>(
    transport: Arc<T>,
    signals: mpsc::Sender<StreamSignal>,
    generation: u64,
    max_frame_bytes: usize,
) {
    let mut body = match transport.open().await {
        Ok(body) => body,
        Err(error) => {
            let _ = signals.send(StreamSignal::Failed { generation, error }).await;
            return;
        }
    };
    if signals.send(StreamSignal::Opened { generation }).await.is_err() {
        return;
    }

    let mut decoder = SseFrameDecoder::<AlertEvent>::new(max_frame_bytes);
    let error = loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                if forward(&signals, generation, decoder.push_chunk(&chunk)).await.is_err() {
                    return;
                }
            }
            Some(Err(error)) => break error,
            None => {
                if forward(&signals, generation, decoder.finish()).await.is_err() {
                    return;
                }
                break TransportError::Closed;
            }
        }
    };
    let _ = signals.send(StreamSignal::Failed { generation, error }).await;
}

async fn forward(
    signals: &mpsc::Sender<StreamSignal>,
    generation: u64,
    report: DecodeReport<AlertEvent>,
) -> Result<(), mpsc::error::SendError<StreamSignal>> {
    for error in report.errors {
        signals
            .send(StreamSignal::Malformed { generation, error })
            .await?;
    }
    for event in report.frames {
        signals.send(StreamSignal::Event { generation, event }).await?;
    }
    Ok(())
}
