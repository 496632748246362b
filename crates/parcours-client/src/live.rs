//! Live channel to the backend.
//!
//! Inbound events arrive on a server-sent event stream (`GET /live`), one
//! JSON frame per `data:` line. Outbound events are posted to the same path.
//! The channel is an explicitly owned handle: dropping or closing it aborts
//! both background tasks, so nothing outlives the session that created it.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use parcours_shared::constants::{LIVE_RECONNECT_INITIAL_MS, LIVE_RECONNECT_MAX_MS};
use parcours_shared::{ClientEvent, LiveEvent, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;

const CHANNEL_CAPACITY: usize = 256;

/// Longest accepted stream line. Longer lines are dropped whole.
const MAX_LINE_BYTES: usize = 64 * 1024;

pub struct LiveChannel {
    events_rx: mpsc::Receiver<LiveEvent>,
    outbound_tx: mpsc::Sender<ClientEvent>,
    tasks: Vec<JoinHandle<()>>,
}

/// The far end of an in-process channel: push events in, observe what the
/// client emits.
pub struct LiveRemote {
    pub events_tx: mpsc::Sender<LiveEvent>,
    pub outbound_rx: mpsc::Receiver<ClientEvent>,
}

impl LiveChannel {
    /// Open the channel against the configured backend.
    ///
    /// Must be called from within a tokio runtime. The reader reconnects
    /// with capped exponential backoff until the channel is closed.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        // No overall timeout: the event stream stays open indefinitely.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let url = config.live_url();
        let reader = tokio::spawn(read_loop(
            client.clone(),
            url.clone(),
            config.token.clone(),
            events_tx,
        ));
        let writer = tokio::spawn(write_loop(client, url, config.token.clone(), outbound_rx));

        info!(url = %config.live_url(), "live channel started");

        Ok(Self {
            events_rx,
            outbound_tx,
            tasks: vec![reader, writer],
        })
    }

    /// A channel with no network behind it, driven through [`LiveRemote`].
    pub fn in_process() -> (Self, LiveRemote) {
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                events_rx,
                outbound_tx,
                tasks: Vec::new(),
            },
            LiveRemote {
                events_tx,
                outbound_rx,
            },
        )
    }

    /// Wait for the next inbound event. `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        self.events_rx.recv().await
    }

    /// Tell `receiver` whether the user is composing a message to them.
    ///
    /// Typing signals are best effort: a full outbound buffer drops the
    /// signal rather than blocking the caller.
    pub fn emit_typing(&self, receiver: &UserId, is_typing: bool) -> Result<(), ClientError> {
        let event = ClientEvent::Typing {
            receiver_id: receiver.clone(),
            is_typing,
        };
        match self.outbound_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(receiver = %receiver, "outbound buffer full, typing signal dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientError::LiveClosed),
        }
    }

    /// Stop the background tasks and drop the channel.
    pub fn close(mut self) {
        self.abort_tasks();
        info!("live channel closed");
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

async fn read_loop(
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    events_tx: mpsc::Sender<LiveEvent>,
) {
    let initial = Duration::from_millis(LIVE_RECONNECT_INITIAL_MS);
    let mut delay = initial;

    loop {
        let mut req = client.get(&url).header("Accept", "text/event-stream");
        if let Some(token) = &token {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("live stream connected");
                delay = initial;

                match pump_stream(resp, &events_tx).await {
                    StreamEnd::ConsumerGone => return,
                    StreamEnd::Closed => info!("live stream ended by server"),
                    StreamEnd::Failed(e) => warn!(error = %e, "live stream interrupted"),
                }
            }
            Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
                error!("live stream rejected the credentials, giving up");
                return;
            }
            Ok(resp) => warn!(status = %resp.status(), "live stream refused"),
            Err(e) => warn!(error = %e, "live stream connect failed"),
        }

        if events_tx.is_closed() {
            return;
        }

        debug!(delay_ms = delay.as_millis() as u64, "reconnecting live stream");
        tokio::time::sleep(delay).await;
        delay = next_delay(delay);
    }
}

/// Reconnect delay after `current`: doubled, capped at the configured maximum.
fn next_delay(current: Duration) -> Duration {
    std::cmp::min(current * 2, Duration::from_millis(LIVE_RECONNECT_MAX_MS))
}

enum StreamEnd {
    Closed,
    ConsumerGone,
    Failed(reqwest::Error),
}

async fn pump_stream(resp: reqwest::Response, events_tx: &mpsc::Sender<LiveEvent>) -> StreamEnd {
    let mut stream = resp.bytes_stream();
    let mut lines = LineBuffer::new(MAX_LINE_BYTES);

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return StreamEnd::Failed(e),
        };

        for line in lines.push(&chunk) {
            if let Some(event) = decode_line(&line) {
                if events_tx.send(event).await.is_err() {
                    return StreamEnd::ConsumerGone;
                }
            }
        }
    }

    StreamEnd::Closed
}

/// Splits the byte stream into lines.
///
/// Works on bytes so a multi-byte character cut across chunks is only
/// decoded once complete. A line growing past `limit` is dropped up to its
/// terminating newline instead of being buffered.
struct LineBuffer {
    pending: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl LineBuffer {
    fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
            discarding: false,
        }
    }

    /// Append a chunk and return the lines it completes, without their
    /// newline.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if self.pending.len() + head.len() > self.limit {
                warn!(limit = self.limit, "oversized live line dropped");
                self.pending.clear();
                continue;
            }
            self.pending.extend_from_slice(head);
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }

        if !self.discarding {
            if self.pending.len() + rest.len() > self.limit {
                warn!(limit = self.limit, "oversized live line dropped");
                self.pending.clear();
                self.discarding = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }
        lines
    }
}

/// Decode one line of the event stream.
///
/// `data:` lines and bare JSON lines carry frames. Comments (`:`), blank
/// separators and other SSE fields are skipped. Malformed frames are
/// logged and skipped.
fn decode_line(line: &str) -> Option<LiveEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = if let Some(data) = line.strip_prefix("data:") {
        data.trim_start()
    } else if line.starts_with('{') {
        line
    } else {
        return None;
    };

    match LiveEvent::from_frame(payload) {
        Ok(event) => {
            debug!(event = event.name(), "live event received");
            Some(event)
        }
        Err(e) => {
            warn!(error = %e, "malformed live frame skipped");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

async fn write_loop(
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
) {
    while let Some(event) = outbound_rx.recv().await {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode outbound event");
                continue;
            }
        };

        let mut req = client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(frame);
        if let Some(token) = &token {
            req = req.bearer_auth(token);
        }

        // Fire and forget: a lost typing signal is superseded by the next.
        match req.send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => debug!(status = %resp.status(), event = event.name(), "outbound event refused"),
            Err(e) => debug!(error = %e, event = event.name(), "outbound event not delivered"),
        }
    }
}
