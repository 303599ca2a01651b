//! Gateway client: persistent WebSocket listener with reconnect backoff, and
//! one-shot send_message over HTTP.
//!
//! The listener runs as a background task publishing decoded events through the
//! client's [`EventRouter`]. Send is independent of the listener: it uses its
//! own short-lived HTTP request and never touches reconnect state.

use crate::config::GatewayConfig;
use crate::event::{InboundEvent, OutboundMessage};
use crate::router::EventRouter;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Error from [`GatewayClient::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("invalid message: {0}")]
    Invalid(String),
    #[error("failed to reach gateway: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway send_message failed: {status} {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Client for one configured gateway endpoint. Owns the listener task and the
/// event router; whoever constructs it owns it (no global registry).
pub struct GatewayClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
    router: Arc<EventRouter>,
    initial_backoff: Duration,
    max_backoff: Duration,
    connect_timeout: Duration,
    heartbeat: Duration,
    send_timeout: Duration,
    listener: Mutex<Option<Listener>>,
}

struct Listener {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Everything the listener task needs, detached from the client so the task
/// does not borrow it.
#[derive(Clone)]
struct LoopCtx {
    ws_url: String,
    token: Option<String>,
    router: Arc<EventRouter>,
    initial_backoff: Duration,
    max_backoff: Duration,
    connect_timeout: Duration,
    heartbeat: Duration,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.access_token,
            http: reqwest::Client::new(),
            router: Arc::new(EventRouter::new()),
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            heartbeat: Duration::from_secs(config.heartbeat_secs),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            listener: Mutex::new(None),
        }
    }

    /// Router fed by the listener; subscribe here for inbound events.
    pub fn router(&self) -> Arc<EventRouter> {
        Arc::clone(&self.router)
    }

    /// Start the listener task. No-op if it is already running; safe to call
    /// again after [`stop`](Self::stop).
    pub async fn start(&self) {
        let mut guard = self.listener.lock().await;
        if let Some(listener) = guard.as_ref() {
            if !listener.task.is_finished() {
                log::debug!("gateway listener already running");
                return;
            }
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = LoopCtx {
            ws_url: ws_url(&self.base_url),
            token: self.token.clone(),
            router: Arc::clone(&self.router),
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            connect_timeout: self.connect_timeout,
            heartbeat: self.heartbeat,
        };
        let task = tokio::spawn(listen_loop(ctx, stop_rx));
        *guard = Some(Listener { stop_tx, task });
    }

    /// Signal the listener to stop and wait for it to exit. The stop signal
    /// interrupts an in-flight connect, read, or backoff sleep; once this
    /// returns no further events are published. No-op if not running.
    pub async fn stop(&self) {
        let listener = self.listener.lock().await.take();
        let Some(listener) = listener else { return };
        let _ = listener.stop_tx.send(true);
        if let Err(e) = listener.task.await {
            log::warn!("gateway listener task ended abnormally: {}", e);
        }
    }

    /// True while the listener task is alive.
    pub async fn is_running(&self) -> bool {
        match self.listener.lock().await.as_ref() {
            Some(listener) => !listener.task.is_finished(),
            None => false,
        }
    }

    /// POST the message to the gateway's send_message endpoint. Independent of
    /// the listener: no retry, no backoff, own timeout.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        if message.target.trim().is_empty() {
            return Err(SendError::Invalid("target must not be empty".to_string()));
        }
        if message.content.trim().is_empty() {
            return Err(SendError::Invalid("content must not be empty".to_string()));
        }
        let url = format!("{}/send_message", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .json(message)
            .timeout(self.send_timeout);
        if let Some(token) = &self.token {
            request = request.header(ACCESS_TOKEN_HEADER, token);
        }
        let response = request.send().await?;
        if response.status() != reqwest::StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected { status, body });
        }
        Ok(())
    }

    /// Convenience wrapper around [`send`](Self::send).
    pub async fn send_text(
        &self,
        target: &str,
        content: &str,
        at_list: Option<Vec<String>>,
    ) -> Result<(), SendError> {
        self.send(&OutboundMessage {
            target: target.to_string(),
            content: content.to_string(),
            at_list,
        })
        .await
    }
}

/// Reconnect delay: starts at `initial`, doubles per failure, capped at `max`,
/// reset on successful connect. Mutated only by the listener loop.
struct Backoff {
    delay: Duration,
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            delay: initial,
            initial,
            max,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; doubles the stored delay.
    fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = (self.delay * 2).min(self.max);
        self.attempts += 1;
        current
    }

    /// Consecutive failures since the last successful connect.
    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn reset(&mut self) {
        self.delay = self.initial;
        self.attempts = 0;
    }
}

/// Map the HTTP base URL to the stream endpoint.
fn ws_url(base_url: &str) -> String {
    let base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!("{}/ws", base)
}

async fn connect_ws(url: &str, token: Option<&str>) -> Result<WsStream, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(token).map_err(|e| e.to_string())?;
        request.headers_mut().insert(ACCESS_TOKEN_HEADER, value);
    }
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| e.to_string())?;
    Ok(ws)
}

/// First failure after a healthy connection is a warning; repeats of the same
/// pattern drop to debug so a down gateway does not flood the log.
fn log_retry(attempts: u32, cause: &str, delay: Duration) {
    if attempts <= 1 {
        log::warn!("{}, retrying in {:?}", cause, delay);
    } else {
        log::debug!("{}, retrying in {:?}", cause, delay);
    }
}

/// Sleep for `delay`, unless stop is signalled first. Returns false on stop.
async fn sleep_or_stop(delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = stop_rx.changed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn listen_loop(ctx: LoopCtx, mut stop_rx: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(ctx.initial_backoff, ctx.max_backoff);

    'run: loop {
        if *stop_rx.borrow() {
            break;
        }

        log::debug!("connecting to gateway websocket: {}", ctx.ws_url);
        let attempt = tokio::time::timeout(
            ctx.connect_timeout,
            connect_ws(&ctx.ws_url, ctx.token.as_deref()),
        );
        let result = tokio::select! {
            _ = stop_rx.changed() => break 'run,
            result = attempt => result,
        };
        let mut ws = match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                let delay = backoff.next_delay();
                log_retry(
                    backoff.attempts(),
                    &format!("gateway connection failed: {}", e),
                    delay,
                );
                if !sleep_or_stop(delay, &mut stop_rx).await {
                    break 'run;
                }
                continue;
            }
            Err(_) => {
                let delay = backoff.next_delay();
                log_retry(
                    backoff.attempts(),
                    &format!("gateway connect timed out after {:?}", ctx.connect_timeout),
                    delay,
                );
                if !sleep_or_stop(delay, &mut stop_rx).await {
                    break 'run;
                }
                continue;
            }
        };

        log::info!("gateway websocket connected");
        backoff.reset();
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + ctx.heartbeat,
            ctx.heartbeat,
        );

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    let _ = ws.close(None).await;
                    break 'run;
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = ws.send(Message::Ping(Vec::new())).await {
                        log::warn!("heartbeat ping failed: {}, will reconnect", e);
                        break;
                    }
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => match InboundEvent::from_json(&text) {
                        Ok(event) => {
                            log::debug!(
                                "message event dispatched: {}",
                                event.content.chars().take(50).collect::<String>()
                            );
                            ctx.router.publish(event).await;
                        }
                        // One bad frame must not cost us the connection.
                        Err(e) => log::error!("failed to decode message: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("websocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("websocket error, will reconnect: {}", e);
                        break;
                    }
                }
            }
        }

        let delay = backoff.next_delay();
        log::info!("reconnecting in {:?}", delay);
        if !sleep_or_stop(delay, &mut stop_rx).await {
            break 'run;
        }
    }

    log::debug!("gateway listener loop exited");
}
