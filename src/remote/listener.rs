//! WebSocket listener for server push events.
//!
//! Holds one connection per batch, forwards parsed [`PushMessage`]s to the
//! orchestrator over an mpsc channel, and reconnects with bounded
//! exponential backoff when the connection drops.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{PhotovarError, Result};
use crate::remote::messages::{parse_push_message, PushMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Backoff parameters for reconnecting a dropped push channel.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries
    pub max_delay: Duration,
    /// Growth factor applied after each failure
    pub multiplier: f64,
    /// Consecutive failures tolerated before the listener gives up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Next backoff delay, clamped to the policy maximum.
fn next_delay(current: Duration, policy: &ReconnectPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Listens to the server's push channel for one batch.
#[derive(Debug, Clone)]
pub struct PushListener {
    ws_url: String,
    client_id: String,
    policy: ReconnectPolicy,
}

impl PushListener {
    /// Create a listener for `base_url` (the HTTP base, e.g.
    /// `http://host:8188`) identifying itself as `client_id`.
    #[must_use]
    pub fn new(base_url: &str, client_id: String, policy: ReconnectPolicy) -> Self {
        Self {
            ws_url: ws_url_from_http(base_url),
            client_id,
            policy,
        }
    }

    /// Derived WebSocket endpoint including the client id.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/ws?clientId={}", self.ws_url, self.client_id)
    }

    /// Run until cancelled or until reconnection attempts are exhausted.
    ///
    /// Every parseable frame is forwarded to `sink`; unknown frame types
    /// and binary frames (preview images) are dropped. A clean server close
    /// triggers the same reconnect path as a transport error.
    ///
    /// # Errors
    /// [`PhotovarError::Network`] once `max_attempts` consecutive
    /// connection attempts fail. Cancellation is a clean `Ok`.
    pub async fn run(
        &self,
        sink: mpsc::Sender<PushMessage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut attempts = 0u32;
        let mut delay = self.policy.initial_delay;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.connect(cancel).await {
                Ok(Some(stream)) => {
                    attempts = 0;
                    delay = self.policy.initial_delay;
                    if self.pump(stream, &sink, cancel).await {
                        return Ok(());
                    }
                    // fall through to reconnect
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.policy.max_attempts {
                        return Err(PhotovarError::network(format!(
                            "push channel lost after {attempts} connection attempts: {e}"
                        )));
                    }
                    tracing::warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "push channel connect failed, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                    delay = next_delay(delay, &self.policy);
                }
            }
        }
    }

    /// Connect once; `Ok(None)` means cancelled mid-handshake.
    async fn connect(&self, cancel: &CancellationToken) -> Result<Option<WsStream>> {
        let endpoint = self.endpoint();
        tokio::select! {
            () = cancel.cancelled() => Ok(None),
            result = connect_async(&endpoint) => {
                let (stream, _response) = result.map_err(|e| {
                    PhotovarError::network(format!("connect to {endpoint} failed: {e}"))
                })?;
                tracing::info!(%endpoint, "push channel connected");
                Ok(Some(stream))
            }
        }
    }

    /// Read frames until the stream ends. Returns `true` when the loop
    /// should stop for good (cancellation or closed sink), `false` to
    /// reconnect.
    async fn pump(
        &self,
        mut stream: WsStream,
        sink: &mpsc::Sender<PushMessage>,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return true,
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => match parse_push_message(&text) {
                    Ok(message) => {
                        if sink.send(message).await.is_err() {
                            // orchestrator is gone
                            return true;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring unrecognized push frame");
                    }
                },
                // binary frames carry live preview images
                Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    tracing::warn!("push channel closed by server");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "push channel read error");
                    return false;
                }
            }
        }
    }
}

/// Turn an HTTP base URL into the matching WebSocket base URL.
fn ws_url_from_http(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_map_to_ws_schemes() {
        assert_eq!(ws_url_from_http("http://host:8188"), "ws://host:8188");
        assert_eq!(ws_url_from_http("https://host/"), "wss://host");
        assert_eq!(ws_url_from_http("host:8188"), "ws://host:8188");
    }

    #[test]
    fn endpoint_carries_client_id() {
        let listener = PushListener::new(
            "http://host:8188",
            "client-42".into(),
            ReconnectPolicy::default(),
        );
        assert_eq!(listener.endpoint(), "ws://host:8188/ws?clientId=client-42");
    }

    #[test]
    fn backoff_grows_and_clamps() {
        let policy = ReconnectPolicy::default();
        let d1 = next_delay(policy.initial_delay, &policy);
        assert_eq!(d1, Duration::from_secs(2));
        let clamped = next_delay(Duration::from_secs(25), &policy);
        assert_eq!(clamped, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn unreachable_server_exhausts_attempts() {
        tokio::time::pause();
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_attempts: 2,
        };
        // port 1 on localhost refuses connections immediately
        let listener = PushListener::new("http://127.0.0.1:1", "cid".into(), policy);
        let (tx, _rx) = mpsc::channel(8);
        let err = listener
            .run(tx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PhotovarError::Network(_)));
    }

    #[tokio::test]
    async fn cancelled_listener_returns_ok() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let listener = PushListener::new(
            "http://127.0.0.1:1",
            "cid".into(),
            ReconnectPolicy::default(),
        );
        let (tx, _rx) = mpsc::channel(8);
        assert!(listener.run(tx, &cancel).await.is_ok());
    }
}
