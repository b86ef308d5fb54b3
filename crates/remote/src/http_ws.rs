use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::backoff::ReconnectBackoff;
use crate::envelope::{RangePage, RemoteEnvelope, RemoteEvent};
use crate::state::{ConnectionStats, ConnectionState};
use crate::{ConnectError, ProtocolError, RemoteStorage};

/// Supplies the bearer token to attach to every outbound request. The
/// `token` crate's `TokenManager` is the production implementation;
/// tests can hand in a fixed closure.
pub type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Default `RemoteStorage`: a REST endpoint for point reads/writes and
/// range enumeration, paired with a websocket subscription for the
/// pubsub change feed.
pub struct HttpWsRemote {
    http_base: Url,
    ws_url: Url,
    client_id: String,
    http: reqwest::Client,
    token: TokenSource,
    tx: broadcast::Sender<RemoteEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    stats: Arc<Mutex<ConnectionStats>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpWsRemote {
    pub fn new(http_base: Url, ws_url: Url, client_id: impl Into<String>, token: TokenSource) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            http_base,
            ws_url,
            client_id: client_id.into(),
            http: reqwest::Client::new(),
            token,
            tx,
            state_tx,
            state_rx,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
            task: Mutex::new(None),
        }
    }

    fn key_url(&self, key: &str) -> Result<Url, ConnectError> {
        self.http_base
            .join(key)
            .map_err(|e| ConnectError::InvalidEndpoint(e.to_string()))
    }

    fn stats_handle(&self) -> Arc<Mutex<ConnectionStats>> {
        self.stats.clone()
    }
}

#[async_trait]
impl RemoteStorage for HttpWsRemote {
    /// Dial the websocket once, synchronously, so a bad endpoint or
    /// rejected handshake surfaces as a real `ConnectError` to the
    /// caller instead of retrying silently forever in the background.
    /// Every subsequent drop is reconnected by the spawned loop.
    #[tracing::instrument(skip(self))]
    async fn connect(&self) -> Result<(), ConnectError> {
        let _ = self.state_tx.send(ConnectionState::Connecting);
        let initial_stream = dial(&self.ws_url, &self.token).await?;
        let _ = self.state_tx.send(ConnectionState::Connected);
        self.stats.lock().unwrap().last_connected_at = Some(now_millis());

        let ws_url = self.ws_url.clone();
        let token = self.token.clone();
        let tx = self.tx.clone();
        let state_tx = self.state_tx.clone();
        let stats = self.stats_handle();

        let handle = tokio::spawn(async move {
            let mut backoff = ReconnectBackoff::new();
            let mut stream = Some(initial_stream);

            loop {
                let mut ws = match stream.take() {
                    Some(ws) => ws,
                    None => match dial(&ws_url, &token).await {
                        Ok(ws) => {
                            backoff.reset();
                            {
                                let mut stats = stats.lock().unwrap();
                                stats.reconnect_count += 1;
                                stats.last_connected_at = Some(now_millis());
                            }
                            let _ = state_tx.send(ConnectionState::Connected);
                            ws
                        }
                        Err(error) => {
                            warn!(%error, "failed to dial remote websocket");
                            let delay = backoff.next_delay();
                            let _ = state_tx.send(ConnectionState::Reconnecting);
                            debug!(?delay, "retrying remote connection");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    },
                };

                while let Some(message) = ws.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<RemoteEnvelope>(&text) {
                                Ok(envelope) => {
                                    let _ = tx.send(envelope);
                                }
                                Err(error) => {
                                    warn!(%error, "dropping malformed remote envelope")
                                }
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(error) => {
                            warn!(%error, "websocket read error");
                            break;
                        }
                    }
                }
                let _ = ws.close(None).await;

                let delay = backoff.next_delay();
                let _ = state_tx.send(ConnectionState::Reconnecting);
                debug!(?delay, "retrying remote connection");
                tokio::time::sleep(delay).await;
            }
        });

        *self.task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    #[tracing::instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> Result<(), ProtocolError> {
        let url = self.key_url(key)?;
        let response = self
            .http
            .put(url)
            .bearer_auth((self.token)())
            .header("X-Client-Id", &self.client_id)
            .json(&value)
            .send()
            .await
            .map_err(ConnectError::from)?;
        check_ok(response).await
    }

    async fn delete(&self, key: &str) -> Result<(), ProtocolError> {
        let url = self.key_url(key)?;
        let response = self
            .http
            .delete(url)
            .bearer_auth((self.token)())
            .header("X-Client-Id", &self.client_id)
            .send()
            .await
            .map_err(ConnectError::from)?;
        check_ok(response).await
    }

    async fn range(&self, prefix: &str, cursor: Option<String>) -> Result<RangePage, ProtocolError> {
        let mut url = self
            .http_base
            .join("_range")
            .map_err(|e| ConnectError::InvalidEndpoint(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(cursor) = &cursor {
                query.append_pair("cursor", cursor);
            }
        }

        let response = self
            .http
            .get(url)
            .bearer_auth((self.token)())
            .send()
            .await
            .map_err(ConnectError::from)?;

        if !response.status().is_success() {
            return Err(ProtocolError::Rejected(response.status().to_string()));
        }

        #[derive(serde::Deserialize)]
        struct Page {
            entries: Vec<(String, Value)>,
            cursor: Option<String>,
        }
        let page: Page = response.json().await.map_err(ConnectError::from)?;
        Ok(RangePage {
            entries: page.entries,
            cursor: page.cursor,
        })
    }

    fn subscribe(&self) -> BroadcastStream<RemoteEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn connection_stats(&self) -> ConnectionStats {
        *self.stats.lock().unwrap()
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn dial(ws_url: &Url, token: &TokenSource) -> Result<WsStream, ConnectError> {
    let mut request_url = ws_url.clone();
    request_url.query_pairs_mut().append_pair("access_token", &token());
    let (stream, _response) = tokio_tungstenite::connect_async(request_url.as_str()).await?;
    Ok(stream)
}

async fn check_ok(response: reqwest::Response) -> Result<(), ProtocolError> {
    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ProtocolError::Rejected(format!("{status}: {body}")))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
