//! Dual-protocol transport
//!
//! One logical exchange is either a unary HTTP request/response or a
//! write-then-read on a persistent WebSocket connection. The engine
//! only sees the [`Transport`] trait, so the whole loop can run against
//! a scripted mock in tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::engine::EngineConfig;
use crate::error::EngineError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Protocol family of a bound URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Ws,
}

impl Scheme {
    pub fn of(url: &Url) -> Result<Self, EngineError> {
        match url.scheme() {
            "http" | "https" => Ok(Self::Http),
            "ws" | "wss" => Ok(Self::Ws),
            other => Err(EngineError::UnsupportedScheme {
                scheme: other.to_string(),
                url: url.to_string(),
            }),
        }
    }
}

/// A fully rendered request, ready to send
#[derive(Debug, Clone)]
pub struct BoundRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub setup_body: String,
}

impl BoundRequest {
    pub fn scheme(&self) -> Result<Scheme, EngineError> {
        Scheme::of(&self.url)
    }
}

impl fmt::Display for BoundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.method, self.url)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}: {value}")?;
        }
        if !self.body.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.body)?;
        }
        Ok(())
    }
}

/// What came back from one exchange
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status; 0 for WebSocket frames
    pub status: u16,
    /// Final request URL after redirects; None for WebSocket
    pub url: Option<Url>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One logical request/response exchange
#[async_trait]
pub trait Transport: Send {
    /// One-time handshake write+read before the first counted exchange
    async fn setup(&mut self, bound: &BoundRequest) -> Result<(), EngineError>;

    async fn exchange(&mut self, bound: &BoundRequest) -> Result<RawResponse, EngineError>;

    /// Release any persistent connection; must be safe to call twice
    async fn shutdown(&mut self);
}

/// Production transport: reqwest for HTTP, one cached tokio-tungstenite
/// connection for WebSocket
pub struct NetTransport {
    client: Client,
    timeout: Duration,
    ws: Option<WsStream>,
}

impl NetTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        if config.insecure {
            warn!("TLS certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            client: builder.build()?,
            timeout: config.timeout,
            ws: None,
        })
    }

    async fn http_exchange(&self, bound: &BoundRequest) -> Result<RawResponse, EngineError> {
        let method = reqwest::Method::from_bytes(bound.method.as_bytes())
            .map_err(|_| EngineError::InvalidMethod(bound.method.clone()))?;
        let headers = header_map(&bound.headers)?;

        debug!(method = %method, url = %bound.url, "http exchange");
        let response = self
            .client
            .request(method, bound.url.clone())
            .headers(headers)
            .body(bound.body.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        debug!(status, bytes = body.len(), "http response");

        Ok(RawResponse {
            status,
            url: Some(url),
            headers,
            body,
        })
    }

    async fn ws_exchange(&mut self, bound: &BoundRequest) -> Result<RawResponse, EngineError> {
        self.ensure_connected(bound).await?;
        let timeout_len = self.timeout;
        let stream = self.ws.as_mut().ok_or(EngineError::ConnectionClosed)?;

        debug!(bytes = bound.body.len(), "websocket write");
        timeout(timeout_len, stream.send(Message::Text(bound.body.clone())))
            .await
            .map_err(|_| EngineError::Timeout(timeout_len))??;
        let body = timeout(timeout_len, read_data_frame(stream))
            .await
            .map_err(|_| EngineError::Timeout(timeout_len))??;
        debug!(bytes = body.len(), "websocket read");

        Ok(RawResponse {
            status: 0,
            url: None,
            headers: Vec::new(),
            body,
        })
    }

    /// Dial and cache the connection on first use
    async fn ensure_connected(&mut self, bound: &BoundRequest) -> Result<(), EngineError> {
        if self.ws.is_some() {
            return Ok(());
        }
        info!(url = %bound.url, "dialing websocket");
        let mut request = bound.url.as_str().into_client_request()?;
        for (name, value) in &bound.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                EngineError::InvalidHeader { name: name.clone(), reason: e.to_string() }
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                EngineError::InvalidHeader { name: name.clone(), reason: e.to_string() }
            })?;
            request.headers_mut().insert(header_name, header_value);
        }
        let (stream, _) = timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))??;
        self.ws = Some(stream);
        Ok(())
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn setup(&mut self, bound: &BoundRequest) -> Result<(), EngineError> {
        match bound.scheme()? {
            Scheme::Http => {
                warn!("setup body is only sent on WebSocket targets, ignoring");
                Ok(())
            }
            Scheme::Ws => {
                self.ensure_connected(bound).await?;
                let timeout_len = self.timeout;
                let stream = self.ws.as_mut().ok_or(EngineError::ConnectionClosed)?;

                debug!(bytes = bound.setup_body.len(), "websocket setup write");
                timeout(timeout_len, stream.send(Message::Text(bound.setup_body.clone())))
                    .await
                    .map_err(|_| EngineError::Timeout(timeout_len))??;
                // the handshake reply is read and dropped
                timeout(timeout_len, read_data_frame(stream))
                    .await
                    .map_err(|_| EngineError::Timeout(timeout_len))??;
                Ok(())
            }
        }
    }

    async fn exchange(&mut self, bound: &BoundRequest) -> Result<RawResponse, EngineError> {
        match bound.scheme()? {
            Scheme::Http => self.http_exchange(bound).await,
            Scheme::Ws => self.ws_exchange(bound).await,
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut stream) = self.ws.take() {
            debug!("closing websocket");
            let _ = stream.close(None).await;
        }
    }
}

/// Next Text or Binary frame; control frames are skipped, Close ends
/// the stream as an error
async fn read_data_frame(stream: &mut WsStream) -> Result<Vec<u8>, EngineError> {
    loop {
        let message = stream.next().await.ok_or(EngineError::ConnectionClosed)??;
        match message {
            Message::Text(text) => return Ok(text.into_bytes()),
            Message::Binary(bytes) => return Ok(bytes),
            Message::Close(_) => return Err(EngineError::ConnectionClosed),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
}

/// Rendered header pairs to a reqwest HeaderMap; duplicates among
/// rendered names overwrite earlier entries
fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, EngineError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            EngineError::InvalidHeader { name: name.clone(), reason: e.to_string() }
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            EngineError::InvalidHeader { name: name.clone(), reason: e.to_string() }
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
