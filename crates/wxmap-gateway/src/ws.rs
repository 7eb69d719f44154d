//! WebSocket broker transport.
//!
//! One connection per partition at
//! `{url}/streams/{topic}/subscribe?partition={n}[&apiKey=..]`, text frames
//! carrying JSON envelopes. The broker does not expose partition metadata
//! over this API, so the partition count is supplied by configuration.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use wxmap_core::{Envelope, PartitionId, Topic};

use crate::error::TransportError;
use crate::identity::ClientIdentity;
use crate::transport::{PartitionStream, Transport};

/// Header carrying the client fingerprint on every subscription request.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Header carrying [`ClientIdentity::sign`] over [`credential_message`].
pub const CLIENT_SIGNATURE_HEADER: &str = "x-client-signature";

/// Bytes signed for one broker: `{fingerprint}@{url}`.
pub fn credential_message(fingerprint: &str, url: &str) -> String {
    format!("{fingerprint}@{url}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsConfig {
    /// Broker base URL, `ws://` or `wss://`, without trailing slash.
    pub url: String,
    /// Optional broker API key, sent as the `apiKey` query parameter.
    pub api_key: Option<String>,
    /// Number of partitions the topic is deployed with.
    pub partitions: u32,
}

impl WsConfig {
    pub fn new(url: impl Into<String>, partitions: u32) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            partitions,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Subscription URL for one partition of `topic`.
    pub fn subscribe_url(&self, topic: &Topic, partition: PartitionId) -> String {
        let base = self.url.trim_end_matches('/');
        let mut url = format!(
            "{base}/streams/{}/subscribe?partition={partition}",
            percent_encode(topic.as_str())
        );
        if let Some(ref key) = self.api_key {
            url.push_str("&apiKey=");
            url.push_str(&percent_encode(key));
        }
        url
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    client_id: String,
    signature: String,
}

pub struct WsTransport {
    config: WsConfig,
    credentials: Mutex<Option<Credentials>>,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            credentials: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, identity: &ClientIdentity) -> Result<(), TransportError> {
        let url = &self.config.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::Connect(format!(
                "unsupported broker url {url:?}: expected ws:// or wss://"
            )));
        }
        let message = credential_message(identity.fingerprint(), url);
        let credentials = Credentials {
            client_id: identity.fingerprint().to_owned(),
            signature: identity.sign(message.as_bytes()),
        };
        *self
            .credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credentials);
        tracing::debug!(url = %url, client = identity.fingerprint(), "ws transport ready");
        Ok(())
    }

    async fn partitions(&self, topic: &Topic) -> Result<Vec<PartitionId>, TransportError> {
        tracing::debug!(
            %topic,
            partitions = self.config.partitions,
            "partition count taken from configuration"
        );
        Ok((0..self.config.partitions).map(PartitionId::new).collect())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        partition: PartitionId,
    ) -> Result<PartitionStream, TransportError> {
        let credentials = self
            .credentials()
            .ok_or_else(|| TransportError::Subscribe("transport not connected".into()))?;

        let url = self.config.subscribe_url(topic, partition);
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(CLIENT_ID_HEADER, header_value(&credentials.client_id)?);
        headers.insert(CLIENT_SIGNATURE_HEADER, header_value(&credentials.signature)?);

        let (socket, response) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!(
            %partition,
            status = %response.status(),
            "ws subscription established"
        );

        let stream = socket.filter_map(|frame| async move { decode_frame(frame) });
        Ok(stream.boxed())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::Subscribe(format!("invalid credential header: {e}")))
}

/// Map one websocket frame to a stream item. Control frames yield nothing.
fn decode_frame(
    frame: Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Envelope, TransportError>> {
    match frame {
        Ok(WsMessage::Text(text)) => Some(Envelope::decode(&text).map_err(TransportError::from)),
        Ok(WsMessage::Binary(bytes)) => Some(
            std::str::from_utf8(&bytes)
                .map_err(|e| TransportError::Decode(wxmap_core::CoreError::Decode(e.to_string())))
                .and_then(|text| Envelope::decode(text).map_err(TransportError::from)),
        ),
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => None,
        Ok(WsMessage::Close(frame)) => {
            tracing::debug!(?frame, "ws close frame received");
            None
        }
        Err(e) => Some(Err(TransportError::WebSocket(e))),
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn topic() -> Topic {
        Topic::new("streams.dimo.eth/firehose/weather").expect("topic")
    }

    #[test]
    fn subscribe_url_encodes_topic() {
        let cfg = WsConfig::new("ws://broker:7170/", 2);
        assert_eq!(
            cfg.subscribe_url(&topic(), PartitionId::new(1)),
            "ws://broker:7170/streams/streams.dimo.eth%2Ffirehose%2Fweather/subscribe?partition=1"
        );
    }

    #[test]
    fn subscribe_url_appends_api_key() {
        let cfg = WsConfig::new("wss://b", 1).with_api_key("k y");
        assert!(
            cfg.subscribe_url(&topic(), PartitionId::new(0))
                .ends_with("?partition=0&apiKey=k%20y")
        );
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(decode_frame(Ok(WsMessage::Ping(Vec::new()))).is_none());
        assert!(decode_frame(Ok(WsMessage::Close(None))).is_none());
    }

    #[test]
    fn text_and_binary_frames_decode() {
        let body = r#"{"data":{"ambientTemp":5,"latitude":1,"longitude":2}}"#;
        let text = decode_frame(Ok(WsMessage::Text(body.to_owned())))
            .expect("item")
            .expect("decoded");
        assert_eq!(text.data.ambient_temp, 5.0);
        let bin = decode_frame(Ok(WsMessage::Binary(body.as_bytes().to_vec())))
            .expect("item")
            .expect("decoded");
        assert_eq!(bin, text);
    }

    #[tokio::test]
    async fn partitions_come_from_config() {
        let ws = WsTransport::new(WsConfig::new("ws://localhost:1", 4));
        assert_eq!(ws.partitions(&topic()).await.expect("partitions").len(), 4);
    }

    #[tokio::test]
    async fn rejects_non_ws_url() {
        let ws = WsTransport::new(WsConfig::new("http://localhost:1", 1));
        let id = ClientIdentity::generate().expect("rng");
        assert!(matches!(
            ws.connect(&id).await,
            Err(TransportError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn subscribe_before_connect_fails() {
        let ws = WsTransport::new(WsConfig::new("ws://localhost:1", 1));
        assert!(ws.subscribe(&topic(), PartitionId::new(0)).await.is_err());
    }

    #[tokio::test]
    async fn receives_frames_from_local_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr: SocketAddr = listener.local_addr().expect("addr");

        let seen_headers = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_headers);
        let broker = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let capture = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned)
                };
                *seen.lock().expect("lock") =
                    Some((header(CLIENT_ID_HEADER), header(CLIENT_SIGNATURE_HEADER)));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, capture)
                .await
                .expect("handshake");
            for t in [10, 11] {
                let frame = format!(
                    r#"{{"data":{{"ambientTemp":{t},"latitude":0,"longitude":0}}}}"#
                );
                futures_util::SinkExt::send(&mut ws, WsMessage::Text(frame))
                    .await
                    .expect("send");
            }
            futures_util::SinkExt::close(&mut ws).await.ok();
        });

        let ws = WsTransport::new(WsConfig::new(format!("ws://{addr}"), 1));
        let id = ClientIdentity::generate().expect("rng");
        ws.connect(&id).await.expect("connect");
        let mut stream = ws
            .subscribe(&topic(), PartitionId::new(0))
            .await
            .expect("subscribe");

        let first = stream.next().await.expect("item").expect("decoded");
        let second = stream.next().await.expect("item").expect("decoded");
        assert_eq!(first.data.ambient_temp, 10.0);
        assert_eq!(second.data.ambient_temp, 11.0);

        drop(stream);
        broker.await.expect("broker task");

        let url = format!("ws://{addr}");
        let (client_id, signature) = seen_headers.lock().expect("lock").clone().expect("headers");
        assert_eq!(client_id.as_deref(), Some(id.fingerprint()));
        assert_eq!(
            signature,
            Some(id.sign(credential_message(id.fingerprint(), &url).as_bytes()))
        );
    }
}
