//! # WebSocket Transport
//!
//! tokio-tungstenite implementation of [`Connector`] and [`Transport`].
//! `wss://` endpoints are served over rustls with the webpki root store.
//!
//! ## Control Frames:
//! Pings are answered by tungstenite itself while reading; pongs and raw
//! frames are skipped. A close frame, or tungstenite reporting the
//! connection as closed, ends the stream of messages (`recv` returns `None`).

use crate::error::{StreamError, StreamResult};
use crate::transport::{Connector, Frame, Transport};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Opens WebSocket connections to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> StreamResult<WsTransport> {
        let (stream, response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| StreamError::Transport(format!("cannot connect to {}: {}", self.endpoint, e)))?;

        debug!(
            endpoint = %self.endpoint,
            status = %response.status(),
            "WebSocket connected"
        );

        Ok(WsTransport {
            stream,
            closed: false,
        })
    }
}

/// An open WebSocket connection.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WsTransport {
    async fn send_message(&mut self, message: Message) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Transport("connection is closed".to_string()));
        }

        match self.stream.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.closed = true;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> StreamResult<()> {
        self.send_message(Message::Text(text)).await
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> StreamResult<()> {
        self.send_message(Message::Binary(data)).await
    }

    async fn recv(&mut self) -> StreamResult<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }

        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(Frame::Text(text))),
                Ok(Message::Binary(data)) => return Ok(Some(Frame::Binary(data))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Server closed the connection");
                    self.closed = true;
                    return Ok(None);
                }
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    self.closed = true;
                    return Ok(None);
                }
                Err(e) => {
                    warn!(error = %e, "WebSocket read failed");
                    self.closed = true;
                    return Err(e.into());
                }
            }
        }

        self.closed = true;
        Ok(None)
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Loopback server running `serve` on the first accepted connection.
    async fn loopback<F, Fut>(serve: F) -> WsConnector
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            serve(ws).await;
        });
        WsConnector::new(format!("ws://{}/ws", addr))
    }

    #[tokio::test]
    async fn test_receives_messages_until_server_close() {
        let connector = loopback(|mut ws| async move {
            ws.send(Message::Text("hello".to_string())).await.unwrap();
            ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
            ws.send(Message::Ping(vec![9])).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut conn = connector.connect().await.unwrap();
        assert!(!conn.is_closed());
        assert_eq!(conn.recv().await.unwrap(), Some(Frame::Text("hello".to_string())));
        assert_eq!(conn.recv().await.unwrap(), Some(Frame::Binary(vec![1, 2, 3])));
        // The ping is answered internally and never surfaces.
        assert_eq!(conn.recv().await.unwrap(), None);
        assert!(conn.is_closed());
        assert_eq!(conn.recv().await.unwrap(), None);

        let err = conn.send_text("late".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);

        assert!(conn.close().await.is_ok());
        assert!(conn.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_client_close_is_idempotent() {
        let connector = loopback(|mut ws| async move {
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() || message.is_binary() {
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
            }
        })
        .await;

        let mut conn = connector.connect().await.unwrap();
        conn.send_text(r#"{"command":"logon"}"#.to_string()).await.unwrap();
        assert_eq!(
            conn.recv().await.unwrap(),
            Some(Frame::Text(r#"{"command":"logon"}"#.to_string()))
        );
        conn.send_binary(vec![0x01, 0, 0, 0, 7]).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), Some(Frame::Binary(vec![0x01, 0, 0, 0, 7])));

        assert!(conn.close().await.is_ok());
        assert!(conn.is_closed());
        assert!(conn.close().await.is_ok());

        let err = conn.send_binary(vec![0x01]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(conn.recv().await.unwrap(), None);
    }

    #[test]
    fn test_connector_keeps_endpoint() {
        let connector = WsConnector::new("wss://zello.io/ws");
        assert_eq!(connector.endpoint(), "wss://zello.io/ws");
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Port 9 on loopback is the discard service and is closed on test machines.
        let connector = WsConnector::new("ws://127.0.0.1:9/ws");
        let err = connector.connect().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
