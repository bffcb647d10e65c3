//! Scripted in-memory transport for session tests.
//!
//! Inbound frames are replayed in order; once the script is exhausted `recv`
//! never completes, like a server that stays silent. Every outbound frame is
//! recorded together with the (tokio) instant it was sent.

use crate::error::{StreamError, StreamResult};
use crate::transport::{Connector, Frame, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub at: Instant,
    pub frame: Sent,
}

#[derive(Debug, Clone)]
pub enum Inbound {
    Frame(Frame),
    /// The peer closes the connection
    Close,
}

pub type SentLog = Arc<Mutex<Vec<SentFrame>>>;

pub struct MockTransport {
    inbound: VecDeque<Inbound>,
    log: SentLog,
    closed: bool,
    send_delay: Duration,
    stall_on: Option<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Transport("connection is closed".to_string()));
        }
        if let Some(marker) = &self.stall_on {
            if text.contains(marker.as_str()) {
                std::future::pending::<()>().await;
            }
        }
        self.record(Sent::Text(text));
        Ok(())
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Transport("connection is closed".to_string()));
        }
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        self.record(Sent::Binary(data));
        Ok(())
    }

    async fn recv(&mut self) -> StreamResult<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }
        match self.inbound.pop_front() {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Close) => {
                self.closed = true;
                Ok(None)
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        if !self.closed {
            self.closed = true;
            self.record(Sent::Close);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl MockTransport {
    fn record(&self, frame: Sent) {
        self.log.lock().unwrap().push(SentFrame {
            at: Instant::now(),
            frame,
        });
    }
}

/// Hands out one scripted transport.
pub struct MockConnector {
    transport: Mutex<Option<MockTransport>>,
    log: SentLog,
    refuse: bool,
    hang: bool,
}

impl MockConnector {
    pub fn new(inbound: Vec<Inbound>) -> Self {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            transport: Mutex::new(Some(MockTransport {
                inbound: inbound.into(),
                log: log.clone(),
                closed: false,
                send_delay: Duration::ZERO,
                stall_on: None,
            })),
            log,
            refuse: false,
            hang: false,
        }
    }

    /// Server that replies to logon and start-stream with success.
    pub fn accepting(stream_id: u32) -> Self {
        Self::new(vec![
            text(r#"{"seq":1,"success":true,"refresh_token":"refresh"}"#),
            text(r#"{"command":"on_channel_status","channel":"Test","status":"online","users_online":2}"#),
            text(&format!(r#"{{"seq":2,"success":true,"stream_id":{}}}"#, stream_id)),
        ])
    }

    pub fn refusing() -> Self {
        let mut connector = Self::new(Vec::new());
        connector.refuse = true;
        connector
    }

    pub fn hanging() -> Self {
        let mut connector = Self::new(Vec::new());
        connector.hang = true;
        connector
    }

    /// Delay every binary send, simulating per-packet processing cost.
    pub fn with_send_delay(self, delay: Duration) -> Self {
        if let Some(transport) = self.transport.lock().unwrap().as_mut() {
            transport.send_delay = delay;
        }
        self
    }

    /// Never complete a text send containing `marker`.
    pub fn stalling_on(self, marker: &str) -> Self {
        if let Some(transport) = self.transport.lock().unwrap().as_mut() {
            transport.stall_on = Some(marker.to_string());
        }
        self
    }

    pub fn log(&self) -> SentLog {
        self.log.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> StreamResult<MockTransport> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.refuse {
            return Err(StreamError::Transport("connection refused".to_string()));
        }
        self.transport
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| StreamError::Transport("mock transport already used".to_string()))
    }
}

pub fn text(json: &str) -> Inbound {
    Inbound::Frame(Frame::Text(json.to_string()))
}

/// Text frames sent, parsed as JSON.
pub fn sent_commands(log: &SentLog) -> Vec<serde_json::Value> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|sent| match &sent.frame {
            Sent::Text(text) => serde_json::from_str(text).ok(),
            _ => None,
        })
        .collect()
}

/// Binary frames sent, with their send instants.
pub fn sent_packets(log: &SentLog) -> Vec<(Instant, Vec<u8>)> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|sent| match &sent.frame {
            Sent::Binary(data) => Some((sent.at, data.clone())),
            _ => None,
        })
        .collect()
}

pub fn was_closed(log: &SentLog) -> bool {
    log.lock().unwrap().iter().any(|sent| sent.frame == Sent::Close)
}
