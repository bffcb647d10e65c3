//! # Stream Session
//!
//! Orchestrates one push-to-talk transmission: connect, log on, open a
//! stream, pace the audio out, stop the stream and close the connection.
//!
//! ## Guarantees:
//! - Exactly one terminal outcome per session: `Closed`, `Failed` or `Cancelled`
//! - Every wait, sends included, is bounded by the session's timeout and
//!   interruptible by its cancellation token; transports queue a frame whole
//!   or not at all, so an abandoned send never leaves half a frame behind
//! - Whenever a stream was opened, a stop-stream is attempted, and an opened
//!   connection is always closed, even after errors or cancellation
//! - No retries: a failed session is reported, the caller decides what next
//!
//! ## Concurrency:
//! A session drives its own connection from a single task. Independent
//! sessions share nothing but cloned, read-only settings, so they can run
//! side by side on separate tasks.

pub mod sender;
pub mod settings;
pub mod state;

pub use sender::{PacedSender, SendReport};
pub use settings::{Credential, SessionSettings, DEFAULT_TIMEOUT};
pub use state::{SessionOutcome, SessionReport, SessionState, SessionSummary, StreamHandle};

use crate::audio::{PacketSource, StreamParameters};
use crate::error::{StreamError, StreamResult};
use crate::protocol::messages::START_STREAM_SEQ;
use crate::protocol::{codec, InboundMessage, StreamStartReply};
use crate::transport::{Connector, Frame, Transport};
use chrono::Utc;
use std::future::Future;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a bounded wait ended early.
///
/// Kept separate from `StreamError` because the same interruption means
/// different things per step: a timeout while connecting is a transport
/// failure, while logging on it is an authentication failure.
enum Interrupted {
    Cancelled,
    TimedOut,
}

/// Await `fut` until `deadline`, giving up as soon as `cancel` fires.
///
/// ## Rust Concepts:
/// - **biased select**: the token is polled first, so a cancellation that is
///   already pending wins over a future that happens to be ready too
/// - **Dropping a future**: when either side wins, `fut` is dropped, which is
///   how an in-flight send or receive is abandoned
async fn interruptible<F: Future>(
    cancel: &CancellationToken,
    deadline: Instant,
    fut: F,
) -> Result<F::Output, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        result = timeout_at(deadline, fut) => result.map_err(|_| Interrupted::TimedOut),
    }
}

/// Signals collected while waiting for logon to complete.
///
/// ## Why outside the scan:
/// The scan future is dropped when the deadline passes. Keeping the flags in
/// the caller's frame means the timeout error can still say which of the two
/// signals never arrived.
#[derive(Debug, Default)]
struct AuthProgress {
    authorized: bool,
    channel_online: bool,
}

impl AuthProgress {
    fn complete(&self) -> bool {
        self.authorized && self.channel_online
    }

    fn missing(&self) -> &'static str {
        match (self.authorized, self.channel_online) {
            (false, false) => "no logon reply and channel not online",
            (false, true) => "no logon reply",
            (true, false) => "channel not online",
            (true, true) => "nothing",
        }
    }
}

/// One streaming session over one connection.
///
/// ## Rust Concepts:
/// - **Generic C: Connector**: the WebSocket connector in production, a
///   scripted one in tests; the state machine does not know the difference
/// - **run(self)**: running consumes the session, so a session cannot be
///   run twice and cannot be inspected half way through by another owner
/// - **CancellationToken**: cloned out to whoever may need to stop the
///   session (a signal handler, a UI); cancelling any clone stops it
///
/// ## Usage Example:
/// ```no_run
/// use channel_streamer::audio::OggOpusSource;
/// use channel_streamer::session::{Credential, SessionSettings, StreamSession};
/// use channel_streamer::transport::WsConnector;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = SessionSettings::new(Credential::new("signed-jwt"), "user", "pass", "Dispatch");
/// let session = StreamSession::new(WsConnector::new("wss://zello.io/ws"), settings);
/// let cancel = session.cancellation_token();
///
/// let report = session.run(OggOpusSource::open("clip.opus")?).await;
/// println!("{:?}", report.outcome);
/// # drop(cancel);
/// # Ok(())
/// # }
/// ```
pub struct StreamSession<C: Connector> {
    id: Uuid,
    connector: C,
    settings: SessionSettings,
    cancel: CancellationToken,
    state: SessionState,
    transitions: Vec<SessionState>,
}

impl<C: Connector> StreamSession<C> {
    /// Create an idle session with a fresh id and its own cancellation token.
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            connector,
            settings,
            cancel: CancellationToken::new(),
            state: SessionState::Idle,
            transitions: vec![SessionState::Idle],
        }
    }

    /// Use an existing token, e.g. a child of an application-wide shutdown token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts this session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion, consuming `source`.
    ///
    /// ## State Transitions:
    /// Idle → Connecting → Authenticating → StreamStarting → Streaming → Stopping → Closed,
    /// with Failed or Cancelled replacing Closed when the flow is cut short.
    pub async fn run<S: PacketSource>(mut self, mut source: S) -> SessionReport {
        info!(
            session = %self.id,
            channel = %self.settings.channel,
            "Starting streaming session"
        );

        let mut transport: Option<C::Transport> = None;
        let mut handle: Option<StreamHandle> = None;

        let result = self.drive(&mut transport, &mut handle, &mut source).await;

        if let Some(conn) = transport {
            self.shutdown(conn, handle).await;
        }

        let outcome = match result {
            Ok(summary) => SessionOutcome::Closed(summary),
            Err(StreamError::Cancelled) => SessionOutcome::Cancelled,
            Err(e) => SessionOutcome::Failed(e),
        };
        self.transition(outcome.state());

        match &outcome {
            SessionOutcome::Closed(summary) => info!(
                session = %self.id,
                stream_id = summary.stream_id,
                packets = summary.packets_sent,
                streamed_ms = summary.streamed.as_millis() as u64,
                "Session closed"
            ),
            SessionOutcome::Cancelled => info!(session = %self.id, "Session cancelled"),
            SessionOutcome::Failed(e) => error!(
                session = %self.id,
                kind = e.kind().as_str(),
                error = %e,
                "Session failed"
            ),
        }

        SessionReport {
            session_id: self.id,
            outcome,
            transitions: self.transitions,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            session = %self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Session state change"
        );
        self.state = next;
        self.transitions.push(next);
    }

    /// Everything up to the end of streaming. Cleanup is left to the caller.
    ///
    /// ## Why the out-parameters:
    /// `transport` and `handle` are filled in as soon as they exist and stay
    /// with `run` when this returns early through `?`, so `run` knows
    /// whether there is a stream to stop and a connection to close no matter
    /// where the failure happened.
    async fn drive<S: PacketSource>(
        &mut self,
        transport: &mut Option<C::Transport>,
        handle: &mut Option<StreamHandle>,
        source: &mut S,
    ) -> StreamResult<SessionSummary> {
        if let Some(expiry) = self.settings.credential.expires_at() {
            if self.settings.credential.is_expired_at(Utc::now()) {
                return Err(StreamError::Auth(format!("credential expired at {}", expiry.to_rfc3339())));
            }
        }

        // Parameters that cannot be paced are refused before anything is opened.
        let params = source.parameters();
        params.validate()?;

        self.transition(SessionState::Connecting);
        let deadline = Instant::now() + self.settings.timeout;
        let conn = match interruptible(&self.cancel, deadline, self.connector.connect()).await {
            Ok(result) => result?,
            Err(Interrupted::Cancelled) => return Err(StreamError::Cancelled),
            Err(Interrupted::TimedOut) => {
                return Err(StreamError::Transport(format!(
                    "connect timed out after {:?}",
                    self.settings.timeout
                )))
            }
        };
        let conn = transport.insert(conn);

        self.transition(SessionState::Authenticating);
        self.authenticate(conn).await?;
        info!(session = %self.id, channel = %self.settings.channel, "Logged on, channel online");

        self.transition(SessionState::StreamStarting);
        let stream_id = self.start_stream(conn, params).await?;
        let live = handle.insert(StreamHandle::new(stream_id, START_STREAM_SEQ));
        info!(session = %self.id, stream_id, "Stream started");

        self.transition(SessionState::Streaming);
        let session_id = self.id.to_string();
        let report = PacedSender::new(conn, live, &self.cancel, &session_id)
            .run(source)
            .await?;

        Ok(SessionSummary {
            stream_id,
            packets_sent: report.packets_sent,
            packets_dropped: report.packets_dropped,
            streamed: report.streamed,
            elapsed: report.elapsed,
        })
    }

    /// Send logon and wait until the logon is authorized and the channel is online.
    ///
    /// The send and the scan share one deadline, so a slow send leaves less
    /// time for the replies rather than extending the step.
    async fn authenticate(&self, conn: &mut C::Transport) -> StreamResult<()> {
        let deadline = Instant::now() + self.settings.timeout;
        let logon = codec::encode_logon(
            self.settings.credential.token(),
            &self.settings.username,
            &self.settings.password,
            &self.settings.channel,
        )?;

        match interruptible(&self.cancel, deadline, conn.send_text(logon)).await {
            Ok(sent) => sent?,
            Err(Interrupted::Cancelled) => return Err(StreamError::Cancelled),
            Err(Interrupted::TimedOut) => {
                return Err(StreamError::Auth("logon could not be sent in time".to_string()))
            }
        }

        let mut progress = AuthProgress::default();
        let scanned = interruptible(&self.cancel, deadline, scan_logon(conn, &mut progress, &self.id)).await;
        match scanned {
            Ok(result) => result,
            Err(Interrupted::Cancelled) => Err(StreamError::Cancelled),
            Err(Interrupted::TimedOut) => Err(StreamError::Auth(format!(
                "logon not confirmed within {:?}: {}",
                self.settings.timeout,
                progress.missing()
            ))),
        }
    }

    /// Send start-stream and wait for the server to allocate a stream id.
    async fn start_stream(&self, conn: &mut C::Transport, params: StreamParameters) -> StreamResult<u32> {
        let deadline = Instant::now() + self.settings.timeout;
        let request = codec::encode_start_stream(&params)?;
        debug!(
            session = %self.id,
            sample_rate = params.sample_rate,
            frames_per_packet = params.frames_per_packet,
            packet_duration_ms = params.packet_duration_ms,
            "Requesting stream"
        );

        match interruptible(&self.cancel, deadline, conn.send_text(request)).await {
            Ok(sent) => sent?,
            Err(Interrupted::Cancelled) => return Err(StreamError::Cancelled),
            Err(Interrupted::TimedOut) => {
                return Err(StreamError::StreamStart(
                    "start_stream could not be sent in time".to_string(),
                ))
            }
        }

        match interruptible(&self.cancel, deadline, scan_stream_start(conn, &self.id)).await {
            Ok(result) => result,
            Err(Interrupted::Cancelled) => Err(StreamError::Cancelled),
            Err(Interrupted::TimedOut) => Err(StreamError::StreamStart(format!(
                "no stream id received within {:?}",
                self.settings.timeout
            ))),
        }
    }

    /// Best-effort stop of a live stream, then an unconditional close.
    ///
    /// Both steps are bounded by the session timeout and ignore cancellation,
    /// which has already been observed by the time this runs.
    async fn shutdown(&mut self, mut conn: C::Transport, handle: Option<StreamHandle>) {
        if let Some(handle) = handle {
            self.transition(SessionState::Stopping);
            let stream_id = handle.stream_id();

            match codec::encode_stop_stream(stream_id) {
                Ok(request) => match timeout(self.settings.timeout, conn.send_text(request)).await {
                    Ok(Ok(())) => debug!(
                        session = %self.id,
                        stream_id,
                        last_seq = handle.sequence(),
                        packets = handle.packets_allocated(),
                        "Stream stopped"
                    ),
                    Ok(Err(e)) => warn!(session = %self.id, stream_id, error = %e, "stop_stream not sent"),
                    Err(_) => warn!(session = %self.id, stream_id, "stop_stream timed out, skipping"),
                },
                Err(e) => warn!(session = %self.id, stream_id, error = %e, "stop_stream not encoded"),
            }
        }

        match timeout(self.settings.timeout, conn.close()).await {
            Ok(Ok(())) => debug!(session = %self.id, "Connection closed"),
            Ok(Err(e)) => debug!(session = %self.id, error = %e, "Connection close failed"),
            Err(_) => warn!(session = %self.id, "Connection close timed out, dropping it"),
        }
    }
}

/// Read inbound messages until logon is authorized and the channel is online.
async fn scan_logon<T: Transport>(conn: &mut T, progress: &mut AuthProgress, session: &Uuid) -> StreamResult<()> {
    while !progress.complete() {
        let text = match next_text(conn, "authentication").await? {
            Some(text) => text,
            None => continue,
        };

        match codec::decode(&text) {
            InboundMessage::LogonResult { authorized: true, .. } => progress.authorized = true,
            InboundMessage::LogonResult { authorized: false, error } => {
                return Err(StreamError::Auth(format!(
                    "logon rejected: {}",
                    error.unwrap_or_else(|| "no reason given".to_string())
                )));
            }
            message @ InboundMessage::ChannelStatus { .. } => {
                progress.channel_online = message.is_channel_online();
                debug!(session = %session, ?message, "Channel status");
            }
            InboundMessage::Error { error, .. } => {
                return Err(StreamError::Auth(format!("server error during logon: {}", error)));
            }
            other => debug!(session = %session, ?other, "Skipping message during logon"),
        }
    }
    Ok(())
}

/// Read inbound messages until the start-stream request is answered.
async fn scan_stream_start<T: Transport>(conn: &mut T, session: &Uuid) -> StreamResult<u32> {
    loop {
        let text = match next_text(conn, "stream negotiation").await? {
            Some(text) => text,
            None => continue,
        };

        match codec::decode(&text) {
            InboundMessage::StreamStartResult(StreamStartReply::Started { stream_id }) => return Ok(stream_id),
            InboundMessage::StreamStartResult(StreamStartReply::Rejected { error })
            | InboundMessage::Error { error, .. } => {
                return Err(StreamError::StreamStart(format!("stream rejected: {}", error)));
            }
            other => debug!(session = %session, ?other, "Skipping message during stream negotiation"),
        }
    }
}

/// Next text frame; `Ok(None)` for frames to skip, an error if the connection closed.
async fn next_text<T: Transport>(conn: &mut T, step: &str) -> StreamResult<Option<String>> {
    match conn.recv().await? {
        Some(Frame::Text(text)) => Ok(Some(text)),
        Some(Frame::Binary(_)) => Ok(None),
        None => Err(StreamError::Transport(format!("connection closed during {}", step))),
    }
}
