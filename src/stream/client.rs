//! Gateway frame-log websocket client.
//!
//! [`FrameLogClient::open`] spawns a background worker that owns the
//! websocket, reconnects with backoff, and routes every inbound frame either
//! to the caller's [`FrameLogHandler`] or to the injected error sink. The
//! returned [`FrameLogSubscription`] stops the worker on `close()` or drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::dispatch::{Action, ErrorSink};
use crate::retry::{with_timeout, BackoffPolicy};
use crate::session::SessionProvider;
use crate::stream::endpoint::{EndpointResolver, PageLocation};
use crate::stream::proto::InboundFrame;

/// First entry of the websocket sub-protocol list; the token follows it.
pub const BEARER_PROTOCOL: &str = "Bearer";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameLogDefaults;

impl FrameLogDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);
    pub const PING_INTERVAL: Duration = Duration::from_secs(30);
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const MIN_UPTIME: Duration = Duration::from_secs(5);
}

/// Connection supervision settings for frame-log subscriptions.
#[derive(Clone, Debug)]
pub struct FrameLogOptions {
    /// Upper bound for a single websocket handshake.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings. Zero disables pings.
    pub ping_interval: Duration,
    /// A connection with no inbound frame for this long is dropped. Zero
    /// disables the check.
    pub idle_timeout: Duration,
    /// Uptime after which the reconnect backoff starts over.
    pub min_uptime: Duration,
    /// Delay schedule between reconnect attempts.
    pub reconnect_backoff: BackoffPolicy,
    /// Re-read the session token before every reconnect instead of reusing
    /// the token captured by `open`.
    pub refresh_token_on_reconnect: bool,
}

impl Default for FrameLogOptions {
    fn default() -> Self {
        Self {
            connect_timeout: FrameLogDefaults::CONNECT_TIMEOUT,
            ping_interval: FrameLogDefaults::PING_INTERVAL,
            idle_timeout: FrameLogDefaults::IDLE_TIMEOUT,
            min_uptime: FrameLogDefaults::MIN_UPTIME,
            reconnect_backoff: BackoffPolicy::reconnect(),
            refresh_token_on_reconnect: false,
        }
    }
}

/// Lifecycle of a frame-log subscription.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// The connection was lost or could not be established; waiting out the
    /// backoff delay.
    Reconnecting,
    /// Closed by the caller. Terminal.
    Disposed,
}

/// Receives frame-log lifecycle events and data frames.
///
/// All methods are called sequentially from the subscription's worker task.
pub trait FrameLogHandler: Send + 'static {
    /// A (re)connection was established.
    fn on_open(&mut self) {}

    /// An established connection was lost. Called before the reconnect delay.
    fn on_close(&mut self) {}

    /// A data frame arrived; `result` is its `result` payload.
    fn on_data(&mut self, result: Value);
}

/// [`FrameLogHandler`] built from three closures.
pub struct FrameLogCallbacks<O, C, D> {
    on_open: O,
    on_close: C,
    on_data: D,
}

impl<O, C, D> FrameLogCallbacks<O, C, D>
where
    O: FnMut() + Send + 'static,
    C: FnMut() + Send + 'static,
    D: FnMut(Value) + Send + 'static,
{
    pub fn new(on_open: O, on_close: C, on_data: D) -> Self {
        Self {
            on_open,
            on_close,
            on_data,
        }
    }
}

impl<O, C, D> FrameLogHandler for FrameLogCallbacks<O, C, D>
where
    O: FnMut() + Send + 'static,
    C: FnMut() + Send + 'static,
    D: FnMut(Value) + Send + 'static,
{
    fn on_open(&mut self) {
        (self.on_open)()
    }

    fn on_close(&mut self) {
        (self.on_close)()
    }

    fn on_data(&mut self, result: Value) {
        (self.on_data)(result)
    }
}

/// Entry point for opening gateway frame-log streams.
#[derive(Clone)]
pub struct FrameLogClient {
    resolver: EndpointResolver,
    session: Arc<dyn SessionProvider>,
    error_sink: Arc<dyn ErrorSink>,
    options: FrameLogOptions,
}

impl FrameLogClient {
    /// Creates a client for an application served from `location`.
    pub fn new(
        location: PageLocation,
        session: Arc<dyn SessionProvider>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            resolver: EndpointResolver::new(location),
            session,
            error_sink,
            options: FrameLogOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FrameLogOptions) -> Self {
        self.options = options;
        self
    }

    /// Routes pages served from `host` to the websocket base `base`.
    pub fn with_local_dev(mut self, host: impl Into<String>, base: impl Into<String>) -> Self {
        self.resolver = self.resolver.with_local_dev(host, base);
        self
    }

    /// Sets an explicit websocket base, overriding endpoint derivation.
    pub fn with_endpoint(mut self, base: impl Into<String>) -> Self {
        self.resolver = self.resolver.with_endpoint(base);
        self
    }

    /// Returns the websocket URL frames for `gateway_id` are streamed from.
    pub fn endpoint_for(&self, gateway_id: &str) -> String {
        self.resolver.frames_url(gateway_id)
    }

    /// Opens a frame-log stream for `gateway_id`.
    ///
    /// Returns as soon as the worker is spawned; connection progress is
    /// reported through `handler`. Only invalid input or a missing tokio
    /// runtime produce an error. Transport failures are retried forever and
    /// never surface here.
    pub fn open<H>(
        &self,
        gateway_id: &str,
        handler: H,
    ) -> Result<FrameLogSubscription, StreamClientError>
    where
        H: FrameLogHandler,
    {
        let gateway_id = validate_gateway_id(gateway_id)?;
        let url = self.endpoint_for(gateway_id);
        let token = self.session.token();
        build_request(&url, &token)?;

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| StreamClientError::NoRuntime)?;

        let closed = Arc::new(AtomicBool::new(false));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = FrameLogWorker {
            url: url.clone(),
            token,
            session: Arc::clone(&self.session),
            options: self.options.clone(),
            router: FrameRouter {
                closed: Arc::clone(&closed),
                error_sink: Arc::clone(&self.error_sink),
            },
            state: Arc::clone(&state_tx),
        };
        runtime.spawn(worker.run(handler, shutdown_rx));
        debug!(event = "frame_log_opened", gateway_id, url = %url);

        Ok(FrameLogSubscription {
            gateway_id: gateway_id.to_string(),
            endpoint: url,
            closed,
            state_tx,
            state_rx,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Opens a frame-log stream with plain closures as callbacks.
    pub fn open_with<O, C, D>(
        &self,
        gateway_id: &str,
        on_open: O,
        on_close: C,
        on_data: D,
    ) -> Result<FrameLogSubscription, StreamClientError>
    where
        O: FnMut() + Send + 'static,
        C: FnMut() + Send + 'static,
        D: FnMut(Value) + Send + 'static,
    {
        self.open(gateway_id, FrameLogCallbacks::new(on_open, on_close, on_data))
    }
}

/// Caller handle for one auto-reconnecting frame-log stream.
///
/// Dropping the handle closes the stream.
#[derive(Debug)]
pub struct FrameLogSubscription {
    gateway_id: String,
    endpoint: String,
    closed: Arc<AtomicBool>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FrameLogSubscription {
    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Returns a receiver observing every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops the stream.
    ///
    /// No callback starts and nothing is published to the error sink after
    /// this returns. Calling it again has no effect.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state_tx.send_replace(ConnectionState::Disposed);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        debug!(event = "frame_log_disposed", gateway_id = %self.gateway_id);
    }
}

impl Drop for FrameLogSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Errors produced before a frame-log stream is started.
#[derive(Debug, Error)]
pub enum StreamClientError {
    /// Websocket request could not be built.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Token could not be carried in the sub-protocol header.
    #[error("invalid bearer token header: {0}")]
    InvalidTokenHeader(#[from] InvalidHeaderValue),

    #[error("invalid gateway id: {0:?}")]
    InvalidGatewayId(String),

    #[error("invalid page origin: {0}")]
    InvalidOrigin(String),

    /// `open` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the stream")]
    NoRuntime,
}

fn validate_gateway_id(gateway_id: &str) -> Result<&str, StreamClientError> {
    let trimmed = gateway_id.trim();
    let invalid = trimmed.is_empty()
        || trimmed
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'));
    if invalid {
        return Err(StreamClientError::InvalidGatewayId(gateway_id.to_string()));
    }
    Ok(trimmed)
}

fn build_request(url: &str, token: &SecretString) -> Result<Request, StreamClientError> {
    let mut request = url.into_client_request()?;
    let protocols: HeaderValue = format!("{BEARER_PROTOCOL}, {}", token.expose_secret()).parse()?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, protocols);
    Ok(request)
}

/// Routes parsed frames to the handler or the error sink.
struct FrameRouter {
    closed: Arc<AtomicBool>,
    error_sink: Arc<dyn ErrorSink>,
}

impl FrameRouter {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn route<H: FrameLogHandler>(&self, url: &str, text: &str, handler: &mut H) {
        let frame = match InboundFrame::from_text(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "frame_log_parse_failed", url, error = %err);
                return;
            }
        };

        if self.is_closed() {
            return;
        }

        match frame {
            InboundFrame::Error(err) => {
                debug!(
                    event = "frame_log_error_frame",
                    url,
                    grpc_code = err.grpc_code,
                    message = %err.message
                );
                self.error_sink
                    .dispatch(Action::create_error(err.grpc_code, err.message));
            }
            InboundFrame::Data(result) => handler.on_data(result),
            InboundFrame::Unknown => debug!(event = "frame_log_untagged_frame", url),
        }
    }

    fn open<H: FrameLogHandler>(&self, handler: &mut H) {
        if !self.is_closed() {
            handler.on_open();
        }
    }

    fn close<H: FrameLogHandler>(&self, handler: &mut H) {
        if !self.is_closed() {
            handler.on_close();
        }
    }
}

enum SessionOutcome {
    Shutdown,
    ConnectFailed,
    Dropped { uptime: Duration },
}

struct FrameLogWorker {
    url: String,
    token: SecretString,
    session: Arc<dyn SessionProvider>,
    options: FrameLogOptions,
    router: FrameRouter,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl FrameLogWorker {
    async fn run<H: FrameLogHandler>(
        mut self,
        mut handler: H,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut attempt = 0usize;

        loop {
            if self.router.is_closed() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let outcome = self
                .run_connected_session(&mut handler, &mut shutdown_rx)
                .await;
            match outcome {
                SessionOutcome::Shutdown => break,
                SessionOutcome::Dropped { .. } => {
                    self.set_state(ConnectionState::Reconnecting);
                    self.router.close(&mut handler);
                }
                SessionOutcome::ConnectFailed => {
                    self.set_state(ConnectionState::Reconnecting);
                }
            }

            attempt = next_reconnect_attempt(attempt, &outcome, self.options.min_uptime);
            let delay = self.options.reconnect_backoff.delay_for_attempt(attempt);
            debug!(
                event = "frame_log_reconnect_scheduled",
                url = %self.url,
                attempt,
                delay_ms = delay.as_millis() as u64
            );
            if !wait_for_reconnect(delay, &mut shutdown_rx).await {
                break;
            }

            if self.options.refresh_token_on_reconnect {
                self.token = self.session.token();
            }
        }

        self.set_state(ConnectionState::Disposed);
        debug!(event = "frame_log_worker_stopped", url = %self.url);
    }

    async fn run_connected_session<H: FrameLogHandler>(
        &self,
        handler: &mut H,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> SessionOutcome {
        let request = match build_request(&self.url, &self.token) {
            Ok(request) => request,
            Err(err) => {
                warn!(event = "frame_log_request_invalid", url = %self.url, error = %err);
                return SessionOutcome::ConnectFailed;
            }
        };

        let connect = with_timeout(self.options.connect_timeout, connect_async(request));
        let mut socket = tokio::select! {
            _ = &mut *shutdown_rx => return SessionOutcome::Shutdown,
            result = connect => match result {
                Ok(Ok((socket, _))) => socket,
                Ok(Err(err)) => {
                    warn!(event = "frame_log_connect_failed", url = %self.url, error = %err);
                    return SessionOutcome::ConnectFailed;
                }
                Err(_) => {
                    warn!(
                        event = "frame_log_connect_timeout",
                        url = %self.url,
                        timeout_ms = self.options.connect_timeout.as_millis() as u64
                    );
                    return SessionOutcome::ConnectFailed;
                }
            },
        };

        if self.router.is_closed() {
            let _ = socket.close(None).await;
            return SessionOutcome::Shutdown;
        }

        info!(event = "frame_log_connected", url = %self.url);
        self.set_state(ConnectionState::Open);
        self.router.open(handler);

        let opened_at = Instant::now();
        let dropped = || SessionOutcome::Dropped {
            uptime: opened_at.elapsed(),
        };

        let ping_enabled = !self.options.ping_interval.is_zero();
        let ping_period = self.options.ping_interval.max(Duration::from_millis(1));
        let mut ping = tokio::time::interval_at(opened_at + ping_period, ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle_enabled = !self.options.idle_timeout.is_zero();
        let idle = tokio::time::sleep(self.options.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => {
                    let _ = socket.close(None).await;
                    return SessionOutcome::Shutdown;
                }
                _ = ping.tick(), if ping_enabled => {
                    if let Err(err) = socket.send(Message::Ping(Default::default())).await {
                        warn!(event = "frame_log_ping_failed", url = %self.url, error = %err);
                        return dropped();
                    }
                }
                _ = &mut idle, if idle_enabled => {
                    warn!(
                        event = "frame_log_idle_timeout",
                        url = %self.url,
                        idle_ms = self.options.idle_timeout.as_millis() as u64
                    );
                    return dropped();
                }
                maybe_inbound = socket.next() => {
                    idle.as_mut().reset(Instant::now() + self.options.idle_timeout);
                    match maybe_inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.router.route(&self.url, &text, handler);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if socket.send(Message::Pong(payload)).await.is_err() {
                                return dropped();
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Binary(payload))) => {
                            debug!(
                                event = "frame_log_binary_ignored",
                                url = %self.url,
                                len = payload.len()
                            );
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            info!(event = "frame_log_closing", url = %self.url);
                            return dropped();
                        }
                        Some(Err(err)) => {
                            warn!(event = "frame_log_receive_failed", url = %self.url, error = %err);
                            return dropped();
                        }
                        None => {
                            info!(event = "frame_log_closing", url = %self.url);
                            return dropped();
                        }
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if state != ConnectionState::Disposed && self.router.is_closed() {
            return;
        }
        self.state.send_replace(state);
    }
}

/// Backoff attempt for the next reconnect. A connection that stayed up for
/// at least `min_uptime` starts the schedule over.
fn next_reconnect_attempt(
    previous: usize,
    outcome: &SessionOutcome,
    min_uptime: Duration,
) -> usize {
    match outcome {
        SessionOutcome::Dropped { uptime } if *uptime >= min_uptime => 1,
        _ => previous + 1,
    }
}

/// Sleeps for `delay`, returning `false` if shutdown was requested first.
async fn wait_for_reconnect(delay: Duration, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_rx => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

    use super::{
        build_request, next_reconnect_attempt, validate_gateway_id, ConnectionState,
        FrameLogCallbacks, FrameLogClient, FrameLogHandler, FrameLogOptions, FrameRouter,
        SessionOutcome, StreamClientError,
    };
    use crate::dispatch::{Action, ErrorDispatcher};
    use crate::retry::BackoffPolicy;
    use crate::session::StaticSession;
    use crate::stream::endpoint::PageLocation;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Open,
        Close,
        Data(Value),
    }

    struct Recorder(mpsc::UnboundedSender<Seen>);

    impl FrameLogHandler for Recorder {
        fn on_open(&mut self) {
            let _ = self.0.send(Seen::Open);
        }

        fn on_close(&mut self) {
            let _ = self.0.send(Seen::Close);
        }

        fn on_data(&mut self, result: Value) {
            let _ = self.0.send(Seen::Data(result));
        }
    }

    fn router() -> (
        FrameRouter,
        Arc<AtomicBool>,
        mpsc::UnboundedReceiver<Action>,
    ) {
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let router = FrameRouter {
            closed: Arc::clone(&closed),
            error_sink: Arc::new(sink_tx),
        };
        (router, closed, sink_rx)
    }

    fn client() -> FrameLogClient {
        FrameLogClient::new(
            PageLocation::new(true, "app.example.com"),
            Arc::new(StaticSession::new(SecretString::new("token-1".to_string()))),
            Arc::new(ErrorDispatcher::default()),
        )
    }

    #[test]
    fn data_frame_reaches_handler_only() {
        let (router, _closed, mut sink_rx) = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = Recorder(tx);

        router.route("ws://test", r#"{"result":{"fCnt":1}}"#, &mut handler);

        assert_eq!(rx.try_recv().ok(), Some(Seen::Data(json!({"fCnt": 1}))));
        assert!(sink_rx.try_recv().is_err());
    }

    #[test]
    fn error_frame_reaches_sink_only() {
        let (router, _closed, mut sink_rx) = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = Recorder(tx);

        router.route(
            "ws://test",
            r#"{"error":{"grpcCode":5,"message":"object does not exist"}}"#,
            &mut handler,
        );

        assert_eq!(
            sink_rx.try_recv().ok(),
            Some(Action::create_error(5, "object does not exist"))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn string_error_frame_is_published_as_unknown() {
        let (router, _closed, mut sink_rx) = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = Recorder(tx);

        router.route("ws://test", r#"{"error":"boom"}"#, &mut handler);

        assert_eq!(sink_rx.try_recv().ok(), Some(Action::create_error(2, "boom")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn attempts_grow_until_a_connection_outlives_min_uptime() {
        let min_uptime = Duration::from_secs(5);
        let short = SessionOutcome::Dropped {
            uptime: Duration::from_secs(1),
        };
        let long = SessionOutcome::Dropped {
            uptime: Duration::from_secs(5),
        };

        let mut attempt = 0;
        attempt = next_reconnect_attempt(attempt, &SessionOutcome::ConnectFailed, min_uptime);
        assert_eq!(attempt, 1);
        attempt = next_reconnect_attempt(attempt, &SessionOutcome::ConnectFailed, min_uptime);
        attempt = next_reconnect_attempt(attempt, &short, min_uptime);
        assert_eq!(attempt, 3);
        attempt = next_reconnect_attempt(attempt, &long, min_uptime);
        assert_eq!(attempt, 1);
        attempt = next_reconnect_attempt(attempt, &short, min_uptime);
        assert_eq!(attempt, 2);

        let backoff = BackoffPolicy {
            jitter: Duration::ZERO,
            ..BackoffPolicy::reconnect()
        };
        assert_eq!(
            backoff.delay_for_attempt(next_reconnect_attempt(7, &long, min_uptime)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn untagged_and_unparseable_frames_are_dropped() {
        let (router, _closed, mut sink_rx) = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = Recorder(tx);

        router.route("ws://test", r#"{"other":1}"#, &mut handler);
        router.route("ws://test", "not json", &mut handler);

        assert!(rx.try_recv().is_err());
        assert!(sink_rx.try_recv().is_err());
    }

    #[test]
    fn closed_router_suppresses_everything() {
        let (router, closed, mut sink_rx) = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = Recorder(tx);
        closed.store(true, Ordering::SeqCst);

        router.open(&mut handler);
        router.route("ws://test", r#"{"result":{}}"#, &mut handler);
        router.route("ws://test", r#"{"error":{"grpcCode":1}}"#, &mut handler);
        router.close(&mut handler);

        assert!(rx.try_recv().is_err());
        assert!(sink_rx.try_recv().is_err());
    }

    #[test]
    fn request_carries_bearer_sub_protocol() {
        let request = build_request(
            "wss://app.example.com/api/gateways/0102030405060708/frames",
            &SecretString::new("abc.def.ghi".to_string()),
        )
        .expect("build request");

        assert_eq!(
            request
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|value| value.to_str().ok()),
            Some("Bearer, abc.def.ghi")
        );
        assert_eq!(
            request.uri().to_string(),
            "wss://app.example.com/api/gateways/0102030405060708/frames"
        );
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let err = build_request(
            "wss://app.example.com/api/gateways/01/frames",
            &SecretString::new("bad\ntoken".to_string()),
        )
        .expect_err("newline is not a valid header value");
        assert!(matches!(err, StreamClientError::InvalidTokenHeader(_)));
    }

    #[test]
    fn gateway_id_validation() {
        assert_eq!(
            validate_gateway_id(" 0102030405060708 ").expect("valid"),
            "0102030405060708"
        );
        assert!(validate_gateway_id("").is_err());
        assert!(validate_gateway_id("01/02").is_err());
        assert!(validate_gateway_id("01 02").is_err());
    }

    #[test]
    fn open_rejects_empty_gateway_id() {
        let result = client().open_with("  ", || {}, || {}, |_| {});
        assert!(matches!(
            result,
            Err(StreamClientError::InvalidGatewayId(_))
        ));
    }

    #[test]
    fn open_outside_runtime_is_an_error() {
        let result = client().open_with("0102030405060708", || {}, || {}, |_| {});
        assert!(matches!(result, Err(StreamClientError::NoRuntime)));
    }

    #[test]
    fn endpoint_follows_page_location() {
        assert_eq!(
            client().endpoint_for("0102030405060708"),
            "wss://app.example.com/api/gateways/0102030405060708/frames"
        );
    }

    #[test]
    fn callbacks_adapt_closures() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let open_tx = tx.clone();
        let close_tx = tx.clone();
        let mut callbacks = FrameLogCallbacks::new(
            move || {
                let _ = open_tx.send(Seen::Open);
            },
            move || {
                let _ = close_tx.send(Seen::Close);
            },
            move |value| {
                let _ = tx.send(Seen::Data(value));
            },
        );

        callbacks.on_open();
        callbacks.on_data(json!(1));
        callbacks.on_close();

        assert_eq!(rx.try_recv().ok(), Some(Seen::Open));
        assert_eq!(rx.try_recv().ok(), Some(Seen::Data(json!(1))));
        assert_eq!(rx.try_recv().ok(), Some(Seen::Close));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_silent() {
        let options = FrameLogOptions {
            connect_timeout: Duration::from_millis(200),
            reconnect_backoff: BackoffPolicy::fixed(Duration::from_millis(10)),
            ..FrameLogOptions::default()
        };
        let client = client()
            .with_endpoint("ws://127.0.0.1:1")
            .with_options(options);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut subscription = client
            .open("0102030405060708", Recorder(tx))
            .expect("open returns immediately");
        assert_eq!(
            subscription.endpoint(),
            "ws://127.0.0.1:1/api/gateways/0102030405060708/frames"
        );
        assert!(!subscription.is_closed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        subscription.close();
        subscription.close();

        assert!(subscription.is_closed());
        assert_eq!(subscription.state(), ConnectionState::Disposed);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "no callbacks for a refused connection");
    }
}
