//! Error surface shared by the stream and REST clients.
//!
//! Both clients report server-side faults as [`Action::CreateError`] through
//! an injected [`ErrorSink`]. [`ErrorDispatcher`] fans actions out to any
//! number of subscribers so an application keeps a single place to render
//! errors.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Default capacity of the [`ErrorDispatcher`] broadcast ring.
pub const DEFAULT_DISPATCHER_CAPACITY: usize = 256;

/// Error payload published for a server-reported fault.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotification {
    /// gRPC status code reported by the server.
    pub code: i32,
    /// Human-readable error message.
    pub error: String,
}

/// Action published to an [`ErrorSink`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    CreateError { error: ErrorNotification },
}

impl Action {
    /// Builds a `CREATE_ERROR` action.
    pub fn create_error(code: i32, error: impl Into<String>) -> Self {
        Self::CreateError {
            error: ErrorNotification {
                code,
                error: error.into(),
            },
        }
    }
}

/// Receiver of error actions.
///
/// Implementations must not block; they are called from the stream worker
/// between frames.
pub trait ErrorSink: Send + Sync {
    fn dispatch(&self, action: Action);
}

impl ErrorSink for mpsc::UnboundedSender<Action> {
    fn dispatch(&self, action: Action) {
        let _ = self.send(action);
    }
}

/// Broadcast-backed [`ErrorSink`] with many subscribers.
///
/// Actions published while no subscriber is listening are dropped. Lagging
/// subscribers lose the oldest actions once the ring is full.
#[derive(Debug, Clone)]
pub struct ErrorDispatcher {
    sender: broadcast::Sender<Action>,
}

impl ErrorDispatcher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an action, returning the number of subscribers reached.
    pub fn publish(&self, action: Action) -> usize {
        self.sender.send(action).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ErrorDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCHER_CAPACITY)
    }
}

impl ErrorSink for ErrorDispatcher {
    fn dispatch(&self, action: Action) {
        self.publish(action);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::{Action, ErrorDispatcher, ErrorSink};

    #[test]
    fn create_error_serializes_with_type_tag() {
        let action = Action::create_error(5, "object does not exist");
        let value = serde_json::to_value(&action).expect("serialize action");

        assert_eq!(
            value,
            json!({
                "type": "CREATE_ERROR",
                "error": { "code": 5, "error": "object does not exist" }
            })
        );
    }

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let dispatcher = ErrorDispatcher::default();
        assert_eq!(dispatcher.publish(Action::create_error(2, "unknown")), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_dispatched_action() {
        let dispatcher = ErrorDispatcher::new(8);
        let mut first = dispatcher.subscribe();
        let mut second = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.dispatch(Action::create_error(16, "unauthenticated"));

        let expected = Action::create_error(16, "unauthenticated");
        assert_eq!(first.recv().await.expect("first"), expected);
        assert_eq!(second.recv().await.expect("second"), expected);
    }

    #[tokio::test]
    async fn unbounded_sender_acts_as_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.dispatch(Action::create_error(13, "internal"));
        assert_eq!(rx.recv().await, Some(Action::create_error(13, "internal")));
    }
}
