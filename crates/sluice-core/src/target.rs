//! Message targets: where a component sends its output.
//!
//! A component never addresses downstream steps directly. It hands each
//! output message to a [`MessageTarget`], which stamps origin and sequence
//! and forwards the message to every linked step.

use crate::component::ComponentStatistics;
use crate::message::Message;
use std::sync::mpsc::Sender;

/// Receiver of a component's output.
pub trait MessageTarget {
    /// Accept one output message.
    ///
    /// The header's origin and sequence number are assigned here; whatever
    /// the component set is overwritten. Only the last-message flag is kept.
    fn put(&mut self, message: Message) -> Result<(), RoutingError>;
}

/// Errors raised while routing a message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("step '{0}' has no downstream target")]
    NoTarget(String),

    #[error("step '{step}' sent a message after its last message")]
    AfterLastMessage { step: String },

    #[error("downstream step '{0}' is no longer receiving")]
    Disconnected(String),
}

/// Assigns per-producer sequence numbers.
///
/// Numbers start at 1 and increase by one per message. Once a message
/// flagged last has been stamped, no further message is accepted.
#[derive(Debug, Clone)]
pub struct Sequencer {
    origin_id: String,
    sent: u64,
    closed: bool,
}

impl Sequencer {
    pub fn new(origin_id: impl Into<String>) -> Self {
        Self {
            origin_id: origin_id.into(),
            sent: 0,
            closed: false,
        }
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Stamp the next sequence number onto `message`.
    pub fn stamp(&mut self, message: &mut Message) -> Result<(), RoutingError> {
        if self.closed {
            return Err(RoutingError::AfterLastMessage {
                step: self.origin_id.clone(),
            });
        }
        self.sent += 1;
        message.stamp(&self.origin_id, self.sent);
        self.closed = message.is_last();
        Ok(())
    }

    /// Number of messages stamped so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Whether the last message has been stamped.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A target that keeps every message it receives.
///
/// Used to drive a component inline, without a flow runtime.
#[derive(Debug)]
pub struct CollectingTarget {
    sequencer: Sequencer,
    messages: Vec<Message>,
}

impl CollectingTarget {
    pub fn new(origin_id: impl Into<String>) -> Self {
        Self {
            sequencer: Sequencer::new(origin_id),
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn is_closed(&self) -> bool {
        self.sequencer.is_closed()
    }
}

impl MessageTarget for CollectingTarget {
    fn put(&mut self, mut message: Message) -> Result<(), RoutingError> {
        self.sequencer.stamp(&mut message)?;
        self.messages.push(message);
        Ok(())
    }
}

/// The runtime's target for one step.
///
/// Fans each message out to all linked steps in link order. A step with no
/// links either drops its output, keeps it for the caller (`capture`), or
/// fails with [`RoutingError::NoTarget`] when a target is required.
#[derive(Debug)]
pub struct Router {
    sequencer: Sequencer,
    downstream: Vec<(String, Sender<Message>)>,
    require_target: bool,
    captured: Option<Vec<Message>>,
    statistics: ComponentStatistics,
}

impl Router {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            sequencer: Sequencer::new(step_id),
            downstream: Vec::new(),
            require_target: false,
            captured: None,
            statistics: ComponentStatistics::default(),
        }
    }

    pub fn connect(&mut self, step_id: impl Into<String>, sender: Sender<Message>) {
        self.downstream.push((step_id.into(), sender));
    }

    pub fn require_target(mut self, required: bool) -> Self {
        self.require_target = required;
        self
    }

    /// Keep output of a terminal step instead of dropping it.
    pub fn capture(mut self) -> Self {
        self.captured = Some(Vec::new());
        self
    }

    pub fn step_id(&self) -> &str {
        self.sequencer.origin_id()
    }

    pub fn is_closed(&self) -> bool {
        self.sequencer.is_closed()
    }

    pub fn is_capturing(&self) -> bool {
        self.captured.is_some()
    }

    pub fn sent(&self) -> u64 {
        self.sequencer.sent()
    }

    pub fn statistics(&self) -> &ComponentStatistics {
        &self.statistics
    }

    pub fn statistics_mut(&mut self) -> &mut ComponentStatistics {
        &mut self.statistics
    }

    /// Take captured output, leaving nothing behind.
    pub fn take_captured(&mut self) -> Vec<Message> {
        self.captured.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Drop all senders so downstream steps observe the disconnect.
    pub fn close(&mut self) {
        self.downstream.clear();
    }
}

impl MessageTarget for Router {
    fn put(&mut self, mut message: Message) -> Result<(), RoutingError> {
        if self.downstream.is_empty() && self.captured.is_none() && self.require_target {
            return Err(RoutingError::NoTarget(self.step_id().to_string()));
        }
        self.sequencer.stamp(&mut message)?;
        self.statistics.record_outbound(&message);

        for (step_id, sender) in &self.downstream {
            sender
                .send(message.clone())
                .map_err(|_| RoutingError::Disconnected(step_id.clone()))?;
        }
        if let Some(captured) = self.captured.as_mut() {
            captured.push(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_sequence_starts_at_one() {
        let mut target = CollectingTarget::new("p");
        target.put(Message::empty()).unwrap();
        target.put(Message::empty()).unwrap();
        target.put(Message::empty().last(true)).unwrap();

        let seqs: Vec<u64> = target.messages().iter().map(|m| m.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(target.messages().iter().all(|m| m.origin_id() == "p"));
        assert!(target.is_closed());
    }

    #[test]
    fn test_put_after_last_rejected() {
        let mut target = CollectingTarget::new("p");
        target.put(Message::empty().last(true)).unwrap();

        assert_eq!(
            target.put(Message::empty()),
            Err(RoutingError::AfterLastMessage { step: "p".into() })
        );
        assert_eq!(target.messages().len(), 1);
    }

    #[test]
    fn test_router_fans_out() {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let mut router = Router::new("p");
        router.connect("a", tx_a);
        router.connect("b", tx_b);

        router.put(Message::lines(["x"]).last(true)).unwrap();

        let a = rx_a.recv().unwrap();
        let b = rx_b.recv().unwrap();
        assert!(a.shares_payload_with(&b));
        assert_eq!(a.header(), b.header());
        assert_eq!(a.sequence_number(), 1);
        assert_eq!(router.statistics().outbound_messages, 1);
        assert_eq!(router.statistics().outbound_items, 1);
    }

    #[test]
    fn test_router_terminal_behaviour() {
        let mut dropped = Router::new("t");
        assert!(dropped.put(Message::empty()).is_ok());
        assert!(dropped.take_captured().is_empty());

        let mut required = Router::new("t").require_target(true);
        assert_eq!(
            required.put(Message::empty()),
            Err(RoutingError::NoTarget("t".into()))
        );

        let mut captured = Router::new("t").capture();
        captured.put(Message::empty().last(true)).unwrap();
        assert_eq!(captured.take_captured().len(), 1);
    }

    #[test]
    fn test_router_disconnected() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut router = Router::new("p");
        router.connect("gone", tx);

        assert_eq!(
            router.put(Message::empty()),
            Err(RoutingError::Disconnected("gone".into()))
        );
    }
}
