//! Messages: the envelope carried along flow links.

use crate::record::EntityData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sequencing and stream-lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Id of the step that produced the message.
    pub origin_id: String,
    /// 1-based, strictly increasing per producer. 0 means not yet sent.
    pub sequence_number: u64,
    /// True exactly on the final message of the producer's stream.
    pub last_message: bool,
}

/// Message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    /// Typed records.
    Entities(Vec<EntityData>),
    /// Opaque physical lines, still in their source encoding.
    Lines(Vec<Vec<u8>>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Entities(records) => records.len(),
            Payload::Lines(lines) => lines.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Empty => MessageType::None,
            Payload::Entities(_) => MessageType::Entity,
            Payload::Lines(_) => MessageType::Text,
        }
    }

    pub fn as_entities(&self) -> Option<&[EntityData]> {
        match self {
            Payload::Entities(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_lines(&self) -> Option<&[Vec<u8>]> {
        match self {
            Payload::Lines(lines) => Some(lines),
            _ => None,
        }
    }
}

/// A batch plus its header.
///
/// The payload is shared, never mutated after construction: cloning a
/// message for fan-out copies only the header.
#[derive(Debug, Clone)]
pub struct Message {
    header: MessageHeader,
    payload: Arc<Payload>,
}

impl Message {
    /// Create an unsent message. The router stamps origin and sequence.
    pub fn new(payload: Payload) -> Self {
        Self {
            header: MessageHeader::default(),
            payload: Arc::new(payload),
        }
    }

    pub fn empty() -> Self {
        Self::new(Payload::Empty)
    }

    pub fn entities(records: Vec<EntityData>) -> Self {
        Self::new(Payload::Entities(records))
    }

    pub fn lines<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Vec<u8>>,
    {
        Self::new(Payload::Lines(lines.into_iter().map(Into::into).collect()))
    }

    /// Set the last-message flag.
    pub fn last(mut self, last_message: bool) -> Self {
        self.header.last_message = last_message;
        self
    }

    /// Replace the whole header (used when replaying or injecting messages).
    pub fn with_header(mut self, header: MessageHeader) -> Self {
        self.header = header;
        self
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn origin_id(&self) -> &str {
        &self.header.origin_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.header.sequence_number
    }

    pub fn is_last(&self) -> bool {
        self.header.last_message
    }

    /// Lines decoded lossily as UTF-8, for display and tests.
    pub fn text_lines(&self) -> Vec<String> {
        self.payload
            .as_lines()
            .map(|lines| {
                lines
                    .iter()
                    .map(|l| String::from_utf8_lossy(l).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn stamp(&mut self, origin_id: &str, sequence_number: u64) {
        self.header.origin_id = origin_id.to_string();
        self.header.sequence_number = sequence_number;
    }

    pub(crate) fn shares_payload_with(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

/// Kind of payload a component accepts or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// No data (sources take none; an empty payload has this type).
    None,
    /// Anything.
    Any,
    Entity,
    Text,
}

impl MessageType {
    /// Whether a producer of `produced` may feed a consumer declaring `self`.
    pub fn accepts(self, produced: MessageType) -> bool {
        match (self, produced) {
            (MessageType::None, _) => false,
            (MessageType::Any, _) | (_, MessageType::Any) => true,
            (expected, produced) => expected == produced,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageType::None => "none",
            MessageType::Any => "any",
            MessageType::Entity => "entity",
            MessageType::Text => "text",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_is_unsent() {
        let message = Message::lines(["a", "b"]);

        assert_eq!(message.sequence_number(), 0);
        assert_eq!(message.origin_id(), "");
        assert!(!message.is_last());
        assert_eq!(message.payload().len(), 2);
        assert_eq!(message.text_lines(), vec!["a", "b"]);
    }

    #[test]
    fn test_clone_shares_payload() {
        let message = Message::entities(vec![EntityData::new().with("a", 1i64)]).last(true);
        let copy = message.clone();

        assert!(copy.shares_payload_with(&message));
        assert!(copy.is_last());
    }

    #[test]
    fn test_message_type_accepts() {
        assert!(MessageType::Entity.accepts(MessageType::Entity));
        assert!(!MessageType::Entity.accepts(MessageType::Text));
        assert!(MessageType::Any.accepts(MessageType::Text));
        assert!(MessageType::Text.accepts(MessageType::Any));
        assert!(!MessageType::None.accepts(MessageType::Text));
    }
}
