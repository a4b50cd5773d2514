//! Inbound change notification envelope.
//!
//! Every topic carries bodies of the shape `{"type": "put" | "delete",
//! "payload": <entity | null>}`. The channel hands the parsed envelope to
//! its handlers; handlers turn it into a typed [`EntityMessage`] before
//! any reconciler sees it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::MessageError;
use crate::types::DbId;

/// Mutation kind carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Put,
    Delete,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Put => "put",
            MessageKind::Delete => "delete",
        }
    }
}

/// The envelope as received, with the payload still untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A decoded mutation for one entity collection.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityMessage<T> {
    /// Insert-or-replace by identifier.
    Put(T),
    /// Remove by identifier.
    Delete(DbId),
}

#[derive(Deserialize)]
struct IdOnly {
    id: DbId,
}

impl Envelope {
    pub fn put(payload: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::Put,
            payload,
        }
    }

    pub fn delete(payload: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::Delete,
            payload,
        }
    }

    /// Parse a raw message body.
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        serde_json::from_str(body).map_err(MessageError::Envelope)
    }

    /// Decode the payload as entity `T`.
    ///
    /// A delete only needs the `id` field, so partial payloads are fine there.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<EntityMessage<T>, MessageError> {
        if self.payload.is_null() {
            return Err(MessageError::MissingPayload {
                kind: self.kind.as_str(),
            });
        }
        let entity = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or("entity");

        match self.kind {
            MessageKind::Put => T::deserialize(&self.payload)
                .map(EntityMessage::Put)
                .map_err(|source| MessageError::Payload { entity, source }),
            MessageKind::Delete => IdOnly::deserialize(&self.payload)
                .map(|p| EntityMessage::Delete(p.id))
                .map_err(|source| MessageError::Payload { entity, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::models::{ColumnTopic, Thought};

    #[test]
    fn parse_put_envelope() {
        let env = Envelope::parse(
            r#"{"type":"put","payload":{"id":1,"message":"m","hearts":0,"discussed":false,"topic":"positive"}}"#,
        )
        .unwrap();
        assert_eq!(env.kind, MessageKind::Put);
        let msg = env.decode::<Thought>().unwrap();
        assert_matches!(msg, EntityMessage::Put(t) if t.id == 1 && t.topic == ColumnTopic::Positive);
    }

    #[test]
    fn delete_needs_only_the_id() {
        let env = Envelope::parse(r#"{"type":"delete","payload":{"id":9}}"#).unwrap();
        assert_matches!(env.decode::<Thought>(), Ok(EntityMessage::Delete(9)));
    }

    #[test]
    fn missing_payload_is_reported() {
        let env = Envelope::parse(r#"{"type":"put"}"#).unwrap();
        assert_matches!(
            env.decode::<Thought>(),
            Err(MessageError::MissingPayload { kind: "put" })
        );
    }

    #[test]
    fn payload_missing_required_field_is_reported() {
        let env = Envelope::parse(r#"{"type":"put","payload":{"id":1}}"#).unwrap();
        assert_matches!(
            env.decode::<Thought>(),
            Err(MessageError::Payload { entity: "Thought", .. })
        );
    }

    #[test]
    fn unknown_type_tag_fails_to_parse() {
        assert_matches!(
            Envelope::parse(r#"{"type":"patch","payload":{}}"#),
            Err(MessageError::Envelope(_))
        );
        assert_matches!(Envelope::parse("not json"), Err(MessageError::Envelope(_)));
    }
}
