/// Reasons an inbound event body is dropped before reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Envelope of type {kind} carries no payload")]
    MissingPayload { kind: &'static str },

    #[error("Payload does not match {entity}: {source}")]
    Payload {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
