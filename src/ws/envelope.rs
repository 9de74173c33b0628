//! Event envelope: the `{"event": ..., "data": ...}` unit carried in one
//! text frame.

use axum::extract::ws::Message;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;

/// One named event and its opaque payload.
///
/// `event` is the dispatch key; `data` is never interpreted by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Application-level event name.
    pub event: String,
    /// Arbitrary JSON payload.
    pub data: Value,
}

impl Envelope {
    /// Builds an envelope from an event name and a JSON value.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Serializes the envelope into a text frame.
    ///
    /// # Errors
    ///
    /// Same as [`encode`].
    pub fn to_message(&self) -> Result<Message, EnvelopeError> {
        encode(&self.event, &self.data).map(Message::text)
    }
}

/// Serializes `{event, data}` into its wire text.
///
/// # Errors
///
/// Returns [`EnvelopeError::EmptyEvent`] if `event` is empty and
/// [`EnvelopeError::Encode`] if `data` cannot be represented as JSON.
pub fn encode<T: Serialize + ?Sized>(event: &str, data: &T) -> Result<String, EnvelopeError> {
    if event.is_empty() {
        return Err(EnvelopeError::EmptyEvent);
    }
    let encode_err = |source| EnvelopeError::Encode {
        event: event.to_string(),
        source,
    };
    let data = serde_json::to_value(data).map_err(encode_err)?;
    serde_json::to_string(&Envelope::new(event, data)).map_err(encode_err)
}

/// Parses wire text back into an [`Envelope`].
///
/// A missing `data` field decodes as `null`.
///
/// # Errors
///
/// - [`EnvelopeError::Malformed`] if the text is not a JSON object of the
///   envelope shape (including a non-string `event`).
/// - [`EnvelopeError::MissingEvent`] if `event` is absent or `null`.
/// - [`EnvelopeError::EmptyEvent`] if `event` is the empty string.
pub fn decode(text: &str) -> Result<Envelope, EnvelopeError> {
    decode_bytes(text.as_bytes())
}

/// Parses a raw frame payload back into an [`Envelope`].
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_bytes(raw: &[u8]) -> Result<Envelope, EnvelopeError> {
    // A map only deserializes from a JSON object, so arrays are refused here.
    let mut fields: Map<String, Value> =
        serde_json::from_slice(raw).map_err(EnvelopeError::Malformed)?;
    let event = match fields.remove("event") {
        None | Some(Value::Null) => return Err(EnvelopeError::MissingEvent),
        Some(Value::String(event)) if event.is_empty() => return Err(EnvelopeError::EmptyEvent),
        Some(Value::String(event)) => event,
        Some(other) => {
            return Err(EnvelopeError::Malformed(serde_json::Error::custom(
                format_args!("`event` must be a string, found {other}"),
            )));
        }
    };
    Ok(Envelope {
        event,
        data: fields.remove("data").unwrap_or(Value::Null),
    })
}
