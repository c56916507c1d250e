//! Transport metadata carried alongside every message.
//!
//! The request/reply convention: the producer names a reply destination and a
//! correlation token on the inbound message; the worker copies the token
//! verbatim onto the reply it sends to that destination, so the producer can
//! match the reply to its request.

use std::fmt;

/// Opaque token copied from a request to its reply.
///
/// The worker never inspects or rewrites the bytes. `Display` renders them
/// lossily for log fields only.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Vec<u8>);

impl CorrelationToken {
    /// Wrap raw token bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the token, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationToken({self})")
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<Vec<u8>> for CorrelationToken {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// An inbound message as handed over by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryEnvelope {
    /// Where the reply should be sent.
    pub reply_to: Option<String>,
    /// Token to copy onto the reply.
    pub correlation_id: Option<CorrelationToken>,
    /// Raw message body.
    pub payload: Vec<u8>,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
}

impl DeliveryEnvelope {
    /// Envelope with a payload and no properties.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            reply_to: None,
            correlation_id: None,
            payload: payload.into(),
            redelivered: false,
        }
    }

    /// Set the reply destination.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set the correlation token.
    #[must_use]
    pub fn with_correlation_id(mut self, token: impl Into<CorrelationToken>) -> Self {
        self.correlation_id = Some(token.into());
        self
    }

    /// Mark the envelope as a redelivery.
    #[must_use]
    pub const fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }
}

/// A message to be sent to a named destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message body.
    pub payload: Vec<u8>,
    /// Token that ties this message to the request it answers.
    pub correlation_id: Option<CorrelationToken>,
}

impl OutboundMessage {
    /// Create an outbound message.
    #[must_use]
    pub const fn new(payload: Vec<u8>, correlation_id: Option<CorrelationToken>) -> Self {
        Self {
            payload,
            correlation_id,
        }
    }
}
