//! Mapping between record headers and envelope properties.

use market_core::{CorrelationToken, DeliveryEnvelope, OutboundMessage};
use rdkafka::message::{Header, Headers, OwnedHeaders};

/// Header carrying the reply destination.
pub const REPLY_TO: &str = "reply_to";
/// Header carrying the opaque correlation token.
pub const CORRELATION_ID: &str = "correlation_id";
/// Header set on records re-published by a requeueing nack.
pub const REDELIVERED: &str = "redelivered";

/// Build an envelope from a record's payload and headers.
///
/// Unknown headers are ignored. A `reply_to` that is not UTF-8 is treated as
/// absent.
pub fn envelope_from_record<H: Headers>(
    payload: Option<&[u8]>,
    headers: Option<&H>,
) -> DeliveryEnvelope {
    let mut envelope = DeliveryEnvelope::new(payload.unwrap_or_default().to_vec());

    for header in headers.into_iter().flat_map(|headers| headers.iter()) {
        let Some(value) = header.value else {
            continue;
        };
        match header.key {
            REPLY_TO => match std::str::from_utf8(value) {
                Ok(reply_to) => envelope = envelope.with_reply_to(reply_to),
                Err(_) => tracing::warn!("Ignoring non UTF-8 reply_to header"),
            },
            CORRELATION_ID => envelope = envelope.with_correlation_id(value.to_vec()),
            REDELIVERED => envelope = envelope.redelivered(value == b"true"),
            _ => {}
        }
    }

    envelope
}

/// Headers for re-publishing `envelope`, marked as redelivered.
pub fn requeue_headers(envelope: &DeliveryEnvelope) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new();
    if let Some(reply_to) = &envelope.reply_to {
        headers = headers.insert(Header {
            key: REPLY_TO,
            value: Some(reply_to.as_bytes()),
        });
    }
    headers = with_correlation(headers, envelope.correlation_id.as_ref());
    headers.insert(Header {
        key: REDELIVERED,
        value: Some(b"true".as_slice()),
    })
}

/// Headers for a reply.
pub fn reply_headers(message: &OutboundMessage) -> OwnedHeaders {
    with_correlation(OwnedHeaders::new(), message.correlation_id.as_ref())
}

fn with_correlation(headers: OwnedHeaders, token: Option<&CorrelationToken>) -> OwnedHeaders {
    match token {
        Some(token) => headers.insert(Header {
            key: CORRELATION_ID,
            value: Some(token.as_bytes()),
        }),
        None => headers,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_transport_properties() {
        let headers = OwnedHeaders::new()
            .insert(Header { key: REPLY_TO, value: Some(b"kitchen".as_slice()) })
            .insert(Header { key: CORRELATION_ID, value: Some([0u8, 255, 7].as_slice()) })
            .insert(Header { key: "trace", value: Some(b"abc".as_slice()) });

        let envelope = envelope_from_record(Some(b"{}".as_slice()), Some(&headers));

        assert_eq!(envelope.payload, b"{}");
        assert_eq!(envelope.reply_to.as_deref(), Some("kitchen"));
        assert_eq!(
            envelope.correlation_id.as_ref().map(CorrelationToken::as_bytes),
            Some([0u8, 255, 7].as_slice())
        );
        assert!(!envelope.redelivered);
    }

    #[test]
    fn missing_payload_and_headers() {
        let envelope = envelope_from_record::<OwnedHeaders>(None, None);
        assert!(envelope.payload.is_empty());
        assert!(envelope.reply_to.is_none());
        assert!(envelope.correlation_id.is_none());
    }

    #[test]
    fn requeued_record_keeps_properties_and_is_marked() {
        let original = DeliveryEnvelope::new(b"{}".to_vec())
            .with_reply_to("kitchen")
            .with_correlation_id("corr-9");

        let headers = requeue_headers(&original);
        let reread = envelope_from_record(Some(original.payload.as_slice()), Some(&headers));

        assert_eq!(reread, original.clone().redelivered(true));
    }

    #[test]
    fn reply_carries_only_the_correlation_token() {
        let message = OutboundMessage::new(b"{}".to_vec(), Some(CorrelationToken::from("c")));
        let headers = reply_headers(&message);

        assert_eq!(headers.count(), 1);
        let header = headers.get(0);
        assert_eq!(header.key, CORRELATION_ID);
        assert_eq!(header.value, Some(b"c".as_slice()));
    }
}
