//! Ingestion-time checks: structural rules and request-bound checks.
//!
//! Everything here runs before input touches a ledger, so a rejected
//! message leaves query state untouched.

use crate::error::ValidationError;
use crate::query::QueryRequest;
use crate::record::{MessageId, Record};
use crate::types::{MessageRef, MAX_SEQUENCE_NUMBER, MIN_TIMESTAMP};

/// Validate a query request's structure.
///
/// This performs:
/// - Non-empty request and stream ids
/// - Ref field ranges for `From`/`Range` bounds
/// - `from <= to` for `Range`
pub fn validate_request(request: &QueryRequest) -> Result<(), ValidationError> {
    if request.request_id.as_str().is_empty() {
        return Err(ValidationError::EmptyRequestId);
    }
    if request.stream_id.as_str().is_empty() {
        return Err(ValidationError::EmptyStreamId);
    }

    if let Some(range) = request.bounds() {
        validate_ref(&range.from)?;
        if range.to != MessageRef::MAX {
            validate_ref(&range.to)?;
        }
        if range.from > range.to {
            return Err(ValidationError::InvertedRange {
                from: range.from,
                to: range.to,
            });
        }
    }

    Ok(())
}

/// Validate that a ref's fields are in range.
pub fn validate_ref(r: &MessageRef) -> Result<(), ValidationError> {
    if r.timestamp < MIN_TIMESTAMP {
        return Err(ValidationError::NegativeTimestamp(r.timestamp));
    }
    if r.sequence_number > MAX_SEQUENCE_NUMBER {
        return Err(ValidationError::SequenceNumberOutOfRange(r.sequence_number));
    }
    Ok(())
}

/// Validate a message's identity on its own, outside any query.
pub fn validate_message_id(id: &MessageId) -> Result<(), ValidationError> {
    if id.stream_id.as_str().is_empty() {
        return Err(ValidationError::EmptyStreamId);
    }
    validate_ref(&id.message_ref())
}

/// Validate refs reported for `request`: each must be well-formed and,
/// for bounded queries, inside the requested range.
pub fn validate_refs(request: &QueryRequest, refs: &[MessageRef]) -> Result<(), ValidationError> {
    let bounds = request.bounds();
    for r in refs {
        validate_ref(r)?;
        if let Some(range) = &bounds {
            if !range.contains(r) {
                return Err(ValidationError::RefOutOfRange(*r));
            }
        }
    }
    Ok(())
}

/// Validate a propagated record against the request it claims to answer.
pub fn validate_record(request: &QueryRequest, record: &Record) -> Result<(), ValidationError> {
    let id = &record.id;
    if id.stream_id != request.stream_id || id.partition != request.partition {
        return Err(ValidationError::WrongStreamPartition {
            expected_stream: request.stream_id.clone(),
            expected_partition: request.partition,
            got_stream: id.stream_id.clone(),
            got_partition: id.partition,
        });
    }
    validate_refs(request, &[record.message_ref()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryOptions;
    use crate::record::MessageId;
    use crate::types::{RequestId, StreamId};

    fn range_request(from: i64, to: i64) -> QueryRequest {
        QueryRequest {
            request_id: RequestId::new("req-1"),
            consumer_id: "consumer".into(),
            stream_id: StreamId::new("stream"),
            partition: 0,
            options: QueryOptions::Range {
                from: MessageRef::new(from, 0),
                to: MessageRef::new(to, 0),
                publisher_id: None,
                msg_chain_id: None,
            },
        }
    }

    fn record(stream: &str, partition: u32, ts: i64) -> Record {
        Record::new(
            MessageId {
                stream_id: StreamId::new(stream),
                partition,
                timestamp: ts,
                sequence_number: 0,
                publisher_id: "p".into(),
                msg_chain_id: "c".into(),
            },
            vec![1, 2, 3],
        )
    }

    #[test]
    fn test_valid_range_request() {
        assert!(validate_request(&range_request(1, 10)).is_ok());
    }

    #[test]
    fn test_inverted_range() {
        let err = validate_request(&range_request(10, 1)).unwrap_err();
        assert!(matches!(err, ValidationError::InvertedRange { .. }));
    }

    #[test]
    fn test_empty_ids() {
        let mut request = range_request(1, 2);
        request.request_id = RequestId::new("");
        assert_eq!(validate_request(&request), Err(ValidationError::EmptyRequestId));

        let mut request = range_request(1, 2);
        request.stream_id = StreamId::new("");
        assert_eq!(validate_request(&request), Err(ValidationError::EmptyStreamId));
    }

    #[test]
    fn test_last_request_skips_bounds() {
        let mut request = range_request(1, 2);
        request.options = QueryOptions::Last { last: 5 };
        assert!(validate_request(&request).is_ok());
        assert!(validate_refs(&request, &[MessageRef::new(999, 0)]).is_ok());
    }

    #[test]
    fn test_ref_field_ranges() {
        assert_eq!(
            validate_ref(&MessageRef::new(-1, 0)),
            Err(ValidationError::NegativeTimestamp(-1))
        );
        assert_eq!(
            validate_ref(&MessageRef::new(0, MAX_SEQUENCE_NUMBER + 1)),
            Err(ValidationError::SequenceNumberOutOfRange(MAX_SEQUENCE_NUMBER + 1))
        );
    }

    #[test]
    fn test_refs_outside_range_rejected() {
        let request = range_request(5, 10);
        assert!(validate_refs(&request, &[MessageRef::new(5, 0), MessageRef::new(10, 0)]).is_ok());
        assert_eq!(
            validate_refs(&request, &[MessageRef::new(11, 0)]),
            Err(ValidationError::RefOutOfRange(MessageRef::new(11, 0)))
        );
    }

    #[test]
    fn test_record_wrong_partition() {
        let request = range_request(0, 10);
        assert!(validate_record(&request, &record("stream", 0, 3)).is_ok());

        let err = validate_record(&request, &record("stream", 1, 3)).unwrap_err();
        assert!(matches!(err, ValidationError::WrongStreamPartition { got_partition: 1, .. }));

        let err = validate_record(&request, &record("other", 0, 3)).unwrap_err();
        assert!(matches!(err, ValidationError::WrongStreamPartition { .. }));
    }

    #[test]
    fn test_message_id_checks() {
        assert!(validate_message_id(&record("stream", 0, 5).id).is_ok());
        assert_eq!(
            validate_message_id(&record("", 0, 5).id),
            Err(ValidationError::EmptyStreamId)
        );
        assert_eq!(
            validate_message_id(&record("stream", 0, -1).id),
            Err(ValidationError::NegativeTimestamp(-1))
        );
    }
}
