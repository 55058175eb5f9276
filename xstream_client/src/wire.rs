//! Argument lists and reply parsing for the stream commands.
//!
//! A stream read replies with `[[stream, [[id, [field, value, ...]], ...]], ...]`, or nil when
//! nothing arrived within the block time. An entry whose body was trimmed away comes back with a
//! nil field list.
use std::string::FromUtf8Error;

use crate::broker::Reply;
use crate::request::{EntryId, Item, Payload, ReadRequest, ReadTarget};

/// Anchor for a freshly created group: deliver only entries appended from now on
const GROUP_START: &str = "$";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("expected {expected} in {context}, found {found}")]
    UnexpectedFrame {
        context: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid UTF8 in {context}: {source}")]
    InvalidUtf8 {
        context: &'static str,
        #[source]
        source: FromUtf8Error,
    },

    #[error("field '{field}' of entry {id} has no value")]
    UnpairedField { id: String, field: String },

    #[error("acknowledged count {0} is negative")]
    NegativeCount(i64),
}

pub(crate) fn create_group_args(stream: &str, group: &str) -> Vec<String> {
    vec![
        "CREATE".to_string(),
        stream.to_string(),
        group.to_string(),
        GROUP_START.to_string(),
        "MKSTREAM".to_string(),
    ]
}

pub(crate) fn read_args(request: &ReadRequest) -> Vec<String> {
    let mut args = Vec::with_capacity(10);
    if let ReadTarget::Group {
        group, consumer, ..
    } = request.target()
    {
        args.extend(["GROUP".to_string(), group.clone(), consumer.clone()]);
    }
    args.extend([
        "COUNT".to_string(),
        request.batch_size().to_string(),
        "BLOCK".to_string(),
        request.block().as_millis().to_string(),
        "STREAMS".to_string(),
        request.stream().to_string(),
        request.cursor_token().to_string(),
    ]);
    args
}

pub(crate) fn ack_args<'a>(
    stream: &str,
    group: &str,
    ids: impl IntoIterator<Item = &'a EntryId>,
) -> Vec<String> {
    let mut args = vec![stream.to_string(), group.to_string()];
    args.extend(ids.into_iter().map(|id| id.as_str().to_string()));
    args
}

/// Parse a read reply into items, in broker order.
pub fn parse_batch(reply: Reply) -> Result<Vec<Item>, ParseError> {
    let streams = match reply {
        Reply::Nil => return Ok(vec![]),
        Reply::Array(streams) => streams,
        other => return Err(unexpected("read reply", "array", &other)),
    };

    let mut items = Vec::new();
    for stream in streams {
        let mut record = into_array(stream, "stream record")?.into_iter();
        let (Some(name), Some(entries), None) = (record.next(), record.next(), record.next())
        else {
            return Err(ParseError::UnexpectedFrame {
                context: "stream record",
                expected: "[name, entries] pair",
                found: "array of another length",
            });
        };
        let name = into_string(name, "stream name")?;

        let entries = match entries {
            Reply::Nil => continue,
            other => into_array(other, "stream entries")?,
        };
        items.reserve(entries.len());
        for entry in entries {
            items.push(parse_entry(&name, entry)?);
        }
    }

    Ok(items)
}

fn parse_entry(stream: &str, entry: Reply) -> Result<Item, ParseError> {
    let mut parts = into_array(entry, "stream entry")?.into_iter();
    let id = match parts.next() {
        Some(id) => into_string(id, "entry id")?,
        None => {
            return Err(ParseError::UnexpectedFrame {
                context: "stream entry",
                expected: "entry id",
                found: "empty array",
            });
        }
    };
    let payload = parse_payload(&id, parts.next().unwrap_or(Reply::Nil))?;

    Ok(Item::new(stream, id, payload))
}

/// Pair up a flat `[field, value, field, value, ...]` list. Nil yields an empty payload.
pub fn parse_payload(id: &str, fields: Reply) -> Result<Payload, ParseError> {
    let fields = match fields {
        Reply::Nil => return Ok(Payload::new()),
        other => into_array(other, "entry fields")?,
    };

    let mut payload = Payload::with_capacity(fields.len() / 2);
    let mut fields = fields.into_iter();
    while let Some(field) = fields.next() {
        let field = into_string(field, "field name")?;
        let Some(value) = fields.next() else {
            return Err(ParseError::UnpairedField {
                id: id.to_string(),
                field,
            });
        };
        payload.insert(field, into_string(value, "field value")?);
    }

    Ok(payload)
}

/// The inverse of [`parse_payload`]: fields and values interleaved in payload order.
pub fn flatten_payload(payload: &Payload) -> Vec<String> {
    payload
        .iter()
        .flat_map(|(field, value)| [field.clone(), value.clone()])
        .collect()
}

pub(crate) fn parse_count(reply: Reply) -> Result<u64, ParseError> {
    match reply {
        Reply::Integer(n) => u64::try_from(n).map_err(|_| ParseError::NegativeCount(n)),
        other => Err(unexpected("acknowledge reply", "integer", &other)),
    }
}

fn into_array(reply: Reply, context: &'static str) -> Result<Vec<Reply>, ParseError> {
    match reply {
        Reply::Array(frames) => Ok(frames),
        other => Err(unexpected(context, "array", &other)),
    }
}

fn into_string(reply: Reply, context: &'static str) -> Result<String, ParseError> {
    match reply {
        Reply::Bytes(bytes) => {
            String::from_utf8(bytes).map_err(|source| ParseError::InvalidUtf8 { context, source })
        }
        Reply::Status(s) => Ok(s),
        other => Err(unexpected(context, "string", &other)),
    }
}

fn unexpected(context: &'static str, expected: &'static str, found: &Reply) -> ParseError {
    ParseError::UnexpectedFrame {
        context,
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::raw_batch;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::num::NonZeroUsize;

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_a_single_entry() {
        let reply = raw_batch("S", &[("1-1", Some(&["test", "1", "foo", "bar"]))]);

        let items = parse_batch(reply).unwrap();
        assert_eq!(
            items,
            vec![Item::new(
                "S",
                "1-1",
                payload(&[("test", "1"), ("foo", "bar")])
            )]
        );
    }

    #[test]
    fn nil_reply_is_an_empty_batch() {
        assert!(parse_batch(Reply::Nil).unwrap().is_empty());
        assert!(parse_batch(Reply::Array(vec![])).unwrap().is_empty());
    }

    #[test]
    fn trimmed_entries_have_empty_payloads() {
        let reply = raw_batch(
            "S",
            &[("1-2", None), ("1-3", Some(&["test", "3", "foo", "baz"]))],
        );

        let items = parse_batch(reply).unwrap();
        assert_eq!(
            items,
            vec![
                Item::new("S", "1-2", Payload::new()),
                Item::new("S", "1-3", payload(&[("test", "3"), ("foo", "baz")])),
            ]
        );

        // an entry with no field list at all
        let reply = Reply::Array(vec![Reply::Array(vec![
            Reply::from("S"),
            Reply::Array(vec![Reply::Array(vec![Reply::from("1-4")])]),
        ])]);
        assert_eq!(
            parse_batch(reply).unwrap(),
            vec![Item::new("S", "1-4", Payload::new())]
        );
    }

    #[test]
    fn keeps_broker_order_across_streams() {
        let reply = Reply::Array(vec![
            Reply::Array(vec![
                Reply::from("A"),
                Reply::Array(vec![
                    Reply::Array(vec![Reply::from("1-0"), Reply::Nil]),
                    Reply::Array(vec![Reply::from("2-0"), Reply::Nil]),
                ]),
            ]),
            Reply::Array(vec![
                Reply::from("B"),
                Reply::Array(vec![Reply::Array(vec![Reply::from("1-0"), Reply::Nil])]),
            ]),
        ]);

        let ids = parse_batch(reply)
            .unwrap()
            .into_iter()
            .map(|item| format!("{}/{}", item.stream, item.id))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["A/1-0", "A/2-0", "B/1-0"]);
    }

    #[test]
    fn rejects_malformed_replies() {
        let err = parse_batch(Reply::Integer(1)).unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnexpectedFrame {
                found: "integer",
                ..
            }
        ));

        let err = parse_payload("1-1", Reply::Array(vec![Reply::from("lonely")])).unwrap_err();
        assert_eq!(err.to_string(), "field 'lonely' of entry 1-1 has no value");

        let err = parse_payload("1-1", Reply::Array(vec![Reply::Bytes(vec![0xff]), "v".into()]))
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidUtf8 { .. }));
    }

    #[test]
    fn read_arguments() {
        let request = ReadRequest::group("S", "G", "C")
            .with_batch_size(NonZeroUsize::new(1).unwrap())
            .with_block(std::time::Duration::from_millis(2000));
        assert_eq!(
            read_args(&request),
            vec![
                "GROUP", "G", "C", "COUNT", "1", "BLOCK", "2000", "STREAMS", "S", ">"
            ]
        );

        let request = ReadRequest::anonymous("S")
            .with_batch_size(NonZeroUsize::new(10).unwrap())
            .with_block(std::time::Duration::from_millis(5));
        assert_eq!(
            read_args(&request),
            vec!["COUNT", "10", "BLOCK", "5", "STREAMS", "S", "$"]
        );
    }

    #[test]
    fn counts_must_be_integers() {
        assert_eq!(parse_count(Reply::Integer(2)).unwrap(), 2);
        assert!(matches!(
            parse_count(Reply::Integer(-1)),
            Err(ParseError::NegativeCount(-1))
        ));
        assert!(parse_count(Reply::Nil).is_err());
    }

    proptest! {
        #[test]
        fn flatten_inverts_parse(
            fields in prop::collection::btree_map("[a-z]{1,8}", "[ -~]{0,16}", 0..16)
        ) {
            let flat = fields
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect::<Vec<_>>();
            let reply = Reply::Array(flat.iter().map(|s| Reply::from(s.as_str())).collect());

            let payload = parse_payload("0-1", reply).unwrap();
            prop_assert_eq!(flatten_payload(&payload), flat);
        }
    }
}
