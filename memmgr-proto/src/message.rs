// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bus message envelopes and payloads.
//!
//! Commands travel as `{"command": [name, params]}` and answers as
//! `{"result": [code]}` or `{"result": [code, message]}`. The payload structs
//! below give both ends of the protocol one definition of every field name.

use crate::{GenerationId, ReaderId, RrClass};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Bus group every segment reader subscribes to.
pub const SEGMENT_READER_GROUP: &str = "SegmentReader";

/// Command telling a reader to (re)map one segment.
pub const SEGMENT_INFO_UPDATE: &str = "segment_info_update";

/// Command telling a reader to drop all segments of a retired generation.
pub const RELEASE_SEGMENTS: &str = "release_segments";

/// A message that does not follow the command or answer envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {0} envelope")]
pub struct EnvelopeError(pub &'static str);

/// Wrap a command name and its parameters into the bus envelope.
pub fn create_command(name: &str, params: Value) -> Value {
    json!({ "command": [name, params] })
}

/// Split a bus message into command name and parameters.
pub fn parse_command(msg: &Value) -> Result<(String, Value), EnvelopeError> {
    let parts = msg
        .get("command")
        .and_then(Value::as_array)
        .ok_or(EnvelopeError("command"))?;
    let name = parts
        .first()
        .and_then(Value::as_str)
        .ok_or(EnvelopeError("command"))?;
    let params = parts.get(1).cloned().unwrap_or(Value::Null);
    Ok((name.to_string(), params))
}

/// Wrap an answer code and optional message into the bus envelope.
pub fn create_answer(code: u32, message: Option<&str>) -> Value {
    match message {
        Some(message) => json!({ "result": [code, message] }),
        None => json!({ "result": [code] }),
    }
}

/// Split an answer message into code and optional text.
pub fn parse_answer(msg: &Value) -> Result<(u32, Option<String>), EnvelopeError> {
    let parts = msg
        .get("result")
        .and_then(Value::as_array)
        .ok_or(EnvelopeError("answer"))?;
    let code = parts
        .first()
        .and_then(Value::as_u64)
        .ok_or(EnvelopeError("answer"))?;
    let message = parts.get(1).and_then(Value::as_str).map(str::to_string);
    Ok((code as u32, message))
}

/// Payload of `segment_info_update`, manager to reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfoUpdate {
    #[serde(rename = "data-source-class")]
    pub class: RrClass,
    #[serde(rename = "data-source-name")]
    pub name: String,
    #[serde(rename = "segment-params")]
    pub segment_params: Value,
    pub reader: ReaderId,
    #[serde(rename = "generation-id")]
    pub generation_id: GenerationId,
    #[serde(rename = "inuse-only", default, skip_serializing_if = "Option::is_none")]
    pub inuse_only: Option<bool>,
}

/// Payload of `segment_info_update_ack`, reader to manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfoUpdateAck {
    #[serde(rename = "data-source-class")]
    pub class: RrClass,
    #[serde(rename = "data-source-name")]
    pub name: String,
    #[serde(rename = "generation-id")]
    pub generation_id: GenerationId,
    pub reader: ReaderId,
}

/// Payload of `release_segments`, manager to reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSegments {
    #[serde(rename = "generation-id")]
    pub generation_id: GenerationId,
}

/// Payload of `release_segments_ack`, reader to manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSegmentsAck {
    #[serde(rename = "generation-id")]
    pub generation_id: GenerationId,
    pub reader: ReaderId,
}

/// Arguments shared by the `loadzone` command and the `zone_updated`
/// notification. Fields are left as raw strings so the receiving side can
/// produce precise rejection messages; `generation-id` only matters on the
/// notification path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneRequest {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub datasource: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(rename = "generation-id", default)]
    pub generation_id: Option<GenerationId>,
}

/// Parameters of a `cc_members` membership notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberEvent {
    #[serde(default)]
    pub client: Option<ReaderId>,
    #[serde(default)]
    pub group: Option<String>,
}

#[cfg(test)]
mod t_message {
    use super::*;

    #[test]
    fn test_command_envelope_round_trip() {
        let cmd = create_command("loadzone", json!({"class": "IN"}));
        let (name, params) = parse_command(&cmd).unwrap();
        assert_eq!("loadzone", name);
        assert_eq!(json!({"class": "IN"}), params);
    }

    #[test]
    fn test_command_without_params() {
        let (name, params) = parse_command(&json!({"command": ["shutdown"]})).unwrap();
        assert_eq!("shutdown", name);
        assert_eq!(Value::Null, params);
    }

    #[test]
    fn test_broken_command_envelope() {
        assert!(parse_command(&json!({"result": [0]})).is_err());
        assert!(parse_command(&json!({"command": "loadzone"})).is_err());
        assert!(parse_command(&json!({"command": [1, 2]})).is_err());
    }

    #[test]
    fn test_answer_envelope_round_trip() {
        assert_eq!((0, None), parse_answer(&create_answer(0, None)).unwrap());
        assert_eq!(
            (1, Some("not a directory".to_string())),
            parse_answer(&create_answer(1, Some("not a directory"))).unwrap()
        );
    }

    #[test]
    fn test_broken_answer_envelope() {
        assert!(parse_answer(&json!({"command": ["x"]})).is_err());
        assert!(parse_answer(&json!({"result": "ok"})).is_err());
    }

    #[test]
    fn test_segment_info_update_wire_format() {
        let update = SegmentInfoUpdate {
            class: RrClass::In,
            name: "name".to_string(),
            segment_params: json!("test-segment-params"),
            reader: ReaderId::from("foo"),
            generation_id: GenerationId(42),
            inuse_only: None,
        };
        let wire = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json!({
                "data-source-class": "IN",
                "data-source-name": "name",
                "segment-params": "test-segment-params",
                "reader": "foo",
                "generation-id": 42,
            }),
            wire
        );
        // the flag is only present when set
        let update = SegmentInfoUpdate {
            inuse_only: Some(true),
            ..update
        };
        let wire = serde_json::to_value(&update).unwrap();
        assert_eq!(Some(&json!(true)), wire.get("inuse-only"));
    }

    #[test]
    fn test_ack_requires_every_field() {
        let ack: Result<SegmentInfoUpdateAck, _> = serde_json::from_value(json!({
            "data-source-class": "IN",
            "generation-id": 42,
        }));
        assert!(ack.is_err());

        let ack: SegmentInfoUpdateAck = serde_json::from_value(json!({
            "data-source-class": "IN",
            "data-source-name": "name",
            "generation-id": 42,
            "reader": "reader0",
        }))
        .unwrap();
        assert_eq!(RrClass::In, ack.class);
        assert_eq!(GenerationId(42), ack.generation_id);
    }

    #[test]
    fn test_zone_request_tolerates_missing_fields() {
        let req: ZoneRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(ZoneRequest::default(), req);

        let req: ZoneRequest = serde_json::from_value(json!({
            "class": "IN",
            "datasource": "name",
            "origin": "zone",
            "generation-id": 42,
        }))
        .unwrap();
        assert_eq!(Some(GenerationId(42)), req.generation_id);
        assert_eq!(Some("zone"), req.origin.as_deref());
    }

    #[test]
    fn test_release_segments_wire_format() {
        let wire = serde_json::to_value(ReleaseSegments {
            generation_id: GenerationId(42),
        })
        .unwrap();
        assert_eq!(json!({"generation-id": 42}), wire);
    }
}
