//! Wire-level DTOs: the event bus's `ResultEvent` and
//! the remote agent RPC's request/response bodies.
//!
//! Shaped after generic `ApiRequest<T>`/`ApiResponse<T>` envelopes, but
//! this platform's wire surface is a handful of concrete, narrowly-typed
//! bodies rather than one generic envelope, so each gets its own struct.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::State;

/// Published on the event bus topic whose id equals `detector_id` (P5:
/// `host_id` and `detector_id` are always non-empty and equal to the
/// source detector).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEvent {
    pub host_id: Uuid,
    pub host_name: String,
    pub detector_id: Uuid,
    pub detector_name: String,
    pub result: EventResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventResult {
    pub state: State,
    pub message: String,
}

/// `POST /execute` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteRequest {
    pub command: String,
}

/// `POST /execute` response body. `result` carries the RPC's "bytes"
/// payload base64-encoded, since the transport is JSON over HTTP rather
/// than a raw byte-oriented RPC framework.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteResponse {
    #[serde(with = "base64_bytes")]
    pub result: Vec<u8>,
}

impl ExecuteResponse {
    pub fn new(result: Vec<u8>) -> Self {
        Self { result }
    }
}

mod base64_bytes {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_event_round_trips_through_json() {
        let event = ResultEvent {
            host_id: Uuid::new_v4(),
            host_name: "web1".into(),
            detector_id: Uuid::new_v4(),
            detector_name: "homepage".into(),
            result: EventResult {
                state: State::Ok,
                message: "200 OK".into(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: ResultEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn execute_response_encodes_result_bytes_as_base64() {
        let resp = ExecuteResponse::new(b"cpu:12.5".to_vec());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"], "Y3B1OjEyLjU=");
        let decoded: ExecuteResponse = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.result, b"cpu:12.5".to_vec());
    }

    #[test]
    fn execute_request_decodes_from_json() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"command":"check_cpu"}"#).unwrap();
        assert_eq!(req.command, "check_cpu");
    }
}
