// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire envelope.
//!
//! JSON shape shared by host and guest:
//!
//! ```json
//! { "address": "Main" | "*" | "<opaque-id>",
//!   "name": "frame.click" | ["a", "b"],
//!   "ackName": "ack_r2p_frame.click_7",
//!   "isAck": false,
//!   "payload": {},
//!   "isMainAddress": true,
//!   "error": null }
//! ```
//!
//! Envelopes are structurally validated on decode so the dispatcher never has
//! to sniff shapes at runtime.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Envelope decoding errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    Invalid(&'static str),
}

/// One method name or a list of names sharing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Names {
    One(String),
    Many(Vec<String>),
}

impl Names {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::One(name) => std::slice::from_ref(name),
            Self::Many(names) => names,
        };
        slice.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.iter().any(|n| n == name)
    }

    /// True if any name in `self` appears in `other`.
    pub fn intersects(&self, other: &Names) -> bool {
        self.iter().any(|n| other.contains(n))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().all(str::is_empty)
    }

    /// The single name, if there is exactly one.
    pub fn single(&self) -> Option<&str> {
        match self {
            Self::One(name) => Some(name),
            Self::Many(names) if names.len() == 1 => Some(&names[0]),
            Self::Many(_) => None,
        }
    }
}

impl From<&str> for Names {
    fn from(name: &str) -> Self {
        Self::One(name.to_string())
    }
}

impl From<String> for Names {
    fn from(name: String) -> Self {
        Self::One(name)
    }
}

impl From<Vec<String>> for Names {
    fn from(names: Vec<String>) -> Self {
        Self::Many(names)
    }
}

impl<const N: usize> From<[&str; N]> for Names {
    fn from(names: [&str; N]) -> Self {
        Self::Many(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl std::fmt::Display for Names {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(name) => f.write_str(name),
            Self::Many(names) => f.write_str(&names.join(",")),
        }
    }
}

/// Carried in place of a `null` error so the failure survives the wire.
pub const UNSPECIFIED_ERROR: &str = "-";

/// Unit of wire traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Target on the way to a guest, source on the way back.
    pub address: Address,
    pub name: Names,
    /// Present only on requests expecting a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_name: Option<String>,
    #[serde(default)]
    pub is_ack: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub is_main_address: bool,
    /// Carried failure, only on acks of failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    /// A request that expects exactly one ack named `ack_name`.
    pub fn request(
        address: Address,
        name: impl Into<Names>,
        ack_name: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            address,
            name: name.into(),
            ack_name: Some(ack_name.into()),
            is_ack: false,
            payload,
            is_main_address: false,
            error: None,
        }
    }

    /// A request nobody waits on.
    pub fn notification(address: Address, name: impl Into<Names>, payload: Value) -> Self {
        Self {
            address,
            name: name.into(),
            ack_name: None,
            is_ack: false,
            payload,
            is_main_address: false,
            error: None,
        }
    }

    /// The reply to a request; `outcome` is the settled handler value.
    pub fn ack(address: Address, ack_name: impl Into<String>, outcome: Result<Value, Value>) -> Self {
        let (payload, error) = match outcome {
            Ok(value) => (value, None),
            Err(Value::Null) => (Value::Null, Some(Value::from(UNSPECIFIED_ERROR))),
            Err(error) => (Value::Null, Some(error)),
        };
        Self {
            address,
            name: Names::One(ack_name.into()),
            ack_name: None,
            is_ack: true,
            payload,
            is_main_address: false,
            error,
        }
    }

    pub fn with_main_flag(mut self, is_main_address: bool) -> Self {
        self.is_main_address = is_main_address;
        self
    }

    /// The ack token this envelope answers (acks are named after their token).
    pub fn answered_token(&self) -> Option<&str> {
        if self.is_ack {
            self.name.single()
        } else {
            None
        }
    }

    /// The settled outcome carried by an ack.
    pub fn outcome(&self) -> Result<Value, Value> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.payload.clone()),
        }
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.name.is_empty() {
            return Err(EnvelopeError::Invalid("empty name"));
        }
        if self.is_ack {
            if self.ack_name.is_some() {
                return Err(EnvelopeError::Invalid("ack carries an ackName"));
            }
            if self.name.single().is_none() {
                return Err(EnvelopeError::Invalid("ack must name exactly one token"));
            }
        } else if self.error.is_some() {
            return Err(EnvelopeError::Invalid("error on a non-ack envelope"));
        }
        Ok(())
    }

    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let mut envelope: Self = serde_json::from_value(value)?;
        // Peers spell "no ack wanted" as an empty string.
        if envelope.ack_name.as_deref() == Some("") {
            envelope.ack_name = None;
        }
        if envelope.error.as_ref().is_some_and(Value::is_null) {
            envelope.error = None;
        }
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let env = Envelope::request(Address::named("frameA"), "ping", "ack_r2p_ping_1", json!({"n": 1}));
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["address"], "frameA");
        assert_eq!(value["name"], "ping");
        assert_eq!(value["ackName"], "ack_r2p_ping_1");
        assert_eq!(value["isAck"], false);
        assert_eq!(value["payload"]["n"], 1);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn parse_peer_ack_with_empty_ack_name() {
        let text = r#"{"address":"Main","name":"ack_r2p_ping_1","ackName":"","isAck":true,
                       "payload":{"ok":true},"isMainAddress":true,"error":null}"#;
        let env = Envelope::from_json(text).unwrap();
        assert!(env.is_ack);
        assert_eq!(env.ack_name, None);
        assert_eq!(env.answered_token(), Some("ack_r2p_ping_1"));
        assert_eq!(env.outcome(), Ok(json!({"ok": true})));
    }

    #[test]
    fn parse_name_list() {
        let text = r#"{"address":"*","name":["frame.load","frame.goto.load"],"payload":1}"#;
        let env = Envelope::from_json(text).unwrap();
        assert_eq!(env.address, Address::Wildcard);
        assert!(env.name.contains("frame.goto.load"));
        assert_eq!(env.name.single(), None);
    }

    #[test]
    fn reject_structurally_invalid() {
        let ack_with_token = r#"{"address":"Main","name":"t","ackName":"x","isAck":true}"#;
        assert!(matches!(
            Envelope::from_json(ack_with_token),
            Err(EnvelopeError::Invalid(_))
        ));

        let request_with_error = r#"{"address":"Main","name":"t","isAck":false,"error":"boom"}"#;
        assert!(Envelope::from_json(request_with_error).is_err());

        let empty_name = r#"{"address":"Main","name":""}"#;
        assert!(Envelope::from_json(empty_name).is_err());

        assert!(matches!(Envelope::from_json("{"), Err(EnvelopeError::Json(_))));
    }

    #[test]
    fn failed_ack_carries_error() {
        let env = Envelope::ack(Address::Main, "tok", Err(json!("Error: boom")));
        assert_eq!(env.payload, Value::Null);
        assert_eq!(env.outcome(), Err(json!("Error: boom")));
        assert!(env.validate().is_ok());
    }

    #[test]
    fn null_error_still_fails_after_round_trip() {
        let env = Envelope::ack(Address::Main, "tok", Err(Value::Null));
        let decoded = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(decoded.outcome(), Err(json!(UNSPECIFIED_ERROR)));
    }

    #[test]
    fn names_intersection() {
        let listener = Names::from(["frame.load", "frame.goto.load"]);
        assert!(Names::from("frame.load").intersects(&listener));
        assert!(!Names::from("frame.unload").intersects(&listener));
    }
}
