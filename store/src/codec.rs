// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Record (de)serialization.
//!
//! Records are JSON objects with stable key names. Each object carries a `schemaVersion` key
//! next to the fields of the record. Objects without that key were written before versioning
//! was introduced and are read as version 0, which has the same layout as version 1.

use crate::naming::RecordKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Version written into every record produced by [`encode`].
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schemaVersion";

#[derive(Serialize)]
struct Envelope<'a, T> {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(flatten)]
    record: &'a T,
}

#[derive(Deserialize)]
struct OwnedEnvelope<T> {
    #[serde(rename = "schemaVersion", default)]
    schema_version: u32,
    #[serde(flatten)]
    record: T,
}

/// A record of some kind could not be encoded or decoded.
#[derive(Debug, thiserror::Error)]
#[error("{kind} record: {reason}")]
pub struct CodecError {
    pub kind: RecordKind,
    pub reason: String,
}

/// Serialize a record.
///
/// # Errors
///
/// Fails if `record` does not serialize to a JSON object, or already has a key named
/// `schemaVersion`.
pub fn encode<T: Serialize>(kind: RecordKind, record: &T) -> Result<Vec<u8>, CodecError> {
    let fail = |reason: String| CodecError { kind, reason };
    let value = serde_json::to_value(record).map_err(|e| fail(e.to_string()))?;
    match &value {
        serde_json::Value::Object(map) if map.contains_key(SCHEMA_VERSION_KEY) => {
            return Err(fail(format!("field '{SCHEMA_VERSION_KEY}' is reserved")));
        }
        serde_json::Value::Object(_) => {}
        _ => return Err(fail("records must serialize to JSON objects".to_string())),
    }
    serde_json::to_vec(&Envelope {
        schema_version: SCHEMA_VERSION,
        record: &value,
    })
    .map_err(|e| fail(e.to_string()))
}

/// Deserialize a record of the given kind.
///
/// # Errors
///
/// Fails if `bytes` is not a JSON object with the shape of `T`, or if it was written with a
/// schema version newer than [`SCHEMA_VERSION`].
pub fn decode<T: DeserializeOwned>(kind: RecordKind, bytes: &[u8]) -> Result<T, CodecError> {
    let fail = |reason: String| CodecError { kind, reason };
    let envelope: OwnedEnvelope<T> =
        serde_json::from_slice(bytes).map_err(|e| fail(e.to_string()))?;
    if envelope.schema_version > SCHEMA_VERSION {
        return Err(fail(format!(
            "unsupported schema version {} (newest supported is {SCHEMA_VERSION})",
            envelope.schema_version
        )));
    }
    Ok(envelope.record)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::naming::ContainerId;
    use crate::records::{AuxiliaryData, InterfaceRecord, IpAssignment};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn test_encode_adds_schema_version() {
        let bytes = encode(RecordKind::Interface, &InterfaceRecord::new(7)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"schemaVersion": SCHEMA_VERSION, "swIfIndex": 7})
        );
    }

    #[test]
    fn test_decode_legacy_record_without_version() {
        let record: InterfaceRecord =
            decode(RecordKind::Interface, br#"{"swIfIndex": 9, "memifSocketId": 2}"#).unwrap();
        assert_eq!(record, InterfaceRecord::new(9).with_socket_id(2));
    }

    #[test]
    fn test_decode_rejects_newer_schema() {
        let err = decode::<InterfaceRecord>(
            RecordKind::Interface,
            br#"{"schemaVersion": 2, "swIfIndex": 9}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, RecordKind::Interface);
        assert!(err.reason.contains("unsupported schema version 2"));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(decode::<InterfaceRecord>(RecordKind::Interface, b"").is_err());
        assert!(decode::<InterfaceRecord>(RecordKind::Interface, b"[1,2]").is_err());
        assert!(decode::<InterfaceRecord>(RecordKind::Interface, br#"{"swIfIndex": "x"}"#).is_err());
        assert!(decode::<AuxiliaryData>(RecordKind::AuxiliaryData, br#"{"ipData": null}"#).is_err());
    }

    #[test]
    fn test_encode_rejects_non_objects() {
        assert!(encode(RecordKind::RemoteConfig, &5_u32).is_err());
        assert!(encode(RecordKind::RemoteConfig, &serde_json::json!({"schemaVersion": 3})).is_err());
    }

    #[test]
    fn test_auxiliary_data_encoding() {
        let aux = AuxiliaryData::new(
            ContainerId::new("c1").unwrap(),
            Some(IpAssignment::new(ipnet::IpNet::from_str("10.0.0.5/24").unwrap())),
        );
        let bytes = encode(RecordKind::AuxiliaryData, &aux).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "schemaVersion": SCHEMA_VERSION,
                "containerId": "c1",
                "ipData": {"address": "10.0.0.5/24", "family": "ipv4"}
            })
        );
        let decoded: AuxiliaryData = decode(RecordKind::AuxiliaryData, &bytes).unwrap();
        assert_eq!(decoded, aux);
    }

    #[test]
    fn decode_never_panics() {
        bolero::check!().for_each(|bytes: &[u8]| {
            let _ = decode::<InterfaceRecord>(RecordKind::Interface, bytes);
            let _ = decode::<AuxiliaryData>(RecordKind::AuxiliaryData, bytes);
        });
    }
}
