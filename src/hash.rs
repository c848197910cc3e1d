/// Event hashing.
///
/// An event hash is a pure function of the event's identity fields and its
/// canonical payload. Recomputing it from stored fields must always
/// reproduce the stored digest; a disagreement is an integrity failure.
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::canonical;
use crate::error::Result;

/// Supported digest algorithms. 256-bit output in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Keccak256,
}

impl HashAlgorithm {
    pub fn digest(&self, data: &[u8]) -> [u8; 32] {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hasher.finalize().into()
            }
            HashAlgorithm::Keccak256 => {
                let mut hasher = Keccak256::new();
                hasher.update(data);
                hasher.finalize().into()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Keccak256 => "keccak256",
        }
    }
}

/// Render a timestamp with a fixed textual representation for hashing.
/// RFC 3339, UTC, microsecond precision — independent of locale or the
/// precision the timestamp happened to be stored with.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Compute the hash of an event from its identity fields.
///
/// The hashing input is the canonical JSON of a fixed six-field object;
/// payload map ordering at the call site cannot affect the digest.
pub fn hash_event(
    algo: HashAlgorithm,
    event_type: &str,
    module: &str,
    subject_type: &str,
    subject_id: &str,
    occurred_at: &DateTime<Utc>,
    payload: &Map<String, Value>,
) -> Result<[u8; 32]> {
    // Validates the payload (non-empty object) before serializing.
    canonical::canonical_payload(payload)?;

    let hash_input = json!({
        "event_type": event_type,
        "module": module,
        "subject_type": subject_type,
        "subject_id": subject_id,
        "occurred_at": canonical_timestamp(occurred_at),
        "payload": Value::Object(payload.clone()),
    });

    let serialized = canonical::to_canonical_json(&hash_input);
    Ok(algo.digest(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_payload(order_swapped: bool) -> Map<String, Value> {
        let raw = if order_swapped {
            r#"{"currency": "EUR", "amount": 1250}"#
        } else {
            r#"{"amount": 1250, "currency": "EUR"}"#
        };
        match serde_json::from_str::<Value>(raw).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn sample_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_hash_deterministic() {
        let ts = sample_ts();
        let p = sample_payload(false);
        let h1 = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &p,
        )
        .unwrap();
        let h2 = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &p,
        )
        .unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_payload_key_order_irrelevant() {
        let ts = sample_ts();
        let h1 = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &sample_payload(false),
        )
        .unwrap();
        let h2 = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &sample_payload(true),
        )
        .unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_any_field_change_changes_hash() {
        let ts = sample_ts();
        let p = sample_payload(false);
        let base = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &p,
        )
        .unwrap();
        let other_subject = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-002",
            &ts,
            &p,
        )
        .unwrap();
        assert_ne!(base, other_subject);

        let mut tampered = p.clone();
        tampered.insert("amount".into(), Value::from(9999));
        let other_payload = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &tampered,
        )
        .unwrap();
        assert_ne!(base, other_payload);
    }

    #[test]
    fn test_algorithms_differ() {
        let ts = sample_ts();
        let p = sample_payload(false);
        let sha = hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &p,
        )
        .unwrap();
        let keccak = hash_event(
            HashAlgorithm::Keccak256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &p,
        )
        .unwrap();
        assert_ne!(sha, keccak);
    }

    #[test]
    fn test_empty_payload_is_invalid() {
        let ts = sample_ts();
        let empty = Map::new();
        assert!(hash_event(
            HashAlgorithm::Sha256,
            "invoice_created",
            "finance",
            "invoice",
            "INV-001",
            &ts,
            &empty,
        )
        .is_err());
    }

    #[test]
    fn test_known_sha256_vector() {
        // Digest of the empty string, sanity check against the algorithm.
        let d = HashAlgorithm::Sha256.digest(b"");
        assert_eq!(
            hex::encode(d),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
