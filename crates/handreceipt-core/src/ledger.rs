//! The append-only, hash-chained ledger (C1).
//!
//! Design choice, carried from the grounding project's own append-only
//! ledger: no in-place mutation APIs are exposed. Every recorded fact
//! becomes an additional entry; corrections are new `CORRECTION` events,
//! never edits.

use crate::error::HandReceiptError;
use crate::types::LedgerEventType;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A single immutable ledger record, independent of any storage backend.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub sequence: i64,
    pub event_type: LedgerEventType,
    pub property_id: i64,
    pub actor_user_id: i64,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Report produced by [`verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub ok: bool,
    pub first_broken_at: Option<i64>,
}

/// `hash = SHA-256(sprintf("%d|%s|%d|%d|%s|%s", sequence, eventType,
/// propertyId, actorUserId, canonicalPayload, prevHash))`, per spec §4.1.
pub fn compute_hash(
    sequence: i64,
    event_type: LedgerEventType,
    property_id: i64,
    actor_user_id: i64,
    canonical_payload: &str,
    prev_hash: &str,
) -> String {
    let preimage = format!(
        "{}|{}|{}|{}|{}|{}",
        sequence,
        event_type.as_str(),
        property_id,
        actor_user_id,
        canonical_payload,
        prev_hash
    );
    let digest = Sha256::digest(preimage.as_bytes());
    hex::encode(digest)
}

/// The genesis `prevHash`: 64 `'0'` characters, per spec §4.1.
pub fn genesis_hash() -> String {
    "0".repeat(64)
}

pub fn build_entry(
    sequence: i64,
    event_type: LedgerEventType,
    property_id: i64,
    actor_user_id: i64,
    payload: Value,
    prev_hash: &str,
    created_at: DateTime<Utc>,
) -> LedgerEntry {
    let canonical_payload = crate::canonical::canonicalize(&payload);
    let hash = compute_hash(
        sequence,
        event_type,
        property_id,
        actor_user_id,
        &canonical_payload,
        prev_hash,
    );
    LedgerEntry {
        sequence,
        event_type,
        property_id,
        actor_user_id,
        payload,
        prev_hash: prev_hash.to_string(),
        hash,
        created_at,
    }
}

/// Recompute hashes over `entries` (assumed already ordered by `sequence`
/// ascending) and report the first broken link, if any.
pub fn verify_chain(entries: &[LedgerEntry]) -> VerificationReport {
    let mut expected_prev = genesis_hash();
    for entry in entries {
        if entry.prev_hash != expected_prev {
            return VerificationReport {
                ok: false,
                first_broken_at: Some(entry.sequence),
            };
        }
        let canonical_payload = crate::canonical::canonicalize(&entry.payload);
        let expected_hash = compute_hash(
            entry.sequence,
            entry.event_type,
            entry.property_id,
            entry.actor_user_id,
            &canonical_payload,
            &entry.prev_hash,
        );
        if entry.hash != expected_hash {
            return VerificationReport {
                ok: false,
                first_broken_at: Some(entry.sequence),
            };
        }
        expected_prev = entry.hash.clone();
    }
    VerificationReport {
        ok: true,
        first_broken_at: None,
    }
}

/// Verify that sequences form a contiguous `[first, last]` range, per spec
/// §8 invariant 5. Entries must already be sorted ascending by sequence.
pub fn verify_no_gaps(entries: &[LedgerEntry]) -> Result<(), HandReceiptError> {
    for window in entries.windows(2) {
        if window[1].sequence != window[0].sequence + 1 {
            return Err(HandReceiptError::LedgerUnavailable(format!(
                "sequence gap between {} and {}",
                window[0].sequence, window[1].sequence
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verifies_hash_chain() {
        let e0 = build_entry(
            1,
            LedgerEventType::ItemCreate,
            10,
            1,
            json!({"name": "M4 Carbine"}),
            &genesis_hash(),
            Utc::now(),
        );
        let e1 = build_entry(
            2,
            LedgerEventType::QrGenerated,
            10,
            1,
            json!({"qrId": 5}),
            &e0.hash,
            Utc::now(),
        );

        let report = verify_chain(&[e0, e1]);
        assert!(report.ok);
        assert_eq!(report.first_broken_at, None);
    }

    #[test]
    fn detects_tampered_payload() {
        let e0 = build_entry(
            1,
            LedgerEventType::ItemCreate,
            10,
            1,
            json!({"name": "M4 Carbine"}),
            &genesis_hash(),
            Utc::now(),
        );
        let mut tampered = e0.clone();
        tampered.payload = json!({"name": "tampered"});

        let report = verify_chain(&[tampered]);
        assert!(!report.ok);
        assert_eq!(report.first_broken_at, Some(1));
    }

    #[test]
    fn detects_sequence_gap() {
        let e0 = build_entry(
            1,
            LedgerEventType::ItemCreate,
            10,
            1,
            json!({}),
            &genesis_hash(),
            Utc::now(),
        );
        let e2 = build_entry(3, LedgerEventType::StatusChange, 10, 1, json!({}), &e0.hash, Utc::now());

        assert!(verify_no_gaps(&[e0, e2]).is_err());
    }

    #[test]
    fn hash_is_deterministic() {
        let a = compute_hash(1, LedgerEventType::ItemCreate, 10, 1, "{}", &genesis_hash());
        let b = compute_hash(1, LedgerEventType::ItemCreate, 10, 1, "{}", &genesis_hash());
        assert_eq!(a, b);
    }
}
