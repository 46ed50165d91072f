//! The idempotency store port and the claim decision shared by adapters.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IdempotencyError;

/// Lease granted to a fresh claim unless configured otherwise.
pub const DEFAULT_LEASE_SECS: i64 = 30;

/// Identity of one idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub key: String,
    pub command: String,
    pub scope_hash: String,
}

/// An attempt to claim `(key, command, scope_hash)` for execution.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub key: String,
    pub command: String,
    pub scope_hash: String,
    pub payload_hash: String,
    pub now: DateTime<Utc>,
}

impl ClaimRequest {
    pub fn record_key(&self) -> RecordKey {
        RecordKey {
            key: self.key.clone(),
            command: self.command.clone(),
            scope_hash: self.scope_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller owns the record and must run the command.
    Claimed,
    /// A previous execution completed; this is its response.
    Replay(Value),
    /// Another execution holds a live lease on the record.
    InFlight { lease_expires_at: DateTime<Utc> },
}

/// A stored claim and, once completed, its response.
///
/// Completion is marked by `completed_at`. A completed record may carry a
/// JSON `null` response, which reads back as `response: None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub command: String,
    pub scope_hash: String,
    pub payload_hash: String,
    pub response: Option<Value>,
    pub claimed_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// A fresh placeholder for `request`, leased until `now + lease`.
    pub fn placeholder(request: &ClaimRequest, lease: Duration) -> Self {
        Self {
            key: request.key.clone(),
            command: request.command.clone(),
            scope_hash: request.scope_hash.clone(),
            payload_hash: request.payload_hash.clone(),
            response: None,
            claimed_at: request.now,
            lease_expires_at: request.now + lease,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Marks the record terminal with `response`.
    pub fn complete(&mut self, response: Value, completed_at: DateTime<Utc>) {
        self.response = Some(response);
        self.completed_at = Some(completed_at);
    }

    /// Decides what an existing record means for `request`.
    ///
    /// Returns `Ok(None)` when the record is an abandoned claim whose lease
    /// has run out; the caller then takes it over.
    pub fn outcome_for(
        &self,
        request: &ClaimRequest,
    ) -> Result<Option<ClaimOutcome>, IdempotencyError> {
        if self.payload_hash != request.payload_hash {
            return Err(IdempotencyError::PayloadMismatch {
                key: request.key.clone(),
                command: request.command.clone(),
            });
        }
        if self.is_completed() {
            let response = self.response.clone().unwrap_or(Value::Null);
            return Ok(Some(ClaimOutcome::Replay(response)));
        }
        if self.lease_expires_at > request.now {
            return Ok(Some(ClaimOutcome::InFlight {
                lease_expires_at: self.lease_expires_at,
            }));
        }
        Ok(None)
    }
}

/// Persists idempotency records inside the caller's transaction.
///
/// `try_claim` is an atomic compare-and-insert: of two transactions claiming
/// the same record, at most one commits a claim.
#[async_trait]
pub trait IdempotencyStore<Tx>: Send + Sync {
    async fn try_claim(
        &self,
        tx: &Tx,
        request: &ClaimRequest,
    ) -> Result<ClaimOutcome, IdempotencyError>;

    /// Attaches the response to a claimed record, making it terminal.
    async fn save_response(
        &self,
        tx: &Tx,
        record: &RecordKey,
        response: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn request(payload_hash: &str, now: DateTime<Utc>) -> ClaimRequest {
        ClaimRequest {
            key: "k-1".into(),
            command: "asset.create".into(),
            scope_hash: "s".into(),
            payload_hash: payload_hash.into(),
            now,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn live_placeholder_is_in_flight() {
        let record = IdempotencyRecord::placeholder(&request("p", t0()), Duration::seconds(30));
        let outcome = record
            .outcome_for(&request("p", t0() + Duration::seconds(29)))
            .unwrap();
        assert_eq!(
            outcome,
            Some(ClaimOutcome::InFlight {
                lease_expires_at: t0() + Duration::seconds(30)
            })
        );
    }

    #[test]
    fn expired_placeholder_can_be_taken_over() {
        let record = IdempotencyRecord::placeholder(&request("p", t0()), Duration::seconds(30));
        let outcome = record
            .outcome_for(&request("p", t0() + Duration::seconds(30)))
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn completed_record_replays_even_after_lease() {
        let mut record =
            IdempotencyRecord::placeholder(&request("p", t0()), Duration::seconds(30));
        record.complete(json!({"id": "asset-1"}), t0());

        let outcome = record
            .outcome_for(&request("p", t0() + Duration::days(3)))
            .unwrap();
        assert_eq!(outcome, Some(ClaimOutcome::Replay(json!({"id": "asset-1"}))));
    }

    #[test]
    fn completed_null_response_replays_as_null() {
        let mut record =
            IdempotencyRecord::placeholder(&request("p", t0()), Duration::seconds(30));
        record.complete(Value::Null, t0());

        let stored: IdempotencyRecord =
            serde_json::from_value(serde_json::to_value(&record).unwrap()).unwrap();
        assert!(stored.is_completed());
        assert_eq!(
            stored.outcome_for(&request("p", t0())).unwrap(),
            Some(ClaimOutcome::Replay(Value::Null))
        );
    }

    #[test]
    fn different_payload_is_rejected_before_replay() {
        let mut record =
            IdempotencyRecord::placeholder(&request("p", t0()), Duration::seconds(30));
        record.complete(json!(1), t0());

        let err = record.outcome_for(&request("q", t0())).unwrap_err();
        assert!(matches!(err, IdempotencyError::PayloadMismatch { .. }));
    }
}
