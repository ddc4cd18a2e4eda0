use async_trait::async_trait;
use diary_schemas::{DiaryRecord, RecordId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Maximum characters of the body carried in a reminder payload
pub const SNIPPET_CHARS: usize = 80;

// ============================================================================
// Tokens and payloads
// ============================================================================

/// Stable key correlating a record with its timer registration.
///
/// Derived from the record id alone so that re-arming replaces the previous
/// registration, including one made by an earlier process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerToken(pub u64);

impl TimerToken {
    pub fn for_record(id: &RecordId) -> Self {
        let digest = Sha256::digest(id.as_str().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        TimerToken(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Data handed back to the fire receiver when a timer goes off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub record_id: RecordId,
    pub title: String,
    pub body_snippet: String,
}

impl ReminderPayload {
    pub fn from_record(record: &DiaryRecord) -> Self {
        Self {
            record_id: record.id.clone(),
            title: record.title.clone(),
            body_snippet: record.body_snippet(SNIPPET_CHARS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPreference {
    Exact,
    /// May be delivered late, but is still delivered
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("exact scheduling is not permitted")]
    ExactNotPermitted,
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Capabilities
// ============================================================================

/// One-shot wake-up primitive. Calls return immediately; delivery happens later
/// on a path outside the scheduler.
pub trait TimerCapability: Send + Sync {
    /// Whether exact delivery is currently permitted
    fn can_schedule_exact(&self) -> bool;

    /// Register (or replace) the wake-up for `token`
    fn register(
        &self,
        token: TimerToken,
        fire_at_ms: i64,
        delivery: DeliveryPreference,
        payload: ReminderPayload,
    ) -> Result<(), CapabilityError>;

    /// Withdraw a pending registration; unknown tokens are not an error
    fn unregister(&self, token: TimerToken) -> Result<(), CapabilityError>;
}

/// User-visible alert primitive, driven by the fire receiver
#[async_trait]
pub trait NotificationCapability: Send + Sync {
    fn has_permission(&self) -> bool {
        true
    }

    async fn show(&self, title: &str, body: &str) -> Result<(), CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_stable_per_id() {
        let a = TimerToken::for_record(&RecordId::from("a1"));
        assert_eq!(a, TimerToken::for_record(&RecordId::from("a1")));
        assert_ne!(a, TimerToken::for_record(&RecordId::from("a2")));

        // Fixed value: tokens must not change between builds
        assert_eq!(
            TimerToken::for_record(&RecordId::from("")).to_string(),
            "e3b0c44298fc1c14"
        );
    }

    #[test]
    fn test_payload_snippet_is_bounded() {
        let record = DiaryRecord {
            id: RecordId::from("a1"),
            title: "Long".into(),
            body: "é".repeat(200),
            date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            created_at: 0,
            updated_at: 0,
            mood: None,
            weather_note: None,
            tags: Vec::new(),
            reminder_enabled: true,
            reminder_at: 1,
        };

        let payload = ReminderPayload::from_record(&record);
        assert_eq!(payload.body_snippet.chars().count(), SNIPPET_CHARS);
        assert_eq!(payload.record_id, record.id);
    }
}
