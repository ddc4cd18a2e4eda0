use chrono::{Datelike, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Format used for the `date` column and on the wire
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId(value.to_string())
    }
}

pub fn generate_record_id() -> RecordId {
    RecordId(ulid::Ulid::new().to_string())
}

// ============================================================================
// Diary Record Schema
// ============================================================================

/// One diary entry as persisted by the record store.
///
/// `reminder_at` is epoch milliseconds and only meaningful while
/// `reminder_enabled` is set; `0` means disarmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryRecord {
    pub id: RecordId,
    pub title: String,
    pub body: String,
    pub date: NaiveDate,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub weather_note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reminder_enabled: bool,
    #[serde(default)]
    pub reminder_at: i64,
}

impl DiaryRecord {
    /// True when a timer should be armed for this record at `now_ms`.
    ///
    /// An enabled reminder whose time has passed is inert, not an error.
    pub fn reminder_armable(&self, now_ms: i64) -> bool {
        self.reminder_enabled && self.reminder_at > now_ms
    }

    /// Case-insensitive substring match over title, body and tags.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        self.title.to_lowercase().contains(&needle)
            || self.body.to_lowercase().contains(&needle)
            || self
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(&needle))
    }

    pub fn body_snippet(&self, max_chars: usize) -> String {
        self.body.chars().take(max_chars).collect()
    }
}

// ============================================================================
// Draft (edit boundary)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("body must not be empty")]
    EmptyBody,
}

/// User input for creating or editing a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryDraft {
    pub title: String,
    pub body: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub weather_note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Reminder time in epoch ms; `None` disables the reminder
    #[serde(default)]
    pub reminder_at: Option<i64>,
}

impl DiaryDraft {
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.trim().is_empty() {
            return Err(DraftError::EmptyTitle);
        }
        if self.body.trim().is_empty() {
            return Err(DraftError::EmptyBody);
        }
        Ok(())
    }

    /// Build a brand new record with a fresh id.
    pub fn into_record(self, now_ms: i64) -> Result<DiaryRecord, DraftError> {
        self.validate()?;
        let (reminder_enabled, reminder_at) = reminder_fields(self.reminder_at);

        Ok(DiaryRecord {
            id: generate_record_id(),
            title: self.title.trim().to_string(),
            body: self.body.trim().to_string(),
            date: self.date,
            created_at: now_ms,
            updated_at: now_ms,
            mood: non_blank(self.mood),
            weather_note: non_blank(self.weather_note),
            tags: normalize_tags(self.tags),
            reminder_enabled,
            reminder_at,
        })
    }

    /// Replace every editable field of `existing`, keeping its id and creation time.
    pub fn apply_to(self, existing: &DiaryRecord, now_ms: i64) -> Result<DiaryRecord, DraftError> {
        self.validate()?;
        let (reminder_enabled, reminder_at) = reminder_fields(self.reminder_at);

        Ok(DiaryRecord {
            id: existing.id.clone(),
            title: self.title.trim().to_string(),
            body: self.body.trim().to_string(),
            date: self.date,
            created_at: existing.created_at,
            updated_at: now_ms.max(existing.updated_at).max(existing.created_at),
            mood: non_blank(self.mood),
            weather_note: non_blank(self.weather_note),
            tags: normalize_tags(self.tags),
            reminder_enabled,
            reminder_at,
        })
    }
}

fn reminder_fields(reminder_at: Option<i64>) -> (bool, i64) {
    match reminder_at {
        Some(at) if at > 0 => (true, at),
        _ => (false, 0),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma separated tag field into an ordered, de-duplicated list.
pub fn parse_tags(raw: &str) -> Vec<String> {
    normalize_tags(raw.split(',').map(str::to_string))
}

fn normalize_tags<I>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !seen.iter().any(|t| t == tag) {
            seen.push(tag.to_string());
        }
    }
    seen
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    All,
    Today,
    #[serde(rename = "week")]
    ThisWeek,
    #[serde(rename = "month")]
    ThisMonth,
}

impl ViewMode {
    /// Inclusive date bounds of the view around `anchor`, `None` for `All`.
    pub fn date_range(&self, anchor: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            ViewMode::All => None,
            ViewMode::Today => Some((anchor, anchor)),
            ViewMode::ThisWeek => {
                let monday =
                    anchor - Duration::days(anchor.weekday().num_days_from_monday() as i64);
                Some((monday, monday + Duration::days(6)))
            }
            ViewMode::ThisMonth => {
                let first = anchor.with_day(1)?;
                let next_month = if anchor.month() == 12 {
                    NaiveDate::from_ymd_opt(anchor.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(anchor.year(), anchor.month() + 1, 1)?
                };
                Some((first, next_month - Duration::days(1)))
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::All => "all",
            ViewMode::Today => "today",
            ViewMode::ThisWeek => "week",
            ViewMode::ThisMonth => "month",
        }
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(ViewMode::All),
            "today" => Ok(ViewMode::Today),
            "week" | "this_week" => Ok(ViewMode::ThisWeek),
            "month" | "this_month" => Ok(ViewMode::ThisMonth),
            other => Err(format!("unknown view '{}'", other)),
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for scheduling decisions and calendar views
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock; `today` is the UTC date of the current instant.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Noon UTC on the given day
    pub fn on_date(date: NaiveDate) -> Self {
        let noon = date
            .and_hms_opt(12, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis())
            .unwrap_or_default();
        Self::at(noon)
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn today(&self) -> NaiveDate {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .map(|dt| dt.date_naive())
            .unwrap_or_default()
    }
}
