use chrono::NaiveDate;
use diary_schemas::{DiaryRecord, ViewMode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::Database;
use crate::error::Result;

/// A view selection with optional single-date and keyword filters.
///
/// All three predicates are independent and combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryQuery {
    #[serde(default)]
    pub view: ViewMode,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub keyword: Option<String>,
}

impl DiaryQuery {
    pub fn view(view: ViewMode) -> Self {
        Self {
            view,
            ..Self::default()
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }
}

impl Database {
    /// Run a view query anchored at `anchor` (normally today's date)
    pub fn query(&self, query: &DiaryQuery, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        let mut records = match query.view.date_range(anchor) {
            Some((start, end)) => self.list_by_date_range(start, end)?,
            None => self.list_all()?,
        };

        if let Some(date) = query.date {
            records.retain(|record| record.date == date);
        }

        if let Some(keyword) = query.keyword.as_deref().filter(|k| !k.trim().is_empty()) {
            records.retain(|record| record.matches_keyword(keyword));
        }

        debug!(
            "Query view={} date={:?} keyword={:?} returned {} records",
            query.view.as_str(),
            query.date,
            query.keyword,
            records.len()
        );
        Ok(records)
    }

    pub fn today(&self, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        self.query(&DiaryQuery::view(ViewMode::Today), anchor)
    }

    /// Monday to Sunday of the week containing `anchor`
    pub fn this_week(&self, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        self.query(&DiaryQuery::view(ViewMode::ThisWeek), anchor)
    }

    pub fn this_month(&self, anchor: NaiveDate) -> Result<Vec<DiaryRecord>> {
        self.query(&DiaryQuery::view(ViewMode::ThisMonth), anchor)
    }
}
