use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use diary_reminders::{ReminderAction, ReminderScheduler};
use diary_schemas::{parse_date, Clock, DiaryDraft, DiaryRecord, RecordId, ViewMode};
use diary_store::{DiaryQuery, StoreHandle};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub scheduler: Arc<ReminderScheduler>,
    pub clock: Arc<dyn Clock>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route(
            "/diaries",
            get(list_diaries).post(create_diary).delete(clear_diaries),
        )
        .route(
            "/diaries/:id",
            get(get_diary).put(update_diary).delete(delete_diary),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "diary",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn get_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let info = state.store.info().await?;
    Ok(Json(info))
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    view: Option<String>,
    date: Option<String>,
    q: Option<String>,
}

impl ListParams {
    fn into_query(self) -> ApiResult<DiaryQuery> {
        let view = match self.view.as_deref() {
            Some(raw) => raw.parse::<ViewMode>().map_err(ApiError::BadRequest)?,
            None => ViewMode::All,
        };

        let mut query = DiaryQuery::view(view);
        if let Some(raw) = self.date.as_deref().filter(|d| !d.trim().is_empty()) {
            let date = parse_date(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid date '{}'", raw)))?;
            query = query.with_date(date);
        }
        if let Some(keyword) = self.q {
            query = query.with_keyword(keyword);
        }
        Ok(query)
    }
}

async fn list_diaries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<DiaryRecord>>> {
    let query = params.into_query()?;
    let records = state.store.query(query, state.clock.today()).await?;
    Ok(Json(records))
}

async fn get_diary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DiaryRecord>> {
    let id = RecordId(id);
    state
        .store
        .get_by_id(id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("diary {}", id)))
}

async fn create_diary(
    State(state): State<AppState>,
    Json(draft): Json<DiaryDraft>,
) -> ApiResult<impl IntoResponse> {
    let record = draft.into_record(state.clock.now_ms())?;
    save_record(&state, record.clone()).await?;

    info!("Created diary {}", record.id);
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_diary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<DiaryDraft>,
) -> ApiResult<Json<DiaryRecord>> {
    let id = RecordId(id);
    let existing = state
        .store
        .get_by_id(id.clone())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("diary {}", id)))?;

    let record = draft.apply_to(&existing, state.clock.now_ms())?;
    save_record(&state, record.clone()).await?;

    info!("Updated diary {}", record.id);
    Ok(Json(record))
}

/// Store first, then reconcile the reminder. A failed write leaves the timer alone.
async fn save_record(state: &AppState, record: DiaryRecord) -> ApiResult<()> {
    let (ticket, write) = state
        .scheduler
        .begin_with(&record.id, || state.store.enqueue_put(record.clone()));

    if let Err(e) = write.await {
        state.scheduler.abandon(ticket);
        return Err(e.into());
    }

    let action = state.scheduler.on_save(ticket, &record);
    log_action(&record.id, &action);
    Ok(())
}

async fn delete_diary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = RecordId(id);
    let (ticket, write) = state
        .scheduler
        .begin_with(&id, || state.store.enqueue_delete(id.clone()));

    let deleted = match write.await {
        Ok(deleted) => deleted,
        Err(e) => {
            state.scheduler.abandon(ticket);
            return Err(e.into());
        }
    };

    // Cancel even when no row existed
    let action = state.scheduler.on_delete(ticket);
    log_action(&id, &action);

    info!("Deleted diary {} (existed: {})", id, deleted);
    Ok(Json(serde_json::json!({ "id": id, "deleted": deleted })))
}

/// Every known record gets a cancel ticket queued in the same step as the clear,
/// so a save issued afterwards is neither cleared nor cancelled.
async fn clear_diaries(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let (tickets, write) = state
        .scheduler
        .begin_all_with(|| state.store.enqueue_clear());

    let cleared = match write.await {
        Ok(cleared) => cleared,
        Err(e) => {
            for ticket in tickets {
                state.scheduler.abandon(ticket);
            }
            return Err(e.into());
        }
    };

    for ticket in tickets {
        let id = ticket.record_id().clone();
        let action = state.scheduler.on_delete(ticket);
        log_action(&id, &action);
    }

    info!("Cleared {} diaries", cleared);
    Ok(Json(serde_json::json!({ "cleared": cleared })))
}

fn log_action(id: &RecordId, action: &ReminderAction) {
    debug!("Reminder action for {}: {:?}", id, action);
}
