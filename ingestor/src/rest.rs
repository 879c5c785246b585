use crate::db::{
    count_access_since, latest_telemetry, list_access, list_telemetry, load_access_state, LogFilter,
};
use crate::errors::{Error, ValidationError};
use crate::metrics::{ACCEPTED_TOTAL, EVENTS_TOTAL, REJECTED_TOTAL};
use crate::model::{
    Ack, AccessLogRecord, AccessStateResponse, ErrorBody, ListResponse, SortOrder, Summary,
    TelemetryRecord,
};
use crate::validate::{parse_json_fields, parse_record, Fields, ThresholdDefaults};
use crate::writer::LogSink;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{error, info, warn};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;
const SUMMARY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone)]
struct AppState {
    sink: LogSink,
    thresholds: ThresholdDefaults,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    device_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(default)]
    order: SortOrder,
}

impl ListQuery {
    fn filter(self) -> LogFilter {
        LogFilter {
            device_id: self.device_id,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            offset: self.offset.unwrap_or(0),
            order: self.order,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    device_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    device_id: Option<String>,
}

/// Turns axum's plain-text query rejection into a validation error so it gets
/// the usual JSON body.
fn query<T: DeserializeOwned>(
    extracted: Result<Query<T>, QueryRejection>,
) -> Result<T, ValidationError> {
    extracted
        .map(|Query(params)| params)
        .map_err(|rejection| ValidationError::Query(rejection.body_text()))
}

pub fn create_router(sink: LogSink, thresholds: ThresholdDefaults) -> Router {
    let state = AppState { sink, thresholds };

    Router::new()
        .route("/api/v1/log", get(log_from_query).post(log_from_body))
        .route("/api/v1/telemetry", get(get_telemetry))
        .route("/api/v1/access", get(get_access))
        .route("/api/v1/access/state", get(get_access_state))
        .route("/api/v1/summary", get(get_summary))
        .route("/health", get(health))
        .with_state(state)
}

async fn log_from_query(
    State(state): State<AppState>,
    fields: Result<Query<Fields>, QueryRejection>,
) -> Result<Json<Ack>, ApiError> {
    ingest(&state, query(fields)).await
}

/// JSON body variant. `sheet` may also be given in the query string.
async fn log_from_body(
    State(state): State<AppState>,
    params: Result<Query<Fields>, QueryRejection>,
    body: Bytes,
) -> Result<Json<Ack>, ApiError> {
    let fields = query(params).and_then(|params| {
        let mut fields = parse_json_fields(&body)?;
        for (key, value) in params {
            fields.entry(key).or_insert(value);
        }
        Ok(fields)
    });
    ingest(&state, fields).await
}

async fn ingest(
    state: &AppState,
    fields: Result<Fields, ValidationError>,
) -> Result<Json<Ack>, ApiError> {
    EVENTS_TOTAL.inc();

    let record = match fields.and_then(|f| parse_record(&f, &state.thresholds)) {
        Ok(record) => record,
        Err(e) => {
            REJECTED_TOTAL.inc();
            warn!("Rejected event: {}", e);
            return Err(Error::Validation(e).into());
        }
    };

    let device_id = record.device_id().to_string();
    let ack = state.sink.append(record).await?;
    ACCEPTED_TOTAL.inc();
    info!("Logged {} row {} from {}", ack.sheet, ack.row, device_id);

    Ok(Json(ack))
}

async fn get_telemetry(
    State(state): State<AppState>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse<TelemetryRecord>>, ApiError> {
    let filter = query(params)?.filter();
    let data = list_telemetry(state.sink.pool(), &filter).await?;

    Ok(Json(ListResponse {
        total: data.len(),
        data,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

async fn get_access(
    State(state): State<AppState>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse<AccessLogRecord>>, ApiError> {
    let filter = query(params)?.filter();
    let data = list_access(state.sink.pool(), &filter).await?;

    Ok(Json(ListResponse {
        total: data.len(),
        data,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

async fn get_access_state(
    State(state): State<AppState>,
    params: Result<Query<StateQuery>, QueryRejection>,
) -> Result<Json<AccessStateResponse>, ApiError> {
    let params = query(params)?;
    let device_id = params
        .device_id
        .ok_or_else(|| ValidationError::MissingField("device_id".to_string()))
        .map_err(Error::Validation)?;
    let user_id = params
        .user_id
        .ok_or_else(|| ValidationError::MissingField("user_id".to_string()))
        .map_err(Error::Validation)?;

    let access = load_access_state(state.sink.pool(), &device_id, &user_id).await?;

    Ok(Json(AccessStateResponse {
        lockout_remaining: access.lockout_remaining(Utc::now().timestamp()),
        device_id,
        user_id,
        state: access,
    }))
}

async fn get_summary(
    State(state): State<AppState>,
    params: Result<Query<SummaryQuery>, QueryRejection>,
) -> Result<Json<Summary>, ApiError> {
    let SummaryQuery { device_id } = query(params)?;
    let since = Utc::now() - Duration::hours(SUMMARY_WINDOW_HOURS);

    let pool = state.sink.pool();
    let latest = latest_telemetry(pool, device_id.as_deref()).await?;
    let access = count_access_since(pool, device_id.as_deref(), since).await?;

    Ok(Json(Summary {
        device_id,
        since,
        latest_telemetry: latest,
        access,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::WriterUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("API error: {}", self.0);
        }

        let body = ErrorBody {
            ok: false,
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
