use crate::errors::Result;
use crate::model::{
    AccessCounts, AccessLogRecord, AccessResult, AccessState, Record, SortOrder, Stored, TelemetryRecord,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub async fn make_pool(database_url: &str) -> Result<SqlitePool> {
    info!("Connecting to database...");
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Each in-memory connection is its own database
    let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Appends one record in its own transaction and returns its row id.
///
/// Access records also update the `(device_id, user_id)` attempt state in the
/// same transaction.
pub async fn append_record(pool: &SqlitePool, record: &Record, received_at: DateTime<Utc>) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let row = match record {
        Record::Telemetry(t) => insert_telemetry(&mut *tx, t, received_at).await?,
        Record::Access(a) => {
            let row = insert_access(&mut *tx, a, received_at).await?;
            let state = AccessState::after_record(a, received_at.timestamp());
            upsert_access_state(&mut *tx, &a.device_id, &a.user_id, &state, received_at).await?;
            row
        }
    };

    tx.commit().await?;
    debug!("Appended {} row {}", record.sheet(), row);
    Ok(row)
}

async fn insert_telemetry(
    conn: &mut sqlx::SqliteConnection,
    t: &TelemetryRecord,
    received_at: DateTime<Utc>,
) -> Result<i64> {
    let query = r#"
        INSERT INTO telemetry_logs (
            received_at, device_timestamp, device_id, temperature_c, humidity_pct,
            fan1_on, fan2_on, alarm_state, door_state, wifi_rssi,
            warn_threshold, stage2_threshold
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

    let result = sqlx::query(query)
        .bind(received_at)
        .bind(&t.timestamp)
        .bind(&t.device_id)
        .bind(t.temperature_c)
        .bind(t.humidity_pct)
        .bind(t.fan1_on)
        .bind(t.fan2_on)
        .bind(t.alarm_state.as_str())
        .bind(t.door_state.as_str())
        .bind(i64::from(t.wifi_rssi))
        .bind(t.warn_threshold)
        .bind(t.stage2_threshold)
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_access(
    conn: &mut sqlx::SqliteConnection,
    a: &AccessLogRecord,
    received_at: DateTime<Utc>,
) -> Result<i64> {
    let query = r#"
        INSERT INTO access_logs (
            received_at, device_timestamp, device_id, user_id, display_name,
            result, reason, failed_count, lockout_until, door_state
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

    let result = sqlx::query(query)
        .bind(received_at)
        .bind(&a.timestamp)
        .bind(&a.device_id)
        .bind(&a.user_id)
        .bind(&a.display_name)
        .bind(a.result.as_str())
        .bind(a.reason.as_str())
        .bind(i64::from(a.failed_count))
        .bind(i64::from(a.lockout_until))
        .bind(a.door_state.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

async fn upsert_access_state(
    conn: &mut sqlx::SqliteConnection,
    device_id: &str,
    user_id: &str,
    state: &AccessState,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let query = r#"
        INSERT INTO access_state (device_id, user_id, failed_count, lockout_expires_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (device_id, user_id) DO UPDATE SET
            failed_count = excluded.failed_count,
            lockout_expires_at = excluded.lockout_expires_at,
            updated_at = excluded.updated_at
        "#;

    sqlx::query(query)
        .bind(device_id)
        .bind(user_id)
        .bind(i64::from(state.failed_count))
        .bind(state.lockout_expires_at)
        .bind(updated_at)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Attempt state for one pair, default when nothing was logged yet.
pub async fn load_access_state(pool: &SqlitePool, device_id: &str, user_id: &str) -> Result<AccessState> {
    let row = sqlx::query(
        "SELECT failed_count, lockout_expires_at FROM access_state WHERE device_id = ? AND user_id = ?",
    )
    .bind(device_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(AccessState {
            failed_count: to_u32(row.try_get("failed_count")?, "failed_count")?,
            lockout_expires_at: row.try_get("lockout_expires_at")?,
        }),
        None => Ok(AccessState::default()),
    }
}

/// Row filter for the read side. `SortOrder::Asc` is arrival order.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub device_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub order: SortOrder,
}

pub async fn list_telemetry(pool: &SqlitePool, filter: &LogFilter) -> Result<Vec<Stored<TelemetryRecord>>> {
    let query = format!(
        "SELECT id, received_at, device_timestamp, device_id, temperature_c, humidity_pct,
                fan1_on, fan2_on, alarm_state, door_state, wifi_rssi,
                warn_threshold, stage2_threshold
         FROM telemetry_logs
         {}
         ORDER BY id {}
         LIMIT ? OFFSET ?",
        where_clause(filter),
        order_by(filter.order)
    );

    let rows = bind_filter(sqlx::query(&query), filter).fetch_all(pool).await?;
    rows.iter().map(telemetry_from_row).collect()
}

pub async fn list_access(pool: &SqlitePool, filter: &LogFilter) -> Result<Vec<Stored<AccessLogRecord>>> {
    let query = format!(
        "SELECT id, received_at, device_timestamp, device_id, user_id, display_name,
                result, reason, failed_count, lockout_until, door_state
         FROM access_logs
         {}
         ORDER BY id {}
         LIMIT ? OFFSET ?",
        where_clause(filter),
        order_by(filter.order)
    );

    let rows = bind_filter(sqlx::query(&query), filter).fetch_all(pool).await?;
    rows.iter().map(access_from_row).collect()
}

/// Newest telemetry row, optionally for one device.
pub async fn latest_telemetry(pool: &SqlitePool, device_id: Option<&str>) -> Result<Option<Stored<TelemetryRecord>>> {
    let filter = LogFilter {
        device_id: device_id.map(str::to_string),
        limit: 1,
        offset: 0,
        order: SortOrder::Desc,
    };
    Ok(list_telemetry(pool, &filter).await?.into_iter().next())
}

/// Access outcomes received at or after `since`.
pub async fn count_access_since(
    pool: &SqlitePool,
    device_id: Option<&str>,
    since: DateTime<Utc>,
) -> Result<AccessCounts> {
    let query = format!(
        "SELECT result, COUNT(*) AS n
         FROM access_logs
         WHERE julianday(received_at) >= julianday(?){}
         GROUP BY result",
        if device_id.is_some() { " AND device_id = ?" } else { "" }
    );

    let mut q = sqlx::query(&query).bind(since);
    if let Some(device_id) = device_id {
        q = q.bind(device_id);
    }

    let mut counts = AccessCounts::default();
    for row in q.fetch_all(pool).await? {
        let result: AccessResult = decode_enum(&row, "result")?;
        let n: i64 = row.try_get("n")?;
        counts.add(result, u64::try_from(n).map_err(|e| decode_error("n", e))?);
    }
    Ok(counts)
}

fn order_by(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

fn where_clause(filter: &LogFilter) -> &'static str {
    if filter.device_id.is_some() {
        "WHERE device_id = ?"
    } else {
        ""
    }
}

fn bind_filter<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    filter: &'q LogFilter,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    if let Some(device_id) = &filter.device_id {
        query = query.bind(device_id);
    }
    query
        .bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(filter.offset).unwrap_or(i64::MAX))
}

fn telemetry_from_row(row: &SqliteRow) -> Result<Stored<TelemetryRecord>> {
    Ok(Stored {
        id: row.try_get("id")?,
        received_at: row.try_get("received_at")?,
        record: TelemetryRecord {
            device_id: row.try_get("device_id")?,
            temperature_c: row.try_get("temperature_c")?,
            humidity_pct: row.try_get("humidity_pct")?,
            fan1_on: row.try_get("fan1_on")?,
            fan2_on: row.try_get("fan2_on")?,
            alarm_state: decode_enum(row, "alarm_state")?,
            door_state: decode_enum(row, "door_state")?,
            wifi_rssi: i32::try_from(row.try_get::<i64, _>("wifi_rssi")?)
                .map_err(|e| decode_error("wifi_rssi", e))?,
            warn_threshold: row.try_get("warn_threshold")?,
            stage2_threshold: row.try_get("stage2_threshold")?,
            timestamp: row.try_get("device_timestamp")?,
        },
    })
}

fn access_from_row(row: &SqliteRow) -> Result<Stored<AccessLogRecord>> {
    Ok(Stored {
        id: row.try_get("id")?,
        received_at: row.try_get("received_at")?,
        record: AccessLogRecord {
            device_id: row.try_get("device_id")?,
            user_id: row.try_get("user_id")?,
            display_name: row.try_get("display_name")?,
            result: decode_enum(row, "result")?,
            reason: decode_enum(row, "reason")?,
            failed_count: to_u32(row.try_get("failed_count")?, "failed_count")?,
            lockout_until: to_u32(row.try_get("lockout_until")?, "lockout_until")?,
            door_state: decode_enum(row, "door_state")?,
            timestamp: row.try_get("device_timestamp")?,
        },
    })
}

fn decode_enum<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|_| decode_error(column, format!("unexpected value {:?}", raw)).into())
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|e| decode_error(column, e).into())
}

fn decode_error(column: &str, err: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: err.to_string().into(),
    }
}
