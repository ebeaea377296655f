use super::{ColumnSchema, Database, QueryResult, ResultColumn, SchemaDescription, TableSchema};
use crate::error::{AppError, AppResult};
use crate::logger::{LogLevel, LOGGER};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// How long a query may wait for a pooled connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_CONNECTIONS: u32 = 4;

/// SQLite VM steps between deadline checks
const PROGRESS_INTERVAL_OPS: i32 = 1000;

/// SQLite database backed by an `sqlx` connection pool
///
/// Every query acquires its own pooled connection inside the timed future,
/// so the connection goes back to the pool on success, error, timeout and
/// cancellation alike. A progress handler interrupts the statement at the
/// deadline, which keeps a timed-out query from holding its connection.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Connect and verify the database is reachable
    ///
    /// # Errors
    /// Returns `AppError::ConfigError` for an invalid URL or an unreachable
    /// database. A read-only connection never creates a missing file.
    pub async fn connect(url: &str, read_only: bool) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::ConfigError(format!("invalid database url '{}': {}", url, e)))?
            .read_only(read_only);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| AppError::ConfigError(format!("failed to open {}: {}", url, e)))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| AppError::ConfigError(format!("database check failed: {}", e)))?;

        LOGGER.log(
            LogLevel::Info,
            &format!("Connected to {} (read_only: {})", url, read_only),
            "database",
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn load_schema(&self) -> AppResult<SchemaDescription> {
        let mut conn = self.pool.acquire().await?;
        // A query abandoned by a timeout may have left its deadline behind
        clear_deadline(&mut conn).await?;

        let table_names: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for (name,) in table_names {
            let pragma = format!("PRAGMA table_info(\"{}\")", name.replace('"', "\"\""));
            let rows = sqlx::query(&pragma).fetch_all(&mut *conn).await?;

            let mut columns = Vec::with_capacity(rows.len());
            for row in rows {
                let data_type: String = row.try_get("type")?;
                columns.push(ColumnSchema {
                    name: row.try_get("name")?,
                    data_type: if data_type.is_empty() {
                        "ANY".to_string()
                    } else {
                        data_type
                    },
                    nullable: row.try_get::<i64, _>("notnull")? == 0,
                    primary_key: row.try_get::<i64, _>("pk")? > 0,
                });
            }
            tables.push(TableSchema { name, columns });
        }

        LOGGER.log(
            LogLevel::Info,
            &format!("Loaded schema with {} tables", tables.len()),
            "database",
        );

        Ok(SchemaDescription { tables })
    }

    async fn execute(&self, query: &str, timeout: Duration) -> AppResult<QueryResult> {
        let started = Instant::now();
        let deadline = started + timeout;
        let pool = &self.pool;

        let work = async move {
            let mut conn = pool.acquire().await?;
            set_deadline(&mut conn, deadline).await?;
            let fetched = fetch(&mut conn, query).await.map_err(|e| {
                if Instant::now() >= deadline {
                    AppError::QueryTimeout(timeout)
                } else {
                    AppError::from(e)
                }
            });
            clear_deadline(&mut conn).await?;
            fetched
        };

        let outcome = match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AppError::QueryTimeout(timeout)),
        };
        let (columns, rows) = match outcome {
            Err(AppError::QueryTimeout(_)) => {
                LOGGER.log(
                    LogLevel::Warn,
                    &format!("Query timed out after {:?}: {}", timeout, query),
                    "database",
                );
                return Err(AppError::QueryTimeout(timeout));
            }
            other => other?,
        };

        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| decode_value(row, idx)).collect())
            .collect();

        LOGGER.log(
            LogLevel::Info,
            &format!(
                "Query returned {} rows in {}ms",
                rows.len(),
                started.elapsed().as_millis()
            ),
            "database",
        );

        Ok(QueryResult {
            query: query.to_string(),
            columns,
            rows,
        })
    }
}

/// Interrupt any statement on `conn` still running at `deadline`
///
/// The handler stays installed when the caller's future is dropped, so a
/// statement abandoned by a timeout stops and frees its connection.
async fn set_deadline(conn: &mut SqliteConnection, deadline: Instant) -> Result<(), sqlx::Error> {
    let mut handle = conn.lock_handle().await?;
    handle.set_progress_handler(PROGRESS_INTERVAL_OPS, move || Instant::now() < deadline);
    Ok(())
}

async fn clear_deadline(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    conn.lock_handle().await?.remove_progress_handler();
    Ok(())
}

async fn fetch(
    conn: &mut SqliteConnection,
    query: &str,
) -> Result<(Vec<ResultColumn>, Vec<SqliteRow>), sqlx::Error> {
    let rows: Vec<SqliteRow> = sqlx::query(query).fetch_all(&mut *conn).await?;
    let columns = match rows.first() {
        Some(first) => columns_of(first),
        None => {
            let described = (&mut *conn).describe(query).await?;
            described
                .columns()
                .iter()
                .map(|c| ResultColumn {
                    name: c.name().to_string(),
                    type_name: c.type_info().name().to_string(),
                })
                .collect()
        }
    };
    Ok((columns, rows))
}

fn columns_of(row: &SqliteRow) -> Vec<ResultColumn> {
    row.columns()
        .iter()
        .map(|c| ResultColumn {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
        })
        .collect()
}

/// Convert one SQLite value into JSON based on its storage class
fn decode_value(row: &SqliteRow, idx: usize) -> Value {
    let storage_class = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
        Err(_) => return Value::Null,
    };

    match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get_unchecked::<f64, _>(idx)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(idx)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
