//! SQLite service registry and probe log store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;
use crate::state;

/// Largest page the log listing will return.
const MAX_LOG_LIMIT: i64 = 1000;

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
}

/// Thread-safe registry store.
///
/// The connection mutex plus per-call transactions serialize concurrent
/// `update_state` calls on the same row, which is what keeps the
/// status/counter invariants true under multiple workers.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store. Used by tests and available for ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Services ---

    /// Validate and persist a new service. New services start UP with a
    /// zeroed failure counter and no first-probe gate.
    pub fn register(&self, req: &NewService) -> Result<Service, StoreError> {
        if req.name.is_empty() {
            return Err(StoreError::Validation("service name is empty".to_string()));
        }
        if req.url.is_empty() {
            return Err(StoreError::Validation("service url is empty".to_string()));
        }
        let protocol = Protocol::parse(&req.protocol)
            .ok_or_else(|| StoreError::Validation(format!("invalid protocol: {}", req.protocol)))?;
        let method = Method::parse(&req.method)
            .ok_or_else(|| StoreError::Validation(format!("invalid method: {}", req.method)))?;
        if req.timeout_secs <= 0 {
            return Err(StoreError::Validation("timeout must be positive".to_string()));
        }
        if req.interval_secs <= 0 {
            return Err(StoreError::Validation("interval must be positive".to_string()));
        }
        if req.failure_threshold < 1 {
            return Err(StoreError::Validation(
                "failure threshold must be at least 1".to_string(),
            ));
        }

        let now = Utc::now();
        let conn = self.conn.lock().unwrap();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM services WHERE name = ?1)",
            params![req.name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::Validation(format!(
                "service name already registered: {}",
                req.name
            )));
        }

        conn.execute(
            "INSERT INTO services (name, url, protocol, method, timeout_secs, interval_secs, \
             failure_threshold, status, consecutive_failures, last_checked_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'UP', 0, NULL, ?8, ?8)",
            params![
                req.name,
                req.url,
                protocol.as_str(),
                method.as_str(),
                req.timeout_secs,
                req.interval_secs,
                req.failure_threshold,
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Service {
            id,
            name: req.name.clone(),
            url: req.url.clone(),
            protocol,
            method,
            timeout_secs: req.timeout_secs,
            interval_secs: req.interval_secs,
            failure_threshold: req.failure_threshold,
            status: Status::Up,
            consecutive_failures: 0,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Snapshot of all registered services.
    pub fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM services", SERVICE_COLUMNS))?;
        let services = stmt
            .query_map([], service_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(services)
    }

    /// Point lookup by unique name.
    pub fn get_service_by_name(&self, name: &str) -> Result<Service, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM services WHERE name = ?1", SERVICE_COLUMNS),
            params![name],
            service_from_row,
        )
        .map_err(not_found_or_sqlite)
    }

    /// Point lookup by id.
    pub fn get_service(&self, id: i64) -> Result<Service, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM services WHERE id = ?1", SERVICE_COLUMNS),
            params![id],
            service_from_row,
        )
        .map_err(not_found_or_sqlite)
    }

    // --- Probe logs ---

    /// Append one probe outcome. Unconditional insert.
    pub fn append_log(
        &self,
        service_id: i64,
        status: Status,
        status_code: i64,
        response_time_ms: i64,
        error_message: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO probe_logs (service_id, status, status_code, response_time_ms, error_message, checked_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                service_id,
                status.as_str(),
                status_code,
                response_time_ms,
                error_message,
                checked_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Page of probe logs for a service, newest first.
    ///
    /// A non-positive limit falls back to 100; the cap is 1000.
    pub fn list_logs(
        &self,
        service_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ProbeLog>, StoreError> {
        let limit = if limit <= 0 { 100 } else { limit.min(MAX_LOG_LIMIT) };
        let offset = offset.max(0);

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, service_id, status, status_code, response_time_ms, error_message, checked_at \
             FROM probe_logs WHERE service_id = ?1 ORDER BY checked_at DESC LIMIT ?2 OFFSET ?3",
        )?;
        let logs = stmt
            .query_map(params![service_id, limit, offset], |row| {
                let status: String = row.get(2)?;
                let checked_at: String = row.get(6)?;
                Ok(ProbeLog {
                    id: row.get(0)?,
                    service_id: row.get(1)?,
                    status: Status::parse(&status).unwrap_or(Status::Down),
                    status_code: row.get(3)?,
                    response_time_ms: row.get(4)?,
                    error_message: row.get(5)?,
                    checked_at: parse_db_time(&checked_at).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(logs)
    }

    // --- State updates ---

    /// Read-modify-write one service's liveness state in a single
    /// transaction. The worker passes only the probe verdict; the state
    /// machine decides the rest.
    ///
    /// Returns the updated record and the transition when the status crossed.
    pub fn update_state(
        &self,
        service_id: i64,
        success: bool,
    ) -> Result<(Service, Option<StateChange>), StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let mut service = tx
            .query_row(
                &format!("SELECT {} FROM services WHERE id = ?1", SERVICE_COLUMNS),
                params![service_id],
                service_from_row,
            )
            .map_err(not_found_or_sqlite)?;

        let change = state::advance(&mut service, success, now);

        tx.execute(
            "UPDATE services SET status=?1, consecutive_failures=?2, last_checked_at=?3, updated_at=?4 \
             WHERE id=?5",
            params![
                service.status.as_str(),
                service.consecutive_failures,
                now.to_rfc3339(),
                now.to_rfc3339(),
                service.id,
            ],
        )?;
        tx.commit()?;

        Ok((service, change))
    }

    /// Backdate a service's last check. Test scaffolding for due-time cases.
    #[cfg(test)]
    pub fn set_last_checked(&self, id: i64, when: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE services SET last_checked_at=?1 WHERE id=?2",
            params![when.to_rfc3339(), id],
        )?;
        Ok(())
    }
}

const SERVICE_COLUMNS: &str = "id, name, url, protocol, method, timeout_secs, interval_secs, \
     failure_threshold, status, consecutive_failures, last_checked_at, created_at, updated_at";

fn service_from_row(row: &Row) -> SqlResult<Service> {
    let protocol: String = row.get(3)?;
    let method: String = row.get(4)?;
    let status: String = row.get(8)?;
    let last_checked_at: Option<String> = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        protocol: Protocol::parse(&protocol).unwrap_or(Protocol::Http),
        method: Method::parse(&method).unwrap_or(Method::Get),
        timeout_secs: row.get(5)?,
        interval_secs: row.get(6)?,
        failure_threshold: row.get(7)?,
        status: Status::parse(&status).unwrap_or(Status::Up),
        consecutive_failures: row.get(9)?,
        last_checked_at: last_checked_at.as_deref().and_then(parse_db_time),
        created_at: parse_db_time(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_db_time(&updated_at).unwrap_or_else(Utc::now),
    })
}

fn not_found_or_sqlite(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
