// src/storage/ipc_bridge.rs
// Request/response channel between the desktop adapter and the privileged
// host task that owns the SQLite connection.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::relational::ExecOutcome;
use super::sql_builder::split_script;
use super::sqlite_rows::{bind_values, map_sqlx_error, row_to_record};
use super::{Record, StorageError};

const BACKEND: &str = "desktop-sqlite";
const CHANNEL_CAPACITY: usize = 64;

/// Requests the host understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostRequest {
    Ping,
    Execute { sql: String, params: Vec<Value> },
    Select { sql: String, params: Vec<Value> },
    ExecuteScript { script: String },
    Close,
}

impl HostRequest {
    fn name(&self) -> &'static str {
        match self {
            HostRequest::Ping => "ping",
            HostRequest::Execute { .. } => "execute",
            HostRequest::Select { .. } => "select",
            HostRequest::ExecuteScript { .. } => "execute_script",
            HostRequest::Close => "close",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostResponse {
    Pong,
    Executed(ExecOutcome),
    Rows(Vec<Record>),
    Done,
}

struct Envelope {
    request_id: Uuid,
    request: HostRequest,
    reply: oneshot::Sender<Result<HostResponse, StorageError>>,
}

/// Client side of the bridge. Cheap to clone; every clone talks to the same host.
#[derive(Clone, Debug)]
pub struct IpcBridge {
    sender: mpsc::Sender<Envelope>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("request_id", &self.request_id)
            .field("request", &self.request.name())
            .finish()
    }
}

impl IpcBridge {
    /// Send one request and wait for the host's reply.
    pub async fn invoke(&self, request: HostRequest) -> Result<HostResponse, StorageError> {
        let (reply, response) = oneshot::channel();
        let envelope = Envelope {
            request_id: Uuid::new_v4(),
            request,
            reply,
        };
        self.sender.send(envelope).await.map_err(|_| bridge_closed())?;
        response.await.map_err(|_| bridge_closed())?
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        match self.invoke(HostRequest::Ping).await? {
            HostResponse::Pong => Ok(()),
            other => Err(unexpected_response("ping", &other)),
        }
    }

    pub async fn execute(&self, sql: String, params: Vec<Value>) -> Result<ExecOutcome, StorageError> {
        match self.invoke(HostRequest::Execute { sql, params }).await? {
            HostResponse::Executed(outcome) => Ok(outcome),
            other => Err(unexpected_response("execute", &other)),
        }
    }

    pub async fn select(&self, sql: String, params: Vec<Value>) -> Result<Vec<Record>, StorageError> {
        match self.invoke(HostRequest::Select { sql, params }).await? {
            HostResponse::Rows(rows) => Ok(rows),
            other => Err(unexpected_response("select", &other)),
        }
    }

    pub async fn execute_script(&self, script: String) -> Result<(), StorageError> {
        match self.invoke(HostRequest::ExecuteScript { script }).await? {
            HostResponse::Done => Ok(()),
            other => Err(unexpected_response("execute_script", &other)),
        }
    }

    pub async fn close(&self) -> Result<(), StorageError> {
        match self.invoke(HostRequest::Close).await? {
            HostResponse::Done => Ok(()),
            other => Err(unexpected_response("close", &other)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

fn bridge_closed() -> StorageError {
    StorageError::DatabaseUnavailable {
        reason: "host bridge closed".to_string(),
    }
}

fn unexpected_response(command: &str, response: &HostResponse) -> StorageError {
    StorageError::BackendError {
        backend: BACKEND.to_string(),
        error: format!("unexpected response to {}: {:?}", command, response),
    }
}

/// The privileged side: owns the single connection and serves requests one
/// at a time, so statements inside a BEGIN/COMMIT pair never interleave with
/// another connection's.
pub struct SqliteHost;

impl SqliteHost {
    /// Open `database` (a file path or `:memory:`) and start serving.
    pub async fn spawn(database: &str) -> Result<(IpcBridge, JoinHandle<()>), StorageError> {
        let connection = Self::connect(database).await?;
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(Self::serve(connection, receiver));
        tracing::info!(database, "SQLite host started");
        Ok((IpcBridge { sender }, handle))
    }

    async fn connect(database: &str) -> Result<SqliteConnection, StorageError> {
        let in_memory = database == ":memory:" || database.is_empty();
        let mut options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
        } else {
            let path = std::path::PathBuf::from(database);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| StorageError::BackendError {
                        backend: BACKEND.to_string(),
                        error: format!("Failed to create db dir: {}", e),
                    })?;
                }
            }
            Ok(SqliteConnectOptions::new().filename(path).create_if_missing(true))
        }
        .map_err(|e| map_sqlx_error(BACKEND, e))?
        .foreign_keys(true);

        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        options.connect().await.map_err(|e| map_sqlx_error(BACKEND, e))
    }

    async fn serve(mut connection: SqliteConnection, mut receiver: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = receiver.recv().await {
            let command = envelope.request.name();
            tracing::debug!(request_id = %envelope.request_id, command, "host request");

            let closing = matches!(envelope.request, HostRequest::Close);
            let result = Self::handle(&mut connection, envelope.request).await;
            if let Err(e) = &result {
                tracing::debug!(request_id = %envelope.request_id, command, error = %e, "host request failed");
            }
            // The caller may have gone away; nothing to do then.
            let _ = envelope.reply.send(result);

            if closing {
                break;
            }
        }

        if let Err(e) = connection.close().await {
            tracing::warn!(error = %e, "SQLite host close failed");
        }
        tracing::info!("SQLite host stopped");
    }

    async fn handle(connection: &mut SqliteConnection, request: HostRequest) -> Result<HostResponse, StorageError> {
        match request {
            HostRequest::Ping => Ok(HostResponse::Pong),
            HostRequest::Execute { sql, params } => {
                let result = bind_values(sqlx::query(&sql), &params)
                    .execute(&mut *connection)
                    .await
                    .map_err(|e| map_sqlx_error(BACKEND, e))?;
                Ok(HostResponse::Executed(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: result.last_insert_rowid(),
                }))
            }
            HostRequest::Select { sql, params } => {
                let rows = bind_values(sqlx::query(&sql), &params)
                    .fetch_all(&mut *connection)
                    .await
                    .map_err(|e| map_sqlx_error(BACKEND, e))?;
                let records = rows
                    .iter()
                    .map(row_to_record)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| map_sqlx_error(BACKEND, e))?;
                Ok(HostResponse::Rows(records))
            }
            HostRequest::ExecuteScript { script } => {
                for statement in split_script(&script) {
                    sqlx::query(&statement)
                        .execute(&mut *connection)
                        .await
                        .map_err(|e| map_sqlx_error(BACKEND, e))?;
                }
                Ok(HostResponse::Done)
            }
            HostRequest::Close => Ok(HostResponse::Done),
        }
    }
}
