//! Background database connections
//!
//! Each connection owns a worker thread performing blocking I/O. The main
//! thread talks to it only through [`SharedQueue`]s: requests go down
//! (connect, query), results come back up (connection attempts, query
//! successes, query failures) and are drained once per tick by
//! [`ConnectionHost::process_updates`].
//!
//! ```text
//! main thread                          worker thread
//!   ConnectionHost::connect ──▶ connect queue ──▶ Driver::connect
//!   ConnectionHost::query   ──▶ query queue   ──▶ Driver::query
//!   process_updates ◀── attempts / succeeded / failed queues
//! ```

mod client;
mod driver;
mod host;
mod messages;
mod mysql;
mod queue;
mod result;
mod sqlite;

pub use client::{ConnectionClient, ConnectionState};
pub use driver::{infer_column_type, Driver, DriverError};
pub use host::{ConnectionDelegate, ConnectionHost, ConnectionUpdate};
pub use messages::{
    ConnectRequest, ConnectionAttempt, ConnectionInfo, QueryFailure, QueryRequest, QuerySuccess,
    RequestId,
};
pub use queue::SharedQueue;
pub use result::{Column, ColumnType, FieldValue, QueryResult};
pub use self::mysql::MysqlDriver;
pub use sqlite::SqliteDriver;

use thiserror::Error;

/// Errors raised when managing connections
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The worker thread could not be started
    #[error("Failed to spawn the connection thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The connection has been closed
    #[error("The connection has been closed")]
    Closed,
}
