//! Messages exchanged between a connection host and its worker

use super::QueryResult;

/// Identifier handed out for connect and query requests.
///
/// Connect and query requests are numbered independently, both from 0.
pub type RequestId = u32;

/// Where and how to connect.
///
/// [`MysqlDriver`](super::MysqlDriver) uses every field, with a `port` of 0
/// meaning the default port. [`SqliteDriver`](super::SqliteDriver) only uses
/// `database`, as a file path (or `:memory:`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Server host name
    pub hostname: String,
    /// User to authenticate as
    pub username: String,
    /// Password of the user
    pub password: String,
    /// Database name, or file path
    pub database: String,
    /// Server port
    pub port: u16,
}

impl ConnectionInfo {
    /// Connection information for a database file
    pub fn file(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }
}

/// Request to connect
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Connection request id
    pub id: RequestId,
    /// Where to connect
    pub info: ConnectionInfo,
}

/// Request to run a query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Query request id
    pub id: RequestId,
    /// The statement
    pub query: String,
}

/// Outcome of a connection attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionAttempt {
    /// Connection request id
    pub id: RequestId,
    /// Whether the connection was established
    pub succeeded: bool,
    /// Driver error code, 0 on success
    pub error_code: i32,
    /// Driver error message, empty on success
    pub error_message: String,
}

/// A query that succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySuccess {
    /// Query request id
    pub id: RequestId,
    /// Rows or statement counts
    pub result: QueryResult,
}

/// A query that failed
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    /// Query request id
    pub id: RequestId,
    /// Driver error code
    pub error_code: i32,
    /// Driver error message
    pub error_message: String,
}
