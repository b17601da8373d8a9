//! Main-thread side of a connection

use tracing::debug;

use super::{
    ConnectRequest, ConnectionClient, ConnectionInfo, ConnectionState, DatabaseError, Driver,
    QueryRequest, QueryResult, RequestId,
};
use crate::config::DatabaseConfig;

/// Receives the results of a connection's requests on the main thread.
pub trait ConnectionDelegate {
    /// A connection attempt finished
    fn did_connect(
        &mut self,
        request: RequestId,
        succeeded: bool,
        error_code: i32,
        error_message: &str,
    );

    /// A query succeeded
    fn did_query(&mut self, request: RequestId, result: QueryResult);

    /// A query failed
    fn did_query_fail(&mut self, request: RequestId, error_code: i32, error_message: &str);
}

/// A result taken from the worker's queues
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    /// A connection attempt finished
    #[allow(missing_docs)]
    Connected {
        request: RequestId,
        succeeded: bool,
        error_code: i32,
        error_message: String,
    },
    /// A query succeeded
    #[allow(missing_docs)]
    QuerySucceeded {
        request: RequestId,
        result: QueryResult,
    },
    /// A query failed
    #[allow(missing_docs)]
    QueryFailed {
        request: RequestId,
        error_code: i32,
        error_message: String,
    },
}

impl ConnectionUpdate {
    /// Hand the update to `delegate`
    pub fn dispatch(self, delegate: &mut dyn ConnectionDelegate) {
        match self {
            ConnectionUpdate::Connected {
                request,
                succeeded,
                error_code,
                error_message,
            } => delegate.did_connect(request, succeeded, error_code, &error_message),
            ConnectionUpdate::QuerySucceeded { request, result } => {
                delegate.did_query(request, result)
            }
            ConnectionUpdate::QueryFailed {
                request,
                error_code,
                error_message,
            } => delegate.did_query_fail(request, error_code, &error_message),
        }
    }
}

/// A database connection as seen from the main thread.
///
/// Requests never block; their results arrive through
/// [`ConnectionHost::process_updates`].
pub struct ConnectionHost {
    client: ConnectionClient,
    next_connection: RequestId,
    next_query: RequestId,
    closed: bool,
}

impl ConnectionHost {
    /// Start a connection worker for `driver`
    pub fn new(driver: Box<dyn Driver>, timing: DatabaseConfig) -> Result<Self, DatabaseError> {
        Ok(Self {
            client: ConnectionClient::spawn(driver, timing)?,
            next_connection: 0,
            next_query: 0,
            closed: false,
        })
    }

    /// Request a connection
    pub fn connect(&mut self, info: ConnectionInfo) -> Result<RequestId, DatabaseError> {
        if self.closed {
            return Err(DatabaseError::Closed);
        }

        let id = self.next_connection;
        self.next_connection = self.next_connection.wrapping_add(1);
        self.client.shared().connect.push(ConnectRequest { id, info });
        Ok(id)
    }

    /// Queue a query
    pub fn query(&mut self, query: impl Into<String>) -> Result<RequestId, DatabaseError> {
        if self.closed {
            return Err(DatabaseError::Closed);
        }

        let id = self.next_query;
        self.next_query = self.next_query.wrapping_add(1);
        self.client.shared().queries.push(QueryRequest {
            id,
            query: query.into(),
        });
        Ok(id)
    }

    /// Take at most one item from each result queue.
    pub fn take_updates(&mut self) -> Vec<ConnectionUpdate> {
        let shared = self.client.shared();
        let mut updates = Vec::new();

        if let Some(attempt) = shared.attempts.pop() {
            updates.push(ConnectionUpdate::Connected {
                request: attempt.id,
                succeeded: attempt.succeeded,
                error_code: attempt.error_code,
                error_message: attempt.error_message,
            });
        }

        if let Some(success) = shared.succeeded.pop() {
            updates.push(ConnectionUpdate::QuerySucceeded {
                request: success.id,
                result: success.result,
            });
        }

        if let Some(failure) = shared.failed.pop() {
            updates.push(ConnectionUpdate::QueryFailed {
                request: failure.id,
                error_code: failure.error_code,
                error_message: failure.error_message,
            });
        }

        updates
    }

    /// Deliver at most one item from each result queue to `delegate`.
    pub fn process_updates(&mut self, delegate: &mut dyn ConnectionDelegate) {
        for update in self.take_updates() {
            update.dispatch(delegate);
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Stop the worker after it ran the remaining queries.
    pub fn close(&mut self) {
        if !self.closed {
            debug!("Closing database connection");
            self.closed = true;
            self.client.stop();
        }
    }

    /// Whether [`ConnectionHost::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
