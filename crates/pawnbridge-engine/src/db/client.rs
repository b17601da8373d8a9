//! Connection worker thread

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{
    ConnectRequest, ConnectionAttempt, DatabaseError, Driver, QueryFailure, QueryRequest,
    QuerySuccess, SharedQueue,
};
use crate::config::DatabaseConfig;

static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection information received yet, or the last attempt failed
    Disconnected,
    /// A connection attempt is in progress
    Connecting,
    /// Connected to the database
    Connected,
    /// The worker has shut down
    Closed,
}

/// Queues and status shared with the worker thread
#[derive(Debug)]
pub(crate) struct ClientShared {
    pub(crate) connect: SharedQueue<ConnectRequest>,
    pub(crate) queries: SharedQueue<QueryRequest>,
    pub(crate) attempts: SharedQueue<ConnectionAttempt>,
    pub(crate) succeeded: SharedQueue<QuerySuccess>,
    pub(crate) failed: SharedQueue<QueryFailure>,
    state: Mutex<ConnectionState>,
}

impl ClientShared {
    fn new() -> Self {
        Self {
            connect: SharedQueue::new(),
            queries: SharedQueue::new(),
            attempts: SharedQueue::new(),
            succeeded: SharedQueue::new(),
            failed: SharedQueue::new(),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

/// Owner of a connection's worker thread.
pub struct ConnectionClient {
    shared: Arc<ClientShared>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ConnectionClient {
    /// Start a worker thread driving `driver`.
    pub fn spawn(driver: Box<dyn Driver>, timing: DatabaseConfig) -> Result<Self, DatabaseError> {
        let shared = Arc::new(ClientShared::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            driver,
            shared: shared.clone(),
            shutdown: shutdown.clone(),
            timing,
            request: None,
            connected: false,
            last_attempt: None,
            last_ping: None,
        };

        let handle = thread::Builder::new()
            .name(format!(
                "pawnbridge-db-{}",
                NEXT_WORKER.fetch_add(1, Ordering::Relaxed)
            ))
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            shutdown,
            handle: Some(handle),
        })
    }

    pub(crate) fn shared(&self) -> &ClientShared {
        &self.shared
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Whether the worker thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Acquire)
    }

    /// Stop the worker, letting it drain pending queries, and wait for it.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Database worker thread panicked");
                self.shared.set_state(ConnectionState::Closed);
            }
        }
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    driver: Box<dyn Driver>,
    shared: Arc<ClientShared>,
    shutdown: Arc<AtomicBool>,
    timing: DatabaseConfig,
    request: Option<ConnectRequest>,
    connected: bool,
    last_attempt: Option<Instant>,
    last_ping: Option<Instant>,
}

impl Worker {
    fn run(mut self) {
        while !self.shutdown.load(Ordering::Acquire) {
            if self.request.is_none() {
                match self.shared.connect.pop() {
                    Some(request) => self.request = Some(request),
                    None => thread::sleep(self.timing.poll_interval()),
                }
                continue;
            }

            if !self.connected {
                let due = self
                    .last_attempt
                    .map_or(true, |last| last.elapsed() > self.timing.retry_interval());
                if let (true, Some(request)) = (due, self.request.clone()) {
                    self.connect(&request);
                    self.last_attempt = Some(Instant::now());
                    continue;
                }

                thread::sleep(self.timing.poll_interval());
                continue;
            }

            let ping_due = self
                .last_ping
                .map_or(true, |last| last.elapsed() > self.timing.ping_interval());
            if ping_due {
                self.last_ping = Some(Instant::now());
                self.ping();
                continue;
            }

            if let Some(query) = self.shared.queries.pop() {
                self.execute(query, true);
            }

            thread::sleep(self.timing.poll_interval());
        }

        let mut executed = 0;
        while self.connected && executed < self.timing.drain_limit {
            let Some(query) = self.shared.queries.pop() else {
                break;
            };
            self.execute(query, false);
            executed += 1;
        }

        let dropped = self.shared.queries.len();
        if dropped > 0 {
            warn!(dropped, "Database queries dropped at shutdown");
        }

        if self.connected {
            self.driver.close();
        }
        self.shared.set_state(ConnectionState::Closed);
        debug!("Database worker shutting down");
    }

    fn connect(&mut self, request: &ConnectRequest) {
        self.shared.set_state(ConnectionState::Connecting);

        let attempt = match self.driver.connect(&request.info) {
            Ok(()) => {
                self.connected = true;
                self.last_ping = Some(Instant::now());
                self.shared.set_state(ConnectionState::Connected);
                info!(request = request.id, "Database connected");
                ConnectionAttempt {
                    id: request.id,
                    succeeded: true,
                    error_code: 0,
                    error_message: String::new(),
                }
            }
            Err(error) => {
                self.shared.set_state(ConnectionState::Disconnected);
                warn!(request = request.id, %error, "Database connection failed");
                ConnectionAttempt {
                    id: request.id,
                    succeeded: false,
                    error_code: error.code,
                    error_message: error.message,
                }
            }
        };

        self.shared.attempts.push(attempt);
    }

    fn ping(&mut self) {
        if let Err(error) = self.driver.ping() {
            warn!(%error, "Database connection lost");
            self.driver.close();
            self.connected = false;
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }

    /// Run a query; results of unreported queries are discarded.
    fn execute(&mut self, query: QueryRequest, report: bool) {
        let result = self.driver.query(&query.query);
        if !report {
            if let Err(error) = result {
                debug!(request = query.id, %error, "Query failed during shutdown");
            }
            return;
        }

        match result {
            Ok(result) => self.shared.succeeded.push(QuerySuccess {
                id: query.id,
                result,
            }),
            Err(error) => self.shared.failed.push(QueryFailure {
                id: query.id,
                error_code: error.code,
                error_message: error.message,
            }),
        }
    }
}
