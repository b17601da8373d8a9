//! Script host reporting to the server log

use pawnbridge_engine::bridge::ConnectionId;
use pawnbridge_engine::db::{QueryResult, RequestId};
use pawnbridge_engine::{BridgeContext, ProgramId, ScriptHost};
use pawnbridge_sdk::{ArgumentBag, Callback, Cell};
use tracing::{debug, info, trace, warn};

/// Host used while no script runtime is attached.
///
/// Every event is logged and no call is ever handled, so the program behaves
/// exactly as it would without the plugin.
#[derive(Debug, Default)]
pub struct ConsoleHost {
    intercepted: usize,
    program: Option<ProgramId>,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls seen, deferred ones included
    pub fn intercepted(&self) -> usize {
        self.intercepted
    }

    /// The loaded program
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }
}

impl ScriptHost for ConsoleHost {
    fn on_program_changed(&mut self, _context: &mut BridgeContext<'_>, program: Option<ProgramId>) {
        self.program = program;
        match program {
            Some(_) => info!("Program loaded"),
            None => info!("Program unloaded"),
        }
    }

    fn on_callback(
        &mut self,
        _context: &mut BridgeContext<'_>,
        callback: &Callback,
        arguments: &ArgumentBag,
    ) -> bool {
        self.intercepted += 1;
        debug!(call = %callback.representation(arguments), "Intercepted");
        false
    }

    fn on_player_update(&mut self, _context: &mut BridgeContext<'_>, player_id: Cell) {
        trace!(player_id, "Player update");
    }

    fn on_deferred_callback(
        &mut self,
        _context: &mut BridgeContext<'_>,
        callback: &Callback,
        arguments: &ArgumentBag,
    ) {
        self.intercepted += 1;
        debug!(call = %callback.representation(arguments), "Intercepted (deferred)");
    }

    fn did_connect(
        &mut self,
        _context: &mut BridgeContext<'_>,
        connection: ConnectionId,
        request: RequestId,
        succeeded: bool,
        error_code: i32,
        error_message: &str,
    ) {
        if succeeded {
            info!(connection, request, "Database connected");
        } else {
            warn!(connection, request, error_code, error_message, "Database connection failed");
        }
    }

    fn did_query(
        &mut self,
        _context: &mut BridgeContext<'_>,
        connection: ConnectionId,
        request: RequestId,
        result: QueryResult,
    ) {
        debug!(connection, request, rows = result.row_count(), "Query finished");
    }

    fn did_query_fail(
        &mut self,
        _context: &mut BridgeContext<'_>,
        connection: ConnectionId,
        request: RequestId,
        error_code: i32,
        error_message: &str,
    ) {
        warn!(connection, request, error_code, error_message, "Query failed");
    }
}
