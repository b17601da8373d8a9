//! The bridge controller
//!
//! [`Bridge`] owns every engine component and routes their events to a
//! [`ScriptHost`]. Each host callback receives a [`BridgeContext`] through
//! which the host calls back into the runtime: invoking natives, calling
//! publics, providing natives and using database connections.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::os::raw::c_int;
use std::rc::Rc;

use pawnbridge_sdk::{ArgumentBag, ArgumentValue, Callback, Cell, ScriptValue};
use tracing::{debug, warn};

use crate::amx::{AmxNativeInfo, ExportTable};
use crate::config::{BridgeConfig, DatabaseConfig, DatabaseDriver};
use crate::db::{
    ConnectionHost, ConnectionInfo, ConnectionUpdate, DatabaseError, Driver, MysqlDriver,
    QueryResult, RequestId, SqliteDriver,
};
use crate::definitions::{load_natives, CallbackTable, DefinitionError};
use crate::interceptor::{CallInterceptor, ExecuteDecision, InterceptDelegate};
use crate::invoke::{InvokeError, OutboundInvoker};
use crate::program::{Program, ProgramId};
use crate::provided::{NativeHandler, ProvideError, ReverseInvoker};
use crate::publics::{PublicCallError, PublicCaller};
use crate::registry::FunctionRegistry;

/// Identifier of a connection opened through [`BridgeContext::open_connection`]
pub type ConnectionId = u32;

/// Creates the driver of a new connection
pub type DriverFactory = Box<dyn Fn() -> Box<dyn Driver>>;

/// Factory for the configured driver
pub fn driver_factory(driver: DatabaseDriver) -> DriverFactory {
    match driver {
        DatabaseDriver::Mysql => Box::new(|| Box::new(MysqlDriver::new())),
        DatabaseDriver::Sqlite => Box::new(|| Box::new(SqliteDriver::new())),
    }
}

/// The script side of the bridge.
///
/// Only [`ScriptHost::on_callback`] is required; the other events are
/// ignored unless overridden.
#[allow(unused_variables)]
pub trait ScriptHost {
    /// A program was loaded, or the loaded one went away (`None`)
    fn on_program_changed(&mut self, context: &mut BridgeContext<'_>, program: Option<ProgramId>) {}

    /// An intercepted callback is about to run. Returns whether it was
    /// handled.
    fn on_callback(
        &mut self,
        context: &mut BridgeContext<'_>,
        callback: &Callback,
        arguments: &ArgumentBag,
    ) -> bool;

    /// `OnPlayerUpdate` is about to run; it cannot be suppressed
    fn on_player_update(&mut self, context: &mut BridgeContext<'_>, player_id: Cell) {}

    /// A deferred callback ran since the last frame
    fn on_deferred_callback(
        &mut self,
        context: &mut BridgeContext<'_>,
        callback: &Callback,
        arguments: &ArgumentBag,
    ) {
    }

    /// Once per server tick, after deferred callbacks and database results
    fn on_frame(&mut self, context: &mut BridgeContext<'_>) {}

    /// A connection attempt finished
    fn did_connect(
        &mut self,
        context: &mut BridgeContext<'_>,
        connection: ConnectionId,
        request: RequestId,
        succeeded: bool,
        error_code: i32,
        error_message: &str,
    ) {
    }

    /// A query succeeded
    fn did_query(
        &mut self,
        context: &mut BridgeContext<'_>,
        connection: ConnectionId,
        request: RequestId,
        result: QueryResult,
    ) {
    }

    /// A query failed
    fn did_query_fail(
        &mut self,
        context: &mut BridgeContext<'_>,
        connection: ConnectionId,
        request: RequestId,
        error_code: i32,
        error_message: &str,
    ) {
    }
}

/// Database connections opened by the script host
struct Connections {
    hosts: BTreeMap<ConnectionId, ConnectionHost>,
    next_id: ConnectionId,
    timing: DatabaseConfig,
    driver: DriverFactory,
}

impl Connections {
    fn open(&mut self, info: ConnectionInfo) -> Result<(ConnectionId, RequestId), DatabaseError> {
        let mut host = ConnectionHost::new((self.driver)(), self.timing.clone())?;
        let request = host.connect(info)?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.hosts.insert(id, host);
        debug!(connection = id, "Opened database connection");
        Ok((id, request))
    }

    fn take_updates(&mut self) -> Vec<(ConnectionId, ConnectionUpdate)> {
        let mut updates = Vec::new();
        for (id, host) in &mut self.hosts {
            updates.extend(host.take_updates().into_iter().map(|update| (*id, update)));
        }
        updates
    }

    fn close_all(&mut self) {
        for host in self.hosts.values_mut() {
            host.close();
        }
        self.hosts.clear();
    }
}

/// What the script host can do while handling an event.
pub struct BridgeContext<'a> {
    registry: &'a mut FunctionRegistry,
    invoker: &'a mut OutboundInvoker,
    provided: &'a Rc<RefCell<ReverseInvoker>>,
    publics: &'a mut PublicCaller,
    connections: &'a mut Connections,
}

impl BridgeContext<'_> {
    /// Call a native: `arguments` holds the name, the signature and the
    /// values, as accepted by [`OutboundInvoker::invoke`].
    pub fn invoke(&mut self, arguments: &[ScriptValue]) -> Result<ScriptValue, InvokeError> {
        self.invoker.invoke(&mut *self.registry, arguments)
    }

    /// Whether a native called `name` has been registered by the runtime
    pub fn native_exists(&self, name: &str) -> bool {
        self.registry.get(name).is_some()
    }

    /// Call a public function of the loaded program
    pub fn call_public(&mut self, name: &str, arguments: &[ArgumentValue]) -> Result<Cell, PublicCallError> {
        self.publics.call(name, arguments)
    }

    /// The loaded program
    pub fn program(&self) -> Option<ProgramId> {
        self.publics.program()
    }

    /// Provide the native `name` with `handler`
    pub fn provide_native(
        &mut self,
        name: &str,
        signature: &str,
        handler: impl NativeHandler + 'static,
    ) -> Result<(), ProvideError> {
        self.provided
            .try_borrow_mut()
            .map_err(|_| ProvideError::Busy)?
            .register(name, signature, handler)
    }

    /// Open a database connection. Returns the connection and the id of its
    /// connect request.
    pub fn open_connection(
        &mut self,
        info: ConnectionInfo,
    ) -> Result<(ConnectionId, RequestId), DatabaseError> {
        self.connections.open(info)
    }

    /// An open connection
    pub fn connection(&mut self, id: ConnectionId) -> Option<&mut ConnectionHost> {
        self.connections.hosts.get_mut(&id)
    }

    /// Close a connection, running its remaining queries first. Returns
    /// whether the connection existed.
    pub fn close_connection(&mut self, id: ConnectionId) -> bool {
        match self.connections.hosts.remove(&id) {
            Some(mut host) => {
                host.close();
                true
            }
            None => false,
        }
    }
}

/// Routes interceptor events to the host
struct HostDelegate<'a, H: ScriptHost> {
    host: &'a mut H,
    context: BridgeContext<'a>,
    deferred: &'a mut VecDeque<(Callback, ArgumentBag)>,
}

impl<H: ScriptHost> InterceptDelegate for HostDelegate<'_, H> {
    fn on_program_changed(&mut self, program: Option<ProgramId>) {
        self.context.publics.set_program(program);
        self.host.on_program_changed(&mut self.context, program);
    }

    fn on_call_intercepted(&mut self, callback: &Callback, arguments: &ArgumentBag) -> bool {
        if callback.deferred {
            self.deferred.push_back((callback.clone(), arguments.clone()));
            return false;
        }

        self.host.on_callback(&mut self.context, callback, arguments)
    }

    fn on_player_update(&mut self, player_id: Cell) {
        self.host.on_player_update(&mut self.context, player_id);
    }
}

/// Owner of the engine components and the script host.
pub struct Bridge<H: ScriptHost> {
    interceptor: CallInterceptor,
    registry: FunctionRegistry,
    invoker: OutboundInvoker,
    provided: Rc<RefCell<ReverseInvoker>>,
    publics: PublicCaller,
    connections: Connections,
    deferred: VecDeque<(Callback, ArgumentBag)>,
    host: H,
}

impl<H: ScriptHost> Bridge<H> {
    /// Create a bridge for the given callbacks and providable natives
    pub fn new<I, S>(config: &BridgeConfig, callbacks: CallbackTable, natives: I, host: H) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Bridge {
            interceptor: CallInterceptor::new(callbacks),
            registry: FunctionRegistry::new(config.invoke.array_length_offsets.clone()),
            invoker: OutboundInvoker::new(),
            provided: Rc::new(RefCell::new(ReverseInvoker::new(natives))),
            publics: PublicCaller::new(),
            connections: Connections {
                hosts: BTreeMap::new(),
                next_id: 0,
                timing: config.database.clone(),
                driver: driver_factory(config.database.driver),
            },
            deferred: VecDeque::new(),
            host,
        }
    }

    /// Create a bridge reading the definition files named by `config`
    pub fn from_config(config: &BridgeConfig, host: H) -> Result<Self, DefinitionError> {
        let callbacks = CallbackTable::from_file(&config.files.callbacks)?;
        let natives = load_natives(&config.files.natives)?;
        Ok(Self::new(config, callbacks, natives, host))
    }

    /// Use `factory` for connections opened from now on
    pub fn set_driver_factory(&mut self, factory: DriverFactory) {
        self.connections.driver = factory;
    }

    /// Use the server's export table for calling publics
    pub fn set_exports(&mut self, exports: ExportTable) {
        self.publics.set_exports(exports);
    }

    /// The interceptor, for installing its hook
    pub fn interceptor_mut(&mut self) -> &mut CallInterceptor {
        &mut self.interceptor
    }

    /// The interceptor
    pub fn interceptor(&self) -> &CallInterceptor {
        &self.interceptor
    }

    /// The native registry, for installing its hook
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// The native registry
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Shared handle to the provided natives, for dispatching native calls
    /// while the bridge itself is busy.
    pub fn provided(&self) -> Rc<RefCell<ReverseInvoker>> {
        self.provided.clone()
    }

    /// The script host
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The script host
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Number of deferred callbacks waiting for the next frame
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Give the host a context outside of any event.
    pub fn with_context<R>(&mut self, f: impl FnOnce(&mut H, &mut BridgeContext<'_>) -> R) -> R {
        let (host, mut context) = self.split();
        f(host, &mut context)
    }

    fn split(&mut self) -> (&mut H, BridgeContext<'_>) {
        let context = BridgeContext {
            registry: &mut self.registry,
            invoker: &mut self.invoker,
            provided: &self.provided,
            publics: &mut self.publics,
            connections: &mut self.connections,
        };
        (&mut self.host, context)
    }

    /// Inspect an execution request; see [`CallInterceptor::on_execute`].
    pub fn on_execute(&mut self, program: &dyn Program, index: c_int) -> ExecuteDecision {
        let mut delegate = HostDelegate {
            host: &mut self.host,
            context: BridgeContext {
                registry: &mut self.registry,
                invoker: &mut self.invoker,
                provided: &self.provided,
                publics: &mut self.publics,
                connections: &mut self.connections,
            },
            deferred: &mut self.deferred,
        };
        self.interceptor.on_execute(program, index, &mut delegate)
    }

    /// Record natives registered with a program.
    ///
    /// # Safety
    ///
    /// See [`FunctionRegistry::on_register_raw`].
    pub unsafe fn on_register(&mut self, natives: *const AmxNativeInfo, number: c_int) {
        self.registry.on_register_raw(natives, number);
    }

    /// A program is being removed by the runtime. Forgets it if it is the
    /// loaded one, telling the host.
    pub fn on_program_unloaded(&mut self, program: ProgramId) {
        if !self.interceptor.forget_program(program) {
            return;
        }
        self.publics.set_program(None);
        let (host, mut context) = self.split();
        host.on_program_changed(&mut context, None);
    }

    /// Per-tick work: deferred callbacks, then database results, then
    /// [`ScriptHost::on_frame`].
    pub fn process_frame(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        let updates = self.connections.take_updates();

        let (host, mut context) = self.split();
        for (callback, arguments) in &deferred {
            host.on_deferred_callback(&mut context, callback, arguments);
        }

        for (connection, update) in updates {
            match update {
                ConnectionUpdate::Connected {
                    request,
                    succeeded,
                    error_code,
                    error_message,
                } => host.did_connect(
                    &mut context,
                    connection,
                    request,
                    succeeded,
                    error_code,
                    &error_message,
                ),
                ConnectionUpdate::QuerySucceeded { request, result } => {
                    host.did_query(&mut context, connection, request, result)
                }
                ConnectionUpdate::QueryFailed {
                    request,
                    error_code,
                    error_message,
                } => host.did_query_fail(&mut context, connection, request, error_code, &error_message),
            }
        }

        host.on_frame(&mut context);
    }

    /// Close every connection and forget the loaded program.
    pub fn shutdown(&mut self) {
        if !self.connections.hosts.is_empty() {
            warn!(
                connections = self.connections.hosts.len(),
                "Closing open database connections"
            );
        }
        self.connections.close_all();
        self.publics.set_program(None);
        self.deferred.clear();
    }
}

impl<H: ScriptHost> Drop for Bridge<H> {
    fn drop(&mut self) {
        self.connections.close_all();
    }
}
