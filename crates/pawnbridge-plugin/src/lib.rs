//! pawnbridge server plugin
//!
//! This crate is the only place holding process-wide state. The server calls
//! the exported functions below on its main thread; they keep the
//! [`Bridge`] and the installed hooks in thread-locals and forward every
//! event to the engine.
//!
//! The hooked `amx_Exec` may be re-entered while the bridge is dispatching
//! (a handler calling a public, which runs natives, which execute publics).
//! Such executions find the bridge borrowed and go straight to the original.

#![allow(non_snake_case)]

pub mod host;
pub mod logging;
pub mod natives;

use std::cell::RefCell;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use pawnbridge_engine::amx::{
    Amx, AmxExport, AmxNativeInfo, ExecFn, ExportTable, LogPrintFn, RegisterFn, AMX_ERR_GENERAL,
    AMX_ERR_NONE, PLUGIN_DATA_AMX_EXPORTS, PLUGIN_DATA_LOGPRINTF, SUPPORTS_AMX_NATIVES,
    SUPPORTS_PROCESS_TICK, SUPPORTS_VERSION,
};
use pawnbridge_engine::config::{BridgeConfig, ConfigError};
use pawnbridge_engine::definitions::{load_natives, CallbackTable, DefinitionError};
use pawnbridge_engine::hook::{hook_export, Hook, HookError};
use pawnbridge_engine::{AmxProgram, Bridge, ExecuteDecision, ProgramId};
use pawnbridge_sdk::Cell;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::host::ConsoleHost;
use crate::natives::NativeTable;

/// Errors that keep the plugin from loading
#[derive(Debug, Error)]
pub enum LoadError {
    /// The server passed no export table
    #[error("The server did not pass an export table")]
    NoExports,

    /// `pawnbridge.toml` is unreadable or invalid
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A definition file is unreadable or invalid
    #[error("Invalid definitions: {0}")]
    Definitions(#[from] DefinitionError),

    /// A runtime function could not be hooked
    #[error("Failed to hook {export:?}: {source}")]
    Hook {
        /// The export being hooked
        export: AmxExport,
        /// Cause
        source: HookError,
    },
}

/// Everything installed into the server by `Load`
struct Runtime {
    exports: ExportTable,
    exec: Box<dyn Hook>,
    register: Box<dyn Hook>,
    natives: NativeTable,
}

thread_local! {
    static BRIDGE: RefCell<Option<Bridge<ConsoleHost>>> = const { RefCell::new(None) };
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

// ============================================================================
// Plugin Interface
// ============================================================================

/// Capabilities reported to the server
#[no_mangle]
pub extern "system" fn Supports() -> u32 {
    SUPPORTS_VERSION | SUPPORTS_AMX_NATIVES | SUPPORTS_PROCESS_TICK
}

/// Initialize the plugin.
///
/// # Safety
///
/// `data` must be the plugin data array passed by the server.
#[no_mangle]
pub unsafe extern "system" fn Load(data: *mut *mut c_void) -> bool {
    let directory = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match load_from(data, &directory) {
        Ok(()) => true,
        Err(error) => {
            error!(%error, "Failed to load");
            false
        }
    }
}

/// Remove the hooks and close every database connection.
#[no_mangle]
pub extern "system" fn Unload() {
    natives::unbind();

    let bridge = BRIDGE.with(|bridge| bridge.try_borrow_mut().ok().and_then(|mut bridge| bridge.take()));
    if let Some(mut bridge) = bridge {
        bridge.shutdown();
    }

    let runtime = RUNTIME.with(|runtime| runtime.try_borrow_mut().ok().and_then(|mut runtime| runtime.take()));
    if let Some(mut runtime) = runtime {
        for (export, hook) in [
            (AmxExport::Exec, &mut runtime.exec),
            (AmxExport::Register, &mut runtime.register),
        ] {
            if let Err(error) = hook.uninstall() {
                warn!(?export, %error, "Failed to remove hook");
            }
        }
    }

    info!("Unloaded");
    logging::flush_pending();
}

/// Register the provided natives with a newly loaded program.
///
/// # Safety
///
/// `amx` must be the program passed by the server.
#[no_mangle]
pub unsafe extern "system" fn AmxLoad(amx: *mut Amx) -> c_int {
    RUNTIME.with(|runtime| {
        let Ok(runtime) = runtime.try_borrow() else {
            return AMX_ERR_NONE;
        };
        let Some(runtime) = runtime.as_ref() else {
            return AMX_ERR_NONE;
        };
        let Some(register) = runtime.exports.register_fn() else {
            return AMX_ERR_NONE;
        };

        let result = runtime.natives.register(amx, register);
        debug!(natives = runtime.natives.len(), result, "Registered provided natives");
        result
    })
}

/// Forget a program that is being unloaded.
#[no_mangle]
pub extern "system" fn AmxUnload(amx: *mut Amx) -> c_int {
    let Some(program) = ProgramId::from_raw(amx) else {
        return AMX_ERR_NONE;
    };

    with_bridge(|bridge| bridge.on_program_unloaded(program));
    AMX_ERR_NONE
}

/// Per-tick work.
#[no_mangle]
pub extern "system" fn ProcessTick() {
    with_bridge(|bridge| bridge.process_frame());
    logging::flush_pending();
}

// ============================================================================
// Loading
// ============================================================================

/// `Load` with `pawnbridge.toml` looked up in `directory`.
///
/// # Safety
///
/// `data` must be a plugin data array whose export table stays valid until
/// [`Unload`].
pub unsafe fn load_from(data: *mut *mut c_void, directory: &Path) -> Result<(), LoadError> {
    if data.is_null() {
        return Err(LoadError::NoExports);
    }

    let logprintf = NonNull::new(*data.add(PLUGIN_DATA_LOGPRINTF))
        .map(|address| std::mem::transmute::<*mut c_void, LogPrintFn>(address.as_ptr()));
    let exports = ExportTable::from_raw(*data.add(PLUGIN_DATA_AMX_EXPORTS));

    let config = BridgeConfig::load_or_default(directory);
    let filter = config
        .as_ref()
        .map(|config| config.logging.filter.clone())
        .unwrap_or_else(|_| "info".to_string());
    logging::init(logprintf, &filter);

    let config = config?;
    let exports = exports.ok_or(LoadError::NoExports)?;

    let callbacks = CallbackTable::from_file(&directory.join(&config.files.callbacks))?;
    let names = load_natives(&directory.join(&config.files.natives))?;
    let natives = NativeTable::new(&names);
    let mut bridge = Bridge::new(&config, callbacks, names, ConsoleHost::new());

    let mode = config.hooks.mode;
    let mut exec = hook_export(&exports, AmxExport::Exec, hooked_exec as ExecFn as *mut c_void, mode)
        .map_err(|source| LoadError::Hook {
            export: AmxExport::Exec,
            source,
        })?;
    let register = hook_export(
        &exports,
        AmxExport::Register,
        hooked_register as RegisterFn as *mut c_void,
        mode,
    );
    let mut register = match register {
        Ok(register) => register,
        Err(source) => {
            let _ = exec.uninstall();
            return Err(LoadError::Hook {
                export: AmxExport::Register,
                source,
            });
        }
    };

    bridge
        .interceptor_mut()
        .install(exec.as_mut())
        .map_err(|source| LoadError::Hook {
            export: AmxExport::Exec,
            source,
        })?;
    bridge
        .registry_mut()
        .install(register.as_mut())
        .map_err(|source| LoadError::Hook {
            export: AmxExport::Register,
            source,
        })?;
    bridge.set_exports(exports);
    natives.bind(bridge.provided());

    info!(
        callbacks = bridge.interceptor().callbacks().len(),
        natives = natives.len(),
        ?mode,
        "Loaded"
    );

    BRIDGE.with(|slot| *slot.borrow_mut() = Some(bridge));
    RUNTIME.with(|slot| {
        *slot.borrow_mut() = Some(Runtime {
            exports,
            exec,
            register,
            natives,
        })
    });
    Ok(())
}

/// Run `f` with the bridge unless it is missing or already in use.
fn with_bridge(f: impl FnOnce(&mut Bridge<ConsoleHost>)) {
    BRIDGE.with(|bridge| match bridge.try_borrow_mut() {
        Ok(mut bridge) => {
            if let Some(bridge) = bridge.as_mut() {
                f(bridge);
            }
        }
        Err(_) => debug!("Bridge is busy"),
    });
}

// ============================================================================
// Hooks
// ============================================================================

unsafe extern "C" fn hooked_exec(amx: *mut Amx, retval: *mut Cell, index: c_int) -> c_int {
    let decision = BRIDGE.with(|bridge| {
        let (Ok(mut bridge), Some(amx)) = (bridge.try_borrow_mut(), NonNull::new(amx)) else {
            return ExecuteDecision::Forward;
        };
        match bridge.as_mut() {
            Some(bridge) => bridge.on_execute(&AmxProgram::new(amx), index),
            None => ExecuteDecision::Forward,
        }
    });

    match decision {
        ExecuteDecision::Forward => original_exec(amx, retval, index),
        handled => handled.resolve(retval.as_mut(), || AMX_ERR_NONE),
    }
}

unsafe extern "C" fn hooked_register(
    amx: *mut Amx,
    natives: *const AmxNativeInfo,
    number: c_int,
) -> c_int {
    with_bridge(|bridge| bridge.on_register(natives, number));
    original_register(amx, natives, number)
}

unsafe fn original_exec(amx: *mut Amx, retval: *mut Cell, index: c_int) -> c_int {
    RUNTIME.with(|runtime| {
        let Ok(runtime) = runtime.try_borrow() else {
            return AMX_ERR_GENERAL;
        };
        let Some(runtime) = runtime.as_ref() else {
            return AMX_ERR_GENERAL;
        };
        let result = match runtime.exec.original() {
            Ok(trampoline) => trampoline.cast::<ExecFn>()(amx, retval, index),
            Err(error) => {
                error!(%error, "Original amx_Exec is unavailable");
                AMX_ERR_GENERAL
            }
        };
        result
    })
}

unsafe fn original_register(amx: *mut Amx, natives: *const AmxNativeInfo, number: c_int) -> c_int {
    RUNTIME.with(|runtime| {
        let Ok(runtime) = runtime.try_borrow() else {
            return AMX_ERR_GENERAL;
        };
        let Some(runtime) = runtime.as_ref() else {
            return AMX_ERR_GENERAL;
        };
        let result = match runtime.register.original() {
            Ok(trampoline) => trampoline.cast::<RegisterFn>()(amx, natives, number),
            Err(error) => {
                error!(%error, "Original amx_Register is unavailable");
                AMX_ERR_GENERAL
            }
        };
        result
    })
}
