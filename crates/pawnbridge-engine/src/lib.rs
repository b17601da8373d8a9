//! Pawnbridge engine - the native side of the bridge
//!
//! The engine sits between the server's Pawn runtime and a script host:
//!
//! ```text
//! Pawn runtime ──exec──▶ CallInterceptor ──▶ ScriptHost (through Bridge)
//!                                               │
//!                      FunctionRegistry ◀── OutboundInvoker ◀─┘
//!                             │
//!                      SyntheticContext
//!
//! Pawn runtime ──native──▶ ReverseInvoker ──▶ script-provided handler
//! ```
//!
//! # Modules
//!
//! - [`amx`]: ABI mirrors, raw memory access, server code page, export table
//! - [`synthetic`]: a program image for calling natives without a program
//! - [`program`]: read-only view of a loaded program
//! - [`hook`]: inline and export-table hooks
//! - [`interceptor`]: interception of public function executions
//! - [`registry`]: native discovery and typed native calls
//! - [`invoke`]: script-to-native calls described by a signature
//! - [`provided`]: natives implemented by the script host
//! - [`publics`]: calling public functions of the loaded program
//! - [`definitions`]: parsers for the callback and native definition files
//! - [`config`]: `pawnbridge.toml`
//! - [`db`]: background database connections
//! - [`bridge`]: the controller tying everything to a [`bridge::ScriptHost`]
//!
//! Everything here takes explicit `self`; process-wide state lives in the
//! plugin crate only.

#![warn(missing_docs)]

pub mod amx;
pub mod bridge;
pub mod config;
pub mod db;
pub mod definitions;
pub mod hook;
pub mod interceptor;
pub mod invoke;
pub mod program;
pub mod provided;
pub mod publics;
pub mod registry;
pub mod synthetic;

pub use bridge::{Bridge, BridgeContext, ScriptHost};
pub use config::{BridgeConfig, ConfigError};
pub use interceptor::{CallInterceptor, ExecuteDecision, InterceptDelegate};
pub use invoke::{InvokeError, OutboundInvoker};
pub use program::{AmxProgram, Program, ProgramId};
pub use provided::{NativeHandler, NativeParameters, ProvideError, ReverseInvoker};
pub use publics::{PublicCallError, PublicCaller};
pub use registry::{ArrayLengthTable, CallError, FunctionRegistry, NativeArgument, NativeDispatcher};
pub use synthetic::{ScopedStackModifier, SyntheticContext, SyntheticError};
