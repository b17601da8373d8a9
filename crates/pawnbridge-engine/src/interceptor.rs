//! Interception of public function executions
//!
//! Every execution request of the runtime passes through
//! [`CallInterceptor::on_execute`]. Running `main` marks a newly loaded
//! program: its public table is matched against the [`CallbackTable`] and the
//! resulting index cache is kept for that program only. Later executions of a
//! cached public of that program have their arguments read from the stack
//! into an [`ArgumentBag`] and are offered to the [`InterceptDelegate`], which
//! may suppress cancelable ones.
//!
//! `OnPlayerUpdate` runs for every player many times a second. It is
//! recognised by name, whether or not it is declared, and only its player id
//! is read and reported; it always runs.
//!
//! The interceptor never calls the original function itself; it returns an
//! [`ExecuteDecision`] that the hook resolves once the interceptor is no
//! longer borrowed.

use std::collections::HashMap;
use std::os::raw::c_int;

use pawnbridge_sdk::{cell_to_float, ArgumentBag, ArgumentType, Callback, Cell};
use tracing::{debug, trace, warn};

use crate::amx::{AMX_ERR_NONE, AMX_EXEC_MAIN};
use crate::definitions::CallbackTable;
use crate::hook::{Hook, HookError};
use crate::program::{Program, ProgramId};

/// Public recognised without a declaration
pub const PLAYER_UPDATE: &str = "OnPlayerUpdate";

/// Receives the events recognised by the interceptor.
pub trait InterceptDelegate {
    /// A program was loaded, or the loaded one went away (`None`).
    fn on_program_changed(&mut self, program: Option<ProgramId>);

    /// An intercepted public is about to run. Returns whether the call was
    /// handled; handled calls of cancelable callbacks are suppressed.
    fn on_call_intercepted(&mut self, callback: &Callback, arguments: &ArgumentBag) -> bool;

    /// `OnPlayerUpdate` is about to run for `player_id`.
    fn on_player_update(&mut self, player_id: Cell) {
        let _ = player_id;
    }
}

/// What to do with an execution request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteDecision {
    /// Do not run the original; report `return_value` to the caller
    Handled {
        /// Value stored in the caller's return slot
        return_value: Cell,
    },
    /// Run the original function
    Forward,
}

impl ExecuteDecision {
    /// Finish the execution request, calling `original` when forwarding.
    pub fn resolve(self, retval: Option<&mut Cell>, original: impl FnOnce() -> c_int) -> c_int {
        match self {
            ExecuteDecision::Handled { return_value } => {
                if let Some(slot) = retval {
                    *slot = return_value;
                }
                AMX_ERR_NONE
            }
            ExecuteDecision::Forward => original(),
        }
    }
}

/// Recognises and dispatches intercepted executions.
pub struct CallInterceptor {
    callbacks: CallbackTable,
    program: Option<ProgramId>,
    /// Public index in the loaded program to position in `callbacks`
    intercepted: HashMap<c_int, usize>,
    player_update: Option<c_int>,
    arguments: ArgumentBag,
    installed: bool,
}

impl CallInterceptor {
    /// Create an interceptor for the given callbacks
    pub fn new(callbacks: CallbackTable) -> Self {
        CallInterceptor {
            callbacks,
            program: None,
            intercepted: HashMap::new(),
            player_update: None,
            arguments: ArgumentBag::new(),
            installed: false,
        }
    }

    /// Install the execution hook. Executions are only inspected once this
    /// succeeded.
    pub fn install(&mut self, hook: &mut dyn Hook) -> Result<(), HookError> {
        if !hook.is_installed() {
            hook.install()?;
        }
        self.installed = true;
        Ok(())
    }

    /// Whether the execution hook is in place
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// The program whose publics are being intercepted
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    /// The callbacks this interceptor recognises
    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    /// Number of publics of the loaded program that are intercepted
    pub fn intercepted_count(&self) -> usize {
        self.intercepted.len()
    }

    /// Inspect an execution request of `program` for the function at `index`.
    pub fn on_execute(
        &mut self,
        program: &dyn Program,
        index: c_int,
        delegate: &mut dyn InterceptDelegate,
    ) -> ExecuteDecision {
        if !self.installed {
            return ExecuteDecision::Forward;
        }

        if index == AMX_EXEC_MAIN {
            self.load_program(program);
            delegate.on_program_changed(self.program);
            return ExecuteDecision::Forward;
        }

        if self.program != Some(program.id()) {
            return ExecuteDecision::Forward;
        }

        if self.player_update == Some(index) {
            if let Some(player_id) = program.stack_cell(0) {
                delegate.on_player_update(player_id);
            }
            return ExecuteDecision::Forward;
        }

        let Some(&position) = self.intercepted.get(&index) else {
            return ExecuteDecision::Forward;
        };

        let Some(callback) = self.callbacks.get(position) else {
            return ExecuteDecision::Forward;
        };

        if !read_arguments(program, callback, &mut self.arguments) {
            return ExecuteDecision::Forward;
        }

        trace!(call = %callback.representation(&self.arguments), "Intercepted call");
        let handled = delegate.on_call_intercepted(callback, &self.arguments);

        let decision = if handled && callback.cancelable {
            ExecuteDecision::Handled {
                return_value: callback.return_value,
            }
        } else {
            ExecuteDecision::Forward
        };

        if callback.unloads_program {
            debug!(callback = %callback.name, "Program is unloading");
            delegate.on_program_changed(None);
            self.program = None;
            self.intercepted.clear();
            self.player_update = None;
        }

        decision
    }

    /// Stop intercepting `program` if it is the loaded one. Returns whether
    /// it was.
    pub fn forget_program(&mut self, program: ProgramId) -> bool {
        if self.program != Some(program) {
            return false;
        }
        self.program = None;
        self.intercepted.clear();
        self.player_update = None;
        true
    }

    fn load_program(&mut self, program: &dyn Program) {
        self.intercepted.clear();
        self.player_update = None;
        for (index, name) in program.public_names().iter().enumerate() {
            if name == PLAYER_UPDATE {
                self.player_update = Some(index as c_int);
                continue;
            }
            if let Some(position) = self.callbacks.position(name) {
                self.intercepted.insert(index as c_int, position);
            }
        }

        self.program = Some(program.id());
        debug!(
            publics = self.intercepted.len(),
            callbacks = self.callbacks.len(),
            "Program loaded"
        );
    }
}

/// Fill `arguments` from the stack of `program` as declared by `callback`.
/// Returns `false` when the stack does not hold what was declared.
fn read_arguments(program: &dyn Program, callback: &Callback, arguments: &mut ArgumentBag) -> bool {
    let declared = callback.arguments.len();
    let pushed = program.param_count();
    if pushed < declared {
        warn!(
            callback = %callback.name,
            declared,
            pushed,
            "Not enough arguments pushed for intercepted callback"
        );
        return false;
    }

    arguments.clear();
    for (index, (name, argument_type)) in callback.arguments.iter().enumerate() {
        let Some(cell) = program.stack_cell(index) else {
            warn!(callback = %callback.name, index, "Unable to read argument from the stack");
            return false;
        };

        match argument_type {
            ArgumentType::Integer => arguments.add_integer(name.as_str(), cell),
            ArgumentType::Float => arguments.add_float(name.as_str(), cell_to_float(cell)),
            ArgumentType::String => match program.read_string(cell) {
                Some(text) => arguments.add_string(name.as_str(), text),
                None => {
                    warn!(callback = %callback.name, argument = %name, "Invalid string address");
                    return false;
                }
            },
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amx::Amx;
    use crate::definitions::parse_callbacks;
    use pawnbridge_sdk::float_to_cell;

    struct MockProgram {
        amx: Box<Amx>,
        publics: Vec<String>,
        stack: Vec<Cell>,
        strings: HashMap<Cell, String>,
    }

    impl MockProgram {
        fn new(publics: &[&str]) -> Self {
            MockProgram {
                amx: Box::new(Amx::zeroed()),
                publics: publics.iter().map(|name| name.to_string()).collect(),
                stack: Vec::new(),
                strings: HashMap::new(),
            }
        }
    }

    impl Program for MockProgram {
        fn id(&self) -> ProgramId {
            ProgramId::from_raw(&*self.amx as *const Amx as *mut Amx).unwrap()
        }

        fn param_count(&self) -> usize {
            self.stack.len()
        }

        fn stack_cell(&self, index: usize) -> Option<Cell> {
            self.stack.get(index).copied()
        }

        fn read_string(&self, address: Cell) -> Option<String> {
            self.strings.get(&address).cloned()
        }

        fn public_names(&self) -> Vec<String> {
            self.publics.clone()
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        handle: bool,
        programs: Vec<Option<ProgramId>>,
        calls: Vec<(String, ArgumentBag)>,
        updates: Vec<Cell>,
    }

    impl InterceptDelegate for RecordingDelegate {
        fn on_program_changed(&mut self, program: Option<ProgramId>) {
            self.programs.push(program);
        }

        fn on_call_intercepted(&mut self, callback: &Callback, arguments: &ArgumentBag) -> bool {
            self.calls.push((callback.name.clone(), arguments.clone()));
            self.handle
        }

        fn on_player_update(&mut self, player_id: Cell) {
            self.updates.push(player_id);
        }
    }

    struct NullHook(bool);

    impl Hook for NullHook {
        fn install(&mut self) -> Result<(), HookError> {
            self.0 = true;
            Ok(())
        }

        fn uninstall(&mut self) -> Result<(), HookError> {
            self.0 = false;
            Ok(())
        }

        fn is_installed(&self) -> bool {
            self.0
        }

        fn original(&self) -> Result<crate::hook::Trampoline<'_>, HookError> {
            Err(HookError::NotInstalled)
        }
    }

    fn interceptor(definitions: &str) -> CallInterceptor {
        let mut interceptor = CallInterceptor::new(parse_callbacks(definitions).unwrap());
        interceptor.install(&mut NullHook(false)).unwrap();
        interceptor
    }

    const DEFINITIONS: &str = "\
        [Cancelable, ReturnOne] forward OnPlayerText(playerid, text[]);\n\
        forward OnPlayerSpawn(playerid);\n\
        forward OnPlayerGiveDamage(playerid, damagedid, Float:amount);\n\
        [Unload] forward OnGameModeExit();\n";

    #[test]
    fn test_main_loads_program() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate::default();
        let program = MockProgram::new(&["OnGameModeInit", "OnPlayerSpawn", "OnPlayerText"]);

        let decision = interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);
        assert_eq!(decision, ExecuteDecision::Forward);
        assert_eq!(delegate.programs, vec![Some(program.id())]);
        assert_eq!(interceptor.program(), Some(program.id()));
        assert_eq!(interceptor.intercepted_count(), 2);
    }

    #[test]
    fn test_forget_program() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate::default();
        let program = MockProgram::new(&["OnPlayerSpawn"]);
        let other = MockProgram::new(&["OnPlayerSpawn"]);
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        assert!(!interceptor.forget_program(other.id()));
        assert!(interceptor.forget_program(program.id()));
        assert_eq!(interceptor.program(), None);
        assert_eq!(interceptor.intercepted_count(), 0);
    }

    #[test]
    fn test_arguments_are_read_in_declared_order() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate::default();
        let mut program = MockProgram::new(&["OnPlayerGiveDamage", "OnPlayerText"]);
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        program.stack = vec![3, 7, float_to_cell(12.5)];
        interceptor.on_execute(&program, 0, &mut delegate);

        program.stack = vec![3, 128];
        program.strings.insert(128, "hello".to_string());
        interceptor.on_execute(&program, 1, &mut delegate);

        assert_eq!(delegate.calls.len(), 2);
        let (name, arguments) = &delegate.calls[0];
        assert_eq!(name, "OnPlayerGiveDamage");
        assert_eq!(arguments.get_integer("playerid"), 3);
        assert_eq!(arguments.get_integer("damagedid"), 7);
        assert_eq!(arguments.get_float("amount"), 12.5);

        let (name, arguments) = &delegate.calls[1];
        assert_eq!(name, "OnPlayerText");
        assert_eq!(arguments.get_string("text"), "hello");
        assert_eq!(arguments.len(), 2);
    }

    #[test]
    fn test_handled_cancelable_call_is_suppressed() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate {
            handle: true,
            ..Default::default()
        };
        let mut program = MockProgram::new(&["OnPlayerText"]);
        program.stack = vec![0, 4];
        program.strings.insert(4, "/help".to_string());
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        let mut original_calls = 0;
        let mut retval = -5;
        let result = interceptor
            .on_execute(&program, 0, &mut delegate)
            .resolve(Some(&mut retval), || {
                original_calls += 1;
                AMX_ERR_NONE
            });

        assert_eq!(result, AMX_ERR_NONE);
        assert_eq!(retval, 1);
        assert_eq!(original_calls, 0);
    }

    #[test]
    fn test_unhandled_call_runs_original_once() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate::default();
        let mut program = MockProgram::new(&["OnPlayerText"]);
        program.stack = vec![0, 4];
        program.strings.insert(4, "hi".to_string());
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        let mut original_calls = 0;
        let mut retval = 0;
        let result = interceptor
            .on_execute(&program, 0, &mut delegate)
            .resolve(Some(&mut retval), || {
                original_calls += 1;
                42
            });

        assert_eq!(result, 42);
        assert_eq!(original_calls, 1);
        assert_eq!(delegate.calls.len(), 1);
    }

    #[test]
    fn test_handled_non_cancelable_call_runs_original() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate {
            handle: true,
            ..Default::default()
        };
        let mut program = MockProgram::new(&["OnPlayerSpawn"]);
        program.stack = vec![9];
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        assert_eq!(
            interceptor.on_execute(&program, 0, &mut delegate),
            ExecuteDecision::Forward
        );
        assert_eq!(delegate.calls.len(), 1);
    }

    #[test]
    fn test_missing_arguments_fall_through() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate {
            handle: true,
            ..Default::default()
        };
        let mut program = MockProgram::new(&["OnPlayerGiveDamage"]);
        program.stack = vec![1, 2];
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        assert_eq!(
            interceptor.on_execute(&program, 0, &mut delegate),
            ExecuteDecision::Forward
        );
        assert!(delegate.calls.is_empty());
    }

    #[test]
    fn test_other_programs_and_indices_are_ignored() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate::default();
        let mut program = MockProgram::new(&["OnPlayerSpawn"]);
        program.stack = vec![1];
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        let mut filterscript = MockProgram::new(&["OnPlayerSpawn"]);
        filterscript.stack = vec![1];
        interceptor.on_execute(&filterscript, 0, &mut delegate);
        interceptor.on_execute(&program, 5, &mut delegate);

        assert!(delegate.calls.is_empty());
    }

    #[test]
    fn test_unload_clears_program() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate::default();
        let mut program = MockProgram::new(&["OnGameModeExit", "OnPlayerSpawn"]);
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);

        interceptor.on_execute(&program, 0, &mut delegate);
        assert_eq!(delegate.programs, vec![Some(program.id()), None]);
        assert_eq!(interceptor.program(), None);
        assert_eq!(interceptor.intercepted_count(), 0);

        program.stack = vec![1];
        interceptor.on_execute(&program, 1, &mut delegate);
        assert_eq!(delegate.calls.len(), 1);
    }

    #[test]
    fn test_player_update_reports_the_player() {
        let mut interceptor = interceptor(DEFINITIONS);
        let mut delegate = RecordingDelegate {
            handle: true,
            ..Default::default()
        };
        let mut program = MockProgram::new(&["OnPlayerSpawn", "OnPlayerUpdate"]);
        interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);
        assert_eq!(interceptor.intercepted_count(), 1);

        program.stack = vec![12];
        assert_eq!(
            interceptor.on_execute(&program, 1, &mut delegate),
            ExecuteDecision::Forward
        );
        assert_eq!(delegate.updates, vec![12]);
        assert!(delegate.calls.is_empty());

        // Declaring it does not change how it is delivered.
        let definitions = "[Cancelable, Deferred] forward OnPlayerUpdate(playerid);\n";
        let mut declared = CallInterceptor::new(parse_callbacks(definitions).unwrap());
        declared.install(&mut NullHook(false)).unwrap();
        declared.on_execute(&program, AMX_EXEC_MAIN, &mut delegate);
        assert_eq!(declared.intercepted_count(), 0);
        assert_eq!(
            declared.on_execute(&program, 1, &mut delegate),
            ExecuteDecision::Forward
        );
        assert_eq!(delegate.updates, vec![12, 12]);
        assert!(delegate.calls.is_empty());

        assert!(declared.forget_program(program.id()));
        declared.on_execute(&program, 1, &mut delegate);
        assert_eq!(delegate.updates.len(), 2);
    }

    #[test]
    fn test_uninstalled_interceptor_forwards_everything() {
        let mut interceptor = CallInterceptor::new(parse_callbacks(DEFINITIONS).unwrap());
        let mut delegate = RecordingDelegate::default();
        let program = MockProgram::new(&["OnPlayerSpawn"]);

        assert_eq!(
            interceptor.on_execute(&program, AMX_EXEC_MAIN, &mut delegate),
            ExecuteDecision::Forward
        );
        assert!(delegate.programs.is_empty());
    }
}
