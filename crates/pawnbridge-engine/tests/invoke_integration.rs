//! End-to-end native invocation through the registry and synthetic memory

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use pawnbridge_engine::amx::{memory, strings, Amx, NativeFn};
use pawnbridge_engine::{
    ArrayLengthTable, FunctionRegistry, InvokeError, NativeDispatcher, OutboundInvoker,
};
use pawnbridge_sdk::{Cell, ScriptValue};

static SEEN: Mutex<Vec<Cell>> = Mutex::new(Vec::new());
static CALLS: AtomicUsize = AtomicUsize::new(0);

unsafe fn parameters<'a>(params: *const Cell) -> &'a [Cell] {
    std::slice::from_raw_parts(params, 1 + (*params / 4) as usize)
}

/// GetPlayerName(playerid, name[], len)
unsafe extern "C" fn get_player_name(amx: *mut Amx, params: *const Cell) -> Cell {
    let params = parameters(params);
    *SEEN.lock().unwrap() = params.to_vec();

    if let Some(cells) = memory::cells_mut(amx, params[2]) {
        let capacity = (params[3] as usize).min(cells.len());
        strings::encode_cells(b"Hello", &mut cells[..capacity]);
    }
    5
}

unsafe extern "C" fn do_nothing(_amx: *mut Amx, _params: *const Cell) -> Cell {
    1
}

unsafe extern "C" fn counting(_amx: *mut Amx, _params: *const Cell) -> Cell {
    CALLS.fetch_add(1, Ordering::SeqCst);
    1
}

/// GetPlayerHealth(playerid, &Float:health)
unsafe extern "C" fn get_player_health(amx: *mut Amx, params: *const Cell) -> Cell {
    let params = parameters(params);
    memory::write_cell(amx, params[2], pawnbridge_sdk::float_to_cell(87.5));
    1
}

/// CreateDynamicPolygonEx(Float:points[], maxpoints, Float:minz, players[], maxplayers)
unsafe extern "C" fn polygon(amx: *mut Amx, params: *const Cell) -> Cell {
    let params = parameters(params);
    let points = memory::cells(amx, params[1]).map_or(0, |cells| cells[..params[2] as usize].len());
    let players = memory::cells(amx, params[4]).map_or(0, |cells| cells[..params[5] as usize].len());
    (points * 100 + players) as Cell
}

fn registry() -> FunctionRegistry {
    let mut lengths = ArrayLengthTable::new();
    lengths.insert("CreateDynamicPolygonEx", vec![1, 1]);

    let mut registry = FunctionRegistry::new(lengths);
    registry.on_register([
        ("GetPlayerName", get_player_name as NativeFn),
        ("CountingNative", counting as NativeFn),
        ("DoNothing", do_nothing as NativeFn),
        ("GetPlayerHealth", get_player_health as NativeFn),
        ("CreateDynamicPolygonEx", polygon as NativeFn),
    ]);
    registry
}

#[test]
fn test_string_reference_end_to_end() {
    let mut registry = registry();
    let mut invoker = OutboundInvoker::new();

    let result = invoker
        .invoke(
            &mut registry,
            &[
                "GetPlayerName".into(),
                "iS".into(),
                5.into(),
                ScriptValue::Undefined,
            ],
        )
        .unwrap();
    assert_eq!(result, ScriptValue::String("Hello".into()));

    let seen = SEEN.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], 12);
    assert_eq!(seen[1], 5);
    assert_eq!(seen[3], 2048);

    // The synthetic heap is released after the call.
    assert_eq!(registry.context().heap_top(), 0);
}

#[test]
fn test_argument_count_mismatch_never_calls() {
    let mut registry = registry();
    let mut invoker = OutboundInvoker::new();
    let before = CALLS.load(Ordering::SeqCst);

    let too_few = invoker.invoke(&mut registry, &["CountingNative".into(), "ii".into(), 1.into()]);
    assert!(matches!(
        too_few,
        Err(InvokeError::ArgumentCount {
            expected: 4,
            provided: 3
        })
    ));

    let too_many = invoker.invoke(
        &mut registry,
        &["CountingNative".into(), "i".into(), 1.into(), 2.into()],
    );
    assert!(matches!(too_many, Err(InvokeError::ArgumentCount { .. })));
    assert_eq!(CALLS.load(Ordering::SeqCst), before);

    let result = invoker
        .invoke(&mut registry, &["CountingNative".into(), "ii".into(), 1.into(), 2.into()])
        .unwrap();
    assert_eq!(result, ScriptValue::Number(1.0));
    assert_eq!(CALLS.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_float_reference() {
    let mut registry = registry();
    let mut invoker = OutboundInvoker::new();

    let result = invoker
        .invoke(&mut registry, &["GetPlayerHealth".into(), "iF".into(), 0.into()])
        .unwrap();
    assert_eq!(result, ScriptValue::Number(87.5));
}

#[test]
fn test_arrays_with_configured_lengths() {
    let mut registry = registry();
    let mut invoker = OutboundInvoker::new();

    let points = ScriptValue::Array(vec![1.into(), 2.into(), 3.into(), 4.into()]);
    let players = ScriptValue::Array(vec![7.into()]);
    let result = invoker
        .invoke(
            &mut registry,
            &[
                "CreateDynamicPolygonEx".into(),
                "aifai".into(),
                points,
                4.into(),
                0.0.into(),
                players,
                1.into(),
            ],
        )
        .unwrap();
    assert_eq!(result, ScriptValue::Number(401.0));
}

#[test]
fn test_unknown_natives() {
    let mut registry = registry();
    let mut invoker = OutboundInvoker::new();

    assert!(!registry.function_exists("SetPlayerPos"));
    assert!(matches!(
        invoker.invoke(&mut registry, &["SetPlayerPos".into(), "i".into(), 0.into()]),
        Err(InvokeError::UnknownFunction { .. })
    ));
}

#[test]
fn test_several_string_buffers_fit() {
    let mut registry = registry();
    let mut invoker = OutboundInvoker::new();

    let result = invoker
        .invoke(&mut registry, &["DoNothing".into(), "iSSS".into(), 0.into()])
        .unwrap();
    assert_eq!(
        result,
        ScriptValue::Array(vec![
            ScriptValue::String(String::new()),
            ScriptValue::String(String::new()),
            ScriptValue::String(String::new()),
        ])
    );
    assert_eq!(registry.context().heap_top(), 0);
}

#[test]
fn test_long_strings_fit() {
    let mut registry = registry();
    let mut invoker = OutboundInvoker::new();

    let text = "x".repeat(2000);
    let result = invoker
        .invoke(
            &mut registry,
            &[
                "DoNothing".into(),
                "sss".into(),
                text.as_str().into(),
                text.as_str().into(),
                text.as_str().into(),
            ],
        )
        .unwrap();
    assert_eq!(result, ScriptValue::Number(1.0));

    // Every argument a string of the largest accepted length.
    let longest = "x".repeat(2047);
    let signature = "s".repeat(24);
    let mut arguments: Vec<ScriptValue> = vec!["DoNothing".into(), signature.as_str().into()];
    arguments.extend((0..24).map(|_| ScriptValue::from(longest.as_str())));
    assert_eq!(
        invoker.invoke(&mut registry, &arguments).unwrap(),
        ScriptValue::Number(1.0)
    );
    assert_eq!(registry.context().heap_top(), 0);
}
