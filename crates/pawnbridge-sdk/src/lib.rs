//! Pawnbridge SDK - shared vocabulary for the Pawn bridge
//!
//! This crate provides the types that cross between the native call layer and
//! the script layer without depending on any of the unsafe runtime plumbing in
//! `pawnbridge-engine`:
//!
//! - [`ArgumentValue`] and [`ScriptValue`], the typed values on either side
//! - [`ArgumentBag`], the named arguments of an intercepted callback
//! - [`Signature`], the `i f s a I F S` calling-convention grammar
//! - [`Callback`], the declarative description of an interceptable public
//!
//! # Example
//!
//! ```ignore
//! use pawnbridge_sdk::{Signature, SignatureType};
//!
//! let signature = Signature::parse("iS")?;
//! assert_eq!(signature.argument_count(), 1);
//! assert_eq!(signature.reference_count(), 1);
//! assert_eq!(signature.types()[1], SignatureType::StringReference);
//! ```

#![warn(missing_docs)]

pub mod arguments;
pub mod callback;
pub mod error;
pub mod signature;
pub mod value;

pub use arguments::ArgumentBag;
pub use callback::{ArgumentType, Callback};
pub use error::SignatureError;
pub use signature::{Signature, SignatureType, MAX_ARGUMENT_COUNT};
pub use value::{cell_to_float, float_to_cell, ArgumentValue, Cell, ScriptValue};
