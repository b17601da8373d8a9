//! The signature grammar
//!
//! A signature describes the calling convention of a native function, one
//! character per argument:
//!
//! | Char | Meaning                                         |
//! |------|-------------------------------------------------|
//! | `i`  | integer, consumes a value                        |
//! | `f`  | float, consumes a value                          |
//! | `s`  | string, consumes a value                         |
//! | `a`  | integer array, followed by an `i` length         |
//! | `I`  | integer written by the callee                    |
//! | `F`  | float written by the callee                      |
//! | `S`  | string written by the callee                     |
//!
//! Outbound signatures may not have plain arguments after a reference
//! argument. Signatures of script-provided natives map each character to
//! the native parameter at the same index and accept no arrays.

use crate::error::SignatureError;

/// Maximum number of physical arguments a call may carry.
pub const MAX_ARGUMENT_COUNT: usize = 24;

/// Type of a single signature slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// `a`
    Array,
    /// `f`
    Float,
    /// `F`
    FloatReference,
    /// `i`
    Int,
    /// `I`
    IntReference,
    /// `s`
    String,
    /// `S`
    StringReference,
}

impl SignatureType {
    /// Parse a single signature character
    pub fn from_char(character: char) -> Option<Self> {
        match character {
            'a' => Some(SignatureType::Array),
            'f' => Some(SignatureType::Float),
            'F' => Some(SignatureType::FloatReference),
            'i' => Some(SignatureType::Int),
            'I' => Some(SignatureType::IntReference),
            's' => Some(SignatureType::String),
            'S' => Some(SignatureType::StringReference),
            _ => None,
        }
    }

    /// The signature character for this type
    pub fn as_char(self) -> char {
        match self {
            SignatureType::Array => 'a',
            SignatureType::Float => 'f',
            SignatureType::FloatReference => 'F',
            SignatureType::Int => 'i',
            SignatureType::IntReference => 'I',
            SignatureType::String => 's',
            SignatureType::StringReference => 'S',
        }
    }

    /// Whether the callee writes this slot
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            SignatureType::FloatReference
                | SignatureType::IntReference
                | SignatureType::StringReference
        )
    }
}

/// A parsed signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    types: Vec<SignatureType>,
    argument_count: usize,
    reference_count: usize,
}

impl Signature {
    /// Parse an outbound signature, used when the script calls a native.
    pub fn parse(signature: &str) -> Result<Self, SignatureError> {
        let mut types = Vec::with_capacity(signature.len());
        let mut seen_reference = false;

        for (position, character) in signature.chars().enumerate() {
            let ty = SignatureType::from_char(character).ok_or(
                SignatureError::InvalidCharacter {
                    character,
                    position,
                },
            )?;

            if ty.is_reference() {
                seen_reference = true;
            } else if seen_reference {
                return Err(SignatureError::PlainAfterReference {
                    character,
                    position,
                });
            }

            types.push(ty);
        }

        Self::from_types(types)
    }

    /// Parse the signature of a script-provided native.
    pub fn parse_provided(signature: &str) -> Result<Self, SignatureError> {
        let mut types = Vec::with_capacity(signature.len());
        for (position, character) in signature.chars().enumerate() {
            match SignatureType::from_char(character) {
                Some(SignatureType::Array) | None => {
                    return Err(SignatureError::InvalidCharacter {
                        character,
                        position,
                    })
                }
                Some(ty) => types.push(ty),
            }
        }

        Self::from_types(types)
    }

    fn from_types(types: Vec<SignatureType>) -> Result<Self, SignatureError> {
        if types.len() > MAX_ARGUMENT_COUNT {
            return Err(SignatureError::TooManyArguments {
                count: types.len(),
                max: MAX_ARGUMENT_COUNT,
            });
        }

        let reference_count = types.iter().filter(|ty| ty.is_reference()).count();
        Ok(Signature {
            argument_count: types.len() - reference_count,
            reference_count,
            types,
        })
    }

    /// The slot types, in declaration order
    pub fn types(&self) -> &[SignatureType] {
        &self.types
    }

    /// Number of slots that consume a caller-supplied value
    pub fn argument_count(&self) -> usize {
        self.argument_count
    }

    /// Number of slots written by the callee
    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    /// Number of arguments the native function physically receives. Every
    /// `S` slot is followed by an injected length argument.
    pub fn physical_count(&self) -> usize {
        self.types.len()
            + self
                .types
                .iter()
                .filter(|ty| **ty == SignatureType::StringReference)
                .count()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the signature has no slots
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
