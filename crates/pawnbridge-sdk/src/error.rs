//! Error types for the Pawnbridge SDK

/// Signature parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// A character outside of the accepted grammar was found
    #[error("Invalid character '{character}' in signature at position {position}")]
    InvalidCharacter {
        /// The offending character
        character: char,
        /// Zero-based position in the signature
        position: usize,
    },

    /// A plain argument followed a by-reference argument
    #[error("Plain argument '{character}' at position {position} follows a reference argument")]
    PlainAfterReference {
        /// The offending character
        character: char,
        /// Zero-based position in the signature
        position: usize,
    },

    /// The signature declares more arguments than the buffers can hold
    #[error("Signature declares {count} arguments, at most {max} are supported")]
    TooManyArguments {
        /// Declared argument count
        count: usize,
        /// Maximum supported argument count
        max: usize,
    },
}
