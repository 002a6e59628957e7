//! Errors for image parsing and instruction decoding.

use thiserror::Error;

/// Errors from parsing a bytefile image (header and segment layout).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The file is smaller than the three-word header.
    #[error("bytefile too small to contain header ({size} bytes)")]
    TruncatedHeader { size: usize },

    /// The header's string table size is negative.
    #[error("string table size is negative ({0})")]
    NegativeStringTableSize(i32),

    /// The header's global area size is negative.
    #[error("global area size is negative ({0})")]
    NegativeGlobalAreaSize(i32),

    /// The header's public symbol count is negative.
    #[error("number of public symbols is negative ({0})")]
    NegativePublicSymbolCount(i32),

    /// The public symbol table runs past the end of the file.
    #[error("bytefile is too small to hold public symbol table of {need} bytes")]
    PublicSymbolsOverrun { need: usize },

    /// The string table runs past the end of the file.
    #[error("bytefile is too small to hold string table of {need} bytes")]
    StringTableOverrun { need: usize },
}

/// Errors from loading a bytefile from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read bytecode from {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Errors from decoding a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The code segment ended in the middle of an instruction.
    #[error("unexpected bytecode end, expected a {expected}")]
    UnexpectedEnd { expected: &'static str },

    /// The opcode byte is not part of the instruction set.
    #[error("unsupported instruction code {code:#04x}")]
    UnknownOpcode { code: u8 },

    /// A string immediate does not index into the string table.
    #[error("invalid string with out-of-bounds address {offset:#x}")]
    StringOutOfBounds { offset: i32 },

    /// A code-offset immediate does not index into the code segment.
    #[error("invalid code address {offset:#x} out of bounds [0, {code_size:#x})")]
    CodeOutOfBounds { offset: i32, code_size: usize },

    /// A `CONST` immediate outside `[-2^30, 2^30 - 1)`.
    #[error("invalid CONST of {value} is out of bounds")]
    ConstOutOfBounds { value: i32 },

    /// A count immediate (`nargs`, `nelems`, `nlocals`, capture count)
    /// is negative.
    #[error("negative {what} {value}")]
    NegativeCount { what: &'static str, value: i32 },

    /// A variable index immediate is negative.
    #[error("negative variable index {value}")]
    NegativeIndex { value: i32 },

    /// A designation byte outside `{0..3}`.
    #[error("unsupported variable designation {value:#x}")]
    BadDesignation { value: u8 },
}
