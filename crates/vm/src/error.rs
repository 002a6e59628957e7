//! Runtime errors.
//!
//! Every variant carries the code offset of the instruction that raised
//! it (`at`), matching how the verifier reports static failures. Offsets
//! are meaningful even for conditions the verifier cannot rule out:
//! division by zero, type mismatches on operands, and resource
//! exhaustion.

use lama_common::DecodeError;
use thiserror::Error;

/// Errors raised by the runtime library's object operations, before the
/// interpreter attaches an instruction offset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// A handle word that does not name a live object.
    #[error("dangling object reference")]
    Dangling,

    /// An operation expected a reference, found an immediate integer.
    #[error("expected a reference, found an immediate value")]
    ExpectedReference,

    /// Indexing expected a boxed integer index.
    #[error("expected a (boxed) integer index")]
    ExpectedIntIndex,

    /// Element access on a value that has no elements.
    #[error("element access on a non-aggregate value")]
    NotAnAggregate,

    /// Length of a value that has no length.
    #[error("length of a non-aggregate value")]
    NoLength,

    /// Element index outside the aggregate.
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: i32, len: usize },

    /// `CALLC` or captured-variable access on a non-closure.
    #[error("expected a closure")]
    NotAClosure,

    /// A string element store with a non-integer value.
    #[error("expected a (boxed) integer to store into a string")]
    ExpectedIntForString,

    /// String comparison against a non-string pattern.
    #[error("string pattern is not a string")]
    PatternNotAString,
}

/// Errors that abort execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The instruction stream failed to decode. Unreachable once the
    /// verifier has accepted the program.
    #[error("failed to decode at {at:#x}: {source}")]
    Decode { at: usize, source: DecodeError },

    #[error("division by zero at {at:#x}")]
    DivisionByZero { at: usize },

    /// An operand that had to be a boxed integer was a reference.
    #[error("expected a (boxed) number at the operand stack top, found {found:#x} at {at:#x}")]
    ExpectedInt { at: usize, found: i64 },

    /// A runtime-library operation failed.
    #[error("{source} at {at:#x}")]
    Heap { at: usize, source: HeapError },

    /// `STA` with an index operand that is neither a boxed integer nor a
    /// reference cell produced by `LDA`.
    #[error("expected an index or a reference cell at {at:#x}")]
    BadStoreTarget { at: usize },

    /// The frame stack hit its bound.
    #[error("frame stack size exhausted at {at:#x}")]
    FrameStackExhausted { at: usize },

    /// A function prologue found too little room for its operand region.
    #[error("might exhaust stack at {at:#x}")]
    MightExhaustStack { at: usize },

    /// A push ran into the value stack's capacity.
    #[error("value stack exhausted at {at:#x}")]
    ValueStackExhausted { at: usize },

    /// Pop below the current frame's operand region.
    #[error("operand stack underflow at {at:#x}")]
    OperandStackUnderflow { at: usize },

    /// `END` with no frame to pop.
    #[error("no function to end at {at:#x}")]
    NoFunctionToEnd { at: usize },

    /// Captured-variable access in a frame that was not entered through
    /// `CALLC`.
    #[error("current frame has no closure at {at:#x}")]
    NoClosure { at: usize },

    /// A reference cell addressed a stack slot that no longer exists.
    #[error("reference cell outside the live stack at {at:#x}")]
    DeadCell { at: usize },

    /// `FAIL`: the scrutinee matched no pattern.
    #[error("match failure at <unknown file>:{line}.{col}, value {value}")]
    MatchFailure {
        at: usize,
        line: i32,
        col: i32,
        value: String,
    },

    /// `Lread`/`Lwrite` I/O failure, including unparsable input.
    #[error("i/o error at {at:#x}: {message}")]
    Io { at: usize, message: String },
}

impl RuntimeError {
    /// The code offset the error is tagged with.
    pub fn offset(&self) -> usize {
        match self {
            RuntimeError::Decode { at, .. }
            | RuntimeError::DivisionByZero { at }
            | RuntimeError::ExpectedInt { at, .. }
            | RuntimeError::Heap { at, .. }
            | RuntimeError::BadStoreTarget { at }
            | RuntimeError::FrameStackExhausted { at }
            | RuntimeError::MightExhaustStack { at }
            | RuntimeError::ValueStackExhausted { at }
            | RuntimeError::OperandStackUnderflow { at }
            | RuntimeError::NoFunctionToEnd { at }
            | RuntimeError::NoClosure { at }
            | RuntimeError::DeadCell { at }
            | RuntimeError::MatchFailure { at, .. }
            | RuntimeError::Io { at, .. } => *at,
        }
    }
}
