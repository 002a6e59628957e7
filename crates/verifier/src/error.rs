//! Verification errors.
//!
//! Every variant that concerns an instruction carries the code offset at
//! fault, so a failure can be traced back into the image.

use lama_common::DecodeError;
use thiserror::Error;

/// Errors found while verifying a bytecode image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    // --- Table validation ---
    /// The string table has no bytes at all.
    #[error("empty string table")]
    EmptyStringTable,

    /// The string table's final byte is not NUL.
    #[error("string table ends with non-zero char {last:#04x}")]
    UnterminatedStringTable { last: u8 },

    /// A public symbol's name offset does not index the string table.
    #[error("invalid public symbol {index}: out-of-bounds name address {offset:#x}")]
    PublicSymbolNameOutOfBounds { index: usize, offset: i32 },

    /// A public symbol's code offset does not index the code segment.
    #[error("invalid public symbol {index}: out-of-bounds code address {offset:#x}")]
    PublicSymbolCodeOutOfBounds { index: usize, offset: i32 },

    // --- Instruction stream ---
    /// An instruction failed to decode.
    #[error("failed to parse at instruction {at:#x}: {source}")]
    Decode { at: usize, source: DecodeError },

    /// An instruction pops more operands than the stack holds.
    #[error("need at least {need} operands in stack at instruction {at:#x}, found {found}")]
    OperandStackUnderflow { at: usize, need: u32, found: u16 },

    /// A push would bring the operand stack depth to 2^16.
    #[error("operand stack size overflow at instruction {at:#x}")]
    OperandStackOverflow { at: usize },

    /// Two control-flow edges reach the same offset at different depths.
    #[error("operand stack size inconsistency at instruction {at:#x}; {prior} vs. {found}")]
    InconsistentDepth { at: usize, prior: u16, found: u16 },

    // --- Functions ---
    /// A branch or fall-through reaches a `BEGIN`/`BEGINcl` header.
    #[error("control reaches function header at {at:#x} without a call")]
    BeginNotCalled { at: usize },

    /// A call target does not start with `BEGIN`/`BEGINcl`.
    #[error("function entry at {at:#x} does not start with BEGIN")]
    MissingBegin { at: usize },

    /// The header kind (`BEGIN` vs `BEGINcl`) contradicts the call sites.
    #[error("function header at {at:#x} does not match how it is called")]
    WrongHeader { at: usize, header_is_closure: bool },

    /// The same entry is targeted by both `CALL` and `CLOSURE`.
    #[error("function at {at:#x} is entered both as a closure and as a plain function")]
    ClosureMismatch { at: usize },

    /// Two `CLOSURE` sites capture different variable counts for one entry.
    #[error("closure at {at:#x} captures {found} variables at one site and {prior} at another")]
    ClosureVarsMismatch { at: usize, prior: u32, found: u32 },

    /// A variable index is out of range for its designation.
    #[error("{kind} variable index {index} out of range at instruction {at:#x} (limit {limit})")]
    VariableOutOfRange {
        at: usize,
        kind: &'static str,
        index: u32,
        limit: u32,
    },

    /// Control flows past the last byte of the code segment.
    #[error("control reaches the end of code at {at:#x}")]
    FallsOffEnd { at: usize },

    /// Augmentation walked a function body that never reaches `END`.
    #[error("function at {entry:#x} has no END before the end of code")]
    BodyRunsPastEnd { entry: usize },
}
