//! Lama virtual machine — executes verified bytecode images.
//!
//! The machine is a stack interpreter with:
//! - a unified call/operand stack holding every frame's arguments,
//!   locals, and operand region in one bounded slot array
//! - a global area of tagged words, initialised to boxed 0
//! - a runtime library owning heap objects (strings, arrays,
//!   S-expressions, closures) addressed through tagged handle words
//!
//! Programs must be verified first: the interpreter decodes through the
//! same decoder as the verifier and re-checks only what static analysis
//! cannot see (operand types, arithmetic, resource bounds).
//!
//! # Usage
//!
//! ```
//! use lama_common::build::ImageBuilder;
//! use lama_vm::Machine;
//!
//! let mut b = ImageBuilder::new();
//! let main = b.here();
//! b.begin(2, 0);
//! b.const_(42);
//! b.op(lama_common::inst::opcode::CALL_LWRITE);
//! b.end();
//! b.export("main", main);
//! let mut file = b.build();
//! lama_verifier::verify(&mut file).unwrap();
//!
//! let mut out = Vec::new();
//! Machine::with_io(&file, &b""[..], &mut out).run().unwrap();
//! assert_eq!(out, b"42\n");
//! ```

pub mod error;
pub mod heap;
pub mod interp;
pub mod stack;

pub use error::{HeapError, RuntimeError};
pub use heap::Heap;
pub use interp::{interpret, Machine};
pub use stack::ValueStack;
