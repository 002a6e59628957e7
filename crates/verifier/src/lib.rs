//! Lama bytecode verifier — static analysis for loaded images.
//!
//! The verifier proves that, starting from every public entry point, the
//! program only decodes legal instructions, the operand stack has a
//! consistent depth at every reachable offset, function headers are never
//! reached except through calls, and every variable index is in range for
//! its designation. It then annotates each function header in place with
//! the maximum operand-stack depth its body can reach, which gives the
//! interpreter an O(1) stack-exhaustion check at call time.
//!
//! # Usage
//!
//! ```
//! use lama_common::build::ImageBuilder;
//! use lama_verifier::verify;
//!
//! let mut b = ImageBuilder::new();
//! let main = b.here();
//! b.begin(2, 0);
//! b.const_(42);
//! b.end();
//! b.export("main", main);
//! let mut file = b.build();
//!
//! assert!(verify(&mut file).is_ok());
//! ```
//!
//! # Phases
//!
//! 1. **Tables** — the string table is non-empty and NUL-terminated;
//!    public symbol offsets index their segments.
//! 2. **Analysis** — worklist walk of the control-flow graph from the
//!    public entries, inferring operand-stack depths.
//! 3. **Augmentation** — rewrite each `BEGIN` immediate to carry the
//!    body's maximum depth. This is the only mutation of the image.

mod analysis;
mod augment;
pub mod error;

pub use error::VerifyError;

use lama_common::ByteFile;

/// Verify an image and augment its function headers.
///
/// On failure the image may already carry some augmented headers;
/// callers are expected to discard it.
pub fn verify(file: &mut ByteFile) -> Result<(), VerifyError> {
    analysis::check_tables(file)?;
    let analysis = analysis::analyze(file)?;
    augment::augment(file, &analysis)
}
