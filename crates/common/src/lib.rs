//! Shared types for the Lama bytecode toolchain.
//!
//! This crate provides the foundations the verifier and interpreter are
//! built on:
//!
//! - [`Value`] — tagged machine words: boxed integers and reference words
//! - [`ByteFile`] — the in-memory layout of a loaded bytecode image
//! - [`Inst`] and [`decode::decode_at`] — the instruction set and its
//!   cursor-based decoder
//! - [`build::ImageBuilder`] — programmatic image construction for tests
//!   and tooling
//!
//! # Dependencies
//!
//! This crate uses `thiserror` (compile-time proc-macro, zero runtime
//! cost) and has no other dependencies.

pub mod build;
pub mod bytefile;
pub mod decode;
pub mod error;
pub mod inst;
pub mod value;

// Re-export commonly used types at the crate root.
pub use bytefile::{ByteFile, PublicSymbol};
pub use error::{DecodeError, FormatError, LoadError};
pub use inst::{ArgsPacked, BinOp, Inst, Loc, PattKind};
pub use value::{Cell, Handle, Value};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_image(code: Vec<u8>) -> ByteFile {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(b"abc\0");
        bytes.extend_from_slice(&code);
        ByteFile::from_bytes(&bytes).expect("well-formed layout")
    }

    proptest! {
        /// Boxing then unboxing is the identity across the whole range.
        #[test]
        fn box_unbox_roundtrip(n in Value::INT_MIN..Value::INT_MAX) {
            let v = Value::int(n);
            prop_assert!(v.is_int());
            prop_assert_eq!(v.as_int(), n);
        }

        /// Every boxed integer has the low bit set; no reference does.
        #[test]
        fn tag_bit_partitions(n in any::<i32>(), h in any::<u32>()) {
            prop_assert!(Value::int(n).is_int());
            prop_assert!(!Value::handle(Handle(h >> 2)).is_int());
        }

        /// The decoder never panics on arbitrary bytes, and when it
        /// succeeds the reported length stays inside the code segment.
        #[test]
        fn decode_is_total(code in prop::collection::vec(any::<u8>(), 1..64)) {
            let file = arb_image(code);
            match decode::decode_at(&file, 0) {
                Ok(d) => {
                    prop_assert!(d.len >= 1);
                    prop_assert!(d.len <= file.code_size());
                }
                Err(_) => {}
            }
        }

        /// Image parsing never panics on arbitrary bytes.
        #[test]
        fn from_bytes_is_total(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = ByteFile::from_bytes(&bytes);
        }
    }
}
