//! Augmentation: write each function's maximum operand-stack depth into
//! its `BEGIN` header.
//!
//! After the CFG walk has recorded an entering depth for every reachable
//! offset, each function body is walked contiguously from its header to
//! its `END`, taking the maximum recorded depth along the way. The result
//! is packed into the header's first immediate as `max << 16 | nArgs`,
//! preserving the low half the compiler wrote — which also makes the pass
//! idempotent on an already-augmented image.
//!
//! Offsets inside the body that the CFG walk never reached (dead code
//! between an unconditional transfer and the next label) are re-decoded
//! for their length only and contribute no depth.

use lama_common::decode::decode_at;
use lama_common::{ArgsPacked, ByteFile, Inst};

use crate::analysis::Analysis;
use crate::error::VerifyError;

pub(crate) fn augment(file: &mut ByteFile, analysis: &Analysis) -> Result<(), VerifyError> {
    for &entry in &analysis.functions {
        let mut offset = entry;
        let mut max: u32 = 0;
        loop {
            if offset >= file.code_size() {
                return Err(VerifyError::BodyRunsPastEnd { entry });
            }
            let meta = analysis.inst[offset];
            let (len, is_end) = if meta.reached {
                max = max.max(meta.depth as u32);
                (meta.len as usize, meta.is_end)
            } else {
                let decoded = decode_at(file, offset).map_err(|source| VerifyError::Decode {
                    at: offset,
                    source,
                })?;
                (decoded.len, matches!(decoded.inst, Inst::End))
            };
            if is_end {
                break;
            }
            offset += len;
        }

        let args = ArgsPacked(file.word_at(entry + 1) as u32);
        file.patch_word(entry + 1, args.with_max_operands(max).0 as i32);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use lama_common::build::ImageBuilder;
    use lama_common::inst::opcode;
    use lama_common::BinOp;

    fn augmented(mut file: ByteFile) -> ByteFile {
        let analysis = analyze(&file).unwrap();
        augment(&mut file, &analysis).unwrap();
        file
    }

    #[test]
    fn max_depth_written_into_header() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 0);
        b.const_(1);
        b.const_(2);
        b.const_(3); // peak entering depth: 3 at the END
        b.binop(BinOp::Add);
        b.binop(BinOp::Add);
        b.end();
        b.export("main", main);
        let file = augmented(b.build());

        let args = ArgsPacked(file.word_at(1) as u32);
        assert_eq!(args.nargs(), 2);
        assert_eq!(args.max_operands(), 3);
    }

    #[test]
    fn each_function_gets_its_own_maximum() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let f = b.label();
        b.begin(2, 0);
        b.const_(1);
        b.call(f, 1); // depth 1 -> 1
        b.end();
        b.bind(f);
        b.begin(1, 0);
        b.const_(10);
        b.const_(20);
        b.const_(30);
        b.const_(40);
        b.binop(BinOp::Add);
        b.binop(BinOp::Add);
        b.binop(BinOp::Add);
        b.end();
        b.export("main", main);
        let file = b.build();
        let f_entry = (9 + 5 + 9 + 1) as usize; // BEGIN + CONST + CALL + END
        let file = augmented(file);

        assert_eq!(ArgsPacked(file.word_at(1) as u32).max_operands(), 1);
        assert_eq!(
            ArgsPacked(file.word_at(f_entry + 1) as u32).max_operands(),
            4
        );
    }

    #[test]
    fn augmentation_is_idempotent() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 1);
        b.const_(5);
        b.const_(6);
        b.binop(BinOp::Mul);
        b.end();
        b.export("main", main);

        let once = augmented(b.build());
        let twice = augmented(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn dead_code_in_body_is_skipped_for_length() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let after = b.label();
        b.begin(2, 0);
        b.const_(1);
        b.jmp(after);
        // Dead: never enqueued, still decodable.
        b.const_(7);
        b.op(opcode::DROP);
        b.bind(after);
        b.end();
        b.export("main", main);
        let file = augmented(b.build());

        assert_eq!(ArgsPacked(file.word_at(1) as u32).max_operands(), 1);
    }

    #[test]
    fn body_without_end_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 0);
        b.const_(1);
        b.fail(1, 1); // stops the walk without an END
        b.export("main", main);
        let mut file = b.build();
        let analysis = analyze(&file).unwrap();
        let err = augment(&mut file, &analysis).unwrap_err();
        assert!(matches!(err, VerifyError::BodyRunsPastEnd { entry: 0 }));
    }
}
