//! Control-flow exploration and operand-stack depth inference.
//!
//! The walk is split across two worklists. A FIFO queue of function
//! entries starts from the public symbols and grows at every `CALL` and
//! `CLOSURE` site; a per-function LIFO stack of instruction offsets then
//! explores the body. Splitting the two keeps per-function context
//! (argument, local, and capture counts) scoped, and means a `BEGIN`
//! reached by anything other than a call is always an error.
//!
//! For every reached offset the entering operand-stack depth is recorded
//! once; a second edge arriving at a different depth fails verification.

use std::collections::{HashMap, VecDeque};

use lama_common::decode::decode_at;
use lama_common::inst::opcode;
use lama_common::{ByteFile, Inst, Loc};

use crate::error::VerifyError;

/// Per-offset facts discovered by the walk.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct InstMeta {
    /// Proven reachable from some public entry.
    pub reached: bool,
    /// Operand-stack depth entering this instruction.
    pub depth: u16,
    /// Decoded byte length, written at first parse.
    pub len: u16,
    /// Whether the instruction is `END` (augmentation stops here).
    pub is_end: bool,
}

/// Per-entry facts: how the function is entered.
#[derive(Debug, Clone, Copy)]
struct FunMeta {
    is_closure: bool,
    n_captured: u32,
}

/// The walk's result, consumed by augmentation.
#[derive(Debug)]
pub(crate) struct Analysis {
    pub inst: Vec<InstMeta>,
    /// Function entries in discovery order.
    pub functions: Vec<usize>,
}

/// Counts the current function's variables are checked against.
struct FunCtx {
    nargs: u32,
    nlocals: u32,
    n_captured: u32,
}

/// Validate the string table and the public symbol table.
pub(crate) fn check_tables(file: &ByteFile) -> Result<(), VerifyError> {
    let table = file.string_table();
    match table.last() {
        None => return Err(VerifyError::EmptyStringTable),
        Some(&last) if last != 0 => {
            return Err(VerifyError::UnterminatedStringTable { last });
        }
        Some(_) => {}
    }

    for (index, sym) in file.public_symbols().iter().enumerate() {
        if sym.name_offset < 0 || sym.name_offset as usize >= table.len() {
            return Err(VerifyError::PublicSymbolNameOutOfBounds {
                index,
                offset: sym.name_offset,
            });
        }
        if sym.code_offset < 0 || sym.code_offset as usize >= file.code_size() {
            return Err(VerifyError::PublicSymbolCodeOutOfBounds {
                index,
                offset: sym.code_offset,
            });
        }
    }
    Ok(())
}

/// Walk the program from every public entry point.
pub(crate) fn analyze(file: &ByteFile) -> Result<Analysis, VerifyError> {
    let mut analyzer = Analyzer {
        file,
        inst: vec![InstMeta::default(); file.code_size()],
        funcs: HashMap::new(),
        order: Vec::new(),
        fun_queue: VecDeque::new(),
    };

    for sym in file.public_symbols() {
        analyzer.enqueue_function(sym.code_offset as usize, None)?;
    }
    while let Some(entry) = analyzer.fun_queue.pop_front() {
        analyzer.process_function(entry)?;
    }

    Ok(Analysis {
        inst: analyzer.inst,
        functions: analyzer.order,
    })
}

struct Analyzer<'a> {
    file: &'a ByteFile,
    inst: Vec<InstMeta>,
    funcs: HashMap<usize, FunMeta>,
    order: Vec<usize>,
    fun_queue: VecDeque<usize>,
}

impl<'a> Analyzer<'a> {
    /// Record a function entry. `closure` carries the capture count when
    /// the entry comes from a `CLOSURE` site; `None` marks a plain call.
    fn enqueue_function(&mut self, entry: usize, closure: Option<u32>) -> Result<(), VerifyError> {
        match self.funcs.get(&entry) {
            Some(meta) => match closure {
                None if meta.is_closure => Err(VerifyError::ClosureMismatch { at: entry }),
                Some(_) if !meta.is_closure => Err(VerifyError::ClosureMismatch { at: entry }),
                Some(n) if n != meta.n_captured => Err(VerifyError::ClosureVarsMismatch {
                    at: entry,
                    prior: meta.n_captured,
                    found: n,
                }),
                _ => Ok(()),
            },
            None => {
                self.funcs.insert(
                    entry,
                    FunMeta {
                        is_closure: closure.is_some(),
                        n_captured: closure.unwrap_or(0),
                    },
                );
                self.order.push(entry);
                self.fun_queue.push_back(entry);
                Ok(())
            }
        }
    }

    fn process_function(&mut self, entry: usize) -> Result<(), VerifyError> {
        let meta = self.funcs[&entry];
        let decoded = decode_at(self.file, entry).map_err(|source| VerifyError::Decode {
            at: entry,
            source,
        })?;
        let (args, nlocals, header_is_closure) = match decoded.inst {
            Inst::Begin {
                args,
                nlocals,
                is_closure,
            } => (args, nlocals, is_closure),
            _ => return Err(VerifyError::MissingBegin { at: entry }),
        };
        if header_is_closure != meta.is_closure {
            return Err(VerifyError::WrongHeader {
                at: entry,
                header_is_closure,
            });
        }

        let ctx = FunCtx {
            nargs: args.nargs(),
            nlocals,
            n_captured: meta.n_captured,
        };

        let header = &mut self.inst[entry];
        header.reached = true;
        header.depth = 0;
        header.len = decoded.len as u16;

        // The body starts after the header at depth 0.
        let mut work = Vec::new();
        self.enqueue_inst(&mut work, entry + decoded.len, 0)?;
        while let Some(offset) = work.pop() {
            self.parse_at(&mut work, offset, &ctx)?;
        }
        Ok(())
    }

    /// Record an edge into `target` at `depth` and schedule it if new.
    fn enqueue_inst(
        &mut self,
        work: &mut Vec<usize>,
        target: usize,
        depth: u16,
    ) -> Result<(), VerifyError> {
        if target >= self.file.code_size() {
            return Err(VerifyError::FallsOffEnd { at: target });
        }
        let byte = self.file.code()[target];
        if byte == opcode::BEGIN || byte == opcode::BEGIN_CL {
            return Err(VerifyError::BeginNotCalled { at: target });
        }

        let meta = &mut self.inst[target];
        if meta.reached {
            if meta.depth != depth {
                return Err(VerifyError::InconsistentDepth {
                    at: target,
                    prior: meta.depth,
                    found: depth,
                });
            }
            return Ok(());
        }
        meta.reached = true;
        meta.depth = depth;
        work.push(target);
        Ok(())
    }

    fn parse_at(
        &mut self,
        work: &mut Vec<usize>,
        offset: usize,
        ctx: &FunCtx,
    ) -> Result<(), VerifyError> {
        let decoded = decode_at(self.file, offset).map_err(|source| VerifyError::Decode {
            at: offset,
            source,
        })?;
        self.inst[offset].len = decoded.len as u16;

        let mut depth = self.inst[offset].depth as i64;
        let pop = |depth: &mut i64, need: u32| -> Result<(), VerifyError> {
            if *depth < need as i64 {
                return Err(VerifyError::OperandStackUnderflow {
                    at: offset,
                    need,
                    found: *depth as u16,
                });
            }
            *depth -= need as i64;
            Ok(())
        };
        let push = |depth: &mut i64, n: u32| -> Result<(), VerifyError> {
            if *depth + n as i64 >= 1 << 16 {
                return Err(VerifyError::OperandStackOverflow { at: offset });
            }
            *depth += n as i64;
            Ok(())
        };

        let mut jump = None;
        let mut stop = false;

        match decoded.inst {
            Inst::Binop(_) => {
                pop(&mut depth, 2)?;
                push(&mut depth, 1)?;
            }
            Inst::Const(_) | Inst::String { .. } => push(&mut depth, 1)?,
            Inst::Sexp { nargs, .. } => {
                pop(&mut depth, nargs)?;
                push(&mut depth, 1)?;
            }
            Inst::Sta => {
                pop(&mut depth, 3)?;
                push(&mut depth, 1)?;
            }
            Inst::Jmp { target } => {
                jump = Some(target);
                stop = true;
            }
            Inst::End => {
                // The call result must be on top.
                pop(&mut depth, 1)?;
                stop = true;
                self.inst[offset].is_end = true;
            }
            Inst::Swap => {
                pop(&mut depth, 2)?;
                push(&mut depth, 2)?;
            }
            Inst::Drop => pop(&mut depth, 1)?,
            Inst::Dup => {
                pop(&mut depth, 1)?;
                push(&mut depth, 2)?;
            }
            Inst::Elem => {
                pop(&mut depth, 2)?;
                push(&mut depth, 1)?;
            }
            Inst::Ld(loc) => {
                self.check_loc(offset, loc, ctx)?;
                push(&mut depth, 1)?;
            }
            Inst::Lda(loc) => {
                self.check_loc(offset, loc, ctx)?;
                push(&mut depth, 2)?;
            }
            Inst::St(loc) => {
                self.check_loc(offset, loc, ctx)?;
                pop(&mut depth, 1)?;
                push(&mut depth, 1)?;
            }
            Inst::CJmp { target, .. } => {
                pop(&mut depth, 1)?;
                jump = Some(target);
            }
            // enqueue_inst rejects these before they are scheduled; a
            // public entry is the only way in, and that path reads the
            // header in process_function.
            Inst::Begin { .. } => return Err(VerifyError::BeginNotCalled { at: offset }),
            Inst::Closure { entry, ref captured } => {
                for &loc in captured {
                    self.check_loc(offset, loc, ctx)?;
                }
                push(&mut depth, 1)?;
                self.enqueue_function(entry as usize, Some(captured.len() as u32))?;
            }
            Inst::CallClosure { nargs } => {
                pop(&mut depth, nargs.saturating_add(1))?;
                push(&mut depth, 1)?;
            }
            Inst::Call { target, nargs } => {
                pop(&mut depth, nargs)?;
                push(&mut depth, 1)?;
                self.enqueue_function(target as usize, None)?;
            }
            Inst::Tag { .. } | Inst::Array { .. } => {
                pop(&mut depth, 1)?;
                push(&mut depth, 1)?;
            }
            Inst::Fail { .. } => {
                // The scrutinee the interpreter hands to match failure.
                pop(&mut depth, 1)?;
                stop = true;
            }
            Inst::Line { .. } => {}
            Inst::StringPatt => {
                pop(&mut depth, 2)?;
                push(&mut depth, 1)?;
            }
            Inst::Patt(_) => {
                pop(&mut depth, 1)?;
                push(&mut depth, 1)?;
            }
            Inst::CallRead => push(&mut depth, 1)?,
            Inst::CallWrite | Inst::CallLength | Inst::CallString => {
                pop(&mut depth, 1)?;
                push(&mut depth, 1)?;
            }
            Inst::CallArray { nargs } => {
                pop(&mut depth, nargs)?;
                push(&mut depth, 1)?;
            }
        }

        if let Some(target) = jump {
            self.enqueue_inst(work, target as usize, depth as u16)?;
        }
        if !stop {
            self.enqueue_inst(work, offset + decoded.len, depth as u16)?;
        }
        Ok(())
    }

    fn check_loc(&self, at: usize, loc: Loc, ctx: &FunCtx) -> Result<(), VerifyError> {
        let limit = match loc {
            Loc::Global(_) => self.file.global_area_size() as u32,
            Loc::Local(_) => ctx.nlocals,
            Loc::Arg(_) => ctx.nargs,
            Loc::Access(_) => ctx.n_captured,
        };
        if loc.index() >= limit {
            return Err(VerifyError::VariableOutOfRange {
                at,
                kind: loc.kind_name(),
                index: loc.index(),
                limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lama_common::build::ImageBuilder;
    use lama_common::inst::opcode;
    use lama_common::Loc;

    fn minimal_main(body: impl FnOnce(&mut ImageBuilder)) -> ByteFile {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 0);
        body(&mut b);
        b.end();
        b.export("main", main);
        b.build()
    }

    #[test]
    fn empty_string_table_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.push(0x16);
        let file = ByteFile::from_bytes(&bytes).unwrap();
        assert_eq!(check_tables(&file), Err(VerifyError::EmptyStringTable));
    }

    #[test]
    fn unterminated_string_table_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        let file = ByteFile::from_bytes(&bytes).unwrap();
        assert_eq!(
            check_tables(&file),
            Err(VerifyError::UnterminatedStringTable { last: b'c' })
        );
    }

    #[test]
    fn symbol_offsets_validated() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(0, 0);
        b.const_(0);
        b.end();
        b.export("main", main);
        let mut bytes = b.bytes();
        // Corrupt the symbol's code offset (word 4 of the file) to point
        // past the code segment.
        bytes[16..20].copy_from_slice(&1000i32.to_le_bytes());
        let file = ByteFile::from_bytes(&bytes).unwrap();
        assert_eq!(
            check_tables(&file),
            Err(VerifyError::PublicSymbolCodeOutOfBounds {
                index: 0,
                offset: 1000
            })
        );
    }

    #[test]
    fn straight_line_depths_recorded() {
        let file = minimal_main(|b| {
            b.const_(1); // depth 0 entering
            b.const_(2); // depth 1
            b.binop(lama_common::BinOp::Add); // depth 2
        });
        let analysis = analyze(&file).unwrap();
        assert_eq!(analysis.functions, vec![0]);
        let body = 9; // after BEGIN
        assert_eq!(analysis.inst[body].depth, 0);
        assert_eq!(analysis.inst[body + 5].depth, 1);
        assert_eq!(analysis.inst[body + 10].depth, 2);
        assert!(analysis.inst[body + 11].is_end);
        assert_eq!(analysis.inst[body + 11].depth, 1);
    }

    #[test]
    fn join_depth_mismatch_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let join = b.label();
        b.begin(2, 0);
        b.const_(0); // depth 1
        b.cjmp_z(join); // pops; join seen at depth 0
        b.const_(1); // depth 1 after fall-through
        b.bind(join); // fall-through arrives at depth 1
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(
            matches!(err, VerifyError::InconsistentDepth { prior: 0, found: 1, .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn underflow_rejected() {
        let file = minimal_main(|b| {
            b.binop(lama_common::BinOp::Add); // nothing to pop
        });
        let err = analyze(&file).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::OperandStackUnderflow { need: 2, found: 0, .. }
        ));
    }

    #[test]
    fn depth_overflow_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 0);
        b.const_(1);
        for _ in 0..(1 << 16) {
            b.op(opcode::DUP);
        }
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(err, VerifyError::OperandStackOverflow { .. }));
    }

    #[test]
    fn fallthrough_into_begin_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 0);
        b.const_(1);
        // No END: control runs into the next function's header.
        b.begin(0, 0);
        b.const_(2);
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(err, VerifyError::BeginNotCalled { at: 14 }));
    }

    #[test]
    fn jump_into_begin_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let f = b.label();
        b.begin(2, 0);
        b.jmp(f);
        b.bind(f);
        b.begin_cl(0, 0);
        b.const_(1);
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(err, VerifyError::BeginNotCalled { .. }));
    }

    #[test]
    fn falling_off_code_end_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 0);
        b.const_(1); // last instruction; fall-through leaves the code
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(err, VerifyError::FallsOffEnd { .. }));
    }

    #[test]
    fn call_targets_are_verified() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let f = b.label();
        b.begin(2, 0);
        b.const_(3);
        b.call(f, 1);
        b.end();
        b.bind(f);
        b.begin(1, 0);
        b.ld(Loc::Arg(0));
        b.end();
        b.export("main", main);
        let file = b.build();
        let analysis = analyze(&file).unwrap();
        assert_eq!(analysis.functions.len(), 2);
    }

    #[test]
    fn call_target_without_begin_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let f = b.label();
        b.begin(2, 0);
        b.call(f, 0);
        b.end();
        b.bind(f);
        b.const_(1); // not a BEGIN
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(err, VerifyError::MissingBegin { .. }));
    }

    #[test]
    fn closure_and_call_of_same_entry_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let f = b.label();
        b.begin(2, 1);
        b.closure(f, &[Loc::Local(0)]);
        b.op(opcode::DROP);
        b.call(f, 0);
        b.end();
        b.bind(f);
        b.begin_cl(0, 0);
        b.const_(1);
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(err, VerifyError::ClosureMismatch { .. }));
    }

    #[test]
    fn inconsistent_capture_counts_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let f = b.label();
        b.begin(2, 2);
        b.closure(f, &[Loc::Local(0)]);
        b.op(opcode::DROP);
        b.closure(f, &[Loc::Local(0), Loc::Local(1)]);
        b.op(opcode::DROP);
        b.const_(0);
        b.end();
        b.bind(f);
        b.begin_cl(0, 0);
        b.const_(1);
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::ClosureVarsMismatch { prior: 1, found: 2, .. }
        ));
    }

    #[test]
    fn plain_header_on_closure_call_rejected() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        let f = b.label();
        b.begin(2, 1);
        b.closure(f, &[Loc::Local(0)]);
        b.callc(0);
        b.end();
        b.bind(f);
        b.begin(0, 0); // should be BEGINcl
        b.const_(1);
        b.end();
        b.export("main", main);
        let file = b.build();
        let err = analyze(&file).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::WrongHeader { header_is_closure: false, .. }
        ));
    }

    #[test]
    fn variable_bounds_checked_per_designation() {
        // Local out of range.
        let err = analyze(&minimal_main(|b| {
            b.ld(Loc::Local(0)); // nlocals = 0
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::VariableOutOfRange { kind: "local", index: 0, limit: 0, .. }
        ));

        // Arg in range (nargs = 2).
        assert!(analyze(&minimal_main(|b| {
            b.ld(Loc::Arg(1));
        }))
        .is_ok());

        // Arg out of range.
        let err = analyze(&minimal_main(|b| {
            b.ld(Loc::Arg(2));
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::VariableOutOfRange { kind: "argument", .. }
        ));

        // Global out of range (no globals declared).
        let err = analyze(&minimal_main(|b| {
            b.st(Loc::Global(0));
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::VariableOutOfRange { kind: "global", .. }
        ));

        // Access out of range in a non-closure function.
        let err = analyze(&minimal_main(|b| {
            b.ld(Loc::Access(0));
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::VariableOutOfRange { kind: "captured", .. }
        ));
    }

    #[test]
    fn swap_requires_two_operands() {
        let err = analyze(&minimal_main(|b| {
            b.const_(1);
            b.op(opcode::SWAP);
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::OperandStackUnderflow { need: 2, found: 1, .. }
        ));

        assert!(analyze(&minimal_main(|b| {
            b.const_(1);
            b.const_(2);
            b.op(opcode::SWAP);
            b.op(opcode::DROP);
        }))
        .is_ok());
    }

    #[test]
    fn loop_reconverges_at_equal_depth() {
        let mut b = ImageBuilder::new();
        let main = b.here();
        b.begin(2, 1);
        let head = b.label();
        b.const_(10);
        b.st(Loc::Local(0));
        b.op(opcode::DROP);
        b.bind(head);
        b.ld(Loc::Local(0));
        b.cjmp_nz(head); // loop back at depth 0, as the first visit saw
        b.const_(0);
        b.end();
        b.export("main", main);
        let file = b.build();
        assert!(analyze(&file).is_ok());
    }
}
