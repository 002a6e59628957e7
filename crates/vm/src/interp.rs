//! The dispatch loop.
//!
//! A [`Machine`] executes a verified image: it owns the global area, the
//! runtime stack, the heap, and the I/O handles `Lread`/`Lwrite` talk
//! to. Instructions are decoded on the fly with the same decoder the
//! verifier used, so operand-shape failures cannot occur here on a
//! verified program; everything the verifier cannot rule out (operand
//! types, division by zero, resource exhaustion) is re-checked and
//! reported with the offending instruction's offset.

use std::io::{BufRead, Write};

use lama_common::decode::decode_at;
use lama_common::{BinOp, ByteFile, Cell, Inst, Loc, PattKind, Value};

use crate::error::RuntimeError;
use crate::heap::{tag_hash, Heap, Shape};
use crate::stack::ValueStack;

enum Flow {
    Continue,
    Halt,
}

/// An executing program instance.
///
/// The image must have passed verification first: variable indices are
/// trusted, so running an unverified image can panic on an out-of-range
/// access instead of returning an error.
pub struct Machine<'a, R, W> {
    file: &'a ByteFile,
    globals: Vec<Value>,
    stack: ValueStack,
    heap: Heap,
    input: R,
    output: W,
    ip: usize,
}

impl<'a, R: BufRead, W: Write> Machine<'a, R, W> {
    /// A machine over explicit I/O handles.
    pub fn with_io(file: &'a ByteFile, input: R, output: W) -> Self {
        Machine {
            file,
            globals: vec![Value::int(0); file.global_area_size()],
            stack: ValueStack::new(),
            heap: Heap::new(),
            input,
            output,
            ip: 0,
        }
    }

    /// Execute from code offset 0 until the bottom frame's `END`.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            match self.step()? {
                Flow::Continue => {}
                Flow::Halt => return Ok(()),
            }
        }
    }

    fn step(&mut self) -> Result<Flow, RuntimeError> {
        let at = self.ip;
        let decoded =
            decode_at(self.file, at).map_err(|source| RuntimeError::Decode { at, source })?;
        self.ip = at + decoded.len;

        match decoded.inst {
            Inst::Binop(BinOp::Eq) => {
                // Raw word comparison: value equality on boxed integers,
                // reference identity on everything else.
                let rhs = self.stack.pop(at)?;
                let lhs = self.stack.pop(at)?;
                self.stack.push(Value::int((lhs.raw() == rhs.raw()) as i32), at)?;
            }
            Inst::Binop(op) => {
                let rhs = self.pop_int(at)?;
                let lhs = self.pop_int(at)?;
                if matches!(op, BinOp::Div | BinOp::Mod) && rhs == 0 {
                    return Err(RuntimeError::DivisionByZero { at });
                }
                let result = match op {
                    BinOp::Add => lhs.wrapping_add(rhs),
                    BinOp::Sub => lhs.wrapping_sub(rhs),
                    BinOp::Mul => lhs.wrapping_mul(rhs),
                    BinOp::Div => lhs.wrapping_div(rhs),
                    BinOp::Mod => lhs.wrapping_rem(rhs),
                    BinOp::Lt => (lhs < rhs) as i32,
                    BinOp::Le => (lhs <= rhs) as i32,
                    BinOp::Gt => (lhs > rhs) as i32,
                    BinOp::Ge => (lhs >= rhs) as i32,
                    BinOp::Ne => (lhs != rhs) as i32,
                    BinOp::And => (lhs != 0 && rhs != 0) as i32,
                    BinOp::Or => (lhs != 0 || rhs != 0) as i32,
                    BinOp::Eq => unreachable!("handled above"),
                };
                self.stack.push(Value::int(result), at)?;
            }
            Inst::Const(v) => self.stack.push(Value::int(v), at)?,
            Inst::String { offset } => {
                let v = self.heap.alloc_string(self.file.cstr_at(offset as usize));
                self.stack.push(v, at)?;
            }
            Inst::Sexp { tag_offset, nargs } => {
                let tag = tag_hash(self.file.cstr_at(tag_offset as usize));
                let fields = self.pop_reversed(nargs as usize, at)?;
                let v = self.heap.alloc_sexp(tag, fields);
                self.stack.push(v, at)?;
            }
            Inst::Sta => {
                let value = self.stack.pop(at)?;
                let index = self.stack.pop(at)?;
                let container = self.stack.pop(at)?;
                if index.is_int() {
                    self.heap
                        .set_elem(container, index, value)
                        .map_err(|source| RuntimeError::Heap { at, source })?;
                } else if let Some(cell) = index.as_cell() {
                    self.write_cell(cell, value, at)?;
                } else {
                    return Err(RuntimeError::BadStoreTarget { at });
                }
                self.stack.push(value, at)?;
            }
            Inst::Jmp { target } => self.ip = target as usize,
            Inst::End => {
                let return_address = self.stack.pop_frame(at)?;
                if self.stack.at_bottom() {
                    return Ok(Flow::Halt);
                }
                self.ip = return_address;
            }
            Inst::Swap => {
                let a = self.stack.pop(at)?;
                let b = self.stack.pop(at)?;
                self.stack.push(a, at)?;
                self.stack.push(b, at)?;
            }
            Inst::Drop => {
                self.stack.pop(at)?;
            }
            Inst::Dup => {
                let top = self.stack.peek(at)?;
                self.stack.push(top, at)?;
            }
            Inst::Elem => {
                let index = self.stack.pop(at)?;
                let container = self.stack.pop(at)?;
                let v = self
                    .heap
                    .elem(container, index)
                    .map_err(|source| RuntimeError::Heap { at, source })?;
                self.stack.push(v, at)?;
            }
            Inst::Ld(loc) => {
                let v = self.load_loc(loc, at)?;
                self.stack.push(v, at)?;
            }
            Inst::Lda(loc) => {
                // The address is pushed twice: one copy feeds STA's index
                // operand, the duplicate satisfies its container operand.
                let cell = Value::cell(self.cell_of(loc, at)?);
                self.stack.push(cell, at)?;
                self.stack.push(cell, at)?;
            }
            Inst::St(loc) => {
                let v = self.stack.peek(at)?;
                self.store_loc(loc, v, at)?;
            }
            Inst::CJmp { on_nonzero, target } => {
                let condition = self.pop_int(at)?;
                if (condition != 0) == on_nonzero {
                    self.ip = target as usize;
                }
            }
            Inst::Begin { args, nlocals, .. } => {
                self.stack.push_frame(
                    args.nargs() as usize,
                    nlocals as usize,
                    args.max_operands() as usize,
                    at,
                )?;
            }
            Inst::Closure { entry, captured } => {
                let mut values = Vec::with_capacity(captured.len());
                for &loc in &captured {
                    values.push(self.load_loc(loc, at)?);
                }
                let v = self.heap.alloc_closure(entry as usize, values);
                self.stack.push(v, at)?;
            }
            Inst::CallClosure { nargs } => {
                // The closure operand sits under the arguments; BEGINcl
                // consumes it together with them.
                let closure = self.stack.peek_at(nargs as usize, at)?;
                let entry = self
                    .heap
                    .closure_entry(closure)
                    .map_err(|source| RuntimeError::Heap { at, source })?;
                self.stack.set_next_return(self.ip);
                self.stack.set_next_is_closure(true);
                self.ip = entry;
            }
            Inst::Call { target, .. } => {
                self.stack.set_next_return(self.ip);
                self.stack.set_next_is_closure(false);
                self.ip = target as usize;
            }
            Inst::Tag { tag_offset, nargs } => {
                let tag = tag_hash(self.file.cstr_at(tag_offset as usize));
                let v = self.stack.pop(at)?;
                self.stack.push(self.heap.tag_patt(v, tag, nargs as usize), at)?;
            }
            Inst::Array { nelems } => {
                let v = self.stack.pop(at)?;
                self.stack
                    .push(self.heap.array_patt(v, nelems as usize), at)?;
            }
            Inst::Fail { line, col } => {
                let v = self.stack.pop(at)?;
                return Err(RuntimeError::MatchFailure {
                    at,
                    line,
                    col,
                    value: self.heap.render(v),
                });
            }
            Inst::Line { .. } => {}
            Inst::StringPatt => {
                let x = self.stack.pop(at)?;
                let y = self.stack.pop(at)?;
                let v = self
                    .heap
                    .string_patt(x, y)
                    .map_err(|source| RuntimeError::Heap { at, source })?;
                self.stack.push(v, at)?;
            }
            Inst::Patt(kind) => {
                let v = self.stack.pop(at)?;
                let shape = match kind {
                    PattKind::String => Shape::String,
                    PattKind::Array => Shape::Array,
                    PattKind::Sexp => Shape::Sexp,
                    PattKind::Boxed => Shape::Boxed,
                    PattKind::Unboxed => Shape::Unboxed,
                    PattKind::Closure => Shape::Closure,
                };
                self.stack.push(self.heap.shape_patt(v, shape), at)?;
            }
            Inst::CallRead => {
                let v = self.read_int(at)?;
                self.stack.push(Value::int(v), at)?;
            }
            Inst::CallWrite => {
                let v = self.pop_int(at)?;
                writeln!(self.output, "{v}").map_err(|e| RuntimeError::Io {
                    at,
                    message: e.to_string(),
                })?;
                self.stack.push(Value::int(0), at)?;
            }
            Inst::CallLength => {
                let v = self.stack.pop(at)?;
                let len = self
                    .heap
                    .length(v)
                    .map_err(|source| RuntimeError::Heap { at, source })?;
                self.stack.push(len, at)?;
            }
            Inst::CallString => {
                let v = self.stack.pop(at)?;
                let rendered = self.heap.render(v);
                let s = self.heap.alloc_string(rendered.as_bytes());
                self.stack.push(s, at)?;
            }
            Inst::CallArray { nargs } => {
                let elems = self.pop_reversed(nargs as usize, at)?;
                let v = self.heap.alloc_array(elems);
                self.stack.push(v, at)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn pop_int(&mut self, at: usize) -> Result<i32, RuntimeError> {
        let v = self.stack.pop(at)?;
        if !v.is_int() {
            return Err(RuntimeError::ExpectedInt { at, found: v.raw() });
        }
        Ok(v.as_int())
    }

    /// Pop `n` operands and return them in push order (bottom first).
    fn pop_reversed(&mut self, n: usize, at: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.stack.pop(at)?);
        }
        values.reverse();
        Ok(values)
    }

    fn load_loc(&self, loc: Loc, at: usize) -> Result<Value, RuntimeError> {
        match loc {
            Loc::Global(i) => Ok(self.globals[i as usize]),
            Loc::Local(i) => Ok(self.stack.local(i)),
            Loc::Arg(i) => Ok(self.stack.arg(i)),
            Loc::Access(i) => {
                let closure = self.stack.closure(at)?;
                self.heap
                    .closure_slot(closure, i)
                    .map_err(|source| RuntimeError::Heap { at, source })
            }
        }
    }

    fn store_loc(&mut self, loc: Loc, v: Value, at: usize) -> Result<(), RuntimeError> {
        match loc {
            Loc::Global(i) => {
                self.globals[i as usize] = v;
                Ok(())
            }
            Loc::Local(i) => {
                self.stack.set_local(i, v);
                Ok(())
            }
            Loc::Arg(i) => {
                self.stack.set_arg(i, v);
                Ok(())
            }
            Loc::Access(i) => {
                let closure = self.stack.closure(at)?;
                self.heap
                    .set_closure_slot(closure, i, v)
                    .map_err(|source| RuntimeError::Heap { at, source })
            }
        }
    }

    fn cell_of(&self, loc: Loc, at: usize) -> Result<Cell, RuntimeError> {
        match loc {
            Loc::Global(i) => Ok(Cell::Global(i)),
            Loc::Local(i) => Ok(Cell::Stack(self.stack.local_slot(i))),
            Loc::Arg(i) => Ok(Cell::Stack(self.stack.arg_slot(i))),
            Loc::Access(i) => {
                let closure = self.stack.closure(at)?;
                let handle = closure.as_handle().ok_or(RuntimeError::Heap {
                    at,
                    source: crate::error::HeapError::NotAClosure,
                })?;
                Ok(Cell::HeapSlot { handle, slot: i })
            }
        }
    }

    fn write_cell(&mut self, cell: Cell, v: Value, at: usize) -> Result<(), RuntimeError> {
        match cell {
            Cell::Global(i) => match self.globals.get_mut(i as usize) {
                Some(slot) => {
                    *slot = v;
                    Ok(())
                }
                None => Err(RuntimeError::DeadCell { at }),
            },
            Cell::Stack(slot) => self.stack.write_slot(slot, v, at),
            Cell::HeapSlot { handle, slot } => self
                .heap
                .set_closure_slot(Value::handle(handle), slot, v)
                .map_err(|source| RuntimeError::Heap { at, source }),
        }
    }

    fn read_int(&mut self, at: usize) -> Result<i32, RuntimeError> {
        write!(self.output, "> ").map_err(|e| RuntimeError::Io {
            at,
            message: e.to_string(),
        })?;
        self.output.flush().map_err(|e| RuntimeError::Io {
            at,
            message: e.to_string(),
        })?;
        let mut line = String::new();
        let n = self.input.read_line(&mut line).map_err(|e| RuntimeError::Io {
            at,
            message: e.to_string(),
        })?;
        if n == 0 {
            return Err(RuntimeError::Io {
                at,
                message: "unexpected end of input".to_string(),
            });
        }
        line.trim().parse().map_err(|_| RuntimeError::Io {
            at,
            message: format!("not an integer: {:?}", line.trim()),
        })
    }
}

/// Execute a verified image against the process's stdin and stdout.
pub fn interpret(file: &ByteFile) -> Result<(), RuntimeError> {
    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout();
    Machine::with_io(file, stdin, stdout).run()
}
