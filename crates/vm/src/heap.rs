//! The runtime library: heap objects and built-in primitives.
//!
//! The interpreter keeps values as tagged words; everything that is not
//! an immediate integer lives here, addressed by handle. Objects are
//! owned by the heap for the lifetime of the machine:
//!
//! - strings — mutable byte arrays
//! - arrays — mutable [`Value`] vectors
//! - S-expressions — a tag hash plus fields
//! - closures — a code entry offset plus captured values
//!
//! Tag names are hashed with a reversible 6-bit packing over
//! `[_0-9A-Za-z]`, so construction and matching agree and rendering can
//! recover the name from the hash alone.

use std::fmt::Write as _;

use lama_common::{Handle, Value};

use crate::error::HeapError;

/// A heap object.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Obj {
    Str(Vec<u8>),
    Array(Vec<Value>),
    Sexp { tag: i64, fields: Vec<Value> },
    Closure { entry: usize, captured: Vec<Value> },
}

/// Structural pattern checks dispatched by `PATT_*` opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    String,
    Array,
    Sexp,
    Boxed,
    Unboxed,
    Closure,
}

/// The object table.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Obj>,
}

/// Hash a tag name by packing its characters into 6-bit codes. The
/// result is deterministic and reversible (up to the 60-bit window), so
/// [`Heap::render`] can print the tag of an S-expression back.
pub fn tag_hash(name: &[u8]) -> i64 {
    let mut h: i64 = 0;
    for &byte in name {
        let code = match byte {
            b'_' => 1,
            b'0'..=b'9' => byte - b'0' + 2,
            b'A'..=b'Z' => byte - b'A' + 12,
            b'a'..=b'z' => byte - b'a' + 38,
            _ => 0,
        } as i64;
        h = (h << 6 | code) & 0x0FFF_FFFF_FFFF_FFFF;
    }
    h
}

/// Recover a tag name from its hash.
fn de_hash(mut h: i64) -> String {
    let mut chars = Vec::new();
    while h > 0 {
        let code = (h & 0x3F) as u8;
        chars.push(match code {
            1 => b'_',
            2..=11 => b'0' + code - 2,
            12..=37 => b'A' + code - 12,
            38..=63 => b'a' + code - 38,
            _ => b'?',
        });
        h >>= 6;
    }
    chars.reverse();
    String::from_utf8_lossy(&chars).into_owned()
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    fn alloc(&mut self, obj: Obj) -> Value {
        self.objects.push(obj);
        Value::handle(Handle((self.objects.len() - 1) as u32))
    }

    fn get(&self, v: Value) -> Result<&Obj, HeapError> {
        if v.is_int() {
            return Err(HeapError::ExpectedReference);
        }
        let handle = v.as_handle().ok_or(HeapError::Dangling)?;
        self.objects
            .get(handle.0 as usize)
            .ok_or(HeapError::Dangling)
    }

    fn get_mut(&mut self, v: Value) -> Result<&mut Obj, HeapError> {
        if v.is_int() {
            return Err(HeapError::ExpectedReference);
        }
        let handle = v.as_handle().ok_or(HeapError::Dangling)?;
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(HeapError::Dangling)
    }

    pub fn alloc_string(&mut self, bytes: &[u8]) -> Value {
        self.alloc(Obj::Str(bytes.to_vec()))
    }

    pub fn alloc_array(&mut self, elems: Vec<Value>) -> Value {
        self.alloc(Obj::Array(elems))
    }

    pub fn alloc_sexp(&mut self, tag: i64, fields: Vec<Value>) -> Value {
        self.alloc(Obj::Sexp { tag, fields })
    }

    pub fn alloc_closure(&mut self, entry: usize, captured: Vec<Value>) -> Value {
        self.alloc(Obj::Closure { entry, captured })
    }

    /// The length of a string, array, or S-expression, boxed.
    pub fn length(&self, v: Value) -> Result<Value, HeapError> {
        let len = match self.get(v)? {
            Obj::Str(bytes) => bytes.len(),
            Obj::Array(elems) => elems.len(),
            Obj::Sexp { fields, .. } => fields.len(),
            Obj::Closure { .. } => return Err(HeapError::NoLength),
        };
        Ok(Value::int(len as i32))
    }

    /// Indexed read: a string yields the byte as a boxed integer, arrays
    /// and S-expressions yield the element.
    pub fn elem(&self, container: Value, index: Value) -> Result<Value, HeapError> {
        if !index.is_int() {
            return Err(HeapError::ExpectedIntIndex);
        }
        let i = index.as_int();
        match self.get(container)? {
            Obj::Str(bytes) => {
                let byte = *checked(bytes, i)?;
                Ok(Value::int(byte as i32))
            }
            Obj::Array(elems) => checked(elems, i).copied(),
            Obj::Sexp { fields, .. } => checked(fields, i).copied(),
            Obj::Closure { .. } => Err(HeapError::NotAnAggregate),
        }
    }

    /// Indexed write. A string store truncates the boxed integer to a
    /// byte.
    pub fn set_elem(&mut self, container: Value, index: Value, v: Value) -> Result<(), HeapError> {
        if !index.is_int() {
            return Err(HeapError::ExpectedIntIndex);
        }
        let i = index.as_int();
        match self.get_mut(container)? {
            Obj::Str(bytes) => {
                if !v.is_int() {
                    return Err(HeapError::ExpectedIntForString);
                }
                *checked_mut(bytes, i)? = v.as_int() as u8;
                Ok(())
            }
            Obj::Array(elems) => {
                *checked_mut(elems, i)? = v;
                Ok(())
            }
            Obj::Sexp { fields, .. } => {
                *checked_mut(fields, i)? = v;
                Ok(())
            }
            Obj::Closure { .. } => Err(HeapError::NotAnAggregate),
        }
    }

    /// The code entry offset a closure was built with.
    pub fn closure_entry(&self, v: Value) -> Result<usize, HeapError> {
        match self.get(v)? {
            Obj::Closure { entry, .. } => Ok(*entry),
            _ => Err(HeapError::NotAClosure),
        }
    }

    /// Read a captured variable of a closure.
    pub fn closure_slot(&self, v: Value, index: u32) -> Result<Value, HeapError> {
        match self.get(v)? {
            Obj::Closure { captured, .. } => checked(captured, index as i32).copied(),
            _ => Err(HeapError::NotAClosure),
        }
    }

    /// Write a captured variable of a closure.
    pub fn set_closure_slot(&mut self, v: Value, index: u32, value: Value) -> Result<(), HeapError> {
        match self.get_mut(v)? {
            Obj::Closure { captured, .. } => {
                *checked_mut(captured, index as i32)? = value;
                Ok(())
            }
            _ => Err(HeapError::NotAClosure),
        }
    }

    /// `PATT_StrCmp`: is `x` a string equal to the pattern string `y`?
    pub fn string_patt(&self, x: Value, y: Value) -> Result<Value, HeapError> {
        let pattern = match self.get(y)? {
            Obj::Str(bytes) => bytes,
            _ => return Err(HeapError::PatternNotAString),
        };
        let matches = matches!(self.get(x), Ok(Obj::Str(bytes)) if bytes == pattern);
        Ok(Value::int(matches as i32))
    }

    /// `TAG`: is `v` an S-expression with this tag and arity?
    pub fn tag_patt(&self, v: Value, tag: i64, nfields: usize) -> Value {
        let matches = matches!(
            self.get(v),
            Ok(Obj::Sexp { tag: t, fields }) if *t == tag && fields.len() == nfields
        );
        Value::int(matches as i32)
    }

    /// `ARRAY`: is `v` an array of this length?
    pub fn array_patt(&self, v: Value, nelems: usize) -> Value {
        let matches = matches!(self.get(v), Ok(Obj::Array(elems)) if elems.len() == nelems);
        Value::int(matches as i32)
    }

    /// `PATT_*` structural checks.
    pub fn shape_patt(&self, v: Value, shape: Shape) -> Value {
        let matches = match shape {
            Shape::Unboxed => v.is_int(),
            Shape::Boxed => !v.is_int(),
            Shape::String => matches!(self.get(v), Ok(Obj::Str(_))),
            Shape::Array => matches!(self.get(v), Ok(Obj::Array(_))),
            Shape::Sexp => matches!(self.get(v), Ok(Obj::Sexp { .. })),
            Shape::Closure => matches!(self.get(v), Ok(Obj::Closure { .. })),
        };
        Value::int(matches as i32)
    }

    /// Render a value to its printed form (the `Lstring` conversion).
    pub fn render(&self, v: Value) -> String {
        let mut out = String::new();
        self.render_into(&mut out, v, false);
        out
    }

    fn render_into(&self, out: &mut String, v: Value, nested: bool) {
        if v.is_int() {
            let _ = write!(out, "{}", v.as_int());
            return;
        }
        match self.get(v) {
            Ok(Obj::Str(bytes)) => {
                let s = String::from_utf8_lossy(bytes);
                if nested {
                    let _ = write!(out, "\"{s}\"");
                } else {
                    out.push_str(&s);
                }
            }
            Ok(Obj::Array(elems)) => {
                out.push('[');
                for (i, &e) in elems.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render_into(out, e, true);
                }
                out.push(']');
            }
            Ok(Obj::Sexp { tag, fields }) => {
                out.push_str(&de_hash(*tag));
                if !fields.is_empty() {
                    out.push_str(" (");
                    for (i, &f) in fields.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.render_into(out, f, true);
                    }
                    out.push(')');
                }
            }
            Ok(Obj::Closure { .. }) => out.push_str("<closure>"),
            Err(_) => out.push_str("<reference>"),
        }
    }
}

fn checked<T>(slice: &[T], index: i32) -> Result<&T, HeapError> {
    if index < 0 || index as usize >= slice.len() {
        return Err(HeapError::IndexOutOfBounds {
            index,
            len: slice.len(),
        });
    }
    Ok(&slice[index as usize])
}

fn checked_mut<T>(slice: &mut [T], index: i32) -> Result<&mut T, HeapError> {
    if index < 0 || index as usize >= slice.len() {
        return Err(HeapError::IndexOutOfBounds {
            index,
            len: slice.len(),
        });
    }
    Ok(&mut slice[index as usize])
}
