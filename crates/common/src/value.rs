//! Tagged machine-word values.
//!
//! A [`Value`] is a single word. The low bit distinguishes immediate
//! integers from references:
//!
//! - low bit 1: a boxed integer; the arithmetic value is the word shifted
//!   right by one (arithmetically). Constructible integers lie in
//!   `[-2^30, 2^30 - 1)`.
//! - low bit 0: a reference word, owned by the runtime library. Bit 1
//!   further splits references into heap handles (`..00`) and cell
//!   references (`..10`) — the latter are the LValues produced by `LDA`
//!   and consumed by `STA`.
//!
//! Arithmetic on boxed integers is 32-bit wrapping, so a binop result that
//! leaves the 31-bit range wraps exactly as the word representation does.

/// A tagged machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Value(i64);

/// Index of an object in the runtime library's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

/// A storable location, packed into a reference word by [`Value::cell`].
///
/// `Global` and `Stack` cells address the global area and the runtime
/// stack by slot index; `HeapSlot` addresses a captured-variable slot of a
/// heap closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Global(u32),
    Stack(u32),
    HeapSlot { handle: Handle, slot: u32 },
}

const CELL_MARK: i64 = 0b10;
const KIND_GLOBAL: i64 = 0;
const KIND_STACK: i64 = 1;
const KIND_HEAP: i64 = 2;
const HEAP_SLOT_BITS: u32 = 28;

impl Value {
    /// Smallest representable integer.
    pub const INT_MIN: i32 = -(1 << 30);
    /// Exclusive upper bound of the representable integer range.
    pub const INT_MAX: i32 = (1 << 30) - 1;

    /// Box an integer. Wraps in 32 bits, matching the word representation.
    pub fn int(n: i32) -> Self {
        Value((n.wrapping_shl(1) | 1) as i64)
    }

    /// True for words representing immediate integers.
    pub fn is_int(self) -> bool {
        self.0 & 1 == 1
    }

    /// Unbox an integer. The result is meaningful only when [`is_int`]
    /// holds; on a reference word it returns half the address bits.
    ///
    /// [`is_int`]: Value::is_int
    pub fn as_int(self) -> i32 {
        (self.0 as i32) >> 1
    }

    /// True when `n` can round-trip through [`Value::int`] without wrapping.
    pub fn fits_int(n: i32) -> bool {
        (Self::INT_MIN..Self::INT_MAX).contains(&n)
    }

    /// A reference word pointing at a runtime-library object.
    pub fn handle(h: Handle) -> Self {
        Value((h.0 as i64) << 2)
    }

    /// The handle this word references, if it is a handle word.
    pub fn as_handle(self) -> Option<Handle> {
        if self.0 & 0b11 == 0 {
            Some(Handle((self.0 >> 2) as u32))
        } else {
            None
        }
    }

    /// Pack a storable location into a reference word.
    pub fn cell(cell: Cell) -> Self {
        let (kind, data) = match cell {
            Cell::Global(i) => (KIND_GLOBAL, i as i64),
            Cell::Stack(i) => (KIND_STACK, i as i64),
            Cell::HeapSlot { handle, slot } => {
                debug_assert!(slot < 1 << HEAP_SLOT_BITS);
                debug_assert!(handle.0 < 1 << HEAP_SLOT_BITS);
                (KIND_HEAP, ((handle.0 as i64) << HEAP_SLOT_BITS) | slot as i64)
            }
        };
        Value(data << 4 | kind << 2 | CELL_MARK)
    }

    /// The location this word references, if it is a cell word.
    pub fn as_cell(self) -> Option<Cell> {
        if self.0 & 0b11 != CELL_MARK {
            return None;
        }
        let data = self.0 >> 4;
        match (self.0 >> 2) & 0b11 {
            KIND_GLOBAL => Some(Cell::Global(data as u32)),
            KIND_STACK => Some(Cell::Stack(data as u32)),
            KIND_HEAP => Some(Cell::HeapSlot {
                handle: Handle((data >> HEAP_SLOT_BITS) as u32),
                slot: (data & ((1 << HEAP_SLOT_BITS) - 1)) as u32,
            }),
            _ => None,
        }
    }

    /// The raw word. `BINOP =` compares these directly, giving reference
    /// identity on handles and value equality on boxed integers.
    pub fn raw(self) -> i64 {
        self.0
    }
}
