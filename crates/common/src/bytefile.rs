//! In-memory layout of a loaded bytecode image.
//!
//! A bytefile is three little-endian 32-bit header words — string table
//! size, global area size, public symbol count — followed by the public
//! symbol table (two words per symbol), the string table bytes, and the
//! code segment running to the end of the file.
//!
//! The image is immutable after load except for [`ByteFile::patch_word`],
//! which the verifier's augmentation pass uses to write the maximum
//! operand stack depth into each `BEGIN` header.

use std::path::Path;

use crate::error::{FormatError, LoadError};

/// A `(name, code)` entry point pair. Offsets are validated by the
/// verifier, not at load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicSymbol {
    /// Offset of the symbol's name in the string table.
    pub name_offset: i32,
    /// Offset of the symbol's entry point in the code segment.
    pub code_offset: i32,
}

/// A loaded bytecode image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteFile {
    string_table: Vec<u8>,
    public_symbols: Vec<PublicSymbol>,
    global_area_size: usize,
    code: Vec<u8>,
}

impl ByteFile {
    /// Parse an image from raw bytes, checking segment layout only.
    /// Content checks (string table termination, symbol offsets) belong
    /// to the verifier.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        const WORD: usize = 4;

        if bytes.len() < 3 * WORD {
            return Err(FormatError::TruncatedHeader { size: bytes.len() });
        }
        let word_at =
            |i: usize| i32::from_le_bytes(bytes[i..i + WORD].try_into().expect("4-byte slice"));

        let string_table_size = word_at(0);
        if string_table_size < 0 {
            return Err(FormatError::NegativeStringTableSize(string_table_size));
        }
        let global_area_size = word_at(WORD);
        if global_area_size < 0 {
            return Err(FormatError::NegativeGlobalAreaSize(global_area_size));
        }
        let public_symbols_count = word_at(2 * WORD);
        if public_symbols_count < 0 {
            return Err(FormatError::NegativePublicSymbolCount(public_symbols_count));
        }

        let mut offset = 3 * WORD;

        let symbols_bytes = public_symbols_count as usize * 2 * WORD;
        if offset + symbols_bytes > bytes.len() {
            return Err(FormatError::PublicSymbolsOverrun { need: symbols_bytes });
        }
        let mut public_symbols = Vec::with_capacity(public_symbols_count as usize);
        for i in 0..public_symbols_count as usize {
            public_symbols.push(PublicSymbol {
                name_offset: word_at(offset + 2 * i * WORD),
                code_offset: word_at(offset + (2 * i + 1) * WORD),
            });
        }
        offset += symbols_bytes;

        if offset + string_table_size as usize > bytes.len() {
            return Err(FormatError::StringTableOverrun {
                need: string_table_size as usize,
            });
        }
        let string_table = bytes[offset..offset + string_table_size as usize].to_vec();
        offset += string_table_size as usize;

        Ok(ByteFile {
            string_table,
            public_symbols,
            global_area_size: global_area_size as usize,
            code: bytes[offset..].to_vec(),
        })
    }

    /// Read and parse an image from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|source| LoadError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(Self::from_bytes(&bytes)?)
    }

    pub fn string_table(&self) -> &[u8] {
        &self.string_table
    }

    /// The NUL-terminated string starting at `offset`, without the NUL.
    /// The offset must have been validated against the table size; the
    /// verifier guarantees the table itself ends in NUL.
    pub fn cstr_at(&self, offset: usize) -> &[u8] {
        let tail = &self.string_table[offset..];
        match tail.iter().position(|&b| b == 0) {
            Some(end) => &tail[..end],
            None => tail,
        }
    }

    pub fn public_symbols(&self) -> &[PublicSymbol] {
        &self.public_symbols
    }

    /// Size of the global area, in words.
    pub fn global_area_size(&self) -> usize {
        self.global_area_size
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Read a little-endian word from the code segment. The caller is
    /// responsible for bounds, as with all code-offset access.
    pub fn word_at(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.code[offset..offset + 4].try_into().expect("4-byte slice"))
    }

    /// Overwrite a little-endian word in the code segment. This is the
    /// single mutation the toolchain performs on a loaded image; only the
    /// verifier's augmentation pass calls it.
    pub fn patch_word(&mut self, offset: usize, word: i32) {
        self.code[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
    }
}
