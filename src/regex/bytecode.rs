//! The flat byte-addressed regex bytecode (spec.md §4.4 second paragraph).
//!
//! Byte values `0x00..=0xEF` are literal characters (`"Any other byte is a
//! literal character"`); the opcodes above that range are tags, each
//! followed by their operands. Multi-byte operands are little-endian,
//! written with `byteorder` — the one place this crate keeps that
//! dependency from its teacher (see `DESIGN.md`).

pub const ANCHOR_START: u8 = 0xF0;
pub const ANCHOR_END: u8 = 0xF1;
pub const ANCHOR_WORD: u8 = 0xF2;
pub const CHARCLASS: u8 = 0xF3;
pub const CHARCLASS_INV: u8 = 0xF4;
pub const QUANTIFIER: u8 = 0xF5;
pub const ALTERNATION: u8 = 0xF6;
pub const SEQUENCE: u8 = 0xF7;
pub const DOT: u8 = 0xF8;
pub const POSITIVE_LOOKAHEAD: u8 = 0xF9;
pub const CAPTURING_GROUP: u8 = 0xFA;

/// `max = 255` means unbounded, per spec.md's testable property.
pub const QUANTIFIER_UNBOUNDED: u8 = 255;

/// The highest byte value literal characters may use; tag bytes start
/// right above it.
pub const MAX_LITERAL_BYTE: u8 = ANCHOR_START - 1;
