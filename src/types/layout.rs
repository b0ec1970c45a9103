//! Layout data model (spec.md §4.6). Populated once, by
//! [`crate::layout`], and never mutated afterwards — the `Ready` half of
//! the `Uninit`/`Ready` idiom described in spec.md §9.

use crate::symbol::Symbol;
use super::ir::Ty;

/// One field of a struct-like aggregate after layout: either a real,
/// user-declared field or an inserted padding field (spec.md: "padding
/// fields exhaustively cover holes").
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FieldLayout {
  pub name: Option<Symbol>,
  pub ty: Ty,
  pub offset: u32,
}

/// `(alignment, size)` plus the concrete field order, for a tuple or C
/// struct/union (spec.md §4.6 "Struct-like layout").
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AggregateLayout {
  pub align: u32,
  pub size: u32,
  pub fields: Vec<FieldLayout>,
}

/// The layout of one constructor of a sum type: its own struct-like
/// layout, plus where (if anywhere) the shared `__index__` tag byte ends
/// up once every constructor is padded out to the sum type's overall
/// size (spec.md §4.6 "Tag placement").
#[derive(Clone, Debug)]
pub struct ConstructorLayout {
  pub fields: AggregateLayout,
  /// Byte offset of the field order the constructor's arguments are
  /// passed/stored in, which may differ from `field_types` order
  /// (spec.md invariant: "storage order may differ and lives in
  /// `layout_*`").
  pub field_order: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct SumTypeLayout {
  pub align: u32,
  pub size: u32,
  pub constructors: Vec<ConstructorLayout>,
  /// Byte offset of the one-byte constructor index, shared by every
  /// constructor, or `None` if the type is tagless.
  pub tag_offset: Option<u32>,
  /// Per-constructor user-declared tag value, indexed by constructor
  /// position — the "shared per-type lookup table" from spec.md §4.6.
  pub tag_values: Vec<i64>,
  /// The ordered intersection of every constructor's field names
  /// (spec.md §4.6 "common names"), with the byte offset of that field
  /// in each constructor (by constructor position).
  pub common_members: Vec<(Symbol, Vec<u32>)>,
}
