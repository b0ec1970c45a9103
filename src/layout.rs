//! The layout optimizer (spec.md §4.6).
//!
//! Computes `(alignment, size)` for every aggregate from a machine
//! description, and installs the result on the aggregate itself (a
//! [`crate::types::ir::CAggregateDef`] or [`crate::types::ir::SumTypeDef`]
//! transitioning from `Uninit` to `Ready`, in the terms of spec.md §9) or,
//! for tuples, folded directly into the `Ty` at construction time since
//! tuple types are structurally interned rather than nominal (see
//! [`make_tuple_ty`]).
//!
//! Grounded on `examples/original_source/typecheck/declare.py`'s
//! `optimize_datatype_layout`/`struct_alignment_and_padding`/`emit_padding`,
//! translated into the teacher's idiom; the `Align`/`Size`-as-plain-`u32`
//! convention (rather than newtypes) follows the rest of this crate's IR,
//! though the greedy-largest-first padding scan is the same algorithm
//! `rustc_target::abi`'s layout code uses for niche-filling (see
//! `examples/other_examples/343bbef9_EricRahm-rust__src-librustc_target-abi-mod.rs.rs`,
//! consulted for the general shape of a target data layout table, not
//! copied from).

use hashbrown::HashMap;
use crate::symbol::{Symbol, intern};
use crate::types::ir::{Ty, TyKind, CAggregate, SumType, ConstructorDef, intern_ty};
use crate::types::layout::{AggregateLayout, ConstructorLayout, FieldLayout, SumTypeLayout};

/// `(alignment, size)` for one primitive name in a [`MachineDesc`].
#[derive(Copy, Clone, Debug)]
pub struct PrimLayout {
  pub align: u32,
  pub size: u32,
}

/// The process-wide, read-only-after-construction configuration spec.md
/// §6 calls "a machine description supplying, for each primitive name,
/// `{typename, size, alignment}`". Loading one from a file is out of
/// scope (spec.md §1); callers build this struct directly.
#[derive(Clone, Debug, Default)]
pub struct MachineDesc {
  pub primitives: HashMap<Symbol, PrimLayout>,
  /// Integer padding datatypes, `(align, size)`, sorted descending by
  /// `align` so [`emit_padding`]'s greedy scan tries the widest filler
  /// first.
  pub padding_datatypes: Vec<(u32, u32)>,
}

impl MachineDesc {
  /// A reasonable default for an LP64-ish target: `u8/u16/u32/u64` padding
  /// datatypes and a handful of C primitive names. Convenient for tests;
  /// real callers are expected to supply their own.
  #[must_use] pub fn lp64() -> Self {
    let mut primitives = HashMap::new();
    for (name, align, size) in [
      ("void*", 8, 8), ("char", 1, 1), ("short", 2, 2), ("int", 4, 4),
      ("long", 8, 8), ("long long", 8, 8), ("float", 4, 4), ("double", 8, 8),
    ] {
      primitives.insert(intern(name), PrimLayout { align, size });
    }
    MachineDesc { primitives, padding_datatypes: vec![(8, 8), (4, 4), (2, 2), (1, 1)] }
  }

  fn lookup_prim(&self, name: Symbol) -> PrimLayout {
    *self.primitives.get(&name).unwrap_or_else(|| panic!("machine description has no primitive {name}"))
  }
}

/// Greedily pick, from the widest padding datatype down, fillers that
/// respect both the remaining gap and the current alignment; append one
/// padding field per chosen datatype (declare.py `emit_padding`).
fn emit_padding(machine: &MachineDesc, mut padding: u32, mut size: u32, out: &mut Vec<FieldLayout>, pad_counter: &mut u32) {
  while padding > 0 {
    let Some(&(align, bytes)) = machine.padding_datatypes.iter().find(|&&(align, bytes)| bytes <= padding && size % align == 0)
    else { unreachable!("no padding datatype covers a gap of {padding} bytes at offset {size}") };
    let name = intern(&format!("__pad{pad_counter}__"));
    *pad_counter += 1;
    out.push(FieldLayout { name: Some(name), ty: padding_ty(bytes), offset: size });
    padding -= bytes;
    size += bytes;
  }
}

fn padding_ty(bytes: u32) -> Ty { intern_ty(TyKind::Padding(bytes)) }

/// Struct-like layout (declare.py `struct_alignment_and_padding`): iterate
/// fields in declared order, restoring alignment with padding before each
/// one, then pad the whole thing up to its own alignment.
pub fn struct_layout(machine: &MachineDesc, fields: &[(Option<Symbol>, Ty)]) -> AggregateLayout {
  if fields.is_empty() { return AggregateLayout { align: 1, size: 0, fields: Vec::new() } }
  let mut align = 1;
  let mut size = 0;
  let mut out = Vec::with_capacity(fields.len());
  let mut pad_counter = 0;
  for (name, ty) in fields {
    let (falign, fsize) = layout_of(machine, ty);
    align = align.max(falign);
    let gap = (falign - size % falign) % falign;
    emit_padding(machine, gap, size, &mut out, &mut pad_counter);
    size += gap;
    out.push(FieldLayout { name: *name, ty: ty.clone(), offset: size });
    size += fsize;
  }
  let trailing = (align - size % align) % align;
  if trailing > 0 { emit_padding(machine, trailing, size, &mut out, &mut pad_counter); size += trailing; }
  AggregateLayout { align, size, fields: out }
}

/// `(alignment, size)` for any IR type, recursing through the machine
/// description for primitives and through already-installed layouts for
/// nominal aggregates (declare.py `datatype_align_and_size`).
#[must_use] pub fn layout_of(machine: &MachineDesc, ty: &Ty) -> (u32, u32) {
  match &**ty {
    TyKind::Int { bits, .. } => { let b = (*bits).max(8) / 8; (b, b) }
    TyKind::Float { bits } => { let b = bits / 8; (b, b) }
    TyKind::Bool => (1, 1),
    TyKind::Void | TyKind::Exit => (1, 0),
    TyKind::Pointer(_) | TyKind::CFunctionPointer(_) => {
      let p = machine.primitives.get(&intern("void*"));
      p.map_or((8, 8), |p| (p.align, p.size))
    }
    TyKind::Option(target) => { let (_, s) = layout_of(machine, target); (8, 8 + s) }
    TyKind::Union(alts) => union_layout(machine, alts),
    TyKind::Tuple(t) => t.layout.as_ref().map_or_else(
      || { let fields: Vec<_> = t.positional.iter().map(|ty| (None, ty.clone()))
             .chain(t.named.iter().map(|(n, ty)| (Some(*n), ty.clone()))).collect();
           let l = struct_layout(machine, &fields); (l.align, l.size) },
      |l| (l.align, l.size)),
    TyKind::ArraySlice(_) => (8, 16),
    TyKind::Function(_) => (8, 8),
    TyKind::Rtti => (8, 8),
    TyKind::Padding(w) => (*w, *w),
    TyKind::Uninferred => unreachable!("uninferred type reached layout"),
    TyKind::Sum(sum) => sum_layout_of(sum),
    TyKind::CStruct(agg) | TyKind::CUnion(agg) => caggregate_layout_of(agg),
    TyKind::CEnum(_) => (4, 4),
    TyKind::CTypedef(_, underlying) => layout_of(machine, underlying),
    TyKind::CNamed(name) => { let p = machine.lookup_prim(*name); (p.align, p.size) }
    TyKind::CArray(elt, n) => { let (a, s) = layout_of(machine, elt); (a, s * u32::try_from(*n).unwrap_or(u32::MAX)) }
  }
}

fn sum_layout_of(sum: &SumType) -> (u32, u32) {
  let b = sum.0.borrow();
  let l = b.layout.as_ref().expect("sum type layout requested before declare_datatype_layout ran");
  (l.align, l.size)
}

fn caggregate_layout_of(agg: &CAggregate) -> (u32, u32) {
  let b = agg.0.borrow();
  let l = b.layout.as_ref().expect("C aggregate layout requested before declare_datatype_layout ran");
  (l.align, l.size)
}

/// Union types have no declared field names, so their layout is a
/// simplified sum type: a shared tag byte (when more than one
/// alternative) followed by the widest alternative, overall padded to
/// alignment. Not directly grounded in `declare.py` (unions are resolved,
/// not laid out, in the portion of the original read for this crate); this
/// is this crate's own extrapolation from the sum-type algorithm one
/// section up, recorded as an Open Question decision in DESIGN.md.
fn union_layout(machine: &MachineDesc, alts: &[Ty]) -> (u32, u32) {
  let mut align = 1;
  let mut payload = 0;
  for t in alts {
    let (a, s) = layout_of(machine, t);
    align = align.max(a);
    payload = payload.max(s);
  }
  let mut size = payload + u32::from(alts.len() > 1);
  size += (align - size % align) % align;
  (align, size)
}

/// Lay out a tuple's fields eagerly and bake the result into the `TupleTy`
/// before interning, since tuple types are structurally interned (unlike
/// sum types and C aggregates, which are nominal and mutated in place).
/// Named slots are sorted by name first (spec.md §4.5 tuple
/// canonicalization).
#[must_use] pub fn make_tuple_ty(machine: &MachineDesc, positional: Vec<Ty>, mut named: Vec<(Symbol, Ty)>) -> Ty {
  named.sort_by_key(|(n, _)| n.as_str());
  let fields: Vec<_> = positional.iter().map(|ty| (None, ty.clone()))
    .chain(named.iter().map(|(n, ty)| (Some(*n), ty.clone()))).collect();
  let layout = struct_layout(machine, &fields);
  use crate::types::ir::TupleTy;
  intern_ty(TyKind::Tuple(TupleTy { positional, named, layout: Some(std::rc::Rc::new(layout)) }))
}

/// Lay out a C struct or union in place (declare.py's `CStructDefinition`
/// branch of `optimize_datatype_layout`), installing the result on the
/// nominal descriptor. Idempotent: a descriptor already laid out is left
/// untouched.
pub fn layout_c_aggregate(machine: &MachineDesc, agg: &CAggregate) {
  if agg.0.borrow().layout.is_some() { return }
  let opaque = agg.0.borrow().opaque;
  if opaque { return }
  let fields: Vec<_> = agg.0.borrow().fields.iter().map(|(n, t)| (Some(*n), t.clone())).collect();
  let is_union = agg.0.borrow().is_union;
  let layout = if is_union {
    // A C union's fields all start at offset 0; its size is the widest
    // member, padded to the max alignment.
    let mut align = 1;
    let mut size = 0;
    let mut out = Vec::with_capacity(fields.len());
    for (name, ty) in &fields {
      let (a, s) = layout_of(machine, ty);
      align = align.max(a);
      size = size.max(s);
      out.push(FieldLayout { name: *name, ty: ty.clone(), offset: 0 });
    }
    size += (align - size % align) % align;
    AggregateLayout { align, size, fields: out }
  } else {
    struct_layout(machine, &fields)
  };
  agg.0.borrow_mut().layout = Some(std::rc::Rc::new(layout));
}

/// Lay out a sum type in place (declare.py's `else` branch of
/// `optimize_datatype_layout`, the core of spec.md §4.6). Idempotent.
///
/// `reorder` controls whether each constructor's fields may be sorted by
/// ascending `(align, size)` before laying out, matching declare.py's
/// `tydef.optimize_layout` flag (cleared for `__unpack__`'s return type by
/// `declare.rs`, which needs the declared field order preserved).
pub fn layout_sum_type(machine: &MachineDesc, sum: &SumType, reorder: bool) {
  if sum.0.borrow().layout.is_some() { return }
  let tagless = sum.0.borrow().is_tagless();
  let n_ctors = sum.0.borrow().constructors.len();

  // Common-member names: the ordered intersection of every constructor's
  // (type, name) pairs, preserving constructor 0's order.
  let common_names = common_member_names(&sum.0.borrow().constructors);

  // Lay out every constructor independently first, tracking the maximum.
  let mut per_ctor_fields: Vec<Vec<(Option<Symbol>, Ty)>> = Vec::with_capacity(n_ctors);
  for ctor in &sum.0.borrow().constructors {
    let mut fields: Vec<_> = ctor.field_types.iter().zip(&ctor.field_names)
      .map(|(ty, name)| (*name, ty.clone())).collect();
    if reorder { fields.sort_by_key(|(_, ty)| layout_of(machine, ty)); }
    per_ctor_fields.push(fields);
  }
  let mut align = 1;
  let mut max_size = 0;
  let mut prelim: Vec<AggregateLayout> = Vec::with_capacity(n_ctors);
  for fields in &per_ctor_fields {
    let l = struct_layout(machine, fields);
    align = align.max(l.align);
    max_size = max_size.max(l.size);
    prelim.push(l);
  }

  let mut final_size = max_size;
  if !tagless { final_size += 1 }
  final_size += (align - final_size % align) % align;

  let mut constructors = Vec::with_capacity(n_ctors);
  for (i, mut l) in prelim.into_iter().enumerate() {
    let gap = final_size - l.size;
    let mut pad_counter = l.fields.iter().filter(|f| f.name.map(|n| n.as_str().starts_with("__pad")).unwrap_or(false)).count() as u32;
    emit_padding(machine, gap, l.size, &mut l.fields, &mut pad_counter);
    l.size = final_size;
    l.align = align;
    if !tagless {
      split_last_padding_into_tag(&mut l);
    }
    let field_order: Vec<usize> = (0..per_ctor_fields[i].len()).collect();
    constructors.push(ConstructorLayout { fields: l, field_order });
  }

  let tag_offset = if tagless { None } else {
    constructors[0].fields.fields.iter().find(|f| f.name.map(|n| n.as_str() == "__index__").unwrap_or(false)).map(|f| f.offset)
  };
  let tag_values: Vec<i64> = sum.0.borrow().constructors.iter().map(|c| c.tag_value).collect();

  let common_members: Vec<(Symbol, Vec<u32>)> = common_names.into_iter().map(|name| {
    let offsets = constructors.iter().map(|c| {
      c.fields.fields.iter().find(|f| f.name == Some(name)).map(|f| f.offset)
        .unwrap_or_else(|| unreachable!("common member {name} missing from a constructor layout"))
    }).collect();
    (name, offsets)
  }).collect();

  sum.0.borrow_mut().layout = Some(SumTypeLayout { align, size: final_size, constructors, tag_offset, tag_values, common_members });
}

/// The ordered intersection of every constructor's `(name)` field list,
/// preserving the first constructor's order (declare.py: `common_fields`).
fn common_member_names(constructors: &[ConstructorDef]) -> Vec<Symbol> {
  let Some(first) = constructors.first() else { return Vec::new() };
  first.field_names.iter().filter_map(|n| *n).filter(|name| {
    constructors[1..].iter().all(|c| c.field_names.contains(&Some(*name)))
  }).collect()
}

/// Split the last (necessarily padding) field of a constructor's layout,
/// bit by bit, until it is exactly one unsigned byte, then rename it
/// `__index__` (spec.md §4.6 "Tag placement"). Every constructor performs
/// this independently but arrives at the same byte offset, since all
/// constructors share the same padded-out `final_size`.
fn split_last_padding_into_tag(l: &mut AggregateLayout) {
  let (offset0, width) = {
    let last = l.fields.last().expect("sum type layout with no fields before tag split");
    assert!(last.name.map(|n| n.as_str().starts_with("__pad")).unwrap_or(false),
      "expected a padding field immediately before the tag byte");
    let width = match &*last.ty {
      TyKind::Padding(w) => *w,
      _ => unreachable!("tag predecessor must be a padding field"),
    };
    (last.offset, width)
  };
  l.fields.pop();
  let mut offset = offset0;
  let mut remaining = width;
  while remaining > 1 {
    let half = remaining / 2;
    l.fields.push(FieldLayout { name: Some(intern(&format!("__pad_tag{offset}__"))), ty: padding_ty(half), offset });
    offset += half;
    remaining -= half;
  }
  l.fields.push(FieldLayout { name: Some(intern("__index__")), ty: padding_ty(1), offset });
}

/// Drive layout of every non-C nominal aggregate reachable from a set of
/// modules (declare.py `declare_datatype_layout`). C aggregates are laid
/// out as a side effect of being referenced (via [`layout_of`]'s
/// `CStruct`/`CUnion` arms calling [`layout_c_aggregate`] eagerly through
/// `declare.rs`'s resolve pass), so this driver only needs to force sum
/// types that may not otherwise be visited before typeck needs them.
pub fn declare_datatype_layout(machine: &MachineDesc, sums: &[SumType]) {
  for sum in sums {
    let unpack_no_reorder = sum.0.borrow().name.as_str() == "__unpack_result__";
    layout_sum_type(machine, sum, !unpack_no_reorder);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ir::{int_ty, bool_ty, SumTypeDef};
  use std::path::PathBuf;
  use std::rc::Rc;

  fn machine() -> MachineDesc { MachineDesc::lp64() }

  #[test]
  fn struct_layout_inserts_padding_to_restore_alignment() {
    // (u8, u32): one byte of padding must separate them.
    let fields = vec![(Some(intern("a")), int_ty(8, false)), (Some(intern("b")), int_ty(32, false))];
    let l = struct_layout(&machine(), &fields);
    assert_eq!(l.align, 4);
    assert_eq!(l.size, 8);
    assert_eq!(l.fields.iter().map(|f| f.offset).collect::<Vec<_>>(), vec![0, 4]);
    assert!(l.fields[1].name.unwrap().as_str().starts_with("__pad"));
  }

  #[test]
  fn empty_struct_has_size_zero_align_one() {
    let l = struct_layout(&machine(), &[]);
    assert_eq!((l.align, l.size), (1, 0));
  }

  #[test]
  fn tuple_layout_sorts_named_slots_and_bakes_layout() {
    let ty = make_tuple_ty(&machine(), vec![], vec![(intern("z"), bool_ty()), (intern("a"), int_ty(32, true))]);
    let TyKind::Tuple(t) = &*ty else { panic!("not a tuple") };
    assert_eq!(t.named[0].0.as_str(), "a");
    assert_eq!(t.named[1].0.as_str(), "z");
    assert!(t.layout.is_some());
  }

  fn make_ctor(name: &str, fields: &[(&str, Ty)], tag: i64) -> ConstructorDef {
    ConstructorDef {
      name: intern(name),
      field_types: fields.iter().map(|(_, t)| t.clone()).collect(),
      field_names: fields.iter().map(|(n, _)| Some(intern(n))).collect(),
      tag_value: tag,
    }
  }

  #[test]
  fn sum_type_tag_lands_at_shared_offset() {
    let sum = SumType::new(SumTypeDef {
      name: intern("Shape"),
      module: Rc::new(PathBuf::from("test.ce")),
      exported: true,
      constructors: vec![
        make_ctor("Circle", &[("radius", int_ty(32, true))], 0),
        make_ctor("Rect", &[("w", int_ty(32, true)), ("h", int_ty(32, true))], 1),
      ],
      fields_resolved: true,
      layout: None,
    });
    layout_sum_type(&machine(), &sum, true);
    let b = sum.0.borrow();
    let layout = b.layout.as_ref().unwrap();
    assert_eq!(layout.constructors.len(), 2);
    let off0 = layout.tag_offset.unwrap();
    for c in &layout.constructors {
      let tag_field = c.fields.fields.iter().find(|f| f.name.unwrap().as_str() == "__index__").unwrap();
      assert_eq!(tag_field.offset, off0);
      assert_eq!(tag_field.offset, layout.size - 1);
    }
  }

  #[test]
  fn tagless_sum_type_has_no_tag_offset() {
    let sum = SumType::new(SumTypeDef {
      name: intern("Unit"),
      module: Rc::new(PathBuf::from("test.ce")),
      exported: true,
      constructors: vec![make_ctor("void", &[], 0)],
      fields_resolved: true,
      layout: None,
    });
    layout_sum_type(&machine(), &sum, true);
    let b = sum.0.borrow();
    assert!(b.layout.as_ref().unwrap().tag_offset.is_none());
  }

  #[test]
  fn common_members_is_ordered_intersection() {
    let common = common_member_names(&[
      make_ctor("A", &[("x", int_ty(32, true)), ("y", int_ty(32, true))], 0),
      make_ctor("B", &[("x", int_ty(32, true))], 1),
    ]);
    assert_eq!(common.iter().map(|s| s.as_str()).collect::<Vec<_>>(), vec!["x"]);
  }
}
