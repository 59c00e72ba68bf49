// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The C type model.
//!
//! Types are interned in a [Namespace](crate::namespace::Namespace) and
//! addressed by [TypeId] handles. The four shapes mirror what a debug-info
//! reader delivers: integers (signedness plus an optionally unknown size),
//! pointers, fixed-count arrays, and structs whose fields carry explicit
//! byte offsets.
//!
//! Type equality deliberately ignores integer names: `char` and `int8_t`
//! are interchangeable wherever a 1-byte signed integer is expected. Struct
//! equality is by name, so a forward-declared struct and its completed
//! definition are the same type.

/// Handle to an interned type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// An integer type. `size` may be unknown, in which case the type cannot be
/// serialized or range-checked.
#[derive(Clone, Debug)]
pub struct IntType {
    pub name: String,
    pub size: Option<u64>,
    pub signed: bool,
}

impl IntType {
    /// Smallest and largest representable payload, if the size is known.
    pub fn bounds(&self) -> Option<(i128, i128)> {
        self.size.map(|size| int_bounds(size, self.signed))
    }
}

/// A pointer type. Its size is always the architecture pointer size and its
/// on-wire representation is always unsigned.
#[derive(Clone, Debug)]
pub struct PointerType {
    pub referenced: TypeId,
}

/// A fixed-count array type.
#[derive(Clone, Debug)]
pub struct ArrayType {
    pub member: TypeId,
    pub count: u64,
}

/// One member of a struct type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructField {
    pub offset: u64,
    pub ty: TypeId,
    pub name: String,
}

/// A named struct type with fields kept ordered by offset.
///
/// The size is `last_field.offset + last_field.size` when the last field has
/// a known size; an empty struct has unknown size. Offsets are taken verbatim
/// from the catalogue source; no alignment or padding is computed here.
#[derive(Clone, Debug)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructType {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Insert a field keeping the list ordered by offset.
    pub(crate) fn insert_field(&mut self, field: StructField) {
        let at = self.fields.partition_point(|f| f.offset <= field.offset);
        self.fields.insert(at, field);
    }

    /// Look up a field by name, together with its position in the field list.
    pub fn field(&self, name: &str) -> Option<(usize, &StructField)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
    }
}

/// A C type, tagged by shape.
#[derive(Clone, Debug)]
pub enum Type {
    Int(IntType),
    Pointer(PointerType),
    Array(ArrayType),
    Struct(StructType),
}

/// Representable range of an integral type of `size` bytes.
///
/// Sizes above 16 bytes saturate at the `i128` payload range; such types only
/// occur as opaque encodings of exotic floats and never round-trip payloads
/// near the bounds.
pub(crate) fn int_bounds(size: u64, signed: bool) -> (i128, i128) {
    let bits = (size * 8).min(127) as u32;
    if bits == 0 {
        (0, 0)
    } else if signed {
        let half = 1i128 << (bits - 1);
        (-half, half - 1)
    } else if bits >= 127 {
        (0, i128::MAX)
    } else {
        (0, (1i128 << bits) - 1)
    }
}
