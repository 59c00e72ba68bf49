// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The typed value graph.
//!
//! Values live in a [Graph] arena and are addressed by [ValueId] handles, so
//! both reference kinds the layout engine cares about (positional anchors and
//! pointer referents) are plain indices rather than ownership edges.
//! A struct exclusively owns its field values and an array its elements;
//! pointers reference their target weakly.
//!
//! Host-side convenience inputs (integers, floats, strings, byte strings,
//! nested lists, other values) are modelled by [Init] and coerced through
//! [Graph::cast] with per-shape rules: integer casts wrap modulo `2^n`,
//! string and byte inputs materialize character arrays behind pointers, and
//! struct casts accept only a same-type struct value.

use bytes::{BufMut, Bytes, BytesMut};

use crate::arch::Endianness;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::types::{int_bounds, Type, TypeId};

/// Handle to a value in a [Graph].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

impl ValueId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A convenience input for constructing or assigning values.
#[derive(Clone, Debug)]
pub enum Init {
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Value(ValueId),
    List(Vec<Init>),
}

impl Init {
    /// Build a list input from anything convertible.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Init>,
    {
        Init::List(items.into_iter().map(Into::into).collect())
    }

    fn kind(&self) -> &'static str {
        match self {
            Init::Int(_) => "an integer",
            Init::Float(_) => "a float",
            Init::Str(_) => "a string",
            Init::Bytes(_) => "a byte string",
            Init::Value(_) => "a value",
            Init::List(_) => "a list",
        }
    }
}

impl From<i128> for Init {
    fn from(v: i128) -> Self {
        Init::Int(v)
    }
}

impl From<i64> for Init {
    fn from(v: i64) -> Self {
        Init::Int(v as i128)
    }
}

impl From<i32> for Init {
    fn from(v: i32) -> Self {
        Init::Int(v as i128)
    }
}

impl From<u32> for Init {
    fn from(v: u32) -> Self {
        Init::Int(v as i128)
    }
}

impl From<u64> for Init {
    fn from(v: u64) -> Self {
        Init::Int(v as i128)
    }
}

impl From<f64> for Init {
    fn from(v: f64) -> Self {
        Init::Float(v)
    }
}

impl From<&str> for Init {
    fn from(v: &str) -> Self {
        Init::Str(v.to_string())
    }
}

impl From<String> for Init {
    fn from(v: String) -> Self {
        Init::Str(v)
    }
}

impl From<char> for Init {
    fn from(v: char) -> Self {
        Init::Str(v.to_string())
    }
}

impl From<&[u8]> for Init {
    fn from(v: &[u8]) -> Self {
        Init::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Init {
    fn from(v: Vec<u8>) -> Self {
        Init::Bytes(v)
    }
}

impl From<ValueId> for Init {
    fn from(v: ValueId) -> Self {
        Init::Value(v)
    }
}

impl From<Vec<Init>> for Init {
    fn from(v: Vec<Init>) -> Self {
        Init::List(v)
    }
}

#[derive(Clone, Debug)]
enum Payload {
    Int(Option<i128>),
    Pointer {
        referent: Option<ValueId>,
        raw: Option<u64>,
    },
    Array(Vec<ValueId>),
    /// Field values, parallel to the struct type's offset-ordered field list.
    Struct(Vec<ValueId>),
}

#[derive(Clone, Debug)]
struct ValueSlot {
    ty: TypeId,
    base: Option<ValueId>,
    offset: Option<i64>,
    payload: Payload,
}

/// Arena of typed values built against one [Namespace].
pub struct Graph<'ns> {
    ns: &'ns Namespace,
    values: Vec<ValueSlot>,
}

impl<'ns> Graph<'ns> {
    pub fn new(ns: &'ns Namespace) -> Self {
        Self {
            ns,
            values: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &'ns Namespace {
        self.ns
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    fn slot(&self, id: ValueId) -> &ValueSlot {
        &self.values[id.index()]
    }

    fn push(
        &mut self,
        ty: TypeId,
        base: Option<ValueId>,
        offset: Option<i64>,
        payload: Payload,
    ) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueSlot {
            ty,
            base,
            offset,
            payload,
        });
        id
    }

    // ------------------------------------------------------------------
    // Construction

    /// Construct an integer value, range-checking the payload against the
    /// type's size and signedness.
    pub fn int_value(&mut self, ty: TypeId, payload: i128) -> Result<ValueId> {
        let t = self.expect_int(ty)?;
        let (min, max) = t
            .bounds()
            .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(ty)))?;
        if payload < min || payload > max {
            return Err(Error::OutOfRange {
                value: payload,
                type_name: self.ns.type_name(ty),
            });
        }
        Ok(self.push(ty, None, None, Payload::Int(Some(payload))))
    }

    /// Construct a pointer value. At most one of `referent` and `raw` may be
    /// given.
    pub fn pointer_value(
        &mut self,
        ty: TypeId,
        referent: Option<ValueId>,
        raw: Option<u64>,
    ) -> Result<ValueId> {
        self.expect_pointer(ty)?;
        if referent.is_some() && raw.is_some() {
            return Err(Error::ConflictingInit);
        }
        Ok(self.push(ty, None, None, Payload::Pointer { referent, raw }))
    }

    /// Construct an array value from exactly `count` existing values. Each
    /// input is copied and re-bound to the array at its element offset.
    pub fn array_value(&mut self, ty: TypeId, elements: &[ValueId]) -> Result<ValueId> {
        let t = self.expect_array(ty)?;
        let member_size = self
            .ns
            .size_of(t.member)
            .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(t.member)))?;
        if elements.len() as u64 != t.count {
            return Err(Error::ShapeMismatch {
                expected: t.count,
                got: elements.len() as u64,
            });
        }
        let id = self.push(ty, None, None, Payload::Array(Vec::new()));
        let mut members = Vec::with_capacity(elements.len());
        for (i, &elem) in elements.iter().enumerate() {
            members.push(self.copy_bound(elem, Some(id), Some(i as i64 * member_size as i64)));
        }
        self.values[id.index()].payload = Payload::Array(members);
        Ok(id)
    }

    /// Construct a struct value: every declared field is default-constructed,
    /// then each provided initializer is applied as in [Graph::set_field].
    pub fn struct_value(&mut self, ty: TypeId, inits: Vec<(&str, Init)>) -> Result<ValueId> {
        self.expect_struct(ty)?;
        let id = self.default_bound(ty, None, None)?;
        for (name, init) in inits {
            self.set_field(id, name, init)?;
        }
        Ok(id)
    }

    /// Default-construct a value of any type: integers and pointers start
    /// uninitialized, arrays and structs default-construct their children.
    pub fn default_value(&mut self, ty: TypeId) -> Result<ValueId> {
        self.default_bound(ty, None, None)
    }

    fn default_bound(
        &mut self,
        ty: TypeId,
        base: Option<ValueId>,
        offset: Option<i64>,
    ) -> Result<ValueId> {
        match self.ns.get(ty) {
            Type::Int(_) => Ok(self.push(ty, base, offset, Payload::Int(None))),
            Type::Pointer(_) => Ok(self.push(
                ty,
                base,
                offset,
                Payload::Pointer {
                    referent: None,
                    raw: None,
                },
            )),
            Type::Array(t) => {
                let member_size = self
                    .ns
                    .size_of(t.member)
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(t.member)))?;
                let id = self.push(ty, base, offset, Payload::Array(Vec::new()));
                let mut members = Vec::with_capacity(t.count as usize);
                for i in 0..t.count {
                    members.push(self.default_bound(
                        t.member,
                        Some(id),
                        Some(i as i64 * member_size as i64),
                    )?);
                }
                self.values[id.index()].payload = Payload::Array(members);
                Ok(id)
            }
            Type::Struct(t) => {
                let id = self.push(ty, base, offset, Payload::Struct(Vec::new()));
                let mut fields = Vec::with_capacity(t.fields.len());
                for field in &t.fields {
                    fields.push(self.default_bound(
                        field.ty,
                        Some(id),
                        Some(field.offset as i64),
                    )?);
                }
                self.values[id.index()].payload = Payload::Struct(fields);
                Ok(id)
            }
        }
    }

    /// Copy a value without a positional binding. Owned children (array
    /// elements, struct fields) are copied too; pointer referents stay
    /// shared.
    pub fn copy(&mut self, id: ValueId) -> ValueId {
        self.copy_bound(id, None, None)
    }

    fn copy_bound(&mut self, src: ValueId, base: Option<ValueId>, offset: Option<i64>) -> ValueId {
        let ty = self.slot(src).ty;
        match self.slot(src).payload.clone() {
            Payload::Int(payload) => self.push(ty, base, offset, Payload::Int(payload)),
            Payload::Pointer { referent, raw } => {
                self.push(ty, base, offset, Payload::Pointer { referent, raw })
            }
            Payload::Array(members) => {
                let member_size = match self.ns.get(ty) {
                    Type::Array(t) => self.ns.size_of(t.member).unwrap_or(0),
                    _ => 0,
                };
                let id = self.push(ty, base, offset, Payload::Array(Vec::new()));
                let copied = members
                    .iter()
                    .enumerate()
                    .map(|(i, &m)| {
                        self.copy_bound(m, Some(id), Some(i as i64 * member_size as i64))
                    })
                    .collect();
                self.values[id.index()].payload = Payload::Array(copied);
                id
            }
            Payload::Struct(fields) => {
                let field_defs = match self.ns.get(ty) {
                    Type::Struct(t) => t.fields,
                    _ => Vec::new(),
                };
                let id = self.push(ty, base, offset, Payload::Struct(Vec::new()));
                let copied = fields
                    .iter()
                    .zip(&field_defs)
                    .map(|(&f, def)| self.copy_bound(f, Some(id), Some(def.offset as i64)))
                    .collect();
                self.values[id.index()].payload = Payload::Struct(copied);
                id
            }
        }
    }

    /// Construct a pointer value referencing `target`, interning the pointer
    /// type on demand.
    pub fn reference(&mut self, target: ValueId) -> ValueId {
        let ptr_ty = self.ns.pointer_to(self.slot(target).ty);
        self.push(
            ptr_ty,
            None,
            None,
            Payload::Pointer {
                referent: Some(target),
                raw: None,
            },
        )
    }

    // ------------------------------------------------------------------
    // Coercion

    /// Coerce a convenience input to `ty`.
    pub fn cast(&mut self, ty: TypeId, init: Init) -> Result<ValueId> {
        self.cast_bound(ty, init, None, None)
    }

    fn cast_bound(
        &mut self,
        ty: TypeId,
        init: Init,
        base: Option<ValueId>,
        offset: Option<i64>,
    ) -> Result<ValueId> {
        match self.ns.get(ty) {
            Type::Int(t) => {
                let size = t
                    .size
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(ty)))?;
                let raw = match &init {
                    Init::Int(v) => *v,
                    Init::Float(f) => f.trunc() as i128,
                    Init::Str(s) => {
                        let mut chars = s.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c as u32 as i128,
                            _ => return Err(self.mismatch(ty, &init)),
                        }
                    }
                    Init::Bytes(b) if b.len() == 1 => b[0] as i128,
                    _ => return Err(self.mismatch(ty, &init)),
                };
                let wrapped = wrap_to_type(raw, size, t.signed);
                Ok(self.push(ty, base, offset, Payload::Int(Some(wrapped))))
            }
            Type::Pointer(t) => {
                let items: Vec<Init> = match init {
                    Init::Int(v) => {
                        let raw = u64::try_from(v).map_err(|_| Error::TypeMismatch {
                            type_name: self.ns.type_name(ty),
                            input: "an integer",
                        })?;
                        return Ok(self.push(
                            ty,
                            base,
                            offset,
                            Payload::Pointer {
                                referent: None,
                                raw: Some(raw),
                            },
                        ));
                    }
                    Init::Str(s) => s.into_bytes().into_iter().map(|b| Init::Int(b as i128)).collect(),
                    Init::Bytes(b) => b.into_iter().map(|b| Init::Int(b as i128)).collect(),
                    Init::List(items) => items,
                    other => return Err(self.mismatch(ty, &other)),
                };
                if items.is_empty() {
                    // An empty buffer has no address to point at.
                    return Err(Error::TypeMismatch {
                        type_name: self.ns.type_name(ty),
                        input: "an empty sequence",
                    });
                }
                let arr_ty = self.ns.array(t.referenced, items.len() as u64);
                let buffer = self.cast_bound(arr_ty, Init::List(items), None, None)?;
                Ok(self.push(
                    ty,
                    base,
                    offset,
                    Payload::Pointer {
                        referent: Some(buffer),
                        raw: None,
                    },
                ))
            }
            Type::Array(t) => {
                let items: Vec<Init> = match init {
                    Init::Str(s) => s.chars().map(Init::from).collect(),
                    Init::Bytes(b) => b.into_iter().map(|b| Init::Int(b as i128)).collect(),
                    Init::List(items) => items,
                    other => return Err(self.mismatch(ty, &other)),
                };
                if items.len() as u64 > t.count {
                    return Err(Error::TypeMismatch {
                        type_name: self.ns.type_name(ty),
                        input: "too many elements",
                    });
                }
                let member_size = self
                    .ns
                    .size_of(t.member)
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(t.member)))?;
                let id = self.push(ty, base, offset, Payload::Array(Vec::new()));
                let mut members = Vec::with_capacity(t.count as usize);
                for (i, item) in items.into_iter().enumerate() {
                    let elem_offset = Some(i as i64 * member_size as i64);
                    members.push(self.cast_bound(t.member, item, Some(id), elem_offset)?);
                }
                for i in members.len() as u64..t.count {
                    let elem_offset = Some(i as i64 * member_size as i64);
                    members.push(self.default_bound(t.member, Some(id), elem_offset)?);
                }
                self.values[id.index()].payload = Payload::Array(members);
                Ok(id)
            }
            Type::Struct(_) => match init {
                Init::Value(v) if self.ns.type_eq(self.slot(v).ty, ty) => {
                    if base.is_some() || offset.is_some() {
                        Ok(self.copy_bound(v, base, offset))
                    } else {
                        Ok(v)
                    }
                }
                other => Err(self.mismatch(ty, &other)),
            },
        }
    }

    fn mismatch(&self, ty: TypeId, init: &Init) -> Error {
        Error::TypeMismatch {
            type_name: self.ns.type_name(ty),
            input: init.kind(),
        }
    }

    // ------------------------------------------------------------------
    // Mutation

    /// Assign a struct field. A value of the field's type is copied and
    /// re-bound; anything else goes through the field type's cast rules.
    pub fn set_field(&mut self, struct_id: ValueId, name: &str, init: Init) -> Result<()> {
        let ty = self.slot(struct_id).ty;
        let st = self.expect_struct(ty)?;
        let (idx, field) = st.field(name).ok_or_else(|| Error::UnknownField {
            type_name: self.ns.type_name(ty),
            field: name.to_string(),
        })?;
        let field_ty = field.ty;
        let field_offset = Some(field.offset as i64);

        let new_value = match init {
            Init::Value(v) if self.ns.type_eq(self.slot(v).ty, field_ty) => {
                self.copy_bound(v, Some(struct_id), field_offset)
            }
            other => self.cast_bound(field_ty, other, Some(struct_id), field_offset)?,
        };

        match &mut self.values[struct_id.index()].payload {
            Payload::Struct(fields) => fields[idx] = new_value,
            _ => unreachable!("expect_struct checked the payload shape"),
        }
        Ok(())
    }

    /// Replace an integer value's payload.
    pub fn set_int(&mut self, id: ValueId, payload: Option<i128>) -> Result<()> {
        let ty = self.slot(id).ty;
        let t = self.expect_int(ty)?;
        if let Some(v) = payload {
            let (min, max) = t
                .bounds()
                .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(ty)))?;
            if v < min || v > max {
                return Err(Error::OutOfRange {
                    value: v,
                    type_name: self.ns.type_name(ty),
                });
            }
        }
        match &mut self.values[id.index()].payload {
            Payload::Int(p) => *p = payload,
            _ => unreachable!("expect_int checked the payload shape"),
        }
        Ok(())
    }

    /// Replace a pointer's raw target address, dropping any referent.
    pub fn set_pointer_raw(&mut self, id: ValueId, raw: Option<u64>) -> Result<()> {
        self.expect_pointer(self.slot(id).ty)?;
        match &mut self.values[id.index()].payload {
            Payload::Pointer { referent, raw: r } => {
                *referent = None;
                *r = raw;
            }
            _ => unreachable!("expect_pointer checked the payload shape"),
        }
        Ok(())
    }

    /// Re-bind a value to a new anchor and offset.
    pub fn rebind(&mut self, id: ValueId, base: Option<ValueId>, offset: Option<i64>) {
        let slot = &mut self.values[id.index()];
        slot.base = base;
        slot.offset = offset;
    }

    pub(crate) fn set_offset(&mut self, id: ValueId, offset: i64) {
        self.values[id.index()].offset = Some(offset);
    }

    // ------------------------------------------------------------------
    // Inspection

    pub fn ty(&self, id: ValueId) -> TypeId {
        self.slot(id).ty
    }

    pub fn address_base(&self, id: ValueId) -> Option<ValueId> {
        self.slot(id).base
    }

    pub fn offset(&self, id: ValueId) -> Option<i64> {
        self.slot(id).offset
    }

    /// The absolute address of the value's first byte, if resolvable: the
    /// anchor chain's offsets summed onto the terminal value's absolute
    /// offset. `None` while unplaced, partially bound, or cyclically bound.
    pub fn address(&self, id: ValueId) -> Option<u64> {
        let mut total: i128 = 0;
        let mut cur = id;
        for _ in 0..=self.values.len() {
            let slot = self.slot(cur);
            total += slot.offset? as i128;
            match slot.base {
                None => return u64::try_from(total).ok(),
                Some(base) => cur = base,
            }
        }
        None
    }

    /// An integer value's payload, if initialized.
    pub fn int_payload(&self, id: ValueId) -> Option<i128> {
        match self.slot(id).payload {
            Payload::Int(p) => p,
            _ => None,
        }
    }

    /// A pointer's referent, if it has one.
    pub fn referent(&self, id: ValueId) -> Option<ValueId> {
        match self.slot(id).payload {
            Payload::Pointer { referent, .. } => referent,
            _ => None,
        }
    }

    /// The address a pointer targets: its raw value if set, otherwise the
    /// referent's resolved address.
    pub fn target_address(&self, id: ValueId) -> Option<u64> {
        match self.slot(id).payload {
            Payload::Pointer { raw: Some(raw), .. } => Some(raw),
            Payload::Pointer {
                referent: Some(referent),
                ..
            } => self.address(referent),
            _ => None,
        }
    }

    /// An array's element values.
    pub fn elements(&self, id: ValueId) -> Vec<ValueId> {
        match &self.slot(id).payload {
            Payload::Array(members) => members.clone(),
            _ => Vec::new(),
        }
    }

    /// A struct's field value by name.
    pub fn field(&self, struct_id: ValueId, name: &str) -> Result<ValueId> {
        let ty = self.slot(struct_id).ty;
        let st = self.expect_struct(ty)?;
        let (idx, _) = st.field(name).ok_or_else(|| Error::UnknownField {
            type_name: self.ns.type_name(ty),
            field: name.to_string(),
        })?;
        match &self.slot(struct_id).payload {
            Payload::Struct(fields) => Ok(fields[idx]),
            _ => unreachable!("expect_struct checked the payload shape"),
        }
    }

    /// Every value this one references: its anchor, plus owned children and
    /// the pointer referent. The layout engine's reachability walk follows
    /// exactly this set.
    pub fn referenced(&self, id: ValueId) -> Vec<ValueId> {
        let slot = self.slot(id);
        let mut out = Vec::new();
        if let Some(base) = slot.base {
            out.push(base);
        }
        match &slot.payload {
            Payload::Int(_) => {}
            Payload::Pointer { referent, .. } => out.extend(referent.iter().copied()),
            Payload::Array(members) => out.extend(members.iter().copied()),
            Payload::Struct(fields) => out.extend(fields.iter().copied()),
        }
        out
    }

    /// Whether the value is an array of 1-byte integers.
    pub fn is_character_array(&self, id: ValueId) -> bool {
        match self.ns.get(self.slot(id).ty) {
            Type::Array(t) => matches!(self.ns.get(t.member), Type::Int(m) if m.size == Some(1)),
            _ => false,
        }
    }

    /// Convert a character array to bytes, stopping before the first zero or
    /// uninitialized element.
    pub fn char_array_bytes(&self, id: ValueId) -> Result<Vec<u8>> {
        if !self.is_character_array(id) {
            return Err(Error::TypeMismatch {
                type_name: self.ns.type_name(self.slot(id).ty),
                input: "a byte conversion",
            });
        }
        let mut out = Vec::new();
        for elem in self.elements(id) {
            match self.int_payload(elem) {
                None | Some(0) => break,
                Some(v) => out.push((v & 0xff) as u8),
            }
        }
        Ok(out)
    }

    /// Short human-readable description, used in error paths.
    pub fn describe(&self, id: ValueId) -> String {
        let slot = self.slot(id);
        let name = self.ns.type_name(slot.ty);
        match &slot.payload {
            Payload::Int(Some(v)) => format!("<{name} {v}>"),
            Payload::Int(None) => format!("<{name} uninitialized>"),
            Payload::Pointer { .. } => match self.target_address(id) {
                Some(0) => format!("<{name} NULL>"),
                Some(addr) => format!("<{name} {addr:#x}>"),
                None => format!("<{name} unset>"),
            },
            Payload::Array(members) => {
                if self.is_character_array(id) {
                    let text = self
                        .char_array_bytes(id)
                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                        .unwrap_or_default();
                    format!("<{name} {text:?}>")
                } else {
                    let parts: Vec<_> = members.iter().map(|&m| self.describe(m)).collect();
                    format!("<{name} {{{}}}>", parts.join(", "))
                }
            }
            Payload::Struct(_) => match self.address(id) {
                Some(addr) => format!("<struct {name} @{addr:#x}>"),
                None => format!("<struct {name} @unset>"),
            },
        }
    }

    // ------------------------------------------------------------------
    // Serialization

    /// Serialize one value to bytes in the namespace's endianness.
    pub fn pack(&self, id: ValueId) -> Result<Bytes> {
        let slot = self.slot(id);
        let endianness = self.ns.arch().endianness;
        match (&slot.payload, self.ns.get(slot.ty)) {
            (Payload::Int(payload), Type::Int(t)) => {
                let size = t
                    .size
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(slot.ty)))?;
                pack_integral(payload.unwrap_or(0), size, t.signed, endianness)
            }
            (Payload::Pointer { .. }, Type::Pointer(_)) => {
                // An unresolved target packs as a null pointer; the layout
                // engine resolves every reachable referent before this runs.
                let addr = self.target_address(id).unwrap_or(0);
                pack_integral(
                    addr as i128,
                    self.ns.arch().pointer_size,
                    false,
                    endianness,
                )
            }
            (Payload::Array(members), Type::Array(t)) => {
                let member_size = self
                    .ns
                    .size_of(t.member)
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(t.member)))?;
                let mut buf = BytesMut::with_capacity((member_size * t.count) as usize);
                for (index, &member) in members.iter().enumerate() {
                    let part = self.pack(member).map_err(|e| Error::Element {
                        index,
                        source: Box::new(e),
                    })?;
                    if part.len() as u64 != member_size {
                        return Err(Error::SizeMismatch {
                            what: format!("element {index}"),
                            expected: member_size,
                            got: part.len() as u64,
                        });
                    }
                    buf.extend_from_slice(&part);
                }
                Ok(buf.freeze())
            }
            (Payload::Struct(fields), Type::Struct(t)) => {
                let size = self
                    .ns
                    .size_of(slot.ty)
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(slot.ty)))?;
                let mut buf = BytesMut::with_capacity(size as usize);
                let mut last_end = 0u64;
                for (def, &field) in t.fields.iter().zip(fields) {
                    if def.offset < last_end {
                        return Err(Error::SizeMismatch {
                            what: format!("offset of field {}", def.name),
                            expected: last_end,
                            got: def.offset,
                        });
                    }
                    let declared = self.ns.size_of(def.ty).ok_or_else(|| Error::Field {
                        field: def.name.clone(),
                        source: Box::new(Error::UnresolvedSize(self.ns.type_name(def.ty))),
                    })?;
                    let part = self.pack(field).map_err(|e| Error::Field {
                        field: def.name.clone(),
                        source: Box::new(e),
                    })?;
                    if part.len() as u64 != declared {
                        return Err(Error::SizeMismatch {
                            what: format!("field {}", def.name),
                            expected: declared,
                            got: part.len() as u64,
                        });
                    }
                    buf.put_bytes(0, (def.offset - last_end) as usize);
                    buf.extend_from_slice(&part);
                    last_end = def.offset + declared;
                }
                Ok(buf.freeze())
            }
            _ => unreachable!("payload shape always matches the value type"),
        }
    }

    /// Decode a value of `ty` from a buffer of exactly the type's size.
    pub fn unpack(&mut self, ty: TypeId, buffer: &[u8]) -> Result<ValueId> {
        self.unpack_bound(ty, buffer, None, None)
    }

    /// Decode a value and bind it at an absolute address, so child values
    /// (and pointers into them) resolve against that placement.
    pub fn unpack_at(&mut self, ty: TypeId, buffer: &[u8], address: u64) -> Result<ValueId> {
        self.unpack_bound(ty, buffer, None, Some(address as i64))
    }

    fn unpack_bound(
        &mut self,
        ty: TypeId,
        buffer: &[u8],
        base: Option<ValueId>,
        offset: Option<i64>,
    ) -> Result<ValueId> {
        let endianness = self.ns.arch().endianness;
        match self.ns.get(ty) {
            Type::Int(t) => {
                let size = t
                    .size
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(ty)))?;
                if buffer.len() as u64 != size {
                    return Err(Error::SizeMismatch {
                        what: self.ns.type_name(ty),
                        expected: size,
                        got: buffer.len() as u64,
                    });
                }
                let payload = unpack_integral(buffer, t.signed, endianness);
                Ok(self.push(ty, base, offset, Payload::Int(Some(payload))))
            }
            Type::Pointer(_) => {
                let size = self.ns.arch().pointer_size;
                if buffer.len() as u64 != size {
                    return Err(Error::SizeMismatch {
                        what: self.ns.type_name(ty),
                        expected: size,
                        got: buffer.len() as u64,
                    });
                }
                let raw = unpack_integral(buffer, false, endianness) as u64;
                Ok(self.push(
                    ty,
                    base,
                    offset,
                    Payload::Pointer {
                        referent: None,
                        raw: Some(raw),
                    },
                ))
            }
            Type::Array(t) => {
                let member_size = self
                    .ns
                    .size_of(t.member)
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(t.member)))?;
                if buffer.len() as u64 != member_size * t.count {
                    return Err(Error::SizeMismatch {
                        what: self.ns.type_name(ty),
                        expected: member_size * t.count,
                        got: buffer.len() as u64,
                    });
                }
                let id = self.push(ty, base, offset, Payload::Array(Vec::new()));
                let mut members = Vec::with_capacity(t.count as usize);
                for i in 0..t.count {
                    let start = (i * member_size) as usize;
                    let window = &buffer[start..start + member_size as usize];
                    members.push(self.unpack_bound(
                        t.member,
                        window,
                        Some(id),
                        Some(start as i64),
                    )?);
                }
                self.values[id.index()].payload = Payload::Array(members);
                Ok(id)
            }
            Type::Struct(t) => {
                let size = self
                    .ns
                    .size_of(ty)
                    .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(ty)))?;
                if buffer.len() as u64 != size {
                    return Err(Error::SizeMismatch {
                        what: self.ns.type_name(ty),
                        expected: size,
                        got: buffer.len() as u64,
                    });
                }
                let id = self.push(ty, base, offset, Payload::Struct(Vec::new()));
                let mut fields = Vec::with_capacity(t.fields.len());
                for def in &t.fields {
                    let field_size = self
                        .ns
                        .size_of(def.ty)
                        .ok_or_else(|| Error::UnresolvedSize(self.ns.type_name(def.ty)))?;
                    let start = def.offset as usize;
                    let window = &buffer[start..start + field_size as usize];
                    fields.push(self.unpack_bound(
                        def.ty,
                        window,
                        Some(id),
                        Some(def.offset as i64),
                    )?);
                }
                self.values[id.index()].payload = Payload::Struct(fields);
                Ok(id)
            }
        }
    }

    // ------------------------------------------------------------------
    // Type expectations

    fn expect_int(&self, ty: TypeId) -> Result<crate::types::IntType> {
        match self.ns.get(ty) {
            Type::Int(t) => Ok(t),
            _ => Err(Error::TypeMismatch {
                type_name: self.ns.type_name(ty),
                input: "an integer operation",
            }),
        }
    }

    fn expect_pointer(&self, ty: TypeId) -> Result<crate::types::PointerType> {
        match self.ns.get(ty) {
            Type::Pointer(t) => Ok(t),
            _ => Err(Error::TypeMismatch {
                type_name: self.ns.type_name(ty),
                input: "a pointer operation",
            }),
        }
    }

    fn expect_array(&self, ty: TypeId) -> Result<crate::types::ArrayType> {
        match self.ns.get(ty) {
            Type::Array(t) => Ok(t),
            _ => Err(Error::TypeMismatch {
                type_name: self.ns.type_name(ty),
                input: "an array operation",
            }),
        }
    }

    fn expect_struct(&self, ty: TypeId) -> Result<crate::types::StructType> {
        match self.ns.get(ty) {
            Type::Struct(t) => Ok(t),
            _ => Err(Error::TypeMismatch {
                type_name: self.ns.type_name(ty),
                input: "a struct operation",
            }),
        }
    }
}

/// Wrap an integer to `size` bytes, reinterpreting the top bit for the
/// target signedness.
fn wrap_to_type(value: i128, size: u64, signed: bool) -> i128 {
    let bits = size * 8;
    if bits == 0 || bits >= 127 {
        return value;
    }
    let bits = bits as u32;
    let mask = (1u128 << bits) - 1;
    let raw = (value as u128) & mask;
    if signed && (raw >> (bits - 1)) & 1 == 1 {
        raw as i128 - (1i128 << bits)
    } else {
        raw as i128
    }
}

/// Serialize an integral value as `size` bytes, two's-complement when
/// signed.
pub(crate) fn pack_integral(
    value: i128,
    size: u64,
    signed: bool,
    endianness: Endianness,
) -> Result<Bytes> {
    let (min, max) = int_bounds(size, signed);
    if value < min || value > max {
        let prefix = if signed { "" } else { "un" };
        return Err(Error::OutOfRange {
            value,
            type_name: format!("{prefix}signed integral type of {size} bytes"),
        });
    }

    let n = size as usize;
    let le = (value as u128).to_le_bytes();
    let mut bytes: Vec<u8> = (0..n).map(|i| if i < le.len() { le[i] } else { 0 }).collect();
    if endianness == Endianness::Big {
        bytes.reverse();
    }

    let mut buf = BytesMut::with_capacity(n);
    buf.extend_from_slice(&bytes);
    Ok(buf.freeze())
}

/// Decode an integral value from a buffer, sign-extending when signed.
pub(crate) fn unpack_integral(buffer: &[u8], signed: bool, endianness: Endianness) -> i128 {
    let mut bytes = buffer.to_vec();
    if endianness == Endianness::Big {
        bytes.reverse();
    }

    let mut raw: u128 = 0;
    for (i, b) in bytes.iter().enumerate().take(16) {
        raw |= (*b as u128) << (8 * i as u32);
    }

    let bits = (bytes.len() * 8).min(64) as u32;
    if signed && bits > 0 && (raw >> (bits - 1)) & 1 == 1 && bytes.len() <= 8 {
        raw as i128 - (1i128 << bits)
    } else {
        raw as i128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;

    fn make_namespace(endianness: Endianness, word_size: u64) -> Namespace {
        Namespace::new(Arch::new(endianness, word_size).unwrap())
    }

    fn make_namespaces() -> Vec<Namespace> {
        vec![
            make_namespace(Endianness::Little, 4),
            make_namespace(Endianness::Big, 4),
            make_namespace(Endianness::Little, 8),
            make_namespace(Endianness::Big, 8),
        ]
    }

    fn amd64_namespace() -> Namespace {
        make_namespace(Endianness::Little, 8)
    }

    /// Network-order test bytes to the namespace's byte order.
    fn ntoh(ns: &Namespace, bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        if ns.arch().endianness == Endianness::Little {
            out.reverse();
        }
        out
    }

    #[test]
    fn int_new_checks_bounds() {
        for ns in make_namespaces() {
            let b = *ns.builtins();
            let mut g = Graph::new(&ns);

            assert!(g.int_value(b.int, 0x7fff_ffff).is_ok());
            assert!(g.int_value(b.int, -0x8000_0000).is_ok());
            assert!(matches!(
                g.int_value(b.int, -0x8000_0001),
                Err(Error::OutOfRange { .. })
            ));
            assert!(matches!(
                g.int_value(b.int, 0x8000_0000),
                Err(Error::OutOfRange { .. })
            ));
            assert!(matches!(
                g.int_value(b.int, 0x1_0000_0000),
                Err(Error::OutOfRange { .. })
            ));

            assert!(g.int_value(b.unsigned_int, 0xffff_ffff).is_ok());
            assert!(matches!(
                g.int_value(b.unsigned_int, -1),
                Err(Error::OutOfRange { .. })
            ));
            assert!(matches!(
                g.int_value(b.unsigned_int, 0x1_0000_0000),
                Err(Error::OutOfRange { .. })
            ));

            assert!(matches!(
                g.int_value(b.char, 128),
                Err(Error::OutOfRange { .. })
            ));
            assert!(matches!(
                g.int_value(b.unsigned_char, -1),
                Err(Error::OutOfRange { .. })
            ));

            // 8-byte unsigned extremes round-trip.
            let max = g.int_value(b.uint64, u64::MAX as i128).unwrap();
            let packed = g.pack(max).unwrap();
            let back = g.unpack(b.uint64, &packed).unwrap();
            assert_eq!(g.int_payload(back), Some(u64::MAX as i128));
        }
    }

    #[test]
    fn int_cast_signed() {
        for ns in make_namespaces() {
            let b = *ns.builtins();
            let mut g = Graph::new(&ns);

            let cases: Vec<(Init, i128)> = vec![
                (Init::Int(0), 0),
                (Init::Int(1), 1),
                (Init::from("a"), 97),
                (Init::from(vec![b'a']), 97),
                (Init::Float(1.1), 1),
                (Init::Float(1.5), 1),
                (Init::Float(1.9), 1),
                (Init::Float(-2.8), -2),
                (Init::Int(0x7fff_ffff), 0x7fff_ffff),
                (Init::Int(0xffff_ffff), -1),
                (Init::Int(0xffff_fffe), -2),
                (Init::Int(-1), -1),
                (Init::Int(-2), -2),
            ];
            for (init, expected) in cases {
                let v = g.cast(b.int, init).unwrap();
                assert_eq!(g.int_payload(v), Some(expected));
            }

            assert!(matches!(
                g.cast(b.int, Init::List(vec![])),
                Err(Error::TypeMismatch { .. })
            ));
            assert!(matches!(
                g.cast(b.int, Init::from("string")),
                Err(Error::TypeMismatch { .. })
            ));

            let partial = ns.int_type("partial_int_t", None, false);
            assert!(matches!(
                g.cast(partial, Init::Int(0)),
                Err(Error::UnresolvedSize(_))
            ));
        }
    }

    #[test]
    fn int_cast_unsigned() {
        for ns in make_namespaces() {
            let b = *ns.builtins();
            let mut g = Graph::new(&ns);

            let cases: Vec<(Init, i128)> = vec![
                (Init::Int(0), 0),
                (Init::Int(1), 1),
                (Init::Float(-2.8), 0xffff_fffe),
                (Init::Int(0x7fff_ffff), 0x7fff_ffff),
                (Init::Int(0xffff_ffff), 0xffff_ffff),
                (Init::Int(-1), 0xffff_ffff),
                (Init::Int(-2), 0xffff_fffe),
            ];
            for (init, expected) in cases {
                let v = g.cast(b.unsigned_int, init).unwrap();
                assert_eq!(g.int_payload(v), Some(expected));
            }
        }
    }

    #[test]
    fn int_cast_is_idempotent() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let once = g.cast(b.int, Init::Int(0xffff_ffff)).unwrap();
        let twice = g.cast(b.int, Init::Int(g.int_payload(once).unwrap())).unwrap();
        assert_eq!(g.int_payload(once), g.int_payload(twice));
        assert_eq!(g.int_payload(twice), Some(-1));
    }

    #[test]
    fn int_pack() {
        for ns in make_namespaces() {
            let b = *ns.builtins();
            let mut g = Graph::new(&ns);

            let uninitialized = g.default_value(b.int).unwrap();
            assert_eq!(g.pack(uninitialized).unwrap(), ntoh(&ns, b"\x00\x00\x00\x00"));

            let cases: Vec<(i128, &[u8])> = vec![
                (1, b"\x00\x00\x00\x01"),
                (2, b"\x00\x00\x00\x02"),
                (0x7fff_ffff, b"\x7f\xff\xff\xff"),
                (-1, b"\xff\xff\xff\xff"),
                (-2, b"\xff\xff\xff\xfe"),
            ];
            for (payload, expected) in cases {
                let v = g.int_value(b.int, payload).unwrap();
                assert_eq!(g.pack(v).unwrap(), ntoh(&ns, expected));
            }

            let v = g.int_value(b.unsigned_int, 0xffff_ffff).unwrap();
            assert_eq!(g.pack(v).unwrap(), ntoh(&ns, b"\xff\xff\xff\xff"));
        }
    }

    #[test]
    fn int_unpack() {
        for ns in make_namespaces() {
            let b = *ns.builtins();
            let mut g = Graph::new(&ns);

            let cases: Vec<(&[u8], i128)> = vec![
                (b"\x00\x00\x00\x00", 0),
                (b"\x00\x00\x00\x01", 1),
                (b"\x7f\xff\xff\xff", 0x7fff_ffff),
                (b"\xff\xff\xff\xff", -1),
                (b"\xff\xff\xff\xfe", -2),
            ];
            for (bytes, expected) in cases {
                let v = g.unpack(b.int, &ntoh(&ns, bytes)).unwrap();
                assert_eq!(g.int_payload(v), Some(expected));
            }

            let unsigned_cases: Vec<(&[u8], i128)> = vec![
                (b"\xff\xff\xff\xff", 0xffff_ffff),
                (b"\xff\xff\xff\xfe", 0xffff_fffe),
            ];
            for (bytes, expected) in unsigned_cases {
                let v = g.unpack(b.unsigned_int, &ntoh(&ns, bytes)).unwrap();
                assert_eq!(g.int_payload(v), Some(expected));
            }

            for bad in [&b""[..], &b"123"[..], &b"12345"[..]] {
                assert!(matches!(
                    g.unpack(b.int, bad),
                    Err(Error::SizeMismatch { .. })
                ));
            }
        }
    }

    #[test]
    fn integral_bytes_round_trip() {
        let patterns: [[u8; 4]; 5] = [
            [0x00, 0x00, 0x00, 0x00],
            [0xff, 0xff, 0xff, 0xff],
            [0x80, 0x00, 0x00, 0x01],
            [0x01, 0x02, 0x03, 0x04],
            [0x7f, 0xff, 0xff, 0xfe],
        ];
        for signed in [false, true] {
            for endianness in [Endianness::Little, Endianness::Big] {
                for bytes in patterns {
                    let value = unpack_integral(&bytes, signed, endianness);
                    assert_eq!(
                        pack_integral(value, 4, signed, endianness).unwrap(),
                        &bytes[..]
                    );
                }
            }
        }
    }

    #[test]
    fn integral_pack_rejects_out_of_range() {
        assert!(matches!(
            pack_integral(-1, 1, false, Endianness::Little),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            pack_integral(128, 1, true, Endianness::Little),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn int_copy_is_independent() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let a = g.int_value(b.int, 0).unwrap();
        let c = g.copy(a);
        assert_eq!(g.int_payload(c), Some(0));

        g.set_int(a, Some(1)).unwrap();
        assert_eq!(g.int_payload(a), Some(1));
        assert_eq!(g.int_payload(c), Some(0));

        g.set_int(c, Some(2)).unwrap();
        assert_eq!(g.int_payload(a), Some(1));
        assert_eq!(g.int_payload(c), Some(2));
    }

    #[test]
    fn int_referenced_values() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let a = g.int_value(b.int, 0).unwrap();
        let c = g.int_value(b.int, 0).unwrap();
        g.rebind(c, Some(a), Some(4));

        assert!(g.referenced(a).is_empty());
        assert_eq!(g.referenced(c), vec![a]);
    }

    #[test]
    fn address_follows_anchor_chain() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let n1 = g.int_value(b.int, 0).unwrap();
        g.rebind(n1, None, Some(0));
        let n2 = g.int_value(b.int, 1).unwrap();
        g.rebind(n2, None, Some(4));
        let n3 = g.int_value(b.int, 2).unwrap();
        g.rebind(n3, Some(n2), Some(4));

        assert_eq!(g.address(n1), Some(0));
        assert_eq!(g.address(n2), Some(4));
        assert_eq!(g.address(n3), Some(8));

        g.rebind(n2, None, Some(8));
        assert_eq!(g.address(n3), Some(12));

        g.rebind(n2, None, None);
        assert_eq!(g.address(n2), None);
        assert_eq!(g.address(n3), None);
    }

    #[test]
    fn pointer_pack() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let vp = ns.builtins().void_pointer;
        let p = g.cast(vp, Init::Int(0x0403_0201)).unwrap();
        assert_eq!(g.pack(p).unwrap(), &b"\x01\x02\x03\x04"[..]);
        let null = g.default_value(vp).unwrap();
        assert_eq!(g.pack(null).unwrap(), &b"\x00\x00\x00\x00"[..]);

        let ns = make_namespace(Endianness::Big, 4);
        let mut g = Graph::new(&ns);
        let vp = ns.builtins().void_pointer;
        let p = g.cast(vp, Init::Int(0x0403_0201)).unwrap();
        assert_eq!(g.pack(p).unwrap(), &b"\x04\x03\x02\x01"[..]);

        let ns = make_namespace(Endianness::Little, 8);
        let mut g = Graph::new(&ns);
        let vp = ns.builtins().void_pointer;
        let p = g.cast(vp, Init::Int(0x0807_0605_0403_0201)).unwrap();
        assert_eq!(g.pack(p).unwrap(), &b"\x01\x02\x03\x04\x05\x06\x07\x08"[..]);

        let ns = make_namespace(Endianness::Big, 8);
        let mut g = Graph::new(&ns);
        let vp = ns.builtins().void_pointer;
        let p = g.cast(vp, Init::Int(0x0807_0605_0403_0201)).unwrap();
        assert_eq!(g.pack(p).unwrap(), &b"\x08\x07\x06\x05\x04\x03\x02\x01"[..]);
    }

    #[test]
    fn pointer_unpack() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let p = g.unpack(ns.builtins().void_pointer, b"\x01\x02\x03\x04").unwrap();
        assert_eq!(g.target_address(p), Some(0x0403_0201));

        let ns = make_namespace(Endianness::Big, 4);
        let mut g = Graph::new(&ns);
        let p = g.unpack(ns.builtins().void_pointer, b"\x01\x02\x03\x04").unwrap();
        assert_eq!(g.target_address(p), Some(0x0102_0304));

        let ns = make_namespace(Endianness::Little, 8);
        let mut g = Graph::new(&ns);
        let p = g
            .unpack(ns.builtins().void_pointer, b"\x01\x02\x03\x04\x05\x06\x07\x08")
            .unwrap();
        assert_eq!(g.target_address(p), Some(0x0807_0605_0403_0201));
    }

    #[test]
    fn pointer_invariants() {
        for ns in make_namespaces() {
            let vp = ns.builtins().void_pointer;
            let mut g = Graph::new(&ns);

            assert_eq!(ns.size_of(vp), Some(ns.arch().pointer_size));

            let null = g.pointer_value(vp, None, Some(0)).unwrap();
            assert_eq!(g.target_address(null), Some(0));
            assert_eq!(g.address(null), None);

            assert!(matches!(
                g.pointer_value(vp, Some(null), Some(0)),
                Err(Error::ConflictingInit)
            ));
        }
    }

    #[test]
    fn pointer_target_address() {
        let ns = amd64_namespace();
        let mut g = Graph::new(&ns);
        let vp = ns.builtins().void_pointer;

        let unset = g.default_value(vp).unwrap();
        assert_eq!(g.target_address(unset), None);

        let ptr_to_unset = g.reference(unset);
        assert_eq!(g.target_address(ptr_to_unset), None);

        let num = g.int_value(ns.builtins().int, 0).unwrap();
        g.rebind(num, None, Some(4));
        let ptr = g.reference(num);
        assert_eq!(g.referent(ptr), Some(num));
        assert_eq!(g.target_address(ptr), Some(4));
    }

    #[test]
    fn pointer_copy_is_independent() {
        let ns = amd64_namespace();
        let mut g = Graph::new(&ns);
        let vp = ns.builtins().void_pointer;

        let ptr = g.cast(vp, Init::Int(0)).unwrap();
        let copy = g.copy(ptr);
        assert_eq!(g.target_address(ptr), Some(0));
        assert_eq!(g.target_address(copy), Some(0));

        g.set_pointer_raw(ptr, Some(1)).unwrap();
        assert_eq!(g.target_address(ptr), Some(1));
        assert_eq!(g.target_address(copy), Some(0));

        g.set_pointer_raw(copy, Some(2)).unwrap();
        assert_eq!(g.target_address(ptr), Some(1));
        assert_eq!(g.target_address(copy), Some(2));
    }

    #[test]
    fn pointer_referenced_values() {
        let ns = amd64_namespace();
        let mut g = Graph::new(&ns);
        let vp = ns.builtins().void_pointer;

        let ptr = g.cast(vp, Init::Int(0)).unwrap();
        assert!(g.referenced(ptr).is_empty());

        let offset_ptr = g.cast(vp, Init::Int(0)).unwrap();
        g.rebind(offset_ptr, Some(ptr), Some(4));
        assert_eq!(g.referenced(offset_ptr), vec![ptr]);

        let ptr_ptr = g.reference(ptr);
        assert_eq!(g.referenced(ptr_ptr), vec![ptr]);

        let bound_ptr_ptr = g.reference(ptr);
        g.rebind(bound_ptr_ptr, Some(ptr), Some(4));
        assert_eq!(g.referenced(bound_ptr_ptr), vec![ptr, ptr]);
    }

    #[test]
    fn pointer_cast() {
        let ns = make_namespace(Endianness::Little, 4);
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let p = g.cast(b.void_pointer, Init::Int(0)).unwrap();
        assert_eq!(g.target_address(p), Some(0));

        let char_ptr = ns.pointer_to(b.char);
        let p = g.cast(char_ptr, Init::from("test")).unwrap();
        let buffer = g.referent(p).expect("cast should materialize a buffer");
        assert!(g.is_character_array(buffer));
        assert_eq!(g.elements(buffer).len(), 4);
        assert_eq!(g.char_array_bytes(buffer).unwrap(), b"test");

        assert!(matches!(
            g.cast(b.void_pointer, Init::Float(1.1)),
            Err(Error::TypeMismatch { .. })
        ));
        // An empty buffer has no address to reference.
        assert!(matches!(
            g.cast(char_ptr, Init::from("")),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn array_construction() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);
        let arr_ty = ns.array(b.int, 3);

        let arr = g.default_value(arr_ty).unwrap();
        assert_eq!(g.elements(arr).len(), 3);
        for elem in g.elements(arr) {
            assert_eq!(g.int_payload(elem), None);
        }

        assert!(matches!(
            g.array_value(arr_ty, &[]),
            Err(Error::ShapeMismatch {
                expected: 3,
                got: 0
            })
        ));
    }

    #[test]
    fn array_cast() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);
        let arr_ty = ns.array(b.int, 3);

        let arr = g.cast(arr_ty, Init::list([0, 1, 2])).unwrap();
        let payloads: Vec<_> = g
            .elements(arr)
            .iter()
            .map(|&e| g.int_payload(e))
            .collect();
        assert_eq!(payloads, [Some(0), Some(1), Some(2)]);

        // Missing elements are left default-constructed.
        let arr = g.cast(arr_ty, Init::list([1])).unwrap();
        let elems = g.elements(arr);
        assert_eq!(g.int_payload(elems[0]), Some(1));
        assert_eq!(g.int_payload(elems[1]), None);
        assert_eq!(g.int_payload(elems[2]), None);

        assert!(matches!(
            g.cast(arr_ty, Init::Int(0)),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            g.cast(arr_ty, Init::list([0, 1, 2, 3])),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn array_pack() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let char_arr = ns.array(b.char, 3);
        let hi = g.cast(char_arr, Init::from("hi")).unwrap();
        assert_eq!(g.pack(hi).unwrap(), &b"hi\x00"[..]);

        let int_arr = ns.array(b.int, 3);
        let nums = g.cast(int_arr, Init::list([0, 1, 2])).unwrap();
        assert_eq!(
            g.pack(nums).unwrap(),
            &b"\x00\x00\x00\x00\x01\x00\x00\x00\x02\x00\x00\x00"[..]
        );
    }

    #[test]
    fn array_unpack() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);
        let arr_ty = ns.array(b.int, 3);

        let mut buf = Vec::new();
        for i in 0..3 {
            let v = g.int_value(b.int, i).unwrap();
            buf.extend_from_slice(&g.pack(v).unwrap());
        }

        let arr = g.unpack(arr_ty, &buf).unwrap();
        let payloads: Vec<_> = g
            .elements(arr)
            .iter()
            .map(|&e| g.int_payload(e))
            .collect();
        assert_eq!(payloads, [Some(0), Some(1), Some(2)]);

        assert!(matches!(
            g.unpack(arr_ty, &buf[1..]),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn array_referenced_values() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let arr_ty = ns.array(b.int, 3);
        let arr = g.cast(arr_ty, Init::list([0, 1, 2])).unwrap();
        assert_eq!(g.referenced(arr).len(), 3);

        // Elements are anchored to the containing array.
        let outer_ty = ns.array(arr_ty, 1);
        let outer = g.default_value(outer_ty).unwrap();
        let inner = g.elements(outer)[0];
        let refs = g.referenced(inner);
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[0], outer);
    }

    #[test]
    fn char_array_conversion() {
        let ns = amd64_namespace();
        let b = *ns.builtins();
        let mut g = Graph::new(&ns);

        let char_arr = ns.array(b.char, 4);
        let hi = g.cast(char_arr, Init::from("hi")).unwrap();
        // Stops before the first zero element.
        assert_eq!(g.char_array_bytes(hi).unwrap(), b"hi");

        let full = g.cast(char_arr, Init::from("test")).unwrap();
        assert_eq!(g.char_array_bytes(full).unwrap(), b"test");

        let int_arr = ns.array(b.int, 3);
        let nums = g.cast(int_arr, Init::list([0, 1, 2])).unwrap();
        assert!(matches!(
            g.char_array_bytes(nums),
            Err(Error::TypeMismatch { .. })
        ));
    }

    fn pair_struct(ns: &Namespace) -> TypeId {
        let st = ns.get_or_create_struct("test");
        ns.add_field(st, 0, ns.builtins().int, "int_field").unwrap();
        ns.add_field(st, 4, ns.pointer_to(st), "self_ptr").unwrap();
        st
    }

    #[test]
    fn struct_pack() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let st = pair_struct(&ns);

        let s = g
            .struct_value(st, vec![("int_field", 1.into()), ("self_ptr", 2.into())])
            .unwrap();
        assert_eq!(g.pack(s).unwrap(), &b"\x01\x00\x00\x00\x02\x00\x00\x00"[..]);
    }

    #[test]
    fn struct_with_unknown_size_cannot_pack() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);

        let partial = ns.int_type("partial int", None, false);
        let st = ns.get_or_create_struct("unpackable");
        ns.add_field(st, 0, partial, "unpackable_field").unwrap();

        let s = g.struct_value(st, vec![]).unwrap();
        assert!(matches!(g.pack(s), Err(Error::UnresolvedSize(_))));
    }

    #[test]
    fn empty_struct_has_no_size() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let st = ns.get_or_create_struct("empty");
        assert_eq!(ns.size_of(st), None);

        let s = g.struct_value(st, vec![]).unwrap();
        assert!(matches!(g.pack(s), Err(Error::UnresolvedSize(_))));
    }

    #[test]
    fn struct_fields() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let st = pair_struct(&ns);

        let s = g.struct_value(st, vec![("int_field", 7.into())]).unwrap();
        let int_field = g.field(s, "int_field").unwrap();
        assert_eq!(g.int_payload(int_field), Some(7));
        let self_ptr = g.field(s, "self_ptr").unwrap();
        assert_eq!(g.target_address(self_ptr), None);

        assert!(matches!(
            g.field(s, "not_a_real_field"),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            g.set_field(s, "not_a_real_field", 0.into()),
            Err(Error::UnknownField { .. })
        ));

        // Fields are anchored at their declared offsets.
        g.rebind(s, None, Some(0x100));
        assert_eq!(g.address(int_field), Some(0x100));
        let self_ptr = g.field(s, "self_ptr").unwrap();
        assert_eq!(g.address(self_ptr), Some(0x104));
    }

    #[test]
    fn struct_set_field_copies_same_type_values() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let st = pair_struct(&ns);

        let s = g.struct_value(st, vec![]).unwrap();
        let seven = g.int_value(ns.builtins().int, 7).unwrap();
        g.set_field(s, "int_field", Init::Value(seven)).unwrap();

        let field = g.field(s, "int_field").unwrap();
        assert_ne!(field, seven);
        assert_eq!(g.int_payload(field), Some(7));
        assert_eq!(g.address_base(field), Some(s));
        assert_eq!(g.offset(field), Some(0));

        // The source value is untouched by later edits to the field.
        g.set_field(s, "int_field", 9.into()).unwrap();
        assert_eq!(g.int_payload(seven), Some(7));
    }

    #[test]
    fn struct_cast() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let st = pair_struct(&ns);

        let s = g
            .struct_value(st, vec![("int_field", 1.into()), ("self_ptr", 2.into())])
            .unwrap();
        let same = g.cast(st, Init::Value(s)).unwrap();
        assert_eq!(same, s);

        assert!(matches!(
            g.cast(st, Init::from("")),
            Err(Error::TypeMismatch { .. })
        ));

        let other = ns.get_or_create_struct("other");
        ns.add_field(other, 0, ns.builtins().int, "x").unwrap();
        let o = g.struct_value(other, vec![]).unwrap();
        assert!(matches!(
            g.cast(st, Init::Value(o)),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn struct_unpack() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let st = pair_struct(&ns);

        let s = g
            .unpack(st, b"\x01\x00\x00\x00\x02\x00\x00\x00")
            .unwrap();
        let int_field = g.field(s, "int_field").unwrap();
        assert_eq!(g.int_payload(int_field), Some(1));
        let self_ptr = g.field(s, "self_ptr").unwrap();
        assert_eq!(g.target_address(self_ptr), Some(2));

        // unpack . pack is the identity on images.
        assert_eq!(g.pack(s).unwrap(), &b"\x01\x00\x00\x00\x02\x00\x00\x00"[..]);

        assert!(matches!(
            g.unpack(st, b"\x01\x00\x00"),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn struct_pack_pads_gaps() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let b = *ns.builtins();

        let st = ns.get_or_create_struct("gappy");
        ns.add_field(st, 0, b.char, "a").unwrap();
        ns.add_field(st, 8, b.int, "b").unwrap();
        assert_eq!(ns.size_of(st), Some(12));

        let s = g
            .struct_value(st, vec![("a", 1.into()), ("b", 2.into())])
            .unwrap();
        assert_eq!(
            g.pack(s).unwrap(),
            &b"\x01\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x00"[..]
        );
    }

    #[test]
    fn struct_pack_rejects_overlapping_fields() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let b = *ns.builtins();

        let st = ns.get_or_create_struct("overlapping");
        ns.add_field(st, 0, b.int, "a").unwrap();
        ns.add_field(st, 2, b.int, "b").unwrap();

        let s = g.struct_value(st, vec![]).unwrap();
        assert!(matches!(g.pack(s), Err(Error::SizeMismatch { .. })));
    }

    #[test]
    fn struct_referenced_values() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let st = pair_struct(&ns);

        let arr_ty = ns.array(st, 1);
        let arr = g.default_value(arr_ty).unwrap();
        let s = g.elements(arr)[0];

        let refs = g.referenced(s);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0], arr);
        assert_eq!(refs[1], g.field(s, "int_field").unwrap());
        assert_eq!(refs[2], g.field(s, "self_ptr").unwrap());
    }

    #[test]
    fn describe_values() {
        let ns = make_namespace(Endianness::Little, 4);
        let mut g = Graph::new(&ns);
        let b = *ns.builtins();

        let one = g.int_value(b.int, 1).unwrap();
        assert_eq!(g.describe(one), "<int 1>");
        let unset = g.default_value(b.int).unwrap();
        assert_eq!(g.describe(unset), "<int uninitialized>");

        let null = g.cast(b.void_pointer, Init::Int(0)).unwrap();
        assert_eq!(g.describe(null), "<void* NULL>");

        let char_arr = ns.array(b.char, 4);
        let text = g.cast(char_arr, Init::from("test")).unwrap();
        assert_eq!(g.describe(text), "<char[4] \"test\">");
    }
}

