// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The type catalogue.
//!
//! A [Namespace] owns one target [Arch] and every type known for it. Types
//! are interned: asking twice for `int *` or `char[4]` yields the same
//! [TypeId], and struct types are shared by name so a field can reference a
//! struct that is still being populated.
//!
//! A catalogue source (typically the DWARF reader) registers structs with
//! [Namespace::get_or_create_struct] and [Namespace::add_field], then calls
//! [Namespace::finalize] to validate names and freeze the name → struct map
//! used by [Namespace::struct_type].

use std::cell::RefCell;
use std::collections::HashMap;

use crate::arch::Arch;
use crate::error::{Error, Result};
use crate::types::{ArrayType, IntType, PointerType, StructField, StructType, Type, TypeId};

/// Handles to the pre-interned built-in types.
///
/// The C-named integers derive their sizes from the architecture; the
/// fixed-width ones are what `<stdint.h>` would declare. `void` is the
/// distinguished unknown-size unsigned integer used to form `void *`.
#[derive(Clone, Copy, Debug)]
pub struct BuiltinTypes {
    pub char: TypeId,
    pub unsigned_char: TypeId,
    pub short: TypeId,
    pub unsigned_short: TypeId,
    pub int: TypeId,
    pub unsigned_int: TypeId,
    pub long: TypeId,
    pub unsigned_long: TypeId,
    pub long_long: TypeId,
    pub unsigned_long_long: TypeId,
    pub int8: TypeId,
    pub uint8: TypeId,
    pub int16: TypeId,
    pub uint16: TypeId,
    pub int32: TypeId,
    pub uint32: TypeId,
    pub int64: TypeId,
    pub uint64: TypeId,
    pub void: TypeId,
    pub void_pointer: TypeId,
}

#[derive(Hash, PartialEq, Eq)]
enum TypeKey {
    Int {
        name: String,
        size: Option<u64>,
        signed: bool,
    },
    Pointer(TypeId),
    Array { member: TypeId, count: u64 },
}

#[derive(Default)]
struct Interner {
    types: Vec<Type>,
    keys: HashMap<TypeKey, TypeId>,
    /// Struct registration, in insertion order.
    struct_order: Vec<TypeId>,
    structs: HashMap<String, TypeId>,
    /// Built-in names plus, after finalize, every struct name.
    by_name: HashMap<String, TypeId>,
    finalized: bool,
}

impl Interner {
    fn push(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }
}

/// The registry of types and value constructors for one target architecture.
pub struct Namespace {
    arch: Arch,
    builtins: BuiltinTypes,
    // Interior mutability: array and pointer types are interned on demand
    // while the namespace is shared immutably. Not Sync, matching the
    // single-threaded design.
    inner: RefCell<Interner>,
}

impl Namespace {
    pub fn new(arch: Arch) -> Self {
        let mut inner = Interner::default();

        let mut int = |name: &str, size: Option<u64>, signed: bool| -> TypeId {
            let id = inner.push(Type::Int(IntType {
                name: name.to_string(),
                size,
                signed,
            }));
            inner.keys.insert(
                TypeKey::Int {
                    name: name.to_string(),
                    size,
                    signed,
                },
                id,
            );
            inner.by_name.insert(name.to_string(), id);
            id
        };

        let builtins = BuiltinTypes {
            char: int("char", Some(arch.char_size), true),
            unsigned_char: int("unsigned char", Some(arch.char_size), false),
            short: int("short", Some(arch.short_size), true),
            unsigned_short: int("unsigned short", Some(arch.short_size), false),
            int: int("int", Some(arch.int_size), true),
            unsigned_int: int("unsigned int", Some(arch.int_size), false),
            long: int("long", Some(arch.long_size), true),
            unsigned_long: int("unsigned long", Some(arch.long_size), false),
            long_long: int("long long", Some(arch.long_long_size), true),
            unsigned_long_long: int("unsigned long long", Some(arch.long_long_size), false),
            int8: int("int8_t", Some(1), true),
            uint8: int("uint8_t", Some(1), false),
            int16: int("int16_t", Some(2), true),
            uint16: int("uint16_t", Some(2), false),
            int32: int("int32_t", Some(4), true),
            uint32: int("uint32_t", Some(4), false),
            int64: int("int64_t", Some(8), true),
            uint64: int("uint64_t", Some(8), false),
            void: int("void", None, false),
            // Filled in below; pointer interning needs the void id first.
            void_pointer: TypeId(0),
        };

        let void_pointer = inner.push(Type::Pointer(PointerType {
            referenced: builtins.void,
        }));
        inner
            .keys
            .insert(TypeKey::Pointer(builtins.void), void_pointer);

        let builtins = BuiltinTypes {
            void_pointer,
            ..builtins
        };

        Self {
            arch,
            builtins,
            inner: RefCell::new(inner),
        }
    }

    pub fn arch(&self) -> &Arch {
        &self.arch
    }

    /// Handles to the built-in types.
    pub fn builtins(&self) -> &BuiltinTypes {
        &self.builtins
    }

    /// Intern an integer type.
    pub fn int_type(&self, name: &str, size: Option<u64>, signed: bool) -> TypeId {
        let mut inner = self.inner.borrow_mut();
        let key = TypeKey::Int {
            name: name.to_string(),
            size,
            signed,
        };
        if let Some(&id) = inner.keys.get(&key) {
            return id;
        }
        let id = inner.push(Type::Int(IntType {
            name: name.to_string(),
            size,
            signed,
        }));
        inner.keys.insert(key, id);
        id
    }

    /// Intern the pointer type targeting `ty`.
    pub fn pointer_to(&self, ty: TypeId) -> TypeId {
        let mut inner = self.inner.borrow_mut();
        if let Some(&id) = inner.keys.get(&TypeKey::Pointer(ty)) {
            return id;
        }
        let id = inner.push(Type::Pointer(PointerType { referenced: ty }));
        inner.keys.insert(TypeKey::Pointer(ty), id);
        id
    }

    /// Intern the array type of `count` members of `member`.
    pub fn array(&self, member: TypeId, count: u64) -> TypeId {
        let mut inner = self.inner.borrow_mut();
        let key = TypeKey::Array { member, count };
        if let Some(&id) = inner.keys.get(&key) {
            return id;
        }
        let id = inner.push(Type::Array(ArrayType { member, count }));
        inner.keys.insert(key, id);
        id
    }

    /// Return the struct type registered under `name`, creating an empty one
    /// if this is the first mention. Forward references resolve to the same
    /// instance the definition later fills in.
    pub fn get_or_create_struct(&self, name: &str) -> TypeId {
        let mut inner = self.inner.borrow_mut();
        if let Some(&id) = inner.structs.get(name) {
            return id;
        }
        let id = inner.push(Type::Struct(StructType::new(name.to_string())));
        inner.structs.insert(name.to_string(), id);
        inner.struct_order.push(id);
        id
    }

    /// Add a field to a registered struct, keeping fields ordered by offset.
    pub fn add_field(&self, struct_ty: TypeId, offset: u64, ty: TypeId, name: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let idx = struct_ty.index();
        if !matches!(inner.types[idx], Type::Struct(_)) {
            return Err(Error::TypeMismatch {
                type_name: type_name_of(&inner.types, &inner.types[idx]),
                input: "struct field",
            });
        }
        if let Type::Struct(st) = &mut inner.types[idx] {
            st.insert_field(StructField {
                offset,
                ty,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Validate every registered struct name and freeze the name → struct
    /// map. Names must be C identifiers and must not shadow a built-in type
    /// name or another catalogue entry.
    pub fn finalize(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        for i in 0..inner.struct_order.len() {
            let id = inner.struct_order[i];
            let name = match &inner.types[id.index()] {
                Type::Struct(st) => st.name.clone(),
                _ => continue,
            };
            if !is_identifier(&name) {
                return Err(Error::InvalidName(name));
            }
            if inner.by_name.contains_key(&name) {
                return Err(Error::NameConflict(name));
            }
            inner.by_name.insert(name, id);
        }
        inner.finalized = true;
        Ok(())
    }

    /// Look up a struct constructor by name. Only available after
    /// [Namespace::finalize].
    pub fn struct_type(&self, name: &str) -> Option<TypeId> {
        let inner = self.inner.borrow();
        if !inner.finalized {
            return None;
        }
        match inner.by_name.get(name) {
            Some(&id) if matches!(inner.types[id.index()], Type::Struct(_)) => Some(id),
            _ => None,
        }
    }

    /// Every registered struct, in registration order.
    pub fn struct_types(&self) -> Vec<TypeId> {
        self.inner.borrow().struct_order.clone()
    }

    /// Clone out a type definition.
    pub fn get(&self, ty: TypeId) -> Type {
        self.inner.borrow().types[ty.index()].clone()
    }

    /// The display name of a type: `int`, `char *`-style names are spelled
    /// `char*`, arrays are `int[4]`.
    pub fn type_name(&self, ty: TypeId) -> String {
        let inner = self.inner.borrow();
        type_name_of(&inner.types, &inner.types[ty.index()])
    }

    /// The byte size of a type, or `None` when unknown.
    pub fn size_of(&self, ty: TypeId) -> Option<u64> {
        let inner = self.inner.borrow();
        size_of_type(&self.arch, &inner.types, ty)
    }

    /// Type equality per the catalogue rules: same shape and same defining
    /// attributes. Integer names are ignored; struct identity is the name.
    pub fn type_eq(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let inner = self.inner.borrow();
        types_eq(&inner.types, a, b)
    }

    /// Render a struct as a C-like declaration. Nested struct fields are
    /// expanded inline with two spaces of indentation per level.
    pub fn pretty_struct(&self, ty: TypeId) -> String {
        let inner = self.inner.borrow();
        pretty_lines(&inner.types, ty, 0).join("\n")
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn type_name_of(types: &[Type], ty: &Type) -> String {
    match ty {
        Type::Int(t) => t.name.clone(),
        Type::Pointer(t) => format!("{}*", type_name_of(types, &types[t.referenced.index()])),
        Type::Array(t) => {
            let count = if t.count > 0 {
                t.count.to_string()
            } else {
                String::new()
            };
            format!(
                "{}[{}]",
                type_name_of(types, &types[t.member.index()]),
                count
            )
        }
        Type::Struct(t) => t.name.clone(),
    }
}

fn size_of_type(arch: &Arch, types: &[Type], ty: TypeId) -> Option<u64> {
    match &types[ty.index()] {
        Type::Int(t) => t.size,
        Type::Pointer(_) => Some(arch.pointer_size),
        Type::Array(t) => size_of_type(arch, types, t.member).map(|s| s * t.count),
        Type::Struct(t) => {
            let last = t.fields.last()?;
            let size = size_of_type(arch, types, last.ty)?;
            Some(last.offset + size)
        }
    }
}

fn types_eq(types: &[Type], a: TypeId, b: TypeId) -> bool {
    if a == b {
        return true;
    }
    match (&types[a.index()], &types[b.index()]) {
        (Type::Int(x), Type::Int(y)) => x.size == y.size && x.signed == y.signed,
        (Type::Pointer(x), Type::Pointer(y)) => types_eq(types, x.referenced, y.referenced),
        (Type::Array(x), Type::Array(y)) => {
            x.count == y.count && types_eq(types, x.member, y.member)
        }
        (Type::Struct(x), Type::Struct(y)) => x.name == y.name,
        _ => false,
    }
}

fn pretty_lines(types: &[Type], ty: TypeId, indent: usize) -> Vec<String> {
    let st = match &types[ty.index()] {
        Type::Struct(st) => st,
        other => return vec![format!("{};", type_name_of(types, other))],
    };

    let mut lines = vec![format!("struct {} {{", st.name)];
    for field in &st.fields {
        if matches!(types[field.ty.index()], Type::Struct(_)) {
            lines.extend(pretty_lines(types, field.ty, 2));
        } else {
            lines.push(format!(
                "  {} {};",
                type_name_of(types, &types[field.ty.index()]),
                field.name
            ));
        }
    }
    lines.push("};".to_string());

    lines
        .into_iter()
        .map(|line| format!("{}{}", " ".repeat(indent), line))
        .collect()
}
