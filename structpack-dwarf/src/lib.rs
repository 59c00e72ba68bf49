// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DWARF debug-info reader.
//!
//! [load_namespace] parses an ELF binary with the `object` crate, walks its
//! DWARF type tree with `gimli`, and delivers a finalized
//! [structpack_core::Namespace]: every named struct in the debug info with
//! its fields at their declared byte offsets, pointer and array types
//! resolved recursively, and base types mapped onto catalogue integers.
//!
//! The mapping is deliberately lossy in one place: floating point base types
//! become opaque unsigned integers of the stated size. Signed and
//! signed-char encodings become signed integers; unsigned, unsigned-char,
//! boolean, and address encodings become unsigned integers. Anything else is
//! rejected. Typedefs are followed transparently; a typedef with no target
//! becomes an unsigned integer of the declared (possibly unknown) size, and
//! a pointer with no target type becomes `void *`.

use std::borrow::Cow;

use gimli::{AttributeValue, DebuggingInformationEntry, Dwarf, EntriesTreeNode, Unit, UnitOffset};
use log::{debug, trace};
use object::{Object, ObjectSection};
use thiserror::Error;

use structpack_core::types::Type;
use structpack_core::{Arch, Endianness, Namespace, TypeId};

type Slice<'a> = gimli::EndianSlice<'a, gimli::RunTimeEndian>;
type Die<'a> = DebuggingInformationEntry<Slice<'a>>;

/// An error reading debug info into a catalogue.
#[derive(Debug, Error)]
pub enum DwarfError {
    #[error("failed to parse object file: {0}")]
    Object(#[from] object::read::Error),

    #[error("failed to read debug info: {0}")]
    Gimli(#[from] gimli::Error),

    #[error("object file does not declare an address size")]
    UnsupportedClass,

    #[error("unsupported base type encoding: {0}")]
    UnsupportedEncoding(gimli::DwAte),

    #[error("unsupported debug info tag: {0}")]
    UnsupportedTag(String),

    #[error("debug info entry is missing {0}")]
    MissingAttribute(&'static str),

    #[error(transparent)]
    Catalogue(#[from] structpack_core::Error),
}

/// Result alias for reader operations.
pub type Result<T, E = DwarfError> = std::result::Result<T, E>;

/// Build a finalized type catalogue from the bytes of an ELF binary with
/// DWARF debug info.
pub fn load_namespace(data: &[u8]) -> Result<Namespace> {
    let object = object::File::parse(data)?;

    let endianness = if object.is_little_endian() {
        Endianness::Little
    } else {
        Endianness::Big
    };
    let word_size = object
        .architecture()
        .address_size()
        .ok_or(DwarfError::UnsupportedClass)?
        .bytes() as u64;
    let arch = Arch::new(endianness, word_size)?;
    let ns = Namespace::new(arch);

    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };
    let load_section = |id: gimli::SectionId| -> std::result::Result<Cow<[u8]>, gimli::Error> {
        Ok(match object.section_by_name(id.name()) {
            Some(section) => section
                .uncompressed_data()
                .unwrap_or(Cow::Borrowed(&[][..])),
            None => Cow::Borrowed(&[][..]),
        })
    };
    let sections = gimli::DwarfSections::load(load_section)?;
    let dwarf = sections.borrow(|section| gimli::EndianSlice::new(section, endian));

    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let mut tree = unit.entries_tree(None)?;
        walk(&ns, &dwarf, &unit, tree.root()?)?;
    }

    ns.finalize()?;
    Ok(ns)
}

/// Recurse over the entry tree, collecting every named struct definition.
fn walk(
    ns: &Namespace,
    dwarf: &Dwarf<Slice>,
    unit: &Unit<Slice>,
    node: EntriesTreeNode<Slice>,
) -> Result<()> {
    if node.entry().tag() == gimli::DW_TAG_structure_type {
        return process_struct(ns, dwarf, unit, node);
    }
    let mut children = node.children();
    while let Some(child) = children.next()? {
        walk(ns, dwarf, unit, child)?;
    }
    Ok(())
}

fn process_struct(
    ns: &Namespace,
    dwarf: &Dwarf<Slice>,
    unit: &Unit<Slice>,
    node: EntriesTreeNode<Slice>,
) -> Result<()> {
    let entry = node.entry().clone();
    let name = match entry_name(dwarf, unit, &entry)? {
        Some(name) => name,
        None => {
            // Anonymous structs have no catalogue identity. Named structs
            // nested inside them are still worth collecting.
            debug!("skipping anonymous struct at {:?}", entry.offset());
            let mut children = node.children();
            while let Some(child) = children.next()? {
                walk(ns, dwarf, unit, child)?;
            }
            return Ok(());
        }
    };

    let struct_ty = ns.get_or_create_struct(&name);
    // The same definition commonly appears in several compilation units.
    let populated = matches!(ns.get(struct_ty), Type::Struct(st) if !st.fields.is_empty());

    let mut children = node.children();
    while let Some(child) = children.next()? {
        match child.entry().tag() {
            gimli::DW_TAG_member if !populated => {
                let member_name = match entry_name(dwarf, unit, child.entry())? {
                    Some(member_name) => member_name,
                    None => {
                        debug!("skipping unnamed member of struct {name}");
                        continue;
                    }
                };
                let offset = attr_udata(child.entry(), gimli::DW_AT_data_member_location)?
                    .ok_or(DwarfError::MissingAttribute("DW_AT_data_member_location"))?;
                let member_ty = resolve_type(ns, dwarf, unit, child.entry())?;
                ns.add_field(struct_ty, offset, member_ty, &member_name)?;
            }
            gimli::DW_TAG_member => {}
            gimli::DW_TAG_structure_type => process_struct(ns, dwarf, unit, child)?,
            tag => trace!("skipping {tag} child of struct {name}"),
        }
    }
    Ok(())
}

/// Resolve the type referenced by an entry's `DW_AT_type` attribute.
fn resolve_type(
    ns: &Namespace,
    dwarf: &Dwarf<Slice>,
    unit: &Unit<Slice>,
    entry: &Die,
) -> Result<TypeId> {
    let target = match entry.attr_value(gimli::DW_AT_type) {
        Some(AttributeValue::UnitRef(offset)) => offset,
        Some(_) => {
            return Err(DwarfError::UnsupportedTag(
                "non-local type reference".to_string(),
            ))
        }
        None if entry.tag() == gimli::DW_TAG_pointer_type => {
            // A pointer with no target type is a void pointer.
            return Ok(ns.builtins().void);
        }
        None => return Err(DwarfError::MissingAttribute("DW_AT_type")),
    };

    let die = unit.entry(target)?;
    match die.tag() {
        gimli::DW_TAG_pointer_type => {
            let referenced = resolve_type(ns, dwarf, unit, &die)?;
            Ok(ns.pointer_to(referenced))
        }
        gimli::DW_TAG_array_type => {
            let counts = array_counts(unit, die.offset())?;
            let mut ty = resolve_type(ns, dwarf, unit, &die)?;
            for count in counts {
                ty = ns.array(ty, count);
            }
            Ok(ty)
        }
        gimli::DW_TAG_structure_type => {
            let name = entry_name(dwarf, unit, &die)?
                .ok_or(DwarfError::MissingAttribute("DW_AT_name"))?;
            Ok(ns.get_or_create_struct(&name))
        }
        gimli::DW_TAG_base_type => {
            let name = entry_name(dwarf, unit, &die)?
                .ok_or(DwarfError::MissingAttribute("DW_AT_name"))?;
            let size = attr_udata(&die, gimli::DW_AT_byte_size)?
                .ok_or(DwarfError::MissingAttribute("DW_AT_byte_size"))?;
            let encoding = match die.attr_value(gimli::DW_AT_encoding) {
                Some(AttributeValue::Encoding(ate)) => ate,
                _ => return Err(DwarfError::MissingAttribute("DW_AT_encoding")),
            };
            int_type_for_encoding(ns, &name, size, encoding)
        }
        gimli::DW_TAG_typedef => {
            if die.attr_value(gimli::DW_AT_type).is_some() {
                // Typedefs are transparent.
                return resolve_type(ns, dwarf, unit, &die);
            }
            let name = entry_name(dwarf, unit, &die)?
                .ok_or(DwarfError::MissingAttribute("DW_AT_name"))?;
            let size = attr_udata(&die, gimli::DW_AT_byte_size)?;
            Ok(ns.int_type(&name, size, false))
        }
        tag => Err(DwarfError::UnsupportedTag(tag.to_string())),
    }
}

/// Map a base type encoding onto a catalogue integer type. Floats become
/// opaque unsigned integers of the stated size.
fn int_type_for_encoding(
    ns: &Namespace,
    name: &str,
    size: u64,
    encoding: gimli::DwAte,
) -> Result<TypeId> {
    match encoding {
        gimli::DW_ATE_signed | gimli::DW_ATE_signed_char => {
            Ok(ns.int_type(name, Some(size), true))
        }
        gimli::DW_ATE_boolean
        | gimli::DW_ATE_address
        | gimli::DW_ATE_unsigned
        | gimli::DW_ATE_unsigned_char
        | gimli::DW_ATE_float => Ok(ns.int_type(name, Some(size), false)),
        other => Err(DwarfError::UnsupportedEncoding(other)),
    }
}

/// One count per `DW_TAG_subrange_type` child, outermost first. A subrange
/// with no upper bound (a flexible array member) contributes a zero count.
fn array_counts(unit: &Unit<Slice>, offset: UnitOffset<usize>) -> Result<Vec<u64>> {
    let mut counts = Vec::new();
    let mut tree = unit.entries_tree(Some(offset))?;
    let root = tree.root()?;
    let mut children = root.children();
    while let Some(child) = children.next()? {
        if child.entry().tag() == gimli::DW_TAG_subrange_type {
            let upper = attr_udata(child.entry(), gimli::DW_AT_upper_bound)?;
            counts.push(upper.map_or(0, |u| u + 1));
        }
    }
    Ok(counts)
}

fn attr_udata(entry: &Die, name: gimli::DwAt) -> Result<Option<u64>> {
    Ok(entry.attr(name).and_then(|attr| attr.udata_value()))
}

fn entry_name(dwarf: &Dwarf<Slice>, unit: &Unit<Slice>, entry: &Die) -> Result<Option<String>> {
    match entry.attr_value(gimli::DW_AT_name) {
        Some(value) => {
            let s = dwarf.attr_string(unit, value)?;
            Ok(Some(s.to_string_lossy().into_owned()))
        }
        None => Ok(None),
    }
}
