// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any error raised by the type catalogue, the value graph, or the packer.
#[derive(Debug, Error)]
pub enum Error {
    /// A struct name is not a valid C identifier.
    #[error("invalid struct name {0:?}")]
    InvalidName(String),

    /// A struct name shadows a built-in type or an existing catalogue entry.
    #[error("struct name {0:?} conflicts with an existing catalogue name")]
    NameConflict(String),

    /// The target word size is not 4 or 8 bytes.
    #[error("unsupported word size: {word_size} bytes")]
    UnsupportedClass { word_size: u64 },

    /// An operation needed a concrete size but the type does not have one.
    #[error("type {0} has no resolved size")]
    UnresolvedSize(String),

    /// An integer payload exceeds the representable range of its type.
    #[error("integer {value} cannot be represented by {type_name}")]
    OutOfRange { value: i128, type_name: String },

    /// A coercion input cannot be interpreted as the target type.
    #[error("type {type_name} cannot be assigned from {input}")]
    TypeMismatch {
        type_name: String,
        input: &'static str,
    },

    /// An array was constructed with the wrong element count.
    #[error("wrong number of values to initialize array: expected {expected} items, got {got}")]
    ShapeMismatch { expected: u64, got: u64 },

    /// A pointer was given both a referent and a raw address.
    #[error("pointer cannot have both a referent and a raw address")]
    ConflictingInit,

    /// A struct was asked for a field name it does not declare.
    #[error("struct {type_name} has no field {field:?}")]
    UnknownField { type_name: String, field: String },

    /// The positional anchor chain of a value revisits itself.
    #[error("cyclic address dependency: {0}")]
    CyclicAnchor(String),

    /// The heap packer cannot satisfy an allocation.
    #[error("unable to allocate {size:#x} bytes")]
    OutOfSpace { size: u64 },

    /// A free-chunk split was requested outside the chunk.
    #[error("cannot split chunk at {chunk:#x} by allocating {address:#x}+{size:#x}")]
    InvalidSplit { chunk: u64, address: u64, size: u64 },

    /// A serialized length disagrees with the declared size.
    #[error("size mismatch for {what}: got {got} bytes, expected {expected}")]
    SizeMismatch {
        what: String,
        expected: u64,
        got: u64,
    },

    /// A struct field failed to pack or unpack.
    #[error("unable to pack field {field}")]
    Field { field: String, source: Box<Error> },

    /// An array element failed to pack or unpack.
    #[error("unable to pack element {index}")]
    Element { index: usize, source: Box<Error> },
}
