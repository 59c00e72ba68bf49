// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C type catalogue and typed value graph serialization.
//!
//! This crate models C data as it sits in a target process's memory. A
//! [Namespace](namespace::Namespace) holds the type catalogue for one target
//! machine: integer types, pointer types, fixed arrays, and named structs
//! whose fields carry explicit byte offsets. A [Graph](value::Graph) holds
//! typed values built against that catalogue: integers, arrays, pointers
//! (including pointers at other values in the graph), and structs whose
//! fields may themselves be pointers or nested structs.
//!
//! The payoff is [Graph::pack_values](value::Graph::pack_values): walk every
//! value reachable from a root set, assign an absolute address to each value
//! that does not already have one, and emit one contiguous byte image in
//! which every pointer holds the absolute address of its target.
//!
//! # Positional bindings
//!
//! Every value carries an optional *positional binding*: an anchor value plus
//! a byte offset. A struct's fields are bound to the struct at their declared
//! offsets; an array's elements are bound to the array at `i * member_size`.
//! A value with no anchor uses its offset as an absolute address, and a value
//! with neither has no address until the layout engine assigns one.
//!
//! Pointers are deliberately different: a pointer *references* its target but
//! does not own it or pin its position. Reference cycles between pointers are
//! fine; cycles in the anchor chain are an error.
//!
//! # Note on endianness and integer encoding
//!
//! All serialization honors the namespace architecture's byte order. Signed
//! integers are two's-complement; pointers are unsigned and pointer-sized
//! regardless of target type. Floating point types delivered by a debug-info
//! reader are treated as opaque unsigned integers of the stated size; there
//! is no float encoding in this crate.
//!
//! # Single-threaded by design
//!
//! The catalogue interns types on demand (creating an array type is a
//! catalogue operation), so a `Namespace` uses interior mutability and is not
//! `Sync`. Everything here is synchronous; nothing blocks or spawns.

pub mod arch;
pub mod error;
pub mod heap;
pub mod hexdump;
mod layout;
pub mod namespace;
pub mod types;
pub mod value;

pub use arch::{Arch, Endianness};
pub use error::{Error, Result};
pub use namespace::Namespace;
pub use types::TypeId;
pub use value::{Graph, Init, ValueId};
