// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Target machine description.

use crate::error::{Error, Result};

/// Byte order of the target machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Byte sizes of the C integral types and of pointers on the target machine.
///
/// Everything derives from the word size: `char` is 1 byte, `short` is 2,
/// `long long` is 8, `int` is 4, and `long` tracks the pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arch {
    pub endianness: Endianness,
    pub char_size: u64,
    pub short_size: u64,
    pub int_size: u64,
    pub long_size: u64,
    pub long_long_size: u64,
    pub pointer_size: u64,
}

impl Arch {
    /// Describe a machine from its endianness and word size.
    ///
    /// Only 4- and 8-byte words are supported; anything else fails with
    /// [Error::UnsupportedClass].
    pub fn new(endianness: Endianness, word_size: u64) -> Result<Self> {
        if word_size != 4 && word_size != 8 {
            return Err(Error::UnsupportedClass { word_size });
        }

        Ok(Self {
            endianness,
            char_size: 1,
            short_size: 2,
            int_size: 4,
            long_size: word_size,
            long_long_size: 8,
            pointer_size: word_size,
        })
    }
}
