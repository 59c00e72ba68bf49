// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hex-dump rendering for packed images.

use std::fmt::Write;

const CHUNK_SIZE: usize = 16;
const GROUP_SIZE: usize = 8;

/// Render bytes as a classic hex dump: 16 bytes per line in two 8-byte
/// groups, with an ASCII gutter, addressed from `start_address`.
pub fn hexdump(data: &[u8], start_address: u64) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
        let address = start_address + (i * CHUNK_SIZE) as u64;

        let groups: Vec<String> = chunk
            .chunks(GROUP_SIZE)
            .map(|group| {
                group
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        let hex = groups.join("  ");

        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if (0x20..=0x7e).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();

        let _ = writeln!(out, "{address:016x}  {hex:<48}  |{ascii}|");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_and_gutter() {
        let data: Vec<u8> = (0u8..0x14).collect();
        let dump = hexdump(&data, 0x1000);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "0000000000001000  00 01 02 03 04 05 06 07  08 09 0a 0b 0c 0d 0e 0f  |................|"
        );
        assert_eq!(
            lines[1],
            format!("{:016x}  {:<48}  |....|", 0x1010, "10 11 12 13")
        );
    }

    #[test]
    fn printable_ascii() {
        let dump = hexdump(b"hi", 0);
        assert!(dump.contains("|hi|"));
    }
}
