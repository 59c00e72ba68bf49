// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The layout engine: reachability, anchor resolution, allocation, and
//! emission of the packed byte image.

use bit_vec::BitVec;
use bytes::{BufMut, Bytes, BytesMut};
use log::debug;

use crate::error::{Error, Result};
use crate::heap::HeapPacker;
use crate::value::{Graph, ValueId};

impl Graph<'_> {
    /// Serialize every value reachable from `roots` into one byte image
    /// within the window `[base_address, base_address + max_size)`.
    ///
    /// Values whose anchor already has an absolute offset are placed at that
    /// address; the remaining anchors get first-fit allocations and their
    /// offsets are written back, so a failed or repeated call sees partially
    /// updated bindings. The image starts at the lowest placed address and
    /// gaps between consecutive values are zero-filled.
    pub fn pack_values(
        &mut self,
        base_address: u64,
        max_size: u64,
        roots: &[ValueId],
    ) -> Result<Bytes> {
        // Reachability closure over anchors, children, and referents. Pointer
        // cycles are fine here; the visited set keeps the walk finite.
        let mut visited = BitVec::from_elem(self.len(), false);
        let mut reached: Vec<ValueId> = Vec::new();
        let mut to_traverse: Vec<ValueId> = roots.to_vec();
        while let Some(id) = to_traverse.pop() {
            if visited[id.index()] {
                continue;
            }
            visited.set(id.index(), true);
            if self.namespace().size_of(self.ty(id)).is_none() {
                return Err(Error::UnresolvedSize(self.namespace().type_name(self.ty(id))));
            }
            reached.push(id);
            for child in self.referenced(id) {
                if !visited[child.index()] {
                    to_traverse.push(child);
                }
            }
        }

        // Anchor resolution. The anchor chain must terminate; revisiting a
        // value on the way up is a hard error.
        let mut anchor_seen = BitVec::from_elem(self.len(), false);
        let mut fixed: Vec<ValueId> = Vec::new();
        let mut free: Vec<ValueId> = Vec::new();
        for &id in &reached {
            let mut path = vec![id];
            let mut anchor = id;
            while let Some(base) = self.address_base(anchor) {
                if path.contains(&base) {
                    path.push(base);
                    let rendered: Vec<_> =
                        path.iter().map(|&v| self.describe(v)).collect();
                    return Err(Error::CyclicAnchor(rendered.join(" -> ")));
                }
                path.push(base);
                anchor = base;
            }
            if anchor_seen[anchor.index()] {
                continue;
            }
            anchor_seen.set(anchor.index(), true);
            if self.offset(anchor).is_some() {
                fixed.push(anchor);
            } else {
                free.push(anchor);
            }
        }

        debug!(
            "packing {} reachable values: {} fixed, {} free anchors",
            reached.len(),
            fixed.len(),
            free.len()
        );

        // Fixed anchors reserve their spans first so free allocations cannot
        // collide with them.
        let mut packer = HeapPacker::new(base_address, max_size);
        for &anchor in &fixed {
            let size = self.anchor_size(anchor)?;
            let address = self
                .address(anchor)
                .ok_or_else(|| Error::CyclicAnchor(self.describe(anchor)))?;
            packer.alloc_at(size, address)?;
        }
        for &anchor in &free {
            let size = self.anchor_size(anchor)?;
            let address = packer.alloc(size)?;
            self.set_offset(anchor, address as i64);
        }

        // Emit anchors in address order with zero padding between them.
        let mut placed: Vec<ValueId> = free.into_iter().chain(fixed).collect();
        placed.sort_by_key(|&v| self.address(v).unwrap_or(0));

        let mut image = BytesMut::new();
        for (i, &id) in placed.iter().enumerate() {
            let part = self.pack(id)?;
            image.extend_from_slice(&part);
            if i + 1 < placed.len() {
                let end = self.address(id).unwrap_or(0) + self.anchor_size(id)?;
                let next = self.address(placed[i + 1]).unwrap_or(0);
                image.put_bytes(0, (next - end) as usize);
            }
        }
        Ok(image.freeze())
    }

    fn anchor_size(&self, id: ValueId) -> Result<u64> {
        self.namespace()
            .size_of(self.ty(id))
            .ok_or_else(|| Error::UnresolvedSize(self.namespace().type_name(self.ty(id))))
    }
}
