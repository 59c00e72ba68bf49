// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end exercise: a circular doubly-linked list of struct values is
//! packed into one image and read back out of it.

use structpack_core::{Arch, Endianness, Graph, Init, Namespace};

/// struct user { long id; char name[8]; user *prev; user *next; }
fn user_catalogue() -> Namespace {
    let ns = Namespace::new(Arch::new(Endianness::Little, 8).unwrap());
    let b = *ns.builtins();

    let user = ns.get_or_create_struct("user");
    ns.add_field(user, 0, b.long, "id").unwrap();
    ns.add_field(user, 8, ns.array(b.char, 8), "name").unwrap();
    ns.add_field(user, 16, ns.pointer_to(user), "prev").unwrap();
    ns.add_field(user, 24, ns.pointer_to(user), "next").unwrap();
    ns.finalize().unwrap();

    ns
}

#[test]
fn pack_and_unpack_circular_list() {
    let ns = user_catalogue();
    let user = ns.struct_type("user").unwrap();
    assert_eq!(ns.size_of(user), Some(32));

    let mut g = Graph::new(&ns);
    let names = ["alice", "bob", "charlie"];
    let users: Vec<_> = names
        .iter()
        .map(|name| {
            g.struct_value(user, vec![("name", Init::from(*name))])
                .unwrap()
        })
        .collect();

    for (i, &u) in users.iter().enumerate() {
        let prev = users[(i + users.len() - 1) % users.len()];
        let next = users[(i + 1) % users.len()];
        g.set_field(u, "id", Init::Int(i as i128 + 1)).unwrap();
        let prev_ptr = g.reference(prev);
        g.set_field(u, "prev", Init::Value(prev_ptr)).unwrap();
        let next_ptr = g.reference(next);
        g.set_field(u, "next", Init::Value(next_ptr)).unwrap();
    }

    let start_address = 0x5600_0000_0000u64;
    let image = g.pack_values(start_address, 0x1000, &users).unwrap();
    assert_eq!(image.len(), 3 * 32);

    // Every user landed inside the window, aligned to its own struct size.
    let addresses: Vec<u64> = users.iter().map(|&u| g.address(u).unwrap()).collect();
    for &addr in &addresses {
        assert!(addr >= start_address);
        assert!(addr + 32 <= start_address + 0x1000);
    }

    // Read the image back as an array of three users placed at the start
    // address and check the links are circular.
    let arr_ty = ns.array(user, 3);
    let unpacked = g.unpack_at(arr_ty, &image, start_address).unwrap();
    let members = g.elements(unpacked);
    assert_eq!(members.len(), 3);

    let mut by_address = std::collections::HashMap::new();
    let mut ids = Vec::new();
    for &member in &members {
        let id_field = g.field(member, "id").unwrap();
        let id = g.int_payload(id_field).unwrap();
        ids.push(id);
        by_address.insert(g.address(member).unwrap(), id);
    }
    ids.sort_unstable();
    assert_eq!(ids, [1, 2, 3]);

    for &member in &members {
        let id_field = g.field(member, "id").unwrap();
        let id = g.int_payload(id_field).unwrap();
        let next = g.field(member, "next").unwrap();
        let next_id = by_address[&g.target_address(next).unwrap()];
        assert_eq!(next_id, id % 3 + 1);
        let prev = g.field(member, "prev").unwrap();
        let prev_id = by_address[&g.target_address(prev).unwrap()];
        assert_eq!(prev_id, (id + 1) % 3 + 1);
    }

    // Names survive the round trip, truncated at the terminator.
    for &member in &members {
        let id_field = g.field(member, "id").unwrap();
        let id = g.int_payload(id_field).unwrap() as usize;
        let name = g.field(member, "name").unwrap();
        assert_eq!(g.char_array_bytes(name).unwrap(), names[id - 1].as_bytes());
    }
}

#[test]
fn packed_values_do_not_overlap() {
    let ns = user_catalogue();
    let user = ns.struct_type("user").unwrap();
    let mut g = Graph::new(&ns);

    let a = g.struct_value(user, vec![("id", 1.into())]).unwrap();
    let b = g.struct_value(user, vec![("id", 2.into())]).unwrap();
    g.pack_values(0, 0x100, &[a, b]).unwrap();

    let (addr_a, addr_b) = (g.address(a).unwrap(), g.address(b).unwrap());
    assert!(addr_a + 32 <= addr_b || addr_b + 32 <= addr_a);
}
