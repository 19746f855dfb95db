//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::hash_map;

use bifrost_utils::bfd::HopType;
use bifrost_utils::southbound::{AddressMsg, InterfaceUpdateMsg};
use itertools::Itertools;

use crate::debug::Debug;
use crate::master::{Interface, Master};

// ===== global functions =====

pub fn process_iface_update(master: &mut Master, msg: InterfaceUpdateMsg) {
    Debug::InterfaceUpdate(&msg.ifname, msg.sw_if_index).log();

    match master.interfaces.entry(msg.sw_if_index) {
        hash_map::Entry::Occupied(mut o) => {
            let iface = o.get_mut();
            iface.ifname = msg.ifname;
            iface.flags = msg.flags;
        }
        hash_map::Entry::Vacant(v) => {
            let iface =
                Interface::new(msg.sw_if_index, msg.ifname, msg.flags);
            v.insert(iface);
        }
    }
}

// Interface removal forces the teardown of every single-hop session bound
// to the interface. Multihop sessions are untouched. Teardown is
// best-effort and never fails the removal.
pub fn process_iface_delete(master: &mut Master, sw_if_index: u32) {
    Debug::InterfaceDelete(sw_if_index).log();
    master.interfaces.remove(&sw_if_index);

    let to_be_freed = master
        .sessions
        .iter()
        .filter(|sess| sess.hop_type == HopType::Single)
        .filter(|sess| sess.key.sw_if_index == sw_if_index as u16)
        .map(|sess| sess.bs_idx)
        .collect_vec();
    for bs_idx in to_be_freed {
        Debug::SessionForcedDelete(sw_if_index, bs_idx).log();
        master.machine.set_flags(bs_idx, false);
        master.del_session_internal(bs_idx);
    }
}

pub fn process_addr_add(master: &mut Master, msg: AddressMsg) {
    if let Some(iface) = master.interfaces.get_mut(&msg.sw_if_index) {
        iface.addresses.insert(msg.addr);
    }
}

pub fn process_addr_del(master: &mut Master, msg: AddressMsg) {
    if let Some(iface) = master.interfaces.get_mut(&msg.sw_if_index) {
        iface.addresses.remove(&msg.addr);
    }
}
