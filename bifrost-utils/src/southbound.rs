//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct InterfaceFlags: u8 {
        const LOOPBACK = 0x01;
        const UP = 0x02;
        const BROADCAST = 0x04;
        const POINT_TO_POINT = 0x08;
    }
}

// ===== Southbound messages =====

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceUpdateMsg {
    pub sw_if_index: u32,
    pub ifname: String,
    pub mtu: u32,
    pub flags: InterfaceFlags,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct AddressMsg {
    pub sw_if_index: u32,
    pub addr: IpNetwork,
}
