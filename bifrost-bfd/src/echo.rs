//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use bifrost_utils::ip::AddressFamily;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::error::Error;
use crate::master::{Interface, Master};

// Process-wide echo-source state: the interface whose subnet is used to
// synthesize source addresses for echo probes.
#[derive(Debug, Default)]
pub struct EchoSource {
    pub(crate) sw_if_index: Option<u32>,
}

// Snapshot of the echo-source configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct EchoSourceInfo {
    pub sw_if_index: Option<u32>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

// ===== impl EchoSource =====

impl EchoSource {
    pub fn get(&self) -> Option<u32> {
        self.sw_if_index
    }
}

// ===== global functions =====

// Records the interface used to synthesize echo source addresses.
pub fn set_echo_source(
    master: &mut Master,
    sw_if_index: u32,
) -> Result<(), Error> {
    if !master.interfaces.contains_key(&sw_if_index) {
        return Err(Error::InterfaceNotFound(sw_if_index));
    }
    master.echo_source.sw_if_index = Some(sw_if_index);
    Debug::EchoSourceSet(sw_if_index).log();
    Ok(())
}

// Unsets the echo source interface.
pub fn del_echo_source(master: &mut Master) {
    master.echo_source.sw_if_index = None;
    Debug::EchoSourceUnset.log();
}

// Echo works only when the echo source is set, administratively up, and
// carries an address whose subnet has room for at least one additional
// host address (prefix length at most 31 for IPv4, 127 for IPv6).
pub fn is_echo_available(master: &Master, af: AddressFamily) -> bool {
    let Some(sw_if_index) = master.echo_source.sw_if_index else {
        return false;
    };
    let Some(iface) = master.interfaces.get(&sw_if_index) else {
        return false;
    };
    if !iface.is_up() {
        return false;
    }
    iface.addresses.iter().any(|addr| prefix_has_room(addr, af))
}

// Returns the echo-source configuration together with the synthesized
// addresses, when usable ones exist.
pub fn get_echo_source(master: &Master) -> EchoSourceInfo {
    EchoSourceInfo {
        sw_if_index: master.echo_source.sw_if_index,
        ipv4: get_echo_src_ip4(master).ok(),
        ipv6: get_echo_src_ip6(master).ok(),
    }
}

// Synthesizes the IPv4 source address for echo packets: the first
// qualifying interface address with its least significant bit flipped.
// The result is distinct from the interface's own address yet on-subnet;
// it may collide with the network or broadcast address, which is
// accepted.
pub(crate) fn get_echo_src_ip4(master: &Master) -> Result<Ipv4Addr, Error> {
    let iface = echo_source_iface(master)?;
    iface
        .addresses
        .iter()
        .find_map(|addr| match addr {
            IpNetwork::V4(net) if net.prefix() <= 31 => {
                Some(Ipv4Addr::from(u32::from(net.ip()) ^ 1))
            }
            _ => None,
        })
        .ok_or(Error::NoEchoSource)
}

// Synthesizes the IPv6 source address for echo packets.
pub(crate) fn get_echo_src_ip6(master: &Master) -> Result<Ipv6Addr, Error> {
    let iface = echo_source_iface(master)?;
    iface
        .addresses
        .iter()
        .find_map(|addr| match addr {
            IpNetwork::V6(net) if net.prefix() <= 127 => {
                let mut octets = net.ip().octets();
                octets[15] ^= 1;
                Some(Ipv6Addr::from(octets))
            }
            _ => None,
        })
        .ok_or(Error::NoEchoSource)
}

// ===== helper functions =====

fn echo_source_iface(master: &Master) -> Result<&Interface, Error> {
    master
        .echo_source
        .sw_if_index
        .and_then(|sw_if_index| master.interfaces.get(&sw_if_index))
        .ok_or(Error::NoEchoSource)
}

fn prefix_has_room(addr: &IpNetwork, af: AddressFamily) -> bool {
    match (addr, af) {
        (IpNetwork::V4(net), AddressFamily::Ipv4) => net.prefix() <= 31,
        (IpNetwork::V6(net), AddressFamily::Ipv6) => net.prefix() <= 127,
        _ => false,
    }
}
