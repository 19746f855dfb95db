//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::ip::AddressFamily;

// BFD hop type.
//
// Single-hop sessions run between directly connected peers and are
// TTL-guarded (RFC 5881); multihop sessions run across routed paths
// (RFC 5883).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum HopType {
    Single,
    Multi,
}

// BFD transport protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Transport {
    Udp4,
    Udp6,
}

// BFD session state.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    AdminDown = 0,
    Down = 1,
    Init = 2,
    Up = 3,
}

// Protocol-level verdict produced by the BFD state machine when checking
// or consuming a control packet.
//
// The transport-layer classification enum is a superset of this one; the
// discriminants here must stay aligned with the leading entries there.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorKind {
    None = 0,
    Bad = 1,
}

// ===== impl Transport =====

impl Transport {
    // Returns the transport matching the given session address.
    pub fn for_addr(addr: &IpAddr) -> Transport {
        match addr {
            IpAddr::V4(_) => Transport::Udp4,
            IpAddr::V6(_) => Transport::Udp6,
        }
    }

    pub fn address_family(&self) -> AddressFamily {
        match self {
            Transport::Udp4 => AddressFamily::Ipv4,
            Transport::Udp6 => AddressFamily::Ipv6,
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Udp4 => write!(f, "udp4"),
            Transport::Udp6 => write!(f, "udp6"),
        }
    }
}
