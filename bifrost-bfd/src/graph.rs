//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bifrost_utils::ip::AddressFamily;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// Headroom available in front of every packet for prepending headers.
pub const PRE_DATA_LEN: usize = 128;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct BufferFlags: u8 {
        const LOCALLY_ORIGINATED = 0x01;
    }
}

// Packet buffer handed around the forwarding graph.
//
// The packet bytes live at a fixed position inside the backing storage;
// `current_data` is the offset of the current payload relative to that
// position and may go negative (down to -PRE_DATA_LEN) when headers are
// prepended. `l3_hdr_offset` uses the same basis.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    current_data: i32,
    current_length: usize,
    pub flags: BufferFlags,
    pub l3_hdr_offset: Option<i32>,
    pub sw_if_index_rx: u32,
    pub adj_index: AdjHandle,
}

// Opaque handle to a cached next-hop forwarding object.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AdjHandle(pub u32);

// Next-hop kind cached in an adjacency. Kinds the transport cannot use
// collapse to `Drop`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AdjacencyNext {
    Arp,
    Rewrite,
    Midchain,
    Drop,
}

// Downstream graph nodes the transport hands frames to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum GraphNode {
    ErrorDrop,
    Ip4Lookup,
    Ip6Lookup,
    Ip4Arp,
    Ip6Ndp,
    Ip4Rewrite,
    Ip6Rewrite,
    Ip4Midchain,
    Ip6Midchain,
}

// Ingress nodes the transport registers with the host UDP demultiplexer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InputNode {
    Udp4,
    Udp6,
    Echo4,
    Echo6,
}

// Statistics gauge identifier handed out by the stats sink.
pub type GaugeId = u32;

// Host forwarding graph: frame handoff to downstream nodes.
pub trait PacketGraph: std::fmt::Debug {
    // Hands a fully formed single-buffer frame to the given node.
    fn put_frame(&mut self, node: GraphNode, buffer: Buffer);
}

// Neighbor adjacency layer.
//
// Handles are reference counted by the host: `acquire` locks the
// adjacency, `release` drops the lock.
pub trait AdjacencyTable: std::fmt::Debug {
    fn acquire(
        &mut self,
        af: AddressFamily,
        peer: IpAddr,
        sw_if_index: u32,
    ) -> AdjHandle;

    fn release(&mut self, adj: AdjHandle);

    fn next(&self, adj: AdjHandle) -> AdjacencyNext;
}

// Host UDP demultiplexer.
//
// Registration is not idempotent: every port may be registered at most
// once per family and must be unregistered exactly once.
pub trait UdpDemux: std::fmt::Debug {
    fn register_dst_port(&mut self, port: u16, node: InputNode, is_ip4: bool);

    fn unregister_dst_port(&mut self, port: u16, is_ip4: bool);
}

// Statistics gauge sink.
pub trait StatsSink: std::fmt::Debug {
    fn add_gauge(&mut self, name: &str) -> GaugeId;

    fn set_gauge(&mut self, gauge: GaugeId, value: u64);
}

// ===== impl Buffer =====

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            data: vec![0; PRE_DATA_LEN],
            current_data: 0,
            current_length: 0,
            flags: BufferFlags::empty(),
            l3_hdr_offset: None,
            sw_if_index_rx: u32::MAX,
            adj_index: AdjHandle::INVALID,
        }
    }

    fn abs(&self, offset: i32) -> usize {
        (PRE_DATA_LEN as i32 + offset) as usize
    }

    // Offset of the current payload start, relative to the packet origin.
    pub fn current_offset(&self) -> i32 {
        self.current_data
    }

    // Total length of valid payload bytes.
    pub fn length_in_chain(&self) -> usize {
        self.current_length
    }

    // Returns the current payload.
    pub fn current(&self) -> &[u8] {
        let start = self.abs(self.current_data);
        &self.data[start..start + self.current_length]
    }

    // Returns the current payload mutably.
    pub fn current_mut(&mut self) -> &mut [u8] {
        let start = self.abs(self.current_data);
        &mut self.data[start..start + self.current_length]
    }

    // Moves the current pointer. A negative delta grows the payload into
    // the headroom (prepending), a positive delta shrinks it from the
    // front.
    pub fn advance(&mut self, delta: i32) {
        let current_data = self.current_data + delta;
        assert!(current_data >= -(PRE_DATA_LEN as i32));
        if delta > 0 {
            assert!(delta as usize <= self.current_length);
        }
        self.current_data = current_data;
        self.current_length =
            (self.current_length as i64 - delta as i64) as usize;
    }

    // Appends bytes at the end of the current payload.
    pub fn put(&mut self, bytes: &[u8]) {
        let start = self.abs(self.current_data) + self.current_length;
        if self.data.len() < start + bytes.len() {
            self.data.resize(start + bytes.len(), 0);
        }
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.current_length += bytes.len();
    }

    // Rewinds the buffer to an empty payload at the packet origin so it
    // can be reused for a generated reply.
    pub fn reset(&mut self) {
        self.current_data = 0;
        self.current_length = 0;
    }

    // Returns `len` bytes starting at the given offset, provided the whole
    // range lies within the headroom plus the valid payload.
    pub fn slice_at(&self, offset: i32, len: usize) -> Option<&[u8]> {
        if offset < -(PRE_DATA_LEN as i32) {
            return None;
        }
        let start = self.abs(offset);
        let end = self.abs(self.current_data) + self.current_length;
        if start + len > end {
            return None;
        }
        Some(&self.data[start..start + len])
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

// ===== impl AdjHandle =====

impl AdjHandle {
    pub const INVALID: AdjHandle = AdjHandle(u32::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

// ===== impl InputNode =====

impl InputNode {
    pub const COUNT: usize = 4;

    pub(crate) fn index(&self) -> usize {
        match self {
            InputNode::Udp4 => 0,
            InputNode::Udp6 => 1,
            InputNode::Echo4 => 2,
            InputNode::Echo6 => 3,
        }
    }
}
