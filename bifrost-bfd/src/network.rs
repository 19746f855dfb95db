//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bifrost_utils::bfd::{HopType, Transport};
use bifrost_utils::bytes::TLS_BUF;
use internet_checksum::Checksum;

use crate::debug::Debug;
use crate::graph::{
    AdjacencyNext, Buffer, BufferFlags, GraphNode, InputNode, UdpDemux,
};
use crate::master::Master;
use crate::packet::{Ip4Hdr, Ip6Hdr, UdpHdr};
use crate::session::UdpSession;

pub const PORT_DST_SINGLE_HOP: u16 = 3784;
pub const PORT_DST_ECHO: u16 = 3785;
pub const PORT_DST_MULTIHOP: u16 = 4784;
pub const PORT_SRC_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

pub const TTL_MAX: u8 = 255;
pub const IP_PROTO_UDP: u8 = 17;

// The source port MUST be in the range 49152 through 65535. The same UDP
// source port number MUST be used for all BFD Control packets associated
// with a particular session. If more than 16384 sessions are active at
// once, source port numbers are reused across sessions.
pub fn sport(bs_idx: u32) -> u16 {
    let base = *PORT_SRC_RANGE.start() as u32;
    let span = (*PORT_SRC_RANGE.end() - *PORT_SRC_RANGE.start()) as u32 + 1;
    (base + bs_idx % span) as u16
}

// Live-session counters per transport and hop type.
//
// A well-known UDP destination port is registered with the host
// demultiplexer when the first matching session appears and unregistered
// when the last one goes away. The host registration API is not
// idempotent, so these counts must stay exact.
#[derive(Debug, Default)]
pub struct PortRegistry {
    udp4_sh_sessions_count: u32,
    udp6_sh_sessions_count: u32,
    udp4_mh_sessions_count: u32,
    udp6_mh_sessions_count: u32,
}

// ===== impl PortRegistry =====

impl PortRegistry {
    pub fn count(&self, transport: Transport, hop_type: HopType) -> u32 {
        match (transport, hop_type) {
            (Transport::Udp4, HopType::Single) => self.udp4_sh_sessions_count,
            (Transport::Udp6, HopType::Single) => self.udp6_sh_sessions_count,
            (Transport::Udp4, HopType::Multi) => self.udp4_mh_sessions_count,
            (Transport::Udp6, HopType::Multi) => self.udp6_mh_sessions_count,
        }
    }

    pub(crate) fn session_added(
        &mut self,
        demux: &mut dyn UdpDemux,
        transport: Transport,
        hop_type: HopType,
    ) {
        let count = self.counter_mut(transport, hop_type);
        *count += 1;
        if *count != 1 {
            return;
        }

        let af = transport.address_family();
        let is_ip4 = transport == Transport::Udp4;
        match hop_type {
            HopType::Single => {
                let (input, echo_input) = match transport {
                    Transport::Udp4 => (InputNode::Udp4, InputNode::Echo4),
                    Transport::Udp6 => (InputNode::Udp6, InputNode::Echo6),
                };
                demux.register_dst_port(PORT_DST_SINGLE_HOP, input, is_ip4);
                Debug::PortRegister(PORT_DST_SINGLE_HOP, af).log();
                demux.register_dst_port(PORT_DST_ECHO, echo_input, is_ip4);
                Debug::PortRegister(PORT_DST_ECHO, af).log();
            }
            HopType::Multi => {
                let input = match transport {
                    Transport::Udp4 => InputNode::Udp4,
                    Transport::Udp6 => InputNode::Udp6,
                };
                demux.register_dst_port(PORT_DST_MULTIHOP, input, is_ip4);
                Debug::PortRegister(PORT_DST_MULTIHOP, af).log();
            }
        }
    }

    pub(crate) fn session_removed(
        &mut self,
        demux: &mut dyn UdpDemux,
        transport: Transport,
        hop_type: HopType,
    ) {
        let count = self.counter_mut(transport, hop_type);
        *count -= 1;
        if *count != 0 {
            return;
        }

        let af = transport.address_family();
        let is_ip4 = transport == Transport::Udp4;
        match hop_type {
            HopType::Single => {
                demux.unregister_dst_port(PORT_DST_SINGLE_HOP, is_ip4);
                Debug::PortUnregister(PORT_DST_SINGLE_HOP, af).log();
                demux.unregister_dst_port(PORT_DST_ECHO, is_ip4);
                Debug::PortUnregister(PORT_DST_ECHO, af).log();
            }
            HopType::Multi => {
                demux.unregister_dst_port(PORT_DST_MULTIHOP, is_ip4);
                Debug::PortUnregister(PORT_DST_MULTIHOP, af).log();
            }
        }
    }

    fn counter_mut(
        &mut self,
        transport: Transport,
        hop_type: HopType,
    ) -> &mut u32 {
        match (transport, hop_type) {
            (Transport::Udp4, HopType::Single) => {
                &mut self.udp4_sh_sessions_count
            }
            (Transport::Udp6, HopType::Single) => {
                &mut self.udp6_sh_sessions_count
            }
            (Transport::Udp4, HopType::Multi) => {
                &mut self.udp4_mh_sessions_count
            }
            (Transport::Udp6, HopType::Multi) => {
                &mut self.udp6_mh_sessions_count
            }
        }
    }
}

// ===== global functions =====

// Prepends the IPv4+UDP encapsulation onto the BFD payload currently held
// by the buffer. `echo_src` carries the synthesized source address for
// echo packets and is `None` for control packets.
pub(crate) fn add_udp4_transport(
    buffer: &mut Buffer,
    sess: &UdpSession,
    echo_src: Option<Ipv4Addr>,
) {
    let local = match sess.key.local_addr {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => unreachable!(),
    };
    let peer = match sess.key.peer_addr {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => unreachable!(),
    };

    buffer.flags |= BufferFlags::LOCALLY_ORIGINATED;
    if sess.hop_type == HopType::Single {
        buffer.adj_index = sess.adj;
    }
    buffer.advance(-((Ip4Hdr::LEN + UdpHdr::LEN) as i32));
    buffer.l3_hdr_offset = Some(buffer.current_offset());

    let (src, dst, dst_port) = match echo_src {
        // Echo packets are addressed to ourselves and looped back by the
        // peer.
        Some(src) => (src, local, PORT_DST_ECHO),
        None => {
            let dst_port = match sess.hop_type {
                HopType::Single => PORT_DST_SINGLE_HOP,
                HopType::Multi => PORT_DST_MULTIHOP,
            };
            (local, peer, dst_port)
        }
    };

    let ip_length = buffer.length_in_chain() as u16;
    let udp_length = ip_length - Ip4Hdr::LEN as u16;
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        Ip4Hdr {
            length: ip_length,
            ttl: TTL_MAX,
            protocol: IP_PROTO_UDP,
            src,
            dst,
        }
        .encode(&mut buf);
        UdpHdr {
            src_port: sport(sess.bs_idx),
            dst_port,
            length: udp_length,
            // The UDP checksum is optional over IPv4.
            checksum: 0,
        }
        .encode(&mut buf);
        buffer.current_mut()[..Ip4Hdr::LEN + UdpHdr::LEN]
            .copy_from_slice(&buf);
    });
}

// Prepends the IPv6+UDP encapsulation onto the BFD payload currently held
// by the buffer. `echo_src` carries the synthesized source address for
// echo packets and is `None` for control packets.
pub(crate) fn add_udp6_transport(
    buffer: &mut Buffer,
    sess: &UdpSession,
    echo_src: Option<Ipv6Addr>,
) {
    let local = match sess.key.local_addr {
        IpAddr::V6(addr) => addr,
        IpAddr::V4(_) => unreachable!(),
    };
    let peer = match sess.key.peer_addr {
        IpAddr::V6(addr) => addr,
        IpAddr::V4(_) => unreachable!(),
    };

    buffer.flags |= BufferFlags::LOCALLY_ORIGINATED;
    if sess.hop_type == HopType::Single {
        buffer.adj_index = sess.adj;
    }
    buffer.advance(-((Ip6Hdr::LEN + UdpHdr::LEN) as i32));
    buffer.l3_hdr_offset = Some(buffer.current_offset());

    let (src, dst, dst_port) = match echo_src {
        Some(src) => (src, local, PORT_DST_ECHO),
        None => {
            let dst_port = match sess.hop_type {
                HopType::Single => PORT_DST_SINGLE_HOP,
                HopType::Multi => PORT_DST_MULTIHOP,
            };
            (local, peer, dst_port)
        }
    };

    let udp_length = (buffer.length_in_chain() - Ip6Hdr::LEN) as u16;
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        Ip6Hdr {
            payload_length: udp_length,
            next_header: IP_PROTO_UDP,
            hop_limit: TTL_MAX,
            src,
            dst,
        }
        .encode(&mut buf);
        UdpHdr {
            src_port: sport(sess.bs_idx),
            dst_port,
            length: udp_length,
            checksum: 0,
        }
        .encode(&mut buf);
        buffer.current_mut()[..Ip6Hdr::LEN + UdpHdr::LEN]
            .copy_from_slice(&buf);
    });

    // The UDP checksum is mandatory over IPv6.
    let checksum =
        udp6_checksum(&src, &dst, &buffer.current()[Ip6Hdr::LEN..]);
    let field = Ip6Hdr::LEN + 6;
    buffer.current_mut()[field..field + 2]
        .copy_from_slice(&checksum.to_be_bytes());
}

// Computes the UDP checksum over the IPv6 pseudo-header and the given UDP
// segment. Per RFC 2460, a computed checksum of zero is transmitted as
// 0xFFFF.
pub fn udp6_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, segment: &[u8]) -> u16 {
    let mut cksum = Checksum::new();
    cksum.add_bytes(&src.octets());
    cksum.add_bytes(&dst.octets());
    cksum.add_bytes(&(segment.len() as u32).to_be_bytes());
    cksum.add_bytes(&[0, 0, 0, IP_PROTO_UDP]);
    cksum.add_bytes(segment);
    let value = u16::from_be_bytes(cksum.checksum());
    if value == 0 { 0xFFFF } else { value }
}

// Selects the downstream node the encapsulated packet is handed to.
// Multihop packets always take the IP lookup path; single-hop packets
// follow the session's adjacency, unless the interface is down.
pub(crate) fn tx_next_node(
    master: &Master,
    sess: &UdpSession,
) -> Option<GraphNode> {
    match sess.hop_type {
        HopType::Multi => Some(match sess.transport {
            Transport::Udp4 => GraphNode::Ip4Lookup,
            Transport::Udp6 => GraphNode::Ip6Lookup,
        }),
        HopType::Single => {
            let iface =
                master.interfaces.get(&(sess.key.sw_if_index as u32))?;
            if !iface.is_up() {
                return None;
            }
            match master.adjacency.next(sess.adj) {
                AdjacencyNext::Arp => Some(match sess.transport {
                    Transport::Udp4 => GraphNode::Ip4Arp,
                    Transport::Udp6 => GraphNode::Ip6Ndp,
                }),
                AdjacencyNext::Rewrite => Some(match sess.transport {
                    Transport::Udp4 => GraphNode::Ip4Rewrite,
                    Transport::Udp6 => GraphNode::Ip6Rewrite,
                }),
                AdjacencyNext::Midchain => Some(match sess.transport {
                    Transport::Udp4 => GraphNode::Ip4Midchain,
                    Transport::Udp6 => GraphNode::Ip6Midchain,
                }),
                AdjacencyNext::Drop => None,
            }
        }
    }
}
