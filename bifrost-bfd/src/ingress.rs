//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bifrost_utils::bfd::{ErrorKind, HopType, Transport};
use bifrost_utils::ip::AddressFamily;
use tracing::{trace, warn};

use crate::error::UdpError;
use crate::graph::{Buffer, GraphNode, InputNode};
use crate::master::Master;
use crate::network::{self, PORT_DST_MULTIHOP, PORT_SRC_RANGE, TTL_MAX};
use crate::packet::{Ip4Hdr, Ip6Hdr, Packet, PacketFlags, UdpHdr};
use crate::session::{LookupResult, MULTIHOP_SW_IF_INDEX, SessionKey};

// Per-ingress-node classification counters.
#[derive(Debug)]
pub struct IngressCounters {
    counters: [[u64; UdpError::COUNT]; InputNode::COUNT],
}

// L3/L4 fields extracted from a received datagram.
#[derive(Debug)]
struct IngressHeaders {
    src: IpAddr,
    dst: IpAddr,
    ttl: u8,
    udp: UdpHdr,
}

// ===== impl IngressCounters =====

impl IngressCounters {
    pub(crate) fn increment(&mut self, node: InputNode, error: UdpError) {
        self.counters[node.index()][error as usize] += 1;
    }

    pub fn get(&self, node: InputNode, error: UdpError) -> u64 {
        self.counters[node.index()][error as usize]
    }
}

impl Default for IngressCounters {
    fn default() -> IngressCounters {
        IngressCounters {
            counters: [[0; UdpError::COUNT]; InputNode::COUNT],
        }
    }
}

// ===== global functions =====

// Processes one received BFD control datagram: validates the transport
// invariants, hands the payload to the state machine and, when the packet
// carried the Poll bit, reuses the buffer to send back a Final reply.
//
// Every datagram produces exactly one classification, counted on the
// ingress node; everything that is not dispatched as a reply ends at the
// drop sink.
pub fn udp_input(
    master: &mut Master,
    mut buffer: Buffer,
    af: AddressFamily,
) -> UdpError {
    let node = match af {
        AddressFamily::Ipv4 => InputNode::Udp4,
        AddressFamily::Ipv6 => InputNode::Udp6,
    };
    trace!(%af, length = %buffer.length_in_chain(), "received packet");

    let (error, bs_idx, poll) = scan(master, &buffer, af);
    master.ingress_counters.increment(node, error);

    if let (UdpError::None, Some(bs_idx)) = (error, bs_idx) {
        if let Some(sess) = master.sessions.get_by_idx(bs_idx) {
            sess.counters.rx.increment(buffer.length_in_chain() as u64);
        }

        // If everything went fine, check for the Poll bit; if present,
        // reuse the buffer and, based on the (now updated) session
        // parameters, send the Final packet back.
        if poll {
            buffer.reset();
            master.machine.init_final_control_frame(&mut buffer, bs_idx);
            if let Some(sess) = master.sessions.get_by_idx(bs_idx) {
                match sess.transport {
                    Transport::Udp4 => {
                        network::add_udp4_transport(&mut buffer, sess, None)
                    }
                    Transport::Udp6 => {
                        network::add_udp6_transport(&mut buffer, sess, None)
                    }
                }
                let next = network::tx_next_node(master, sess)
                    .unwrap_or(GraphNode::ErrorDrop);
                master.graph.put_frame(next, buffer);
                return error;
            }
        }
    }

    master.graph.put_frame(GraphNode::ErrorDrop, buffer);
    error
}

// Processes one received BFD echo datagram. Packets recognized by the
// state machine (via the cookie it embedded) are accounted and dropped;
// everything else is looped back to the sender (echo reflector).
pub fn udp_echo_input(
    master: &mut Master,
    buffer: Buffer,
    af: AddressFamily,
) -> bool {
    let node = match af {
        AddressFamily::Ipv4 => InputNode::Echo4,
        AddressFamily::Ipv6 => InputNode::Echo6,
    };
    trace!(%af, length = %buffer.length_in_chain(), "received echo packet");

    master.ingress_counters.increment(node, UdpError::None);
    match master.machine.consume_echo(&buffer) {
        Some(bs_idx) => {
            if let Some(sess) = master.sessions.get_by_idx(bs_idx) {
                sess.counters
                    .rx_echo
                    .increment(buffer.length_in_chain() as u64);
            }
            master.graph.put_frame(GraphNode::ErrorDrop, buffer);
            true
        }
        None => {
            // Loop the packet back to the sender.
            let next = match af {
                AddressFamily::Ipv4 => GraphNode::Ip4Lookup,
                AddressFamily::Ipv6 => GraphNode::Ip6Lookup,
            };
            master.graph.put_frame(next, buffer);
            false
        }
    }
}

// ===== helper functions =====

// Runs the per-datagram validation pipeline, returning the classification,
// the matched session and whether the packet carried the Poll bit.
fn scan(
    master: &mut Master,
    buffer: &Buffer,
    af: AddressFamily,
) -> (UdpError, Option<u32>, bool) {
    let payload = buffer.current();

    // The payload must be able to hold a BFD control packet of minimum
    // size.
    if payload.len() < Packet::MANDATORY_SECTION_LEN as usize {
        return (UdpError::Bad, None, false);
    }

    // Locate and parse the L3/L4 headers.
    let Some(headers) = find_headers(buffer, af) else {
        return (UdpError::Bad, None, false);
    };

    // The BFD length field may not exceed the UDP payload.
    let udp_payload_length =
        headers.udp.length.saturating_sub(UdpHdr::LEN as u16);
    let bfd_length = payload[3] as u16;
    if bfd_length > udp_payload_length {
        let error = match af {
            AddressFamily::Ipv4 => UdpError::Length,
            AddressFamily::Ipv6 => UdpError::Bad,
        };
        return (error, None, false);
    }

    // Structural decode; malformed packets are classified as invalid.
    let Ok(pkt) = Packet::decode(payload) else {
        return (UdpError::Bad, None, false);
    };

    // Protocol-independent validation, delegated to the state machine.
    let error = master.machine.verify_pkt_common(&pkt);
    if error != ErrorKind::None {
        return (error.into(), None, false);
    }

    // Session lookup.
    let sw_if_index = if headers.udp.dst_port == PORT_DST_MULTIHOP {
        MULTIHOP_SW_IF_INDEX
    } else {
        buffer.sw_if_index_rx
    };
    let key = SessionKey::new(sw_if_index, &headers.dst, &headers.src);
    let result = lookup_session(master, pkt.your_discr, &key);
    let (LookupResult::ByDisc(bs_idx) | LookupResult::ByKey(bs_idx)) = result
    else {
        return (UdpError::NoSession, None, false);
    };
    let Some(sess) = master.sessions.get_by_idx(bs_idx) else {
        return (UdpError::NoSession, None, false);
    };

    // Authentication, delegated to the state machine.
    if !master.machine.verify_pkt_auth(&pkt, payload, bs_idx) {
        return (UdpError::FailedVerification, None, false);
    }

    // Transport invariants.
    if headers.src != sess.key.peer_addr {
        return (UdpError::SrcMismatch, None, false);
    }
    if headers.dst != sess.key.local_addr {
        return (UdpError::DstMismatch, None, false);
    }
    if sess.hop_type == HopType::Single && headers.ttl != TTL_MAX {
        return (UdpError::Ttl, None, false);
    }
    if headers.udp.src_port < *PORT_SRC_RANGE.start() {
        warn!(
            src_port = %headers.udp.src_port,
            "UDP source port out of range <49152,65535>"
        );
    }

    // Hand the packet to the state machine.
    let error = master.machine.consume_pkt(&pkt, bs_idx);
    (error.into(), Some(bs_idx), pkt.flags.contains(PacketFlags::P))
}

// Locates the L3 header through the offset recorded with the buffer and
// extracts the fields the validator needs. Returns `None` when the offset
// is outside the valid pre-data bounds or the headers don't parse.
fn find_headers(buffer: &Buffer, af: AddressFamily) -> Option<IngressHeaders> {
    let l3_offset = buffer.l3_hdr_offset?;
    if l3_offset > buffer.current_offset() {
        return None;
    }

    match af {
        AddressFamily::Ipv4 => {
            let ip4 =
                Ip4Hdr::decode(buffer.slice_at(l3_offset, Ip4Hdr::LEN)?)
                    .ok()?;
            let udp = UdpHdr::decode(buffer.slice_at(
                l3_offset + Ip4Hdr::LEN as i32,
                UdpHdr::LEN,
            )?)
            .ok()?;
            Some(IngressHeaders {
                src: IpAddr::V4(ip4.src),
                dst: IpAddr::V4(ip4.dst),
                ttl: ip4.ttl,
                udp,
            })
        }
        AddressFamily::Ipv6 => {
            let ip6 =
                Ip6Hdr::decode(buffer.slice_at(l3_offset, Ip6Hdr::LEN)?)
                    .ok()?;
            if ip6.next_header != network::IP_PROTO_UDP {
                return None;
            }
            let udp = UdpHdr::decode(buffer.slice_at(
                l3_offset + Ip6Hdr::LEN as i32,
                UdpHdr::LEN,
            )?)
            .ok()?;
            Some(IngressHeaders {
                src: IpAddr::V6(ip6.src),
                dst: IpAddr::V6(ip6.dst),
                ttl: ip6.hop_limit,
                udp,
            })
        }
    }
}

// Session lookup for a received control packet: a nonzero Your
// Discriminator takes priority; otherwise the session is found by the
// (interface, local, peer) key, with the all-ones interface index
// standing in for multihop sessions.
pub fn lookup_session(
    master: &Master,
    your_discr: u32,
    key: &SessionKey,
) -> LookupResult {
    if your_discr != 0 {
        return match master
            .machine
            .find_by_disc(your_discr)
            .filter(|bs_idx| master.sessions.get_by_idx(*bs_idx).is_some())
        {
            Some(bs_idx) => LookupResult::ByDisc(bs_idx),
            None => LookupResult::Absent,
        };
    }

    match master.sessions.lookup(key) {
        Some(bs_idx) => LookupResult::ByKey(bs_idx),
        None => LookupResult::Absent,
    }
}
