//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use bifrost_utils::bfd::{HopType, Transport};
use bifrost_utils::ip::IpAddrExt;
use bifrost_utils::southbound::InterfaceFlags;
use derive_new::new;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::echo::{self, EchoSource};
use crate::error::Error;
use crate::graph::{
    AdjHandle, AdjacencyTable, Buffer, GaugeId, PacketGraph, StatsSink,
    UdpDemux,
};
use crate::ingress::IngressCounters;
use crate::machine::StateMachine;
use crate::network::{self, PortRegistry};
use crate::session::{
    MULTIHOP_SW_IF_INDEX, SessionKey, Sessions, UdpSession,
};

const GAUGE_UDP4_SH_SESSIONS: &str = "/bfd/udp4/sessions";
const GAUGE_UDP6_SH_SESSIONS: &str = "/bfd/udp6/sessions";
const GAUGE_UDP4_MH_SESSIONS: &str = "/bfd/udp4/sessions_mh";
const GAUGE_UDP6_MH_SESSIONS: &str = "/bfd/udp6/sessions_mh";

// Process-wide BFD UDP transport state.
//
// A single instance is created at process init and owned by the process
// root. Every operation takes exclusive access; callers running on
// multiple workers serialize control-plane operations and the state
// machine handoff of the datagram path through one mutex around this
// value (the BFD lock). Per-session traffic counters use atomics and
// need no lock.
#[derive(Debug)]
pub struct Master {
    // BFD sessions.
    pub sessions: Sessions,
    // Well-known UDP port registrations.
    pub ports: PortRegistry,
    // Echo source interface.
    pub echo_source: EchoSource,
    // System interfaces.
    pub interfaces: HashMap<u32, Interface>,
    // Ingress node counters.
    pub ingress_counters: IngressCounters,
    // BFD control state machine.
    pub machine: Box<dyn StateMachine>,
    // Host graph collaborators.
    pub adjacency: Box<dyn AdjacencyTable>,
    pub demux: Box<dyn UdpDemux>,
    pub graph: Box<dyn PacketGraph>,
    pub stats: Box<dyn StatsSink>,
    // Session count gauges.
    gauges: SessionGauges,
}

// Known system interface.
#[derive(Debug, new)]
pub struct Interface {
    pub sw_if_index: u32,
    pub ifname: String,
    pub flags: InterfaceFlags,
    #[new(default)]
    pub addresses: BTreeSet<IpNetwork>,
}

// Authentication parameters activated together with a new session.
#[derive(Clone, Copy, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct SessionAuth {
    pub conf_key_id: u32,
    pub key_id: u8,
}

#[derive(Debug)]
struct SessionGauges {
    udp4_sh: GaugeId,
    udp6_sh: GaugeId,
    udp4_mh: GaugeId,
    udp6_mh: GaugeId,
}

// ===== impl Master =====

impl Master {
    pub fn new(
        machine: Box<dyn StateMachine>,
        adjacency: Box<dyn AdjacencyTable>,
        demux: Box<dyn UdpDemux>,
        graph: Box<dyn PacketGraph>,
        mut stats: Box<dyn StatsSink>,
    ) -> Master {
        let gauges = SessionGauges {
            udp4_sh: stats.add_gauge(GAUGE_UDP4_SH_SESSIONS),
            udp6_sh: stats.add_gauge(GAUGE_UDP6_SH_SESSIONS),
            udp4_mh: stats.add_gauge(GAUGE_UDP4_MH_SESSIONS),
            udp6_mh: stats.add_gauge(GAUGE_UDP6_MH_SESSIONS),
        };
        for gauge in
            [gauges.udp4_sh, gauges.udp6_sh, gauges.udp4_mh, gauges.udp6_mh]
        {
            stats.set_gauge(gauge, 0);
        }

        Master {
            sessions: Default::default(),
            ports: Default::default(),
            echo_source: Default::default(),
            interfaces: Default::default(),
            ingress_counters: Default::default(),
            machine,
            adjacency,
            demux,
            graph,
            stats,
            gauges,
        }
    }

    // Creates and starts a BFD session over UDP.
    pub fn add_session(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        desired_min_tx_us: u32,
        required_min_rx_us: u32,
        detect_mult: u8,
        auth: Option<SessionAuth>,
    ) -> Result<u32, Error> {
        self.verify_common(
            multihop,
            sw_if_index,
            desired_min_tx_us,
            detect_mult,
            &local_addr,
            &peer_addr,
        )
        .and_then(|_| {
            self.add_and_start_session(
                multihop,
                sw_if_index,
                local_addr,
                peer_addr,
                desired_min_tx_us,
                required_min_rx_us,
                detect_mult,
                auth,
            )
        })
        .inspect_err(|error| error.log())
    }

    // Creates the session if it does not exist yet, otherwise updates its
    // timing parameters.
    pub fn upd_session(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        desired_min_tx_us: u32,
        required_min_rx_us: u32,
        detect_mult: u8,
        auth: Option<SessionAuth>,
    ) -> Result<u32, Error> {
        self.verify_common(
            multihop,
            sw_if_index,
            desired_min_tx_us,
            detect_mult,
            &local_addr,
            &peer_addr,
        )
        .and_then(|_| {
            match self.find_session(
                multihop,
                sw_if_index,
                &local_addr,
                &peer_addr,
            ) {
                Err(Error::SessionNotFound(..)) => self.add_and_start_session(
                    multihop,
                    sw_if_index,
                    local_addr,
                    peer_addr,
                    desired_min_tx_us,
                    required_min_rx_us,
                    detect_mult,
                    auth,
                ),
                Err(error) => Err(error),
                Ok(bs_idx) => {
                    self.machine.set_params(
                        bs_idx,
                        desired_min_tx_us,
                        required_min_rx_us,
                        detect_mult,
                    )?;
                    Ok(bs_idx)
                }
            }
        })
        .inspect_err(|error| error.log())
    }

    // Updates the timing parameters of an existing session.
    pub fn mod_session(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        desired_min_tx_us: u32,
        required_min_rx_us: u32,
        detect_mult: u8,
    ) -> Result<(), Error> {
        self.find_session(multihop, sw_if_index, &local_addr, &peer_addr)
            .and_then(|bs_idx| {
                self.machine.set_params(
                    bs_idx,
                    desired_min_tx_us,
                    required_min_rx_us,
                    detect_mult,
                )
            })
            .inspect_err(|error| error.log())
    }

    // Deletes an existing session.
    pub fn del_session(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
    ) -> Result<(), Error> {
        self.find_session(multihop, sw_if_index, &local_addr, &peer_addr)
            .map(|bs_idx| self.del_session_internal(bs_idx))
            .inspect_err(|error| error.log())
    }

    // Sets or clears the administrative-down flag of an existing session.
    pub fn session_set_flags(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        admin_up: bool,
    ) -> Result<(), Error> {
        self.find_session(multihop, sw_if_index, &local_addr, &peer_addr)
            .map(|bs_idx| self.machine.set_flags(bs_idx, admin_up))
            .inspect_err(|error| error.log())
    }

    // Activates authentication on an existing session.
    pub fn auth_activate(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        auth: SessionAuth,
        is_delayed: bool,
    ) -> Result<(), Error> {
        self.find_session(multihop, sw_if_index, &local_addr, &peer_addr)
            .and_then(|bs_idx| {
                self.machine.auth_activate(
                    bs_idx,
                    auth.conf_key_id,
                    auth.key_id,
                    is_delayed,
                )
            })
            .inspect_err(|error| error.log())
    }

    // Deactivates authentication on an existing session.
    pub fn auth_deactivate(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        is_delayed: bool,
    ) -> Result<(), Error> {
        self.find_session(multihop, sw_if_index, &local_addr, &peer_addr)
            .and_then(|bs_idx| self.machine.auth_deactivate(bs_idx, is_delayed))
            .inspect_err(|error| error.log())
    }

    // Builds the IP+UDP encapsulation around the BFD payload currently
    // held by the buffer (control or echo).
    pub fn add_transport_layer(
        &self,
        buffer: &mut Buffer,
        bs_idx: u32,
        is_echo: bool,
    ) -> Result<(), Error> {
        let sess = self
            .sessions
            .get_by_idx(bs_idx)
            .ok_or(Error::SessionIdxNotFound(bs_idx))?;
        match sess.transport {
            Transport::Udp4 => {
                let echo_src = match is_echo {
                    true => Some(echo::get_echo_src_ip4(self)?),
                    false => None,
                };
                network::add_udp4_transport(buffer, sess, echo_src);
            }
            Transport::Udp6 => {
                let echo_src = match is_echo {
                    true => Some(echo::get_echo_src_ip6(self)?),
                    false => None,
                };
                network::add_udp6_transport(buffer, sess, echo_src);
            }
        }
        Ok(())
    }

    // Selects the downstream node and hands the encapsulated frame to it.
    // Returns false when no next node exists; in that case the packet is
    // not considered transmitted and the caller accounts the Tx drop.
    pub fn transport_frame(
        &mut self,
        buffer: Buffer,
        bs_idx: u32,
        is_echo: bool,
    ) -> bool {
        let Some(sess) = self.sessions.get_by_idx(bs_idx) else {
            return false;
        };
        let Some(next) = network::tx_next_node(self, sess) else {
            return false;
        };
        let counter = match is_echo {
            true => &sess.counters.tx_echo,
            false => &sess.counters.tx,
        };
        counter.increment(buffer.length_in_chain() as u64);
        self.graph.put_frame(next, buffer);
        true
    }

    // ===== session lifecycle internals =====

    fn verify_common(
        &self,
        multihop: bool,
        sw_if_index: u32,
        desired_min_tx_us: u32,
        detect_mult: u8,
        local_addr: &IpAddr,
        peer_addr: &IpAddr,
    ) -> Result<(), Error> {
        self.validate_api_input(multihop, sw_if_index, local_addr, peer_addr)?;
        if detect_mult < 1 {
            return Err(Error::InvalidDetectMult(detect_mult));
        }
        if desired_min_tx_us < 1 {
            return Err(Error::InvalidMinTx(desired_min_tx_us));
        }
        Ok(())
    }

    fn validate_api_input(
        &self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: &IpAddr,
        peer_addr: &IpAddr,
    ) -> Result<(), Error> {
        if !multihop && !self.interfaces.contains_key(&sw_if_index) {
            return Err(Error::InterfaceNotFound(sw_if_index));
        }
        let local_addr = local_addr.to_canonical();
        let peer_addr = peer_addr.to_canonical();
        if local_addr.address_family() != peer_addr.address_family() {
            return Err(Error::AddressFamilyMismatch(local_addr, peer_addr));
        }
        Ok(())
    }

    fn find_session(
        &self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: &IpAddr,
        peer_addr: &IpAddr,
    ) -> Result<u32, Error> {
        self.validate_api_input(multihop, sw_if_index, local_addr, peer_addr)?;
        let key = session_key(multihop, sw_if_index, local_addr, peer_addr);
        self.sessions
            .lookup(&key)
            .ok_or(Error::SessionNotFound(key))
    }

    fn add_and_start_session(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        desired_min_tx_us: u32,
        required_min_rx_us: u32,
        detect_mult: u8,
        auth: Option<SessionAuth>,
    ) -> Result<u32, Error> {
        let bs_idx = self.add_session_internal(
            multihop,
            sw_if_index,
            local_addr,
            peer_addr,
            desired_min_tx_us,
            required_min_rx_us,
            detect_mult,
        )?;
        if let Some(auth) = auth
            && let Err(error) = self.machine.auth_activate(
                bs_idx,
                auth.conf_key_id,
                auth.key_id,
                false,
            )
        {
            self.del_session_internal(bs_idx);
            return Err(error);
        }
        self.machine.start(bs_idx);
        Ok(bs_idx)
    }

    fn add_session_internal(
        &mut self,
        multihop: bool,
        sw_if_index: u32,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        desired_min_tx_us: u32,
        required_min_rx_us: u32,
        detect_mult: u8,
    ) -> Result<u32, Error> {
        let key = session_key(multihop, sw_if_index, &local_addr, &peer_addr);
        let transport = Transport::for_addr(&key.local_addr);

        // Get a pool entry and if we end up not needing it, give it back.
        let Some(bs_idx) = self.machine.get_session(transport) else {
            return Err(Error::SessionPoolExhausted(transport));
        };
        if let Some(existing) = self.sessions.lookup(&key) {
            self.machine.put_session(bs_idx);
            return Err(Error::SessionExists(key, existing));
        }

        let hop_type = match multihop {
            true => HopType::Multi,
            false => HopType::Single,
        };
        let adj = match hop_type {
            HopType::Multi => AdjHandle::INVALID,
            HopType::Single => {
                // P2P links resolve the neighbor against the unspecified
                // address.
                let peer = match self.interfaces.get(&sw_if_index) {
                    Some(iface) if iface.is_p2p() => {
                        IpAddr::unspecified(transport.address_family())
                    }
                    _ => key.peer_addr,
                };
                self.adjacency.acquire(
                    transport.address_family(),
                    peer,
                    sw_if_index,
                )
            }
        };

        let local_discr = self.machine.local_discr(bs_idx);
        let sess = UdpSession::new(
            key, adj, hop_type, transport, bs_idx, local_discr,
        );
        self.sessions.insert(sess)?;
        self.ports
            .session_added(self.demux.as_mut(), transport, hop_type);
        self.update_gauge(transport, hop_type);
        Debug::SessionCreate(&key, bs_idx).log();

        if let Err(error) = self.machine.set_params(
            bs_idx,
            desired_min_tx_us,
            required_min_rx_us,
            detect_mult,
        ) {
            self.del_session_internal(bs_idx);
            return Err(error);
        }
        Ok(bs_idx)
    }

    pub(crate) fn del_session_internal(&mut self, bs_idx: u32) {
        let Some(sess) = self.sessions.get_by_idx(bs_idx) else {
            return;
        };
        let (key, adj, transport, hop_type) =
            (sess.key, sess.adj, sess.transport, sess.hop_type);

        self.machine.stop(bs_idx);
        self.sessions.remove(&key);
        if adj.is_valid() {
            self.adjacency.release(adj);
        }
        self.ports
            .session_removed(self.demux.as_mut(), transport, hop_type);
        self.update_gauge(transport, hop_type);
        self.machine.put_session(bs_idx);
        Debug::SessionDelete(&key, bs_idx).log();
    }

    // Updates the session count gauge for the given transport and hop
    // type. The stats sink applies its own short-lived lock.
    fn update_gauge(&mut self, transport: Transport, hop_type: HopType) {
        let gauge = match (transport, hop_type) {
            (Transport::Udp4, HopType::Single) => self.gauges.udp4_sh,
            (Transport::Udp6, HopType::Single) => self.gauges.udp6_sh,
            (Transport::Udp4, HopType::Multi) => self.gauges.udp4_mh,
            (Transport::Udp6, HopType::Multi) => self.gauges.udp6_mh,
        };
        let count = self.ports.count(transport, hop_type);
        self.stats.set_gauge(gauge, count as u64);
    }
}

// ===== impl Interface =====

impl Interface {
    pub fn is_up(&self) -> bool {
        self.flags.contains(InterfaceFlags::UP)
    }

    pub fn is_p2p(&self) -> bool {
        self.flags.contains(InterfaceFlags::POINT_TO_POINT)
    }
}

// ===== helper functions =====

fn session_key(
    multihop: bool,
    sw_if_index: u32,
    local_addr: &IpAddr,
    peer_addr: &IpAddr,
) -> SessionKey {
    let sw_if_index = match multihop {
        true => MULTIHOP_SW_IF_INDEX,
        false => sw_if_index,
    };
    SessionKey::new(sw_if_index, local_addr, peer_addr)
}
