//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use bifrost_utils::bfd::{ErrorKind, Transport};

use crate::error::Error;
use crate::graph::Buffer;
use crate::packet::Packet;

// Contract with the BFD control state machine.
//
// The state machine owns the session pool: it hands out dense indices
// (`bs_idx`), assigns local discriminators, runs the 3-way handshake and
// Poll/Final negotiation, and drives detection-time expiry from its own
// timer wheel. The transport never inspects any of that state; all calls
// below are made with the BFD lock held.
pub trait StateMachine: std::fmt::Debug {
    // Allocates a session of the given transport from the pool. Returns
    // `None` when the pool is exhausted.
    fn get_session(&mut self, transport: Transport) -> Option<u32>;

    // Returns a session to the pool.
    fn put_session(&mut self, bs_idx: u32);

    // Returns the local discriminator assigned to the session.
    fn local_discr(&self, bs_idx: u32) -> u32;

    // Looks up a session by its local discriminator.
    fn find_by_disc(&self, discr: u32) -> Option<u32>;

    // Applies the timing parameters to the session.
    fn set_params(
        &mut self,
        bs_idx: u32,
        desired_min_tx_us: u32,
        required_min_rx_us: u32,
        detect_mult: u8,
    ) -> Result<(), Error>;

    fn start(&mut self, bs_idx: u32);

    fn stop(&mut self, bs_idx: u32);

    // Sets or clears the session's administrative-down flag.
    fn set_flags(&mut self, bs_idx: u32, admin_up: bool);

    // Protocol-independent validation of a received control packet:
    // version, minimum length, detection multiplier, discriminators,
    // reserved-bits policy.
    fn verify_pkt_common(&self, pkt: &Packet) -> ErrorKind;

    // Verifies the authentication section of a received control packet.
    fn verify_pkt_auth(
        &self,
        pkt: &Packet,
        payload: &[u8],
        bs_idx: u32,
    ) -> bool;

    // Consumes a validated control packet, updating session state.
    fn consume_pkt(&mut self, pkt: &Packet, bs_idx: u32) -> ErrorKind;

    // Identifies a received echo packet by the cookie embedded in its
    // payload. Returns the owning session, or `None` if the packet was
    // not originated locally.
    fn consume_echo(&mut self, buffer: &Buffer) -> Option<u32>;

    // Writes a control frame with the Final bit set into an empty buffer.
    fn init_final_control_frame(&mut self, buffer: &mut Buffer, bs_idx: u32);

    fn auth_activate(
        &mut self,
        bs_idx: u32,
        conf_key_id: u32,
        key_id: u8,
        is_delayed: bool,
    ) -> Result<(), Error>;

    fn auth_deactivate(
        &mut self,
        bs_idx: u32,
        is_delayed: bool,
    ) -> Result<(), Error>;
}
