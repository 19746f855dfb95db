//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use bifrost_utils::ip::AddressFamily;
use tracing::{debug, debug_span};

use crate::session::SessionKey;

// BFD UDP transport debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(&'a SessionKey, u32),
    SessionDelete(&'a SessionKey, u32),
    SessionForcedDelete(u32, u32),
    PortRegister(u16, AddressFamily),
    PortUnregister(u16, AddressFamily),
    EchoSourceSet(u32),
    EchoSourceUnset,
    InterfaceUpdate(&'a str, u32),
    InterfaceDelete(u32),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::SessionCreate(sess_key, bs_idx)
            | Debug::SessionDelete(sess_key, bs_idx) => {
                debug_span!("session", key = ?sess_key, %bs_idx).in_scope(
                    || {
                        debug!("{}", self);
                    },
                );
            }
            Debug::SessionForcedDelete(sw_if_index, bs_idx) => {
                debug_span!("session", %sw_if_index, %bs_idx).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::PortRegister(port, af) | Debug::PortUnregister(port, af) => {
                debug!(%port, %af, "{}", self);
            }
            Debug::EchoSourceSet(sw_if_index) => {
                debug!(%sw_if_index, "{}", self);
            }
            Debug::EchoSourceUnset => {
                debug!("{}", self);
            }
            Debug::InterfaceUpdate(ifname, sw_if_index) => {
                debug!(%ifname, %sw_if_index, "{}", self);
            }
            Debug::InterfaceDelete(sw_if_index) => {
                debug!(%sw_if_index, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => {
                write!(f, "session created")
            }
            Debug::SessionDelete(..) => {
                write!(f, "session deleted")
            }
            Debug::SessionForcedDelete(..) => {
                write!(f, "interface removal forces session deletion")
            }
            Debug::PortRegister(..) => {
                write!(f, "UDP destination port registered")
            }
            Debug::PortUnregister(..) => {
                write!(f, "UDP destination port unregistered")
            }
            Debug::EchoSourceSet(..) => {
                write!(f, "echo source interface set")
            }
            Debug::EchoSourceUnset => {
                write!(f, "echo source interface unset")
            }
            Debug::InterfaceUpdate(..) => {
                write!(f, "interface updated")
            }
            Debug::InterfaceDelete(..) => {
                write!(f, "interface deleted")
            }
        }
    }
}
