//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bifrost_utils::bfd::{ErrorKind, Transport};
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::SessionKey;

// BFD UDP transport errors.
//
// These are the admission-time failures surfaced to the management layer.
#[derive(Debug)]
pub enum Error {
    InvalidDetectMult(u8),
    InvalidMinTx(u32),
    AddressFamilyMismatch(IpAddr, IpAddr),
    InterfaceNotFound(u32),
    SessionExists(SessionKey, u32),
    SessionNotFound(SessionKey),
    SessionIdxNotFound(u32),
    SessionPoolExhausted(Transport),
    NoEchoSource,
    AuthError,
}

// Per-datagram classification counted on the ingress nodes.
//
// Every received datagram produces exactly one of these. The leading
// entries mirror `bfd::ErrorKind` one to one so that verdicts coming from
// the state machine can be counted without translation.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum UdpError {
    None = 0,
    Bad = 1,
    Length = 2,
    NoSession = 3,
    FailedVerification = 4,
    SrcMismatch = 5,
    DstMismatch = 6,
    Ttl = 7,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::InvalidDetectMult(detect_mult) => {
                warn!(%detect_mult, "{}", self);
            }
            Error::InvalidMinTx(min_tx) => {
                warn!(%min_tx, "{}", self);
            }
            Error::AddressFamilyMismatch(local, peer) => {
                warn!(%local, %peer, "{}", self);
            }
            Error::InterfaceNotFound(sw_if_index) => {
                warn!(%sw_if_index, "{}", self);
            }
            Error::SessionExists(sess_key, bs_idx) => {
                warn!(?sess_key, %bs_idx, "{}", self);
            }
            Error::SessionNotFound(sess_key) => {
                warn!(?sess_key, "{}", self);
            }
            Error::SessionIdxNotFound(bs_idx) => {
                warn!(%bs_idx, "{}", self);
            }
            Error::SessionPoolExhausted(transport) => {
                warn!(%transport, "{}", self);
            }
            Error::NoEchoSource => {
                warn!("{}", self);
            }
            Error::AuthError => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidDetectMult(..) => {
                write!(f, "invalid detection multiplier")
            }
            Error::InvalidMinTx(..) => {
                write!(f, "invalid desired minimum Tx interval")
            }
            Error::AddressFamilyMismatch(..) => {
                write!(f, "local and peer address family mismatch")
            }
            Error::InterfaceNotFound(..) => {
                write!(f, "interface not found")
            }
            Error::SessionExists(..) => {
                write!(f, "duplicate session")
            }
            Error::SessionNotFound(..) => {
                write!(f, "session not found")
            }
            Error::SessionIdxNotFound(..) => {
                write!(f, "session index not found")
            }
            Error::SessionPoolExhausted(..) => {
                write!(f, "no free session slots")
            }
            Error::NoEchoSource => {
                write!(f, "no usable echo source address")
            }
            Error::AuthError => {
                write!(f, "failed to activate authentication")
            }
        }
    }
}

impl std::error::Error for Error {}

// ===== impl UdpError =====

impl UdpError {
    pub const COUNT: usize = 8;
}

impl From<ErrorKind> for UdpError {
    fn from(error: ErrorKind) -> UdpError {
        match error {
            ErrorKind::None => UdpError::None,
            ErrorKind::Bad => UdpError::Bad,
        }
    }
}
