//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bifrost_utils::bfd::{HopType, Transport};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::graph::AdjHandle;

// Interface index stored in the key of multihop sessions.
pub const MULTIHOP_SW_IF_INDEX: u32 = u32::MAX;

// BFD UDP session key.
//
// Keys are compared field by field, so the canonical constructor must be
// used: it truncates the interface index to the 16 bits the key carries
// and maps IPv4-mapped IPv6 addresses back to IPv4, keeping lookups
// stable no matter how the addresses were originally expressed.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SessionKey {
    pub sw_if_index: u16,
    pub local_addr: IpAddr,
    pub peer_addr: IpAddr,
}

// BFD UDP session.
#[derive(Debug, new)]
pub struct UdpSession {
    pub key: SessionKey,
    pub adj: AdjHandle,
    pub hop_type: HopType,
    pub transport: Transport,
    pub bs_idx: u32,
    pub local_discr: u32,
    #[new(default)]
    pub counters: SessionCounters,
}

// Combined packet/byte counter. Updated through a shared reference so the
// datagram path never takes a lock for accounting.
#[derive(Debug, Default)]
pub struct CombinedCounter {
    packets: AtomicU64,
    bytes: AtomicU64,
}

// Per-session traffic counters.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub rx: CombinedCounter,
    pub rx_echo: CombinedCounter,
    pub tx: CombinedCounter,
    pub tx_echo: CombinedCounter,
}

// Transport session table.
#[derive(Debug, Default)]
pub struct Sessions {
    // Session state keyed by the state machine's dense index (1:1).
    sessions: HashMap<u32, UdpSession>,
    // Session binary tree keyed by BFD key (1:1).
    key_tree: BTreeMap<SessionKey, u32>,
}

// Outcome of an ingress session lookup. A nonzero Your Discriminator wins
// over the 4-tuple key.
#[derive(Debug, EnumAsInner, Eq, PartialEq)]
pub enum LookupResult {
    ByDisc(u32),
    ByKey(u32),
    Absent,
}

// ===== impl SessionKey =====

impl SessionKey {
    pub fn new(
        sw_if_index: u32,
        local_addr: &IpAddr,
        peer_addr: &IpAddr,
    ) -> SessionKey {
        SessionKey {
            sw_if_index: sw_if_index as u16,
            local_addr: local_addr.to_canonical(),
            peer_addr: peer_addr.to_canonical(),
        }
    }
}

// ===== impl CombinedCounter =====

impl CombinedCounter {
    pub fn increment(&self, bytes: u64) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64) {
        (
            self.packets.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

// ===== impl Sessions =====

impl Sessions {
    // Inserts a new session, failing on duplicate keys.
    pub(crate) fn insert(&mut self, sess: UdpSession) -> Result<(), Error> {
        if let Some(bs_idx) = self.key_tree.get(&sess.key) {
            return Err(Error::SessionExists(sess.key, *bs_idx));
        }
        self.key_tree.insert(sess.key, sess.bs_idx);
        self.sessions.insert(sess.bs_idx, sess);
        Ok(())
    }

    // Removes the session with the given key, if present.
    pub(crate) fn remove(&mut self, key: &SessionKey) -> Option<UdpSession> {
        let bs_idx = self.key_tree.remove(key)?;
        self.sessions.remove(&bs_idx)
    }

    // Returns the dense index of the session with the given key.
    pub fn lookup(&self, key: &SessionKey) -> Option<u32> {
        self.key_tree.get(key).copied()
    }

    // Returns a reference to the session with the given key.
    pub fn get_by_key(&self, key: &SessionKey) -> Option<&UdpSession> {
        self.lookup(key).map(|bs_idx| &self.sessions[&bs_idx])
    }

    // Returns a reference to the session with the given dense index.
    pub fn get_by_idx(&self, bs_idx: u32) -> Option<&UdpSession> {
        self.sessions.get(&bs_idx)
    }

    // Returns an iterator visiting all sessions.
    //
    // Sessions are ordered by their BFD keys.
    pub fn iter(&self) -> impl Iterator<Item = &'_ UdpSession> + '_ {
        self.key_tree.values().map(|bs_idx| &self.sessions[bs_idx])
    }
}
