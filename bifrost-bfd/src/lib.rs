//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod echo;
pub mod error;
pub mod graph;
pub mod ingress;
pub mod machine;
pub mod master;
pub mod network;
pub mod packet;
pub mod session;
pub mod southbound;
