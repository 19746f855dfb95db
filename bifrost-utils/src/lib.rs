//
// Copyright (c) The Bifrost Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bfd;
pub mod bytes;
pub mod ip;
pub mod southbound;
