// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Crypto
//!
//! Hash primitives shared by the host connector crates. The PCR replay
//! engine and the quote digest computation both go through
//! [`HashAlgorithm`], so the digest width and the hash function of a PCR
//! bank always come from one place.

#[macro_use]
extern crate strum;

mod algorithms;
pub use algorithms::*;
