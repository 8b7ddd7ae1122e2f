// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Peer hardware addresses.

use std::fmt;
use std::str::FromStr;

/// A 6-byte Bluetooth device address in its in-memory (little-endian) layout.
///
/// The kernel hands addresses over least-significant octet first; the text
/// form prints them most-significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    /// Wrap raw in-memory address bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw in-memory bytes.
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Error parsing an address from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid Bluetooth address: {0}")]
pub struct ParseAddressError(String);

impl FromStr for PeerAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split(':').collect();
        if octets.len() != 6 {
            return Err(ParseAddressError(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, octet) in octets.iter().enumerate() {
            if octet.len() != 2 {
                return Err(ParseAddressError(s.to_string()));
            }
            bytes[5 - i] =
                u8::from_str_radix(octet, 16).map_err(|_| ParseAddressError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl From<bluer::Address> for PeerAddress {
    fn from(addr: bluer::Address) -> Self {
        let mut bytes = addr.0;
        bytes.reverse();
        Self(bytes)
    }
}

impl From<PeerAddress> for bluer::Address {
    fn from(addr: PeerAddress) -> Self {
        let mut bytes = addr.0;
        bytes.reverse();
        bluer::Address::new(bytes)
    }
}
