/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
use std::cmp::Ordering;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::{AddrParseError, PrefixLenError};
// These are part of our public API because of the conversion traits.
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::address_family::{IdentifyAddressFamily, IpAddressFamily};

//
// Type definitions
//

/// An IP prefix: a run of leading network bits with every bit after the
/// prefix length set to zero. Parsing rejects values with host bits set, so
/// an `IpPrefix` can't be confused with an interface address that happens to
/// carry a length.
///
/// Prefixes order IPv4 before IPv6, then by network address, then by length.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IpPrefix {
    V4(Ipv4Prefix),
    V6(Ipv6Prefix),
}

impl IdentifyAddressFamily for IpPrefix {
    fn address_family(&self) -> IpAddressFamily {
        match self {
            IpPrefix::V4(_) => IpAddressFamily::Ipv4,
            IpPrefix::V6(_) => IpAddressFamily::Ipv6,
        }
    }
}

impl IpPrefix {
    /// Whether `other` lies entirely inside this prefix. Prefixes of
    /// different families never contain each other.
    pub fn contains(&self, other: &IpPrefix) -> bool {
        use IpPrefix::*;
        match (self, other) {
            (V4(prefix), V4(other_prefix)) => prefix.contains(other_prefix),
            (V6(prefix), V6(other_prefix)) => prefix.contains(other_prefix),
            _ => false,
        }
    }

    pub fn network(&self) -> IpAddr {
        match self {
            IpPrefix::V4(v4) => IpAddr::V4(v4.network()),
            IpPrefix::V6(v6) => IpAddr::V6(v6.network()),
        }
    }

    /// Number of prefixes of length `subprefix_length` that tile this one.
    /// Returns None if the length is shorter than ours, longer than the
    /// address, or the count doesn't fit in a u128.
    pub fn subprefix_count(&self, subprefix_length: u8) -> Option<u128> {
        subprefix_count_for(
            self.prefix_length() as u8,
            subprefix_length,
            self.address_family().address_bits(),
        )
    }

    /// The `index`-th prefix of length `subprefix_length` inside this one,
    /// counting up from the network address.
    pub fn nth_subprefix(&self, subprefix_length: u8, index: u128) -> Option<Self> {
        match self {
            IpPrefix::V4(v4) => v4.nth_subprefix(subprefix_length, index).map(IpPrefix::V4),
            IpPrefix::V6(v6) => v6.nth_subprefix(subprefix_length, index).map(IpPrefix::V6),
        }
    }

    /// Inverse of [`IpPrefix::nth_subprefix`]: the position of `subprefix`
    /// among the prefixes of its own length inside this one.
    pub fn subprefix_index(&self, subprefix: &IpPrefix) -> Option<u128> {
        use IpPrefix::*;
        match (self, subprefix) {
            (V4(prefix), V4(sub)) => prefix.subprefix_index(sub),
            (V6(prefix), V6(sub)) => prefix.subprefix_index(sub),
            _ => None,
        }
    }
}

/// A representation of an IPv4 prefix. The bits after the end of the length of
/// the prefix are guaranteed to be zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Ipv4Prefix {
    prefix: Ipv4Net,
}

impl Ipv4Prefix {
    pub fn contains(&self, other: &Self) -> bool {
        self.prefix.contains(&other.prefix)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.prefix.network()
    }

    pub fn nth_subprefix(&self, subprefix_length: u8, index: u128) -> Option<Self> {
        let bits = nth_subprefix_bits(
            self.network().to_bits().into(),
            32,
            self.prefix.prefix_len(),
            subprefix_length,
            index,
        )?;
        let addr = Ipv4Addr::from_bits(u32::try_from(bits).ok()?);
        Ipv4Net::new(addr, subprefix_length)
            .ok()
            .map(|prefix| Self { prefix })
    }

    pub fn subprefix_index(&self, subprefix: &Self) -> Option<u128> {
        self.contains(subprefix).then(|| {
            subprefix_index_bits(
                self.network().to_bits().into(),
                32,
                subprefix.network().to_bits().into(),
                subprefix.prefix.prefix_len(),
            )
        })
    }

    pub fn into_inner(self) -> Ipv4Net {
        let Self { prefix } = self;
        prefix
    }
}

/// A representation of an IPv6 prefix. The bits after the end of the length of
/// the prefix are guaranteed to be zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Ipv6Prefix {
    prefix: Ipv6Net,
}

impl Ipv6Prefix {
    pub fn contains(&self, other: &Self) -> bool {
        self.prefix.contains(&other.prefix)
    }

    pub fn network(&self) -> Ipv6Addr {
        self.prefix.network()
    }

    pub fn nth_subprefix(&self, subprefix_length: u8, index: u128) -> Option<Self> {
        let bits = nth_subprefix_bits(
            self.network().to_bits(),
            128,
            self.prefix.prefix_len(),
            subprefix_length,
            index,
        )?;
        Ipv6Net::new(Ipv6Addr::from_bits(bits), subprefix_length)
            .ok()
            .map(|prefix| Self { prefix })
    }

    pub fn subprefix_index(&self, subprefix: &Self) -> Option<u128> {
        self.contains(subprefix).then(|| {
            subprefix_index_bits(
                self.network().to_bits(),
                128,
                subprefix.network().to_bits(),
                subprefix.prefix.prefix_len(),
            )
        })
    }

    pub fn into_inner(self) -> Ipv6Net {
        let Self { prefix } = self;
        prefix
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrefixError {
    #[error(
        "Prefix not in canonical representation (address bits after prefix must be set to zero)"
    )]
    NonCanonicalRepresentation,

    #[error("Parse error: {0}")]
    ParseError(#[from] AddrParseError),

    #[error("Prefix length error: {0}")]
    BadPrefixLength(#[from] PrefixLenError),
}

//
// Trait definitions
//

/// Basic common operations on a prefix
pub trait Prefix {
    fn prefix_length(&self) -> usize;

    /// Number of bits left over after the prefix.
    fn host_bits(&self) -> usize;
}

//
// Subprefix arithmetic, done on the address bits widened to u128 so both
// families share it. `width` is the address width of the family.
//

fn subprefix_count_for(prefix_length: u8, subprefix_length: u8, width: u8) -> Option<u128> {
    if subprefix_length < prefix_length || subprefix_length > width {
        return None;
    }
    1u128.checked_shl(u32::from(subprefix_length - prefix_length))
}

fn nth_subprefix_bits(
    network: u128,
    width: u8,
    prefix_length: u8,
    subprefix_length: u8,
    index: u128,
) -> Option<u128> {
    if subprefix_length < prefix_length || subprefix_length > width {
        return None;
    }
    let index_bits = u32::from(subprefix_length - prefix_length);
    // A shift of 128 only happens for ::/0 split into /128s, where every
    // index is in range.
    if index.checked_shr(index_bits).unwrap_or(0) != 0 {
        return None;
    }
    let offset = index
        .checked_shl(u32::from(width - subprefix_length))
        .unwrap_or(0);
    Some(network | offset)
}

// Callers must have checked containment.
fn subprefix_index_bits(
    network: u128,
    width: u8,
    subprefix_network: u128,
    subprefix_length: u8,
) -> u128 {
    (subprefix_network - network)
        .checked_shr(u32::from(width - subprefix_length))
        .unwrap_or(0)
}

//
// Implementations of our traits
//

impl Prefix for Ipv4Prefix {
    fn prefix_length(&self) -> usize {
        self.prefix.prefix_len() as usize
    }

    fn host_bits(&self) -> usize {
        32 - self.prefix_length()
    }
}

impl Prefix for Ipv6Prefix {
    fn prefix_length(&self) -> usize {
        self.prefix.prefix_len() as usize
    }

    fn host_bits(&self) -> usize {
        128 - self.prefix_length()
    }
}

impl Prefix for IpPrefix {
    fn prefix_length(&self) -> usize {
        match self {
            IpPrefix::V4(v4) => v4.prefix_length(),
            IpPrefix::V6(v6) => v6.prefix_length(),
        }
    }

    fn host_bits(&self) -> usize {
        match self {
            IpPrefix::V4(v4) => v4.host_bits(),
            IpPrefix::V6(v6) => v6.host_bits(),
        }
    }
}

// Other stdlib trait implementations

impl Ord for IpPrefix {
    fn cmp(&self, other: &Self) -> Ordering {
        use IpPrefix::*;
        match (self, other) {
            (V4(_), V6(_)) => Ordering::Less,
            (V6(_), V4(_)) => Ordering::Greater,
            (V4(p1), V4(p2)) => p1.cmp(p2),
            (V6(p1), V6(p2)) => p1.cmp(p2),
        }
    }
}

impl PartialOrd for IpPrefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for IpPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpPrefix::V4(ipv4_prefix) => ipv4_prefix.fmt(f),
            IpPrefix::V6(ipv6_prefix) => ipv6_prefix.fmt(f),
        }
    }
}

impl Display for Ipv4Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.prefix.fmt(f)
    }
}

impl Display for Ipv6Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.prefix.fmt(f)
    }
}

impl FromStr for IpPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IpNet::from_str(s)
            .map_err(PrefixError::from)
            .and_then(IpPrefix::try_from)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ipv4Net::from_str(s)
            .map_err(PrefixError::from)
            .and_then(Ipv4Prefix::try_from)
    }
}

impl FromStr for Ipv6Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ipv6Net::from_str(s)
            .map_err(PrefixError::from)
            .and_then(Ipv6Prefix::try_from)
    }
}

impl TryFrom<IpNet> for IpPrefix {
    type Error = PrefixError;

    fn try_from(value: IpNet) -> Result<Self, Self::Error> {
        match value {
            IpNet::V4(ipv4_net) => Ipv4Prefix::try_from(ipv4_net).map(Self::V4),
            IpNet::V6(ipv6_net) => Ipv6Prefix::try_from(ipv6_net).map(Self::V6),
        }
    }
}

impl TryFrom<Ipv4Net> for Ipv4Prefix {
    type Error = PrefixError;

    fn try_from(value: Ipv4Net) -> Result<Self, Self::Error> {
        let is_canonical_representation = value.addr() == value.network();
        is_canonical_representation
            .then_some(Self { prefix: value })
            .ok_or(PrefixError::NonCanonicalRepresentation)
    }
}

impl TryFrom<Ipv6Net> for Ipv6Prefix {
    type Error = PrefixError;

    fn try_from(value: Ipv6Net) -> Result<Self, Self::Error> {
        let is_canonical_representation = value.addr() == value.network();
        is_canonical_representation
            .then_some(Self { prefix: value })
            .ok_or(PrefixError::NonCanonicalRepresentation)
    }
}

impl TryFrom<(IpAddr, u8)> for IpPrefix {
    type Error = PrefixError;

    fn try_from(value: (IpAddr, u8)) -> Result<Self, Self::Error> {
        let (addr, prefix_length) = value;
        IpNet::new(addr, prefix_length)
            .map_err(PrefixError::from)
            .and_then(Self::try_from)
    }
}

impl From<IpPrefix> for IpNet {
    fn from(value: IpPrefix) -> Self {
        match value {
            IpPrefix::V4(v4) => IpNet::V4(v4.into_inner()),
            IpPrefix::V6(v6) => IpNet::V6(v6.into_inner()),
        }
    }
}

// Prefixes travel through configuration and node records as CIDR strings.

impl Serialize for IpPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
