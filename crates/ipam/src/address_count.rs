/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
use forge_network::ip::{IdentifyAddressFamily, IpAddressFamily, IpPrefix, Prefix};
use num_bigint_dig::BigUint;

/// Number of usable addresses in `prefix`.
///
/// IPv4 blocks lose their network and broadcast addresses, so a /24 counts
/// 254 and a /31 or /32 counts 0. IPv6 blocks count every address. An unset
/// prefix counts 0.
///
/// Always computed with arbitrary precision: an IPv6 block can have more
/// than 64 host bits.
pub fn addresses_in_prefix<P: Into<Option<IpPrefix>>>(prefix: P) -> BigUint {
    let Some(prefix) = prefix.into() else {
        return BigUint::from(0u32);
    };

    let total = BigUint::from(1u32) << prefix.host_bits();
    match prefix.address_family() {
        IpAddressFamily::Ipv4 => {
            let reserved = BigUint::from(2u32);
            if total > reserved {
                total - reserved
            } else {
                BigUint::from(0u32)
            }
        }
        IpAddressFamily::Ipv6 => total,
    }
}

/// Sum of [`addresses_in_prefix`] over a set of blocks.
pub fn addresses_in_prefixes<'a, I>(blocks: I) -> BigUint
where
    I: IntoIterator<Item = &'a IpPrefix>,
{
    blocks
        .into_iter()
        .fold(BigUint::from(0u32), |total, block| {
            total + addresses_in_prefix(*block)
        })
}
