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

//! The IPAM part of a node resource, as read from and written back to the
//! cluster API.

use forge_network::ip::IpAddressFamily;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIpamSpec {
    pub name: String,
    /// Pools the node wants addresses from, and how many.
    #[serde(default)]
    pub requested: Vec<PoolRequest>,
    /// Blocks the node holds, as last written by the allocator. On a cold
    /// start this is what the allocator rebuilds its state from.
    #[serde(default)]
    pub allocated: Vec<PoolAllocation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRequest {
    pub pool: String,
    #[serde(default)]
    pub needed: PoolDemand,
}

/// Number of addresses wanted from a pool, per family.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDemand {
    #[serde(default)]
    pub ipv4_addrs: u64,
    #[serde(default)]
    pub ipv6_addrs: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAllocation {
    pub pool: String,
    /// Kept as strings: whatever the node reports is validated when it is
    /// re-occupied, not when the record is decoded.
    #[serde(default)]
    pub cidrs: Vec<String>,
}

impl NodeIpamSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_request(mut self, pool: impl Into<String>, ipv4_addrs: u64, ipv6_addrs: u64) -> Self {
        self.requested.push(PoolRequest {
            pool: pool.into(),
            needed: PoolDemand {
                ipv4_addrs,
                ipv6_addrs,
            },
        });
        self
    }

    pub fn with_allocated<I, S>(mut self, pool: impl Into<String>, cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allocated.push(PoolAllocation {
            pool: pool.into(),
            cidrs: cidrs.into_iter().map(Into::into).collect(),
        });
        self
    }
}

impl PoolDemand {
    pub fn for_family(&self, family: IpAddressFamily) -> u64 {
        match family {
            IpAddressFamily::Ipv4 => self.ipv4_addrs,
            IpAddressFamily::Ipv6 => self.ipv6_addrs,
        }
    }
}
