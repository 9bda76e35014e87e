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
use std::collections::{BTreeMap, BTreeSet, HashMap};

use forge_network::ip::{IdentifyAddressFamily, IpAddressFamily, IpPrefix};
use num_bigint_dig::BigUint;

use crate::address_count::addresses_in_prefixes;

/// The blocks a node holds from a single pool, per family.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolBlocks {
    ipv4: BTreeSet<IpPrefix>,
    ipv6: BTreeSet<IpPrefix>,
}

impl PoolBlocks {
    pub fn family(&self, family: IpAddressFamily) -> &BTreeSet<IpPrefix> {
        match family {
            IpAddressFamily::Ipv4 => &self.ipv4,
            IpAddressFamily::Ipv6 => &self.ipv6,
        }
    }

    fn family_mut(&mut self, family: IpAddressFamily) -> &mut BTreeSet<IpPrefix> {
        match family {
            IpAddressFamily::Ipv4 => &mut self.ipv4,
            IpAddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    pub fn contains(&self, block: &IpPrefix) -> bool {
        self.family(block.address_family()).contains(block)
    }

    pub fn insert(&mut self, block: IpPrefix) -> bool {
        self.family_mut(block.address_family()).insert(block)
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    /// All blocks, IPv4 first, each family in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &IpPrefix> {
        self.ipv4.iter().chain(self.ipv6.iter())
    }

    pub fn held_addresses(&self, family: IpAddressFamily) -> BigUint {
        addresses_in_prefixes(self.family(family))
    }
}

/// Everything one node holds, keyed by pool name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeAllocations {
    pools: BTreeMap<String, PoolBlocks>,
}

impl NodeAllocations {
    pub fn pool(&self, pool: &str) -> Option<&PoolBlocks> {
        self.pools.get(pool)
    }

    /// Pools in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PoolBlocks)> {
        self.pools.iter().map(|(name, blocks)| (name.as_str(), blocks))
    }
}

/// Per-node record of which blocks are held from which pool.
#[derive(Debug, Default)]
pub struct Ledger {
    nodes: HashMap<String, NodeAllocations>,
}

impl Ledger {
    pub fn node(&self, node: &str) -> Option<&NodeAllocations> {
        self.nodes.get(node)
    }

    pub fn holds(&self, node: &str, pool: &str, block: &IpPrefix) -> bool {
        self.node(node)
            .and_then(|allocations| allocations.pool(pool))
            .is_some_and(|blocks| blocks.contains(block))
    }

    /// Record that `node` holds `block` from `pool`, creating the node's
    /// entry on first use.
    pub fn record(&mut self, node: &str, pool: &str, block: IpPrefix) -> bool {
        self.nodes
            .entry(node.to_string())
            .or_default()
            .pools
            .entry(pool.to_string())
            .or_default()
            .insert(block)
    }

    pub fn held_addresses(&self, node: &str, pool: &str, family: IpAddressFamily) -> BigUint {
        self.node(node)
            .and_then(|allocations| allocations.pool(pool))
            .map(|blocks| blocks.held_addresses(family))
            .unwrap_or_else(|| BigUint::from(0u32))
    }

    pub fn remove_node(&mut self, node: &str) -> Option<NodeAllocations> {
        self.nodes.remove(node)
    }

    pub fn pool_in_use(&self, pool: &str) -> bool {
        self.nodes.values().any(|allocations| {
            allocations
                .pool(pool)
                .is_some_and(|blocks| !blocks.is_empty())
        })
    }

    /// Every (node, block) pair held from `pool`.
    pub fn blocks_in_pool<'a>(
        &'a self,
        pool: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a IpPrefix)> + 'a {
        self.nodes.iter().flat_map(move |(node, allocations)| {
            allocations
                .pool(pool)
                .into_iter()
                .flat_map(PoolBlocks::iter)
                .map(move |block| (node.as_str(), block))
        })
    }
}
