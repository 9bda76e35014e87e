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
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use forge_network::ip::{IdentifyAddressFamily, IpAddressFamily, IpPrefix};
use num_bigint_dig::BigUint;

use crate::address_count::addresses_in_prefix;
use crate::config::{IpamConfig, PoolDef};
use crate::error::{AllocateToNodeError, AllocationFailure, AllocationStage};
use crate::ledger::{Ledger, NodeAllocations};
use crate::node::{NodeIpamSpec, PoolAllocation, PoolRequest};
use crate::pool::{Pool, PoolStats};
use crate::IpamError;

/// PoolAllocator hands out blocks from named pools to nodes.
///
/// All pools, the per-node ledger and the readiness flag live behind a
/// single lock. Every call that changes any of them holds the write lock
/// from start to finish, so reconciliation passes for different nodes never
/// interleave. Nothing under the lock does I/O.
#[derive(Debug, Default)]
pub struct PoolAllocator {
    state: RwLock<AllocatorState>,
}

#[derive(Debug, Default)]
struct AllocatorState {
    pools: BTreeMap<String, Pool>,
    ledger: Ledger,
    ready: bool,
}

impl PoolAllocator {
    /// An allocator with no pools that refuses to allocate until
    /// [`PoolAllocator::restore_finished`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every pool in `config`. The allocator is not ready yet: callers
    /// are expected to replay existing node records first.
    pub fn from_config(config: &IpamConfig) -> Result<Self, IpamError> {
        let allocator = Self::new();
        for (name, def) in &config.pools {
            allocator.upsert_pool(name, def)?;
        }
        Ok(allocator)
    }

    fn read(&self) -> RwLockReadGuard<'_, AllocatorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AllocatorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark pool configuration as fully loaded. Allocation is refused until
    /// this is called.
    pub fn restore_finished(&self) {
        self.write().ready = true;
        tracing::info!("IPAM pool allocator is ready");
    }

    pub fn is_ready(&self) -> bool {
        self.read().ready
    }

    /// Create or replace the pool `name`. Its ranges may not overlap each
    /// other or the ranges of any other pool.
    ///
    /// When replacing, blocks nodes already hold from the pool are occupied
    /// again in the new ranges. Held blocks that no longer fit any range stay
    /// with their node but are logged, and are never handed out again.
    pub fn upsert_pool(&self, name: &str, def: &PoolDef) -> Result<(), IpamError> {
        let mut pool = Pool::from_def(name, def)?;

        let mut state = self.write();
        if let Some((first, second)) = state
            .pools
            .values()
            .filter(|other| other.name() != name)
            .find_map(|other| pool.overlap_with(other))
        {
            return Err(IpamError::OverlappingRanges { first, second });
        }
        for (node, block) in state.ledger.blocks_in_pool(name) {
            if let Err(error) = pool.occupy(block) {
                tracing::warn!(
                    node,
                    pool = name,
                    %block,
                    %error,
                    "Block held by node does not fit the updated pool"
                );
            }
        }
        let replaced = state.pools.insert(name.to_string(), pool).is_some();

        tracing::info!(
            pool = name,
            ipv4_ranges = def.ipv4.len(),
            ipv6_ranges = def.ipv6.len(),
            replaced,
            "Upserted IPAM pool"
        );
        Ok(())
    }

    /// Remove the pool `name`. Refused while any node holds blocks from it.
    pub fn delete_pool(&self, name: &str) -> Result<(), IpamError> {
        let mut state = self.write();
        if state.ledger.pool_in_use(name) {
            return Err(IpamError::PoolInUse(name.to_string()));
        }
        state
            .pools
            .remove(name)
            .ok_or_else(|| IpamError::UnknownPool(name.to_string()))?;
        tracing::info!(pool = name, "Deleted IPAM pool");
        Ok(())
    }

    /// Reconcile a node's demand with what it holds.
    ///
    /// First the blocks the node reports as allocated are occupied, unless
    /// the ledger already has them for this node. A reported block that is
    /// in use by someone else fails with `AlreadyAllocated` and is not
    /// recorded for this node. Then, for every requested pool and family,
    /// new blocks are allocated until the held addresses cover the demand.
    ///
    /// Failures don't stop the pass: every failing (pool, family) is
    /// collected into the returned error, and whatever was allocated stays
    /// allocated.
    pub fn allocate_to_node(&self, node: &NodeIpamSpec) -> Result<(), AllocateToNodeError> {
        let mut state = self.write();
        if !state.ready {
            return Err(AllocateToNodeError::NotReady);
        }

        let mut failures = Vec::new();
        for allocation in &node.allocated {
            state.occupy_reported(&node.name, allocation, &mut failures);
        }
        for request in &node.requested {
            state.satisfy_demand(&node.name, request, &mut failures);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AllocateToNodeError::Failures(failures))
        }
    }

    /// Write the ledger for `node` into its `allocated` field: one entry per
    /// pool in name order, IPv4 blocks before IPv6, each ascending.
    pub fn populate_node_spec(&self, node: &mut NodeIpamSpec) {
        let state = self.read();
        node.allocated = state
            .ledger
            .node(&node.name)
            .map(|allocations| {
                allocations
                    .iter()
                    .filter(|(_, blocks)| !blocks.is_empty())
                    .map(|(pool, blocks)| PoolAllocation {
                        pool: pool.to_string(),
                        cidrs: blocks.iter().map(ToString::to_string).collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();
    }

    /// Give every block held by `node` back to its pool and forget the node.
    pub fn release_node(&self, node: &str) {
        let mut state = self.write();
        let AllocatorState { pools, ledger, .. } = &mut *state;
        let Some(allocations) = ledger.remove_node(node) else {
            return;
        };

        for (pool_name, blocks) in allocations.iter() {
            let Some(pool) = pools.get_mut(pool_name) else {
                continue;
            };
            for block in blocks.iter() {
                if let Err(error) = pool.release(block) {
                    tracing::warn!(node, pool = pool_name, %block, %error, "Could not release block");
                }
            }
        }
        tracing::info!(node, "Released IPAM allocations of node");
    }

    pub fn node_allocations(&self, node: &str) -> Option<NodeAllocations> {
        self.read().ledger.node(node).cloned()
    }

    pub fn pool_stats(&self, pool: &str) -> Option<PoolStats> {
        self.read().pools.get(pool).map(Pool::stats)
    }
}

impl AllocatorState {
    fn occupy_reported(
        &mut self,
        node: &str,
        allocation: &PoolAllocation,
        failures: &mut Vec<AllocationFailure>,
    ) {
        let pool_name = allocation.pool.as_str();
        for cidr in &allocation.cidrs {
            let block = match cidr.parse::<IpPrefix>() {
                Ok(block) => block,
                Err(source) => {
                    failures.push(AllocationFailure::new(
                        AllocationStage::Occupy,
                        node,
                        pool_name,
                        None,
                        IpamError::InvalidPrefix {
                            value: cidr.clone(),
                            source,
                        },
                    ));
                    continue;
                }
            };

            if let Err(error) = self.occupy_block(node, pool_name, block) {
                if matches!(error, IpamError::AlreadyAllocated(_)) {
                    tracing::warn!(
                        node,
                        pool = pool_name,
                        %block,
                        "Block reported by node is allocated to someone else"
                    );
                }
                failures.push(AllocationFailure::new(
                    AllocationStage::Occupy,
                    node,
                    pool_name,
                    Some(block.address_family()),
                    error,
                ));
            }
        }
    }

    fn occupy_block(&mut self, node: &str, pool_name: &str, block: IpPrefix) -> Result<(), IpamError> {
        let pool = self
            .pools
            .get_mut(pool_name)
            .ok_or_else(|| IpamError::UnknownPool(pool_name.to_string()))?;
        if self.ledger.holds(node, pool_name, &block) {
            return Ok(());
        }
        pool.occupy(&block)?;
        self.ledger.record(node, pool_name, block);
        tracing::debug!(node, pool = pool_name, %block, "Occupied block");
        Ok(())
    }

    fn satisfy_demand(
        &mut self,
        node: &str,
        request: &PoolRequest,
        failures: &mut Vec<AllocationFailure>,
    ) {
        let pool_name = request.pool.as_str();
        if !self.pools.contains_key(pool_name) {
            failures.push(AllocationFailure::new(
                AllocationStage::Allocate,
                node,
                pool_name,
                None,
                IpamError::UnknownPool(pool_name.to_string()),
            ));
            return;
        }

        for family in IpAddressFamily::ALL {
            let needed = request.needed.for_family(family);
            if needed == 0 {
                continue;
            }
            if let Err(error) = self.allocate_family(node, pool_name, family, needed) {
                failures.push(AllocationFailure::new(
                    AllocationStage::Allocate,
                    node,
                    pool_name,
                    Some(family),
                    error,
                ));
            }
        }
    }

    // Blocks allocated before running out stay with the node.
    fn allocate_family(
        &mut self,
        node: &str,
        pool_name: &str,
        family: IpAddressFamily,
        needed: u64,
    ) -> Result<(), IpamError> {
        let pool = self
            .pools
            .get_mut(pool_name)
            .ok_or_else(|| IpamError::UnknownPool(pool_name.to_string()))?;

        let needed = BigUint::from(needed);
        let mut held = self.ledger.held_addresses(node, pool_name, family);
        while held < needed {
            let block = pool.allocate_next(family)?;
            held = held + addresses_in_prefix(block);
            self.ledger.record(node, pool_name, block);
            tracing::debug!(node, pool = pool_name, %family, %block, "Allocated block");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::config::RangeDef;

    fn range(cidr: &str, mask_size: u8) -> RangeDef {
        RangeDef {
            cidr: IpPrefix::from_str(cidr).unwrap(),
            mask_size,
        }
    }

    fn ready_allocator(pools: &[(&str, PoolDef)]) -> PoolAllocator {
        let allocator = PoolAllocator::new();
        for (name, def) in pools {
            allocator.upsert_pool(name, def).unwrap();
        }
        allocator.restore_finished();
        allocator
    }

    fn dual_stack() -> PoolDef {
        PoolDef {
            ipv4: vec![range("192.168.0.0/16", 24)],
            ipv6: vec![range("f00d::/80", 96)],
        }
    }

    fn allocated(allocator: &PoolAllocator, node: &NodeIpamSpec) -> Vec<PoolAllocation> {
        let mut node = node.clone();
        allocator.populate_node_spec(&mut node);
        node.allocated
    }

    #[test]
    fn test_not_ready_refuses_without_mutation() {
        let allocator = PoolAllocator::new();
        allocator.upsert_pool("default", &dual_stack()).unwrap();
        assert!(!allocator.is_ready());

        let node = NodeIpamSpec::new("node1")
            .with_request("default", 10, 10)
            .with_allocated("default", ["192.168.5.0/24"]);
        let err = allocator.allocate_to_node(&node).unwrap_err();
        assert!(err.is_not_ready());
        assert!(allocator.node_allocations("node1").is_none());
        assert_eq!(allocator.pool_stats("default").unwrap().ipv4.used, 0);
    }

    #[test]
    fn test_demand_spanning_several_blocks() {
        let allocator = ready_allocator(&[("default", dual_stack())]);
        // 254 usable addresses per /24
        let node = NodeIpamSpec::new("node1").with_request("default", 300, 0);
        allocator.allocate_to_node(&node).unwrap();
        assert_eq!(
            allocated(&allocator, &node),
            [PoolAllocation {
                pool: "default".to_string(),
                cidrs: vec!["192.168.0.0/24".to_string(), "192.168.1.0/24".to_string()],
            }]
        );
    }

    #[test]
    fn test_exhaustion_keeps_partial_allocation_in_family() {
        let pool = PoolDef {
            ipv4: vec![range("10.0.0.0/27", 28)],
            ipv6: vec![],
        };
        let allocator = ready_allocator(&[("small", pool)]);
        // Two /28s give 28 addresses.
        let node = NodeIpamSpec::new("node1").with_request("small", 100, 0);
        let err = allocator.allocate_to_node(&node).unwrap_err();
        assert!(matches!(err.failures()[0].source, IpamError::PoolEmpty));
        assert_eq!(
            allocated(&allocator, &node)[0].cidrs,
            ["10.0.0.0/28", "10.0.0.16/28"]
        );
    }

    #[test]
    fn test_unknown_pools_are_reported() {
        let allocator = ready_allocator(&[("default", dual_stack())]);
        let node = NodeIpamSpec::new("node1")
            .with_request("missing", 10, 10)
            .with_allocated("gone", ["10.0.0.0/24"]);
        let err = allocator.allocate_to_node(&node).unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].stage, AllocationStage::Occupy);
        assert_eq!(failures[0].family, Some(IpAddressFamily::Ipv4));
        assert!(matches!(failures[0].source, IpamError::UnknownPool(_)));
        assert_eq!(failures[1].stage, AllocationStage::Allocate);
        assert_eq!(failures[1].family, None);
    }

    #[test]
    fn test_invalid_and_foreign_reported_cidrs() {
        let allocator = ready_allocator(&[("default", dual_stack())]);
        let node = NodeIpamSpec::new("node1").with_allocated(
            "default",
            ["not-a-cidr", "10.0.0.0/24", "192.168.0.0/25", "192.168.3.0/24"],
        );
        let err = allocator.allocate_to_node(&node).unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[0].source, IpamError::InvalidPrefix { .. }));
        assert!(matches!(failures[1].source, IpamError::OutOfRange(_)));
        assert!(matches!(failures[2].source, IpamError::OutOfRange(_)));
        // The valid one is still taken.
        assert_eq!(allocated(&allocator, &node)[0].cidrs, ["192.168.3.0/24"]);
    }

    #[test]
    fn test_release_node_returns_blocks() {
        let allocator = ready_allocator(&[("default", dual_stack())]);
        let node1 = NodeIpamSpec::new("node1").with_request("default", 10, 10);
        allocator.allocate_to_node(&node1).unwrap();
        assert_eq!(allocator.pool_stats("default").unwrap().ipv4.used, 1);

        allocator.release_node("node1");
        assert!(allocator.node_allocations("node1").is_none());
        let stats = allocator.pool_stats("default").unwrap();
        assert_eq!((stats.ipv4.used, stats.ipv6.used), (0, 0));

        // The freed blocks are the next ones out.
        let node2 = NodeIpamSpec::new("node2").with_request("default", 10, 10);
        allocator.allocate_to_node(&node2).unwrap();
        assert_eq!(
            allocated(&allocator, &node2)[0].cidrs,
            ["192.168.0.0/24", "f00d::/96"]
        );

        // Unknown nodes are a no-op.
        allocator.release_node("node1");
    }

    #[test]
    fn test_upsert_pool_keeps_held_blocks_occupied() {
        let allocator = ready_allocator(&[("default", dual_stack())]);
        let node1 = NodeIpamSpec::new("node1").with_request("default", 10, 0);
        allocator.allocate_to_node(&node1).unwrap();

        // Grow the pool with a second range.
        let grown = PoolDef {
            ipv4: vec![range("192.168.0.0/16", 24), range("172.16.0.0/16", 24)],
            ipv6: vec![range("f00d::/80", 96)],
        };
        allocator.upsert_pool("default", &grown).unwrap();
        let stats = allocator.pool_stats("default").unwrap();
        assert_eq!(stats.ipv4.capacity, 512);
        assert_eq!(stats.ipv4.used, 1);

        let node2 = NodeIpamSpec::new("node2").with_request("default", 10, 0);
        allocator.allocate_to_node(&node2).unwrap();
        assert_eq!(allocated(&allocator, &node2)[0].cidrs, ["192.168.1.0/24"]);
    }

    #[test]
    fn test_upsert_pool_rejects_bad_definition() {
        let allocator = PoolAllocator::new();
        let bad = PoolDef {
            ipv4: vec![range("192.168.0.0/16", 8)],
            ipv6: vec![],
        };
        assert!(matches!(
            allocator.upsert_pool("default", &bad),
            Err(IpamError::InvalidBlockSize { .. })
        ));
        assert!(allocator.pool_stats("default").is_none());
    }

    #[test]
    fn test_upsert_pool_rejects_overlapping_ranges() {
        let allocator = PoolAllocator::new();
        let overlapping = PoolDef {
            ipv4: vec![range("10.0.0.0/24", 25), range("10.0.0.0/23", 25)],
            ipv6: vec![],
        };
        assert!(matches!(
            allocator.upsert_pool("default", &overlapping),
            Err(IpamError::OverlappingRanges { .. })
        ));
        assert!(allocator.pool_stats("default").is_none());

        // With the overlap removed, three nodes get three distinct blocks.
        let disjoint = PoolDef {
            ipv4: vec![range("10.0.0.0/24", 25), range("10.0.2.0/23", 25)],
            ipv6: vec![],
        };
        allocator.upsert_pool("default", &disjoint).unwrap();
        allocator.restore_finished();
        let mut seen = Vec::new();
        for name in ["n0", "n1", "n2"] {
            let node = NodeIpamSpec::new(name).with_request("default", 100, 0);
            allocator.allocate_to_node(&node).unwrap();
            seen.extend(allocated(&allocator, &node)[0].cidrs.clone());
        }
        assert_eq!(seen, ["10.0.0.0/25", "10.0.0.128/25", "10.0.2.0/25"]);
    }

    #[test]
    fn test_upsert_pool_rejects_overlap_with_other_pool() {
        let allocator = ready_allocator(&[("default", dual_stack())]);
        let inside = PoolDef {
            ipv4: vec![range("192.168.128.0/20", 24)],
            ipv6: vec![],
        };
        match allocator.upsert_pool("other", &inside) {
            Err(IpamError::OverlappingRanges { first, second }) => {
                assert_eq!(first.to_string(), "192.168.128.0/20");
                assert_eq!(second.to_string(), "192.168.0.0/16");
            }
            other => panic!("expected OverlappingRanges, got {other:?}"),
        }
        assert!(allocator.pool_stats("other").is_none());

        // Replacing a pool may reuse its own ranges.
        allocator.upsert_pool("default", &dual_stack()).unwrap();
    }

    #[test]
    fn test_from_config_rejects_overlapping_pools() {
        let mut config = IpamConfig::default();
        config.pools.insert("a".to_string(), dual_stack());
        config.pools.insert("b".to_string(), dual_stack());
        assert!(matches!(
            PoolAllocator::from_config(&config),
            Err(IpamError::OverlappingRanges { .. })
        ));
    }

    #[test]
    fn test_delete_pool() {
        let spare = PoolDef {
            ipv4: vec![range("172.16.0.0/16", 24)],
            ipv6: vec![],
        };
        let allocator = ready_allocator(&[("default", dual_stack()), ("spare", spare)]);
        let node = NodeIpamSpec::new("node1").with_request("default", 1, 0);
        allocator.allocate_to_node(&node).unwrap();

        assert!(matches!(
            allocator.delete_pool("default"),
            Err(IpamError::PoolInUse(_))
        ));
        allocator.delete_pool("spare").unwrap();
        assert!(matches!(
            allocator.delete_pool("spare"),
            Err(IpamError::UnknownPool(_))
        ));

        allocator.release_node("node1");
        allocator.delete_pool("default").unwrap();
    }

    #[test]
    fn test_from_config() {
        let mut config = IpamConfig::default();
        config.pools.insert("default".to_string(), dual_stack());
        let allocator = PoolAllocator::from_config(&config).unwrap();
        assert!(!allocator.is_ready());
        assert_eq!(
            allocator.pool_stats("default").unwrap().ipv6.capacity,
            1 << 16
        );
        assert!(allocator.pool_stats("other").is_none());
    }
}
