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

// tests/concurrency.rs
// Many workers reconciling different nodes against the same pools at once.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

use carbide_ipam::{IpamError, NodeIpamSpec, PoolAllocator, PoolDef, RangeDef};
use forge_network::ip::IpPrefix;

const WORKERS: usize = 8;
const NODES_PER_WORKER: usize = 8;

fn shared_allocator() -> Arc<PoolAllocator> {
    let allocator = PoolAllocator::new();
    allocator
        .upsert_pool(
            "default",
            &PoolDef {
                ipv4: vec![RangeDef {
                    cidr: IpPrefix::from_str("10.0.0.0/18").unwrap(),
                    mask_size: 26,
                }],
                ipv6: vec![RangeDef {
                    cidr: IpPrefix::from_str("f00d::/112").unwrap(),
                    mask_size: 120,
                }],
            },
        )
        .unwrap();
    allocator.restore_finished();
    Arc::new(allocator)
}

fn node_name(worker: usize, index: usize) -> String {
    format!("node-{worker}-{index}")
}

#[test]
fn test_no_double_allocation_across_workers() {
    let allocator = shared_allocator();

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let allocator = allocator.clone();
            thread::spawn(move || {
                for index in 0..NODES_PER_WORKER {
                    // 100 addresses: two /26s (62 usable each) and one /120.
                    let mut node =
                        NodeIpamSpec::new(node_name(worker, index)).with_request("default", 100, 100);
                    allocator.allocate_to_node(&node).unwrap();
                    allocator.populate_node_spec(&mut node);
                    // A second pass with the written-back record changes nothing.
                    allocator.allocate_to_node(&node).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut seen = HashSet::new();
    for worker in 0..WORKERS {
        for index in 0..NODES_PER_WORKER {
            let allocations = allocator
                .node_allocations(&node_name(worker, index))
                .unwrap();
            let blocks = allocations.pool("default").unwrap();
            assert_eq!(blocks.iter().count(), 3);
            for block in blocks.iter() {
                assert!(seen.insert(*block), "{block} handed out twice");
            }
        }
    }

    let stats = allocator.pool_stats("default").unwrap();
    let nodes = (WORKERS * NODES_PER_WORKER) as u128;
    assert_eq!(stats.ipv4.used, nodes * 2);
    assert_eq!(stats.ipv6.used, nodes);
}

#[test]
fn test_concurrent_claims_on_one_block_have_one_winner() {
    let allocator = shared_allocator();
    let contested = "10.0.4.0/26";

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let allocator = allocator.clone();
            thread::spawn(move || {
                let node = NodeIpamSpec::new(node_name(worker, 0))
                    .with_allocated("default", [contested]);
                allocator.allocate_to_node(&node)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.iter().filter_map(|result| result.as_ref().err()) {
        assert!(matches!(
            err.failures()[0].source,
            IpamError::AlreadyAllocated(_)
        ));
    }
    assert_eq!(allocator.pool_stats("default").unwrap().ipv4.used, 1);
}
