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
use forge_network::ip::{IdentifyAddressFamily, IpAddressFamily, IpPrefix};

use crate::IpamError;
use crate::block_allocator::BlockAllocator;
use crate::config::PoolDef;

/// A named pool: an ordered list of block allocators per address family.
/// Allocation is first-fit across the list, so the order of the configured
/// ranges is the order they get used in.
#[derive(Debug)]
pub struct Pool {
    name: String,
    ipv4: Vec<BlockAllocator>,
    ipv6: Vec<BlockAllocator>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FamilyStats {
    /// Blocks across all ranges of the family.
    pub capacity: u128,
    pub used: u128,
    pub free: u128,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub ipv4: FamilyStats,
    pub ipv6: FamilyStats,
}

impl Pool {
    pub fn new(
        name: impl Into<String>,
        ipv4: Vec<BlockAllocator>,
        ipv6: Vec<BlockAllocator>,
    ) -> Result<Self, IpamError> {
        let ipv4 = require_family(ipv4, IpAddressFamily::Ipv4)?;
        let ipv6 = require_family(ipv6, IpAddressFamily::Ipv6)?;
        require_disjoint(&ipv4)?;
        require_disjoint(&ipv6)?;
        Ok(Self {
            name: name.into(),
            ipv4,
            ipv6,
        })
    }

    pub fn from_def(name: impl Into<String>, def: &PoolDef) -> Result<Self, IpamError> {
        let build = |family| -> Result<Vec<BlockAllocator>, IpamError> {
            def.ranges(family)
                .iter()
                .map(|range| BlockAllocator::new(range.cidr, range.mask_size))
                .collect()
        };
        Self::new(
            name,
            build(IpAddressFamily::Ipv4)?,
            build(IpAddressFamily::Ipv6)?,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allocators(&self, family: IpAddressFamily) -> &[BlockAllocator] {
        match family {
            IpAddressFamily::Ipv4 => &self.ipv4,
            IpAddressFamily::Ipv6 => &self.ipv6,
        }
    }

    /// Base ranges of both families, IPv4 first, in configured order.
    pub fn ranges(&self) -> impl Iterator<Item = &IpPrefix> {
        self.ipv4
            .iter()
            .chain(self.ipv6.iter())
            .map(BlockAllocator::range)
    }

    /// The first pair of ranges, ours then theirs, that share addresses.
    pub fn overlap_with(&self, other: &Pool) -> Option<(IpPrefix, IpPrefix)> {
        self.ranges().find_map(|ours| {
            other
                .ranges()
                .find(|theirs| overlaps(ours, theirs))
                .map(|theirs| (*ours, *theirs))
        })
    }

    fn allocators_mut(&mut self, family: IpAddressFamily) -> &mut [BlockAllocator] {
        match family {
            IpAddressFamily::Ipv4 => &mut self.ipv4,
            IpAddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    /// Hand out the next free block of `family`, moving on to the next range
    /// only once the current one is exhausted.
    pub fn allocate_next(&mut self, family: IpAddressFamily) -> Result<IpPrefix, IpamError> {
        for allocator in self.allocators_mut(family) {
            match allocator.allocate_next() {
                Err(IpamError::PoolEmpty) => continue,
                result => return result,
            }
        }
        Err(IpamError::PoolEmpty)
    }

    pub fn occupy(&mut self, block: &IpPrefix) -> Result<(), IpamError> {
        self.owning_allocator(block)?.occupy(block)
    }

    pub fn release(&mut self, block: &IpPrefix) -> Result<(), IpamError> {
        self.owning_allocator(block)?.release(block)
    }

    pub fn is_occupied(&self, block: &IpPrefix) -> bool {
        self.allocators(block.address_family())
            .iter()
            .any(|allocator| allocator.is_occupied(block))
    }

    pub fn stats(&self) -> PoolStats {
        let family_stats = |family| {
            self.allocators(family)
                .iter()
                .fold(FamilyStats::default(), |stats, allocator| FamilyStats {
                    capacity: stats.capacity.saturating_add(allocator.capacity()),
                    used: stats.used + allocator.used(),
                    free: stats.free.saturating_add(allocator.free()),
                })
        };
        PoolStats {
            ipv4: family_stats(IpAddressFamily::Ipv4),
            ipv6: family_stats(IpAddressFamily::Ipv6),
        }
    }

    fn owning_allocator(&mut self, block: &IpPrefix) -> Result<&mut BlockAllocator, IpamError> {
        self.allocators_mut(block.address_family())
            .iter_mut()
            .find(|allocator| allocator.contains(block))
            .ok_or(IpamError::OutOfRange(*block))
    }
}

fn require_family(
    allocators: Vec<BlockAllocator>,
    family: IpAddressFamily,
) -> Result<Vec<BlockAllocator>, IpamError> {
    allocators
        .into_iter()
        .map(|allocator| {
            allocator.require_address_family_or_else(family, |allocator| {
                IpamError::FamilyMismatch {
                    range: *allocator.range(),
                    family,
                }
            })
        })
        .collect()
}

// Ranges of one family must not share addresses, or first-fit would hand
// out the same block from two allocators.
fn require_disjoint(allocators: &[BlockAllocator]) -> Result<(), IpamError> {
    for (i, first) in allocators.iter().enumerate() {
        if let Some(second) = allocators[i + 1..]
            .iter()
            .find(|second| overlaps(first.range(), second.range()))
        {
            return Err(IpamError::OverlappingRanges {
                first: *first.range(),
                second: *second.range(),
            });
        }
    }
    Ok(())
}

// Two prefixes either nest or are disjoint.
fn overlaps(a: &IpPrefix, b: &IpPrefix) -> bool {
    a.contains(b) || b.contains(a)
}
