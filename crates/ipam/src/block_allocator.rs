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
use std::collections::BTreeSet;

use forge_network::ip::{IdentifyAddressFamily, IpAddressFamily, IpPrefix, Prefix};

use crate::IpamError;

/// Largest number of bits a block index may use, i.e. a range can be split
/// into at most 2^64 blocks.
pub const MAX_BLOCK_INDEX_BITS: u8 = 64;

/// Longest IPv4 block length. A /31 or /32 has no usable addresses once the
/// network and broadcast addresses are taken out, so it could never cover
/// any demand.
pub const MAX_IPV4_BLOCK_LENGTH: u8 = 30;

/// BlockAllocator carves one base range into equally sized blocks and keeps
/// track of which of them are in use.
///
/// Blocks are identified by their index inside the range (the range's
/// network address is block 0). Only occupied indices are stored, so a
/// sparsely used IPv6 range costs nothing for the blocks nobody asked for.
/// `allocate_next` always returns the lowest free index, so the same
/// occupancy always yields the same next block.
#[derive(Clone, Debug)]
pub struct BlockAllocator {
    range: IpPrefix,
    block_length: u8,
    capacity: u128,
    occupied: BTreeSet<u128>,
    // Every index below this one is occupied.
    next_free: u128,
}

impl BlockAllocator {
    /// Create an allocator handing out `/block_length` blocks from `range`.
    ///
    /// The block length can't be shorter than the range itself or longer
    /// than the address (IPv4 blocks no longer than
    /// [`MAX_IPV4_BLOCK_LENGTH`]), and the range can't hold more than
    /// 2^[`MAX_BLOCK_INDEX_BITS`] blocks.
    pub fn new(range: IpPrefix, block_length: u8) -> Result<Self, IpamError> {
        let prefix_length = range.prefix_length() as u8;
        let usable_length = match range.address_family() {
            IpAddressFamily::Ipv4 => block_length <= MAX_IPV4_BLOCK_LENGTH,
            IpAddressFamily::Ipv6 => true,
        };
        let capacity = range
            .subprefix_count(block_length)
            .filter(|_| usable_length)
            .filter(|_| block_length - prefix_length <= MAX_BLOCK_INDEX_BITS)
            .ok_or(IpamError::InvalidBlockSize {
                range,
                mask_len: block_length,
            })?;

        Ok(Self {
            range,
            block_length,
            capacity,
            occupied: BTreeSet::new(),
            next_free: 0,
        })
    }

    pub fn range(&self) -> &IpPrefix {
        &self.range
    }

    /// Total number of blocks in the range.
    pub fn capacity(&self) -> u128 {
        self.capacity
    }

    pub fn used(&self) -> u128 {
        self.occupied.len() as u128
    }

    pub fn free(&self) -> u128 {
        self.capacity - self.used()
    }

    /// Whether `block` is exactly one of this allocator's blocks, regardless
    /// of whether it is in use.
    pub fn contains(&self, block: &IpPrefix) -> bool {
        self.index_of(block).is_ok()
    }

    pub fn is_occupied(&self, block: &IpPrefix) -> bool {
        self.index_of(block)
            .map(|index| self.occupied.contains(&index))
            .unwrap_or(false)
    }

    /// Hand out the lowest free block.
    pub fn allocate_next(&mut self) -> Result<IpPrefix, IpamError> {
        let index = self.first_free_index().ok_or(IpamError::PoolEmpty)?;
        // Indices below capacity always map to a block.
        let block = self
            .range
            .nth_subprefix(self.block_length, index)
            .ok_or(IpamError::PoolEmpty)?;
        self.occupied.insert(index);
        self.next_free = index + 1;
        Ok(block)
    }

    /// Mark a specific block as used, e.g. one a node already reports as its
    /// own. The block must be exactly one of this allocator's blocks.
    pub fn occupy(&mut self, block: &IpPrefix) -> Result<(), IpamError> {
        let index = self.index_of(block)?;
        match self.occupied.insert(index) {
            true => Ok(()),
            false => Err(IpamError::AlreadyAllocated(*block)),
        }
    }

    /// Return a block to the free set.
    pub fn release(&mut self, block: &IpPrefix) -> Result<(), IpamError> {
        let index = self.index_of(block)?;
        match self.occupied.remove(&index) {
            true => {
                self.next_free = self.next_free.min(index);
                Ok(())
            }
            false => Err(IpamError::NotAllocated(*block)),
        }
    }

    fn index_of(&self, block: &IpPrefix) -> Result<u128, IpamError> {
        if block.prefix_length() != usize::from(self.block_length) {
            return Err(IpamError::OutOfRange(*block));
        }
        self.range
            .subprefix_index(block)
            .ok_or(IpamError::OutOfRange(*block))
    }

    // Walks the occupied indices from `next_free` until it finds a gap.
    fn first_free_index(&self) -> Option<u128> {
        let mut candidate = self.next_free;
        for &index in self.occupied.range(self.next_free..) {
            if index != candidate {
                break;
            }
            candidate += 1;
        }
        (candidate < self.capacity).then_some(candidate)
    }
}

impl IdentifyAddressFamily for BlockAllocator {
    fn address_family(&self) -> IpAddressFamily {
        self.range.address_family()
    }
}
