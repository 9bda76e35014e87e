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
use std::fmt::Display;

use forge_network::ip::{IpAddressFamily, IpPrefix, PrefixError};

#[derive(thiserror::Error, Debug)]
pub enum IpamError {
    #[error("pool is empty")]
    PoolEmpty,

    #[error("cidr {0} has already been allocated")]
    AlreadyAllocated(IpPrefix),

    #[error("cidr {0} is not a block of any configured range")]
    OutOfRange(IpPrefix),

    #[error("cidr {0} is not allocated")]
    NotAllocated(IpPrefix),

    #[error("pool {0:?} does not exist")]
    UnknownPool(String),

    #[error("invalid cidr {value:?}: {source}")]
    InvalidPrefix {
        value: String,
        #[source]
        source: PrefixError,
    },

    #[error("range {range} cannot be split into /{mask_len} blocks")]
    InvalidBlockSize { range: IpPrefix, mask_len: u8 },

    #[error("range {range} is not an {family} range")]
    FamilyMismatch {
        range: IpPrefix,
        family: IpAddressFamily,
    },

    #[error("range {first} overlaps range {second}")]
    OverlappingRanges { first: IpPrefix, second: IpPrefix },

    #[error("pool {0:?} still has blocks allocated to nodes")]
    PoolInUse(String),
}

/// What the orchestrator was doing for a node when a pool failed it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AllocationStage {
    /// Re-occupying blocks the node already reports as allocated.
    Occupy,
    /// Handing out new blocks to cover the node's demand.
    Allocate,
}

/// A single failed (pool, family) pair from one reconciliation pass.
#[derive(Debug)]
pub struct AllocationFailure {
    pub node: String,
    pub pool: String,
    /// None when the failure could not be tied to a family, e.g. an
    /// unparseable cidr or a pool that does not exist.
    pub family: Option<IpAddressFamily>,
    pub stage: AllocationStage,
    pub source: IpamError,
}

impl AllocationFailure {
    pub fn new(
        stage: AllocationStage,
        node: &str,
        pool: &str,
        family: Option<IpAddressFamily>,
        source: IpamError,
    ) -> Self {
        Self {
            node: node.to_string(),
            pool: pool.to_string(),
            family,
            stage,
            source,
        }
    }
}

impl Display for AllocationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (verb, noun, preposition) = match self.stage {
            AllocationStage::Occupy => ("occupy", "cidr", "in"),
            AllocationStage::Allocate => ("allocate", "address", "from"),
        };
        match self.family {
            Some(family) => write!(f, "failed to {verb} {family} {noun}")?,
            None => write!(f, "failed to {verb} {noun}")?,
        }
        write!(
            f,
            " for node {:?} {preposition} pool {:?}: {}",
            self.node, self.pool, self.source
        )
    }
}

impl std::error::Error for AllocationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Error returned by a reconciliation pass. Every failing (pool, family)
/// pair of the pass is kept, in the order they were hit.
#[derive(thiserror::Error, Debug)]
pub enum AllocateToNodeError {
    #[error("allocator is not ready")]
    NotReady,

    #[error("{}", join_failures(.0))]
    Failures(Vec<AllocationFailure>),
}

impl AllocateToNodeError {
    pub fn failures(&self) -> &[AllocationFailure] {
        match self {
            AllocateToNodeError::NotReady => &[],
            AllocateToNodeError::Failures(failures) => failures,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, AllocateToNodeError::NotReady)
    }
}

fn join_failures(failures: &[AllocationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
