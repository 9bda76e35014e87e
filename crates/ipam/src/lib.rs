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

//! Cluster pool IPAM.
//!
//! Nodes ask for a number of addresses per pool and family. The
//! [`PoolAllocator`] covers that demand with fixed-size CIDR blocks carved
//! out of the pool's ranges, and rebuilds its bookkeeping from the blocks
//! nodes report after a restart.

pub mod address_count;
pub mod allocator;
pub mod block_allocator;
pub mod config;
pub mod error;
pub mod ledger;
pub mod node;
pub mod pool;

pub use address_count::addresses_in_prefix;
pub use allocator::PoolAllocator;
pub use config::{ConfigError, IpamConfig, PoolDef, RangeDef};
pub use error::{AllocateToNodeError, AllocationFailure, AllocationStage, IpamError};
pub use node::{NodeIpamSpec, PoolAllocation, PoolDemand, PoolRequest};
