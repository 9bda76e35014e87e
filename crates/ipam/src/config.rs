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
use std::path::Path;

use forge_network::ip::{IpAddressFamily, IpPrefix};
use serde::{Deserialize, Serialize};

/// Pool definitions, keyed by pool name.
///
/// ```toml
/// [pools.default]
/// ipv4 = [{ cidr = "192.168.0.0/16", mask_size = 24 }]
/// ipv6 = [{ cidr = "f00d::/80", mask_size = 96 }]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpamConfig {
    #[serde(default)]
    pub pools: BTreeMap<String, PoolDef>,
}

/// The ranges of one pool. Either family may be left out, in which case
/// the pool doesn't offer it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolDef {
    #[serde(default)]
    pub ipv4: Vec<RangeDef>,
    #[serde(default)]
    pub ipv6: Vec<RangeDef>,
}

impl PoolDef {
    pub fn ranges(&self, family: IpAddressFamily) -> &[RangeDef] {
        match family {
            IpAddressFamily::Ipv4 => &self.ipv4,
            IpAddressFamily::Ipv6 => &self.ipv6,
        }
    }
}

/// A base range and the length of the blocks carved out of it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeDef {
    pub cidr: IpPrefix,
    pub mask_size: u8,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file: {path}: {error}")]
    CouldNotRead { path: String, error: std::io::Error },
    #[error("Invalid TOML in config file: {path}: {error}")]
    InvalidToml {
        path: String,
        error: toml::de::Error,
    },
}

impl IpamConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = std::fs::read_to_string(path).map_err(|error| ConfigError::CouldNotRead {
            path: path.to_string_lossy().to_string(),
            error,
        })?;
        toml::from_str::<Self>(&cfg).map_err(|error| ConfigError::InvalidToml {
            path: path.to_string_lossy().to_string(),
            error,
        })
    }
}
