// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use std::net::IpAddr;
use tracing::level_filters::LevelFilter;
use velodyne_lidarpub::params::LidarModel;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Only accept packets sent from this LiDAR address.  When unset packets
    /// from any sender on the data port are decoded.
    #[arg(long, env)]
    pub device: Option<IpAddr>,

    /// UDP port the LiDAR streams data packets to
    #[arg(long, env, default_value = "2368")]
    pub port: u16,

    /// Local address to bind the data socket to
    #[arg(long, env, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// LiDAR model
    #[arg(long, env, value_enum, default_value = "vlp16")]
    pub model: LidarModel,

    /// Maximum wait for a single packet in milliseconds before the current
    /// scan is abandoned
    #[arg(long, env, default_value = "1000")]
    pub read_timeout_ms: u64,

    /// Stop after this many scans, runs until interrupted when unset
    #[arg(long, env)]
    pub max_scans: Option<u32>,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}
