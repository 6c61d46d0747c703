// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-model packet geometry and calibration constants.
//!
//! The table is a closed set: only the VLP-16 is supported. Other Velodyne
//! models would be added as new [`LidarModel`] variants with their own
//! [`ModelParameters`], the decoder itself is driven entirely by the table.

use crate::lidar::Error;
use clap::ValueEnum;
use std::{fmt, str::FromStr};

/// VLP-16 datagram size on the wire, including Ethernet/IP/UDP headers.
const VLP16_DATAGRAM_SIZE: usize = 1248;

/// Ethernet + IPv4 + UDP header bytes stripped before the payload.
const VLP16_HEADER_SIZE: usize = 42;

const VLP16_BLOCKS_PER_PACKET: usize = 12;

const VLP16_CHANNELS_PER_BLOCK: usize = 32;

const VLP16_VERTICAL_BEAMS: usize = 16;

/// Minimum valid range in meters
const VLP16_MIN_RANGE: f64 = 0.2;

/// Maximum valid range in meters
const VLP16_MAX_RANGE: f64 = 100.0;

/// Factory byte reported in the packet trailer
const VLP16_PRODUCT_ID: u8 = 0x22;

/// Vertical angle of each laser in firing order (radians), -15° to +15°
/// interleaved in 2° steps.
const VLP16_VERTICAL_ANGLES: [f64; VLP16_VERTICAL_BEAMS] = [
    -0.2617993878,
    0.01745329252,
    -0.2268928028,
    0.05235987756,
    -0.1919862177,
    0.0872664626,
    -0.1570796327,
    0.1221730476,
    -0.1221730476,
    0.1570796327,
    -0.0872664626,
    0.1919862177,
    -0.05235987756,
    0.2268928028,
    -0.01745329252,
    0.2617993878,
];

/// Supported lidar models
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LidarModel {
    /// Velodyne VLP-16 (Puck)
    #[default]
    Vlp16,
}

impl fmt::Display for LidarModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LidarModel::Vlp16 => write!(f, "vlp16"),
        }
    }
}

impl FromStr for LidarModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "vlp16" | "puck" => Ok(LidarModel::Vlp16),
            _ => Err(Error::UnsupportedModel(s.to_string())),
        }
    }
}

/// Packet geometry and calibration of a lidar model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelParameters {
    /// Minimum valid range in meters
    pub minimum_range: f64,
    /// Maximum valid range in meters
    pub maximum_range: f64,
    /// Bytes of network headers preceding the payload on the wire
    pub packet_header_size: usize,
    /// Bytes of payload delivered to the decoder (excludes the header)
    pub packet_payload_size: usize,
    /// Bytes per data block: flag, azimuth and channel records
    pub block_size: usize,
    pub channels_per_block: usize,
    pub blocks_per_packet: usize,
    pub vertical_beam_count: usize,
    /// Vertical angle of each beam in radians, `vertical_beam_count` entries
    pub vertical_angles: Vec<f64>,
    /// Factory byte the device reports in the packet trailer
    pub product_id: u8,
}

impl ModelParameters {
    /// Size of a complete datagram on the wire.
    pub fn datagram_size(&self) -> usize {
        self.packet_header_size + self.packet_payload_size
    }

    /// Offset of the trailer following the last data block.
    pub fn trailer_offset(&self) -> usize {
        self.blocks_per_packet * self.block_size
    }
}

/// Parameters of the given model.
pub fn get_parameters(model: LidarModel) -> ModelParameters {
    match model {
        LidarModel::Vlp16 => ModelParameters {
            minimum_range: VLP16_MIN_RANGE,
            maximum_range: VLP16_MAX_RANGE,
            packet_header_size: VLP16_HEADER_SIZE,
            packet_payload_size: VLP16_DATAGRAM_SIZE - VLP16_HEADER_SIZE,
            block_size: 2 + 2 + 3 * VLP16_CHANNELS_PER_BLOCK,
            channels_per_block: VLP16_CHANNELS_PER_BLOCK,
            blocks_per_packet: VLP16_BLOCKS_PER_PACKET,
            vertical_beam_count: VLP16_VERTICAL_BEAMS,
            vertical_angles: VLP16_VERTICAL_ANGLES.to_vec(),
            product_id: VLP16_PRODUCT_ID,
        },
    }
}

/// Look up model parameters by model name, e.g. `"vlp16"` or `"VLP-16"`.
pub fn lookup(name: &str) -> Result<ModelParameters, Error> {
    name.parse().map(get_parameters)
}
