// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne VLP-16 LiDAR decoder library
//!
//! Decodes the VLP-16 UDP data stream into range scans: a grid of raw ranges
//! and intensities indexed by azimuth slice and vertical beam, together with
//! the angles of every row and column.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  PacketSource   │ ──► │  ScanAccumulator │ ──► │  ScanRecord     │
//! │  (UDP/test)     │     │  (5 packet scan) │     │  (caller-owned) │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                            ▲          │
//!                            │          ▼
//!                         ┌──────────────────┐
//!                         │  DecoderState    │
//!                         │  (carried packet)│
//!                         └──────────────────┘
//! ```
//!
//! The caller owns the [`DecoderState`] and hands it to every decode call:
//! 1. Build the accumulator: `ScanAccumulator::for_model(LidarModel::Vlp16)?`
//! 2. Create a fresh state: `DecoderState::new()`
//! 3. Call `accumulator.decode(&mut state, &mut source).await`
//! 4. The first call returns `Ok(None)`, it only primes the state
//! 5. Every following call returns `Ok(Some(scan))`
//!
//! # Modules
//!
//! - [`params`]: Per-model packet geometry and calibration
//! - [`velodyne`]: Packet parsing, azimuth reconstruction and scan assembly
//! - [`packet_source`]: Packet source abstraction (UDP, test)
//! - [`lidar`]: Common types and error handling
//!
//! # Example
//!
//! ```ignore
//! use velodyne_lidarpub::{
//!     packet_source::UdpSource,
//!     params::LidarModel,
//!     velodyne::{DecoderState, ScanAccumulator},
//! };
//!
//! let accumulator = ScanAccumulator::for_model(LidarModel::Vlp16)?;
//! let mut source = UdpSource::bind("0.0.0.0:2368", None, Duration::from_secs(1)).await?;
//! let mut state = DecoderState::new();
//!
//! loop {
//!     match accumulator.decode(&mut state, &mut source).await {
//!         Ok(Some(scan)) => {
//!             let ranges = &scan.ranges;     // [slice, beam] raw distances
//!             let azimuths = &scan.theta;    // one per slice
//!             let points = scan.to_points(); // Cartesian, meters
//!         }
//!         Ok(None) => {} // priming
//!         Err(e) if e.is_recoverable() => continue,
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```

pub mod lidar;
pub mod packet_source;
pub mod params;
pub mod velodyne;

// Re-exports for convenience
pub use lidar::{Error, Points};
pub use packet_source::PacketSource;
pub use params::{LidarModel, ModelParameters, get_parameters};
pub use velodyne::{DecoderState, ScanAccumulator, ScanRecord};
