// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne VLP-16 scan accumulator.
//!
//! The VLP-16 spins 16 lasers and streams 1206-byte UDP payloads, port 2368.
//!
//! # Packet Structure
//!
//! - 12 data blocks × 100 bytes = 1200 bytes
//!   - Flag: 2 bytes, `0xEEFF` little-endian
//!   - Azimuth: 2 bytes, hundredths of a degree
//!   - 32 channel records × 3 bytes: distance (u16, 2 mm units), reflectivity
//! - Timestamp: 4 bytes, microseconds past the top of the hour
//! - Factory: return mode byte and product id byte
//!
//! Each block holds two firing sequences of the 16 lasers but reports a
//! single azimuth, so the azimuth of the second sequence is interpolated
//! halfway towards the next block.
//!
//! # Accumulation
//!
//! One call to [`ScanAccumulator::decode`] reads [`ACCUMULATION_WINDOW`]
//! packets. The packet carried over from the previous call is decoded first,
//! the last packet read is only used for the trailing azimuth and then
//! carried into the next call through [`DecoderState`]. The very first call
//! has nothing to carry and returns `Ok(None)` after priming the state.

use crate::{
    lidar::{Error, Points, timestamp},
    packet_source::PacketSource,
    params::{LidarModel, ModelParameters, get_parameters},
};
use ndarray::Array2;
use std::f64::consts::{PI, TAU};
use tracing::{debug, instrument, trace, warn};

/// Packets of new data per scan.
pub const ACCUMULATION_WINDOW: usize = 5;

/// Expected value of the block flag field.
pub const BLOCK_FLAG: u16 = 0xEEFF;

/// Meters per device distance unit (2 mm).
pub const DISTANCE_UNIT_TO_METERS: f64 = 0.002;

/// Maximum reflectivity value, in percent.
pub const MAX_INTENSITY: f64 = 100.0;

/// Time between laser firings in microseconds.
pub const DELTA_TIME_US: u16 = 50;

/// Flag and azimuth preceding the channel records of a block.
const BLOCK_HEADER_SIZE: usize = 4;

/// Distance and reflectivity of a channel record.
const CHANNEL_SIZE: usize = 3;

/// Timestamp and factory bytes following the last block.
const TRAILER_SIZE: usize = 6;

/// Laser return mode reported in the packet trailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnMode {
    Strongest,
    Last,
    Dual,
    Unknown(u8),
}

impl From<u8> for ReturnMode {
    fn from(value: u8) -> Self {
        match value {
            0x37 => ReturnMode::Strongest,
            0x38 => ReturnMode::Last,
            0x39 => ReturnMode::Dual,
            other => ReturnMode::Unknown(other),
        }
    }
}

/// Packet trailer following the data blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketTrailer {
    /// Microseconds past the top of the hour at the first firing
    pub timestamp_us: u32,
    pub return_mode: ReturnMode,
    pub product_id: u8,
}

impl PacketTrailer {
    pub const LEN: usize = TRAILER_SIZE;

    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        if slice.len() < Self::LEN {
            return Err(Error::UnexpectedEnd(slice.len()));
        }

        Ok(PacketTrailer {
            timestamp_us: u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]),
            return_mode: ReturnMode::from(slice[4]),
            product_id: slice[5],
        })
    }
}

/// Read-only view of one data block inside a packet payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockSlice<'a> {
    slice: &'a [u8],
    channels: usize,
}

impl<'a> BlockSlice<'a> {
    /// Size in bytes of a block holding `channels` channel records.
    pub const fn len_for(channels: usize) -> usize {
        BLOCK_HEADER_SIZE + CHANNEL_SIZE * channels
    }

    pub fn from_slice(slice: &'a [u8], channels: usize) -> Result<BlockSlice<'a>, Error> {
        if slice.len() < Self::len_for(channels) {
            return Err(Error::UnexpectedEnd(slice.len()));
        }

        Ok(BlockSlice { slice, channels })
    }

    pub fn flag(&self) -> u16 {
        u16::from_le_bytes([self.slice[0], self.slice[1]])
    }

    pub fn is_valid(&self) -> bool {
        self.flag() == BLOCK_FLAG
    }

    /// Azimuth in hundredths of a degree, as sent by the device.
    pub fn raw_azimuth(&self) -> u16 {
        u16::from_le_bytes([self.slice[2], self.slice[3]])
    }

    /// Azimuth in radians, counter-clockwise positive.
    pub fn azimuth(&self) -> f64 {
        azimuth_to_radians(self.raw_azimuth())
    }

    /// Raw distance and reflectivity of channel `index`.
    pub fn channel(&self, index: usize) -> (u16, u8) {
        let start = BLOCK_HEADER_SIZE + index * CHANNEL_SIZE;
        let distance = u16::from_le_bytes([self.slice[start], self.slice[start + 1]]);
        (distance, self.slice[start + 2])
    }

    pub fn channels(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        (0..self.channels).map(|index| self.channel(index))
    }
}

/// Convert a wire azimuth (clockwise hundredths of a degree) to radians.
pub fn azimuth_to_radians(raw: u16) -> f64 {
    -(raw as f64 / 100.0).to_radians()
}

/// Shortest signed angle from `b` to `a`, in `(-π, π]`.
pub fn angular_delta(a: f64, b: f64) -> f64 {
    let delta = (a - b).rem_euclid(TAU);
    if delta > PI { delta - TAU } else { delta }
}

/// Expand per-block azimuths into one azimuth per firing sequence.
///
/// `azimuths` holds one more entry than the number of blocks decoded, the
/// last one only bounds the interpolation of the final sequence.
pub fn reconstruct_azimuths(azimuths: &[f64]) -> Vec<f64> {
    let mut theta = Vec::with_capacity(2 * azimuths.len().saturating_sub(1));
    for pair in azimuths.windows(2) {
        let (a1, a2) = (pair[0], pair[1]);
        theta.push(a1);
        theta.push(a1 + 0.5 * angular_delta(a2, a1));
    }
    theta
}

/// State carried from one decode call into the next.
///
/// Owned by the caller and passed to every [`ScanAccumulator::decode`] call
/// for the same device. Never share one state between concurrent decoders.
#[derive(Clone, Debug, Default)]
pub struct DecoderState {
    previous_packet: Option<Vec<u8>>,
    scans: u32,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State resuming from an already received packet.
    pub fn with_previous_packet(packet: Vec<u8>) -> Self {
        Self {
            previous_packet: Some(packet),
            scans: 0,
        }
    }

    /// Whether a packet is carried into the next decode call.
    pub fn is_primed(&self) -> bool {
        self.previous_packet.is_some()
    }

    pub fn previous_packet(&self) -> Option<&[u8]> {
        self.previous_packet.as_deref()
    }

    /// Number of scans produced so far.
    pub fn scans(&self) -> u32 {
        self.scans
    }

    /// Drop the carried packet, e.g. after the sensor link was interrupted.
    /// The next decode call primes again; the scan counter is kept.
    pub fn reset(&mut self) {
        self.previous_packet = None;
    }
}

/// One completed range scan.
///
/// `ranges` and `intensities` are indexed `[slice, beam]`: row `i` was fired
/// at azimuth `theta[i]`, column `j` at vertical angle `phi[j]`. Invalid
/// returns are stored as `(0, 0)`.
#[derive(Clone, Debug)]
pub struct ScanRecord {
    /// Scan sequence number (wraps at u32::MAX)
    pub scan_id: u32,
    /// Host timestamp in nanoseconds when the scan completed
    pub timestamp: u64,
    /// Device timestamp of the first packet, microseconds past the hour
    pub device_timestamp_us: Option<u32>,
    pub return_mode: Option<ReturnMode>,
    /// Raw distances in device units
    pub ranges: Array2<u16>,
    /// Raw reflectivity
    pub intensities: Array2<u8>,
    /// Vertical angle of each beam (radians)
    pub phi: Vec<f64>,
    /// Azimuth of each slice (radians)
    pub theta: Vec<f64>,
    /// Meters represented by a range of 65535
    pub range_denormalizer: f64,
    /// Intensity represented by the full u8 scale
    pub intensity_denormalizer: f64,
    /// Ranges below this many meters were discarded
    pub invalid_range_threshold: f64,
    /// Ranges at or beyond this many meters were discarded
    pub out_of_range_threshold: f64,
    /// Microseconds between firings
    pub delta_time: u16,
    /// Blocks whose flag field did not match [`BLOCK_FLAG`]
    pub malformed_blocks: usize,
    /// Decoded packets whose trailer reported a different product id
    pub foreign_packets: usize,
}

impl ScanRecord {
    pub fn number_of_slices(&self) -> usize {
        self.ranges.nrows()
    }

    pub fn vertical_beam_count(&self) -> usize {
        self.ranges.ncols()
    }

    /// Number of cells holding a valid return.
    pub fn valid_returns(&self) -> usize {
        self.ranges.iter().filter(|&&range| range != 0).count()
    }

    /// Range of a cell in meters, `None` for invalid returns.
    pub fn range_meters(&self, slice: usize, beam: usize) -> Option<f64> {
        match self.ranges.get((slice, beam)) {
            Some(&raw) if raw != 0 => Some(raw as f64 * self.range_denormalizer / 65535.0),
            _ => None,
        }
    }

    /// Convert valid returns to Cartesian coordinates in the sensor frame.
    pub fn to_points(&self) -> Points {
        let mut points = Points::with_capacity(self.valid_returns());
        for ((slice, beam), &intensity) in self.intensities.indexed_iter() {
            let Some(range) = self.range_meters(slice, beam) else {
                continue;
            };
            let (theta, phi) = (self.theta[slice], self.phi[beam]);
            let planar = range * phi.cos();
            points.push(
                (planar * theta.cos()) as f32,
                (planar * theta.sin()) as f32,
                (range * phi.sin()) as f32,
                intensity,
            );
        }
        points
    }
}

/// Working buffers of a scan under construction.
struct ScanGrid {
    ranges: Array2<u16>,
    intensities: Array2<u8>,
    azimuths: Vec<f64>,
    malformed_blocks: usize,
    foreign_packets: usize,
    trailer: Option<PacketTrailer>,
}

/// Decodes windows of raw packets into [`ScanRecord`]s.
///
/// Validates the model parameters once on construction; decoding itself only
/// fails when the packet source does.
#[derive(Clone, Debug)]
pub struct ScanAccumulator {
    params: ModelParameters,
    number_of_slices: usize,
    /// Smallest valid distance in device units
    min_raw: u16,
    /// Distances at or above this are out of range
    max_raw: u16,
}

impl ScanAccumulator {
    pub fn new(params: ModelParameters) -> Result<Self, Error> {
        if params.vertical_beam_count == 0 {
            return Err(Error::Config(
                "number of vertical beams needs to be positive".to_string(),
            ));
        }

        let number_of_rays =
            ACCUMULATION_WINDOW * params.blocks_per_packet * params.channels_per_block;
        if number_of_rays % params.vertical_beam_count != 0 {
            return Err(Error::Config(format!(
                "number of rays ({}) is not divisible by number of vertical beams ({})",
                number_of_rays, params.vertical_beam_count
            )));
        }

        if params.vertical_beam_count * 2 != params.channels_per_block {
            return Err(Error::Config(format!(
                "expected two firing sequences per block, got {} channels for {} beams",
                params.channels_per_block, params.vertical_beam_count
            )));
        }

        if params.vertical_angles.len() != params.vertical_beam_count {
            return Err(Error::Config(format!(
                "{} vertical angles for {} beams",
                params.vertical_angles.len(),
                params.vertical_beam_count
            )));
        }

        if params.block_size != BlockSlice::len_for(params.channels_per_block) {
            return Err(Error::Config(format!(
                "block size {} does not match {} channels",
                params.block_size, params.channels_per_block
            )));
        }

        if params.trailer_offset() > params.packet_payload_size {
            return Err(Error::Config(format!(
                "{} blocks of {} bytes exceed the {} byte payload",
                params.blocks_per_packet, params.block_size, params.packet_payload_size
            )));
        }

        let min_raw = range_to_raw(params.minimum_range)?;
        let max_raw = range_to_raw(params.maximum_range)?;
        if min_raw >= max_raw {
            return Err(Error::Config(format!(
                "minimum range {} m is not below maximum range {} m",
                params.minimum_range, params.maximum_range
            )));
        }

        Ok(Self {
            number_of_slices: number_of_rays / params.vertical_beam_count,
            params,
            min_raw,
            max_raw,
        })
    }

    /// Accumulator for one of the built-in models.
    pub fn for_model(model: LidarModel) -> Result<Self, Error> {
        Self::new(get_parameters(model))
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    /// Rows of the output grid.
    pub fn number_of_slices(&self) -> usize {
        self.number_of_slices
    }

    /// Valid distance bounds in device units, `min..max`.
    pub fn range_bounds(&self) -> (u16, u16) {
        (self.min_raw, self.max_raw)
    }

    /// Apply the range policy to one channel reading.
    #[inline]
    pub fn classify(&self, distance: u16, reflectivity: u8) -> (u16, u8) {
        if distance < self.min_raw || distance >= self.max_raw {
            (0, 0)
        } else {
            (distance, reflectivity)
        }
    }

    /// Map a flat channel index to its `(slice, beam)` grid cell.
    #[inline]
    pub fn grid_cell(&self, index: usize) -> (usize, usize) {
        let beams = self.params.vertical_beam_count;
        (index / beams, index % beams)
    }

    /// Decode one window of packets.
    ///
    /// # Returns
    /// - `Ok(None)` on the priming call, when `state` holds no packet yet or
    ///   the carried packet is not a full payload
    /// - `Ok(Some(scan))` otherwise
    /// - `Err` if the source fails or returns a packet of the wrong size;
    ///   `state` is left untouched in that case
    #[instrument(skip_all, fields(scan = state.scans))]
    pub async fn decode<S: PacketSource + ?Sized>(
        &self,
        state: &mut DecoderState,
        source: &mut S,
    ) -> Result<Option<ScanRecord>, Error> {
        let expected = self.params.packet_payload_size;
        let previous = state
            .previous_packet()
            .filter(|previous| previous.len() == expected);
        if let (None, Some(stale)) = (previous, state.previous_packet()) {
            warn!(
                "dropping carried packet of {} bytes, expected {}",
                stale.len(),
                expected
            );
        }
        let is_first_batch = previous.is_none();
        let blocks = self.params.blocks_per_packet;

        let mut grid = ScanGrid {
            ranges: Array2::zeros((self.number_of_slices, self.params.vertical_beam_count)),
            intensities: Array2::zeros((self.number_of_slices, self.params.vertical_beam_count)),
            azimuths: vec![0.0; (ACCUMULATION_WINDOW + 1) * blocks],
            malformed_blocks: 0,
            foreign_packets: 0,
            trailer: None,
        };

        if let Some(previous) = previous {
            self.decode_packet(previous, 0, &mut grid, true);
        }

        let mut carried = None;
        for position in 1..=ACCUMULATION_WINDOW {
            let packet = self.read_packet(source).await?;
            if position == ACCUMULATION_WINDOW {
                if !is_first_batch {
                    self.decode_packet(&packet, position, &mut grid, false);
                }
                carried = Some(packet);
            } else if !is_first_batch {
                self.decode_packet(&packet, position, &mut grid, true);
            }
        }

        if is_first_batch {
            state.previous_packet = carried;
            debug!("primed decoder state, no scan produced");
            return Ok(None);
        }

        let timestamp = timestamp()?;
        state.previous_packet = carried;

        let theta = reconstruct_azimuths(&grid.azimuths[..ACCUMULATION_WINDOW * blocks + 1]);
        let scan = ScanRecord {
            scan_id: state.scans,
            timestamp,
            device_timestamp_us: grid.trailer.map(|t| t.timestamp_us),
            return_mode: grid.trailer.map(|t| t.return_mode),
            ranges: grid.ranges,
            intensities: grid.intensities,
            phi: self.params.vertical_angles.clone(),
            theta,
            range_denormalizer: DISTANCE_UNIT_TO_METERS * 65535.0,
            intensity_denormalizer: MAX_INTENSITY,
            invalid_range_threshold: self.params.minimum_range,
            out_of_range_threshold: self.params.maximum_range,
            delta_time: DELTA_TIME_US,
            malformed_blocks: grid.malformed_blocks,
            foreign_packets: grid.foreign_packets,
        };
        state.scans = state.scans.wrapping_add(1);

        trace!(
            "scan {} with {} valid returns, {} malformed blocks",
            scan.scan_id,
            scan.valid_returns(),
            scan.malformed_blocks
        );
        Ok(Some(scan))
    }

    /// Read one packet payload, rejecting anything but a full payload.
    async fn read_packet<S: PacketSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<Vec<u8>, Error> {
        let expected = self.params.packet_payload_size;
        // Room for a full datagram so oversized packets are detected too.
        let mut packet = vec![0u8; self.params.datagram_size().max(expected + 1)];
        let len = source.recv(&mut packet).await?;
        if len != expected {
            return Err(Error::ShortRead {
                expected,
                actual: len,
            });
        }
        packet.truncate(len);
        Ok(packet)
    }

    /// Collect the azimuths of a packet at `position` in the window and,
    /// when `decode_beams` is set, its channel readings.
    fn decode_packet(
        &self,
        packet: &[u8],
        position: usize,
        grid: &mut ScanGrid,
        decode_beams: bool,
    ) {
        let blocks = self.params.blocks_per_packet;
        let channels = self.params.channels_per_block;

        if decode_beams {
            let trailer = packet
                .get(self.params.trailer_offset()..)
                .and_then(|trailer| PacketTrailer::from_slice(trailer).ok());
            if let Some(trailer) = trailer {
                if trailer.product_id != self.params.product_id {
                    warn!(
                        "packet {} reports product id {:#04x}, expected {:#04x}",
                        position, trailer.product_id, self.params.product_id
                    );
                    grid.foreign_packets += 1;
                }
                if grid.trailer.is_none() {
                    grid.trailer = Some(trailer);
                }
            }
        }

        for (j, chunk) in packet
            .chunks_exact(self.params.block_size)
            .take(blocks)
            .enumerate()
        {
            // Packet length and block size were validated up front.
            let Ok(block) = BlockSlice::from_slice(chunk, channels) else {
                continue;
            };
            grid.azimuths[position * blocks + j] = block.azimuth();

            if !decode_beams {
                continue;
            }

            if !block.is_valid() {
                warn!(
                    "invalid block flag {:#06x} in packet {} block {}",
                    block.flag(),
                    position,
                    j
                );
                grid.malformed_blocks += 1;
            }

            let offset = (position * blocks + j) * channels;
            for (c, (distance, reflectivity)) in block.channels().enumerate() {
                let cell = self.grid_cell(offset + c);
                let (range, intensity) = self.classify(distance, reflectivity);
                grid.ranges[cell] = range;
                grid.intensities[cell] = intensity;
            }
        }
    }
}

/// Convert a range in meters to device units.
fn range_to_raw(meters: f64) -> Result<u16, Error> {
    let raw = (meters / DISTANCE_UNIT_TO_METERS).round();
    if !(0.0..=u16::MAX as f64).contains(&raw) {
        return Err(Error::Config(format!(
            "range {} m is not representable in device units",
            meters
        )));
    }
    Ok(raw as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_source::TestSource;
    use std::collections::HashSet;

    const PAYLOAD: usize = 1206;

    /// Build a VLP-16 payload whose blocks start at `azimuth` and advance by
    /// `step` hundredths of a degree, every channel reading `distance`.
    fn make_packet(azimuth: u16, step: u16, distance: u16, reflectivity: u8) -> Vec<u8> {
        let mut packet = Vec::with_capacity(PAYLOAD);
        for block in 0..12u16 {
            packet.extend_from_slice(&BLOCK_FLAG.to_le_bytes());
            let az = (azimuth + block * step) % 36000;
            packet.extend_from_slice(&az.to_le_bytes());
            for _ in 0..32 {
                packet.extend_from_slice(&distance.to_le_bytes());
                packet.push(reflectivity);
            }
        }
        packet.extend_from_slice(&123_456u32.to_le_bytes());
        packet.push(0x37);
        packet.push(0x22);
        assert_eq!(packet.len(), PAYLOAD);
        packet
    }

    fn vlp16() -> ScanAccumulator {
        ScanAccumulator::for_model(LidarModel::Vlp16).unwrap()
    }

    #[test]
    fn test_block_slice_fields() {
        let mut block = vec![0xFF, 0xEE, 0xE0, 0x2E];
        for c in 0..32u16 {
            block.extend_from_slice(&(1000 + c).to_le_bytes());
            block.push(c as u8);
        }

        let block = BlockSlice::from_slice(&block, 32).unwrap();
        assert!(block.is_valid());
        assert_eq!(block.raw_azimuth(), 12000);
        assert_eq!(block.azimuth(), -(120.0f64.to_radians()));
        assert_eq!(block.channel(0), (1000, 0));
        assert_eq!(block.channel(31), (1031, 31));
        assert_eq!(block.channels().count(), 32);
    }

    #[test]
    fn test_block_slice_too_short() {
        let data = [0xFF, 0xEE, 0x00, 0x00, 0x01];
        assert!(matches!(
            BlockSlice::from_slice(&data, 32),
            Err(Error::UnexpectedEnd(5))
        ));
    }

    #[test]
    fn test_packet_trailer() {
        let packet = make_packet(0, 20, 1000, 10);
        let trailer = PacketTrailer::from_slice(&packet[1200..]).unwrap();
        assert_eq!(trailer.timestamp_us, 123_456);
        assert_eq!(trailer.return_mode, ReturnMode::Strongest);
        assert_eq!(trailer.product_id, 0x22);
        assert_eq!(ReturnMode::from(0x39), ReturnMode::Dual);
        assert_eq!(ReturnMode::from(0x01), ReturnMode::Unknown(0x01));
    }

    #[test]
    fn test_angular_delta_wraparound() {
        assert!((angular_delta(0.1, TAU - 0.1) - 0.2).abs() < 1e-12);
        assert!((angular_delta(TAU - 0.1, 0.1) + 0.2).abs() < 1e-12);
        assert!((angular_delta(-0.1, -TAU + 0.1) + 0.2).abs() < 1e-12);
        assert_eq!(angular_delta(1.0, 1.0), 0.0);
        assert_eq!(angular_delta(PI, 0.0), PI);
    }

    #[test]
    fn test_angular_delta_antisymmetric_and_bounded() {
        let angles = [-7.0, -3.1, -1.0, -0.25, 0.0, 0.3, 1.5, 3.0, 4.0, 6.2, 9.5];
        for &a in &angles {
            for &b in &angles {
                let d = angular_delta(a, b);
                assert!(d > -PI && d <= PI, "delta({}, {}) = {}", a, b, d);
                if (d.abs() - PI).abs() > 1e-9 {
                    assert!((d + angular_delta(b, a)).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_reconstruct_azimuths() {
        let a = [azimuth_to_radians(100), azimuth_to_radians(300), azimuth_to_radians(500)];
        let theta = reconstruct_azimuths(&a);
        assert_eq!(theta.len(), 4);
        assert_eq!(theta[0], a[0]);
        assert_eq!(theta[2], a[1]);
        assert!((theta[1] - azimuth_to_radians(200)).abs() < 1e-12);
        assert!((theta[3] - azimuth_to_radians(400)).abs() < 1e-12);
    }

    #[test]
    fn test_reconstruct_azimuths_across_zero() {
        // 359.90° followed by 0.10°: the midpoint is 0° (i.e. -360°), not 180°.
        let a = [azimuth_to_radians(35990), azimuth_to_radians(10)];
        let theta = reconstruct_azimuths(&a);
        assert_eq!(theta[0], a[0]);
        assert!((theta[1] + TAU).abs() < 1e-9);
        assert!(angular_delta(theta[1], a[0]).abs() < angular_delta(a[1], a[0]).abs());
    }

    #[test]
    fn test_range_classification() {
        let acc = vlp16();
        assert_eq!(acc.range_bounds(), (100, 50000));
        assert_eq!(acc.classify(0, 80), (0, 0));
        assert_eq!(acc.classify(99, 80), (0, 0));
        assert_eq!(acc.classify(100, 80), (100, 80));
        assert_eq!(acc.classify(49999, 255), (49999, 255));
        assert_eq!(acc.classify(50000, 80), (0, 0));
        assert_eq!(acc.classify(u16::MAX, 80), (0, 0));
    }

    #[test]
    fn test_grid_mapping_bijection() {
        let acc = vlp16();
        let total = ACCUMULATION_WINDOW * 12 * 32;
        let cells: HashSet<_> = (0..total).map(|i| acc.grid_cell(i)).collect();
        assert_eq!(cells.len(), total);
        assert_eq!(cells.len(), acc.number_of_slices() * 16);
        assert!(
            cells
                .iter()
                .all(|&(slice, beam)| slice < acc.number_of_slices() && beam < 16)
        );
    }

    #[test]
    fn test_config_zero_beams() {
        let mut params = get_parameters(LidarModel::Vlp16);
        params.vertical_beam_count = 0;
        assert!(matches!(ScanAccumulator::new(params), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_not_divisible() {
        let mut params = get_parameters(LidarModel::Vlp16);
        params.vertical_beam_count = 7;
        params.channels_per_block = 10;
        params.blocks_per_packet = 1;
        match ScanAccumulator::new(params) {
            Err(Error::Config(msg)) => assert!(msg.contains("not divisible"), "{}", msg),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_config_inconsistent_geometry() {
        let mut params = get_parameters(LidarModel::Vlp16);
        params.vertical_angles.pop();
        assert!(matches!(ScanAccumulator::new(params), Err(Error::Config(_))));

        let mut params = get_parameters(LidarModel::Vlp16);
        params.block_size = 96;
        assert!(matches!(ScanAccumulator::new(params), Err(Error::Config(_))));

        let mut params = get_parameters(LidarModel::Vlp16);
        params.maximum_range = 500.0;
        assert!(matches!(ScanAccumulator::new(params), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_first_decode_primes_state() {
        let acc = vlp16();
        let packets: Vec<_> = (0..5).map(|i| make_packet(i * 240, 20, 1000, 50)).collect();
        let last = packets[4].clone();
        let mut source = TestSource::new(packets);
        let mut state = DecoderState::new();

        let scan = acc.decode(&mut state, &mut source).await.unwrap();
        assert!(scan.is_none());
        assert_eq!(source.consumed(), ACCUMULATION_WINDOW);
        assert_eq!(state.previous_packet(), Some(last.as_slice()));
        assert_eq!(state.scans(), 0);
    }

    #[tokio::test]
    async fn test_decode_full_scan() {
        let acc = vlp16();
        let mut state = DecoderState::with_previous_packet(make_packet(0, 20, 1000, 50));
        let packets: Vec<_> = (1..6).map(|i| make_packet(i * 240, 20, 2000, 60)).collect();
        let mut source = TestSource::new(packets);

        let scan = acc.decode(&mut state, &mut source).await.unwrap().unwrap();
        assert_eq!(scan.ranges.dim(), (120, 16));
        assert_eq!(scan.intensities.dim(), (120, 16));
        assert_eq!(scan.theta.len(), 120);
        assert_eq!(scan.phi, acc.params().vertical_angles);
        assert_eq!(scan.malformed_blocks, 0);
        assert_eq!(scan.foreign_packets, 0);
        assert_eq!(scan.device_timestamp_us, Some(123_456));
        assert_eq!(scan.return_mode, Some(ReturnMode::Strongest));

        // Carried packet fills the first 24 slices.
        assert_eq!(scan.ranges[[0, 0]], 1000);
        assert_eq!(scan.ranges[[23, 15]], 1000);
        assert_eq!(scan.ranges[[24, 0]], 2000);
        assert_eq!(scan.intensities[[119, 15]], 60);

        // Block azimuths advance by 0.2°, sequences by 0.1°.
        for (k, &theta) in scan.theta.iter().enumerate() {
            let expected = azimuth_to_radians(10 * k as u16);
            assert!((theta - expected).abs() < 1e-9, "theta[{}] = {}", k, theta);
        }

        assert_eq!(state.scans(), 1);
        assert_eq!(
            &state.previous_packet().unwrap()[2..4],
            &1200u16.to_le_bytes()
        );
    }

    #[tokio::test]
    async fn test_out_of_range_readings_zeroed() {
        let acc = vlp16();
        let mut state = DecoderState::with_previous_packet(make_packet(0, 20, 50, 77));
        let packets: Vec<_> = (1..6).map(|i| make_packet(i * 240, 20, 60000, 88)).collect();
        let mut source = TestSource::new(packets);

        let scan = acc.decode(&mut state, &mut source).await.unwrap().unwrap();
        assert_eq!(scan.valid_returns(), 0);
        assert!(scan.intensities.iter().all(|&i| i == 0));
        assert!(scan.to_points().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_block_is_counted_and_decoded() {
        let acc = vlp16();
        let mut previous = make_packet(0, 20, 1500, 40);
        previous[0] = 0x00;
        previous[1] = 0x00;
        let mut state = DecoderState::with_previous_packet(previous);
        let packets: Vec<_> = (1..6).map(|i| make_packet(i * 240, 20, 1500, 40)).collect();
        let mut source = TestSource::new(packets);

        let scan = acc.decode(&mut state, &mut source).await.unwrap().unwrap();
        assert_eq!(scan.malformed_blocks, 1);
        assert_eq!(scan.ranges[[0, 0]], 1500);
        assert_eq!(scan.intensities[[1, 15]], 40);
    }

    #[tokio::test]
    async fn test_short_read_keeps_state() {
        let acc = vlp16();
        let previous = make_packet(0, 20, 1000, 50);
        let mut state = DecoderState::with_previous_packet(previous.clone());
        let mut source = TestSource::new(vec![
            make_packet(240, 20, 1000, 50),
            make_packet(480, 20, 1000, 50)[..600].to_vec(),
        ]);

        match acc.decode(&mut state, &mut source).await {
            Err(Error::ShortRead { expected, actual }) => {
                assert_eq!(expected, PAYLOAD);
                assert_eq!(actual, 600);
            }
            other => panic!("expected short read, got {:?}", other),
        }
        assert_eq!(state.previous_packet(), Some(previous.as_slice()));
        assert_eq!(state.scans(), 0);
    }

    #[tokio::test]
    async fn test_oversized_packet_rejected() {
        let acc = vlp16();
        let mut state = DecoderState::new();
        let mut oversized = make_packet(0, 20, 1000, 50);
        oversized.extend_from_slice(&[0u8; 100]);
        let mut source = TestSource::new(vec![oversized]);

        let err = acc.decode(&mut state, &mut source).await.unwrap_err();
        assert!(matches!(err, Error::ShortRead { .. }));
        assert!(err.is_recoverable());
        assert!(!state.is_primed());
    }

    #[tokio::test]
    async fn test_truncated_carried_packet_primes_again() {
        let acc = vlp16();
        let mut state = DecoderState::with_previous_packet(vec![0xFF, 0xEE, 0x10]);
        let packets: Vec<_> = (1..6).map(|i| make_packet(i * 240, 20, 1000, 50)).collect();
        let last = packets[4].clone();
        let mut source = TestSource::new(packets);

        let scan = acc.decode(&mut state, &mut source).await.unwrap();
        assert!(scan.is_none());
        assert_eq!(state.previous_packet(), Some(last.as_slice()));
        assert_eq!(state.scans(), 0);

        let packets: Vec<_> = (6..11).map(|i| make_packet(i * 240, 20, 1000, 50)).collect();
        let mut source = TestSource::new(packets);
        let scan = acc.decode(&mut state, &mut source).await.unwrap().unwrap();
        assert_eq!(scan.theta[0], azimuth_to_radians(5 * 240));
        assert_eq!(scan.valid_returns(), 120 * 16);
    }

    #[tokio::test]
    async fn test_foreign_product_id_is_counted() {
        let acc = vlp16();
        let mut state = DecoderState::with_previous_packet(make_packet(0, 20, 1000, 50));
        let mut packets: Vec<_> = (1..6).map(|i| make_packet(i * 240, 20, 1000, 50)).collect();
        packets[1][PAYLOAD - 1] = 0x28;
        // The carried packet only supplies azimuths, its trailer is ignored.
        packets[4][PAYLOAD - 1] = 0x28;
        let mut source = TestSource::new(packets);

        let scan = acc.decode(&mut state, &mut source).await.unwrap().unwrap();
        assert_eq!(scan.foreign_packets, 1);
        assert_eq!(scan.malformed_blocks, 0);
        assert_eq!(scan.valid_returns(), 120 * 16);
    }

    #[tokio::test]
    async fn test_reset_primes_again() {
        let acc = vlp16();
        let mut state = DecoderState::with_previous_packet(make_packet(0, 20, 1000, 50));
        let packets: Vec<_> = (1..6).map(|i| make_packet(i * 240, 20, 1000, 50)).collect();
        let mut source = TestSource::new(packets);
        assert!(acc.decode(&mut state, &mut source).await.unwrap().is_some());

        state.reset();
        assert!(!state.is_primed());
        assert_eq!(state.scans(), 1);

        let packets: Vec<_> = (6..11).map(|i| make_packet(i * 240, 20, 1000, 50)).collect();
        let mut source = TestSource::new(packets);
        assert!(acc.decode(&mut state, &mut source).await.unwrap().is_none());
        assert!(state.is_primed());
    }

    #[tokio::test]
    async fn test_points_from_scan() {
        let acc = vlp16();
        let mut state = DecoderState::with_previous_packet(make_packet(0, 20, 5000, 90));
        let packets: Vec<_> = (1..6).map(|i| make_packet(i * 240, 20, 5000, 90)).collect();
        let mut source = TestSource::new(packets);

        let scan = acc.decode(&mut state, &mut source).await.unwrap().unwrap();
        assert!((scan.range_meters(0, 0).unwrap() - 10.0).abs() < 1e-9);

        let points = scan.to_points();
        assert_eq!(points.len(), 120 * 16);
        // Slice 0 at azimuth 0°, beam 0 at -15°.
        assert!((points.x[0] - 10.0 * (-15f32).to_radians().cos()).abs() < 1e-4);
        assert!(points.y[0].abs() < 1e-4);
        assert!((points.z[0] - 10.0 * (-15f32).to_radians().sin()).abs() < 1e-4);
        assert_eq!(points.intensity[0], 90);
    }
}
