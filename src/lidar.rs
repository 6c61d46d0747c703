// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common LiDAR types shared by the parameter table, the scan accumulator and
//! the packet sources.

use std::{fmt, time::Duration};

/// Cartesian point cloud derived from a range scan.
///
/// Structure-of-arrays layout, one entry per valid return.
#[derive(Clone, Debug, Default)]
pub struct Points {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub intensity: Vec<u8>,
}

impl Points {
    /// Create an empty point cloud with room for `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            intensity: Vec::with_capacity(capacity),
        }
    }

    /// Append a single point.
    pub fn push(&mut self, x: f32, y: f32, z: f32, intensity: u8) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        self.intensity.push(intensity);
    }

    /// Get the current number of points
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Common error type for LiDAR decoding.
///
/// Packet read failures (`ShortRead`, `Timeout`, `Io`) are operational
/// conditions of a UDP sensor link, see [`Error::is_recoverable`]. `Config`
/// and `UnsupportedModel` are deployment errors and should stop the process.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the packet source socket
    Io(std::io::Error),
    /// Packet source returned fewer (or more) bytes than a full payload
    ShortRead { expected: usize, actual: usize },
    /// Packet source did not deliver a packet in time
    Timeout(Duration),
    /// Inconsistent model parameters
    Config(String),
    /// Unknown lidar model requested
    UnsupportedModel(String),
    /// Unexpected end of data at given byte position
    UnexpectedEnd(usize),
    /// System time error
    SystemTime(std::time::SystemTimeError),
}

impl Error {
    /// Whether the caller may retry the decode on its next invocation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ShortRead { .. } | Error::Timeout(_)
        )
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::ShortRead { expected, actual } => write!(
                f,
                "packet read returned {} bytes, expected {}",
                actual, expected
            ),
            Error::Timeout(after) => write!(f, "packet read timed out after {:?}", after),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::UnsupportedModel(model) => write!(f, "unsupported lidar model: {}", model),
            Error::UnexpectedEnd(len) => write!(f, "unexpected end of data at {} bytes", len),
            Error::SystemTime(err) => write!(f, "system time error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(err: std::time::SystemTimeError) -> Self {
        Error::SystemTime(err)
    }
}

/// Get current host timestamp in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW`. On other platforms, falls back to
/// `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}
