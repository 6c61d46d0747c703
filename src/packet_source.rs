// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction for the scan accumulator.
//!
//! The accumulator pulls packets on demand through the [`PacketSource`]
//! trait, which keeps socket handling out of the decoder and lets tests replay
//! synthetic packets:
//!
//! - [`UdpSource`]: live sensor over UDP, with a per-read timeout
//! - [`TestSource`]: pre-defined packets for unit and integration tests
//!
//! # Example
//!
//! ```ignore
//! use velodyne_lidarpub::packet_source::{PacketSource, TestSource};
//!
//! let mut source = TestSource::new(packets);
//! let mut buf = [0u8; 2048];
//! while source.has_more() {
//!     let len = source.recv(&mut buf).await?;
//!     // Process buf[..len]
//! }
//! ```

use crate::lidar::Error;
use std::{future::Future, net::IpAddr, pin::Pin, time::Duration};
use tracing::trace;

/// Trait for packet sources.
pub trait PacketSource: Send {
    /// Receive the next packet payload into the provided buffer.
    ///
    /// # Returns
    /// - `Ok(len)` - Number of bytes received
    /// - `Err` - I/O, timeout or source error
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>>;

    /// Check if more packets are available.
    ///
    /// For infinite sources (like UDP), always returns `true`.
    fn has_more(&self) -> bool;
}

/// UDP socket packet source for live sensor operation.
///
/// A UDP socket already strips the Ethernet/IP/UDP headers, so each datagram
/// is exactly one packet payload.
pub struct UdpSource {
    socket: tokio::net::UdpSocket,
    /// Only accept datagrams sent from this address
    device: Option<IpAddr>,
    /// Upper bound on the wait for a single datagram
    read_timeout: Duration,
}

impl UdpSource {
    /// Create a new UDP source from an existing socket.
    pub fn new(
        socket: tokio::net::UdpSocket,
        device: Option<IpAddr>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            socket,
            device,
            read_timeout,
        }
    }

    /// Bind to an address and create a UDP source.
    pub async fn bind(
        addr: &str,
        device: Option<IpAddr>,
        read_timeout: Duration,
    ) -> Result<Self, Error> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        Ok(Self::new(socket, device, read_timeout))
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketSource for UdpSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        let socket = &self.socket;
        let device = self.device;
        let read_timeout = self.read_timeout;

        Box::pin(async move {
            let read = async move {
                loop {
                    let (len, src) = socket.recv_from(buf).await?;
                    match device {
                        Some(device) if device != src.ip() => {
                            trace!("dropping {} byte datagram from {}", len, src);
                        }
                        _ => return Ok::<usize, Error>(len),
                    }
                }
            };

            match tokio::time::timeout(read_timeout, read).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(read_timeout)),
            }
        })
    }

    fn has_more(&self) -> bool {
        true // UDP sources are infinite
    }
}

/// Test packet source for unit testing.
///
/// Provides a sequence of pre-defined packets for testing decoder logic
/// without hardware. Reading past the end fails with [`Error::Timeout`],
/// the same way a silent sensor does.
pub struct TestSource {
    packets: Vec<Vec<u8>>,
    index: usize,
}

impl TestSource {
    /// Create a new test source with the given packets.
    pub fn new(packets: Vec<Vec<u8>>) -> Self {
        Self { packets, index: 0 }
    }

    /// Create an empty test source.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Get the number of packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Number of packets already delivered.
    pub fn consumed(&self) -> usize {
        self.index
    }
}

impl PacketSource for TestSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move {
            let Some(packet) = self.packets.get(self.index) else {
                return Err(Error::Timeout(Duration::ZERO));
            };

            let len = packet.len().min(buf.len());
            buf[..len].copy_from_slice(&packet[..len]);
            self.index += 1;
            Ok(len)
        })
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }
}
