// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use std::{net::SocketAddr, time::Duration};
use tracing::{debug, error, info, warn};
use velodyne_lidarpub::{
    packet_source::UdpSource,
    velodyne::{DecoderState, ScanAccumulator, ScanRecord},
};

/// Consecutive failed windows after which the carried packet is considered
/// stale and the decoder primes again.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .init();

    // Parameter problems are deployment errors, fail before touching the network.
    let accumulator = ScanAccumulator::for_model(args.model)?;
    debug!("{:?}", accumulator.params());

    let bind_addr = SocketAddr::new(args.bind, args.port);
    let mut source = UdpSource::bind(
        &bind_addr.to_string(),
        args.device,
        Duration::from_millis(args.read_timeout_ms),
    )
    .await?;
    info!(
        "listening for {} packets on {} from {}",
        args.model,
        source.local_addr()?,
        args.device
            .map_or_else(|| "any sender".to_string(), |ip| ip.to_string())
    );

    let mut state = DecoderState::new();
    let mut failures = 0u64;
    let mut consecutive_failures = 0u32;

    loop {
        let result = tokio::select! {
            result = accumulator.decode(&mut state, &mut source) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(result) = result else {
            info!("interrupted after {} scans", state.scans());
            break;
        };

        match result {
            Ok(Some(scan)) => {
                consecutive_failures = 0;
                report_scan(&scan);
            }
            Ok(None) => {
                consecutive_failures = 0;
                debug!("decoder primed, waiting for the next window");
            }
            Err(e) if e.is_recoverable() => {
                failures += 1;
                consecutive_failures += 1;
                warn!("scan abandoned: {} ({} total)", e, failures);
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES && state.is_primed() {
                    warn!(
                        "{} consecutive failures, dropping carried packet",
                        consecutive_failures
                    );
                    state.reset();
                }
            }
            Err(e) => {
                error!("scan decoding failed: {}", e);
                return Err(e.into());
            }
        }

        if args.max_scans.is_some_and(|max| state.scans() >= max) {
            info!("completed {} scans", state.scans());
            break;
        }
    }

    Ok(())
}

fn report_scan(scan: &ScanRecord) {
    let points = scan.to_points();
    let (first, last) = match (scan.theta.first(), scan.theta.last()) {
        (Some(first), Some(last)) => (first.to_degrees(), last.to_degrees()),
        _ => (0.0, 0.0),
    };

    if scan.foreign_packets > 0 {
        warn!(
            "scan {} contains {} packets from another product",
            scan.scan_id, scan.foreign_packets
        );
    }

    if scan.malformed_blocks > 0 {
        warn!(
            "scan {} contains {} malformed blocks",
            scan.scan_id, scan.malformed_blocks
        );
    }

    info!(
        "scan {}: {}x{} cells, {} points, azimuth {:.2}° to {:.2}°",
        scan.scan_id,
        scan.number_of_slices(),
        scan.vertical_beam_count(),
        points.len(),
        first,
        last
    );
    debug!(
        "scan {} device time {:?} us, return mode {:?}",
        scan.scan_id, scan.device_timestamp_us, scan.return_mode
    );
}
