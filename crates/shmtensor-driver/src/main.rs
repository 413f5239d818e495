// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shmtensor::bus::{publish_message, Bus, ChannelBus, FragmentReassembler};
use shmtensor::config::{DriverConfig, StreamConfig};
use shmtensor::driver::attach::{regions_from_stream_config, AttachTable};
use shmtensor::driver::{EpochGc, KeepaliveTracker};
use shmtensor::lease::Role;
use shmtensor::messages::{AttachRole, Message};

#[derive(Parser, Debug)]
#[command(name = "shmtensor-driver", about = "Shared-memory tensor transport driver")]
struct Args {
    /// Path to the driver configuration file (YAML or JSON).
    #[arg(long)]
    config: String,

    /// How often to run the keepalive/consumer sweep, in milliseconds.
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,
}

#[derive(Debug, thiserror::Error)]
enum DriverError {
    #[error("tick_ms must be greater than zero")]
    InvalidTickMs,
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("driver exited with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.tick_ms == 0 {
        return Err(DriverError::InvalidTickMs.into());
    }

    let config = DriverConfig::from_file(&args.config)?;
    config.validate()?;

    info!(node_id = config.node_id, streams = config.streams.len(), "starting shmtensor-driver");

    let mut table = AttachTable::new(
        config.node_id,
        config.policies.keepalive_interval_ms * 1_000_000,
        config.policies.grace_intervals,
        config.shm.header_nslots,
        config.shm.header_slot_bytes,
    );
    let mut epoch_gc = EpochGc::new();
    for stream in &config.streams {
        let epoch = epoch_gc.bump_epoch(stream.stream_id);
        table.register_stream(
            stream.stream_id,
            regions_from_stream_config(
                config.node_id,
                epoch,
                stream,
                config.shm.header_nslots,
                config.shm.header_slot_bytes,
            ),
        );
    }

    let keepalive = KeepaliveTracker::new(
        config.policies.keepalive_interval_ms * 1_000_000,
        config.policies.grace_intervals,
    );

    let (bus, _peer) = ChannelBus::new_pair();
    let mut reassembler = FragmentReassembler::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms));

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                do_work(
                    &bus,
                    &mut table,
                    &mut reassembler,
                    &keepalive,
                    &mut epoch_gc,
                    &config.streams,
                    config.node_id,
                    config.shm.header_nslots,
                    config.shm.header_slot_bytes,
                )?;
            }
            _ = &mut shutdown => {
                info!("received shutdown signal, detaching and exiting");
                break;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn do_work(
    bus: &dyn Bus,
    table: &mut AttachTable,
    reassembler: &mut FragmentReassembler,
    keepalive: &KeepaliveTracker,
    epoch_gc: &mut EpochGc,
    streams: &[StreamConfig],
    node_id: u32,
    header_nslots: u32,
    header_slot_bytes: u32,
) -> anyhow::Result<()> {
    let now = now_ns();
    let mut producer_departures: Vec<u32> = Vec::new();

    for fragment in bus.poll_fragments(64) {
        let message_id = fragment.message_id;
        if let Some(encoded) = reassembler.feed(fragment) {
            match Message::decode(&encoded) {
                Ok(Message::AttachRequest(req)) => {
                    let response = table.handle_attach(&req, now);
                    publish_message(bus, message_id, &Message::AttachResponse(response))?;
                }
                Ok(Message::DetachRequest(req)) => {
                    if let Some(lease) = table.lease(req.lease_id) {
                        if lease.role == Role::Producer {
                            producer_departures.push(lease.stream_id);
                        }
                    }
                    table.handle_detach(req.lease_id)?;
                }
                Ok(_) | Err(_) => {
                    // Unhandled or malformed fragment: per spec 7, a
                    // CODEC_ERROR on a bus fragment drops that fragment
                    // only.
                }
            }
        }
    }

    for revoked in keepalive.sweep(table, now) {
        if revoked.role == AttachRole::Producer {
            producer_departures.push(revoked.stream_id);
        }
        publish_message(bus, revoked.lease_id, &Message::LeaseRevoked(revoked))?;
    }

    for stream_id in producer_departures {
        if !epoch_gc.is_reclaimable(table, stream_id) {
            continue;
        }
        let Some(cfg) = streams.iter().find(|s| s.stream_id == stream_id) else {
            continue;
        };
        let epoch = epoch_gc.bump_epoch(stream_id);
        table.register_stream(
            stream_id,
            regions_from_stream_config(node_id, epoch, cfg, header_nslots, header_slot_bytes),
        );
        info!(stream_id, epoch, "reclaimed stream regions after last producer departed");
    }

    Ok(())
}
