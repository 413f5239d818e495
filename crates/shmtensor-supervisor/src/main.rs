// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shmtensor::bus::{publish_message, Bus, ChannelBus, FragmentReassembler};
use shmtensor::config::ProfileConfig;
use shmtensor::messages::Message;
use shmtensor::supervisor::ConsumerRegistry;

#[derive(Parser, Debug)]
#[command(name = "shmtensor-supervisor", about = "Consumer registry and channel assignment")]
struct Args {
    /// Path to the supervisor profile file (YAML or JSON).
    #[arg(long)]
    profile: String,

    /// Maximum number of tracked consumer sessions.
    #[arg(long, default_value_t = 256)]
    consumer_capacity: u32,

    /// Stale threshold in milliseconds before a session is swept.
    #[arg(long, default_value_t = 5000)]
    consumer_stale_ms: u64,

    /// How often to run the stale-session sweep, in milliseconds.
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,
}

#[derive(Debug, thiserror::Error)]
enum SupervisorError {
    #[error("consumer_capacity must be greater than zero")]
    InvalidCapacity,
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
            error!("supervisor exited with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.consumer_capacity == 0 {
        return Err(SupervisorError::InvalidCapacity.into());
    }

    let profile = ProfileConfig::from_file(&args.profile)?;
    info!(
        per_consumer_enabled = profile.per_consumer_enabled,
        capacity = args.consumer_capacity,
        "starting shmtensor-supervisor"
    );

    let mut registry = ConsumerRegistry::new(
        args.consumer_capacity,
        args.consumer_stale_ms * 1_000_000,
        profile,
    );

    let (bus, _peer) = ChannelBus::new_pair();
    let mut reassembler = FragmentReassembler::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms));

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                do_work(&bus, &mut registry, &mut reassembler)?;
            }
            _ = &mut shutdown => {
                info!("received shutdown signal, exiting");
                break;
            }
        }
    }

    let stats = registry.get_stats();
    info!(
        hello_count = stats.hello_count,
        config_count = stats.config_count,
        "final supervisor counters"
    );
    Ok(())
}

fn do_work(bus: &dyn Bus, registry: &mut ConsumerRegistry, reassembler: &mut FragmentReassembler) -> anyhow::Result<()> {
    let now = now_ns();

    for fragment in bus.poll_fragments(64) {
        let message_id = fragment.message_id;
        if let Some(encoded) = reassembler.feed(fragment) {
            match Message::decode(&encoded) {
                Ok(Message::ConsumerHello(hello)) => {
                    let config = registry.on_hello(hello.stream_id, hello.consumer_id, now)?;
                    publish_message(bus, message_id, &Message::ConsumerConfig(config))?;
                }
                Ok(Message::QosConsumer(_)) => registry.note_qos_consumer(),
                Ok(Message::QosProducer(_)) => registry.note_qos_producer(),
                Ok(_) | Err(_) => {}
            }
        }
    }

    registry.sweep(now);
    Ok(())
}
