// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer registry: tracks one session per `consumer_id` and assigns
//! per-consumer descriptor/control channels on HELLO (spec 4.7, 4.8
//! "Consumer session (supervisor)").

use std::collections::HashMap;

use crate::config::ProfileConfig;
use crate::error::{Error, Result};
use crate::messages::ConsumerConfig;

use super::stats::SupervisorStats;

/// `FREE ↔ LIVE ↔ STALE` (spec 4.8). `FREE` is represented by the
/// absence of an entry rather than a variant, matching the "capacity is
/// fixed at init" free-list framing in spec 4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Live,
    Stale,
}

#[derive(Debug, Clone)]
pub struct ConsumerSession {
    pub consumer_id: u32,
    pub stream_id: u32,
    pub mode: u8,
    pub use_shm: bool,
    pub last_seen_ns: u64,
    pub assigned_descriptor_stream_id: u32,
    pub assigned_control_stream_id: u32,
    pub assigned_descriptor_channel: String,
    pub assigned_control_channel: String,
    pub state: SessionState,
}

/// Fixed-capacity consumer registry (spec 4.7: "Capacity is fixed at
/// init (`consumer_capacity`)").
pub struct ConsumerRegistry {
    capacity: u32,
    stale_ns: u64,
    profile: ProfileConfig,
    sessions: HashMap<u32, ConsumerSession>,
    stats: SupervisorStats,
}

impl ConsumerRegistry {
    pub fn new(capacity: u32, stale_ns: u64, profile: ProfileConfig) -> Self {
        Self {
            capacity,
            stale_ns,
            profile,
            sessions: HashMap::new(),
            stats: SupervisorStats::default(),
        }
    }

    /// Handle a `CONSUMER_HELLO`: create or refresh the consumer's
    /// session and return the `CONSUMER_CONFIG` to emit (spec 4.7, "On
    /// HELLO for `consumer_id`").
    pub fn on_hello(&mut self, stream_id: u32, consumer_id: u32, now_ns: u64) -> Result<ConsumerConfig> {
        self.stats.hello_count += 1;

        if !self.sessions.contains_key(&consumer_id) && self.sessions.len() as u32 >= self.capacity {
            return Err(Error::ResourceExhausted(format!(
                "consumer registry at capacity ({})",
                self.capacity
            )));
        }

        let (
            descriptor_stream_id,
            control_stream_id,
            descriptor_channel,
            control_channel,
            use_shm,
            mode,
            payload_fallback_uri,
        ) = self.assign(consumer_id);

        self.sessions.insert(
            consumer_id,
            ConsumerSession {
                consumer_id,
                stream_id,
                mode,
                use_shm,
                last_seen_ns: now_ns,
                assigned_descriptor_stream_id: descriptor_stream_id,
                assigned_control_stream_id: control_stream_id,
                assigned_descriptor_channel: descriptor_channel.clone(),
                assigned_control_channel: control_channel.clone(),
                state: SessionState::Live,
            },
        );

        self.stats.config_count += 1;
        Ok(ConsumerConfig {
            stream_id,
            consumer_id,
            descriptor_stream_id,
            control_stream_id,
            descriptor_channel,
            control_channel,
            use_shm,
            mode,
            payload_fallback_uri,
        })
    }

    fn assign(&self, consumer_id: u32) -> (u32, u32, String, String, bool, u8, String) {
        if !self.profile.per_consumer_enabled {
            return (
                0,
                0,
                String::new(),
                String::new(),
                !self.profile.force_no_shm,
                self.profile.force_mode.unwrap_or(0),
                String::new(),
            );
        }
        let descriptor_stream_id = self.profile.descriptor_base + (consumer_id % self.profile.descriptor_range.max(1));
        let control_stream_id = self.profile.control_base + (consumer_id % self.profile.control_range.max(1));
        let descriptor_channel = self.profile.descriptor_channel.clone();
        let control_channel = self.profile.control_channel.clone();
        let use_shm = !self.profile.force_no_shm;
        let mode = self.profile.force_mode.unwrap_or(0);
        let payload_fallback_uri = self.profile.payload_fallback_uri.clone().unwrap_or_default();
        (
            descriptor_stream_id,
            control_stream_id,
            descriptor_channel,
            control_channel,
            use_shm,
            mode,
            payload_fallback_uri,
        )
    }

    pub fn note_qos_consumer(&mut self) {
        self.stats.qos_consumer_count += 1;
    }

    pub fn note_qos_producer(&mut self) {
        self.stats.qos_producer_count += 1;
    }

    pub fn note_announce(&mut self) {
        self.stats.announce_count += 1;
    }

    pub fn note_metadata(&mut self) {
        self.stats.metadata_count += 1;
    }

    /// Sweep sessions with no HELLO within `consumer_stale_ms`: `LIVE ->
    /// STALE`, then a session already `STALE` is dropped (`STALE ->
    /// FREE`), freeing its capacity slot (spec 4.7, "Stale entries ...
    /// are swept on each `do_work`").
    pub fn sweep(&mut self, now_ns: u64) {
        let mut to_drop = Vec::new();
        for session in self.sessions.values_mut() {
            let stale = now_ns.saturating_sub(session.last_seen_ns) > self.stale_ns;
            match (session.state, stale) {
                (SessionState::Live, true) => session.state = SessionState::Stale,
                (SessionState::Stale, true) => to_drop.push(session.consumer_id),
                _ => {}
            }
        }
        for id in to_drop {
            self.sessions.remove(&id);
        }
    }

    pub fn session(&self, consumer_id: u32) -> Option<&ConsumerSession> {
        self.sessions.get(&consumer_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get_stats(&self) -> &SupervisorStats {
        &self.stats
    }
}
