// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration surface (spec 6, "Configuration"), matching the
//! teacher's `ServerConfig::from_file` JSON pattern and its
//! `qos-loaders` YAML-from-file precedent.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Root driver configuration: everything a `shmtensor-driver` process
/// needs to serve attach requests for a set of streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub node_id: u32,
    #[serde(default)]
    pub shm: ShmConfig,
    #[serde(default)]
    pub policies: PoliciesConfig,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

/// Shared-memory region sizing defaults, overridable per stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShmConfig {
    #[serde(default = "default_header_nslots")]
    pub header_nslots: u32,
    #[serde(default = "default_header_slot_bytes")]
    pub header_slot_bytes: u32,
    #[serde(default)]
    pub use_hugepages: bool,
    #[serde(default = "default_segment_dir")]
    pub segment_dir: String,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            header_nslots: default_header_nslots(),
            header_slot_bytes: default_header_slot_bytes(),
            use_hugepages: false,
            segment_dir: default_segment_dir(),
        }
    }
}

fn default_header_nslots() -> u32 {
    256
}
fn default_header_slot_bytes() -> u32 {
    256
}
fn default_segment_dir() -> String {
    "/dev/shm".to_string()
}

/// Keepalive and lease timing policy (spec 4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesConfig {
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_grace_intervals")]
    pub grace_intervals: u32,
    #[serde(default = "default_node_id_cooldown_ms")]
    pub node_id_cooldown_ms: u64,
    #[serde(default = "default_consumer_capacity")]
    pub consumer_capacity: u32,
    #[serde(default = "default_consumer_stale_ms")]
    pub consumer_stale_ms: u64,
    #[serde(default)]
    pub allow_dynamic_streams: bool,
    #[serde(default)]
    pub default_profile: String,
    #[serde(default = "default_announce_period_ms")]
    pub announce_period_ms: u64,
    #[serde(default)]
    pub prefault_shm: bool,
    #[serde(default)]
    pub mlock_shm: bool,
    #[serde(default = "default_epoch_gc_enabled")]
    pub epoch_gc_enabled: bool,
    #[serde(default = "default_epoch_gc_keep")]
    pub epoch_gc_keep: u32,
    #[serde(default)]
    pub epoch_gc_min_age_ns: u64,
    #[serde(default = "default_epoch_gc_on_startup")]
    pub epoch_gc_on_startup: bool,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: default_keepalive_interval_ms(),
            grace_intervals: default_grace_intervals(),
            node_id_cooldown_ms: default_node_id_cooldown_ms(),
            consumer_capacity: default_consumer_capacity(),
            consumer_stale_ms: default_consumer_stale_ms(),
            allow_dynamic_streams: false,
            default_profile: String::new(),
            announce_period_ms: default_announce_period_ms(),
            prefault_shm: false,
            mlock_shm: false,
            epoch_gc_enabled: default_epoch_gc_enabled(),
            epoch_gc_keep: default_epoch_gc_keep(),
            epoch_gc_min_age_ns: 0,
            epoch_gc_on_startup: default_epoch_gc_on_startup(),
        }
    }
}

fn default_keepalive_interval_ms() -> u64 {
    1000
}
fn default_grace_intervals() -> u32 {
    3
}
fn default_node_id_cooldown_ms() -> u64 {
    1000
}
fn default_consumer_capacity() -> u32 {
    256
}
fn default_consumer_stale_ms() -> u64 {
    5000
}
fn default_announce_period_ms() -> u64 {
    1000
}
fn default_epoch_gc_enabled() -> bool {
    true
}
fn default_epoch_gc_keep() -> u32 {
    1
}
fn default_epoch_gc_on_startup() -> bool {
    true
}

/// Per-stream region layout and pool plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: u32,
    pub layout_version: u32,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: u16,
    pub nslots: u32,
    pub stride_bytes: u32,
}

/// Per-deployment profile, e.g. distinguishing a low-latency node pool
/// from a bulk-throughput one. Orthogonal to `DriverConfig`; the
/// supervisor consults it when deciding `force_mode`/`force_no_shm`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfileConfig {
    pub per_consumer_enabled: bool,
    #[serde(default)]
    pub descriptor_base: u32,
    #[serde(default)]
    pub descriptor_range: u32,
    #[serde(default)]
    pub control_base: u32,
    #[serde(default)]
    pub control_range: u32,
    #[serde(default)]
    pub descriptor_channel: String,
    #[serde(default)]
    pub control_channel: String,
    #[serde(default)]
    pub force_mode: Option<u8>,
    #[serde(default)]
    pub force_no_shm: bool,
    #[serde(default)]
    pub payload_fallback_uri: Option<String>,
}

impl DriverConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        parse_by_extension(path, &text)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_yaml::to_string(self)
            .map_err(|e| Error::CodecError(format!("serialize driver config: {e}")))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.shm.header_nslots == 0 {
            return Err(Error::InvalidArgument("header_nslots must be > 0".into()));
        }
        if self.shm.header_slot_bytes == 0 {
            return Err(Error::InvalidArgument("header_slot_bytes must be > 0".into()));
        }
        for stream in &self.streams {
            for pool in &stream.pools {
                if pool.stride_bytes == 0 || pool.nslots == 0 {
                    return Err(Error::InvalidArgument(format!(
                        "stream {} pool {} has zero nslots/stride_bytes",
                        stream.stream_id, pool.pool_id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl ProfileConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        parse_by_extension(path, &text)
    }
}

fn parse_by_extension<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> Result<T> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            serde_json::from_str(text).map_err(|e| Error::CodecError(format!("parse json config: {e}")))
        }
        _ => serde_yaml::from_str(text).map_err(|e| Error::CodecError(format!("parse yaml config: {e}"))),
    }
}
