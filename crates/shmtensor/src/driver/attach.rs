// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attach handling: resolves `ATTACH_REQUEST` against the driver's known
//! streams and issues leases (spec 4.6, "Attach (async)").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::StreamConfig;
use crate::error::Result;
use crate::lease::{Lease, LeaseState, Role};
use crate::messages::{
    AttachRequest, AttachResponse, PoolDescriptor, PublishMode, ResponseCode,
};

/// Region URIs and layout the driver hands back for a single stream.
#[derive(Debug, Clone)]
pub struct StreamRegions {
    pub epoch: u64,
    pub layout_version: u32,
    pub header_nslots: u32,
    pub header_slot_bytes: u32,
    pub header_region_uri: String,
    pub pools: Vec<PoolDescriptor>,
}

fn role_from_attach(role: crate::messages::AttachRole) -> Role {
    match role {
        crate::messages::AttachRole::Producer => Role::Producer,
        crate::messages::AttachRole::Consumer => Role::Consumer,
    }
}

/// Driver-side attach state: known streams, live leases, and the
/// monotonic lease-id counter (spec 4.6: "driver assigns `lease_id`
/// monotonically per driver instance").
pub struct AttachTable {
    node_id: u32,
    streams: HashMap<u32, StreamRegions>,
    leases: HashMap<u64, Lease>,
    next_lease_id: AtomicU64,
    keepalive_interval_ns: u64,
    grace_intervals: u32,
    default_header_nslots: u32,
    default_header_slot_bytes: u32,
}

impl AttachTable {
    pub fn new(
        node_id: u32,
        keepalive_interval_ns: u64,
        grace_intervals: u32,
        default_header_nslots: u32,
        default_header_slot_bytes: u32,
    ) -> Self {
        Self {
            node_id,
            streams: HashMap::new(),
            leases: HashMap::new(),
            next_lease_id: AtomicU64::new(1),
            keepalive_interval_ns,
            grace_intervals,
            default_header_nslots,
            default_header_slot_bytes,
        }
    }

    pub fn register_stream(&mut self, stream_id: u32, regions: StreamRegions) {
        self.streams.insert(stream_id, regions);
    }

    /// Resolve an `ATTACH_REQUEST` against known streams, honoring
    /// `publish_mode`, and issue a lease on success (spec 4.6).
    pub fn handle_attach(&mut self, req: &AttachRequest, now_ns: u64) -> AttachResponse {
        let base = AttachResponse {
            correlation_id: req.correlation_id,
            code: ResponseCode::Ok,
            error_message: String::new(),
            lease_id: 0,
            lease_expiry_ns: 0,
            stream_id: req.stream_id,
            epoch: 0,
            layout_version: 0,
            header_nslots: 0,
            header_slot_bytes: 0,
            node_id: self.node_id,
            header_region_uri: String::new(),
            pools: Vec::new(),
        };

        let regions = match self.streams.get(&req.stream_id) {
            Some(regions) => regions.clone(),
            None => match req.publish_mode {
                PublishMode::RequireExisting => {
                    return AttachResponse {
                        code: ResponseCode::StreamNotFound,
                        error_message: format!("stream {} not found", req.stream_id),
                        ..base
                    };
                }
                PublishMode::ExistingOrCreate | PublishMode::CreateOnly => {
                    let created = StreamRegions {
                        epoch: 1,
                        layout_version: req.expected_layout_version,
                        header_nslots: self.default_header_nslots,
                        header_slot_bytes: self.default_header_slot_bytes,
                        header_region_uri: format!(
                            "shm://{}/{}/header",
                            self.node_id, req.stream_id
                        ),
                        pools: Vec::new(),
                    };
                    self.streams.insert(req.stream_id, created.clone());
                    created
                }
            },
        };

        if regions.layout_version != req.expected_layout_version {
            return AttachResponse {
                code: ResponseCode::LayoutMismatch,
                error_message: format!(
                    "expected layout_version {}, have {}",
                    req.expected_layout_version, regions.layout_version
                ),
                ..base
            };
        }

        let lease_id = self.next_lease_id.fetch_add(1, Ordering::Relaxed);
        let expiry_ns = now_ns + self.keepalive_interval_ns * self.grace_intervals as u64;
        let mut lease = Lease::new(
            lease_id,
            req.stream_id,
            req.client_id,
            role_from_attach(req.role),
            expiry_ns,
        );
        lease.activate().expect("freshly constructed lease is New");
        self.leases.insert(lease_id, lease);

        AttachResponse {
            code: ResponseCode::Ok,
            lease_id,
            lease_expiry_ns: expiry_ns,
            epoch: regions.epoch,
            layout_version: regions.layout_version,
            header_nslots: regions.header_nslots,
            header_slot_bytes: regions.header_slot_bytes,
            header_region_uri: regions.header_region_uri,
            pools: regions.pools,
            ..base
        }
    }

    pub fn handle_detach(&mut self, lease_id: u64) -> Result<()> {
        if let Some(lease) = self.leases.get_mut(&lease_id) {
            lease.begin_detach()?;
            lease.kill();
        }
        Ok(())
    }

    pub fn lease(&self, lease_id: u64) -> Option<&Lease> {
        self.leases.get(&lease_id)
    }

    pub fn lease_mut(&mut self, lease_id: u64) -> Option<&mut Lease> {
        self.leases.get_mut(&lease_id)
    }

    /// All leases currently Active or Expiring — candidates for sweep.
    pub fn live_leases(&self) -> impl Iterator<Item = &Lease> {
        self.leases
            .values()
            .filter(|l| matches!(l.state(), LeaseState::Active | LeaseState::Expiring))
    }
}

/// Build a driver's known-stream table from its loaded configuration.
/// Region URIs follow `shm://<node_id>/<stream_id>/{header,pool-<id>}`.
pub fn regions_from_stream_config(node_id: u32, epoch: u64, cfg: &StreamConfig, header_nslots: u32, header_slot_bytes: u32) -> StreamRegions {
    let pools = cfg
        .pools
        .iter()
        .map(|p| PoolDescriptor {
            pool_id: p.pool_id,
            nslots: p.nslots,
            stride_bytes: p.stride_bytes,
            uri: format!("shm://{node_id}/{}/pool-{}", cfg.stream_id, p.pool_id),
        })
        .collect();
    StreamRegions {
        epoch,
        layout_version: cfg.layout_version,
        header_nslots,
        header_slot_bytes,
        header_region_uri: format!("shm://{node_id}/{}/header", cfg.stream_id),
        pools,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::AttachRole;

    fn sample_request(stream_id: u32) -> AttachRequest {
        AttachRequest {
            correlation_id: 1,
            stream_id,
            client_id: 55,
            role: AttachRole::Consumer,
            expected_layout_version: 1,
            publish_mode: PublishMode::RequireExisting,
            require_hugepages: false,
            desired_node_id: 0,
        }
    }

    #[test]
    fn attach_to_unknown_stream_returns_not_found() {
        let mut table = AttachTable::new(1, 1_000_000_000, 3, 256, 256);
        let resp = table.handle_attach(&sample_request(10000), 0);
        assert_eq!(resp.code, ResponseCode::StreamNotFound);
    }

    #[test]
    fn attach_to_known_stream_issues_lease() {
        let mut table = AttachTable::new(1, 1_000_000_000, 3, 256, 256);
        table.register_stream(
            10000,
            StreamRegions {
                epoch: 1,
                layout_version: 1,
                header_nslots: 256,
                header_slot_bytes: 256,
                header_region_uri: "shm://1/10000/header".into(),
                pools: vec![],
            },
        );
        let resp = table.handle_attach(&sample_request(10000), 0);
        assert_eq!(resp.code, ResponseCode::Ok);
        assert_eq!(resp.lease_id, 1);
        assert!(table.lease(resp.lease_id).is_some());
    }

    #[test]
    fn attach_with_wrong_layout_version_rejected() {
        let mut table = AttachTable::new(1, 1_000_000_000, 3, 256, 256);
        table.register_stream(
            10000,
            StreamRegions {
                epoch: 1,
                layout_version: 2,
                header_nslots: 256,
                header_slot_bytes: 256,
                header_region_uri: "shm://1/10000/header".into(),
                pools: vec![],
            },
        );
        let resp = table.handle_attach(&sample_request(10000), 0);
        assert_eq!(resp.code, ResponseCode::LayoutMismatch);
    }

    #[test]
    fn existing_or_create_mode_creates_unknown_stream() {
        let mut table = AttachTable::new(1, 1_000_000_000, 3, 256, 256);
        let mut req = sample_request(20000);
        req.publish_mode = PublishMode::ExistingOrCreate;
        req.expected_layout_version = 7;

        let resp = table.handle_attach(&req, 0);
        assert_eq!(resp.code, ResponseCode::Ok);
        assert_eq!(resp.layout_version, 7);
        assert_eq!(resp.header_nslots, 256);
        assert_eq!(resp.header_slot_bytes, 256);

        // The created stream persists: a second attach sees the same layout.
        let resp2 = table.handle_attach(&sample_request_with_layout(20000, 7), 0);
        assert_eq!(resp2.code, ResponseCode::Ok);
    }

    fn sample_request_with_layout(stream_id: u32, layout_version: u32) -> AttachRequest {
        AttachRequest {
            expected_layout_version: layout_version,
            publish_mode: PublishMode::RequireExisting,
            ..sample_request(stream_id)
        }
    }

    #[test]
    fn create_only_mode_creates_unknown_stream() {
        let mut table = AttachTable::new(1, 1_000_000_000, 3, 256, 256);
        let mut req = sample_request(21000);
        req.publish_mode = PublishMode::CreateOnly;

        let resp = table.handle_attach(&req, 0);
        assert_eq!(resp.code, ResponseCode::Ok);
    }

    #[test]
    fn detach_kills_lease() {
        let mut table = AttachTable::new(1, 1_000_000_000, 3, 256, 256);
        table.register_stream(
            10000,
            StreamRegions {
                epoch: 1,
                layout_version: 1,
                header_nslots: 256,
                header_slot_bytes: 256,
                header_region_uri: "shm://1/10000/header".into(),
                pools: vec![],
            },
        );
        let resp = table.handle_attach(&sample_request(10000), 0);
        table.handle_detach(resp.lease_id).unwrap();
        assert_eq!(table.lease(resp.lease_id).unwrap().state(), LeaseState::Dead);
    }
}
