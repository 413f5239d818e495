// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Keepalive renewal and expiry detection (spec 4.6, "Keepalive"; spec
//! 4.8, "Lease (driver-side)").

use crate::error::Result;
use crate::lease::LeaseState;
use crate::messages::LeaseRevoked;

use super::attach::AttachTable;

/// Drives the expiry side of the lease state machine: renews on
/// keepalive, marks leases `Expiring` once past their deadline, and
/// finalizes them to `Dead` after a `LEASE_REVOKED` has been emitted.
pub struct KeepaliveTracker {
    keepalive_interval_ns: u64,
    grace_intervals: u32,
}

impl KeepaliveTracker {
    pub fn new(keepalive_interval_ns: u64, grace_intervals: u32) -> Self {
        Self {
            keepalive_interval_ns,
            grace_intervals,
        }
    }

    /// Renew `lease_id`'s expiry in response to a keepalive received at
    /// `now_ns`.
    pub fn renew(&self, table: &mut AttachTable, lease_id: u64, now_ns: u64) -> Result<()> {
        let expiry = now_ns + self.keepalive_interval_ns * self.grace_intervals as u64;
        if let Some(lease) = table.lease_mut(lease_id) {
            lease.renew(expiry)?;
        }
        Ok(())
    }

    /// Sweep all live leases, returning `LEASE_REVOKED` messages for any
    /// that missed their keepalive deadline at `now_ns`.
    pub fn sweep(&self, table: &mut AttachTable, now_ns: u64) -> Vec<LeaseRevoked> {
        let expired: Vec<(u64, u32, u64, crate::lease::Role)> = table
            .live_leases()
            .filter(|l| l.is_expired(now_ns))
            .map(|l| (l.lease_id, l.stream_id, l.client_id, l.role))
            .collect();

        let mut revocations = Vec::with_capacity(expired.len());
        for (lease_id, stream_id, client_id, role) in expired {
            if let Some(lease) = table.lease_mut(lease_id) {
                if lease.state() == LeaseState::Active {
                    let _ = lease.mark_expiring();
                }
                lease.kill();
            }
            revocations.push(LeaseRevoked {
                lease_id,
                stream_id,
                client_id,
                role: role_to_attach(role),
                reason: "EXPIRED".to_string(),
            });
        }
        revocations
    }
}

fn role_to_attach(role: crate::lease::Role) -> crate::messages::AttachRole {
    match role {
        crate::lease::Role::Producer => crate::messages::AttachRole::Producer,
        crate::lease::Role::Consumer => crate::messages::AttachRole::Consumer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::attach::StreamRegions;
    use crate::messages::{AttachRequest, AttachRole, PublishMode};

    fn setup() -> (AttachTable, u64) {
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
        let resp = table.handle_attach(
            &AttachRequest {
                correlation_id: 1,
                stream_id: 10000,
                client_id: 7,
                role: AttachRole::Consumer,
                expected_layout_version: 1,
                publish_mode: PublishMode::RequireExisting,
                require_hugepages: false,
                desired_node_id: 0,
            },
            0,
        );
        (table, resp.lease_id)
    }

    #[test]
    fn sweep_revokes_only_past_deadline() {
        let (mut table, lease_id) = setup();
        let tracker = KeepaliveTracker::new(1_000_000_000, 3);

        let none_yet = tracker.sweep(&mut table, 1_000_000_000);
        assert!(none_yet.is_empty());

        let revoked = tracker.sweep(&mut table, 4_000_000_001);
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].lease_id, lease_id);
        assert_eq!(revoked[0].reason, "EXPIRED");
    }

    #[test]
    fn renew_before_deadline_prevents_revocation() {
        let (mut table, lease_id) = setup();
        let tracker = KeepaliveTracker::new(1_000_000_000, 3);
        tracker.renew(&mut table, lease_id, 2_000_000_000).unwrap();

        let revoked = tracker.sweep(&mut table, 4_000_000_001);
        assert!(revoked.is_empty());
    }
}
