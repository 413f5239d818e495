// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attach leases: the driver's record of a client's claim on a stream's
//! regions (spec 5, "Leases and liveness").

use crate::error::{Error, Result};

/// The role a client attached under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

/// Lease lifecycle state (spec 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    New,
    Active,
    Expiring,
    Detaching,
    Dead,
}

/// A single client's lease on a stream.
#[derive(Debug, Clone)]
pub struct Lease {
    pub lease_id: u64,
    pub stream_id: u32,
    pub client_id: u64,
    pub role: Role,
    pub expiry_ns: u64,
    state: LeaseState,
}

impl Lease {
    pub fn new(lease_id: u64, stream_id: u32, client_id: u64, role: Role, expiry_ns: u64) -> Self {
        Self {
            lease_id,
            stream_id,
            client_id,
            role,
            expiry_ns,
            state: LeaseState::New,
        }
    }

    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// Transition New -> Active once the attach handshake completes.
    pub fn activate(&mut self) -> Result<()> {
        self.transition(LeaseState::New, LeaseState::Active)
    }

    /// Renew a keepalive, extending the expiry and clearing an Expiring
    /// state if the renewal arrived in time.
    pub fn renew(&mut self, new_expiry_ns: u64) -> Result<()> {
        match self.state {
            LeaseState::Active | LeaseState::Expiring => {
                self.expiry_ns = new_expiry_ns;
                self.state = LeaseState::Active;
                Ok(())
            }
            other => Err(Error::Internal(format!("cannot renew lease in state {other:?}"))),
        }
    }

    /// Mark the lease as approaching expiry because a keepalive deadline
    /// was missed. Does not yet revoke access.
    pub fn mark_expiring(&mut self) -> Result<()> {
        self.transition(LeaseState::Active, LeaseState::Expiring)
    }

    /// Begin a graceful client-initiated detach.
    pub fn begin_detach(&mut self) -> Result<()> {
        match self.state {
            LeaseState::Active | LeaseState::Expiring => {
                self.state = LeaseState::Detaching;
                Ok(())
            }
            other => Err(Error::Internal(format!("cannot detach lease in state {other:?}"))),
        }
    }

    /// Finalize the lease, whether by expiry, explicit detach, or
    /// revocation. Idempotent.
    pub fn kill(&mut self) {
        self.state = LeaseState::Dead;
    }

    pub fn is_expired(&self, now_ns: u64) -> bool {
        self.state != LeaseState::Dead && now_ns >= self.expiry_ns
    }

    fn transition(&mut self, from: LeaseState, to: LeaseState) -> Result<()> {
        if self.state != from {
            return Err(Error::Internal(format!(
                "invalid lease transition {:?} -> {:?} from state {:?}",
                from, to, self.state
            )));
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_happy_path() {
        let mut lease = Lease::new(1, 1000, 7, Role::Consumer, 100);
        assert_eq!(lease.state(), LeaseState::New);
        lease.activate().unwrap();
        assert_eq!(lease.state(), LeaseState::Active);
        lease.renew(200).unwrap();
        assert_eq!(lease.expiry_ns, 200);
        lease.begin_detach().unwrap();
        assert_eq!(lease.state(), LeaseState::Detaching);
        lease.kill();
        assert_eq!(lease.state(), LeaseState::Dead);
    }

    #[test]
    fn renew_after_expiring_clears_it() {
        let mut lease = Lease::new(1, 1000, 7, Role::Producer, 100);
        lease.activate().unwrap();
        lease.mark_expiring().unwrap();
        assert_eq!(lease.state(), LeaseState::Expiring);
        lease.renew(500).unwrap();
        assert_eq!(lease.state(), LeaseState::Active);
    }

    #[test]
    fn double_activate_fails() {
        let mut lease = Lease::new(1, 1000, 7, Role::Producer, 100);
        lease.activate().unwrap();
        assert!(lease.activate().is_err());
    }

    #[test]
    fn is_expired_checks_deadline_and_liveness() {
        let mut lease = Lease::new(1, 1000, 7, Role::Producer, 100);
        lease.activate().unwrap();
        assert!(!lease.is_expired(50));
        assert!(lease.is_expired(100));
        lease.kill();
        assert!(!lease.is_expired(200));
    }
}
