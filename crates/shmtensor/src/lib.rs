// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker-mediated shared-memory transport for streaming tensor frames
//! between a single producer and many consumers.
//!
//! A [`driver`] process owns region creation and the attach/lease
//! protocol; producers and consumers map regions read-write/read-only
//! and exchange frames through a seqlock [`ring::HeaderRing`] paired
//! with one or more [`pool::PayloadPool`]s. A [`supervisor`] process
//! separately tracks consumer HELLOs and assigns per-consumer channels.
//! Control traffic between all of these travels over the [`bus`].

pub mod bus;
pub mod config;
pub mod consumer;
pub mod driver;
pub mod error;
pub mod lease;
pub mod messages;
pub mod pool;
pub mod producer;
pub mod region;
pub mod ring;
pub mod superblock;
pub mod supervisor;
pub mod tensor_header;

pub use error::{Error, ReadOutcome, Result};
