// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run context shared between the interrupt handler and the run loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::{EnvConfig, DEFAULT_POLL_PERIOD, DEFAULT_PUBLISH_PERIOD};

/// Shutdown flag plus loop cadence.
///
/// The interrupt handler is the only writer of the flag; the harvester and
/// the motion loop read it once at the top of every iteration.
#[derive(Debug)]
pub struct RunContext {
    shutdown: AtomicBool,
    publish_period: Duration,
    poll_period: Duration,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            publish_period: DEFAULT_PUBLISH_PERIOD,
            poll_period: DEFAULT_POLL_PERIOD,
        }
    }

    pub fn from_config(config: &EnvConfig) -> Self {
        Self::new()
            .with_publish_period(config.publish_period)
            .with_poll_period(config.poll_period)
    }

    pub fn with_publish_period(mut self, period: Duration) -> Self {
        self.publish_period = period;
        self
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Ask both loops to stop at their next iteration.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn publish_period(&self) -> Duration {
        self.publish_period
    }

    pub fn poll_period(&self) -> Duration {
        self.poll_period
    }
}
