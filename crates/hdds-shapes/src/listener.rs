// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Status event reporting.
//!
//! Backends translate their native listener callbacks into [`EntityEvent`]
//! values and hand them to an [`EventListener`], which prints them in the
//! `on_<status>() topic: '<t>'  type: '<T>' : ...` form the interop harness
//! matches on. Events may arrive from backend threads.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::output::{ShapeOutput, StdoutOutput};

/// Status change on a writer or reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityEvent {
    PublicationMatched {
        current_count: i32,
        current_count_change: i32,
    },
    SubscriptionMatched {
        current_count: i32,
        current_count_change: i32,
    },
    OfferedIncompatibleQos {
        policy_id: u32,
    },
    RequestedIncompatibleQos {
        policy_id: u32,
    },
    OfferedDeadlineMissed {
        total_count: i32,
        total_count_change: i32,
    },
    RequestedDeadlineMissed {
        total_count: i32,
        total_count_change: i32,
    },
    LivelinessLost {
        total_count: i32,
        total_count_change: i32,
    },
    LivelinessChanged {
        alive_count: i32,
        not_alive_count: i32,
    },
}

impl EntityEvent {
    pub fn callback_name(&self) -> &'static str {
        match self {
            Self::PublicationMatched { .. } => "on_publication_matched",
            Self::SubscriptionMatched { .. } => "on_subscription_matched",
            Self::OfferedIncompatibleQos { .. } => "on_offered_incompatible_qos",
            Self::RequestedIncompatibleQos { .. } => "on_requested_incompatible_qos",
            Self::OfferedDeadlineMissed { .. } => "on_offered_deadline_missed",
            Self::RequestedDeadlineMissed { .. } => "on_requested_deadline_missed",
            Self::LivelinessLost { .. } => "on_liveliness_lost",
            Self::LivelinessChanged { .. } => "on_liveliness_changed",
        }
    }

    /// Render the harness line for an event on `topic` of type `type_name`.
    pub fn render(&self, topic: &str, type_name: &str) -> String {
        let head = format!(
            "{}() topic: '{}'  type: '{}'",
            self.callback_name(),
            topic,
            type_name
        );
        match self {
            Self::PublicationMatched {
                current_count,
                current_count_change,
            } => format!(
                "{} : matched readers {} (change = {})",
                head, current_count, current_count_change
            ),
            Self::SubscriptionMatched {
                current_count,
                current_count_change,
            } => format!(
                "{} : matched writers {} (change = {})",
                head, current_count, current_count_change
            ),
            Self::OfferedIncompatibleQos { policy_id }
            | Self::RequestedIncompatibleQos { policy_id } => {
                format!("{} : {} ({})", head, policy_id, qos_policy_name(*policy_id))
            }
            Self::OfferedDeadlineMissed {
                total_count,
                total_count_change,
            }
            | Self::RequestedDeadlineMissed {
                total_count,
                total_count_change,
            }
            | Self::LivelinessLost {
                total_count,
                total_count_change,
            } => format!(
                "{} : (total = {}, change = {})",
                head, total_count, total_count_change
            ),
            Self::LivelinessChanged {
                alive_count,
                not_alive_count,
            } => format!(
                "{} : (alive = {}, not_alive = {})",
                head, alive_count, not_alive_count
            ),
        }
    }
}

/// Standard DDS QoS policy ids.
pub mod policy_id {
    pub const DURABILITY: u32 = 2;
    pub const PRESENTATION: u32 = 3;
    pub const DEADLINE: u32 = 4;
    pub const LATENCYBUDGET: u32 = 5;
    pub const OWNERSHIP: u32 = 6;
    pub const OWNERSHIPSTRENGTH: u32 = 7;
    pub const LIVELINESS: u32 = 8;
    pub const TIMEBASEDFILTER: u32 = 9;
    pub const PARTITION: u32 = 10;
    pub const RELIABILITY: u32 = 11;
    pub const DESTINATIONORDER: u32 = 12;
    pub const HISTORY: u32 = 13;
    pub const RESOURCELIMITS: u32 = 14;
    pub const DATA_REPRESENTATION: u32 = 23;
}

/// Name of a standard QoS policy id, `"Unknown"` otherwise.
pub fn qos_policy_name(id: u32) -> &'static str {
    match id {
        1 => "USERDATA",
        2 => "DURABILITY",
        3 => "PRESENTATION",
        4 => "DEADLINE",
        5 => "LATENCYBUDGET",
        6 => "OWNERSHIP",
        7 => "OWNERSHIPSTRENGTH",
        8 => "LIVELINESS",
        9 => "TIMEBASEDFILTER",
        10 => "PARTITION",
        11 => "RELIABILITY",
        12 => "DESTINATIONORDER",
        13 => "HISTORY",
        14 => "RESOURCELIMITS",
        15 => "ENTITYFACTORY",
        16 => "WRITERDATALIFECYCLE",
        17 => "READERDATALIFECYCLE",
        18 => "TOPICDATA",
        19 => "GROUPDATA",
        20 => "TRANSPORTPRIORITY",
        21 => "LIFESPAN",
        22 => "DURABILITYSERVICE",
        23 => "DATAREPRESENTATION",
        _ => "Unknown",
    }
}

/// Thread-safe sink for status events.
#[derive(Clone)]
pub struct EventListener {
    sink: Arc<Mutex<dyn ShapeOutput + Send>>,
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener").finish_non_exhaustive()
    }
}

impl EventListener {
    pub fn new(sink: Arc<Mutex<dyn ShapeOutput + Send>>) -> Self {
        Self { sink }
    }

    /// Listener printing to stdout.
    pub fn stdout() -> Self {
        Self::new(Arc::new(Mutex::new(StdoutOutput)))
    }

    pub fn notify(&self, topic: &str, type_name: &str, event: &EntityEvent) {
        let line = event.render(topic, type_name);
        debug!("status event: {:?}", event);
        if let Ok(mut sink) = self.sink.lock() {
            sink.line(&line);
        }
    }
}
