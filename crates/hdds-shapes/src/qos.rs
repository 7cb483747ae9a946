// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS resolution.
//!
//! Maps the flat [`ShapeOptions`] onto a vendor-neutral [`QosProfile`] for a
//! writer or a reader, and onto a [`GroupQos`] for the publisher/subscriber.
//! Backends translate these into their native QoS types.
//!
//! | Option             | Writer                         | Reader                 |
//! |--------------------|--------------------------------|------------------------|
//! | reliability        | copied                         | copied                 |
//! | durability         | copied                         | copied                 |
//! | history `<0/0/>0`  | default / KEEP_ALL / KEEP_LAST | same                   |
//! | ownership `-1/>=0` | SHARED / EXCLUSIVE(strength)   | SHARED / EXCLUSIVE     |
//! | deadline `>0`      | period                         | period                 |
//! | time filter `>0`   | -                              | minimum separation     |
//! | representation     | `[id]`                         | `[id]`                 |

use std::time::Duration;

use tracing::debug;

use crate::options::{DataRepresentation, DurabilityKind, ReliabilityKind, ShapeOptions};

/// Entity the profile is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    Writer,
    Reader,
}

/// History policy. Absent from a profile means "backend default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPolicy {
    KeepLast(u32),
    KeepAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipKind {
    #[default]
    Shared,
    Exclusive,
}

/// Ownership kind plus writer strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnershipPolicy {
    pub kind: OwnershipKind,
    /// Writers with exclusive ownership only.
    pub strength: Option<i32>,
}

/// Resolved endpoint QoS. Built once per entity, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosProfile {
    pub role: EntityRole,
    pub reliability: ReliabilityKind,
    pub durability: DurabilityKind,
    pub history: Option<HistoryPolicy>,
    pub ownership: OwnershipPolicy,
    pub deadline: Option<Duration>,
    pub time_based_filter: Option<Duration>,
    pub representation: Vec<DataRepresentation>,
}

/// Publisher/subscriber QoS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupQos {
    pub partitions: Vec<String>,
}

/// Derives QoS for each entity from the run options.
#[derive(Debug, Clone, Copy)]
pub struct QosResolver<'a> {
    options: &'a ShapeOptions,
}

impl<'a> QosResolver<'a> {
    pub fn new(options: &'a ShapeOptions) -> Self {
        Self { options }
    }

    pub fn writer(&self) -> QosProfile {
        self.resolve(EntityRole::Writer)
    }

    pub fn reader(&self) -> QosProfile {
        self.resolve(EntityRole::Reader)
    }

    /// Publisher and subscriber share the same partition rule.
    pub fn group(&self) -> GroupQos {
        let mut qos = GroupQos::default();
        if let Some(partition) = &self.options.partition {
            qos.partitions.push(partition.clone());
        }
        qos
    }

    pub fn resolve(&self, role: EntityRole) -> QosProfile {
        let opts = self.options;

        let profile = QosProfile {
            role,
            reliability: opts.reliability,
            durability: opts.durability,
            history: resolve_history(opts.history_depth),
            ownership: resolve_ownership(opts.ownership_strength, role),
            deadline: seconds(opts.deadline_secs),
            time_based_filter: match role {
                EntityRole::Reader => seconds(opts.time_based_filter_secs),
                EntityRole::Writer => None,
            },
            representation: vec![opts.representation],
        };

        debug!("resolved {:?} QoS: {:?}", role, profile);
        profile
    }
}

/// `< 0` leaves the default, `0` keeps all, `> 0` keeps the last N.
pub fn resolve_history(depth: i32) -> Option<HistoryPolicy> {
    match depth {
        d if d < 0 => None,
        0 => Some(HistoryPolicy::KeepAll),
        d => Some(HistoryPolicy::KeepLast(d.unsigned_abs())),
    }
}

/// `-1` is shared; anything else is exclusive, and writers carry the strength.
pub fn resolve_ownership(strength: i32, role: EntityRole) -> OwnershipPolicy {
    if strength < 0 {
        return OwnershipPolicy::default();
    }
    OwnershipPolicy {
        kind: OwnershipKind::Exclusive,
        strength: match role {
            EntityRole::Writer => Some(strength),
            EntityRole::Reader => None,
        },
    }
}

fn seconds(interval: i32) -> Option<Duration> {
    (interval > 0).then(|| Duration::new(u64::from(interval.unsigned_abs()), 0))
}
