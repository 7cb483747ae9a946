// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Validated run options.
//!
//! [`OptionsBuilder`] collects raw user input (CLI flags, environment) and
//! [`OptionsBuilder::build`] turns it into an immutable [`ShapeOptions`] or an
//! [`ArgumentError`].

use std::fmt;

use crate::error::ArgumentError;
use crate::motion::Canvas;

/// Color published when `-P` is given without `-c`.
pub const DEFAULT_COLOR: &str = "BLUE";

/// Shape size used by every publisher.
pub const DEFAULT_SHAPE_SIZE: i32 = 20;

/// History depth sentinel: leave the backend default untouched.
pub const HISTORY_UNSPECIFIED: i32 = -1;

/// Ownership strength sentinel: shared ownership.
pub const OWNERSHIP_SHARED: i32 = -1;

/// Reliability kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReliabilityKind {
    BestEffort,
    #[default]
    Reliable,
}

/// Durability kind, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DurabilityKind {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

impl DurabilityKind {
    /// Parse the `-D` argument. Only the first character is significant.
    pub fn from_flag(value: &str) -> Result<Self, ArgumentError> {
        match value.chars().next() {
            Some('v') => Ok(Self::Volatile),
            Some('l') => Ok(Self::TransientLocal),
            Some('t') => Ok(Self::Transient),
            Some('p') => Ok(Self::Persistent),
            _ => Err(ArgumentError::InvalidDurability(first_char(value))),
        }
    }
}

impl fmt::Display for DurabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Volatile => "VOLATILE",
            Self::TransientLocal => "TRANSIENT_LOCAL",
            Self::Transient => "TRANSIENT",
            Self::Persistent => "PERSISTENT",
        };
        f.write_str(name)
    }
}

/// Data representation advertised by writers and readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataRepresentation {
    #[default]
    Xcdr,
    Xcdr2,
}

impl DataRepresentation {
    /// Parse the `-x` argument (`1` = XCDR, `2` = XCDR2).
    pub fn from_flag(value: &str) -> Result<Self, ArgumentError> {
        match value.chars().next() {
            Some('1') => Ok(Self::Xcdr),
            Some('2') => Ok(Self::Xcdr2),
            _ => Err(ArgumentError::InvalidRepresentation(first_char(value))),
        }
    }

    /// DataRepresentationId_t value from DDS-XTypes.
    pub fn id(self) -> i16 {
        match self {
            Self::Xcdr => 0,
            Self::Xcdr2 => 2,
        }
    }
}

fn first_char(value: &str) -> String {
    value.chars().next().map(String::from).unwrap_or_default()
}

/// Which side of the topic this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publish,
    Subscribe,
}

/// Immutable configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeOptions {
    pub domain_id: u32,
    pub reliability: ReliabilityKind,
    pub durability: DurabilityKind,
    pub representation: DataRepresentation,
    /// `< 0` unspecified, `0` keep all, `> 0` keep last N.
    pub history_depth: i32,
    /// `-1` shared, `>= 0` exclusive with this strength.
    pub ownership_strength: i32,
    pub topic_name: String,
    /// Always set when publishing; a subscriber filters on it when set.
    pub color: Option<String>,
    /// True when the publisher color fell back to [`DEFAULT_COLOR`].
    pub color_defaulted: bool,
    pub partition: Option<String>,
    pub role: Role,
    /// Seconds, 0 = disabled.
    pub time_based_filter_secs: i32,
    /// Seconds, 0 = disabled.
    pub deadline_secs: i32,
    pub canvas: Canvas,
    pub shape_size: i32,
    /// Explicit initial velocity; randomised when `None`.
    pub velocity: Option<(i32, i32)>,
    pub verbose: bool,
    /// Print every written sample on the publisher side.
    pub print_writer_samples: bool,
}

impl ShapeOptions {
    /// Color used for content filtering, subscribers only.
    pub fn filter_color(&self) -> Option<&str> {
        match self.role {
            Role::Subscribe => self.color.as_deref(),
            Role::Publish => None,
        }
    }
}

/// Collects unvalidated options.
///
/// # Example
///
/// ```
/// use hdds_shapes::{OptionsBuilder, Role};
///
/// let options = OptionsBuilder::new()
///     .topic("Circle")
///     .role(Role::Publish)
///     .build()
///     .expect("valid");
/// assert_eq!(options.color.as_deref(), Some("BLUE"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    domain_id: u32,
    reliability: ReliabilityKind,
    durability: DurabilityKind,
    representation: DataRepresentation,
    history_depth: Option<i32>,
    ownership_strength: Option<i32>,
    topic_name: Option<String>,
    color: Option<String>,
    partition: Option<String>,
    publish: bool,
    subscribe: bool,
    time_based_filter_secs: i32,
    deadline_secs: i32,
    canvas: Option<Canvas>,
    shape_size: Option<i32>,
    velocity: Option<(i32, i32)>,
    verbose: bool,
    print_writer_samples: bool,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.domain_id = domain_id;
        self
    }

    pub fn reliability(mut self, kind: ReliabilityKind) -> Self {
        self.reliability = kind;
        self
    }

    pub fn durability(mut self, kind: DurabilityKind) -> Self {
        self.durability = kind;
        self
    }

    pub fn representation(mut self, representation: DataRepresentation) -> Self {
        self.representation = representation;
        self
    }

    pub fn history_depth(mut self, depth: i32) -> Self {
        self.history_depth = Some(depth);
        self
    }

    pub fn ownership_strength(mut self, strength: i32) -> Self {
        self.ownership_strength = Some(strength);
        self
    }

    pub fn topic(mut self, name: impl Into<String>) -> Self {
        self.topic_name = Some(name.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn publish(mut self, enabled: bool) -> Self {
        self.publish = enabled;
        self
    }

    pub fn subscribe(mut self, enabled: bool) -> Self {
        self.subscribe = enabled;
        self
    }

    /// Set exactly one of publish/subscribe.
    pub fn role(self, role: Role) -> Self {
        match role {
            Role::Publish => self.publish(true).subscribe(false),
            Role::Subscribe => self.publish(false).subscribe(true),
        }
    }

    pub fn time_based_filter_secs(mut self, secs: i32) -> Self {
        self.time_based_filter_secs = secs;
        self
    }

    pub fn deadline_secs(mut self, secs: i32) -> Self {
        self.deadline_secs = secs;
        self
    }

    pub fn canvas(mut self, canvas: Canvas) -> Self {
        self.canvas = Some(canvas);
        self
    }

    pub fn shape_size(mut self, size: i32) -> Self {
        self.shape_size = Some(size);
        self
    }

    pub fn velocity(mut self, xvel: i32, yvel: i32) -> Self {
        self.velocity = Some((xvel, yvel));
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn print_writer_samples(mut self, enabled: bool) -> Self {
        self.print_writer_samples = enabled;
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<ShapeOptions, ArgumentError> {
        if let Some(depth) = self.history_depth {
            if depth < 0 {
                return Err(ArgumentError::InvalidHistoryDepth(depth));
            }
        }
        if let Some(strength) = self.ownership_strength {
            if strength < OWNERSHIP_SHARED {
                return Err(ArgumentError::InvalidOwnershipStrength(strength));
            }
        }

        let topic_name = match self.topic_name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ArgumentError::MissingTopic),
        };

        let role = match (self.publish, self.subscribe) {
            (false, false) => return Err(ArgumentError::MissingRole),
            (true, true) => return Err(ArgumentError::ConflictingRoles),
            (true, false) => Role::Publish,
            (false, true) => Role::Subscribe,
        };

        let mut color = self.color.filter(|c| !c.is_empty());
        let mut color_defaulted = false;
        if role == Role::Publish && color.is_none() {
            color = Some(DEFAULT_COLOR.to_string());
            color_defaulted = true;
        }

        Ok(ShapeOptions {
            domain_id: self.domain_id,
            reliability: self.reliability,
            durability: self.durability,
            representation: self.representation,
            history_depth: self.history_depth.unwrap_or(HISTORY_UNSPECIFIED),
            ownership_strength: self.ownership_strength.unwrap_or(OWNERSHIP_SHARED),
            topic_name,
            color,
            color_defaulted,
            partition: self.partition.filter(|p| !p.is_empty()),
            role,
            time_based_filter_secs: self.time_based_filter_secs,
            deadline_secs: self.deadline_secs,
            canvas: self.canvas.unwrap_or_default(),
            shape_size: self.shape_size.unwrap_or(DEFAULT_SHAPE_SIZE),
            velocity: self.velocity,
            verbose: self.verbose,
            print_writer_samples: self.print_writer_samples,
        })
    }
}
