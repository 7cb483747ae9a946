// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Shapes
//!
//! Session engine for the DDS "shapes" interoperability client. A process
//! either publishes one bouncing shape or subscribes to a shape topic, and
//! the stdout trace is compared across vendors by the interoperability
//! harness.
//!
//! The engine is written once against the [`Transport`] capability trait:
//! - [`transport::loopback`] - in-process broker (tests, dry runs)
//! - [`transport::hdds`] - HDDS over RTPS/UDP
//!
//! # Flow
//!
//! ```text
//! ShapeOptions -> QosResolver / ContentFilterBuilder
//!              -> Session::initialize (entity graph)
//!              -> Session::run (SampleHarvester | MotionSimulator)
//!              -> Session::shutdown (reverse teardown)
//! ```
//!
//! # Quick Start
//!
//! ```
//! use hdds_shapes::transport::loopback::LoopbackTransport;
//! use hdds_shapes::{OptionsBuilder, Role, Session, VecOutput};
//!
//! let options = OptionsBuilder::new()
//!     .topic("Square")
//!     .role(Role::Subscribe)
//!     .build()
//!     .expect("valid options");
//!
//! let transport = LoopbackTransport::new();
//! let mut out = VecOutput::default();
//! let mut session = Session::new(&transport);
//! session.initialize(&options, &mut out).expect("entities created");
//! assert_eq!(out.lines[0], "Create topic: Square");
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod harvester;
pub mod listener;
pub mod motion;
pub mod options;
pub mod output;
pub mod qos;
pub mod sample;
pub mod session;
pub mod transport;

pub use config::EnvConfig;
pub use context::RunContext;
pub use error::{ArgumentError, ShapesError, TransportError};
pub use filter::{ColorPredicate, ContentFilterBuilder, ContentFilterSpec, FilterSyntax};
pub use harvester::{SampleHarvester, SweepStats};
pub use listener::{EntityEvent, EventListener};
pub use motion::{Canvas, MotionSimulator, PublishStats, ShapeState};
pub use options::{
    DataRepresentation, DurabilityKind, OptionsBuilder, ReliabilityKind, Role, ShapeOptions,
};
pub use output::{format_sample, ShapeOutput, StdoutOutput, VecOutput};
pub use qos::{EntityRole, GroupQos, HistoryPolicy, OwnershipKind, QosProfile, QosResolver};
pub use sample::{InstanceHandle, SampleInfo, SampleLoan, ShapeSample, TakeOutcome};
pub use session::{RunSummary, Session, SessionState, SessionStep};
pub use transport::{ReaderSource, Transport};

/// Registered type name of [`ShapeSample`] on the wire.
pub const SHAPE_TYPE_NAME: &str = "ShapeType";
