// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command line surface of `shape_main`.
//!
//! Flags are single characters, as every vendor's shapes client accepts the
//! same set and the interoperability harness drives them all alike.

use clap::error::ErrorKind;
use clap::Parser;
use hdds_shapes::{
    ArgumentError, DataRepresentation, DurabilityKind, EnvConfig, OptionsBuilder,
    ReliabilityKind, ShapeOptions,
};

#[derive(Parser, Debug, Default)]
#[command(name = "shape_main")]
#[command(about = "DDS shapes interoperability test client")]
#[command(version)]
#[command(disable_help_flag = true)]
#[command(args_override_self = true)]
pub struct Args {
    /// Domain id
    #[arg(short = 'd', default_value_t = 0)]
    pub domain: u32,

    /// BEST_EFFORT reliability
    #[arg(short = 'b', overrides_with = "reliable")]
    pub best_effort: bool,

    /// RELIABLE reliability
    #[arg(short = 'r', overrides_with = "best_effort")]
    pub reliable: bool,

    /// Keep history depth (0: KEEP_ALL)
    #[arg(short = 'k', allow_negative_numbers = true)]
    pub history_depth: Option<i32>,

    /// Deadline period in seconds
    #[arg(short = 'f')]
    pub deadline: Option<i32>,

    /// Time based filter in seconds
    #[arg(short = 'i')]
    pub time_based_filter: Option<i32>,

    /// Ownership strength (-1: SHARED)
    #[arg(short = 's', allow_negative_numbers = true)]
    pub ownership_strength: Option<i32>,

    /// Topic name
    #[arg(short = 't')]
    pub topic: Option<String>,

    /// Color to publish (filter if subscriber)
    #[arg(short = 'c')]
    pub color: Option<String>,

    /// Partition
    #[arg(short = 'p')]
    pub partition: Option<String>,

    /// Durability [v|l|t|p]
    #[arg(short = 'D')]
    pub durability: Option<String>,

    /// Publish samples
    #[arg(short = 'P')]
    pub publish: bool,

    /// Subscribe samples
    #[arg(short = 'S')]
    pub subscribe: bool,

    /// Data representation [1|2]
    #[arg(short = 'x')]
    pub representation: Option<String>,

    /// Verbose output (prints published samples)
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Print published samples
    #[arg(short = 'w')]
    pub print_writer_samples: bool,

    /// Print usage
    #[arg(short = 'h')]
    pub help: bool,
}

impl Args {
    /// Validate into run options, with `env` supplying canvas and size.
    pub fn to_options(&self, env: &EnvConfig) -> Result<ShapeOptions, ArgumentError> {
        let mut builder = OptionsBuilder::new()
            .domain_id(self.domain)
            .publish(self.publish)
            .subscribe(self.subscribe)
            .verbose(self.verbose)
            .print_writer_samples(self.print_writer_samples)
            .canvas(env.canvas)
            .shape_size(env.shape_size);

        // `-b` and `-r` override each other, so at most one is set.
        builder = builder.reliability(if self.best_effort {
            ReliabilityKind::BestEffort
        } else {
            ReliabilityKind::Reliable
        });

        // An empty value keeps the default.
        if let Some(flag) = self.durability.as_deref().filter(|f| !f.is_empty()) {
            builder = builder.durability(DurabilityKind::from_flag(flag)?);
        }
        if let Some(flag) = self.representation.as_deref().filter(|f| !f.is_empty()) {
            builder = builder.representation(DataRepresentation::from_flag(flag)?);
        }
        if let Some(depth) = self.history_depth {
            builder = builder.history_depth(depth);
        }
        if let Some(strength) = self.ownership_strength {
            builder = builder.ownership_strength(strength);
        }
        if let Some(secs) = self.deadline {
            builder = builder.deadline_secs(secs);
        }
        if let Some(secs) = self.time_based_filter {
            builder = builder.time_based_filter_secs(secs);
        }
        if let Some(topic) = &self.topic {
            builder = builder.topic(topic.clone());
        }
        if let Some(color) = &self.color {
            builder = builder.color(color.clone());
        }
        if let Some(partition) = &self.partition {
            builder = builder.partition(partition.clone());
        }

        builder.build()
    }
}

/// Parse "errors" that are really requests for information (`--version`).
pub fn is_informational(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayVersion | ErrorKind::DisplayHelp)
}

/// Usage text, in the layout shared by the vendor shapes clients.
pub fn usage(prog: &str) -> String {
    format!(
        "{}: \n\
         \x20  -d <int>        : domain id (default: 0)\n\
         \x20  -b              : BEST_EFFORT reliability\n\
         \x20  -r              : RELIABLE reliability\n\
         \x20  -k <depth>      : keep history depth (0: KEEP_ALL)\n\
         \x20  -f <interval>   : set a 'deadline' with interval (seconds)\n\
         \x20  -i <interval>   : apply 'time based filter' with interval (seconds)\n\
         \x20  -s <int>        : set ownership strength [-1: SHARED]\n\
         \x20  -t <topic_name> : set the topic name\n\
         \x20  -c <color>      : set color to publish (filter if subscriber)\n\
         \x20  -p <partition>  : set a 'partition' string\n\
         \x20  -D [v|l|t|p]    : set durability [v: VOLATILE,  l: TRANSIENT_LOCAL]\n\
         \x20                                    t: TRANSIENT, p: PERSISTENT]\n\
         \x20  -P              : publish samples\n\
         \x20  -S              : subscribe samples\n\
         \x20  -x [1|2]        : set data representation [1: XCDR, 2: XCDR2]\n\
         \x20  -v              : set verbosity (print Publisher's samples)\n\
         \x20  -w              : print Publisher's samples",
        prog
    )
}
