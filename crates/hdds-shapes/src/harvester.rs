// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber-side polling loop.
//!
//! Each sweep walks the reader instance by instance, starting from the nil
//! handle, until the transport reports [`TakeOutcome::NoMoreData`]. Every
//! loan is returned before the next take. A take error ends the sweep; the
//! next one starts after the poll period.

use std::thread;

use tracing::{info, trace, warn};

use crate::context::RunContext;
use crate::output::ShapeOutput;
use crate::sample::{InstanceHandle, TakeOutcome};
use crate::transport::Transport;

/// Counters for one sweep, or accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sweeps: u64,
    pub instances: u64,
    pub samples: u64,
    /// Lifecycle-only entries (dispose, unregister) that were skipped.
    pub skipped: u64,
    pub take_errors: u64,
    pub loan_errors: u64,
}

impl SweepStats {
    fn merge(&mut self, other: &SweepStats) {
        self.sweeps += other.sweeps;
        self.instances += other.instances;
        self.samples += other.samples;
        self.skipped += other.skipped;
        self.take_errors += other.take_errors;
        self.loan_errors += other.loan_errors;
    }
}

/// Drains a reader and prints what it receives.
pub struct SampleHarvester<'a, T: Transport> {
    transport: &'a T,
    reader: &'a T::Reader,
    topic: &'a str,
}

impl<'a, T: Transport> SampleHarvester<'a, T> {
    pub fn new(transport: &'a T, reader: &'a T::Reader, topic: &'a str) -> Self {
        Self {
            transport,
            reader,
            topic,
        }
    }

    /// One pass over every instance with pending samples.
    pub fn sweep(&self, out: &mut dyn ShapeOutput) -> SweepStats {
        let mut stats = SweepStats {
            sweeps: 1,
            ..SweepStats::default()
        };
        let mut previous = InstanceHandle::NIL;

        loop {
            let loan = match self.transport.take_next_instance(self.reader, previous) {
                Ok(TakeOutcome::Taken(loan)) => loan,
                Ok(TakeOutcome::NoMoreData) => break,
                Err(e) => {
                    warn!("take on '{}' failed: {}", self.topic, e);
                    stats.take_errors += 1;
                    break;
                }
            };

            previous = loan.instance();
            stats.instances += 1;
            for (sample, info) in loan.iter() {
                if info.valid_data {
                    out.sample(self.topic, sample);
                    stats.samples += 1;
                } else {
                    trace!("skipping {:?} on {}", info.instance_state, info.instance_handle);
                    stats.skipped += 1;
                }
            }

            if let Err(e) = self.transport.return_loan(self.reader, loan) {
                warn!("return_loan on '{}' failed: {}", self.topic, e);
                stats.loan_errors += 1;
                break;
            }
        }
        stats
    }

    /// Sweep, then sleep the poll period, until shutdown is requested.
    pub fn run(&self, ctx: &RunContext, out: &mut dyn ShapeOutput) -> SweepStats {
        let mut total = SweepStats::default();
        info!(
            "polling '{}' every {:?}",
            self.topic,
            ctx.poll_period()
        );
        while !ctx.is_shutdown() {
            let stats = self.sweep(out);
            total.merge(&stats);
            thread::sleep(ctx.poll_period());
        }
        info!(
            "subscriber stopped: {} samples, {} take errors",
            total.samples, total.take_errors
        );
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionsBuilder, Role};
    use crate::output::VecOutput;
    use crate::qos::{GroupQos, QosResolver};
    use crate::sample::ShapeSample;
    use crate::transport::loopback::{LoopbackReader, LoopbackTransport, LoopbackWriter};
    use crate::transport::ReaderSource;
    use crate::SHAPE_TYPE_NAME;

    fn wired(transport: &LoopbackTransport) -> (LoopbackWriter, LoopbackReader) {
        let options = OptionsBuilder::new()
            .topic("Circle")
            .role(Role::Subscribe)
            .history_depth(0)
            .build()
            .expect("valid");
        let resolver = QosResolver::new(&options);

        let participant = transport.create_participant(0, None).expect("participant");
        let topic = transport
            .create_topic(&participant, "Circle", SHAPE_TYPE_NAME)
            .expect("topic");
        let publisher = transport
            .create_publisher(&participant, &GroupQos::default())
            .expect("publisher");
        let subscriber = transport
            .create_subscriber(&participant, &GroupQos::default())
            .expect("subscriber");
        let writer = transport
            .create_writer(&publisher, &topic, &resolver.writer())
            .expect("writer");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&topic), &resolver.reader())
            .expect("reader");
        (writer, reader)
    }

    #[test]
    fn test_sweep_reports_instances_in_order() {
        let transport = LoopbackTransport::new();
        let (writer, reader) = wired(&transport);
        for (color, x) in [("A", 1), ("B", 10), ("A", 2), ("A", 3)] {
            transport
                .write(&writer, &ShapeSample::new(color, x, 0, 20))
                .expect("write");
        }

        let mut out = VecOutput::default();
        let stats = SampleHarvester::new(&transport, &reader, "Circle").sweep(&mut out);

        assert_eq!(out.colors(), vec!["A", "A", "A", "B"]);
        assert_eq!(stats.instances, 2);
        assert_eq!(stats.samples, 4);
    }

    #[test]
    fn test_taken_samples_not_reported_twice() {
        let transport = LoopbackTransport::new();
        let (writer, reader) = wired(&transport);
        transport
            .write(&writer, &ShapeSample::new("RED", 1, 1, 20))
            .expect("write");

        let harvester = SampleHarvester::new(&transport, &reader, "Circle");
        let mut out = VecOutput::default();
        harvester.sweep(&mut out);
        let second = harvester.sweep(&mut out);

        assert_eq!(out.samples.len(), 1);
        assert_eq!(second.samples, 0);
    }

    #[test]
    fn test_dispose_markers_are_skipped() {
        let transport = LoopbackTransport::new();
        let (writer, reader) = wired(&transport);
        transport
            .write(&writer, &ShapeSample::new("RED", 1, 1, 20))
            .expect("write");
        transport.dispose(&writer, "RED").expect("dispose");

        let mut out = VecOutput::default();
        let stats = SampleHarvester::new(&transport, &reader, "Circle").sweep(&mut out);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(out.lines, vec!["Circle     RED        001 001 [20]"]);
    }

    #[test]
    fn test_take_error_is_not_fatal() {
        let transport = LoopbackTransport::new();
        let (writer, reader) = wired(&transport);
        transport
            .write(&writer, &ShapeSample::new("RED", 1, 1, 20))
            .expect("write");
        transport.fail_next_takes(1);

        let harvester = SampleHarvester::new(&transport, &reader, "Circle");
        let mut out = VecOutput::default();
        let first = harvester.sweep(&mut out);
        assert_eq!(first.take_errors, 1);
        assert!(out.samples.is_empty());

        let second = harvester.sweep(&mut out);
        assert_eq!(second.take_errors, 0);
        assert_eq!(out.colors(), vec!["RED"]);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let transport = LoopbackTransport::new();
        let (_writer, reader) = wired(&transport);
        let ctx = RunContext::new();
        ctx.request_shutdown();

        let mut out = VecOutput::default();
        let stats = SampleHarvester::new(&transport, &reader, "Circle").run(&ctx, &mut out);
        assert_eq!(stats.sweeps, 0);
    }
}
