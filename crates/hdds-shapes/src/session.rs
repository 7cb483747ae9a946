// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity graph lifecycle.
//!
//! A [`Session`] builds the participant, topic, publisher or subscriber,
//! optional content-filtered topic, and writer or reader, one creation call
//! per state transition:
//!
//! ```text
//! Uninitialized -> FactoryReady -> ParticipantCreated -> TopicCreated
//!   -> PublisherReady -> WriterReady
//!   -> SubscriberReady [-> FilterReady] -> ReaderReady
//!   -> Running -> ShuttingDown -> Destroyed
//! ```
//!
//! The first failed creation aborts initialization. Teardown walks the
//! creation log backwards, so only entities that exist are deleted, children
//! before parents, whatever prefix of the chain was reached.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::error::{Result, ShapesError, TransportError};
use crate::filter::ContentFilterBuilder;
use crate::harvester::SampleHarvester;
use crate::listener::EventListener;
use crate::motion::{wall_clock_rng, MotionSimulator};
use crate::options::{Role, ShapeOptions, DEFAULT_COLOR};
use crate::output::ShapeOutput;
use crate::qos::QosResolver;
use crate::transport::{ReaderSource, Transport};
use crate::SHAPE_TYPE_NAME;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Uninitialized,
    FactoryReady,
    ParticipantCreated,
    TopicCreated,
    PublisherReady,
    SubscriberReady,
    FilterReady,
    WriterReady,
    ReaderReady,
    Running,
    ShuttingDown,
    Destroyed,
}

/// One creation step of the entity graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStep {
    Factory,
    Participant,
    Topic,
    Publisher,
    Subscriber,
    FilteredTopic,
    Writer,
    Reader,
}

impl SessionStep {
    /// State reached once this step succeeded.
    pub fn reached_state(self) -> SessionState {
        match self {
            SessionStep::Factory => SessionState::FactoryReady,
            SessionStep::Participant => SessionState::ParticipantCreated,
            SessionStep::Topic => SessionState::TopicCreated,
            SessionStep::Publisher => SessionState::PublisherReady,
            SessionStep::Subscriber => SessionState::SubscriberReady,
            SessionStep::FilteredTopic => SessionState::FilterReady,
            SessionStep::Writer => SessionState::WriterReady,
            SessionStep::Reader => SessionState::ReaderReady,
        }
    }
}

impl fmt::Display for SessionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStep::Factory => "participant factory",
            SessionStep::Participant => "participant",
            SessionStep::Topic => "topic",
            SessionStep::Publisher => "publisher",
            SessionStep::Subscriber => "subscriber",
            SessionStep::FilteredTopic => "content filtered topic",
            SessionStep::Writer => "datawriter",
            SessionStep::Reader => "datareader",
        };
        f.write_str(name)
    }
}

/// What a run loop did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub role: Role,
    pub written: u64,
    pub write_errors: u64,
    pub received: u64,
    pub take_errors: u64,
}

impl RunSummary {
    fn new(role: Role) -> Self {
        Self {
            role,
            written: 0,
            write_errors: 0,
            received: 0,
            take_errors: 0,
        }
    }
}

/// Live entity graph of one shapes process.
pub struct Session<'t, T: Transport> {
    transport: &'t T,
    listener: Option<EventListener>,
    state: SessionState,
    topic_name: String,
    created: Vec<SessionStep>,
    participant: Option<T::Participant>,
    topic: Option<T::Topic>,
    filtered_topic: Option<T::FilteredTopic>,
    publisher: Option<T::Publisher>,
    subscriber: Option<T::Subscriber>,
    writer: Option<T::Writer>,
    reader: Option<T::Reader>,
}

impl<'t, T: Transport> fmt::Debug for Session<'t, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport.name())
            .field("state", &self.state)
            .field("topic", &self.topic_name)
            .field("created", &self.created)
            .finish()
    }
}

impl<'t, T: Transport> Session<'t, T> {
    pub fn new(transport: &'t T) -> Self {
        Self {
            transport,
            listener: None,
            state: SessionState::Uninitialized,
            topic_name: String::new(),
            created: Vec::new(),
            participant: None,
            topic: None,
            filtered_topic: None,
            publisher: None,
            subscriber: None,
            writer: None,
            reader: None,
        }
    }

    /// Report status events of every entity through `listener`.
    pub fn with_listener(mut self, listener: EventListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Steps that succeeded, in creation order.
    pub fn created_steps(&self) -> &[SessionStep] {
        &self.created
    }

    pub fn writer(&self) -> Option<&T::Writer> {
        self.writer.as_ref()
    }

    pub fn reader(&self) -> Option<&T::Reader> {
        self.reader.as_ref()
    }

    /// Build the entity graph for `options`.
    ///
    /// Announces each creation on `out` the way the interop harness expects
    /// and prints `failed to create <step>` on the first failure.
    pub fn initialize(&mut self, options: &ShapeOptions, out: &mut dyn ShapeOutput) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(ShapesError::InvalidState(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }
        let transport = self.transport;
        let resolver = QosResolver::new(options);
        self.topic_name = options.topic_name.clone();
        info!(
            "initializing {:?} session on '{}' (domain {}, backend {})",
            options.role,
            options.topic_name,
            options.domain_id,
            transport.name()
        );

        let result = transport.init_factory();
        self.record(SessionStep::Factory, out, result)?;

        let result = transport.create_participant(options.domain_id, self.listener.clone());
        self.participant = Some(self.record(SessionStep::Participant, out, result)?);

        out.line(&format!("Create topic: {}", options.topic_name));
        let result = match &self.participant {
            Some(p) => transport.create_topic(p, &options.topic_name, SHAPE_TYPE_NAME),
            None => Err(missing("participant")),
        };
        self.topic = Some(self.record(SessionStep::Topic, out, result)?);

        match options.role {
            Role::Publish => self.initialize_writer(options, &resolver, out),
            Role::Subscribe => self.initialize_reader(options, &resolver, out),
        }
    }

    fn initialize_writer(
        &mut self,
        options: &ShapeOptions,
        resolver: &QosResolver<'_>,
        out: &mut dyn ShapeOutput,
    ) -> Result<()> {
        let transport = self.transport;

        let result = match &self.participant {
            Some(p) => transport.create_publisher(p, &resolver.group()),
            None => Err(missing("participant")),
        };
        self.publisher = Some(self.record(SessionStep::Publisher, out, result)?);

        out.line(&format!(
            "Create writer for topic: {} color: {}",
            options.topic_name,
            options.color.as_deref().unwrap_or(DEFAULT_COLOR)
        ));
        let result = match (&self.publisher, &self.topic) {
            (Some(publisher), Some(topic)) => {
                transport.create_writer(publisher, topic, &resolver.writer())
            }
            _ => Err(missing("publisher or topic")),
        };
        self.writer = Some(self.record(SessionStep::Writer, out, result)?);
        Ok(())
    }

    fn initialize_reader(
        &mut self,
        options: &ShapeOptions,
        resolver: &QosResolver<'_>,
        out: &mut dyn ShapeOutput,
    ) -> Result<()> {
        let transport = self.transport;

        let result = match &self.participant {
            Some(p) => transport.create_subscriber(p, &resolver.group()),
            None => Err(missing("participant")),
        };
        self.subscriber = Some(self.record(SessionStep::Subscriber, out, result)?);

        let filter = ContentFilterBuilder::new(transport.filter_syntax()).build(options);
        if let Some(spec) = &filter {
            let result = match (&self.participant, &self.topic) {
                (Some(p), Some(topic)) => transport.create_filtered_topic(p, topic, spec),
                _ => Err(missing("participant or topic")),
            };
            self.filtered_topic = Some(self.record(SessionStep::FilteredTopic, out, result)?);
            out.line(&format!(
                "Create reader for topic: {} color: {}",
                options.topic_name, spec.color
            ));
        } else {
            out.line(&format!("Create reader for topic: {}", options.topic_name));
        }

        let source = match (&self.filtered_topic, &self.topic) {
            (Some(filtered), _) => Some(ReaderSource::Filtered(filtered)),
            (None, Some(topic)) => Some(ReaderSource::Topic(topic)),
            (None, None) => None,
        };
        let result = match (&self.subscriber, source) {
            (Some(subscriber), Some(source)) => {
                transport.create_reader(subscriber, source, &resolver.reader())
            }
            _ => Err(missing("subscriber or topic")),
        };
        self.reader = Some(self.record(SessionStep::Reader, out, result)?);
        Ok(())
    }

    /// Log the outcome of a creation step and advance the state machine.
    fn record<E>(
        &mut self,
        step: SessionStep,
        out: &mut dyn ShapeOutput,
        result: std::result::Result<E, TransportError>,
    ) -> Result<E> {
        match result {
            Ok(entity) => {
                debug!("created {} ({})", step, self.transport.name());
                self.created.push(step);
                self.state = step.reached_state();
                Ok(entity)
            }
            Err(source) => {
                error!("failed to create {}: {}", step, source);
                out.line(&format!("failed to create {}", step));
                Err(ShapesError::EntityCreation { step, source })
            }
        }
    }

    /// Publish or subscribe until `ctx` requests shutdown.
    pub fn run(
        &mut self,
        options: &ShapeOptions,
        ctx: &RunContext,
        out: &mut dyn ShapeOutput,
    ) -> Result<RunSummary> {
        if !matches!(
            self.state,
            SessionState::WriterReady | SessionState::ReaderReady
        ) {
            return Err(ShapesError::InvalidState(format!(
                "run called in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Running;
        let mut summary = RunSummary::new(options.role);

        match (&self.writer, &self.reader) {
            (Some(writer), _) => {
                let mut rng = wall_clock_rng();
                let mut motion = MotionSimulator::from_options(options, &mut rng);
                let print = options.verbose || options.print_writer_samples;
                let stats = motion.run(
                    self.transport,
                    writer,
                    &self.topic_name,
                    ctx,
                    out,
                    print,
                );
                summary.written = stats.written;
                summary.write_errors = stats.write_errors;
            }
            (None, Some(reader)) => {
                let stats = SampleHarvester::new(self.transport, reader, &self.topic_name)
                    .run(ctx, out);
                summary.received = stats.samples;
                summary.take_errors = stats.take_errors;
            }
            (None, None) => {
                return Err(ShapesError::InvalidState("no endpoint to run".into()));
            }
        }

        self.state = SessionState::ShuttingDown;
        info!("run finished: {:?}", summary);
        Ok(summary)
    }

    /// Release every created entity in reverse creation order.
    ///
    /// Safe to call more than once; failures are logged and the remaining
    /// deletions still run.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        self.state = SessionState::ShuttingDown;
        let transport = self.transport;

        while let Some(step) = self.created.pop() {
            let result = match step {
                SessionStep::Reader => match (&self.subscriber, self.reader.take()) {
                    (Some(subscriber), Some(reader)) => transport.delete_reader(subscriber, reader),
                    _ => Ok(()),
                },
                SessionStep::Writer => match (&self.publisher, self.writer.take()) {
                    (Some(publisher), Some(writer)) => transport.delete_writer(publisher, writer),
                    _ => Ok(()),
                },
                SessionStep::FilteredTopic => {
                    match (&self.participant, self.filtered_topic.take()) {
                        (Some(p), Some(ft)) => transport.delete_filtered_topic(p, ft),
                        _ => Ok(()),
                    }
                }
                SessionStep::Publisher => match (&self.participant, self.publisher.take()) {
                    (Some(p), Some(publisher)) => transport.delete_publisher(p, publisher),
                    _ => Ok(()),
                },
                SessionStep::Subscriber => match (&self.participant, self.subscriber.take()) {
                    (Some(p), Some(subscriber)) => transport.delete_subscriber(p, subscriber),
                    _ => Ok(()),
                },
                SessionStep::Topic => match (&self.participant, self.topic.take()) {
                    (Some(p), Some(topic)) => transport.delete_topic(p, topic),
                    _ => Ok(()),
                },
                SessionStep::Participant => match self.participant.take() {
                    Some(p) => {
                        if let Err(e) = transport.delete_contained_entities(&p) {
                            warn!("delete_contained_entities failed: {}", e);
                        }
                        transport.delete_participant(p)
                    }
                    None => Ok(()),
                },
                SessionStep::Factory => Ok(()),
            };

            match result {
                Ok(()) => debug!("deleted {}", step),
                Err(e) => warn!("failed to delete {}: {}", step, e),
            }
        }

        self.state = SessionState::Destroyed;
        info!("session on '{}' destroyed", self.topic_name);
    }
}

impl<'t, T: Transport> Drop for Session<'t, T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn missing(what: &str) -> TransportError {
    TransportError::PreconditionNotMet(format!("{} not created", what))
}
