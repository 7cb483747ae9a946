// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport capability interface.
//!
//! The session engine is written once against [`Transport`]; each backend
//! supplies its own entity handle types through the associated types, so a
//! writer created here is already the [`ShapeSample`] writer of that backend.
//!
//! Backends:
//! - [`loopback::LoopbackTransport`]: in-process broker
//! - [`hdds::HddsTransport`]: HDDS over RTPS

pub mod hdds;
pub mod loopback;

use crate::error::TransportError;
use crate::filter::{ContentFilterSpec, FilterSyntax};
use crate::listener::EventListener;
use crate::qos::{GroupQos, QosProfile};
use crate::sample::{InstanceHandle, SampleLoan, ShapeSample, TakeOutcome};

/// Topic description a reader is bound to.
pub enum ReaderSource<'a, T: Transport + ?Sized> {
    Topic(&'a T::Topic),
    Filtered(&'a T::FilteredTopic),
}

/// Uniform set of middleware capabilities used by a shapes session.
///
/// Creation returns the entity or a [`TransportError`]; deletion consumes
/// the handle. `take_next_instance` reports exhaustion with
/// [`TakeOutcome::NoMoreData`], never with an error.
pub trait Transport {
    type Participant;
    type Topic;
    type FilteredTopic;
    type Publisher;
    type Subscriber;
    type Writer;
    type Reader;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Filter dialect accepted by [`Transport::create_filtered_topic`].
    fn filter_syntax(&self) -> FilterSyntax {
        FilterSyntax::Equality
    }

    /// Make the participant factory available.
    fn init_factory(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn create_participant(
        &self,
        domain_id: u32,
        listener: Option<EventListener>,
    ) -> Result<Self::Participant, TransportError>;

    fn create_topic(
        &self,
        participant: &Self::Participant,
        name: &str,
        type_name: &str,
    ) -> Result<Self::Topic, TransportError>;

    fn create_filtered_topic(
        &self,
        participant: &Self::Participant,
        topic: &Self::Topic,
        filter: &ContentFilterSpec,
    ) -> Result<Self::FilteredTopic, TransportError>;

    fn create_publisher(
        &self,
        participant: &Self::Participant,
        qos: &GroupQos,
    ) -> Result<Self::Publisher, TransportError>;

    fn create_subscriber(
        &self,
        participant: &Self::Participant,
        qos: &GroupQos,
    ) -> Result<Self::Subscriber, TransportError>;

    fn create_writer(
        &self,
        publisher: &Self::Publisher,
        topic: &Self::Topic,
        qos: &QosProfile,
    ) -> Result<Self::Writer, TransportError>;

    fn create_reader(
        &self,
        subscriber: &Self::Subscriber,
        source: ReaderSource<'_, Self>,
        qos: &QosProfile,
    ) -> Result<Self::Reader, TransportError>;

    fn write(&self, writer: &Self::Writer, sample: &ShapeSample) -> Result<(), TransportError>;

    /// Take every available sample of the first instance whose handle is
    /// greater than `previous`.
    fn take_next_instance(
        &self,
        reader: &Self::Reader,
        previous: InstanceHandle,
    ) -> Result<TakeOutcome, TransportError>;

    fn return_loan(&self, reader: &Self::Reader, loan: SampleLoan) -> Result<(), TransportError>;

    fn delete_writer(
        &self,
        publisher: &Self::Publisher,
        writer: Self::Writer,
    ) -> Result<(), TransportError>;

    fn delete_reader(
        &self,
        subscriber: &Self::Subscriber,
        reader: Self::Reader,
    ) -> Result<(), TransportError>;

    fn delete_publisher(
        &self,
        participant: &Self::Participant,
        publisher: Self::Publisher,
    ) -> Result<(), TransportError>;

    fn delete_subscriber(
        &self,
        participant: &Self::Participant,
        subscriber: Self::Subscriber,
    ) -> Result<(), TransportError>;

    fn delete_filtered_topic(
        &self,
        participant: &Self::Participant,
        topic: Self::FilteredTopic,
    ) -> Result<(), TransportError>;

    fn delete_topic(
        &self,
        participant: &Self::Participant,
        topic: Self::Topic,
    ) -> Result<(), TransportError>;

    /// Delete everything the participant still contains.
    fn delete_contained_entities(
        &self,
        participant: &Self::Participant,
    ) -> Result<(), TransportError>;

    fn delete_participant(&self, participant: Self::Participant) -> Result<(), TransportError>;
}
