// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process loopback transport.
//!
//! Every participant created from the same [`LoopbackTransport`] (or a clone
//! of it) shares one broker. The broker implements the parts of DDS
//! semantics the shapes client depends on:
//!
//! - domain and partition isolation
//! - request/offered QoS matching (reliability, durability, ownership,
//!   deadline, data representation) with incompatible-QoS events
//! - keyed instances with stable handles, per-instance reader queues and
//!   KEEP_LAST / KEEP_ALL history
//! - exclusive ownership by strength
//! - TRANSIENT_LOCAL replay to late-joining readers
//! - content filters in both expression dialects
//! - loans that must be returned before the next take
//!
//! Test hooks: [`LoopbackTransport::fail_on`], [`LoopbackTransport::fail_next_takes`],
//! [`LoopbackTransport::dispose`] and [`LoopbackTransport::deletion_log`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, trace};

use super::{ReaderSource, Transport};
use crate::error::TransportError;
use crate::filter::{ColorPredicate, ContentFilterSpec, FilterSyntax};
use crate::listener::{policy_id, EntityEvent, EventListener};
use crate::options::{DurabilityKind, ReliabilityKind};
use crate::qos::{EntityRole, GroupQos, HistoryPolicy, OwnershipKind, QosProfile};
use crate::sample::{
    InstanceHandle, InstanceState, SampleInfo, SampleLoan, ShapeSample, TakeOutcome,
};
use crate::session::SessionStep;

type EntityId = u64;

/// Kind of a loopback entity, as recorded in the deletion log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Participant,
    Topic,
    FilteredTopic,
    Publisher,
    Subscriber,
    Writer,
    Reader,
}

#[derive(Debug)]
pub struct LoopbackParticipant {
    id: EntityId,
}

#[derive(Debug)]
pub struct LoopbackTopic {
    id: EntityId,
}

#[derive(Debug)]
pub struct LoopbackFilteredTopic {
    id: EntityId,
}

#[derive(Debug)]
pub struct LoopbackPublisher {
    id: EntityId,
}

#[derive(Debug)]
pub struct LoopbackSubscriber {
    id: EntityId,
}

#[derive(Debug)]
pub struct LoopbackWriter {
    id: EntityId,
}

#[derive(Debug)]
pub struct LoopbackReader {
    id: EntityId,
}

/// Shared-broker transport.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    broker: Arc<Mutex<Broker>>,
    syntax: FilterSyntax,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("syntax", &self.syntax)
            .finish_non_exhaustive()
    }
}

struct Record {
    kind: EntityKind,
    participant: EntityId,
}

struct TopicState {
    name: String,
    type_name: String,
}

struct FilteredTopicState {
    topic: EntityId,
    predicate: ColorPredicate,
}

struct WriterState {
    publisher: EntityId,
    participant: EntityId,
    domain_id: u32,
    topic: String,
    type_name: String,
    partitions: Vec<String>,
    qos: QosProfile,
    retained: Vec<(InstanceHandle, ShapeSample)>,
    instances: HashSet<InstanceHandle>,
    matched: HashSet<EntityId>,
}

struct ReaderState {
    subscriber: EntityId,
    participant: EntityId,
    domain_id: u32,
    topic: String,
    type_name: String,
    partitions: Vec<String>,
    qos: QosProfile,
    predicate: Option<ColorPredicate>,
    queues: BTreeMap<InstanceHandle, VecDeque<(ShapeSample, SampleInfo)>>,
    owners: HashMap<InstanceHandle, (EntityId, i32)>,
    writers_per_instance: HashMap<InstanceHandle, HashSet<EntityId>>,
    matched: HashSet<EntityId>,
    outstanding_loan: Option<u64>,
}

#[derive(Default)]
struct Broker {
    next_id: EntityId,
    next_handle: u64,
    next_loan: u64,
    fail_points: HashSet<SessionStep>,
    failing_takes: u32,
    failing_writes: u32,
    records: HashMap<EntityId, Record>,
    participants: HashMap<EntityId, (u32, Option<EventListener>)>,
    topics: HashMap<EntityId, TopicState>,
    filtered_topics: HashMap<EntityId, FilteredTopicState>,
    groups: HashMap<EntityId, Vec<String>>,
    writers: HashMap<EntityId, WriterState>,
    readers: HashMap<EntityId, ReaderState>,
    instances: HashMap<(u32, String, String), InstanceHandle>,
    deletions: Vec<EntityKind>,
}

/// Events are dispatched after the broker lock is released.
type Pending = Vec<(EventListener, String, String, EntityEvent)>;

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same broker semantics, different filter dialect.
    pub fn with_filter_syntax(syntax: FilterSyntax) -> Self {
        Self {
            broker: Arc::default(),
            syntax,
        }
    }

    /// Make every subsequent creation at `step` fail.
    pub fn fail_on(&self, step: SessionStep) {
        self.lock().fail_points.insert(step);
    }

    /// Make the next `count` takes fail with a backend error.
    pub fn fail_next_takes(&self, count: u32) {
        self.lock().failing_takes = count;
    }

    /// Make the next `count` writes fail with a backend error.
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    /// Dispose the instance `color` on every matched reader.
    pub fn dispose(&self, writer: &LoopbackWriter, color: &str) -> Result<(), TransportError> {
        let mut broker = self.lock();
        broker.lifecycle(writer.id, color, InstanceState::NotAliveDisposed)
    }

    /// Kinds of deleted entities, in deletion order.
    pub fn deletion_log(&self) -> Vec<EntityKind> {
        self.lock().deletions.clone()
    }

    /// Number of entities (of any kind) still alive.
    pub fn live_entities(&self) -> usize {
        self.lock().records.len()
    }

    /// Samples queued on a reader, all instances.
    pub fn pending_samples(&self, reader: &LoopbackReader) -> usize {
        self.lock()
            .readers
            .get(&reader.id)
            .map(|r| r.queues.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Broker> {
        // A panic while holding the lock leaves the broker usable for teardown.
        match self.broker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn dispatch(pending: Pending) {
        for (listener, topic, type_name, event) in pending {
            listener.notify(&topic, &type_name, &event);
        }
    }
}

impl Broker {
    fn check(&self, step: SessionStep) -> Result<(), TransportError> {
        if self.fail_points.contains(&step) {
            return Err(TransportError::CreationFailed(format!(
                "injected failure at {}",
                step
            )));
        }
        Ok(())
    }

    fn register(&mut self, kind: EntityKind, participant: Option<EntityId>) -> EntityId {
        self.next_id += 1;
        let id = self.next_id;
        self.records.insert(
            id,
            Record {
                kind,
                participant: participant.unwrap_or(id),
            },
        );
        id
    }

    fn unregister(&mut self, id: EntityId) {
        if let Some(record) = self.records.remove(&id) {
            self.deletions.push(record.kind);
        }
    }

    fn expect_kind(&self, id: EntityId, kind: EntityKind) -> Result<&Record, TransportError> {
        match self.records.get(&id) {
            Some(record) if record.kind == kind => Ok(record),
            _ => Err(TransportError::UnknownEntity(format!("{:?} #{}", kind, id))),
        }
    }

    fn domain_of(&self, participant: EntityId) -> Result<u32, TransportError> {
        self.participants
            .get(&participant)
            .map(|(domain, _)| *domain)
            .ok_or_else(|| TransportError::UnknownEntity(format!("participant #{}", participant)))
    }

    fn listener_of(&self, participant: EntityId) -> Option<EventListener> {
        self.participants
            .get(&participant)
            .and_then(|(_, listener)| listener.clone())
    }

    fn instance_handle(&mut self, domain_id: u32, topic: &str, color: &str) -> InstanceHandle {
        let key = (domain_id, topic.to_string(), color.to_string());
        if let Some(handle) = self.instances.get(&key) {
            return *handle;
        }
        self.next_handle += 1;
        let handle = InstanceHandle::new(self.next_handle);
        self.instances.insert(key, handle);
        handle
    }

    /// First incompatible policy of a writer/reader pair, if any.
    fn incompatibility(writer: &QosProfile, reader: &QosProfile) -> Option<u32> {
        if reader.reliability == ReliabilityKind::Reliable
            && writer.reliability == ReliabilityKind::BestEffort
        {
            return Some(policy_id::RELIABILITY);
        }
        if writer.durability < reader.durability {
            return Some(policy_id::DURABILITY);
        }
        if writer.ownership.kind != reader.ownership.kind {
            return Some(policy_id::OWNERSHIP);
        }
        if let Some(requested) = reader.deadline {
            let offered = writer.deadline.unwrap_or(Duration::MAX);
            if offered > requested {
                return Some(policy_id::DEADLINE);
            }
        }
        if let Some(offered) = writer.representation.first() {
            if !reader.representation.contains(offered) {
                return Some(policy_id::DATA_REPRESENTATION);
            }
        }
        None
    }

    fn partitions_match(a: &[String], b: &[String]) -> bool {
        if a.is_empty() || b.is_empty() {
            return a.is_empty() && b.is_empty();
        }
        a.iter().any(|name| b.contains(name))
    }

    /// Match a writer/reader pair, queueing events for both sides.
    fn try_match(&mut self, writer_id: EntityId, reader_id: EntityId, pending: &mut Pending) {
        let (Some(writer), Some(reader)) =
            (self.writers.get(&writer_id), self.readers.get(&reader_id))
        else {
            return;
        };
        if writer.domain_id != reader.domain_id
            || writer.topic != reader.topic
            || writer.type_name != reader.type_name
            || !Self::partitions_match(&writer.partitions, &reader.partitions)
        {
            return;
        }

        let writer_listener = self.listener_of(writer.participant);
        let reader_listener = self.listener_of(reader.participant);
        let topic = writer.topic.clone();
        let type_name = writer.type_name.clone();

        if let Some(policy) = Self::incompatibility(&writer.qos, &reader.qos) {
            debug!(
                "loopback: writer #{} / reader #{} incompatible on policy {}",
                writer_id, reader_id, policy
            );
            if let Some(l) = writer_listener {
                pending.push((
                    l,
                    topic.clone(),
                    type_name.clone(),
                    EntityEvent::OfferedIncompatibleQos { policy_id: policy },
                ));
            }
            if let Some(l) = reader_listener {
                pending.push((
                    l,
                    topic,
                    type_name,
                    EntityEvent::RequestedIncompatibleQos { policy_id: policy },
                ));
            }
            return;
        }

        let writer_count = self.writers.get_mut(&writer_id).map(|w| {
            w.matched.insert(reader_id);
            w.matched.len()
        });
        let reader_count = self.readers.get_mut(&reader_id).map(|r| {
            r.matched.insert(writer_id);
            r.matched.len()
        });

        if let (Some(l), Some(count)) = (writer_listener, writer_count) {
            pending.push((
                l,
                topic.clone(),
                type_name.clone(),
                EntityEvent::PublicationMatched {
                    current_count: count as i32,
                    current_count_change: 1,
                },
            ));
        }
        if let (Some(l), Some(count)) = (reader_listener, reader_count) {
            pending.push((
                l,
                topic,
                type_name,
                EntityEvent::SubscriptionMatched {
                    current_count: count as i32,
                    current_count_change: 1,
                },
            ));
        }
    }

    fn depth_limit(history: Option<HistoryPolicy>) -> Option<usize> {
        match history {
            None => Some(1),
            Some(HistoryPolicy::KeepLast(n)) => Some((n as usize).max(1)),
            Some(HistoryPolicy::KeepAll) => None,
        }
    }

    fn deliver(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        strength: i32,
        sample: &ShapeSample,
        info: SampleInfo,
    ) {
        let Some(reader) = self.readers.get_mut(&reader_id) else {
            return;
        };
        if let Some(predicate) = &reader.predicate {
            if !predicate.matches(sample) {
                return;
            }
        }

        let handle = info.instance_handle;
        if reader.qos.ownership.kind == OwnershipKind::Exclusive && info.valid_data {
            let outranked = matches!(
                reader.owners.get(&handle),
                Some((owner, owner_strength)) if *owner != writer_id && strength <= *owner_strength
            );
            if outranked {
                trace!("loopback: writer #{} does not own {}", writer_id, handle);
                return;
            }
            reader.owners.insert(handle, (writer_id, strength));
        }

        reader
            .writers_per_instance
            .entry(handle)
            .or_default()
            .insert(writer_id);

        let limit = Self::depth_limit(reader.qos.history);
        let queue = reader.queues.entry(handle).or_default();
        queue.push_back((sample.clone(), info));
        if let Some(limit) = limit {
            while queue.len() > limit {
                queue.pop_front();
            }
        }
    }

    fn write(&mut self, writer_id: EntityId, sample: &ShapeSample) -> Result<(), TransportError> {
        let (domain_id, topic) = match self.writers.get(&writer_id) {
            Some(w) => (w.domain_id, w.topic.clone()),
            None => {
                return Err(TransportError::UnknownEntity(format!("writer #{}", writer_id)));
            }
        };
        let handle = self.instance_handle(domain_id, &topic, &sample.color);

        let Some(writer) = self.writers.get_mut(&writer_id) else {
            return Err(TransportError::UnknownEntity(format!("writer #{}", writer_id)));
        };
        writer.instances.insert(handle);
        if writer.qos.durability >= DurabilityKind::TransientLocal {
            writer.retained.push((handle, sample.clone()));
            if let Some(limit) = Self::depth_limit(writer.qos.history) {
                let kept = writer.retained.iter().filter(|(h, _)| *h == handle).count();
                if kept > limit {
                    if let Some(pos) = writer.retained.iter().position(|(h, _)| *h == handle) {
                        writer.retained.remove(pos);
                    }
                }
            }
        }
        let strength = writer.qos.ownership.strength.unwrap_or(0);
        let readers: Vec<EntityId> = writer.matched.iter().copied().collect();

        for reader_id in readers {
            self.deliver(reader_id, writer_id, strength, sample, SampleInfo::data(handle));
        }
        Ok(())
    }

    fn lifecycle(
        &mut self,
        writer_id: EntityId,
        color: &str,
        state: InstanceState,
    ) -> Result<(), TransportError> {
        let (domain_id, topic, readers) = match self.writers.get(&writer_id) {
            Some(w) => (
                w.domain_id,
                w.topic.clone(),
                w.matched.iter().copied().collect::<Vec<_>>(),
            ),
            None => {
                return Err(TransportError::UnknownEntity(format!("writer #{}", writer_id)));
            }
        };
        let handle = self.instance_handle(domain_id, &topic, color);
        let key = ShapeSample::key_only(color);
        for reader_id in readers {
            self.deliver(
                reader_id,
                writer_id,
                0,
                &key,
                SampleInfo::lifecycle(handle, state),
            );
        }
        Ok(())
    }

    /// Replay retained samples of durable writers to a new reader.
    fn replay(&mut self, reader_id: EntityId) {
        let Some(reader) = self.readers.get(&reader_id) else {
            return;
        };
        if reader.qos.durability == DurabilityKind::Volatile {
            return;
        }
        let writers: Vec<EntityId> = reader.matched.iter().copied().collect();
        for writer_id in writers {
            let (strength, retained) = match self.writers.get(&writer_id) {
                Some(w) => (w.qos.ownership.strength.unwrap_or(0), w.retained.clone()),
                None => continue,
            };
            for (handle, sample) in retained {
                self.deliver(reader_id, writer_id, strength, &sample, SampleInfo::data(handle));
            }
        }
    }

    fn remove_writer(&mut self, writer_id: EntityId, pending: &mut Pending) {
        let Some(writer) = self.writers.remove(&writer_id) else {
            return;
        };
        for reader_id in &writer.matched {
            let Some(reader) = self.readers.get_mut(reader_id) else {
                continue;
            };
            reader.matched.remove(&writer_id);
            reader.owners.retain(|_, (owner, _)| *owner != writer_id);

            for handle in &writer.instances {
                let Some(writers) = reader.writers_per_instance.get_mut(handle) else {
                    continue;
                };
                if writers.remove(&writer_id) && writers.is_empty() {
                    let color = self
                        .instances
                        .iter()
                        .find(|(_, h)| **h == *handle)
                        .map(|((_, _, color), _)| color.as_str())
                        .unwrap_or_default();
                    reader.queues.entry(*handle).or_default().push_back((
                        ShapeSample::key_only(color),
                        SampleInfo::lifecycle(*handle, InstanceState::NotAliveNoWriters),
                    ));
                }
            }

            if let Some(l) = self.participants.get(&reader.participant).and_then(|p| p.1.clone()) {
                pending.push((
                    l,
                    reader.topic.clone(),
                    reader.type_name.clone(),
                    EntityEvent::SubscriptionMatched {
                        current_count: reader.matched.len() as i32,
                        current_count_change: -1,
                    },
                ));
            }
        }
        self.unregister(writer_id);
    }

    fn remove_reader(&mut self, reader_id: EntityId, pending: &mut Pending) {
        let Some(reader) = self.readers.remove(&reader_id) else {
            return;
        };
        for writer_id in &reader.matched {
            let Some(writer) = self.writers.get_mut(writer_id) else {
                continue;
            };
            writer.matched.remove(&reader_id);
            if let Some(l) = self.participants.get(&writer.participant).and_then(|p| p.1.clone()) {
                pending.push((
                    l,
                    writer.topic.clone(),
                    writer.type_name.clone(),
                    EntityEvent::PublicationMatched {
                        current_count: writer.matched.len() as i32,
                        current_count_change: -1,
                    },
                ));
            }
        }
        self.unregister(reader_id);
    }

    fn contained(&self, participant: EntityId) -> Vec<(EntityId, EntityKind)> {
        let mut children: Vec<(EntityId, EntityKind)> = self
            .records
            .iter()
            .filter(|(id, r)| r.participant == participant && **id != participant)
            .map(|(id, r)| (*id, r.kind))
            .collect();
        // Endpoints first, then groups and filtered topics, then topics.
        children.sort_by_key(|(id, kind)| {
            let rank = match kind {
                EntityKind::Writer | EntityKind::Reader => 0,
                EntityKind::Publisher | EntityKind::Subscriber | EntityKind::FilteredTopic => 1,
                EntityKind::Topic => 2,
                EntityKind::Participant => 3,
            };
            (rank, std::cmp::Reverse(*id))
        });
        children
    }

    fn remove_entity(&mut self, id: EntityId, kind: EntityKind, pending: &mut Pending) {
        match kind {
            EntityKind::Writer => self.remove_writer(id, pending),
            EntityKind::Reader => self.remove_reader(id, pending),
            EntityKind::Publisher | EntityKind::Subscriber => {
                self.groups.remove(&id);
                self.unregister(id);
            }
            EntityKind::FilteredTopic => {
                self.filtered_topics.remove(&id);
                self.unregister(id);
            }
            EntityKind::Topic => {
                self.topics.remove(&id);
                self.unregister(id);
            }
            EntityKind::Participant => {
                self.participants.remove(&id);
                self.unregister(id);
            }
        }
    }
}

impl Transport for LoopbackTransport {
    type Participant = LoopbackParticipant;
    type Topic = LoopbackTopic;
    type FilteredTopic = LoopbackFilteredTopic;
    type Publisher = LoopbackPublisher;
    type Subscriber = LoopbackSubscriber;
    type Writer = LoopbackWriter;
    type Reader = LoopbackReader;

    fn name(&self) -> &'static str {
        "loopback"
    }

    fn filter_syntax(&self) -> FilterSyntax {
        self.syntax
    }

    fn init_factory(&self) -> Result<(), TransportError> {
        self.lock().check(SessionStep::Factory)
    }

    fn create_participant(
        &self,
        domain_id: u32,
        listener: Option<EventListener>,
    ) -> Result<LoopbackParticipant, TransportError> {
        let mut broker = self.lock();
        broker.check(SessionStep::Participant)?;
        let id = broker.register(EntityKind::Participant, None);
        broker.participants.insert(id, (domain_id, listener));
        debug!("loopback: participant #{} on domain {}", id, domain_id);
        Ok(LoopbackParticipant { id })
    }

    fn create_topic(
        &self,
        participant: &LoopbackParticipant,
        name: &str,
        type_name: &str,
    ) -> Result<LoopbackTopic, TransportError> {
        let mut broker = self.lock();
        broker.check(SessionStep::Topic)?;
        broker.expect_kind(participant.id, EntityKind::Participant)?;
        let clash = broker.topics.iter().any(|(id, t)| {
            t.name == name
                && t.type_name != type_name
                && broker.records.get(id).map(|r| r.participant) == Some(participant.id)
        });
        if clash {
            return Err(TransportError::PreconditionNotMet(format!(
                "topic '{}' already registered with another type",
                name
            )));
        }
        let id = broker.register(EntityKind::Topic, Some(participant.id));
        broker.topics.insert(
            id,
            TopicState {
                name: name.to_string(),
                type_name: type_name.to_string(),
            },
        );
        Ok(LoopbackTopic { id })
    }

    fn create_filtered_topic(
        &self,
        participant: &LoopbackParticipant,
        topic: &LoopbackTopic,
        filter: &ContentFilterSpec,
    ) -> Result<LoopbackFilteredTopic, TransportError> {
        let mut broker = self.lock();
        broker.check(SessionStep::FilteredTopic)?;
        broker.expect_kind(participant.id, EntityKind::Participant)?;
        broker.expect_kind(topic.id, EntityKind::Topic)?;
        let predicate = ColorPredicate::from_spec(filter)?;
        let id = broker.register(EntityKind::FilteredTopic, Some(participant.id));
        broker.filtered_topics.insert(
            id,
            FilteredTopicState {
                topic: topic.id,
                predicate,
            },
        );
        Ok(LoopbackFilteredTopic { id })
    }

    fn create_publisher(
        &self,
        participant: &LoopbackParticipant,
        qos: &GroupQos,
    ) -> Result<LoopbackPublisher, TransportError> {
        let mut broker = self.lock();
        broker.check(SessionStep::Publisher)?;
        broker.expect_kind(participant.id, EntityKind::Participant)?;
        let id = broker.register(EntityKind::Publisher, Some(participant.id));
        broker.groups.insert(id, qos.partitions.clone());
        Ok(LoopbackPublisher { id })
    }

    fn create_subscriber(
        &self,
        participant: &LoopbackParticipant,
        qos: &GroupQos,
    ) -> Result<LoopbackSubscriber, TransportError> {
        let mut broker = self.lock();
        broker.check(SessionStep::Subscriber)?;
        broker.expect_kind(participant.id, EntityKind::Participant)?;
        let id = broker.register(EntityKind::Subscriber, Some(participant.id));
        broker.groups.insert(id, qos.partitions.clone());
        Ok(LoopbackSubscriber { id })
    }

    fn create_writer(
        &self,
        publisher: &LoopbackPublisher,
        topic: &LoopbackTopic,
        qos: &QosProfile,
    ) -> Result<LoopbackWriter, TransportError> {
        if qos.role != EntityRole::Writer {
            return Err(TransportError::BadParameter("reader QoS given to a writer".into()));
        }
        let mut pending = Pending::new();
        let writer = {
            let mut broker = self.lock();
            broker.check(SessionStep::Writer)?;
            let participant = broker.expect_kind(publisher.id, EntityKind::Publisher)?.participant;
            let domain_id = broker.domain_of(participant)?;
            let (topic_name, type_name) = broker
                .topics
                .get(&topic.id)
                .map(|t| (t.name.clone(), t.type_name.clone()))
                .ok_or_else(|| TransportError::UnknownEntity(format!("topic #{}", topic.id)))?;
            let partitions = broker.groups.get(&publisher.id).cloned().unwrap_or_default();

            let id = broker.register(EntityKind::Writer, Some(participant));
            broker.writers.insert(
                id,
                WriterState {
                    publisher: publisher.id,
                    participant,
                    domain_id,
                    topic: topic_name,
                    type_name,
                    partitions,
                    qos: qos.clone(),
                    retained: Vec::new(),
                    instances: HashSet::new(),
                    matched: HashSet::new(),
                },
            );
            let readers: Vec<EntityId> = broker.readers.keys().copied().collect();
            for reader_id in readers {
                broker.try_match(id, reader_id, &mut pending);
            }
            LoopbackWriter { id }
        };
        Self::dispatch(pending);
        Ok(writer)
    }

    fn create_reader(
        &self,
        subscriber: &LoopbackSubscriber,
        source: ReaderSource<'_, Self>,
        qos: &QosProfile,
    ) -> Result<LoopbackReader, TransportError> {
        if qos.role != EntityRole::Reader {
            return Err(TransportError::BadParameter("writer QoS given to a reader".into()));
        }
        let mut pending = Pending::new();
        let reader = {
            let mut broker = self.lock();
            broker.check(SessionStep::Reader)?;
            let participant = broker
                .expect_kind(subscriber.id, EntityKind::Subscriber)?
                .participant;
            let domain_id = broker.domain_of(participant)?;
            let (topic_id, predicate) = match source {
                ReaderSource::Topic(topic) => (topic.id, None),
                ReaderSource::Filtered(filtered) => {
                    let state = broker.filtered_topics.get(&filtered.id).ok_or_else(|| {
                        TransportError::UnknownEntity(format!("filtered topic #{}", filtered.id))
                    })?;
                    (state.topic, Some(state.predicate.clone()))
                }
            };
            let (topic_name, type_name) = broker
                .topics
                .get(&topic_id)
                .map(|t| (t.name.clone(), t.type_name.clone()))
                .ok_or_else(|| TransportError::UnknownEntity(format!("topic #{}", topic_id)))?;
            let partitions = broker.groups.get(&subscriber.id).cloned().unwrap_or_default();

            let id = broker.register(EntityKind::Reader, Some(participant));
            broker.readers.insert(
                id,
                ReaderState {
                    subscriber: subscriber.id,
                    participant,
                    domain_id,
                    topic: topic_name,
                    type_name,
                    partitions,
                    qos: qos.clone(),
                    predicate,
                    queues: BTreeMap::new(),
                    owners: HashMap::new(),
                    writers_per_instance: HashMap::new(),
                    matched: HashSet::new(),
                    outstanding_loan: None,
                },
            );
            let writers: Vec<EntityId> = broker.writers.keys().copied().collect();
            for writer_id in writers {
                broker.try_match(writer_id, id, &mut pending);
            }
            broker.replay(id);
            LoopbackReader { id }
        };
        Self::dispatch(pending);
        Ok(reader)
    }

    fn write(&self, writer: &LoopbackWriter, sample: &ShapeSample) -> Result<(), TransportError> {
        let mut broker = self.lock();
        if broker.failing_writes > 0 {
            broker.failing_writes -= 1;
            return Err(TransportError::Backend("injected write failure".into()));
        }
        broker.write(writer.id, sample)
    }

    fn take_next_instance(
        &self,
        reader: &LoopbackReader,
        previous: InstanceHandle,
    ) -> Result<TakeOutcome, TransportError> {
        let mut broker = self.lock();
        if broker.failing_takes > 0 {
            broker.failing_takes -= 1;
            return Err(TransportError::Backend("injected take failure".into()));
        }
        broker.next_loan += 1;
        let loan_id = broker.next_loan;

        let state = broker
            .readers
            .get_mut(&reader.id)
            .ok_or_else(|| TransportError::UnknownEntity(format!("reader #{}", reader.id)))?;
        if let Some(outstanding) = state.outstanding_loan {
            return Err(TransportError::PreconditionNotMet(format!(
                "loan {} not returned",
                outstanding
            )));
        }

        let next = state
            .queues
            .range_mut((Bound::Excluded(previous), Bound::Unbounded))
            .find(|(_, queue)| !queue.is_empty());
        let Some((handle, queue)) = next else {
            return Ok(TakeOutcome::NoMoreData);
        };
        let handle = *handle;
        let (samples, infos): (Vec<_>, Vec<_>) = queue.drain(..).unzip();
        state.outstanding_loan = Some(loan_id);
        trace!(
            "loopback: reader #{} took {} samples of {}",
            reader.id,
            samples.len(),
            handle
        );
        Ok(TakeOutcome::Taken(SampleLoan::new(loan_id, handle, samples, infos)))
    }

    fn return_loan(&self, reader: &LoopbackReader, loan: SampleLoan) -> Result<(), TransportError> {
        let mut broker = self.lock();
        let state = broker
            .readers
            .get_mut(&reader.id)
            .ok_or_else(|| TransportError::UnknownEntity(format!("reader #{}", reader.id)))?;
        if state.outstanding_loan != Some(loan.id()) {
            return Err(TransportError::BadParameter(format!(
                "loan {} does not belong to reader #{}",
                loan.id(),
                reader.id
            )));
        }
        state.outstanding_loan = None;
        Ok(())
    }

    fn delete_writer(
        &self,
        publisher: &LoopbackPublisher,
        writer: LoopbackWriter,
    ) -> Result<(), TransportError> {
        let mut pending = Pending::new();
        {
            let mut broker = self.lock();
            match broker.writers.get(&writer.id) {
                Some(w) if w.publisher == publisher.id => {}
                Some(_) => {
                    return Err(TransportError::PreconditionNotMet(
                        "writer belongs to another publisher".into(),
                    ));
                }
                None => {
                    return Err(TransportError::UnknownEntity(format!("writer #{}", writer.id)));
                }
            }
            broker.remove_writer(writer.id, &mut pending);
        }
        Self::dispatch(pending);
        Ok(())
    }

    fn delete_reader(
        &self,
        subscriber: &LoopbackSubscriber,
        reader: LoopbackReader,
    ) -> Result<(), TransportError> {
        let mut pending = Pending::new();
        {
            let mut broker = self.lock();
            match broker.readers.get(&reader.id) {
                Some(r) if r.subscriber == subscriber.id => {}
                Some(_) => {
                    return Err(TransportError::PreconditionNotMet(
                        "reader belongs to another subscriber".into(),
                    ));
                }
                None => {
                    return Err(TransportError::UnknownEntity(format!("reader #{}", reader.id)));
                }
            }
            broker.remove_reader(reader.id, &mut pending);
        }
        Self::dispatch(pending);
        Ok(())
    }

    fn delete_publisher(
        &self,
        _participant: &LoopbackParticipant,
        publisher: LoopbackPublisher,
    ) -> Result<(), TransportError> {
        let mut broker = self.lock();
        broker.expect_kind(publisher.id, EntityKind::Publisher)?;
        if broker.writers.values().any(|w| w.publisher == publisher.id) {
            return Err(TransportError::PreconditionNotMet(
                "publisher still has writers".into(),
            ));
        }
        broker.groups.remove(&publisher.id);
        broker.unregister(publisher.id);
        Ok(())
    }

    fn delete_subscriber(
        &self,
        _participant: &LoopbackParticipant,
        subscriber: LoopbackSubscriber,
    ) -> Result<(), TransportError> {
        let mut broker = self.lock();
        broker.expect_kind(subscriber.id, EntityKind::Subscriber)?;
        if broker.readers.values().any(|r| r.subscriber == subscriber.id) {
            return Err(TransportError::PreconditionNotMet(
                "subscriber still has readers".into(),
            ));
        }
        broker.groups.remove(&subscriber.id);
        broker.unregister(subscriber.id);
        Ok(())
    }

    fn delete_filtered_topic(
        &self,
        _participant: &LoopbackParticipant,
        topic: LoopbackFilteredTopic,
    ) -> Result<(), TransportError> {
        let mut broker = self.lock();
        broker.expect_kind(topic.id, EntityKind::FilteredTopic)?;
        broker.filtered_topics.remove(&topic.id);
        broker.unregister(topic.id);
        Ok(())
    }

    fn delete_topic(
        &self,
        _participant: &LoopbackParticipant,
        topic: LoopbackTopic,
    ) -> Result<(), TransportError> {
        let mut broker = self.lock();
        broker.expect_kind(topic.id, EntityKind::Topic)?;
        if broker.filtered_topics.values().any(|f| f.topic == topic.id) {
            return Err(TransportError::PreconditionNotMet(
                "topic still has filtered views".into(),
            ));
        }
        broker.topics.remove(&topic.id);
        broker.unregister(topic.id);
        Ok(())
    }

    fn delete_contained_entities(
        &self,
        participant: &LoopbackParticipant,
    ) -> Result<(), TransportError> {
        let mut pending = Pending::new();
        {
            let mut broker = self.lock();
            broker.expect_kind(participant.id, EntityKind::Participant)?;
            for (id, kind) in broker.contained(participant.id) {
                broker.remove_entity(id, kind, &mut pending);
            }
        }
        Self::dispatch(pending);
        Ok(())
    }

    fn delete_participant(&self, participant: LoopbackParticipant) -> Result<(), TransportError> {
        let mut broker = self.lock();
        broker.expect_kind(participant.id, EntityKind::Participant)?;
        if !broker.contained(participant.id).is_empty() {
            return Err(TransportError::PreconditionNotMet(
                "participant still contains entities".into(),
            ));
        }
        let mut pending = Pending::new();
        broker.remove_entity(participant.id, EntityKind::Participant, &mut pending);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionsBuilder, Role};
    use crate::output::VecOutput;
    use crate::qos::QosResolver;
    use crate::SHAPE_TYPE_NAME;

    struct Endpoint {
        participant: LoopbackParticipant,
        topic: LoopbackTopic,
    }

    fn endpoint(transport: &LoopbackTransport, listener: Option<EventListener>) -> Endpoint {
        let participant = transport
            .create_participant(0, listener)
            .expect("participant");
        let topic = transport
            .create_topic(&participant, "Square", SHAPE_TYPE_NAME)
            .expect("topic");
        Endpoint { participant, topic }
    }

    fn qos(builder: OptionsBuilder) -> (QosProfile, QosProfile, GroupQos) {
        let options = builder.topic("Square").build().expect("valid");
        let resolver = QosResolver::new(&options);
        (resolver.writer(), resolver.reader(), resolver.group())
    }

    fn drain(transport: &LoopbackTransport, reader: &LoopbackReader) -> Vec<ShapeSample> {
        let mut out = Vec::new();
        let mut previous = InstanceHandle::NIL;
        while let TakeOutcome::Taken(loan) = transport
            .take_next_instance(reader, previous)
            .expect("take")
        {
            previous = loan.instance();
            out.extend(
                loan.iter()
                    .filter(|(_, info)| info.valid_data)
                    .map(|(sample, _)| sample.clone()),
            );
            transport.return_loan(reader, loan).expect("return loan");
        }
        out
    }

    #[test]
    fn test_write_reaches_matched_reader() {
        let transport = LoopbackTransport::new();
        let (wq, rq, gq) = qos(OptionsBuilder::new().role(Role::Publish).history_depth(0));

        let pub_side = endpoint(&transport, None);
        let publisher = transport
            .create_publisher(&pub_side.participant, &gq)
            .expect("publisher");
        let writer = transport
            .create_writer(&publisher, &pub_side.topic, &wq)
            .expect("writer");

        let sub_side = endpoint(&transport, None);
        let subscriber = transport
            .create_subscriber(&sub_side.participant, &gq)
            .expect("subscriber");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&sub_side.topic), &rq)
            .expect("reader");

        transport
            .write(&writer, &ShapeSample::new("RED", 1, 2, 20))
            .expect("write");
        transport
            .write(&writer, &ShapeSample::new("RED", 3, 4, 20))
            .expect("write");

        let taken = drain(&transport, &reader);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[1].x, 3);
    }

    #[test]
    fn test_default_history_keeps_last_sample() {
        let transport = LoopbackTransport::new();
        let (wq, rq, gq) = qos(OptionsBuilder::new().role(Role::Publish));

        let side = endpoint(&transport, None);
        let publisher = transport.create_publisher(&side.participant, &gq).expect("pub");
        let writer = transport.create_writer(&publisher, &side.topic, &wq).expect("writer");
        let subscriber = transport.create_subscriber(&side.participant, &gq).expect("sub");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&side.topic), &rq)
            .expect("reader");

        for x in 0..5 {
            transport
                .write(&writer, &ShapeSample::new("GREEN", x, 0, 20))
                .expect("write");
        }
        assert_eq!(transport.pending_samples(&reader), 1);
        assert_eq!(drain(&transport, &reader)[0].x, 4);
    }

    #[test]
    fn test_partitions_isolate() {
        let transport = LoopbackTransport::new();
        let (wq, rq, _) = qos(OptionsBuilder::new().role(Role::Publish));
        let side = endpoint(&transport, None);

        let publisher = transport
            .create_publisher(
                &side.participant,
                &GroupQos {
                    partitions: vec!["A".into()],
                },
            )
            .expect("pub");
        let subscriber = transport
            .create_subscriber(&side.participant, &GroupQos::default())
            .expect("sub");
        let writer = transport.create_writer(&publisher, &side.topic, &wq).expect("writer");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&side.topic), &rq)
            .expect("reader");

        transport
            .write(&writer, &ShapeSample::new("RED", 1, 1, 20))
            .expect("write");
        assert_eq!(transport.pending_samples(&reader), 0);
    }

    #[test]
    fn test_incompatible_reliability_reported() {
        let transport = LoopbackTransport::new();
        let events = Arc::new(Mutex::new(VecOutput::default()));
        let listener = EventListener::new(events.clone());

        let (wq, _, gq) = qos(
            OptionsBuilder::new()
                .role(Role::Publish)
                .reliability(ReliabilityKind::BestEffort),
        );
        let (_, rq, _) = qos(OptionsBuilder::new().role(Role::Subscribe));

        let side = endpoint(&transport, Some(listener));
        let publisher = transport.create_publisher(&side.participant, &gq).expect("pub");
        let subscriber = transport.create_subscriber(&side.participant, &gq).expect("sub");
        let writer = transport.create_writer(&publisher, &side.topic, &wq).expect("writer");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&side.topic), &rq)
            .expect("reader");

        transport
            .write(&writer, &ShapeSample::new("RED", 1, 1, 20))
            .expect("write");
        assert_eq!(transport.pending_samples(&reader), 0);

        let lines = events.lock().expect("events").lines.clone();
        assert!(lines
            .iter()
            .any(|l| l.starts_with("on_offered_incompatible_qos()") && l.ends_with("11 (RELIABILITY)")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("on_requested_incompatible_qos()")));
    }

    #[test]
    fn test_exclusive_ownership_prefers_strongest() {
        let transport = LoopbackTransport::new();
        let (weak_q, rq, gq) = qos(
            OptionsBuilder::new()
                .role(Role::Publish)
                .ownership_strength(1)
                .history_depth(0),
        );
        let (strong_q, _, _) = qos(OptionsBuilder::new().role(Role::Publish).ownership_strength(5));

        let side = endpoint(&transport, None);
        let publisher = transport.create_publisher(&side.participant, &gq).expect("pub");
        let subscriber = transport.create_subscriber(&side.participant, &gq).expect("sub");
        let weak = transport.create_writer(&publisher, &side.topic, &weak_q).expect("weak");
        let strong = transport
            .create_writer(&publisher, &side.topic, &strong_q)
            .expect("strong");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&side.topic), &rq)
            .expect("reader");

        transport.write(&weak, &ShapeSample::new("RED", 1, 1, 20)).expect("write");
        transport.write(&strong, &ShapeSample::new("RED", 2, 2, 20)).expect("write");
        transport.write(&weak, &ShapeSample::new("RED", 3, 3, 20)).expect("write");

        let xs: Vec<i32> = drain(&transport, &reader).iter().map(|s| s.x).collect();
        assert_eq!(xs, vec![1, 2]);
    }

    #[test]
    fn test_transient_local_replays_to_late_reader() {
        let transport = LoopbackTransport::new();
        let (wq, rq, gq) = qos(
            OptionsBuilder::new()
                .role(Role::Publish)
                .durability(DurabilityKind::TransientLocal)
                .history_depth(3),
        );

        let side = endpoint(&transport, None);
        let publisher = transport.create_publisher(&side.participant, &gq).expect("pub");
        let writer = transport.create_writer(&publisher, &side.topic, &wq).expect("writer");
        for x in 0..5 {
            transport
                .write(&writer, &ShapeSample::new("YELLOW", x, 0, 20))
                .expect("write");
        }

        let subscriber = transport.create_subscriber(&side.participant, &gq).expect("sub");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&side.topic), &rq)
            .expect("reader");

        let xs: Vec<i32> = drain(&transport, &reader).iter().map(|s| s.x).collect();
        assert_eq!(xs, vec![2, 3, 4]);
    }

    #[test]
    fn test_take_requires_returned_loan() {
        let transport = LoopbackTransport::new();
        let (wq, rq, gq) = qos(OptionsBuilder::new().role(Role::Publish));
        let side = endpoint(&transport, None);
        let publisher = transport.create_publisher(&side.participant, &gq).expect("pub");
        let subscriber = transport.create_subscriber(&side.participant, &gq).expect("sub");
        let writer = transport.create_writer(&publisher, &side.topic, &wq).expect("writer");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&side.topic), &rq)
            .expect("reader");

        transport.write(&writer, &ShapeSample::new("RED", 1, 1, 20)).expect("write");
        transport.write(&writer, &ShapeSample::new("BLUE", 1, 1, 20)).expect("write");

        let first = match transport.take_next_instance(&reader, InstanceHandle::NIL) {
            Ok(TakeOutcome::Taken(loan)) => loan,
            other => panic!("expected a loan, got {:?}", other),
        };
        let err = transport
            .take_next_instance(&reader, first.instance())
            .expect_err("loan outstanding");
        assert!(matches!(err, TransportError::PreconditionNotMet(_)));

        let previous = first.instance();
        transport.return_loan(&reader, first).expect("return");
        assert!(matches!(
            transport.take_next_instance(&reader, previous),
            Ok(TakeOutcome::Taken(_))
        ));
    }

    #[test]
    fn test_delete_participant_requires_empty() {
        let transport = LoopbackTransport::new();
        let side = endpoint(&transport, None);

        let Endpoint { participant, topic } = side;
        let err = transport
            .delete_participant(participant)
            .expect_err("topic still alive");
        assert!(matches!(err, TransportError::PreconditionNotMet(_)));
        drop(topic);
    }

    #[test]
    fn test_delete_contained_entities_sweeps_children() {
        let transport = LoopbackTransport::new();
        let (wq, _, gq) = qos(OptionsBuilder::new().role(Role::Publish));
        let side = endpoint(&transport, None);
        let publisher = transport.create_publisher(&side.participant, &gq).expect("pub");
        let _writer = transport.create_writer(&publisher, &side.topic, &wq).expect("writer");
        assert_eq!(transport.live_entities(), 4);

        transport
            .delete_contained_entities(&side.participant)
            .expect("sweep");
        assert_eq!(
            transport.deletion_log(),
            vec![EntityKind::Writer, EntityKind::Publisher, EntityKind::Topic]
        );
        transport.delete_participant(side.participant).expect("empty now");
        assert_eq!(transport.live_entities(), 0);
    }

    #[test]
    fn test_dispose_yields_invalid_sample() {
        let transport = LoopbackTransport::new();
        let (wq, rq, gq) = qos(OptionsBuilder::new().role(Role::Publish).history_depth(0));
        let side = endpoint(&transport, None);
        let publisher = transport.create_publisher(&side.participant, &gq).expect("pub");
        let subscriber = transport.create_subscriber(&side.participant, &gq).expect("sub");
        let writer = transport.create_writer(&publisher, &side.topic, &wq).expect("writer");
        let reader = transport
            .create_reader(&subscriber, ReaderSource::Topic(&side.topic), &rq)
            .expect("reader");

        transport.write(&writer, &ShapeSample::new("RED", 1, 1, 20)).expect("write");
        transport.dispose(&writer, "RED").expect("dispose");
        assert_eq!(transport.pending_samples(&reader), 2);
        assert_eq!(drain(&transport, &reader).len(), 1);
    }
}
