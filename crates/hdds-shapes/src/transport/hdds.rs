// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS backend.
//!
//! Maps the shapes capability set onto the HDDS public API. HDDS entities
//! are released when their handles drop, so the delete operations only
//! consume the wrappers.
//!
//! [`ShapeType`] is keyed on `color`. HDDS applies content filters itself
//! through [`DDS::get_fields`], so readers see filtered samples only. The
//! reader cache keeps every sample and the per-instance history depth is
//! applied here, where samples are grouped by their key hash.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ::hdds::core::ser::{Cursor, CursorMut};
use ::hdds::core::types::{FieldLayout, FieldType, PrimitiveKind, TypeDescriptor};
use ::hdds::dds::{
    DataReaderListener, DataWriterListener, LivelinessChangedStatus, PublicationMatchedStatus,
    Publisher, RequestedDeadlineMissedStatus, RequestedIncompatibleQosStatus, Subscriber,
    SubscriptionMatchedStatus, DDS,
};
use ::hdds::xtypes::{
    CommonStructMember, CompleteMemberDetail, CompleteStructHeader, CompleteStructMember,
    CompleteStructType, CompleteTypeDetail, CompleteTypeObject, MemberFlag, StructTypeFlag,
    TypeIdentifier,
};
use ::hdds::{
    ContentFilteredTopic, DataReader, DataWriter, FieldValue, Participant, QoS, Topic,
    TransportMode,
};
use tracing::{debug, trace, warn};

use super::{ReaderSource, Transport};
use crate::error::TransportError;
use crate::filter::{sample_fields, ContentFilterSpec, FilterSyntax};
use crate::listener::{EntityEvent, EventListener};
use crate::options::{DataRepresentation, DurabilityKind, ReliabilityKind};
use crate::qos::{EntityRole, GroupQos, HistoryPolicy, OwnershipKind, QosProfile};
use crate::sample::{InstanceHandle, SampleInfo, SampleLoan, ShapeSample, TakeOutcome};
use crate::SHAPE_TYPE_NAME;

/// Samples drained from a reader per `take_batch` call.
const TAKE_BATCH: usize = 64;

/// Upper bound on `take_batch` calls per instance sweep step.
const MAX_BATCHES: usize = 16;

/// FNV-1a 32-bit hash of `"ShapeType"`.
const SHAPE_TYPE_ID: u32 = fnv1a_32(SHAPE_TYPE_NAME.as_bytes());

const FNV128_OFFSET: u128 = 0x6c62_272e_07bb_0142_62b8_2175_6295_c58d;
const FNV128_PRIME: u128 = 0x0000_0000_0100_0000_0000_0000_0000_013b;

const fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = 2_166_136_261_u32;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(16_777_619);
        i += 1;
    }
    hash
}

fn fnv1a_128(bytes: &[u8]) -> [u8; 16] {
    let hash = bytes.iter().fold(FNV128_OFFSET, |hash, byte| {
        (hash ^ u128::from(*byte)).wrapping_mul(FNV128_PRIME)
    });
    hash.to_be_bytes()
}

/// Wire type of the shapes topic; `color` is the key.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeType {
    pub color: String,
    pub x: i32,
    pub y: i32,
    pub shapesize: i32,
}

impl ShapeType {
    /// Local instance handle for this sample's key.
    ///
    /// The leading eight bytes of the key hash, big-endian. A zero prefix is
    /// moved to 1 so no instance collides with [`InstanceHandle::NIL`].
    pub fn instance_handle(&self) -> InstanceHandle {
        let key = self.compute_key();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&key[..8]);
        InstanceHandle::new(u64::from_be_bytes(prefix).max(1))
    }
}

impl DDS for ShapeType {
    fn type_descriptor() -> &'static TypeDescriptor {
        static DESCRIPTOR: TypeDescriptor = TypeDescriptor {
            type_id: SHAPE_TYPE_ID,
            type_name: SHAPE_TYPE_NAME,
            size_bytes: 0xFFFF_FFFF,
            alignment: 4,
            is_variable_size: true,
            fields: &[
                FieldLayout {
                    name: "color",
                    offset_bytes: 0,
                    field_type: FieldType::String,
                    alignment: 4,
                    size_bytes: 0xFFFF_FFFF,
                    element_type: None,
                },
                FieldLayout {
                    name: "x",
                    offset_bytes: 0,
                    field_type: FieldType::Primitive(PrimitiveKind::I32),
                    alignment: 4,
                    size_bytes: 4,
                    element_type: None,
                },
                FieldLayout {
                    name: "y",
                    offset_bytes: 0,
                    field_type: FieldType::Primitive(PrimitiveKind::I32),
                    alignment: 4,
                    size_bytes: 4,
                    element_type: None,
                },
                FieldLayout {
                    name: "shapesize",
                    offset_bytes: 0,
                    field_type: FieldType::Primitive(PrimitiveKind::I32),
                    alignment: 4,
                    size_bytes: 4,
                    element_type: None,
                },
            ],
        };
        &DESCRIPTOR
    }

    fn encode_cdr2(&self, buf: &mut [u8]) -> ::hdds::dds::Result<usize> {
        let mut cursor = CursorMut::new(buf);
        // string: u32 length including the terminator, bytes, NUL
        let color = self.color.as_bytes();
        let len = u32::try_from(color.len() + 1)
            .map_err(|_| ::hdds::dds::Error::SerializationError)?;
        cursor.write_u32_le(len)?;
        cursor.write_bytes(color)?;
        cursor.write_u8(0)?;
        while cursor.offset() % 4 != 0 {
            cursor.write_u8(0)?;
        }
        cursor.write_i32_le(self.x)?;
        cursor.write_i32_le(self.y)?;
        cursor.write_i32_le(self.shapesize)?;
        Ok(cursor.offset())
    }

    fn decode_cdr2(buf: &[u8]) -> ::hdds::dds::Result<Self> {
        let mut cursor = Cursor::new(buf);
        let len = cursor.read_u32_le()? as usize;
        let color = if len == 0 {
            String::new()
        } else {
            let bytes = cursor.read_bytes(len - 1)?;
            let _ = cursor.read_u8()?;
            String::from_utf8(bytes.to_vec()).map_err(|_| ::hdds::dds::Error::SerializationError)?
        };
        cursor.align(4)?;
        Ok(Self {
            color,
            x: cursor.read_i32_le()?,
            y: cursor.read_i32_le()?,
            shapesize: cursor.read_i32_le()?,
        })
    }

    fn get_fields(&self) -> HashMap<String, FieldValue> {
        sample_fields(&ShapeSample::from(self.clone()))
    }

    fn get_type_object() -> Option<CompleteTypeObject> {
        let member = |id: u32, name: &str, flags: MemberFlag, type_id: TypeIdentifier| {
            CompleteStructMember {
                common: CommonStructMember {
                    member_id: id,
                    member_flags: flags,
                    member_type_id: type_id,
                },
                detail: CompleteMemberDetail::new(name),
            }
        };
        Some(CompleteTypeObject::Struct(CompleteStructType {
            struct_flags: StructTypeFlag::IS_FINAL,
            header: CompleteStructHeader {
                base_type: None,
                detail: CompleteTypeDetail::new(SHAPE_TYPE_NAME),
            },
            member_seq: vec![
                member(0, "color", MemberFlag::IS_KEY, TypeIdentifier::TK_STRING8),
                member(1, "x", MemberFlag::empty(), TypeIdentifier::TK_INT32),
                member(2, "y", MemberFlag::empty(), TypeIdentifier::TK_INT32),
                member(3, "shapesize", MemberFlag::empty(), TypeIdentifier::TK_INT32),
            ],
        }))
    }

    fn compute_key(&self) -> [u8; 16] {
        fnv1a_128(self.color.as_bytes())
    }

    fn has_key() -> bool {
        true
    }
}

impl From<&ShapeSample> for ShapeType {
    fn from(sample: &ShapeSample) -> Self {
        Self {
            color: sample.color.clone(),
            x: sample.x,
            y: sample.y,
            shapesize: sample.shapesize,
        }
    }
}

impl From<ShapeType> for ShapeSample {
    fn from(shape: ShapeType) -> Self {
        ShapeSample::new(shape.color, shape.x, shape.y, shape.shapesize)
    }
}

/// Backend creating HDDS entities.
#[derive(Debug, Clone)]
pub struct HddsTransport {
    participant_name: String,
    mode: TransportMode,
}

impl Default for HddsTransport {
    fn default() -> Self {
        Self {
            participant_name: "shape_main".to_string(),
            mode: TransportMode::UdpMulticast,
        }
    }
}

impl HddsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct HddsParticipant {
    inner: Arc<Participant>,
    listener: Option<EventListener>,
}

pub struct HddsTopic {
    inner: Topic<ShapeType>,
    name: String,
}

pub struct HddsFilteredTopic {
    inner: ContentFilteredTopic<ShapeType>,
}

pub struct HddsPublisher {
    _inner: Publisher,
    partitions: Vec<String>,
    listener: Option<EventListener>,
}

pub struct HddsSubscriber {
    _inner: Subscriber,
    partitions: Vec<String>,
    listener: Option<EventListener>,
}

pub struct HddsWriter {
    inner: DataWriter<ShapeType>,
}

pub struct HddsReader {
    inner: DataReader<ShapeType>,
    pending: Mutex<PendingInstances>,
}

/// Samples taken from HDDS but not yet handed out, per instance.
struct PendingInstances {
    instances: BTreeMap<InstanceHandle, VecDeque<ShapeSample>>,
    /// Per-instance KEEP_LAST depth; `None` keeps everything.
    depth: Option<usize>,
    next_loan: u64,
    outstanding: Option<u64>,
}

impl PendingInstances {
    fn new(history: Option<HistoryPolicy>) -> Self {
        let depth = match history {
            Some(HistoryPolicy::KeepAll) => None,
            Some(HistoryPolicy::KeepLast(depth)) => Some((depth as usize).max(1)),
            None => Some(1),
        };
        Self {
            instances: BTreeMap::new(),
            depth,
            next_loan: 0,
            outstanding: None,
        }
    }

    fn stage(&mut self, shape: ShapeType) {
        let queue = self.instances.entry(shape.instance_handle()).or_default();
        queue.push_back(ShapeSample::from(shape));
        if let Some(depth) = self.depth {
            while queue.len() > depth {
                queue.pop_front();
            }
        }
    }

    fn next_after(&mut self, previous: InstanceHandle) -> Option<(InstanceHandle, Vec<ShapeSample>)> {
        let handle = self
            .instances
            .range((Bound::Excluded(previous), Bound::Unbounded))
            .find(|(_, samples)| !samples.is_empty())
            .map(|(handle, _)| *handle)?;
        self.instances
            .remove(&handle)
            .map(|samples| (handle, Vec::from(samples)))
    }

    fn len(&self) -> usize {
        self.instances.values().map(VecDeque::len).sum()
    }
}

impl HddsReader {
    fn pending(&self) -> MutexGuard<'_, PendingInstances> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Forwards HDDS status callbacks to an [`EventListener`].
struct StatusForwarder {
    listener: EventListener,
    topic: String,
    offered_deadline_missed: AtomicU32,
    liveliness_lost: AtomicU32,
}

impl StatusForwarder {
    fn new(listener: EventListener, topic: &str) -> Arc<Self> {
        Arc::new(Self {
            listener,
            topic: topic.to_string(),
            offered_deadline_missed: AtomicU32::new(0),
            liveliness_lost: AtomicU32::new(0),
        })
    }

    fn emit(&self, event: EntityEvent) {
        self.listener.notify(&self.topic, SHAPE_TYPE_NAME, &event);
    }
}

fn count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl DataWriterListener<ShapeType> for StatusForwarder {
    fn on_publication_matched(&self, status: PublicationMatchedStatus) {
        self.emit(EntityEvent::PublicationMatched {
            current_count: count(status.current_count),
            current_count_change: status.current_count_change,
        });
    }

    fn on_offered_deadline_missed(&self, _instance_handle: Option<u64>) {
        let total = self.offered_deadline_missed.fetch_add(1, Ordering::Relaxed) + 1;
        self.emit(EntityEvent::OfferedDeadlineMissed {
            total_count: count(total),
            total_count_change: 1,
        });
    }

    fn on_offered_incompatible_qos(&self, policy_id: u32, _policy_name: &str) {
        self.emit(EntityEvent::OfferedIncompatibleQos { policy_id });
    }

    fn on_liveliness_lost(&self) {
        let total = self.liveliness_lost.fetch_add(1, Ordering::Relaxed) + 1;
        self.emit(EntityEvent::LivelinessLost {
            total_count: count(total),
            total_count_change: 1,
        });
    }
}

impl DataReaderListener<ShapeType> for StatusForwarder {
    fn on_subscription_matched(&self, status: SubscriptionMatchedStatus) {
        self.emit(EntityEvent::SubscriptionMatched {
            current_count: count(status.current_count),
            current_count_change: status.current_count_change,
        });
    }

    fn on_liveliness_changed(&self, status: LivelinessChangedStatus) {
        self.emit(EntityEvent::LivelinessChanged {
            alive_count: count(status.alive_count),
            not_alive_count: count(status.not_alive_count),
        });
    }

    fn on_requested_deadline_missed(&self, status: RequestedDeadlineMissedStatus) {
        self.emit(EntityEvent::RequestedDeadlineMissed {
            total_count: count(status.total_count),
            total_count_change: status.total_count_change,
        });
    }

    fn on_requested_incompatible_qos(&self, status: RequestedIncompatibleQosStatus) {
        self.emit(EntityEvent::RequestedIncompatibleQos {
            policy_id: status.last_policy_id,
        });
    }
}

/// Translate a resolved profile into HDDS endpoint QoS.
pub fn endpoint_qos(profile: &QosProfile, partitions: &[String]) -> QoS {
    let mut qos = match profile.reliability {
        ReliabilityKind::BestEffort => QoS::best_effort(),
        ReliabilityKind::Reliable => QoS::reliable(),
    };

    qos = match profile.history {
        None => qos,
        Some(HistoryPolicy::KeepLast(depth)) => qos.keep_last(depth),
        Some(HistoryPolicy::KeepAll) => qos.keep_all(),
    };

    // HDDS has no TRANSIENT; keep the pair compatible by rounding writers up
    // and readers down.
    qos = match (profile.durability, profile.role) {
        (DurabilityKind::Volatile, _) => qos.volatile(),
        (DurabilityKind::TransientLocal, _) => qos.transient_local(),
        (DurabilityKind::Transient, EntityRole::Reader) => qos.transient_local(),
        (DurabilityKind::Transient, EntityRole::Writer) | (DurabilityKind::Persistent, _) => {
            qos.persistent()
        }
    };

    if let Some(period) = profile.deadline {
        qos = qos.deadline_secs(period.as_secs());
    }
    if let Some(separation) = profile.time_based_filter {
        qos = qos.time_based_filter_secs(separation.as_secs());
    }

    qos = match profile.ownership.kind {
        OwnershipKind::Shared => qos.ownership_shared(),
        OwnershipKind::Exclusive => qos.ownership_exclusive(),
    };
    if let Some(strength) = profile.ownership.strength {
        qos = qos.ownership_strength(strength);
    }

    for partition in partitions {
        qos = qos.add_partition(partition);
    }

    if profile.representation.iter().any(|r| *r != DataRepresentation::Xcdr) {
        debug!(
            "data representation {:?} is not configurable on hdds, using its default",
            profile.representation
        );
    }
    qos
}

fn group_qos(group: &GroupQos) -> QoS {
    group
        .partitions
        .iter()
        .fold(QoS::default(), |qos, name| qos.add_partition(name))
}

impl Transport for HddsTransport {
    type Participant = HddsParticipant;
    type Topic = HddsTopic;
    type FilteredTopic = HddsFilteredTopic;
    type Publisher = HddsPublisher;
    type Subscriber = HddsSubscriber;
    type Writer = HddsWriter;
    type Reader = HddsReader;

    fn name(&self) -> &'static str {
        "hdds"
    }

    fn filter_syntax(&self) -> FilterSyntax {
        FilterSyntax::Equality
    }

    fn create_participant(
        &self,
        domain_id: u32,
        listener: Option<EventListener>,
    ) -> Result<HddsParticipant, TransportError> {
        let inner = Participant::builder(&self.participant_name)
            .domain_id(domain_id)
            .with_transport(self.mode)
            .build()?;
        debug!(
            "hdds participant '{}' on domain {} ({:?})",
            self.participant_name, domain_id, self.mode
        );
        Ok(HddsParticipant { inner, listener })
    }

    fn create_topic(
        &self,
        participant: &HddsParticipant,
        name: &str,
        type_name: &str,
    ) -> Result<HddsTopic, TransportError> {
        if type_name != SHAPE_TYPE_NAME {
            return Err(TransportError::BadParameter(format!(
                "hdds backend only registers '{}', not '{}'",
                SHAPE_TYPE_NAME, type_name
            )));
        }
        let inner = participant.inner.topic::<ShapeType>(name)?;
        Ok(HddsTopic {
            inner,
            name: name.to_string(),
        })
    }

    fn create_filtered_topic(
        &self,
        participant: &HddsParticipant,
        _topic: &HddsTopic,
        filter: &ContentFilterSpec,
    ) -> Result<HddsFilteredTopic, TransportError> {
        let inner = participant
            .inner
            .create_content_filtered_topic::<ShapeType>(
                &filter.name,
                &filter.related_topic,
                &filter.expression,
                filter.parameters.clone(),
            )
            .map_err(|e| TransportError::Filter(e.to_string()))?;
        Ok(HddsFilteredTopic { inner })
    }

    fn create_publisher(
        &self,
        participant: &HddsParticipant,
        qos: &GroupQos,
    ) -> Result<HddsPublisher, TransportError> {
        let inner = participant.inner.create_publisher(group_qos(qos))?;
        Ok(HddsPublisher {
            _inner: inner,
            partitions: qos.partitions.clone(),
            listener: participant.listener.clone(),
        })
    }

    fn create_subscriber(
        &self,
        participant: &HddsParticipant,
        qos: &GroupQos,
    ) -> Result<HddsSubscriber, TransportError> {
        let inner = participant.inner.create_subscriber(group_qos(qos))?;
        Ok(HddsSubscriber {
            _inner: inner,
            partitions: qos.partitions.clone(),
            listener: participant.listener.clone(),
        })
    }

    fn create_writer(
        &self,
        publisher: &HddsPublisher,
        topic: &HddsTopic,
        qos: &QosProfile,
    ) -> Result<HddsWriter, TransportError> {
        let mut builder = topic
            .inner
            .writer()
            .qos(endpoint_qos(qos, &publisher.partitions));
        if let Some(listener) = &publisher.listener {
            builder = builder.with_listener(StatusForwarder::new(listener.clone(), &topic.name));
        }
        Ok(HddsWriter {
            inner: builder.build()?,
        })
    }

    fn create_reader(
        &self,
        subscriber: &HddsSubscriber,
        source: ReaderSource<'_, Self>,
        qos: &QosProfile,
    ) -> Result<HddsReader, TransportError> {
        let (builder, topic_name) = match source {
            ReaderSource::Topic(topic) => (topic.inner.reader(), topic.name.clone()),
            ReaderSource::Filtered(filtered) => (
                filtered.inner.reader(),
                filtered.inner.related_topic_name().to_string(),
            ),
        };
        // The HDDS cache depth is reader-wide; instance depth is applied on
        // staging so one color cannot evict another.
        let mut builder = builder.qos(endpoint_qos(qos, &subscriber.partitions).keep_all());
        if let Some(listener) = &subscriber.listener {
            builder = builder.with_listener(StatusForwarder::new(listener.clone(), &topic_name));
        }
        Ok(HddsReader {
            inner: builder.build()?,
            pending: Mutex::new(PendingInstances::new(qos.history)),
        })
    }

    fn write(&self, writer: &HddsWriter, sample: &ShapeSample) -> Result<(), TransportError> {
        writer.inner.write(&ShapeType::from(sample))?;
        Ok(())
    }

    fn take_next_instance(
        &self,
        reader: &HddsReader,
        previous: InstanceHandle,
    ) -> Result<TakeOutcome, TransportError> {
        let mut pending = reader.pending();
        if let Some(loan) = pending.outstanding {
            return Err(TransportError::PreconditionNotMet(format!(
                "loan {} not returned",
                loan
            )));
        }

        for _ in 0..MAX_BATCHES {
            let batch = reader.inner.take_batch(TAKE_BATCH)?;
            let drained = batch.len();
            trace!("took {} samples from hdds", drained);
            for shape in batch {
                pending.stage(shape);
            }
            if drained < TAKE_BATCH {
                break;
            }
        }

        let Some((handle, samples)) = pending.next_after(previous) else {
            return Ok(TakeOutcome::NoMoreData);
        };
        pending.next_loan += 1;
        let loan_id = pending.next_loan;
        pending.outstanding = Some(loan_id);

        let infos = vec![SampleInfo::data(handle); samples.len()];
        Ok(TakeOutcome::Taken(SampleLoan::new(
            loan_id, handle, samples, infos,
        )))
    }

    fn return_loan(&self, reader: &HddsReader, loan: SampleLoan) -> Result<(), TransportError> {
        let mut pending = reader.pending();
        if pending.outstanding != Some(loan.id()) {
            return Err(TransportError::BadParameter(format!(
                "loan {} was not issued by this reader",
                loan.id()
            )));
        }
        pending.outstanding = None;
        Ok(())
    }

    fn delete_writer(
        &self,
        _publisher: &HddsPublisher,
        writer: HddsWriter,
    ) -> Result<(), TransportError> {
        drop(writer);
        Ok(())
    }

    fn delete_reader(
        &self,
        _subscriber: &HddsSubscriber,
        reader: HddsReader,
    ) -> Result<(), TransportError> {
        let leftover = reader.pending().len();
        if leftover > 0 {
            warn!("dropping reader with {} unread samples", leftover);
        }
        drop(reader);
        Ok(())
    }

    fn delete_publisher(
        &self,
        _participant: &HddsParticipant,
        publisher: HddsPublisher,
    ) -> Result<(), TransportError> {
        drop(publisher);
        Ok(())
    }

    fn delete_subscriber(
        &self,
        _participant: &HddsParticipant,
        subscriber: HddsSubscriber,
    ) -> Result<(), TransportError> {
        drop(subscriber);
        Ok(())
    }

    fn delete_filtered_topic(
        &self,
        _participant: &HddsParticipant,
        topic: HddsFilteredTopic,
    ) -> Result<(), TransportError> {
        drop(topic);
        Ok(())
    }

    fn delete_topic(
        &self,
        _participant: &HddsParticipant,
        topic: HddsTopic,
    ) -> Result<(), TransportError> {
        drop(topic);
        Ok(())
    }

    fn delete_contained_entities(
        &self,
        _participant: &HddsParticipant,
    ) -> Result<(), TransportError> {
        // Children are owned by the session and already dropped.
        Ok(())
    }

    fn delete_participant(&self, participant: HddsParticipant) -> Result<(), TransportError> {
        let refs = Arc::strong_count(&participant.inner);
        if refs > 1 {
            debug!("participant still referenced {} times", refs - 1);
        }
        drop(participant);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionsBuilder, Role};
    use crate::qos::QosResolver;
    use ::hdds::dds::{Durability, History, Reliability};

    fn profiles(builder: OptionsBuilder) -> (QosProfile, QosProfile) {
        let options = builder.topic("Square").build().expect("valid");
        let resolver = QosResolver::new(&options);
        (resolver.writer(), resolver.reader())
    }

    #[test]
    fn test_shape_type_conversion() {
        let sample = ShapeSample::new("RED", 1, 2, 20);
        let shape = ShapeType::from(&sample);
        assert_eq!(shape.color, "RED");
        assert_eq!(ShapeSample::from(shape), sample);
    }

    #[test]
    fn test_transient_rounds_per_role() {
        let (writer, reader) = profiles(
            OptionsBuilder::new()
                .role(Role::Publish)
                .durability(DurabilityKind::Transient),
        );
        assert!(matches!(
            endpoint_qos(&writer, &[]).durability,
            Durability::Persistent
        ));
        assert!(matches!(
            endpoint_qos(&reader, &[]).durability,
            Durability::TransientLocal
        ));
    }

    #[test]
    fn test_history_and_reliability_mapping() {
        let (writer, _) = profiles(
            OptionsBuilder::new()
                .role(Role::Publish)
                .reliability(ReliabilityKind::BestEffort)
                .history_depth(3),
        );
        let qos = endpoint_qos(&writer, &[]);
        assert!(matches!(qos.reliability, Reliability::BestEffort));
        assert!(matches!(qos.history, History::KeepLast(3)));
    }

    #[test]
    fn test_ownership_and_partition_mapping() {
        let (writer, _) = profiles(
            OptionsBuilder::new()
                .role(Role::Publish)
                .ownership_strength(7),
        );
        let qos = endpoint_qos(&writer, &["shapes".to_string()]);
        assert!(matches!(
            qos.ownership.kind,
            ::hdds::dds::OwnershipKind::Exclusive
        ));
        assert_eq!(qos.ownership_strength.value, 7);
        assert!(qos.partition.names.iter().any(|p| p == "shapes"));
    }

    #[test]
    fn test_shape_type_is_keyed_on_color() {
        assert!(ShapeType::has_key());
        let red = ShapeType::from(&ShapeSample::new("RED", 1, 2, 20));
        let moved = ShapeType::from(&ShapeSample::new("RED", 90, 80, 30));
        let blue = ShapeType::from(&ShapeSample::new("BLUE", 1, 2, 20));

        assert_eq!(red.compute_key(), moved.compute_key());
        assert_ne!(red.compute_key(), blue.compute_key());
        assert_eq!(red.instance_handle(), moved.instance_handle());
        assert!(!red.instance_handle().is_nil());
    }

    #[test]
    fn test_fields_feed_the_content_filter() {
        let shape = ShapeType::from(&ShapeSample::new("GREEN", 3, 4, 25));
        let fields = shape.get_fields();
        assert_eq!(fields.get("color"), Some(&FieldValue::from_string("GREEN".to_string())));
        assert_eq!(fields.get("shapesize"), Some(&FieldValue::from_i32(25)));
    }

    #[test]
    fn test_cdr_encoding_layout() {
        let shape = ShapeType::from(&ShapeSample::new("RED", 7, -1, 30));
        let mut buf = [0u8; 64];
        let len = shape.encode_cdr2(&mut buf).expect("encode");
        // 4 length + "RED\0" + x + y + shapesize
        assert_eq!(len, 20);
        assert_eq!(&buf[..8], &[4, 0, 0, 0, b'R', b'E', b'D', 0]);
        assert_eq!(ShapeType::decode_cdr2(&buf[..len]).expect("decode"), shape);

        let padded = ShapeType::from(&ShapeSample::new("BLUE", 1, 2, 3));
        let len = padded.encode_cdr2(&mut buf).expect("encode");
        assert_eq!(len, 24);
        assert_eq!(ShapeType::decode_cdr2(&buf[..len]).expect("decode"), padded);
        assert!(ShapeType::decode_cdr2(&buf[..10]).is_err());
    }

    #[test]
    fn test_type_object_marks_color_as_key() {
        let Some(CompleteTypeObject::Struct(shape)) = ShapeType::get_type_object() else {
            panic!("expected a struct type object");
        };
        assert_eq!(shape.member_seq.len(), 4);
        assert!(shape.member_seq[0]
            .common
            .member_flags
            .contains(MemberFlag::IS_KEY));
        assert!(!shape.member_seq[1]
            .common
            .member_flags
            .contains(MemberFlag::IS_KEY));
    }

    #[test]
    fn test_pending_instances_keep_last_per_color() {
        let mut pending = PendingInstances::new(Some(HistoryPolicy::KeepLast(2)));
        for x in 0..5 {
            pending.stage(ShapeType::from(&ShapeSample::new("RED", x, 0, 20)));
        }
        pending.stage(ShapeType::from(&ShapeSample::new("BLUE", 9, 9, 20)));
        assert_eq!(pending.len(), 3);

        let red = ShapeType::from(&ShapeSample::key_only("RED")).instance_handle();
        let mut seen = Vec::new();
        let mut previous = InstanceHandle::NIL;
        while let Some((handle, samples)) = pending.next_after(previous) {
            if handle == red {
                let xs: Vec<i32> = samples.iter().map(|s| s.x).collect();
                assert_eq!(xs, vec![3, 4]);
            }
            seen.push(handle);
            previous = handle;
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_pending_instances_default_history_keeps_one() {
        let mut pending = PendingInstances::new(None);
        pending.stage(ShapeType::from(&ShapeSample::new("RED", 1, 1, 20)));
        pending.stage(ShapeType::from(&ShapeSample::new("RED", 2, 2, 20)));
        let (_, samples) = pending.next_after(InstanceHandle::NIL).expect("red");
        assert_eq!(samples, vec![ShapeSample::new("RED", 2, 2, 20)]);

        let mut all = PendingInstances::new(Some(HistoryPolicy::KeepAll));
        for x in 0..10 {
            all.stage(ShapeType::from(&ShapeSample::new("RED", x, 0, 20)));
        }
        assert_eq!(all.len(), 10);
    }
}
