// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample, instance and loan types exchanged with a transport.

use std::fmt;

/// The shape record published on every topic. Instance key: `color`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeSample {
    pub color: String,
    pub x: i32,
    pub y: i32,
    pub shapesize: i32,
}

impl ShapeSample {
    pub fn new(color: impl Into<String>, x: i32, y: i32, shapesize: i32) -> Self {
        Self {
            color: color.into(),
            x,
            y,
            shapesize,
        }
    }

    /// Key-only sample carried by dispose/unregister notifications.
    pub fn key_only(color: impl Into<String>) -> Self {
        Self::new(color, 0, 0, 0)
    }
}

/// Transport-assigned instance identity. [`InstanceHandle::NIL`] sorts before
/// every real handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    pub const NIL: InstanceHandle = InstanceHandle(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Lifecycle state of an instance at the time a sample was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

/// Per-sample metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub instance_handle: InstanceHandle,
    /// False for pure lifecycle notifications (dispose, unregister).
    pub valid_data: bool,
    pub instance_state: InstanceState,
}

impl SampleInfo {
    pub fn data(instance_handle: InstanceHandle) -> Self {
        Self {
            instance_handle,
            valid_data: true,
            instance_state: InstanceState::Alive,
        }
    }

    pub fn lifecycle(instance_handle: InstanceHandle, state: InstanceState) -> Self {
        Self {
            instance_handle,
            valid_data: false,
            instance_state: state,
        }
    }
}

/// Buffer of samples for one instance, lent by the transport until returned.
#[derive(Debug, PartialEq)]
pub struct SampleLoan {
    id: u64,
    instance: InstanceHandle,
    samples: Vec<ShapeSample>,
    infos: Vec<SampleInfo>,
}

impl SampleLoan {
    /// Backends build loans; `samples` and `infos` are index-aligned.
    pub fn new(
        id: u64,
        instance: InstanceHandle,
        samples: Vec<ShapeSample>,
        infos: Vec<SampleInfo>,
    ) -> Self {
        debug_assert_eq!(samples.len(), infos.len());
        Self {
            id,
            instance,
            samples,
            infos,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Handle of the instance this loan belongs to; the cursor for the next
    /// instance-ordered take.
    pub fn instance(&self) -> InstanceHandle {
        self.instance
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ShapeSample, &SampleInfo)> {
        self.samples.iter().zip(self.infos.iter())
    }
}

/// Result of an instance-ordered take.
#[derive(Debug, PartialEq)]
pub enum TakeOutcome {
    Taken(SampleLoan),
    /// No instance after the given handle has pending samples.
    NoMoreData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_handle_sorts_first() {
        assert!(InstanceHandle::NIL < InstanceHandle::new(1));
        assert!(InstanceHandle::NIL.is_nil());
        assert!(!InstanceHandle::new(7).is_nil());
    }

    #[test]
    fn test_loan_pairs_samples_with_infos() {
        let handle = InstanceHandle::new(3);
        let loan = SampleLoan::new(
            1,
            handle,
            vec![
                ShapeSample::new("RED", 10, 20, 30),
                ShapeSample::key_only("RED"),
            ],
            vec![
                SampleInfo::data(handle),
                SampleInfo::lifecycle(handle, InstanceState::NotAliveDisposed),
            ],
        );

        assert_eq!(loan.len(), 2);
        let valid: Vec<_> = loan
            .iter()
            .filter(|(_, info)| info.valid_data)
            .map(|(sample, _)| sample)
            .collect();
        assert_eq!(valid, vec![&ShapeSample::new("RED", 10, 20, 30)]);
    }
}
