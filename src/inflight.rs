//! Single-slot in-flight markers.
//!
//! Each logical operation class (driver lifecycle, sequence mutation) owns one
//! [`OperationSlot`]. A caller must acquire the slot before dispatching its
//! request; while the returned [`SlotPermit`] is alive, further attempts fail
//! with [`ClientError::Busy`](crate::error::ClientError::Busy) instead of racing
//! a second request against the first.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ClientError, Result};

/// Operation classes that are serialized by an [`OperationSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Driver load / unload.
    Lifecycle,
    /// Sequence table add / remove.
    SequenceMutation,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifecycle => write!(f, "driver lifecycle"),
            Self::SequenceMutation => write!(f, "sequence update"),
        }
    }
}

/// A flag marking whether an operation of one class is outstanding.
#[derive(Debug, Clone)]
pub struct OperationSlot {
    class: OperationClass,
    busy: Arc<AtomicBool>,
}

impl OperationSlot {
    /// Create an idle slot for `class`.
    pub fn new(class: OperationClass) -> Self {
        Self {
            class,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the slot, or fail with `Busy` if it is already held.
    pub fn try_acquire(&self) -> Result<SlotPermit> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(class = %self.class, "Rejecting call, operation already in flight");
            return Err(ClientError::Busy(self.class));
        }
        Ok(SlotPermit {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Returns `true` while a permit is outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its slot on drop, including when the owning future is cancelled.
#[derive(Debug)]
pub struct SlotPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_permit_dropped() {
        let slot = OperationSlot::new(OperationClass::SequenceMutation);
        let permit = slot.try_acquire().unwrap();
        assert!(slot.is_busy());

        let err = slot.try_acquire().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Busy(OperationClass::SequenceMutation)
        ));

        drop(permit);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_ok());
    }

    #[test]
    fn clones_share_the_same_flag() {
        let slot = OperationSlot::new(OperationClass::Lifecycle);
        let other = slot.clone();
        let _permit = slot.try_acquire().unwrap();
        assert!(other.try_acquire().is_err());
    }
}
