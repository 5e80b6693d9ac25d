// src/frame_buffer.rs
//
// Hand-off primitives between frame acquisition and detection.
//
//   LatestFrameSlot: single shared slot, newest frame always wins. There is
//                    no queue; an unread frame is overwritten and counted.
//   InferenceGate:   skip-if-busy flag. A frame arriving while a detection
//                    is in flight is dropped instead of queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A frame tagged with its acquisition sequence number.
#[derive(Debug, Clone)]
pub struct SlotFrame<T> {
    pub frame_id: u64,
    pub frame: T,
}

pub struct LatestFrameSlot<T> {
    slot: Mutex<Option<SlotFrame<T>>>,
    next_id: AtomicU64,
    overwritten: AtomicU64,
}

impl<T> Default for LatestFrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrameSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<SlotFrame<T>>> {
        // A panicking holder cannot leave the Option half-written.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `frame`, replacing any unread one. Returns the frame id.
    pub fn publish(&self, frame: T) -> u64 {
        let frame_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock().replace(SlotFrame { frame_id, frame });
        if let Some(old) = previous {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            debug!("🗑️ Frame {} overwritten by {}", old.frame_id, frame_id);
        }
        frame_id
    }

    /// Take the newest unread frame, leaving the slot empty.
    pub fn take(&self) -> Option<SlotFrame<T>> {
        self.lock().take()
    }

    pub fn has_frame(&self) -> bool {
        self.lock().is_some()
    }

    /// Frames published so far.
    pub fn published(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Frames replaced before anyone read them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Skip-if-busy gate around a single in-flight detection.
#[derive(Debug, Default)]
pub struct InferenceGate {
    busy: AtomicBool,
    skipped: AtomicU64,
}

/// Held while a detection runs; releases the gate on drop.
#[derive(Debug)]
pub struct InferencePermit<'a> {
    gate: &'a InferenceGate,
}

impl Drop for InferencePermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

impl InferenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when a detection is already running; the caller drops its
    /// frame.
    pub fn try_acquire(&self) -> Option<InferencePermit<'_>> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Some(InferencePermit { gate: self }),
            Err(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}
