//! Producer → drain handoff of buffer-swap notifications.
//!
//! Calling a user-supplied handler straight out of the sampling context
//! couples the producer's timing to arbitrary consumer code; here the
//! handoff is a bounded `crossbeam-channel` behind a fixed-signature pair,
//! so the producer context never calls into consumer code and never
//! blocks. `notify` is a `try_send`: wait-free, allocation-free, and a full
//! queue comes back as an explicit [`NotifyOutcome::Overflowed`] for the
//! caller to count rather than a silent drop.
//!
//! ## State machine
//!
//! ```text
//! Idle ──notify──► Pending ──recv──► Draining ──finished──► Idle
//!                     ▲                  │   (queue non-empty → Pending)
//!                     └──────────────────┘
//! shutdown() ──► Stopped (further notifies suppressed)
//! ```
//!
//! Exactly-once, FIFO in swap order: the channel preserves insertion order
//! and the single drain thread consumes one request at a time, so a second
//! notification is never processed before the first has finished.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::buffer::DrainRequest;

/// Smallest queue depth that keeps the no-silent-drop contract.
///
/// A single-slot queue is only safe when draining is provably faster than
/// one buffer-fill period; depth 2 lets one request wait while another is in
/// flight.
pub const MIN_QUEUE_DEPTH: usize = 2;

const STATE_IDLE: u8 = 0;
const STATE_PENDING: u8 = 1;
const STATE_DRAINING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Observable scheduler state, mirroring the notify/drain handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// No swap waiting, no drain in flight.
    Idle,
    /// At least one request queued, consumer not yet on it.
    Pending,
    /// Consumer is processing a request.
    Draining,
    /// Capture stopped; notifications are suppressed.
    Stopped,
}

fn state_from_u8(value: u8) -> DrainState {
    match value {
        STATE_IDLE => DrainState::Idle,
        STATE_PENDING => DrainState::Pending,
        STATE_DRAINING => DrainState::Draining,
        _ => DrainState::Stopped,
    }
}

/// Result of a producer-side [`DrainScheduler::notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Request queued for the drain thread.
    Queued,
    /// Queue full: the buffer will be refilled before this request could be
    /// drained. Callers count this as a drain overrun.
    Overflowed,
    /// Scheduler stopped or receiver gone; the request went nowhere.
    Suppressed,
}

struct SchedulerShared {
    state: AtomicU8,
}

/// Create a scheduler/receiver pair over a bounded queue.
///
/// `depth` below [`MIN_QUEUE_DEPTH`] is raised to it; `CaptureConfig`
/// validation rejects such configurations before they reach a recorder, so
/// the clamp only guards direct library use.
pub fn drain_pair(depth: usize) -> (DrainScheduler, DrainReceiver) {
    let (tx, rx) = bounded(depth.max(MIN_QUEUE_DEPTH));
    let shared = Arc::new(SchedulerShared {
        state: AtomicU8::new(STATE_IDLE),
    });

    (
        DrainScheduler {
            tx,
            shared: Arc::clone(&shared),
        },
        DrainReceiver { rx, shared },
    )
}

/// Producer half. Lives on the time-critical path: `notify` never blocks,
/// allocates, or takes a lock the producer could contend on.
pub struct DrainScheduler {
    tx: Sender<DrainRequest>,
    shared: Arc<SchedulerShared>,
}

impl DrainScheduler {
    /// Queue a swap notification for the drain thread.
    ///
    /// Called from the producer context only, once per swap.
    pub fn notify(&self, req: DrainRequest) -> NotifyOutcome {
        if self.shared.state.load(Ordering::Acquire) == STATE_STOPPED {
            return NotifyOutcome::Suppressed;
        }

        match self.tx.try_send(req) {
            Ok(()) => {
                // Only lift Idle → Pending; a consumer mid-drain keeps its
                // Draining state and discovers the queued request on
                // `finished()`.
                let _ = self.shared.state.compare_exchange(
                    STATE_IDLE,
                    STATE_PENDING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                NotifyOutcome::Queued
            }
            Err(TrySendError::Full(_)) => NotifyOutcome::Overflowed,
            Err(TrySendError::Disconnected(_)) => NotifyOutcome::Suppressed,
        }
    }

    /// Enter the stopped state: every later `notify` is suppressed.
    ///
    /// Requests already queued stay queued; dropping the scheduler then
    /// disconnects the channel, and the receiver drains what is left before
    /// observing the end of the stream.
    pub fn shutdown(&self) {
        self.shared.state.store(STATE_STOPPED, Ordering::Release);
    }

    /// Current state snapshot.
    pub fn state(&self) -> DrainState {
        state_from_u8(self.shared.state.load(Ordering::Acquire))
    }
}

/// Drain-thread half. A single thread owns this, which is what serialises
/// request processing (no re-entrancy).
pub struct DrainReceiver {
    rx: Receiver<DrainRequest>,
    shared: Arc<SchedulerShared>,
}

impl DrainReceiver {
    /// Block until the next request, or `None` once the scheduler is gone
    /// and the queue has been fully drained.
    pub fn recv(&self) -> Option<DrainRequest> {
        match self.rx.recv() {
            Ok(req) => {
                if self.shared.state.load(Ordering::Acquire) != STATE_STOPPED {
                    self.shared.state.store(STATE_DRAINING, Ordering::Release);
                }
                Some(req)
            }
            Err(_) => None,
        }
    }

    /// Mark the current request done: back to `Idle`, or `Pending` when
    /// another swap queued while this one was draining.
    pub fn finished(&self) {
        let next = if self.rx.is_empty() {
            STATE_IDLE
        } else {
            STATE_PENDING
        };
        let _ = self.shared.state.compare_exchange(
            STATE_DRAINING,
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Current state snapshot.
    pub fn state(&self) -> DrainState {
        state_from_u8(self.shared.state.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(buffer: usize, generation: u64) -> DrainRequest {
        DrainRequest {
            buffer,
            generation,
            len: 4,
        }
    }

    #[test]
    fn requests_arrive_in_notify_order() {
        let (scheduler, receiver) = drain_pair(8);

        // Five rapid swaps queued before the consumer runs at all.
        let expected = [(0, 1), (1, 1), (0, 2), (1, 2), (0, 3)];
        for &(buffer, generation) in &expected {
            assert_eq!(
                scheduler.notify(request(buffer, generation)),
                NotifyOutcome::Queued
            );
        }

        for &(buffer, generation) in &expected {
            let req = receiver.recv().expect("queued request");
            assert_eq!((req.buffer, req.generation), (buffer, generation));
            receiver.finished();
        }
    }

    #[test]
    fn full_queue_reports_overflow() {
        let (scheduler, _receiver) = drain_pair(2);

        assert_eq!(scheduler.notify(request(0, 1)), NotifyOutcome::Queued);
        assert_eq!(scheduler.notify(request(1, 1)), NotifyOutcome::Queued);
        assert_eq!(scheduler.notify(request(0, 2)), NotifyOutcome::Overflowed);
    }

    #[test]
    fn shutdown_suppresses_later_notifies() {
        let (scheduler, receiver) = drain_pair(4);

        assert_eq!(scheduler.notify(request(0, 1)), NotifyOutcome::Queued);
        scheduler.shutdown();
        assert_eq!(scheduler.notify(request(1, 1)), NotifyOutcome::Suppressed);
        assert_eq!(scheduler.state(), DrainState::Stopped);

        // The request queued before shutdown still completes.
        assert_eq!(receiver.recv().map(|r| r.buffer), Some(0));
    }

    #[test]
    fn receiver_drains_queue_after_scheduler_drop() {
        let (scheduler, receiver) = drain_pair(4);

        for generation in 1..=3 {
            scheduler.notify(request(0, generation));
        }
        drop(scheduler);

        assert_eq!(receiver.recv().map(|r| r.generation), Some(1));
        assert_eq!(receiver.recv().map(|r| r.generation), Some(2));
        assert_eq!(receiver.recv().map(|r| r.generation), Some(3));
        assert_eq!(receiver.recv(), None);
    }

    #[test]
    fn notify_after_receiver_drop_is_suppressed() {
        let (scheduler, receiver) = drain_pair(4);
        drop(receiver);
        assert_eq!(scheduler.notify(request(0, 1)), NotifyOutcome::Suppressed);
    }

    #[test]
    fn state_walks_idle_pending_draining_idle() {
        let (scheduler, receiver) = drain_pair(4);
        assert_eq!(scheduler.state(), DrainState::Idle);

        scheduler.notify(request(0, 1));
        assert_eq!(scheduler.state(), DrainState::Pending);

        receiver.recv().expect("queued request");
        assert_eq!(scheduler.state(), DrainState::Draining);

        receiver.finished();
        assert_eq!(scheduler.state(), DrainState::Idle);
    }

    #[test]
    fn finished_with_backlog_goes_pending() {
        let (scheduler, receiver) = drain_pair(4);

        scheduler.notify(request(0, 1));
        receiver.recv().expect("first request");
        // Second swap lands while the first is still draining.
        scheduler.notify(request(1, 1));
        assert_eq!(receiver.state(), DrainState::Draining);

        receiver.finished();
        assert_eq!(receiver.state(), DrainState::Pending);
    }

    #[test]
    fn sub_minimum_depth_is_raised() {
        let (scheduler, _receiver) = drain_pair(0);
        assert_eq!(scheduler.notify(request(0, 1)), NotifyOutcome::Queued);
        assert_eq!(scheduler.notify(request(1, 1)), NotifyOutcome::Queued);
        assert_eq!(scheduler.notify(request(0, 2)), NotifyOutcome::Overflowed);
    }
}
