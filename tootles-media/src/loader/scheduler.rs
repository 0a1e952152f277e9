use std::{cmp::Reverse, collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use priority_queue::PriorityQueue;
use tokio::sync::oneshot;
use tootles_model::Priority;

/// Queue rank: heavier priority first, then first come first served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    weight: u8,
    arrival: Reverse<u64>,
}

#[derive(Debug)]
struct Waiting {
    priority: Priority,
    arrival: u64,
    /// Carries the class the slot was started under.
    wake: oneshot::Sender<Priority>,
}

#[derive(Debug, Default)]
struct GateState {
    running: usize,
    running_preload: usize,
    queue: PriorityQueue<u64, Rank>,
    waiting: HashMap<u64, Waiting>,
    next_arrival: u64,
}

#[derive(Debug)]
struct GateInner {
    state: Mutex<GateState>,
    capacity: usize,
    preload_capacity: usize,
}

impl GateInner {
    fn can_start(&self, state: &GateState, priority: Priority) -> bool {
        match priority {
            Priority::Foreground => state.running < self.capacity,
            Priority::Preload => {
                state.running < self.capacity
                    && state.running_preload < self.preload_capacity
            }
        }
    }

    fn start(state: &mut GateState, priority: Priority) {
        state.running += 1;
        if priority == Priority::Preload {
            state.running_preload += 1;
        }
    }

    fn stop(state: &mut GateState, priority: Priority) {
        state.running = state.running.saturating_sub(1);
        if priority == Priority::Preload {
            state.running_preload = state.running_preload.saturating_sub(1);
        }
    }

    fn dispatch(&self, state: &mut GateState) {
        // Entries below the head never rank higher, so stop at the first one
        // that cannot start.
        while let Some((&ticket, _)) = state.queue.peek() {
            let Some(priority) = state.waiting.get(&ticket).map(|w| w.priority)
            else {
                state.queue.pop();
                continue;
            };
            if !self.can_start(state, priority) {
                break;
            }
            state.queue.pop();
            let Some(waiting) = state.waiting.remove(&ticket) else {
                continue;
            };
            Self::start(state, priority);
            if waiting.wake.send(priority).is_err() {
                Self::stop(state, priority);
            }
        }
    }

    fn release(&self, priority: Priority) {
        let mut state = self.state.lock();
        Self::stop(&mut state, priority);
        self.dispatch(&mut state);
    }
}

/// Download slots handed out by priority.
///
/// Foreground acquirers always leave the queue before preload ones, and the
/// `reserved` slots are never given to preload work, so a foreground fetch
/// does not wait behind a saturated preload batch.
#[derive(Debug, Clone)]
pub(crate) struct PriorityGate {
    inner: Arc<GateInner>,
}

impl PriorityGate {
    pub fn new(capacity: usize, reserved: usize) -> Self {
        let capacity = capacity.max(1);
        let preload_capacity = capacity.saturating_sub(reserved).max(1);
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                capacity,
                preload_capacity,
            }),
        }
    }

    /// Wait for a slot. `ticket` identifies the acquirer for [`Self::promote`]
    /// and must be unique among concurrent acquirers.
    pub async fn acquire(&self, ticket: u64, priority: Priority) -> GatePermit {
        loop {
            let rx = {
                let mut state = self.inner.state.lock();
                if state.queue.is_empty() && self.inner.can_start(&state, priority)
                {
                    GateInner::start(&mut state, priority);
                    return self.permit(priority);
                }
                let (tx, rx) = oneshot::channel();
                let arrival = state.next_arrival;
                state.next_arrival += 1;
                state.queue.push(
                    ticket,
                    Rank {
                        weight: priority.weight(),
                        arrival: Reverse(arrival),
                    },
                );
                state.waiting.insert(
                    ticket,
                    Waiting {
                        priority,
                        arrival,
                        wake: tx,
                    },
                );
                // A slot may have freed up for a higher ranked entry.
                self.inner.dispatch(&mut state);
                rx
            };

            let mut queued = QueuedTicket {
                inner: &self.inner,
                ticket,
                rx: Some(rx),
            };
            if let Some(granted) = queued.wait().await {
                return self.permit(granted);
            }
        }
    }

    /// Raise a queued acquirer to `priority`. Returns false when `ticket` is
    /// not queued (already running or unknown).
    pub fn promote(&self, ticket: u64, priority: Priority) -> bool {
        let mut state = self.inner.state.lock();
        let Some(arrival) = state.waiting.get(&ticket).map(|w| w.arrival) else {
            return false;
        };
        let rank = Rank {
            weight: priority.weight(),
            arrival: Reverse(arrival),
        };
        if state.queue.change_priority(&ticket, rank).is_none() {
            return false;
        }
        if let Some(waiting) = state.waiting.get_mut(&ticket) {
            waiting.priority = priority;
        }
        self.inner.dispatch(&mut state);
        true
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn permit(&self, priority: Priority) -> GatePermit {
        GatePermit {
            inner: Arc::clone(&self.inner),
            priority,
        }
    }
}

/// Withdraws a queued ticket when the acquiring future is dropped, and hands
/// back a slot that was granted but never picked up.
struct QueuedTicket<'a> {
    inner: &'a GateInner,
    ticket: u64,
    rx: Option<oneshot::Receiver<Priority>>,
}

impl QueuedTicket<'_> {
    async fn wait(&mut self) -> Option<Priority> {
        let rx = self.rx.as_mut()?;
        let granted = rx.await.ok();
        self.rx = None;
        granted
    }
}

impl Drop for QueuedTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.queue.remove(&self.ticket).is_some() {
            state.waiting.remove(&self.ticket);
            return;
        }
        if let Some(mut rx) = self.rx.take()
            && let Ok(priority) = rx.try_recv()
        {
            GateInner::stop(&mut state, priority);
            self.inner.dispatch(&mut state);
        }
    }
}

/// A held download slot; released on drop.
#[derive(Debug)]
pub(crate) struct GatePermit {
    inner: Arc<GateInner>,
    priority: Priority,
}

impl GatePermit {
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.inner.release(self.priority);
    }
}

#[cfg(test)]
mod tests {
    use super::PriorityGate;
    use std::time::Duration;
    use tootles_model::Priority;

    #[tokio::test]
    async fn foreground_jumps_queued_preloads() {
        let gate = PriorityGate::new(1, 0);
        let held = gate.acquire(0, Priority::Preload).await;

        let preload = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(1, Priority::Preload).await }
        });
        tokio::task::yield_now().await;
        let foreground = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(2, Priority::Foreground).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gate.queued(), 2);

        drop(held);
        let fg = foreground.await.unwrap();
        assert_eq!(fg.priority(), Priority::Foreground);
        assert!(!preload.is_finished());
        drop(fg);
        assert_eq!(preload.await.unwrap().priority(), Priority::Preload);
    }

    #[tokio::test]
    async fn reserved_slot_is_never_given_to_preload() {
        let gate = PriorityGate::new(2, 1);
        let _p1 = gate.acquire(0, Priority::Preload).await;
        let waiting = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(1, Priority::Preload).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        // The reserved slot is still free for foreground work.
        let fg = tokio::time::timeout(
            Duration::from_secs(1),
            gate.acquire(2, Priority::Foreground),
        )
        .await
        .expect("foreground must not queue behind preload");
        assert_eq!(gate.running(), 2);
        drop(fg);
        waiting.abort();
    }

    #[tokio::test]
    async fn promotion_moves_a_queued_preload_ahead() {
        let gate = PriorityGate::new(1, 0);
        let held = gate.acquire(0, Priority::Foreground).await;
        let first = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(1, Priority::Preload).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(2, Priority::Preload).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(gate.promote(2, Priority::Foreground));
        drop(held);
        let promoted = second.await.unwrap();
        assert_eq!(promoted.priority(), Priority::Foreground);
        assert!(!first.is_finished());
        drop(promoted);
        first.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_waiter_leaves_the_queue() {
        let gate = PriorityGate::new(1, 0);
        let held = gate.acquire(0, Priority::Foreground).await;
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(1, Priority::Preload).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(gate.queued(), 1);
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(gate.queued(), 0);
        drop(held);
        assert_eq!(gate.running(), 0);
    }
}
