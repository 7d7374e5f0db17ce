//! Growable circular FIFO of decoded events.
//!
//! The queue is written in bursts by the element classifier while the decoder
//! runs, and drained later by the consumer. A push never fails for lack of
//! room: a full store doubles before the new element is written. Only a failed
//! allocation (or an explicit growth limit) makes a push fail, and in that case
//! the queue keeps its previous contents and layout.
//!
//! One slot is always left empty so that `head == tail` unambiguously means
//! "empty".

use crate::event::Event;

/// Initial slot count used by decode sessions.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Smallest backing store the queue will allocate.
pub const MIN_QUEUE_CAPACITY: usize = 2;

/// Reasons a queue allocation or growth step can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum QueueError {
    /// The allocator could not provide the requested backing store.
    #[error("event buffer allocation failed for {requested} slots")]
    AllocationFailed {
        /// Slot count that was requested.
        requested: usize,
    },
    /// Growing would exceed the configured capacity limit.
    #[error("event buffer limit of {limit} slots reached")]
    LimitReached {
        /// Configured maximum slot count.
        limit: usize,
    },
}

/// Circular event buffer with doubling growth.
#[derive(Debug, Clone)]
pub struct EventQueue {
    slots: Vec<Option<Event>>,
    /// Next slot to write.
    head: usize,
    /// Next slot to read.
    tail: usize,
    limit: usize,
}

impl EventQueue {
    /// Allocates a queue with at least `capacity` slots and no growth limit.
    ///
    /// The capacity is rounded up to a power of two, and to at least
    /// [`MIN_QUEUE_CAPACITY`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AllocationFailed`] when the initial store cannot
    /// be allocated.
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        Self::with_limit(capacity, usize::MAX)
    }

    /// Allocates a queue that refuses to grow past `limit` slots.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LimitReached`] when the rounded initial capacity
    /// already exceeds `limit`, or [`QueueError::AllocationFailed`] when the
    /// store cannot be allocated.
    pub fn with_limit(capacity: usize, limit: usize) -> Result<Self, QueueError> {
        let requested = capacity
            .max(MIN_QUEUE_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(QueueError::AllocationFailed {
                requested: capacity,
            })?;
        if requested > limit {
            return Err(QueueError::LimitReached { limit });
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(requested)
            .map_err(|_| QueueError::AllocationFailed { requested })?;
        slots.resize(requested, None);

        Ok(Self {
            slots,
            head: 0,
            tail: 0,
            limit,
        })
    }

    /// Number of slots in the backing store.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Maximum slot count growth may reach.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.head + self.capacity() - self.tail) % self.capacity()
    }

    /// Returns `true` when no events are queued.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Appends an event at the logical end, growing the store when full.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] when the store is full and cannot grow. The
    /// queue is unchanged in that case.
    pub fn push(&mut self, event: Event) -> Result<(), QueueError> {
        let mut next_head = (self.head + 1) % self.capacity();
        if next_head == self.tail {
            self.grow()?;
            next_head = (self.head + 1) % self.capacity();
        }

        self.slots[self.head] = Some(event);
        self.head = next_head;
        Ok(())
    }

    /// Removes and returns the logical front, or `None` when empty.
    pub fn pop(&mut self) -> Option<Event> {
        if self.is_empty() {
            return None;
        }

        let event = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % self.capacity();
        event
    }

    /// Pops every queued event in FIFO order.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { queue: self }
    }

    /// Discards every queued event and returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.tail = 0;
        dropped
    }

    /// Doubles the store and re-linearizes a wrapped live region.
    ///
    /// The wrapped segment `[tail, old_capacity)` moves to the end of the grown
    /// store so that the live region reads `[new_tail, new_capacity)` followed
    /// by `[0, head)`.
    fn grow(&mut self) -> Result<(), QueueError> {
        let old_capacity = self.capacity();
        let new_capacity = old_capacity
            .checked_mul(2)
            .ok_or(QueueError::AllocationFailed {
                requested: usize::MAX,
            })?;
        if new_capacity > self.limit {
            return Err(QueueError::LimitReached { limit: self.limit });
        }

        self.slots
            .try_reserve_exact(new_capacity - old_capacity)
            .map_err(|_| QueueError::AllocationFailed {
                requested: new_capacity,
            })?;
        self.slots.resize(new_capacity, None);

        if self.head < self.tail {
            let wrapped = old_capacity - self.tail;
            let (low, high) = self.slots.split_at_mut(old_capacity);
            // new_tail - old_capacity == tail, so the destination starts at high[tail].
            low[self.tail..].swap_with_slice(&mut high[self.tail..]);
            self.tail = new_capacity - wrapped;
        }

        log::debug!(
            "event queue grew from {old_capacity} to {new_capacity} slots ({} queued)",
            self.len()
        );
        Ok(())
    }
}

/// Draining iterator returned by [`EventQueue::drain`].
#[derive(Debug)]
pub struct Drain<'a> {
    queue: &'a mut EventQueue,
}

impl Iterator for Drain<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.pop()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.queue.len();
        (len, Some(len))
    }
}

impl ExactSizeIterator for Drain<'_> {}

#[cfg(test)]
mod tests {
    use super::{EventQueue, QueueError, DEFAULT_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};
    use crate::event::{Event, EventKind};
    use proptest::prelude::*;

    fn range(n: u64) -> Event {
        Event::new(
            EventKind::InstructionRange {
                from: n * 4,
                to: n * 4 + 4,
            },
            n,
            0,
        )
    }

    #[test]
    fn empty_queue_pops_nothing() {
        let mut queue = EventQueue::with_capacity(4).expect("allocate queue");
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn capacity_is_rounded_to_power_of_two() {
        assert_eq!(
            EventQueue::with_capacity(0).expect("allocate").capacity(),
            MIN_QUEUE_CAPACITY
        );
        assert_eq!(EventQueue::with_capacity(5).expect("allocate").capacity(), 8);
        assert_eq!(
            EventQueue::with_capacity(DEFAULT_QUEUE_CAPACITY)
                .expect("allocate")
                .capacity(),
            256
        );
    }

    #[test]
    fn fills_to_capacity_minus_one_before_growing() {
        let mut queue = EventQueue::with_capacity(4).expect("allocate queue");
        for n in 0..3 {
            queue.push(range(n)).expect("push");
        }
        assert_eq!(queue.capacity(), 4);
        assert_eq!(queue.len(), 3);

        queue.push(range(3)).expect("push");
        assert_eq!(queue.capacity(), 8);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn growth_relocates_wrapped_segment_to_new_end() {
        let mut queue = EventQueue::with_capacity(4).expect("allocate queue");
        for n in 0..3 {
            queue.push(range(n)).expect("push");
        }
        assert_eq!(queue.pop(), Some(range(0)));
        assert_eq!(queue.pop(), Some(range(1)));
        // head wraps to 1, tail sits at 2.
        queue.push(range(3)).expect("push");
        queue.push(range(4)).expect("push");
        assert_eq!((queue.head, queue.tail), (1, 2));

        queue.push(range(5)).expect("push");
        assert_eq!(queue.capacity(), 8);
        assert_eq!(queue.tail, 6);
        assert_eq!(queue.head, 2);

        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(drained, vec![range(2), range(3), range(4), range(5)]);
    }

    #[test]
    fn burst_across_many_growths_preserves_order() {
        let mut queue = EventQueue::with_capacity(4).expect("allocate queue");
        for n in 0..1000 {
            queue.push(range(n)).expect("push");
        }
        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.capacity(), 1024);

        for n in 0..1000 {
            assert_eq!(queue.pop(), Some(range(n)));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn failed_growth_leaves_contents_untouched() {
        let mut queue = EventQueue::with_limit(4, 4).expect("allocate queue");
        queue.push(range(0)).expect("push");
        queue.push(range(1)).expect("push");
        assert_eq!(queue.pop(), Some(range(0)));
        queue.push(range(2)).expect("push");
        queue.push(range(3)).expect("push");

        assert_eq!(
            queue.push(range(4)),
            Err(QueueError::LimitReached { limit: 4 })
        );
        assert_eq!(queue.capacity(), 4);
        assert_eq!(queue.len(), 3);

        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(drained, vec![range(1), range(2), range(3)]);

        queue.push(range(5)).expect("queue stays usable after failed growth");
        assert_eq!(queue.pop(), Some(range(5)));
    }

    #[test]
    fn initial_capacity_above_limit_is_rejected() {
        assert_eq!(
            EventQueue::with_limit(16, 8).err(),
            Some(QueueError::LimitReached { limit: 8 })
        );
    }

    #[test]
    fn clear_discards_and_resets() {
        let mut queue = EventQueue::with_capacity(2).expect("allocate queue");
        for n in 0..5 {
            queue.push(range(n)).expect("push");
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push,
        Pop,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![3 => Just(Op::Push), 2 => Just(Op::Pop)]
    }

    proptest! {
        #[test]
        fn property_interleaved_push_pop_is_fifo(
            initial in 0_usize..=16,
            ops in prop::collection::vec(op_strategy(), 0..600)
        ) {
            let mut queue = EventQueue::with_capacity(initial).expect("allocate queue");
            let mut model = std::collections::VecDeque::new();
            let mut next = 0_u64;

            for op in ops {
                match op {
                    Op::Push => {
                        queue.push(range(next)).expect("push");
                        model.push_back(range(next));
                        next += 1;
                    }
                    Op::Pop => prop_assert_eq!(queue.pop(), model.pop_front()),
                }
                prop_assert_eq!(queue.len(), model.len());
                prop_assert!(queue.len() < queue.capacity());
            }

            let rest: Vec<_> = queue.drain().collect();
            prop_assert_eq!(rest, Vec::from(model));
        }

        #[test]
        fn property_growth_from_any_rotation_preserves_order(
            rotation in 0_usize..8,
            burst in 1_usize..200
        ) {
            let mut queue = EventQueue::with_capacity(8).expect("allocate queue");
            for n in 0..rotation {
                queue.push(range(n as u64)).expect("push");
                queue.pop();
            }

            for n in 0..burst {
                queue.push(range(n as u64)).expect("push");
            }
            for n in 0..burst {
                prop_assert_eq!(queue.pop(), Some(range(n as u64)));
            }
            prop_assert!(queue.is_empty());
        }
    }
}
