use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tcpchain_abstract::{EventHandle, SimTime};

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    generation: u32,
    live: bool,
}

#[derive(Debug)]
struct Entry<T> {
    time: SimTime,
    seq: u64, // scheduling order, breaks ties at equal time
    handle: EventHandle,
    payload: T,
}

// Custom Ord for Min-Heap (smallest time pops first)
impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered event queue whose handles index a slot table.
///
/// Cancelling frees the slot and bumps its generation; the heap entry stays
/// behind and is discarded when it reaches the front.
#[derive(Debug)]
pub struct EventQueue<T> {
    now: SimTime,
    heap: BinaryHeap<Entry<T>>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_seq: u64,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            heap: BinaryHeap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `payload` at absolute time `at`. Times in the past run at `now`.
    pub fn push(&mut self, at: SimTime, payload: T) -> EventHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.live = true;
        let handle = EventHandle::new(index, slot.generation);

        self.heap.push(Entry {
            time: at.max(self.now),
            seq: self.next_seq,
            handle,
            payload,
        });
        self.next_seq += 1;
        handle
    }

    pub fn push_after(&mut self, delay: SimTime, payload: T) -> EventHandle {
        self.push(self.now + delay, payload)
    }

    /// Returns whether the event was still pending.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        if !self.is_pending(handle) {
            return false;
        }
        self.release(handle.index());
        true
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.slots
            .get(handle.index() as usize)
            .is_some_and(|slot| slot.live && slot.generation == handle.generation())
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.is_pending(entry.handle) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Time of the next live event.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.heap.peek().map(|e| e.time)
    }

    /// Pop the next live event and advance the clock to it.
    pub fn pop(&mut self) -> Option<(SimTime, EventHandle, T)> {
        self.discard_cancelled();
        let entry = self.heap.pop()?;
        self.release(entry.handle.index());
        self.now = entry.time;
        Some((entry.time, entry.handle, entry.payload))
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the clock forward without dispatching anything.
    pub fn advance_to(&mut self, time: SimTime) {
        self.now = self.now.max(time);
    }
}
