use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

// Ordering: jobs only ever add; readers run after the stage join, which
// already synchronizes, so Relaxed is enough everywhere.

#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicUsize);

impl AtomicCounter {
    pub const fn new(value: usize) -> Self {
        Self(AtomicUsize::new(value))
    }

    /// Returns the value before the increment.
    #[inline]
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn add(&self, n: usize) -> usize {
        self.0.fetch_add(n, Ordering::Relaxed)
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(0);
    }
}

/// The four counters shared by the particle jobs. They are independent of
/// each other; only the two `just_*` ones have concurrent writers.
#[derive(Debug, Default)]
pub struct FrameCounters {
    counters: [AtomicCounter; 4],
}

impl FrameCounters {
    pub const ALIVE: usize = 0;
    pub const GPU_VISIBLE: usize = 1;
    pub const JUST_LANDED: usize = 2;
    pub const JUST_DEAD: usize = 3;

    pub fn alive(&self) -> &AtomicCounter {
        &self.counters[Self::ALIVE]
    }

    pub fn gpu_visible(&self) -> &AtomicCounter {
        &self.counters[Self::GPU_VISIBLE]
    }

    pub fn just_landed(&self) -> &AtomicCounter {
        &self.counters[Self::JUST_LANDED]
    }

    pub fn just_dead(&self) -> &AtomicCounter {
        &self.counters[Self::JUST_DEAD]
    }

    /// Once per frame, before physics.
    pub fn reset_frame(&self) {
        self.just_landed().reset();
        self.just_dead().reset();
    }
}

/// Fixed-capacity append list filled concurrently through an external counter.
/// The counter keeps counting past the capacity; the overflow is dropped.
#[derive(Debug)]
pub struct CappedList {
    slots: Box<[AtomicU32]>,
}

impl CappedList {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns false when the entry was dropped for lack of room.
    #[inline]
    pub fn push(&self, counter: &AtomicCounter, value: u32) -> bool {
        let index = counter.increment();
        match self.slots.get(index) {
            Some(slot) => {
                slot.store(value, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Entries written so far, given the counter's final value.
    pub fn entries(&self, count: usize) -> impl Iterator<Item = u32> + '_ {
        self.slots[..count.min(self.slots.len())]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
    }
}
