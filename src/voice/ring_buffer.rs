//! Fixed-capacity sliding window of classified frames

use crate::{Error, Result};

/// Sliding window of `(item, is_speech)` pairs
///
/// Slots are allocated once; a single write cursor advances modulo the
/// capacity and overwrites the oldest entry when full.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<(T, bool)>>,
    /// Index the next push writes to
    cursor: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create a ring buffer holding at most `capacity` entries
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is zero
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "ring buffer capacity must be at least 1 frame".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Ok(Self {
            slots,
            cursor: 0,
            len: 0,
        })
    }

    /// Push an entry, evicting and returning the oldest one when full
    pub fn push(&mut self, item: T, is_speech: bool) -> Option<(T, bool)> {
        let evicted = self.slots[self.cursor].replace((item, is_speech));
        self.cursor = (self.cursor + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        evicted
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current number of entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no entries
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of entries tagged as speech
    #[must_use]
    pub fn voiced(&self) -> usize {
        self.iter().filter(|(_, speech)| *speech).count()
    }

    /// Number of entries tagged as non-speech
    #[must_use]
    pub fn unvoiced(&self) -> usize {
        self.len - self.voiced()
    }

    /// Iterate entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = (&T, bool)> {
        let start = self.oldest();
        (0..self.len).filter_map(move |offset| {
            self.slots[(start + offset) % self.capacity()]
                .as_ref()
                .map(|(item, speech)| (item, *speech))
        })
    }

    /// Remove all entries, returning them from oldest to newest
    pub fn drain(&mut self) -> Vec<T> {
        let start = self.oldest();
        let capacity = self.capacity();
        let mut out = Vec::with_capacity(self.len);
        for offset in 0..self.len {
            if let Some((item, _)) = self.slots[(start + offset) % capacity].take() {
                out.push(item);
            }
        }
        self.cursor = 0;
        self.len = 0;
        out
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.cursor = 0;
        self.len = 0;
    }

    fn oldest(&self) -> usize {
        (self.cursor + self.capacity() - self.len) % self.capacity()
    }
}
