use std::{
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
};

/// Seconds of the last minute.
pub type MinuteBuffer = RingBuffer<60>;
/// Minutes of the last hour.
pub type HourBuffer = RingBuffer<60>;
/// Hours of the last day.
pub type DayBuffer = RingBuffer<24>;

/// A fixed-size ring of `N` counters. Once `N` values have been inserted,
/// every new value replaces the oldest one.
///
/// The ring keeps a monotonic write counter `w`: the k-th insertion (starting from 0)
/// lands in slot `k % N`, so the most recently written slot is always `(w - 1) % N`.
///
/// For instance, `RingBuffer::<4>` after inserting `1, 2, 3, 4, 5` looks like:
/// ```text
///                -----   -----   -----   -----
///                | 5 |   | 2 |   | 3 |   | 4 |
///                -----   -----   -----   -----
/// slot             0       1       2       3
/// written at     w=4     w=1     w=2     w=3
/// ```
/// and `sum_last(2)` walks backward from slot 0: `5 + 4`.
///
/// Every slot is a single atomic, so a reader sees either the old or the new value of a
/// slot being written, never a mix of both. Only one writer is expected at a time (the roll
/// scheduler); readers are unlimited and never block.
///
/// `N` must be greater than zero; `RingBuffer::<0>::new()` fails to compile.
pub struct RingBuffer<const N: usize> {
    slots: [AtomicU64; N],
    writes: AtomicU64,
}

impl<const N: usize> Debug for RingBuffer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &N)
            .field("writes", &self.writes())
            .field("values", &self.snapshot())
            .finish()
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    const NON_EMPTY: () = assert!(N > 0, "ring buffer capacity must be greater than zero");

    /// Create a new ring with all slots set to zero.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_EMPTY;

        Self {
            slots: core::array::from_fn(|_| AtomicU64::new(0)),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of insertions since creation.
    #[inline]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Number of slots holding real history, i.e. `min(writes, N)`.
    pub fn len(&self) -> usize {
        self.writes().min(N as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.writes() == 0
    }

    /// Insert a value, replacing the oldest one.
    pub fn put(&self, value: u64) {
        let w = self.writes.fetch_add(1, Ordering::AcqRel);
        self.slots[Self::slot(w)].store(value, Ordering::Release);
    }

    /// Sum of all slots. Slots never written count as zero.
    pub fn sum(&self) -> u64 {
        self.slots.iter().map(|s| s.load(Ordering::Acquire)).sum()
    }

    /// Sum of the `n` most recently written slots.
    ///
    /// `n` is clamped to the capacity, so `sum_last(n)` for any `n >= N` equals [`sum`](Self::sum).
    /// `sum_last(0)` is always zero.
    pub fn sum_last(&self, n: usize) -> u64 {
        let head = Self::slot(self.writes());

        (0..n.min(N))
            .map(|i| self.slots[(head + N - 1 - i) % N].load(Ordering::Acquire))
            .sum()
    }

    /// The retained values, oldest first.
    pub fn snapshot(&self) -> Vec<u64> {
        let len = self.len();
        let head = Self::slot(self.writes());

        (0..len)
            .rev()
            .map(|i| self.slots[(head + N - 1 - i) % N].load(Ordering::Acquire))
            .collect()
    }

    #[inline]
    fn slot(w: u64) -> usize {
        (w % N as u64) as usize
    }
}
