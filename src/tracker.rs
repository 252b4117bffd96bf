use std::{
    borrow::Borrow,
    fmt::Debug,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use dashmap::DashMap;
use tracing::trace;

use crate::{
    ring::{DayBuffer, HourBuffer, MinuteBuffer},
    scheduler::Roll,
};

/// Tracks the usages of one key over the last second, minute, hour, day, plus the lifetime total.
///
/// A tracker is a node in a tree: it owns its children (see [`child`](Self::child)) and holds
/// a weak link to its parent. With recursive increments enabled, every [`increment`](Self::increment)
/// is also counted on all the ancestors up to the root.
///
/// ## Internal structure
///
/// ```text
///   increment() ──► second ──roll_second──► minute[60] ──roll_minute──► hour[60] ──roll_hour──► day[24]
///              └──► total
/// ```
///
/// `second` holds the in-flight second. Every roll folds the finer window into the next
/// coarser ring: `roll_second` moves the live count into `minute`, `roll_minute` stores the
/// sum of `minute` into `hour` and `roll_hour` stores the sum of `hour` into `day`.
/// Rolls are normally driven by a [`RollScheduler`](crate::RollScheduler).
///
/// Increments are a couple of atomic adds, and reads never block. A roll racing with an
/// increment may count that increment in either second; counts are meant for metering,
/// not accounting.
pub struct UsageTracker<K> {
    key: K,
    second: AtomicU64,
    total: AtomicU64,
    minute: MinuteBuffer,
    hour: HourBuffer,
    day: DayBuffer,
    parent: Option<Weak<UsageTracker<K>>>,
    children: DashMap<K, Arc<UsageTracker<K>>>,
    recursive_increment: bool,
}

impl<K: Debug + Eq + Hash + Clone> Debug for UsageTracker<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("key", &self.key)
            .field("second", &self.second_usages())
            .field("total", &self.total_usages())
            .field("minute", &self.minute.snapshot())
            .field("hour", &self.hour.snapshot())
            .field("day", &self.day.snapshot())
            .field("children", &self.children.len())
            .finish()
    }
}

impl<K: Eq + Hash + Clone> UsageTracker<K> {
    /// Create a root tracker, with no parent.
    ///
    /// Trackers are usually obtained from a [`TrackerGroup`](crate::TrackerGroup) instead.
    pub fn new(key: K, recursive_increment: bool) -> Self {
        Self::with_parent(key, None, recursive_increment)
    }

    fn with_parent(key: K, parent: Option<Weak<Self>>, recursive_increment: bool) -> Self {
        Self {
            key,
            second: AtomicU64::new(0),
            total: AtomicU64::new(0),
            minute: MinuteBuffer::new(),
            hour: HourBuffer::new(),
            day: DayBuffer::new(),
            parent,
            children: DashMap::new(),
            recursive_increment,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// The parent of this tracker, if it has one and it is still alive.
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Whether increments on this tracker are also counted on its ancestors.
    pub fn recursive_increment(&self) -> bool {
        self.recursive_increment
    }

    /// Register a usage.
    ///
    /// If recursive increments are enabled, the ancestors are incremented too, up to the root.
    pub fn increment(&self) {
        self.count();

        if !self.recursive_increment {
            return;
        }

        let mut next = self.parent();
        while let Some(parent) = next {
            parent.count();
            if !parent.recursive_increment {
                break;
            }
            next = parent.parent();
        }
    }

    #[inline]
    fn count(&self) {
        self.second.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the child tracker for `key`, creating it if needed.
    ///
    /// Concurrent calls with the same key all return the same tracker.
    pub fn child(self: &Arc<Self>, key: K) -> Arc<Self> {
        if let Some(child) = self.children.get(&key) {
            return Arc::clone(child.value());
        }

        let entry = self.children.entry(key.clone()).or_insert_with(|| {
            trace!("creating child tracker");
            Arc::new(Self::with_parent(
                key,
                Some(Arc::downgrade(self)),
                self.recursive_increment,
            ))
        });
        Arc::clone(entry.value())
    }

    /// Get the child tracker for `key` without creating it.
    pub fn get_child<Q>(&self, key: &Q) -> Option<Arc<Self>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.children.get(key).map(|c| Arc::clone(c.value()))
    }

    /// Detach the child tracker for `key`. Returns `None` if there was none.
    pub fn remove_child<Q>(&self, key: &Q) -> Option<Arc<Self>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.children.remove(key).map(|(_, c)| c)
    }

    /// The children of this tracker. Changes made to this map affect the tracker.
    pub fn children(&self) -> &DashMap<K, Arc<Self>> {
        &self.children
    }

    /// Usages in the current second.
    pub fn second_usages(&self) -> u64 {
        self.second.load(Ordering::Relaxed)
    }

    /// Usages in the last minute.
    pub fn minute_usages(&self) -> u64 {
        self.minute.sum() + self.second_usages()
    }

    /// Usages in the last hour.
    pub fn hourly_usages(&self) -> u64 {
        self.hour.sum_last(59) + self.minute_usages()
    }

    /// Usages in the last day.
    pub fn daily_usages(&self) -> u64 {
        self.day.sum_last(23) + self.hourly_usages()
    }

    /// Usages since this tracker was created.
    pub fn total_usages(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Usages in the last `minutes` minutes: the `minutes - 1` latest completed minutes plus the
    /// current one. `0` yields `0`; past 61 the window stops growing, since the hour ring only
    /// holds 60 completed minutes.
    pub fn last_minutes_usages(&self, minutes: usize) -> u64 {
        match minutes {
            0 => 0,
            m => self.hour.sum_last(m - 1) + self.minute_usages(),
        }
    }

    /// Usages in the last `hours` hours: the `hours - 1` latest completed hours plus the current
    /// one. `0` yields `0`; past 25 the window stops growing.
    pub fn last_hours_usages(&self, hours: usize) -> u64 {
        match hours {
            0 => 0,
            h => self.day.sum_last(h - 1) + self.hourly_usages(),
        }
    }

    /// Per-second usages of the last minute.
    pub fn minute_buffer(&self) -> &MinuteBuffer {
        &self.minute
    }

    /// Per-minute usages of the last hour.
    pub fn hour_buffer(&self) -> &HourBuffer {
        &self.hour
    }

    /// Per-hour usages of the last day.
    pub fn day_buffer(&self) -> &DayBuffer {
        &self.day
    }

    /// Move the usages of the current second into the minute ring, then roll every child.
    pub fn roll_second(&self) {
        self.minute.put(self.second.swap(0, Ordering::AcqRel));
        for child in self.child_snapshot() {
            child.roll_second();
        }
    }

    /// Store the usages of the last minute into the hour ring, then roll every child.
    pub fn roll_minute(&self) {
        self.hour.put(self.minute.sum());
        for child in self.child_snapshot() {
            child.roll_minute();
        }
    }

    /// Store the usages of the last hour into the day ring, then roll every child.
    pub fn roll_hour(&self) {
        self.day.put(self.hour.sum());
        for child in self.child_snapshot() {
            child.roll_hour();
        }
    }

    // Clones the children out so no shard lock is held while recursing.
    fn child_snapshot(&self) -> Vec<Arc<Self>> {
        self.children.iter().map(|c| Arc::clone(c.value())).collect()
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> Roll for UsageTracker<K> {
    fn roll_second(&self) {
        UsageTracker::roll_second(self)
    }

    fn roll_minute(&self) {
        UsageTracker::roll_minute(self)
    }

    fn roll_hour(&self) {
        UsageTracker::roll_hour(self)
    }
}
