use std::{borrow::Borrow, fmt::Debug, hash::Hash, marker::PhantomData, sync::Arc};

use dashmap::DashMap;
use tracing::trace;

use crate::{
    bucket::Bucket,
    error::Result,
    scheduler::{Roll, RollSchedule, RollScheduler, SchedulerHandle},
    tracker::UsageTracker,
};

/// Tracker group configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupConfig {
    /// Whether increments on a child tracker are also counted on its ancestors.
    pub recursive_increment: bool,
    /// How often trackers are rolled once the group is [started](TrackerGroup::start).
    pub schedule: RollSchedule,
}

/// Builder for [`TrackerGroup`].
///
/// The key type is picked up from how the built group is used.
pub struct GroupBuilder<K> {
    config: GroupConfig,
    _key: PhantomData<fn() -> K>,
}

impl<K> Debug for GroupBuilder<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl<K> Clone for GroupBuilder<K> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            _key: PhantomData,
        }
    }
}

impl<K> Default for GroupBuilder<K> {
    fn default() -> Self {
        Self {
            config: GroupConfig::default(),
            _key: PhantomData,
        }
    }
}

impl<K> GroupBuilder<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recursive_increment(mut self, enabled: bool) -> Self {
        self.config.recursive_increment = enabled;
        self
    }

    pub fn schedule(mut self, schedule: RollSchedule) -> Self {
        self.config.schedule = schedule;
        self
    }
}

impl<K: Eq + Hash + Clone> GroupBuilder<K> {
    pub fn build(self) -> TrackerGroup<K> {
        TrackerGroup::with_config(self.config)
    }
}

/// A set of root [`UsageTracker`]s, one per key.
///
/// The group creates trackers on first use, ranks them by [`Bucket`], and rolls all of them
/// (children included) once [started](Self::start).
///
/// ```
/// use std::sync::Arc;
/// use usage_tracker::{DefaultBucket, TrackerGroup};
///
/// let group = Arc::new(TrackerGroup::new());
/// group.tracker("alice").increment();
/// group.tracker("bob").increment();
/// group.tracker("bob").increment();
///
/// let top = group.highest(&DefaultBucket::LastMinute, 1);
/// assert_eq!(*top[0].key(), "bob");
/// assert_eq!(group.total(&DefaultBucket::Total), 3);
/// ```
pub struct TrackerGroup<K> {
    trackers: DashMap<K, Arc<UsageTracker<K>>>,
    config: GroupConfig,
}

impl<K: Debug + Eq + Hash + Clone> Debug for TrackerGroup<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerGroup")
            .field("trackers", &self.trackers.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<K: Eq + Hash + Clone> Default for TrackerGroup<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> TrackerGroup<K> {
    /// Create a group with the default configuration: no recursive increments, rolls every
    /// second, minute and hour.
    pub fn new() -> Self {
        Self::with_config(GroupConfig::default())
    }

    pub fn with_config(config: GroupConfig) -> Self {
        Self {
            trackers: DashMap::new(),
            config,
        }
    }

    pub fn builder() -> GroupBuilder<K> {
        GroupBuilder::new()
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Get the tracker for `key`, creating it if needed.
    ///
    /// Concurrent calls with the same key all return the same tracker.
    pub fn tracker(&self, key: K) -> Arc<UsageTracker<K>> {
        if let Some(tracker) = self.trackers.get(&key) {
            return Arc::clone(tracker.value());
        }

        let entry = self.trackers.entry(key.clone()).or_insert_with(|| {
            trace!("creating tracker");
            Arc::new(UsageTracker::new(key, self.config.recursive_increment))
        });
        Arc::clone(entry.value())
    }

    /// Get the tracker for `key` without creating it.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<UsageTracker<K>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.trackers.get(key).map(|t| Arc::clone(t.value()))
    }

    /// Remove the tracker for `key` from the group. Returns `None` if there was none.
    ///
    /// References to the tracker held elsewhere stay valid, but it is not rolled anymore.
    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<UsageTracker<K>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.trackers.remove(key).map(|(_, t)| t)
    }

    /// The trackers of this group. Changes made to this map affect the group.
    pub fn trackers(&self) -> &DashMap<K, Arc<UsageTracker<K>>> {
        &self.trackers
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// The current trackers.
    pub fn snapshot(&self) -> Vec<Arc<UsageTracker<K>>> {
        self.trackers.iter().map(|t| Arc::clone(t.value())).collect()
    }

    /// Up to `n` trackers with the highest amount in `bucket`.
    pub fn highest<B: Bucket<K> + ?Sized>(&self, bucket: &B, n: usize) -> Vec<Arc<UsageTracker<K>>> {
        bucket.highest(self.snapshot(), n)
    }

    /// Up to `n` trackers with the lowest amount in `bucket`.
    pub fn lowest<B: Bucket<K> + ?Sized>(&self, bucket: &B, n: usize) -> Vec<Arc<UsageTracker<K>>> {
        bucket.lowest(self.snapshot(), n)
    }

    /// Sum of the amounts in `bucket` over all trackers.
    pub fn total<B: Bucket<K> + ?Sized>(&self, bucket: &B) -> u64 {
        self.snapshot().iter().map(|t| bucket.amount(t)).sum()
    }

    /// Roll the current second of every tracker.
    pub fn roll_second(&self) {
        let trackers = self.snapshot();
        trace!(trackers = trackers.len(), "rolling second");
        trackers.iter().for_each(|t| t.roll_second());
    }

    /// Roll the current minute of every tracker.
    pub fn roll_minute(&self) {
        let trackers = self.snapshot();
        trace!(trackers = trackers.len(), "rolling minute");
        trackers.iter().for_each(|t| t.roll_minute());
    }

    /// Roll the current hour of every tracker.
    pub fn roll_hour(&self) {
        let trackers = self.snapshot();
        trace!(trackers = trackers.len(), "rolling hour");
        trackers.iter().for_each(|t| t.roll_hour());
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> TrackerGroup<K> {
    /// Start rolling this group on the current tokio runtime, following the configured schedule.
    ///
    /// The scheduler stops when the returned handle is shut down or dropped, or once the
    /// group itself is dropped.
    pub fn start(self: &Arc<Self>) -> Result<SchedulerHandle> {
        RollScheduler::spawn(self, self.config.schedule)
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> Roll for TrackerGroup<K> {
    fn roll_second(&self) {
        TrackerGroup::roll_second(self)
    }

    fn roll_minute(&self) {
        TrackerGroup::roll_minute(self)
    }

    fn roll_hour(&self) {
        TrackerGroup::roll_hour(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::{GroupConfig, TrackerGroup};
    use crate::{
        bucket::{DefaultBucket, FnBucket},
        error::UsageError,
        scheduler::RollSchedule,
        tracker::UsageTracker,
    };

    fn keys(trackers: &[Arc<UsageTracker<String>>]) -> Vec<&str> {
        trackers.iter().map(|t| t.key().as_str()).collect()
    }

    #[test]
    fn test_initially_empty() {
        let group = TrackerGroup::<String>::new();
        assert!(group.is_empty());
        assert_eq!(group.total(&DefaultBucket::Total), 0);
        assert!(group.highest(&DefaultBucket::Total, 3).is_empty());
        assert_eq!(*group.config(), GroupConfig::default());
    }

    #[test]
    fn test_tracker_is_created_once() {
        let group = TrackerGroup::new();
        let a = group.tracker("a".to_string());
        let b = group.tracker("a".to_string());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(group.len(), 1);
        assert!(Arc::ptr_eq(&group.get("a").unwrap(), &a));
        assert!(group.get("b").is_none());
    }

    #[test]
    fn test_remove() {
        let group = TrackerGroup::new();
        let a = group.tracker("a".to_string());
        a.increment();

        let removed = group.remove("a").unwrap();
        assert!(Arc::ptr_eq(&removed, &a));
        assert!(group.remove("a").is_none());
        assert!(group.is_empty());

        // removed trackers keep working but are not rolled anymore
        a.increment();
        group.roll_second();
        assert_eq!(a.second_usages(), 2);
        assert_eq!(a.total_usages(), 2);
    }

    #[test]
    fn test_highest_lowest_total() {
        let group = TrackerGroup::new();
        for (key, hits) in [("a", 10), ("b", 3), ("c", 7)] {
            let tracker = group.tracker(key.to_string());
            for _ in 0..hits {
                tracker.increment();
            }
        }

        assert_eq!(keys(&group.highest(&DefaultBucket::Total, 2)), vec!["a", "c"]);
        assert_eq!(keys(&group.lowest(&DefaultBucket::Total, 2)), vec!["b", "c"]);
        assert_eq!(group.total(&DefaultBucket::Total), 20);
        assert_eq!(group.total(&DefaultBucket::LastSecond), 20);

        group.roll_second();
        assert_eq!(group.total(&DefaultBucket::LastSecond), 0);
        assert_eq!(group.total(&DefaultBucket::LastMinute), 20);

        // remainders 0, 3 and 2 are distinct, so the order does not depend on map iteration
        let mod_five = FnBucket::new(|t: &UsageTracker<String>| t.total_usages() % 5);
        assert_eq!(group.total(&mod_five), 5);
        assert_eq!(keys(&group.highest(&mod_five, 2)), vec!["b", "c"]);
        assert_eq!(keys(&group.lowest(&mod_five, 1)), vec!["a"]);
    }

    #[test]
    fn test_roll_recurses_into_children() {
        let group = TrackerGroup::new();
        let leaf = group.tracker("root".to_string()).child("leaf".to_string());

        leaf.increment();
        group.roll_second();
        group.roll_minute();
        group.roll_hour();

        assert_eq!(leaf.minute_buffer().snapshot(), vec![1]);
        assert_eq!(leaf.hour_buffer().snapshot(), vec![1]);
        assert_eq!(leaf.day_buffer().snapshot(), vec![1]);
    }

    #[test]
    fn test_recursive_increment_config() {
        let group = TrackerGroup::builder().recursive_increment(true).build();
        let root = group.tracker("root".to_string());
        let leaf = root.child("a".to_string()).child("b".to_string());

        for _ in 0..5 {
            leaf.increment();
        }
        assert_eq!(root.total_usages(), 5);
        assert_eq!(group.total(&DefaultBucket::Total), 5);

        let group = TrackerGroup::<String>::new();
        let root = group.tracker("root".to_string());
        root.child("a".to_string()).increment();
        assert_eq!(root.total_usages(), 0);
    }

    #[test]
    fn test_builder_infers_key_type() {
        let builder = TrackerGroup::builder().recursive_increment(true);
        assert!(format!("{builder:?}").contains("recursive_increment: true"));

        // the key type is only fixed by the first `tracker` call
        let group = builder.clone().build();
        group.tracker(42u32).child(7).increment();
        assert_eq!(group.get(&42u32).unwrap().total_usages(), 1);
        assert!(group.config().recursive_increment);

        let group = TrackerGroup::builder().build();
        group.tracker("k").increment();
        assert_eq!(group.total(&DefaultBucket::Total), 1);
        assert!(!group.config().recursive_increment);
    }

    #[test]
    fn test_parallel_tracker_creation() {
        for _ in 0..50 {
            let group = Arc::new(TrackerGroup::new());

            const THREAD_NUMBER: usize = 8;

            let ths: Vec<_> = (0..THREAD_NUMBER)
                .map(|_| {
                    let group = Arc::clone(&group);
                    thread::spawn(move || {
                        let tracker = group.tracker("shared".to_string());
                        tracker.increment();
                        tracker
                    })
                })
                .collect();

            let trackers: Vec<_> = ths.into_iter().map(|th| th.join().unwrap()).collect();

            assert_eq!(group.len(), 1);
            for tracker in &trackers {
                assert!(Arc::ptr_eq(tracker, &trackers[0]));
            }
            assert_eq!(group.get("shared").unwrap().total_usages(), THREAD_NUMBER as u64);
        }
    }

    #[test]
    fn test_start_requires_runtime() {
        let group = Arc::new(TrackerGroup::<String>::new());
        assert_eq!(group.start().unwrap_err(), UsageError::NoRuntime);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rolls_with_configured_schedule() {
        let schedule = RollSchedule::new(
            Duration::from_millis(100),
            Duration::from_secs(6),
            Duration::from_secs(360),
        )
        .unwrap();
        let group = Arc::new(TrackerGroup::builder().schedule(schedule).build());
        let handle = group.start().unwrap();

        let tracker = group.tracker("k".to_string());
        for _ in 0..4 {
            tracker.increment();
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(tracker.second_usages(), 0);
        assert_eq!(tracker.minute_usages(), 4);
        assert_eq!(tracker.minute_buffer().writes(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(tracker.minute_buffer().writes(), 61);
        assert_eq!(tracker.hour_buffer().writes(), 1);
        assert_eq!(tracker.minute_usages(), 0);

        handle.shutdown();
        handle.join().await;
    }
}
