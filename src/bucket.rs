use std::{
    cmp::{Ordering, Reverse},
    fmt::{self, Display},
    hash::Hash,
    str::FromStr,
    sync::Arc,
};

use crate::{error::UsageError, tracker::UsageTracker};

/// A way to read one amount off a tracker, and to rank trackers by it.
///
/// Buckets never mutate trackers. Trackers are ordered by ascending [`amount`](Self::amount).
pub trait Bucket<K> {
    /// The amount in this bucket for the given tracker.
    fn amount(&self, tracker: &UsageTracker<K>) -> u64;

    fn compare(&self, a: &UsageTracker<K>, b: &UsageTracker<K>) -> Ordering {
        self.amount(a).cmp(&self.amount(b))
    }

    /// Up to `n` trackers, from the highest amount to the lowest.
    ///
    /// The sort is stable: trackers with the same amount keep their relative order.
    fn highest(&self, mut trackers: Vec<Arc<UsageTracker<K>>>, n: usize) -> Vec<Arc<UsageTracker<K>>> {
        trackers.sort_by_cached_key(|t| Reverse(self.amount(t)));
        trackers.truncate(n);
        trackers
    }

    /// Up to `n` trackers, from the lowest amount to the highest.
    ///
    /// The sort is stable: trackers with the same amount keep their relative order.
    fn lowest(&self, mut trackers: Vec<Arc<UsageTracker<K>>>, n: usize) -> Vec<Arc<UsageTracker<K>>> {
        trackers.sort_by_cached_key(|t| self.amount(t));
        trackers.truncate(n);
        trackers
    }
}

/// The built-in windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultBucket {
    LastSecond,
    LastMinute,
    Last5Minutes,
    Last15Minutes,
    Last30Minutes,
    LastHour,
    Last2Hours,
    Last6Hours,
    Last12Hours,
    LastDay,
    Total,
}

impl DefaultBucket {
    pub const ALL: [DefaultBucket; 11] = [
        DefaultBucket::LastSecond,
        DefaultBucket::LastMinute,
        DefaultBucket::Last5Minutes,
        DefaultBucket::Last15Minutes,
        DefaultBucket::Last30Minutes,
        DefaultBucket::LastHour,
        DefaultBucket::Last2Hours,
        DefaultBucket::Last6Hours,
        DefaultBucket::Last12Hours,
        DefaultBucket::LastDay,
        DefaultBucket::Total,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            DefaultBucket::LastSecond => "last_second",
            DefaultBucket::LastMinute => "last_minute",
            DefaultBucket::Last5Minutes => "last_5_minutes",
            DefaultBucket::Last15Minutes => "last_15_minutes",
            DefaultBucket::Last30Minutes => "last_30_minutes",
            DefaultBucket::LastHour => "last_hour",
            DefaultBucket::Last2Hours => "last_2_hours",
            DefaultBucket::Last6Hours => "last_6_hours",
            DefaultBucket::Last12Hours => "last_12_hours",
            DefaultBucket::LastDay => "last_day",
            DefaultBucket::Total => "total",
        }
    }
}

impl Display for DefaultBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DefaultBucket {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DefaultBucket::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UsageError::UnknownBucket(s.to_string()))
    }
}

impl<K: Eq + Hash + Clone> Bucket<K> for DefaultBucket {
    fn amount(&self, tracker: &UsageTracker<K>) -> u64 {
        match self {
            DefaultBucket::LastSecond => tracker.second_usages(),
            DefaultBucket::LastMinute => tracker.minute_usages(),
            DefaultBucket::Last5Minutes => tracker.last_minutes_usages(5),
            DefaultBucket::Last15Minutes => tracker.last_minutes_usages(15),
            DefaultBucket::Last30Minutes => tracker.last_minutes_usages(30),
            DefaultBucket::LastHour => tracker.hourly_usages(),
            DefaultBucket::Last2Hours => tracker.last_hours_usages(2),
            DefaultBucket::Last6Hours => tracker.last_hours_usages(6),
            DefaultBucket::Last12Hours => tracker.last_hours_usages(12),
            DefaultBucket::LastDay => tracker.daily_usages(),
            DefaultBucket::Total => tracker.total_usages(),
        }
    }
}

/// A bucket backed by a function, for windows the built-in ones don't cover.
///
/// ```
/// use usage_tracker::{Bucket, FnBucket, UsageTracker};
///
/// // the last 10 seconds
/// let bucket = FnBucket::new(|t: &UsageTracker<&str>| t.minute_buffer().sum_last(9) + t.second_usages());
///
/// let tracker = UsageTracker::new("key", false);
/// tracker.increment();
/// assert_eq!(bucket.amount(&tracker), 1);
/// ```
#[derive(Clone, Copy)]
pub struct FnBucket<F>(F);

impl<F> FnBucket<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnBucket<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBucket").finish_non_exhaustive()
    }
}

impl<K, F> Bucket<K> for FnBucket<F>
where
    F: Fn(&UsageTracker<K>) -> u64,
{
    fn amount(&self, tracker: &UsageTracker<K>) -> u64 {
        (self.0)(tracker)
    }
}
