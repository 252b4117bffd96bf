#![doc = include_str!("../README.md")]

mod bucket;
mod error;
mod group;
mod ring;
mod scheduler;
mod tracker;

pub use bucket::{Bucket, DefaultBucket, FnBucket};
pub use error::{Result, UsageError};
pub use group::{GroupBuilder, GroupConfig, TrackerGroup};
pub use ring::{DayBuffer, HourBuffer, MinuteBuffer, RingBuffer};
pub use scheduler::{Roll, RollSchedule, RollScheduler, SchedulerHandle};
pub use tracker::UsageTracker;
