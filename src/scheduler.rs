//! Periodic rolls.
//!
//! A [`RollScheduler`] spawns a tokio task that rolls a target every second, minute and hour.
//! The schedule starts when the scheduler is spawned, not on calendar boundaries: the first
//! second roll happens one second after [`RollScheduler::spawn`], and so on. Missed ticks are
//! caught up, so rolls keep a fixed rate even if the runtime is briefly busy. Caught-up rolls
//! run in the order they were due, with the finer roll first on equal deadlines.
//!
//! Rolls run inline on the scheduler task and walk every tracker tree of the target. The work
//! per tracker is bounded by the ring sizes, but a large tree keeps a runtime worker busy for
//! the whole walk; give the scheduler a multi-threaded runtime if that matters.
//!
//! The task only holds a weak reference to its target and stops by itself once the target
//! is dropped. It can also be stopped explicitly through its [`SchedulerHandle`].

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::broadcast,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};

use crate::error::{Result, UsageError};

/// Something that can be rolled on a schedule.
pub trait Roll: Send + Sync + 'static {
    fn roll_second(&self);
    fn roll_minute(&self);
    fn roll_hour(&self);
}

/// How often each roll happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollSchedule {
    second: Duration,
    minute: Duration,
    hour: Duration,
}

impl Default for RollSchedule {
    fn default() -> Self {
        Self {
            second: Duration::from_secs(1),
            minute: Duration::from_secs(60),
            hour: Duration::from_secs(60 * 60),
        }
    }
}

impl RollSchedule {
    /// Create a schedule with custom periods. All of them must be non-zero.
    ///
    /// Shorter periods are mostly useful for testing: the rings still have 60/60/24 slots,
    /// so the windows shrink accordingly.
    pub fn new(second: Duration, minute: Duration, hour: Duration) -> Result<Self> {
        for (roll, period) in [("second", second), ("minute", minute), ("hour", hour)] {
            if period.is_zero() {
                return Err(UsageError::ZeroInterval { roll });
            }
        }

        Ok(Self {
            second,
            minute,
            hour,
        })
    }

    pub fn second(&self) -> Duration {
        self.second
    }

    pub fn minute(&self) -> Duration {
        self.minute
    }

    pub fn hour(&self) -> Duration {
        self.hour
    }
}

/// Spawns the roll task.
pub struct RollScheduler;

impl RollScheduler {
    /// Start rolling `target` on the current tokio runtime.
    ///
    /// Fails with [`UsageError::NoRuntime`] when called outside of a runtime.
    pub fn spawn<T: Roll>(target: &Arc<T>, schedule: RollSchedule) -> Result<SchedulerHandle> {
        let runtime = Handle::try_current().map_err(|_| UsageError::NoRuntime)?;

        let target = Arc::downgrade(target);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        debug!(
            second = ?schedule.second,
            minute = ?schedule.minute,
            hour = ?schedule.hour,
            "starting roll scheduler"
        );
        let handle = runtime.spawn(run(target, schedule, shutdown_rx));

        Ok(SchedulerHandle {
            shutdown_tx,
            handle,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Tick {
    Second,
    Minute,
    Hour,
}

impl Tick {
    fn period(self, schedule: &RollSchedule) -> Duration {
        match self {
            Tick::Second => schedule.second,
            Tick::Minute => schedule.minute,
            Tick::Hour => schedule.hour,
        }
    }
}

async fn run<T: Roll>(target: Weak<T>, schedule: RollSchedule, mut shutdown_rx: broadcast::Receiver<()>) {
    let start = Instant::now();
    // Finer ticks come first: on equal deadlines a minute roll sees the second that just ended.
    let mut deadlines = [Tick::Second, Tick::Minute, Tick::Hour].map(|tick| (tick, start + tick.period(&schedule)));

    loop {
        let wake = deadlines.iter().fold(deadlines[0].1, |wake, &(_, at)| wake.min(at));
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("roll scheduler shutting down");
                return;
            }
            _ = sleep_until(wake) => {}
        }

        // Replay every overdue roll in deadline order, so a late wake-up still interleaves
        // seconds, minutes and hours the way an on-time one would.
        let now = Instant::now();
        while let Some((tick, at)) = deadlines.iter_mut().filter(|(_, at)| *at <= now).min_by_key(|(_, at)| *at) {
            let tick = *tick;
            let Some(target) = target.upgrade() else {
                debug!("roll target dropped, stopping roll scheduler");
                return;
            };

            match tick {
                Tick::Second => target.roll_second(),
                Tick::Minute => target.roll_minute(),
                Tick::Hour => target.roll_hour(),
            }
            trace!(?tick, "rolled");
            *at += tick.period(&schedule);
        }
    }
}

/// Handle to a running roll scheduler. Dropping it stops the scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop all three rolls. Rolls already in progress complete.
    pub fn shutdown(&self) {
        // Errors only when the task is gone already.
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the scheduler task to exit, after [`shutdown`](Self::shutdown) or once its
    /// target is dropped.
    pub async fn join(self) {
        let Self {
            shutdown_tx,
            handle,
        } = self;
        // keep the sender alive so waiting does not stop the task by itself
        let _shutdown_tx = shutdown_tx;
        if let Err(e) = handle.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }
}
