use std::{sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;
use usage_tracker::{DefaultBucket, TrackerGroup};

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> usage_tracker::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let group = Arc::new(TrackerGroup::builder().recursive_increment(true).build());
    let scheduler = group.start()?;

    let alice = group.tracker("alice");
    let bob = group.tracker("bob");

    for _ in 0..5 {
        alice.child("/search").increment();
    }
    bob.child("/login").increment();

    // The clock is paused: sleeping fast-forwards it, and the scheduler rolls the group once per second.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(alice.second_usages(), 0);
    assert_eq!(alice.minute_usages(), 5);

    for _ in 0..3 {
        alice.increment();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.minute_usages(), 8);

    let top = group.highest(&DefaultBucket::LastMinute, 1);
    println!("busiest in the last minute: {}", top[0].key());

    // A minute later the seconds have aged out, but the last hour still remembers them
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(alice.minute_usages(), 0);
    assert_eq!(alice.hourly_usages(), 8);
    assert_eq!(group.total(&DefaultBucket::Total), 9);

    scheduler.shutdown();
    scheduler.join().await;

    Ok(())
}
