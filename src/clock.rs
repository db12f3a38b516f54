use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::{Duration, SystemTime};

/// Time operations consumed by the limiter and retry executor.
///
/// Injected at construction so tests can control both the timestamps sent to
/// the backend and the delays slept between attempts.
pub trait Clock: Send + Sync + 'static {
    /// The current wall-clock time.
    fn now(&self) -> SystemTime;

    /// A future that completes once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Production [Clock] backed by the system clock and the tokio timer.
///
/// Sleeps go through `tokio::time`, so they respect `tokio::time::pause` in
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Seconds since the unix epoch, saturating at zero for pre-epoch clocks.
pub(crate) fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
