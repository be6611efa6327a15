//! Expiration Timer
//!
//! Background tick that periodically asks a cache storage to sweep expired
//! entries.
//!
//! The tick loop runs on the ambient tokio runtime when the timer is started
//! from inside one, otherwise on a dedicated thread driving its own
//! current-thread runtime. The timer only holds a weak reference to what it
//! sweeps; it stops once the target is gone, once the target reports it has
//! nothing left to expire, or once the timer itself is dropped.

use std::io;
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Something the expiration timer can sweep.
pub(crate) trait Sweep: Send + Sync + 'static {
    /// Evicts expired entries. Returns false when the timer is no longer needed.
    fn sweep_on_tick(&self) -> bool;
}

enum TimerHost {
    Task(JoinHandle<()>),
    Thread(thread::JoinHandle<()>),
}

/// Handle to a running expiration timer; dropping it stops the timer.
pub(crate) struct ExpirationTimer {
    _shutdown: watch::Sender<bool>,
    host: TimerHost,
}

impl ExpirationTimer {
    // == Start ==
    /// Starts sweeping `target` every `interval`.
    ///
    /// The first sweep happens one full interval after start.
    pub fn start<S: Sweep>(target: Weak<S>, interval: Duration) -> io::Result<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let host = match Handle::try_current() {
            Ok(handle) => TimerHost::Task(handle.spawn(run(target, interval, shutdown_rx))),
            Err(_) => {
                let runtime = Builder::new_current_thread().enable_time().build()?;
                let thread = thread::Builder::new()
                    .name("cache-expiration-timer".to_string())
                    .spawn(move || runtime.block_on(run(target, interval, shutdown_rx)))?;
                TimerHost::Thread(thread)
            }
        };

        info!(
            "Expiration timer started with interval of {} ms",
            interval.as_millis()
        );

        Ok(Self {
            _shutdown: shutdown,
            host,
        })
    }

    // == Is Running ==
    /// Returns false once the tick loop has exited, e.g. because the runtime
    /// hosting it shut down.
    pub fn is_running(&self) -> bool {
        match &self.host {
            TimerHost::Task(handle) => !handle.is_finished(),
            TimerHost::Thread(handle) => !handle.is_finished(),
        }
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        // Dropping the shutdown sender wakes the loop. The thread host is not
        // joined: the last reference to the target may be released on the
        // timer thread itself.
        if let TimerHost::Task(handle) = &self.host {
            handle.abort();
        }
        debug!("Expiration timer stopped");
    }
}

async fn run<S: Sweep>(target: Weak<S>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let Some(target) = target.upgrade() else {
            break;
        };
        if !target.sweep_on_tick() {
            break;
        }
    }

    debug!("Expiration timer loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        ticks: AtomicUsize,
        stop_after: usize,
    }

    impl Sweep for Counter {
        fn sweep_on_tick(&self) -> bool {
            self.ticks.fetch_add(1, Ordering::SeqCst) + 1 < self.stop_after
        }
    }

    fn counter(stop_after: usize) -> Arc<Counter> {
        Arc::new(Counter {
            ticks: AtomicUsize::new(0),
            stop_after,
        })
    }

    #[test]
    fn test_timer_ticks_on_dedicated_thread() {
        let target = counter(usize::MAX);
        let timer = ExpirationTimer::start(Arc::downgrade(&target), Duration::from_millis(20)).unwrap();

        thread::sleep(Duration::from_millis(150));
        assert!(target.ticks.load(Ordering::SeqCst) >= 2);
        assert!(timer.is_running());
    }

    #[test]
    fn test_timer_stops_when_target_is_idle() {
        let target = counter(2);
        let timer = ExpirationTimer::start(Arc::downgrade(&target), Duration::from_millis(10)).unwrap();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(target.ticks.load(Ordering::SeqCst), 2);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_timer_stops_when_target_dropped() {
        let target = counter(usize::MAX);
        let timer = ExpirationTimer::start(Arc::downgrade(&target), Duration::from_millis(10)).unwrap();
        drop(target);

        thread::sleep(Duration::from_millis(100));
        assert!(!timer.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timer_runs_as_task_inside_runtime() {
        let target = counter(usize::MAX);
        let timer = ExpirationTimer::start(Arc::downgrade(&target), Duration::from_millis(20)).unwrap();
        assert!(matches!(timer.host, TimerHost::Task(_)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(target.ticks.load(Ordering::SeqCst) >= 2);

        drop(timer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let ticks = target.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(target.ticks.load(Ordering::SeqCst), ticks);
    }
}
