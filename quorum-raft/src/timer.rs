use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

/// How long until the next fire: a constant, or a fresh uniform draw per
/// arming (the randomised election timeout).
#[derive(Clone, Copy, Debug)]
pub enum Interval {
    Fixed(Duration),
    Randomized(Duration, Duration),
}

impl Interval {
    pub fn next(&self) -> Duration {
        match *self {
            Interval::Fixed(interval) => interval,
            Interval::Randomized(low, high) => {
                let millis = rand::thread_rng()
                    .gen_range(low.as_millis() as u64..=high.as_millis() as u64);
                Duration::from_millis(millis)
            }
        }
    }
}

/// A one-shot scheduler that re-arms itself after each fire. The callback
/// runs on the runtime and must be cheap; ours only posts an event.
///
/// `stop` is idempotent and suppresses further fires (active flag checked
/// before each callback, then the task is aborted). Role-epoch tagging at
/// the receiving end makes cancellation fully deterministic.
pub struct Timer {
    interval: Interval,
    callback: Arc<dyn Fn() + Send + Sync>,
    running: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
}

impl Timer {
    pub fn new<F>(interval: Interval, callback: F) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        Timer {
            interval,
            callback: Arc::new(callback),
            running: None,
        }
    }

    /// Arm the timer. Starting an armed timer re-arms it from now.
    pub fn start(&mut self) {
        self.stop();
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let interval = self.interval;
        let callback = self.callback.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval.next()).await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                (callback)();
            }
        });
        self.running = Some((handle, active));
    }

    pub fn stop(&mut self) {
        if let Some((handle, active)) = self.running.take() {
            active.store(false, Ordering::SeqCst);
            handle.abort();
        }
    }

    /// Stop and start: pushes the next fire a full interval away.
    pub fn reset(&mut self) {
        self.stop();
        self.start();
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Timer")
            .field("interval", &self.interval)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn ticker(interval: Interval) -> (Timer, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer = Timer::new(interval, move || {
            let _ = tx.send(());
        });
        (timer, rx)
    }

    #[tokio::test]
    async fn fires_and_rearms() {
        let (mut timer, mut rx) = ticker(Interval::Fixed(Duration::from_millis(10)));
        timer.start();
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        timer.stop();
    }

    #[tokio::test]
    async fn stop_suppresses_callbacks() {
        let (mut timer, mut rx) = ticker(Interval::Fixed(Duration::from_millis(50)));
        timer.start();
        timer.stop();
        timer.stop(); // idempotent
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.recv().now_or_never().is_none());
    }

    #[tokio::test]
    async fn reset_pushes_the_fire_out() {
        let (mut timer, mut rx) = ticker(Interval::Fixed(Duration::from_millis(80)));
        timer.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.reset();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // 100ms after start, but only 50ms after the reset: nothing yet
        assert!(rx.recv().now_or_never().is_none());
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        timer.stop();
    }

    #[tokio::test]
    async fn randomized_draws_stay_in_range() {
        let interval = Interval::Randomized(
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        for _ in 0..50 {
            let next = interval.next();
            assert!(next >= Duration::from_millis(100));
            assert!(next <= Duration::from_millis(200));
        }
    }
}
