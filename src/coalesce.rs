//! Change-signal coalescing
//!
//! Realtime "something changed" notifications tend to arrive in bursts. A
//! [`Debouncer`] is a pending flag plus one deadline that every new signal
//! pushes out; [`ChangeCoalescer`] drives it on a tokio task and runs the
//! refresh callback at most once per quiet window.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Pending flag plus a single reset-on-signal deadline
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    pending: bool,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: false,
            deadline: None,
        }
    }

    /// Record a signal, pushing the deadline out to `now + window`
    pub fn signal(&mut self, now: Instant) {
        self.pending = true;
        self.deadline = Some(now + self.window);
    }

    /// Returns true exactly once per burst, when the deadline has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if self.pending && now >= deadline => {
                self.pending = false;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Background task that collapses change signals into single runs
///
/// Dropping the coalescer stops the task.
pub struct ChangeCoalescer {
    tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

impl ChangeCoalescer {
    /// Spawn on the current tokio runtime
    pub fn spawn<F, Fut>(window: Duration, on_fire: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let handle = tokio::spawn(async move {
            let mut debouncer = Debouncer::new(window);
            loop {
                let deadline = debouncer.deadline();
                tokio::select! {
                    signal = rx.recv() => match signal {
                        Some(()) => debouncer.signal(Instant::now()),
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() =>
                    {
                        if debouncer.poll(Instant::now()) {
                            debug!("Coalesced change signals, running refresh");
                            on_fire().await;
                        }
                    }
                }
            }
        });

        Self { tx, handle }
    }

    /// Record a change signal; never blocks
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }
}

impl Drop for ChangeCoalescer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_debouncer_resets_on_signal() {
        let start = Instant::now();
        let window = Duration::from_millis(250);
        let mut debouncer = Debouncer::new(window);

        assert!(!debouncer.poll(start));
        debouncer.signal(start);
        debouncer.signal(start + Duration::from_millis(200));

        assert!(!debouncer.poll(start + Duration::from_millis(300)));
        assert!(debouncer.poll(start + Duration::from_millis(450)));
        assert!(!debouncer.poll(start + Duration::from_millis(900)));
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let coalescer = ChangeCoalescer::spawn(Duration::from_millis(250), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..5 {
            coalescer.notify();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        coalescer.notify();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
