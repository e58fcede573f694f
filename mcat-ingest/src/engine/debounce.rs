//! Per-path debounce state
//!
//! # States per path
//! IDLE → PENDING (timer armed for `last_event + delay`) → IDLE (fired or cancelled)
//!
//! All timers live in one `DelayQueue` (a timer wheel) serviced by whichever
//! loop owns the `Debouncer`; there is no OS timer per path. At most one
//! timer exists per path: a new event resets it, a removal cancels it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::time::delay_queue::{DelayQueue, Key};

pub struct Debouncer {
    delay: Duration,
    queue: DelayQueue<PathBuf>,
    pending: HashMap<PathBuf, Key>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            queue: DelayQueue::new(),
            pending: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm the path's timer, or restart its window if already pending
    ///
    /// Returns true when an existing timer was reset.
    pub fn schedule(&mut self, path: PathBuf) -> bool {
        if let Some(key) = self.pending.get(&path) {
            self.queue.reset(key, self.delay);
            true
        } else {
            let key = self.queue.insert(path.clone(), self.delay);
            self.pending.insert(path, key);
            false
        }
    }

    /// Cancel the path's timer without firing; returns true if one was pending
    pub fn cancel(&mut self, path: &Path) -> bool {
        match self.pending.remove(path) {
            Some(key) => {
                self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer at or below `dir`; returns how many were cancelled
    pub fn cancel_under(&mut self, dir: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .pending
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();
        for path in &doomed {
            self.cancel(path);
        }
        doomed.len()
    }

    /// Cancel everything; no path fires afterwards
    pub fn cancel_all(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Wait for the next quiesced path
    ///
    /// Resolves to `None` immediately when nothing is pending, so callers
    /// polling in a loop should check [`has_pending`](Self::has_pending) first.
    pub async fn next_ready(&mut self) -> Option<PathBuf> {
        let expired = std::future::poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let path = expired.into_inner();
        self.pending.remove(&path);
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_timed_from_last_event() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let path = PathBuf::from("/media/incoming/Heat.1995.mkv");
        let start = Instant::now();

        assert!(!debouncer.schedule(path.clone()));
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(debouncer.schedule(path.clone()));
        }
        // Last event at t=400ms
        assert_eq!(debouncer.pending_count(), 1);

        let fired = debouncer.next_ready().await;
        assert_eq!(fired, Some(path));
        assert_eq!(start.elapsed(), Duration::from_millis(900));
        assert!(!debouncer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        let keep = PathBuf::from("/media/a.mkv");
        let drop = PathBuf::from("/media/b.mkv");

        debouncer.schedule(keep.clone());
        debouncer.schedule(drop.clone());
        assert!(debouncer.cancel(&drop));
        assert!(!debouncer.cancel(&drop));

        assert_eq!(debouncer.next_ready().await, Some(keep));
        assert!(!debouncer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_under_directory() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        debouncer.schedule(PathBuf::from("/media/new/a.mkv"));
        debouncer.schedule(PathBuf::from("/media/new/sub/b.mkv"));
        debouncer.schedule(PathBuf::from("/media/other/c.mkv"));

        assert_eq!(debouncer.cancel_under(Path::new("/media/new")), 2);
        assert_eq!(
            debouncer.next_ready().await,
            Some(PathBuf::from("/media/other/c.mkv"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_paths_fire_independently() {
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        let start = Instant::now();

        debouncer.schedule(PathBuf::from("/media/first.mkv"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.schedule(PathBuf::from("/media/second.mkv"));

        assert_eq!(
            debouncer.next_ready().await,
            Some(PathBuf::from("/media/first.mkv"))
        );
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert_eq!(
            debouncer.next_ready().await,
            Some(PathBuf::from("/media/second.mkv"))
        );
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_cancel_all_clears_state() {
        let mut debouncer = Debouncer::new(Duration::from_secs(5));
        debouncer.schedule(PathBuf::from("/media/a.mkv"));
        debouncer.schedule(PathBuf::from("/media/b.mkv"));

        debouncer.cancel_all();
        assert!(!debouncer.has_pending());
        assert_eq!(debouncer.next_ready().await, None);
    }
}
