//! Implementation of the job concurrency limiter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An error indicating that waiting for a slot was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("waiting for a job slot was canceled")]
pub struct Canceled;

/// Represents a parked acquirer.
struct Parked {
    /// The id of the parked acquirer.
    id: usize,
    /// The channel that receives a message when the acquirer is granted a
    /// slot.
    notify: oneshot::Sender<()>,
}

/// Represents the state of a limiter.
struct LimiterState {
    /// The next parked acquirer id to use.
    next_id: usize,
    /// The number of jobs currently attributed to the manager.
    count: usize,
    /// The queue of parked acquirers, in arrival order.
    parked: VecDeque<Parked>,
}

impl LimiterState {
    /// Grants slots to parked acquirers while there is capacity.
    fn unpark(&mut self, ceiling: usize) {
        while self.count < ceiling {
            let Some(parked) = self.parked.pop_front() else {
                break;
            };

            // An acquirer that stopped waiting does not take the slot
            if parked.notify.send(()).is_ok() {
                self.count += 1;
                debug!(
                    "granted a job slot to a parked submission ({count} of {ceiling} in use)",
                    count = self.count
                );
            }
        }
    }
}

/// Bounds the number of jobs present in the scheduler at the same time.
///
/// The limiter counts every job attributed to the manager, whether it was
/// submitted by it or found already present in the scheduler. A limiter
/// without a ceiling still counts but never blocks.
///
/// Cloning a limiter returns a handle to the same state.
#[derive(Clone)]
pub struct JobLimiter {
    /// The maximum number of attributed jobs, if any.
    ceiling: Option<usize>,
    /// The shared state.
    state: Arc<Mutex<LimiterState>>,
}

impl JobLimiter {
    /// Constructs a new limiter with the given ceiling.
    ///
    /// A ceiling of `None` means the number of jobs is unbounded.
    pub fn new(ceiling: Option<usize>) -> Self {
        Self {
            ceiling,
            state: Arc::new(Mutex::new(LimiterState {
                next_id: 0,
                count: 0,
                parked: VecDeque::new(),
            })),
        }
    }

    /// Gets the number of jobs currently attributed to the manager.
    pub fn in_use(&self) -> usize {
        self.state.lock().expect("failed to lock state").count
    }

    /// Gets the number of acquirers waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.state.lock().expect("failed to lock state").parked.len()
    }

    /// Waits until a slot is available and takes it.
    ///
    /// Acquirers are granted slots in the order they started waiting.
    /// Returns an error if the token is canceled while waiting; no slot is
    /// held in that case.
    pub async fn acquire(&self, token: &CancellationToken) -> Result<(), Canceled> {
        let Some(ceiling) = self.ceiling else {
            self.state.lock().expect("failed to lock state").count += 1;
            return Ok(());
        };

        let (id, notify) = {
            let mut state = self.state.lock().expect("failed to lock state");
            state.parked.retain(|p| !p.notify.is_closed());
            if state.count < ceiling && state.parked.is_empty() {
                state.count += 1;
                return Ok(());
            }

            debug!(
                "waiting for a job slot ({count} of {ceiling} in use)",
                count = state.count
            );

            let (tx, rx) = oneshot::channel();
            let id = state.next_id;
            state.next_id += 1;
            state.parked.push_back(Parked { id, notify: tx });
            (id, rx)
        };

        let canceled = tokio::select! {
            biased;
            _ = token.cancelled() => true,
            r = notify => r.is_err(),
        };

        if !canceled {
            return Ok(());
        }

        let mut state = self.state.lock().expect("failed to lock state");
        match state.parked.iter().position(|p| p.id == id) {
            Some(index) => {
                state.parked.remove(index);
            }
            None => {
                // The slot was granted as the wait was canceled; give it back
                state.count = state.count.saturating_sub(1);
                state.unpark(ceiling);
            }
        }

        Err(Canceled)
    }

    /// Attributes a job to the manager without waiting for a slot.
    ///
    /// This is used for jobs found already present in the scheduler, which
    /// may push the count above the ceiling.
    pub fn account(&self) {
        let mut state = self.state.lock().expect("failed to lock state");
        state.count += 1;
        debug!("accounted for an existing job ({count} in use)", count = state.count);
    }

    /// Releases a slot, waking the next waiting acquirer if capacity allows.
    ///
    /// The count never goes below zero.
    pub fn release(&self) {
        let mut state = self.state.lock().expect("failed to lock state");
        state.count = state.count.saturating_sub(1);
        debug!("released a job slot ({count} in use)", count = state.count);

        if let Some(ceiling) = self.ceiling {
            state.unpark(ceiling);
        }
    }
}

impl std::fmt::Debug for JobLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLimiter")
            .field("ceiling", &self.ceiling)
            .field("in_use", &self.in_use())
            .field("waiting", &self.waiting())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn unbounded_never_blocks() {
        let limiter = JobLimiter::new(None);
        let token = CancellationToken::new();
        for _ in 0..100 {
            limiter.acquire(&token).await.unwrap();
        }

        assert_eq!(limiter.in_use(), 100);
        limiter.release();
        assert_eq!(limiter.in_use(), 99);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_admits_at_most_c() {
        let limiter = JobLimiter::new(Some(2));
        let token = CancellationToken::new();
        let mut tasks = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let token = token.clone();
            tasks.push(tokio::spawn(async move { limiter.acquire(&token).await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.in_use(), 2);
        assert_eq!(limiter.waiting(), 3);
        assert_eq!(tasks.iter().filter(|t| t.is_finished()).count(), 2);

        // One release admits exactly one more
        limiter.release();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.in_use(), 2);
        assert_eq!(limiter.waiting(), 2);
        assert_eq!(tasks.iter().filter(|t| t.is_finished()).count(), 3);

        token.cancel();
        for task in tasks {
            let _ = task.await.unwrap();
        }

        assert_eq!(limiter.in_use(), 2);
        assert_eq!(limiter.waiting(), 0);
    }

    #[test]
    fn release_never_goes_negative() {
        let limiter = JobLimiter::new(Some(1));
        limiter.release();
        limiter.release();
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn account_ignores_ceiling() {
        let limiter = JobLimiter::new(Some(1));
        limiter.account();
        limiter.account();
        assert_eq!(limiter.in_use(), 2);

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(limiter.acquire(&token).await, Err(Canceled));
        assert_eq!(limiter.in_use(), 2);

        limiter.release();
        limiter.release();
        limiter.acquire(&token).await.unwrap();
        assert_eq!(limiter.in_use(), 1);
    }
}
