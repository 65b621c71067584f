//! Trailing-edge debounce with explicit cancellation.
//!
//! Each [`Debouncer::schedule`] call supersedes the previous ticket: its
//! token is cancelled, so at most one ticket per idle window ever fires.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A scheduled trailing action.
#[derive(Debug)]
pub struct DebounceTicket {
    generation: u64,
    idle: Duration,
    token: CancellationToken,
}

impl DebounceTicket {
    /// Generation to hand back to [`Debouncer::complete`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait out the idle window. Returns `false` if the ticket was
    /// superseded or cancelled first.
    pub async fn wait(&self) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(self.idle) => !self.token.is_cancelled(),
        }
    }
}

/// Coalesces bursts into a single trailing action.
#[derive(Debug)]
pub struct Debouncer {
    idle: Duration,
    pending: Option<CancellationToken>,
    generation: u64,
}

impl Debouncer {
    /// Debouncer with the given idle window.
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            pending: None,
            generation: 0,
        }
    }

    /// Idle window.
    pub fn idle(&self) -> Duration {
        self.idle
    }

    /// Start a new idle window, cancelling the pending one.
    pub fn schedule(&mut self) -> DebounceTicket {
        self.cancel();
        self.generation += 1;
        let token = CancellationToken::new();
        self.pending = Some(token.clone());
        DebounceTicket {
            generation: self.generation,
            idle: self.idle,
            token,
        }
    }

    /// Cancel the pending ticket, if any.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Mark `generation` as fired. Returns `false` if a newer ticket took its
    /// place in the meantime.
    pub fn complete(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.pending.is_none() {
            return false;
        }
        self.pending = None;
        true
    }

    /// Whether a ticket is waiting.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticket_fires_after_idle() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let ticket = debouncer.schedule();
        assert!(debouncer.is_pending());
        assert!(ticket.wait().await);
        assert!(debouncer.complete(ticket.generation()));
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_schedule_supersedes() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let first = debouncer.schedule();
        let second = debouncer.schedule();

        assert!(!first.wait().await);
        assert!(!debouncer.complete(first.generation()));
        assert!(second.wait().await);
        assert!(debouncer.complete(second.generation()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let ticket = debouncer.schedule();
        assert!(debouncer.cancel());
        assert!(!ticket.wait().await);
        assert!(!debouncer.cancel());
    }
}
