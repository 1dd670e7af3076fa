//! IRCv3 capability negotiation state.

use std::sync::RwLock;
use wairc_core::Signal;

/// Outcome of waiting for negotiation to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// The client never sent a `CAP` subcommand.
    NotStarted,
    Finished,
    /// The wait was cut short by the cancellation signal.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    Started,
    Finished,
}

#[derive(Debug)]
struct Inner {
    state: State,
    caps: Vec<String>,
}

/// Negotiated capabilities of one client. State only moves forward:
/// not started, started, finished.
#[derive(Debug)]
pub struct Capabilities {
    inner: RwLock<Inner>,
    finished: Signal,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: State::NotStarted,
                caps: Vec::new(),
            }),
            finished: Signal::new(),
        }
    }

    /// Record a negotiated capability. Refused once negotiation finished.
    pub fn add(&self, cap: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.state == State::Finished {
            return false;
        }
        if !inner.caps.iter().any(|c| c.eq_ignore_ascii_case(cap)) {
            inner.caps.push(cap.to_string());
        }
        true
    }

    /// Case-insensitive membership test.
    pub fn has(&self, cap: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.caps.iter().any(|c| c.eq_ignore_ascii_case(cap))
    }

    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.caps.clone()
    }

    /// Returns `false` if negotiation was already started or finished.
    pub fn start_negotiation(&self) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.state != State::NotStarted {
            return false;
        }
        inner.state = State::Started;
        true
    }

    /// Returns `false` if negotiation was already finished.
    pub fn finish_negotiation(&self) -> bool {
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if inner.state == State::Finished {
                return false;
            }
            inner.state = State::Finished;
        }
        self.finished.fire();
        true
    }

    /// Wait until negotiation finishes, unless it never started or `cancel`
    /// fires first.
    pub async fn wait_negotiation(&self, cancel: &Signal) -> Negotiation {
        let state = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.state
        };

        match state {
            State::NotStarted => Negotiation::NotStarted,
            State::Finished => Negotiation::Finished,
            State::Started => {
                tokio::select! {
                    biased;
                    _ = self.finished.fired() => Negotiation::Finished,
                    _ = cancel.fired() => Negotiation::Cancelled,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    #[test]
    fn test_has_is_case_insensitive() {
        let caps = Capabilities::new();
        assert!(!caps.has("server-time"), "nothing negotiated yet");
        caps.add("Server-Time");
        assert!(caps.has("server-time"));
        caps.add("server-time");
        assert_eq!(caps.list().len(), 1, "duplicates are collapsed");
    }

    #[test]
    fn test_state_only_moves_forward() {
        let caps = Capabilities::new();
        assert!(caps.start_negotiation());
        assert!(!caps.start_negotiation());
        assert!(caps.finish_negotiation());
        assert!(!caps.finish_negotiation());
        assert!(!caps.start_negotiation());
        assert!(!caps.add("late"), "no additions after finish");
    }

    #[tokio::test]
    async fn test_wait_not_started_returns_immediately() {
        let caps = Capabilities::new();
        let cancel = Signal::new();
        let result = tokio::time::timeout(Duration::from_millis(50), caps.wait_negotiation(&cancel))
            .await
            .expect("must not block");
        assert_eq!(result, Negotiation::NotStarted);
    }

    #[tokio::test]
    async fn test_wait_returns_finished_after_end() {
        let caps = Arc::new(Capabilities::new());
        caps.start_negotiation();
        let cancel = Signal::new();

        let waiter = {
            let caps = caps.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { caps.wait_negotiation(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished(), "must wait while negotiation is open");

        caps.finish_negotiation();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Negotiation::Finished);
    }

    #[tokio::test]
    async fn test_wait_cancelled_promptly() {
        let caps = Capabilities::new();
        caps.start_negotiation();
        let cancel = Signal::new();
        cancel.fire();
        let result = tokio::time::timeout(Duration::from_millis(50), caps.wait_negotiation(&cancel))
            .await
            .expect("cancellation must be prompt");
        assert_eq!(result, Negotiation::Cancelled);
    }
}
