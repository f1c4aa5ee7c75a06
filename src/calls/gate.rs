//! The per-peer `negotiated` signal.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Resolved,
    /// The peer closed before negotiation completed.
    Abandoned,
}

/// Monotonic pending → resolved/abandoned latch. Never resets.
#[derive(Debug)]
pub struct NegotiationGate {
    tx: watch::Sender<GateState>,
}

impl Default for NegotiationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self { tx }
    }

    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == GateState::Resolved
    }

    /// Returns true if this call resolved the gate.
    pub fn resolve(&self) -> bool {
        self.settle(GateState::Resolved)
    }

    /// Returns true if this call abandoned a still pending gate.
    pub fn abandon(&self) -> bool {
        self.settle(GateState::Abandoned)
    }

    fn settle(&self, to: GateState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Waits until the gate leaves `Pending`.
    pub async fn settled(&self) -> GateState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|state| *state != GateState::Pending).await {
            Ok(state) => *state,
            // The sender lives in `self`, so this only happens mid-drop.
            Err(_) => GateState::Abandoned,
        }
    }

    /// Waits for resolution; `false` if the gate was abandoned instead.
    pub async fn wait(&self) -> bool {
        self.settled().await == GateState::Resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_wake_on_resolve() {
        let gate = Arc::new(NegotiationGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert!(gate.resolve());
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn settled_gate_never_changes() {
        let gate = NegotiationGate::new();
        assert!(gate.resolve());
        assert!(!gate.abandon());
        assert!(!gate.resolve());
        assert_eq!(gate.state(), GateState::Resolved);
        assert!(gate.wait().await);
    }

    #[tokio::test]
    async fn abandoned_gate_releases_waiters() {
        let gate = Arc::new(NegotiationGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        assert!(gate.abandon());
        assert!(!waiter.await.unwrap());
        assert!(!gate.resolve());
        assert_eq!(gate.settled().await, GateState::Abandoned);
    }
}
