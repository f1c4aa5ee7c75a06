//! Failure handling shared by every fallible call step.
//!
//! Nothing is retried. Protocol anomalies are logged and dropped; anything
//! else gets a correlation reference, an error panel and a teardown.

use log::{debug, error, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::error::{CallError, ErrorClass};
use super::session::{SessionSignal, TeardownReason};
use super::traits::CallView;

/// What the policy did with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    /// Consequence of an earlier failure or of teardown.
    Ignored,
    /// Protocol anomaly, logged as a warning.
    Dropped,
    /// Shown to the user, call kept.
    Notified { reference: String },
    /// Shown to the user and the call torn down.
    Aborted { reference: String },
}

pub struct FailurePolicy {
    view: Arc<dyn CallView>,
    signals: mpsc::UnboundedSender<SessionSignal>,
    halted: AtomicBool,
}

/// Random correlation reference shown to the user and written to the log.
pub fn new_reference() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

impl FailurePolicy {
    pub fn new(view: Arc<dyn CallView>, signals: mpsc::UnboundedSender<SessionSignal>) -> Self {
        Self {
            view,
            signals,
            halted: AtomicBool::new(false),
        }
    }

    /// Called once teardown began; later failures are only logged.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Route an error by its class.
    pub fn handle(&self, err: &CallError) -> PolicyAction {
        if err.is_consequential() {
            debug!(target: "Call/Failure", "Ignoring consequential error: {err}");
            return PolicyAction::Ignored;
        }
        match err.class() {
            ErrorClass::Protocol => {
                warn!(target: "Call/Failure", "{err}");
                PolicyAction::Dropped
            }
            ErrorClass::Transport | ErrorClass::Negotiation | ErrorClass::Device => self.abort(err),
        }
    }

    /// Log, show and tear the call down.
    pub fn abort(&self, err: &CallError) -> PolicyAction {
        if self.is_halted() {
            debug!(target: "Call/Failure", "Call already stopping, not reporting: {err}");
            return PolicyAction::Ignored;
        }
        let reference = self.report(err);
        if self.signals.send(SessionSignal::Teardown(TeardownReason::Failure)).is_err() {
            debug!(target: "Call/Failure", "Session loop gone, teardown request dropped");
        }
        PolicyAction::Aborted { reference }
    }

    /// Log and show without stopping the call.
    pub fn notify(&self, err: &CallError) -> PolicyAction {
        let reference = self.report(err);
        PolicyAction::Notified { reference }
    }

    fn report(&self, err: &CallError) -> String {
        let reference = new_reference();
        error!(target: "Call/Failure", "[{reference}] {err}");
        self.view.show_error(&err.notice(), &reference);
        reference
    }
}
