// crates/core/src/password.rs
//! Password retry state machine.
//!
//! ```text
//! Idle -> Prompting -> Submitting -> Idle        (accepted, or failed for another reason)
//!                           |
//!                           +------> Prompting  (wrong password, new error text)
//! ```
//!
//! Only one prompt is shown at a time. Documents submitted while a prompt is
//! outstanding are held here and released in FIFO order once it clears.

use std::collections::VecDeque;

use serde::Serialize;

use crate::document::Document;
use crate::error::TrackerError;

pub const RETRY_MESSAGE: &str = "Incorrect password, please try again";

/// The prompt a UI should be showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPrompt {
    pub local_id: String,
    pub filename: String,
    pub error: Option<String>,
    /// A password for this prompt is on its way to the server.
    pub submitting: bool,
}

#[derive(Debug, Clone)]
struct Prompt {
    local_id: String,
    error: Option<String>,
    document: Document,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Prompting(Prompt),
    Submitting(Prompt),
}

#[derive(Debug, Default)]
pub struct PasswordRetryFlow {
    state: State,
    /// Further documents that came back password-protected while a prompt
    /// was already showing.
    waiting: VecDeque<Prompt>,
    deferred: VecDeque<(String, Document)>,
    draining: bool,
}

impl PasswordRetryFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A prompt is showing or queued.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self.state, State::Idle) || !self.waiting.is_empty()
    }

    /// New uploads must wait their turn.
    pub fn should_defer(&self) -> bool {
        self.is_outstanding() || self.draining || !self.deferred.is_empty()
    }

    pub fn pending(&self) -> Option<PendingPrompt> {
        let (prompt, submitting) = match &self.state {
            State::Idle => return None,
            State::Prompting(p) => (p, false),
            State::Submitting(p) => (p, true),
        };
        Some(PendingPrompt {
            local_id: prompt.local_id.clone(),
            filename: prompt.document.filename.clone(),
            error: prompt.error.clone(),
            submitting,
        })
    }

    /// Ask for a password for `local_id`.
    pub fn prompt(&mut self, local_id: String, error: Option<String>, document: Document) {
        let prompt = Prompt {
            local_id,
            error,
            document,
        };
        match self.state {
            State::Idle => {
                tracing::info!(local_id = %prompt.local_id, "password prompt opened");
                self.state = State::Prompting(prompt);
            }
            _ => self.waiting.push_back(prompt),
        }
    }

    /// `Prompting -> Submitting`. Returns the record and document to resend.
    pub fn begin_submit(&mut self) -> Result<(String, Document), TrackerError> {
        match std::mem::take(&mut self.state) {
            State::Idle => Err(TrackerError::NoPendingPrompt),
            State::Submitting(prompt) => {
                let filename = prompt.document.filename.clone();
                self.state = State::Submitting(prompt);
                Err(TrackerError::PromptBusy { filename })
            }
            State::Prompting(prompt) => {
                let out = (prompt.local_id.clone(), prompt.document.clone());
                self.state = State::Submitting(prompt);
                Ok(out)
            }
        }
    }

    /// Wrong password for `local_id`: back to `Prompting` with the server's
    /// explanation. Returns the error text now shown, or `None` when that
    /// prompt is no longer the one being submitted.
    pub fn rejected(&mut self, local_id: &str, message: Option<String>) -> Option<String> {
        match std::mem::take(&mut self.state) {
            State::Submitting(mut prompt) if prompt.local_id == local_id => {
                let message = message.unwrap_or_else(|| RETRY_MESSAGE.to_string());
                prompt.error = Some(message.clone());
                self.state = State::Prompting(prompt);
                Some(message)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// The resubmission for `local_id` settled one way or another; its
    /// prompt closes.
    pub fn resolve(&mut self, local_id: &str) {
        if matches!(&self.state, State::Submitting(p) if p.local_id == local_id) {
            tracing::info!(local_id, "password prompt resolved");
            self.advance();
        }
    }

    /// Abandon the showing prompt. Returns the record it belonged to.
    pub fn dismiss(&mut self) -> Result<String, TrackerError> {
        match &self.state {
            State::Idle => Err(TrackerError::NoPendingPrompt),
            State::Submitting(prompt) => Err(TrackerError::PromptBusy {
                filename: prompt.document.filename.clone(),
            }),
            State::Prompting(prompt) => {
                let local_id = prompt.local_id.clone();
                self.advance();
                Ok(local_id)
            }
        }
    }

    fn advance(&mut self) {
        self.state = match self.waiting.pop_front() {
            Some(next) => State::Prompting(next),
            None => State::Idle,
        };
    }

    pub fn defer(&mut self, local_id: String, document: Document) {
        tracing::debug!(local_id = %local_id, "upload deferred behind password prompt");
        self.deferred.push_back((local_id, document));
    }

    /// Become the drainer of deferred uploads. False when nothing is held,
    /// a prompt still blocks, or another drainer is running.
    pub fn claim_drain(&mut self) -> bool {
        if self.draining || self.is_outstanding() || self.deferred.is_empty() {
            return false;
        }
        self.draining = true;
        true
    }

    /// Next held upload for the drainer. `None` ends the drain, either
    /// because the queue is empty or because a new prompt opened.
    pub fn next_deferred(&mut self) -> Option<(String, Document)> {
        if self.is_outstanding() {
            self.draining = false;
            return None;
        }
        let next = self.deferred.pop_front();
        self.draining = next.is_some();
        next
    }

    /// The flow still owns bytes or a prompt for this record.
    pub fn holds(&self, local_id: &str) -> bool {
        let in_state = match &self.state {
            State::Idle => false,
            State::Prompting(p) | State::Submitting(p) => p.local_id == local_id,
        };
        in_state
            || self.waiting.iter().any(|p| p.local_id == local_id)
            || self.deferred.iter().any(|(id, _)| id == local_id)
    }

    /// Drop everything held for a removed record, including its prompt
    /// while a password for it is still on the wire.
    pub fn forget(&mut self, local_id: &str) {
        self.waiting.retain(|p| p.local_id != local_id);
        self.deferred.retain(|(id, _)| id != local_id);
        if matches!(
            &self.state,
            State::Prompting(p) | State::Submitting(p) if p.local_id == local_id
        ) {
            tracing::info!(local_id, "password prompt dropped with its record");
            self.advance();
        }
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> Document {
        Document::pdf(name, b"%PDF".to_vec())
    }

    #[test]
    fn test_wrong_password_loops_back_to_prompting() {
        let mut flow = PasswordRetryFlow::new();
        flow.prompt("L1".into(), Some("Password needed".into()), doc("a.pdf"));

        let (local_id, document) = flow.begin_submit().unwrap();
        assert_eq!(local_id, "L1");
        assert_eq!(document.filename, "a.pdf");
        assert!(flow.pending().unwrap().submitting);

        let shown = flow.rejected("L1", Some("Incorrect password".into()));
        assert_eq!(shown.as_deref(), Some("Incorrect password"));
        let pending = flow.pending().unwrap();
        assert!(!pending.submitting);
        assert_eq!(pending.error.as_deref(), Some("Incorrect password"));

        flow.begin_submit().unwrap();
        flow.resolve("L1");
        assert!(flow.pending().is_none());
        assert!(!flow.is_outstanding());
    }

    #[test]
    fn test_rejection_without_message_uses_default() {
        let mut flow = PasswordRetryFlow::new();
        flow.prompt("L1".into(), None, doc("a.pdf"));
        flow.begin_submit().unwrap();
        assert_eq!(flow.rejected("L1", None).as_deref(), Some(RETRY_MESSAGE));
    }

    #[test]
    fn test_begin_submit_guards() {
        let mut flow = PasswordRetryFlow::new();
        assert!(matches!(
            flow.begin_submit(),
            Err(TrackerError::NoPendingPrompt)
        ));

        flow.prompt("L1".into(), None, doc("a.pdf"));
        flow.begin_submit().unwrap();
        assert!(matches!(
            flow.begin_submit(),
            Err(TrackerError::PromptBusy { .. })
        ));
        assert!(matches!(flow.dismiss(), Err(TrackerError::PromptBusy { .. })));
    }

    #[test]
    fn test_one_prompt_at_a_time() {
        let mut flow = PasswordRetryFlow::new();
        flow.prompt("L1".into(), None, doc("a.pdf"));
        flow.prompt("L2".into(), None, doc("b.pdf"));
        assert_eq!(flow.pending().unwrap().local_id, "L1");

        assert_eq!(flow.dismiss().unwrap(), "L1");
        assert_eq!(flow.pending().unwrap().local_id, "L2");
        assert!(flow.holds("L2"));
        assert!(!flow.holds("L1"));
    }

    #[test]
    fn test_deferred_uploads_drain_in_order_after_prompt() {
        let mut flow = PasswordRetryFlow::new();
        flow.prompt("L1".into(), None, doc("a.pdf"));
        assert!(flow.should_defer());
        flow.defer("L2".into(), doc("b.pdf"));
        flow.defer("L3".into(), doc("c.pdf"));
        assert!(!flow.claim_drain());

        flow.begin_submit().unwrap();
        flow.resolve("L1");
        assert!(flow.should_defer());
        assert!(flow.claim_drain());
        assert!(!flow.claim_drain());

        assert_eq!(flow.next_deferred().unwrap().0, "L2");
        // L2 turned out to be protected as well: the drain pauses.
        flow.prompt("L2".into(), None, doc("b.pdf"));
        assert!(flow.next_deferred().is_none());
        assert_eq!(flow.deferred_len(), 1);

        flow.dismiss().unwrap();
        assert!(flow.claim_drain());
        assert_eq!(flow.next_deferred().unwrap().0, "L3");
        assert!(flow.next_deferred().is_none());
        assert!(!flow.should_defer());
    }

    #[test]
    fn test_forget_current_prompt() {
        let mut flow = PasswordRetryFlow::new();
        flow.prompt("L1".into(), None, doc("a.pdf"));
        flow.defer("L2".into(), doc("b.pdf"));
        flow.forget("L1");
        flow.forget("L2");
        assert!(!flow.is_outstanding());
        assert_eq!(flow.deferred_len(), 0);
    }

    #[test]
    fn test_forget_while_submitting_ignores_late_answer() {
        let mut flow = PasswordRetryFlow::new();
        flow.prompt("L1".into(), None, doc("a.pdf"));
        flow.prompt("L2".into(), None, doc("b.pdf"));
        flow.begin_submit().unwrap();

        flow.forget("L1");
        assert!(!flow.holds("L1"));
        assert_eq!(flow.pending().unwrap().local_id, "L2");

        // L2 is now being answered; the late verdict for L1 must not touch it.
        flow.begin_submit().unwrap();
        assert_eq!(flow.rejected("L1", Some("Incorrect password".into())), None);
        flow.resolve("L1");
        let pending = flow.pending().unwrap();
        assert_eq!(pending.local_id, "L2");
        assert!(pending.submitting);

        flow.resolve("L2");
        assert!(!flow.is_outstanding());
    }
}
