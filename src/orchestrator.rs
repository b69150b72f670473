//! Turn orchestration: one conversational turn from clip to history
//!
//! The orchestrator is an explicit session object owning the history,
//! its store, and the transcript view. A turn is split into an
//! explicit three-step protocol so the race between an in-flight
//! submission and a reset (or a newer recording) is decided by a
//! generation counter rather than left undefined:
//!
//! 1. [`TurnOrchestrator::begin_turn`] issues a ticket carrying the
//!    current generation and a history snapshot,
//! 2. [`GatewayClient::submit`] performs the single network round
//!    trip (no retries, no client-side timeout),
//! 3. [`TurnOrchestrator::complete_turn`] appends and persists the
//!    pair — unless the ticket has gone stale, in which case the
//!    result is discarded.
//!
//! History mutation and persistence happen before the caller starts
//! playback, so a crash during playback never loses a completed turn.

use serde::Deserialize;

use crate::history::{ConversationHistory, HistoryStore, Message};
use crate::voice::AudioClip;
use crate::{Error, Result};

/// Renders messages to wherever the user is looking
pub trait TranscriptView {
    /// Render one user message
    fn show_user(&mut self, text: &str);

    /// Render one assistant message
    fn show_assistant(&mut self, text: &str);

    /// Remove everything rendered so far
    fn clear(&mut self);
}

/// Transcript view that prints to stdout
#[derive(Debug, Default)]
pub struct TerminalTranscript;

impl TranscriptView for TerminalTranscript {
    fn show_user(&mut self, text: &str) {
        println!("you: {text}");
    }

    fn show_assistant(&mut self, text: &str) {
        println!("assistant: {text}");
    }

    fn clear(&mut self) {
        println!("--- conversation cleared ---");
    }
}

/// The text pair returned by the gateway for one turn
#[derive(Debug, Clone, Deserialize)]
pub struct TurnResult {
    pub user: String,
    pub bot: String,
}

/// Error body returned by the gateway
#[derive(Deserialize)]
struct GatewayErrorBody {
    error: String,
}

/// Token for one in-flight submission
///
/// Carries the generation at issue time plus the serialized history
/// snapshot taken at the same moment (never re-read later).
#[derive(Debug)]
pub struct TurnTicket {
    generation: u64,
    snapshot: String,
}

impl TurnTicket {
    /// The serialized history snapshot for the request body
    #[must_use]
    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }
}

/// HTTP client for submitting turns to the gateway
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    /// Create a client for the gateway at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Submit one turn: exactly one awaited round trip
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when the request fails, the status
    /// is not success, or the body doesn't parse as a turn result
    pub async fn submit(&self, clip: &AudioClip, ticket: &TurnTicket) -> Result<TurnResult> {
        let part = reqwest::multipart::Part::bytes(clip.bytes.clone())
            .file_name("clip.wav")
            .mime_str(&clip.content_type)
            .map_err(|e| Error::Network(format!("invalid clip content type: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("history", ticket.snapshot.clone());

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(format!("gateway request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<GatewayErrorBody>()
                .await
                .map_or_else(|_| status.to_string(), |body| body.error);
            return Err(Error::Network(format!("gateway error: {detail}")));
        }

        response
            .json::<TurnResult>()
            .await
            .map_err(|e| Error::Network(format!("malformed turn result: {e}")))
    }
}

/// Sequences turns and maintains the history invariants
pub struct TurnOrchestrator<V: TranscriptView> {
    history: ConversationHistory,
    store: HistoryStore,
    view: V,
    generation: u64,
}

impl<V: TranscriptView> TurnOrchestrator<V> {
    /// Create an orchestrator over a store and a view
    #[must_use]
    pub fn new(store: HistoryStore, view: V) -> Self {
        Self {
            history: ConversationHistory::new(),
            store,
            view,
            generation: 0,
        }
    }

    /// The current in-memory history
    #[must_use]
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Load persisted history and render it in order
    ///
    /// # Errors
    ///
    /// Returns error if the persisted file exists but cannot be read
    pub fn load_history(&mut self) -> Result<()> {
        self.history = self.store.load()?;
        for message in self.history.messages() {
            match message.role {
                crate::history::Role::User => self.view.show_user(&message.content),
                crate::history::Role::Assistant => self.view.show_assistant(&message.content),
            }
        }
        tracing::debug!(messages = self.history.len(), "history loaded");
        Ok(())
    }

    /// Start a turn: bump the generation and snapshot the history
    ///
    /// Starting a new turn invalidates any ticket still in flight.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be serialized
    pub fn begin_turn(&mut self) -> Result<TurnTicket> {
        self.generation += 1;
        let snapshot = serde_json::to_string(self.history.messages())?;
        Ok(TurnTicket {
            generation: self.generation,
            snapshot,
        })
    }

    /// Reconcile a submission result with the history
    ///
    /// Returns the assistant text to speak, or `None` when the ticket
    /// went stale (a reset or newer recording intervened) and the
    /// result was discarded. On a failed submission the history and
    /// transcript are left untouched.
    ///
    /// # Errors
    ///
    /// Propagates the submission failure, or a persistence failure
    pub fn complete_turn(
        &mut self,
        ticket: &TurnTicket,
        outcome: Result<TurnResult>,
    ) -> Result<Option<String>> {
        let result = outcome?;

        if ticket.generation != self.generation {
            tracing::warn!(
                ticket_generation = ticket.generation,
                current_generation = self.generation,
                "discarding stale turn result"
            );
            return Ok(None);
        }

        self.view.show_user(&result.user);
        self.view.show_assistant(&result.bot);

        self.history.push_turn(&result.user, &result.bot);
        self.store.save(&self.history)?;

        Ok(Some(result.bot))
    }

    /// Run one full turn against the gateway
    ///
    /// # Errors
    ///
    /// Returns error on submission or persistence failure
    pub async fn run_turn(
        &mut self,
        gateway: &GatewayClient,
        clip: &AudioClip,
    ) -> Result<Option<String>> {
        let ticket = self.begin_turn()?;
        let outcome = gateway.submit(clip, &ticket).await;
        self.complete_turn(&ticket, outcome)
    }

    /// Clear in-memory history, persisted history, and the transcript
    ///
    /// Any in-flight submission is invalidated; the caller cancels
    /// speech playback.
    ///
    /// # Errors
    ///
    /// Returns error if the persisted file cannot be removed
    pub fn reset_conversation(&mut self) -> Result<()> {
        self.generation += 1;
        self.history.clear();
        self.store.clear()?;
        self.view.clear();
        tracing::info!("conversation reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;

    /// View that records calls for assertions
    #[derive(Default)]
    struct RecordingView {
        lines: Vec<String>,
        cleared: usize,
    }

    impl TranscriptView for RecordingView {
        fn show_user(&mut self, text: &str) {
            self.lines.push(format!("user:{text}"));
        }

        fn show_assistant(&mut self, text: &str) {
            self.lines.push(format!("assistant:{text}"));
        }

        fn clear(&mut self) {
            self.lines.clear();
            self.cleared += 1;
        }
    }

    fn orchestrator_in(dir: &tempfile::TempDir) -> TurnOrchestrator<RecordingView> {
        let store = HistoryStore::new(dir.path().join("history.json"));
        TurnOrchestrator::new(store, RecordingView::default())
    }

    fn ok_result(user: &str, bot: &str) -> Result<TurnResult> {
        Ok(TurnResult {
            user: user.to_string(),
            bot: bot.to_string(),
        })
    }

    #[test]
    fn successful_turn_renders_persists_and_returns_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator_in(&dir);

        let ticket = orch.begin_turn().unwrap();
        assert_eq!(ticket.snapshot(), "[]");

        let spoken = orch
            .complete_turn(&ticket, ok_result("Hello", "Hi there"))
            .unwrap();
        assert_eq!(spoken.as_deref(), Some("Hi there"));

        // Rendered user first, then assistant
        assert_eq!(orch.view.lines, vec!["user:Hello", "assistant:Hi there"]);

        // Appended as a pair and persisted before the caller speaks
        assert_eq!(orch.history().len(), 2);
        assert!(orch.history().is_well_paired());
        let reloaded = orch.store.load().unwrap();
        assert_eq!(reloaded, *orch.history());
    }

    #[test]
    fn snapshot_reflects_history_at_begin_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator_in(&dir);

        let first = orch.begin_turn().unwrap();
        orch.complete_turn(&first, ok_result("Hello", "Hi there"))
            .unwrap();

        let second = orch.begin_turn().unwrap();
        let snapshot: Vec<Message> = serde_json::from_str(second.snapshot()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[0].content, "Hello");
    }

    #[test]
    fn failed_submission_leaves_everything_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator_in(&dir);

        let ticket = orch.begin_turn().unwrap();
        orch.complete_turn(&ticket, ok_result("Hello", "Hi there"))
            .unwrap();
        let before = orch.history().clone();

        let ticket = orch.begin_turn().unwrap();
        let outcome = orch.complete_turn(
            &ticket,
            Err(Error::Network("gateway error: boom".to_string())),
        );
        assert!(outcome.is_err());

        assert_eq!(*orch.history(), before);
        assert_eq!(orch.store.load().unwrap(), before);
        assert_eq!(orch.view.lines.len(), 2);
    }

    #[test]
    fn reset_discards_in_flight_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator_in(&dir);

        let ticket = orch.begin_turn().unwrap();
        orch.reset_conversation().unwrap();

        // The response arrives after the reset: it must not resurrect
        // the turn into the now-empty history
        let spoken = orch
            .complete_turn(&ticket, ok_result("stale", "reply"))
            .unwrap();
        assert!(spoken.is_none());
        assert!(orch.history().is_empty());
        assert!(orch.store.load().unwrap().is_empty());
    }

    #[test]
    fn newer_recording_invalidates_older_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator_in(&dir);

        let stale = orch.begin_turn().unwrap();
        let fresh = orch.begin_turn().unwrap();

        let spoken = orch
            .complete_turn(&stale, ok_result("old", "old reply"))
            .unwrap();
        assert!(spoken.is_none());
        assert!(orch.history().is_empty());

        let spoken = orch
            .complete_turn(&fresh, ok_result("new", "new reply"))
            .unwrap();
        assert_eq!(spoken.as_deref(), Some("new reply"));
        assert_eq!(orch.history().len(), 2);
    }

    #[test]
    fn reset_clears_memory_store_and_view() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator_in(&dir);

        let ticket = orch.begin_turn().unwrap();
        orch.complete_turn(&ticket, ok_result("Hello", "Hi there"))
            .unwrap();
        assert!(orch.store.path().exists());

        orch.reset_conversation().unwrap();

        assert!(orch.history().is_empty());
        assert!(!orch.store.path().exists());
        assert!(orch.view.lines.is_empty());
        assert_eq!(orch.view.cleared, 1);
    }

    #[test]
    fn load_renders_persisted_messages_in_order() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut orch = orchestrator_in(&dir);
            let ticket = orch.begin_turn().unwrap();
            orch.complete_turn(&ticket, ok_result("Hello", "Hi there"))
                .unwrap();
        }

        // Fresh session over the same store
        let mut orch = orchestrator_in(&dir);
        orch.load_history().unwrap();
        assert_eq!(orch.view.lines, vec!["user:Hello", "assistant:Hi there"]);
        assert_eq!(orch.history().len(), 2);
    }
}
