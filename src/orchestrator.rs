use crate::config::DuplicatePolicy;
use crate::llm::Answerer;
use crate::scraper::ContentSource;
use crate::session::Session;
use serde::Serialize;
use std::sync::Arc;

/// How the assistant message of a turn came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// The model answered from the scraped page.
    Answer,
    /// The scrape failed; the model answered from the scrape diagnostic.
    ScrapeDegraded,
    /// The completion call failed; the message is its diagnostic.
    AnswerDegraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingInput,
    MissingCredentials,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered { kind: ResponseKind, response: String },
    Skipped(SkipReason),
}

impl TurnOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, TurnOutcome::Answered { .. })
    }
}

pub struct Orchestrator {
    scraper: Arc<dyn ContentSource>,
    answerer: Arc<dyn Answerer>,
    policy: DuplicatePolicy,
}

impl Orchestrator {
    pub fn new(
        scraper: Arc<dyn ContentSource>,
        answerer: Arc<dyn Answerer>,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            scraper,
            answerer,
            policy,
        }
    }

    /// Runs one turn against `session`. Never fails: collaborator failures
    /// become the assistant message, and the transcript grows by exactly two
    /// messages or not at all.
    pub async fn handle_turn(&self, session: &mut Session, url: &str, question: &str) -> TurnOutcome {
        let url = url.trim();
        if url.is_empty() || question.trim().is_empty() {
            return TurnOutcome::Skipped(SkipReason::MissingInput);
        }

        let Some(credentials) = session.credentials.clone() else {
            tracing::warn!(session = %session.id, "Turn rejected: no API key configured");
            return TurnOutcome::Skipped(SkipReason::MissingCredentials);
        };

        if self.policy == DuplicatePolicy::Guarded && session.transcript.last_turn_answers(question) {
            tracing::debug!(session = %session.id, "Skipping resubmitted question");
            return TurnOutcome::Skipped(SkipReason::Duplicate);
        }

        tracing::info!(session = %session.id, url = %url, "Starting turn");

        let (content, scrape_failed) = match self.scraper.scrape(url).await {
            Ok(content) => (content, false),
            Err(err) => {
                tracing::warn!(session = %session.id, url = %url, error = %err, "Scrape failed");
                (err.to_string(), true)
            }
        };

        let (response, kind) = match self.answerer.answer(question, &content, &credentials).await {
            Ok(text) if scrape_failed => (text, ResponseKind::ScrapeDegraded),
            Ok(text) => (text, ResponseKind::Answer),
            Err(err) => {
                tracing::warn!(session = %session.id, error = %err, "Answer generation failed");
                (err.to_string(), ResponseKind::AnswerDegraded)
            }
        };

        session.transcript.push_turn(question, response.clone());
        tracing::info!(
            session = %session.id,
            kind = ?kind,
            messages = session.transcript.len(),
            "Turn completed"
        );

        TurnOutcome::Answered { kind, response }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnswerError, ScrapeError};
    use crate::session::ApiKey;
    use crate::testing::{FakeAnswerer, FakeScraper};
    use crate::transcript::Role;
    use std::sync::atomic::Ordering;

    fn session_with_key() -> Session {
        Session::new(ApiKey::new("sk-test"))
    }

    #[tokio::test]
    async fn answered_turn_appends_user_then_assistant() {
        let orchestrator = Orchestrator::new(
            FakeScraper::ok("page text"),
            FakeAnswerer::echo(),
            DuplicatePolicy::Guarded,
        );
        let mut session = session_with_key();

        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "what?")
            .await;

        assert_eq!(
            outcome,
            TurnOutcome::Answered {
                kind: ResponseKind::Answer,
                response: "what? => page text".to_string()
            }
        );
        let messages = session.transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "what?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "what? => page text");
    }

    #[tokio::test]
    async fn n_turns_alternate_starting_with_user() {
        let orchestrator = Orchestrator::new(
            FakeScraper::ok("text"),
            FakeAnswerer::echo(),
            DuplicatePolicy::Guarded,
        );
        let mut session = session_with_key();

        for i in 0..4 {
            let outcome = orchestrator
                .handle_turn(&mut session, "https://x.test", &format!("question {}", i))
                .await;
            assert!(outcome.is_answered());
        }

        let messages = session.transcript.messages();
        assert_eq!(messages.len(), 8);
        for (i, message) in messages.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(message.role, expected, "message {} has wrong role", i);
        }
    }

    #[tokio::test]
    async fn scrape_failure_feeds_diagnostic_to_answerer() {
        let answerer = FakeAnswerer::echo();
        let orchestrator = Orchestrator::new(
            FakeScraper::failing(ScrapeError::Status(503)),
            answerer.clone(),
            DuplicatePolicy::Guarded,
        );
        let mut session = session_with_key();

        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "q")
            .await;

        let TurnOutcome::Answered { kind, response } = outcome else {
            panic!("expected answered turn");
        };
        assert_eq!(kind, ResponseKind::ScrapeDegraded);
        assert!(response.contains("503"));
        assert_eq!(answerer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.transcript.len(), 2);
    }

    #[tokio::test]
    async fn answer_failure_becomes_single_assistant_message() {
        let orchestrator = Orchestrator::new(
            FakeScraper::ok("text"),
            FakeAnswerer::failing(AnswerError::Transport("connection refused".to_string())),
            DuplicatePolicy::Guarded,
        );
        let mut session = session_with_key();

        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "q")
            .await;

        assert!(matches!(
            outcome,
            TurnOutcome::Answered {
                kind: ResponseKind::AnswerDegraded,
                ..
            }
        ));
        let assistants: Vec<_> = session
            .transcript
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1);
        assert!(assistants[0].content.contains("connection refused"));
    }

    #[tokio::test]
    async fn unreachable_completion_service_still_yields_one_answer() {
        let config = crate::config::LlmConfig {
            api_base: "http://127.0.0.1:1/v1".to_string(),
            ..crate::config::LlmConfig::default()
        };
        let client = Arc::new(crate::llm::LLMClient::new(&config).expect("client"));
        let orchestrator =
            Orchestrator::new(FakeScraper::ok("text"), client, DuplicatePolicy::Guarded);
        let mut session = session_with_key();

        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "q")
            .await;

        let TurnOutcome::Answered { kind, response } = outcome else {
            panic!("expected answered turn");
        };
        assert_eq!(kind, ResponseKind::AnswerDegraded);
        assert!(response.starts_with("Error generating response:"));
        assert_eq!(session.transcript.len(), 2);
        assert_eq!(session.transcript.last().map(|m| m.role), Some(Role::Assistant));
    }

    #[tokio::test]
    async fn missing_credentials_makes_no_calls() {
        let scraper = FakeScraper::ok("text");
        let answerer = FakeAnswerer::echo();
        let orchestrator =
            Orchestrator::new(scraper.clone(), answerer.clone(), DuplicatePolicy::Guarded);
        let mut session = Session::new(None);

        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "q")
            .await;

        assert_eq!(outcome, TurnOutcome::Skipped(SkipReason::MissingCredentials));
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);
        assert_eq!(answerer.calls.load(Ordering::SeqCst), 0);
        assert!(session.transcript.is_empty());
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let scraper = FakeScraper::ok("text");
        let orchestrator =
            Orchestrator::new(scraper.clone(), FakeAnswerer::echo(), DuplicatePolicy::Guarded);
        let mut session = session_with_key();

        assert_eq!(
            orchestrator.handle_turn(&mut session, "  ", "q").await,
            TurnOutcome::Skipped(SkipReason::MissingInput)
        );
        assert_eq!(
            orchestrator.handle_turn(&mut session, "https://x.test", "").await,
            TurnOutcome::Skipped(SkipReason::MissingInput)
        );
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);
        assert!(session.transcript.is_empty());
    }

    #[tokio::test]
    async fn guarded_policy_ignores_resubmitted_question() {
        let scraper = FakeScraper::ok("text");
        let orchestrator =
            Orchestrator::new(scraper.clone(), FakeAnswerer::echo(), DuplicatePolicy::Guarded);
        let mut session = session_with_key();

        orchestrator
            .handle_turn(&mut session, "https://x.test", "same question")
            .await;
        let before = session.transcript.messages().to_vec();

        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "same question")
            .await;

        assert_eq!(outcome, TurnOutcome::Skipped(SkipReason::Duplicate));
        assert_eq!(session.transcript.messages(), before.as_slice());
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);

        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "a new question")
            .await;
        assert!(outcome.is_answered());
        assert_eq!(session.transcript.len(), 4);
    }

    #[tokio::test]
    async fn unguarded_policy_appends_duplicate_pair() {
        let orchestrator = Orchestrator::new(
            FakeScraper::ok("text"),
            FakeAnswerer::echo(),
            DuplicatePolicy::Unguarded,
        );
        let mut session = session_with_key();

        orchestrator
            .handle_turn(&mut session, "https://x.test", "same question")
            .await;
        let outcome = orchestrator
            .handle_turn(&mut session, "https://x.test", "same question")
            .await;

        assert!(outcome.is_answered());
        let messages = session.transcript.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], messages[2]);
        assert_eq!(messages[1], messages[3]);
    }
}
