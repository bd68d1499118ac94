//! In-process stand-ins for the scraping proxy and completion service.

use crate::error::{AnswerError, ScrapeError};
use crate::llm::Answerer;
use crate::scraper::ContentSource;
use crate::session::ApiKey;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct FakeScraper {
    result: Result<String, ScrapeError>,
    pub calls: AtomicUsize,
}

impl FakeScraper {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: ScrapeError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ContentSource for FakeScraper {
    async fn scrape(&self, _url: &str) -> Result<String, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Answers with `"{question} => {content}"`, or fails with a fixed error.
pub struct FakeAnswerer {
    failure: Option<AnswerError>,
    pub calls: AtomicUsize,
}

impl FakeAnswerer {
    pub fn echo() -> Arc<Self> {
        Arc::new(Self {
            failure: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: AnswerError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(err),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Answerer for FakeAnswerer {
    async fn answer(
        &self,
        question: &str,
        content: &str,
        _credentials: &ApiKey,
    ) -> Result<String, AnswerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(format!("{} => {}", question, content)),
        }
    }
}
