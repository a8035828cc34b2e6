//! Continuation-token pagination.
//!
//! [`PageSequence`] is a lazy, finite sequence of pages for one
//! (identifier, strategy) pair. Each `next()` issues at most one upstream
//! request; the sequence ends after an empty page, a null token, or an
//! abandoned call. Starting a new strategy means starting a new sequence.

use std::sync::Arc;
use tracing::debug;

use crate::model::ContinuationState;
use crate::retry::{CallAbandoned, RetryController};
use crate::source::{ReviewPage, ReviewSource, SortOrder};

/// Fetches single review pages through the retry controller.
#[derive(Clone)]
pub struct PaginatedFetcher {
    source: Arc<dyn ReviewSource>,
    retry: RetryController,
    page_size: usize,
}

impl PaginatedFetcher {
    pub fn new(source: Arc<dyn ReviewSource>, retry: RetryController, page_size: usize) -> Self {
        Self {
            source,
            retry,
            page_size: page_size.max(1),
        }
    }

    /// Fetch one page.
    pub async fn fetch_page(
        &self,
        identifier: &str,
        strategy: SortOrder,
        token: Option<&str>,
    ) -> Result<ReviewPage, CallAbandoned> {
        let label = format!("page {}/{}", identifier, strategy);
        let page_size = self.page_size;
        self.retry
            .call(&label, || {
                self.source.fetch_page(identifier, strategy, token, page_size)
            })
            .await
    }

    /// Start a fresh page sequence for `strategy` (token reset to null).
    pub fn pages<'a>(&'a self, identifier: &'a str, strategy: SortOrder) -> PageSequence<'a> {
        PageSequence {
            fetcher: self,
            identifier,
            state: ContinuationState::start(strategy, self.page_size),
            finished: false,
            pages: 0,
        }
    }
}

/// Lazy page sequence for one strategy.
pub struct PageSequence<'a> {
    fetcher: &'a PaginatedFetcher,
    identifier: &'a str,
    state: ContinuationState,
    finished: bool,
    pages: usize,
}

impl<'a> PageSequence<'a> {
    /// Fetch the next page, or `None` once the sequence is exhausted.
    ///
    /// An abandoned call is yielded once and ends the sequence.
    pub async fn next(&mut self) -> Option<Result<ReviewPage, CallAbandoned>> {
        if self.finished {
            return None;
        }

        let result = self
            .fetcher
            .fetch_page(self.identifier, self.state.strategy, self.state.token.as_deref())
            .await;

        match result {
            Ok(page) => {
                self.pages += 1;
                if page.is_last() {
                    debug!(
                        identifier = self.identifier,
                        strategy = %self.state.strategy,
                        pages = self.pages,
                        reviews = page.reviews.len(),
                        "Strategy exhausted"
                    );
                    self.finished = true;
                    self.state.token = None;
                } else {
                    self.state.token = page.next_token.clone();
                }
                Some(Ok(page))
            }
            Err(abandoned) => {
                self.finished = true;
                Some(Err(abandoned))
            }
        }
    }

    /// True once no further request will be issued.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pages successfully fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn state(&self) -> &ContinuationState {
        &self.state
    }
}
