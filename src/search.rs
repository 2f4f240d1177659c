//! Bounded pagination over a remote collection

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{GctlError, Result};
use crate::models::{ResultPage, SearchQuery};

/// A searchable remote collection (Drive files, Gmail messages)
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    type Item: Send;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Largest page the remote API will return
    fn max_page_size(&self) -> usize;

    /// Fetch one page of results for `query`
    async fn fetch_page(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage<Self::Item>>;
}

/// Runs a search across pages, capping the total at `max_results`
pub struct PaginatedSearchClient<C> {
    collection: C,
}

impl<C: RemoteCollection> PaginatedSearchClient<C> {
    pub fn new(collection: C) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Collect results page by page.
    ///
    /// Any page failure aborts the whole search; items from earlier pages are
    /// discarded rather than returned as a truncated success.
    pub async fn search(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<C::Item>> {
        let max_page_size = self.collection.max_page_size().max(1);
        let mut accumulated: Vec<C::Item> = Vec::new();
        let mut token = query.page_token.clone();
        let mut page_number = 0usize;

        loop {
            let page_size = if query.is_bounded() {
                let remaining = query.max_results.saturating_sub(accumulated.len());
                if remaining == 0 {
                    break;
                }
                remaining.min(max_page_size)
            } else {
                max_page_size
            };

            page_number += 1;
            tracing::debug!(
                "Fetching {} page {} (size {})",
                self.collection.name(),
                page_number,
                page_size
            );

            let page = self
                .collection
                .fetch_page(&query.query, page_size, token.as_deref(), cancel)
                .await
                .map_err(|e| match e {
                    GctlError::RemoteError(remote) => {
                        GctlError::RemoteError(remote.on_page(page_number, token.as_deref()))
                    }
                    other => other,
                })?;

            accumulated.extend(page.items);
            token = page.next_page_token.filter(|t| !t.is_empty());

            if token.is_none() {
                break;
            }
        }

        if query.is_bounded() && accumulated.len() > query.max_results {
            accumulated.truncate(query.max_results);
        }

        tracing::debug!(
            "{} search returned {} results over {} pages",
            self.collection.name(),
            accumulated.len(),
            page_number
        );
        Ok(accumulated)
    }
}
