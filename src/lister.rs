use anyhow::{Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::stage::{SendResult, Stage};
use crate::types::error::BcrmError;
use crate::types::{CustomerId, CustomerPage, DeletionStatistics};

/// What the lister observed while enumerating the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingSummary {
    pub listed: u64,
    pub pages: u32,
    /// Total reported by the remote on the first page, if any.
    pub reported_total: Option<u64>,
}

/// Produces every customer ID present in the store, page by page.
///
/// The lister is the first stage in the deletion pipeline:
///
/// ```text
/// CustomerLister → Batcher → CustomerDeleter workers (MPMC) → Terminator
/// ```
///
/// It has no `receiver` channel and writes listed IDs to `stage.sender`.
/// Each page fetch is admitted by the rate governor. Retriable failures are
/// retried with the configured backoff; anything else aborts the listing.
pub struct CustomerLister {
    stage: Stage<(), CustomerId>,
}

impl CustomerLister {
    pub fn new(stage: Stage<(), CustomerId>) -> Self {
        Self { stage }
    }

    /// Enumerate all customers. Stops after a page shorter than the page
    /// size, an empty page, or a page reporting no further pages.
    pub async fn list_target(&self) -> Result<ListingSummary> {
        debug!("list customers has started.");

        let page_size = self.stage.config.page_size;
        let mut summary = ListingSummary::default();
        let mut page: u32 = 1;

        loop {
            if self.stage.cancellation_token.is_cancelled() {
                info!(page = page, "customer listing has been cancelled.");
                return Err(anyhow!(BcrmError::Cancelled));
            }

            let customer_page = self.fetch_page(page).await?;
            summary.pages = page;
            if page == 1 {
                summary.reported_total = customer_page.total;
            }

            let page_len = customer_page.ids.len();
            debug!(page = page, count = page_len, "customer page listed.");

            for id in customer_page.ids {
                if self.stage.send(id).await? == SendResult::Closed {
                    debug!("downstream closed, customer listing stopped.");
                    return Ok(summary);
                }
                summary.listed += 1;
            }

            if is_last_page(page_len, page_size, customer_page.has_more) {
                break;
            }
            page += 1;
        }

        self.stage
            .send_stats(DeletionStatistics::CandidatesListed(summary.listed))
            .await;
        debug!(
            listed = summary.listed,
            pages = summary.pages,
            "list customers has been completed."
        );

        Ok(summary)
    }

    async fn fetch_page(&self, page: u32) -> Result<CustomerPage> {
        let retry_config = self.stage.config.retry_config;
        let mut attempt: u32 = 0;
        let mut rate_limited = false;

        loop {
            attempt += 1;

            if attempt > 1 && !rate_limited {
                let delay = retry_config.backoff_before_attempt(attempt);
                if !self.stage.backoff(delay).await {
                    return Err(anyhow!(BcrmError::Cancelled));
                }
            }
            if !self.stage.admit().await {
                return Err(anyhow!(BcrmError::Cancelled));
            }

            match self
                .stage
                .target
                .list_customers(page, self.stage.config.page_size)
                .await
            {
                Ok(customer_page) => return Ok(customer_page),
                Err(e) if e.is_retryable() && attempt < retry_config.max_attempts => {
                    warn!(
                        page = page,
                        attempt = attempt,
                        error = e.to_string(),
                        "list customers failed, retrying."
                    );
                    self.stage.set_warning();
                    rate_limited = match e.retry_after() {
                        Some(retry_after) => {
                            self.stage.governor.suspend(retry_after);
                            true
                        }
                        None => false,
                    };
                }
                Err(e) => {
                    error!(
                        page = page,
                        attempt = attempt,
                        error = e.to_string(),
                        "list customers failed."
                    );
                    return Err(anyhow!(BcrmError::Api(format!(
                        "listing page {page} failed after {attempt} attempt(s): {e}"
                    ))));
                }
            }
        }
    }
}

fn is_last_page(page_len: usize, page_size: u16, has_more: Option<bool>) -> bool {
    page_len == 0 || page_len < page_size as usize || has_more == Some(false)
}
