//! API client
//!
//! Pages through the market-data endpoints with a fresh access token on every
//! request, collecting raw records.

use super::types::{Endpoint, FetchError, Page, PAGINATION_KEY};
use crate::auth::AuthService;
use crate::cancel::Cancellation;
use crate::error::{Error, Result};
use crate::http::{RateLimitedExecutor, RequestConfig};
use crate::types::{JsonValue, Record, SyncParams};
use futures::stream::{self, StreamExt};
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of codes fetched at once
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Paginating client for one owner
#[derive(Debug, Clone)]
pub struct ApiClient {
    executor: RateLimitedExecutor,
    auth: Arc<AuthService>,
    concurrency: usize,
}

impl ApiClient {
    /// Create a client
    pub fn new(executor: RateLimitedExecutor, auth: Arc<AuthService>) -> Self {
        Self {
            executor,
            auth,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Set how many codes are fetched concurrently (at least one)
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The token service this client authenticates with
    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    /// The executor this client sends through
    pub fn executor(&self) -> &RateLimitedExecutor {
        &self.executor
    }

    /// Follow `pagination_key` until the endpoint stops returning one
    ///
    /// The same key returned twice in a row is a protocol violation and ends
    /// the fetch with a validation error instead of looping.
    pub async fn fetch_all(
        &self,
        endpoint: Endpoint,
        query: &[(&str, String)],
        cancel: &Cancellation,
    ) -> std::result::Result<Vec<Record>, FetchError> {
        let mut records = Vec::new();
        let mut key: Option<String> = None;
        let mut pages = 0u32;
        let mut attempts = 0u32;

        loop {
            let page = match self
                .fetch_page(endpoint, query, key.as_deref(), &mut attempts, cancel)
                .await
            {
                Ok(page) => page,
                Err(source) => {
                    return Err(FetchError::new(endpoint, records, source).with_attempts(attempts))
                }
            };
            pages += 1;
            debug!(
                endpoint = %endpoint,
                page = pages,
                records = page.records.len(),
                "fetched page"
            );
            records.extend(page.records);

            match page.next_key {
                None => break,
                Some(next) if key.as_deref() == Some(next.as_str()) => {
                    let source = Error::validation(format!(
                        "{endpoint} returned {PAGINATION_KEY} '{next}' twice in a row"
                    ));
                    return Err(FetchError::new(endpoint, records, source).with_attempts(attempts));
                }
                Some(next) => key = Some(next),
            }
        }

        Ok(records)
    }

    /// Listed-company records, one paged fetch per code (or one unfiltered fetch)
    pub async fn fetch_companies(
        &self,
        params: &SyncParams,
        cancel: &Cancellation,
    ) -> std::result::Result<Vec<Record>, FetchError> {
        self.fetch_per_code(Endpoint::ListedInfo, params, 1, cancel)
            .await
    }

    /// Daily quote records; codes are fetched concurrently, results keep input order
    pub async fn fetch_quotes(
        &self,
        params: &SyncParams,
        cancel: &Cancellation,
    ) -> std::result::Result<Vec<Record>, FetchError> {
        self.fetch_per_code(Endpoint::DailyQuotes, params, self.concurrency, cancel)
            .await
    }

    async fn fetch_per_code(
        &self,
        endpoint: Endpoint,
        params: &SyncParams,
        concurrency: usize,
        cancel: &Cancellation,
    ) -> std::result::Result<Vec<Record>, FetchError> {
        let dates = params.date_query();
        if params.codes.is_empty() {
            let records = self.fetch_all(endpoint, &dates, cancel).await?;
            info!(endpoint = %endpoint, records = records.len(), "fetch complete");
            return Ok(records);
        }

        let mut results = stream::iter(params.codes.iter().map(|code| {
            let mut query = Vec::with_capacity(dates.len() + 1);
            query.push(("code", code.clone()));
            query.extend(dates.iter().cloned());
            async move { self.fetch_all(endpoint, &query, cancel).await }
        }))
        .buffered(concurrency.max(1));

        let mut records = Vec::new();
        while let Some(result) = results.next().await {
            match result {
                Ok(batch) => records.extend(batch),
                Err(mut err) => {
                    records.append(&mut err.records);
                    err.records = records;
                    return Err(err);
                }
            }
        }

        info!(
            endpoint = %endpoint,
            codes = params.codes.len(),
            records = records.len(),
            "fetch complete"
        );
        Ok(records)
    }

    /// One page, re-authenticating once if the access token is rejected
    ///
    /// `attempts` is set to the attempt count of the last page request sent.
    async fn fetch_page(
        &self,
        endpoint: Endpoint,
        query: &[(&str, String)],
        key: Option<&str>,
        attempts: &mut u32,
        cancel: &Cancellation,
    ) -> Result<Page> {
        *attempts = 0;
        let token = self.auth.get_access_token(cancel).await?;
        match self.get_page(endpoint, query, key, &token, attempts, cancel).await {
            Err(err) if err.is_unauthorized() => {
                warn!(endpoint = %endpoint, "access token rejected, re-authenticating");
                self.auth.clear_tokens().await;
                let token = self.auth.get_access_token(cancel).await?;
                self.get_page(endpoint, query, key, &token, attempts, cancel)
                    .await
                    .map_err(|err| {
                        if err.is_unauthorized() {
                            Error::auth_caused_by(
                                format!("{endpoint} rejected a freshly issued access token"),
                                err,
                            )
                        } else {
                            err
                        }
                    })
            }
            other => other,
        }
    }

    async fn get_page(
        &self,
        endpoint: Endpoint,
        query: &[(&str, String)],
        key: Option<&str>,
        token: &str,
        attempts: &mut u32,
        cancel: &Cancellation,
    ) -> Result<Page> {
        let mut request = RequestConfig::new().bearer(token);
        for (name, value) in query {
            request = request.query(*name, value.as_str());
        }
        if let Some(key) = key {
            request = request.query(PAGINATION_KEY, key);
        }

        let (body, sent) = self
            .executor
            .request_json_counted::<JsonValue>(Method::GET, endpoint.path(), &request, cancel)
            .await;
        *attempts = sent;
        Page::parse(endpoint, body?)
    }
}
