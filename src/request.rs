use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::{Error, Result, DATE_FORMAT};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// One search against the announcement endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub keyword: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// 1-based.
    pub page: usize,
}

impl SearchQuery {
    pub fn with_page(&self, page: usize) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    /// Form body expected by the endpoint. Unused filters are sent empty.
    pub fn form_fields(&self) -> [(&'static str, String); 6] {
        [
            ("workname", String::new()),
            ("copyrightName", self.keyword.clone()),
            ("registerNum", String::new()),
            ("startDate", self.start_date.format(DATE_FORMAT).to_string()),
            ("endDate", self.end_date.format(DATE_FORMAT).to_string()),
            ("pageNum", self.page.to_string()),
        ]
    }
}

/// Anything that can answer a [`SearchQuery`] with the markup of a result page.
pub trait PageSource {
    fn fetch_page(&self, query: &SearchQuery) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Pause before retry number `retry` (1-based): doubles every time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::MAX_RETRIES,
            initial_backoff: Duration::from_millis(300),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Posts search forms to the announcement endpoint, retrying transient failures.
/// No request timeout is set, a stalled request waits until the server gives up.
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    endpoint: Url,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(endpoint: &str, retry: RetryPolicy) -> Result<Self> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = Client::builder()
            .default_headers(browser_headers(&endpoint)?)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            retry,
        })
    }

    async fn fetch_once(&self, query: &SearchQuery) -> Result<String> {
        debug!("POST {} page {}", self.endpoint, query.page);
        let res = self
            .client
            .post(self.endpoint.clone())
            .form(&query.form_fields())
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                page: query.page,
                status,
            });
        }
        Ok(res.text().await?)
    }

    fn is_retryable(error: &Error) -> bool {
        match error {
            Error::Reqwest(e) => {
                e.is_connect() || e.is_request() || e.is_body() || e.is_timeout()
            }
            Error::HttpStatus { status, .. } => {
                matches!(status.as_u16(), 408 | 413 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

impl PageSource for Fetcher {
    async fn fetch_page(&self, query: &SearchQuery) -> Result<String> {
        let mut retries = 0;
        loop {
            match self.fetch_once(query).await {
                Ok(html) => return Ok(html),
                Err(e) if Self::is_retryable(&e) => {
                    if retries >= self.retry.max_retries {
                        return Err(Error::RetriesExhausted {
                            page: query.page,
                            attempts: retries + 1,
                            last: e.to_string(),
                        });
                    }
                    retries += 1;
                    let backoff = self.retry.backoff(retries);
                    warn!(
                        "Page {} failed (retry {}/{}): {}. Retrying in {:?}",
                        query.page, retries, self.retry.max_retries, e, backoff
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn browser_headers(endpoint: &Url) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("iframe"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));

    let invalid = |_: header::InvalidHeaderValue| {
        Error::Config(format!("Endpoint `{endpoint}` can't be used as a header"))
    };
    headers.insert(
        header::REFERER,
        HeaderValue::from_str(endpoint.as_str()).map_err(invalid)?,
    );
    headers.insert(
        header::ORIGIN,
        HeaderValue::from_str(&endpoint.origin().ascii_serialization()).map_err(invalid)?,
    );
    Ok(headers)
}

/// Parses the announcement endpoint. Only absolute `http`/`https` URLs with a host are
/// accepted, anything else has no origin to send.
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid ENDPOINT `{raw}`: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(Error::Config(format!(
            "Invalid ENDPOINT `{raw}`: expected an http(s) URL"
        )));
    }
    Ok(url)
}
