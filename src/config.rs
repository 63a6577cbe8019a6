use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};

use crate::delay::{RandomDelay, MAX_DELAY_SECS};
use crate::publish::GitPublisher;
use crate::request::{parse_endpoint, RetryPolicy};
use crate::{
    parse_date, Error, Result, DEFAULT_ARCHIVE, DEFAULT_ENDPOINT, DEFAULT_KEYWORDS,
    DELAY_MEAN_SECS, DELAY_STD_DEV_SECS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub keywords: Vec<String>,
    /// Last day of every crawl window, also names the release.
    pub end_date: NaiveDate,
    pub endpoint: String,
    /// Where datasets, spreadsheets and the archive live.
    pub data_dir: PathBuf,
    pub retry: RetryPolicy,
    pub delay_mean_secs: f64,
    pub delay_std_dev_secs: f64,
    pub archive_name: String,
    pub git_branch: String,
    pub git_identity: Option<(String, String)>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key/value source, unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let keywords = match lookup("KEYWORDS") {
            Some(raw) => split_keywords(&raw),
            None => DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        };

        let end_date = match lookup("END_DATE") {
            Some(raw) => parse_date(&raw)?,
            None => Local::now().date_naive(),
        };

        let max_retries = parse_var(&lookup, "MAX_RETRIES", crate::MAX_RETRIES)?;
        let initial_backoff_ms = parse_var(&lookup, "RETRY_BACKOFF_MS", 300u64)?;
        let max_backoff_ms = parse_var(&lookup, "RETRY_MAX_BACKOFF_MS", 30_000u64)?;

        let git_identity = match (lookup("GIT_USER_NAME"), lookup("GIT_USER_EMAIL")) {
            (Some(name), Some(email)) => Some((name, email)),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "GIT_USER_NAME and GIT_USER_EMAIL must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            keywords,
            end_date,
            endpoint: lookup("ENDPOINT_URL").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            data_dir: lookup("DATA_DIR").unwrap_or_else(|| ".".to_string()).into(),
            retry: RetryPolicy {
                max_retries,
                initial_backoff: Duration::from_millis(initial_backoff_ms),
                max_backoff: Duration::from_millis(max_backoff_ms),
            },
            delay_mean_secs: parse_var(&lookup, "DELAY_MEAN_SECS", DELAY_MEAN_SECS)?,
            delay_std_dev_secs: parse_var(&lookup, "DELAY_STD_DEV_SECS", DELAY_STD_DEV_SECS)?,
            archive_name: lookup("ARCHIVE_NAME").unwrap_or_else(|| DEFAULT_ARCHIVE.to_string()),
            git_branch: lookup("GIT_BRANCH").unwrap_or_else(|| "main".to_string()),
            git_identity,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.keywords.is_empty() {
            return Err(Error::Config("At least one keyword is required".to_string()));
        }
        parse_endpoint(&self.endpoint)?;
        if !(self.delay_mean_secs > 0.0 && self.delay_mean_secs <= MAX_DELAY_SECS) {
            return Err(Error::Config(format!(
                "DELAY_MEAN_SECS must be positive and at most {MAX_DELAY_SECS}"
            )));
        }
        if !(self.delay_std_dev_secs >= 0.0 && self.delay_std_dev_secs <= MAX_DELAY_SECS) {
            return Err(Error::Config(format!(
                "DELAY_STD_DEV_SECS must lie within 0..={MAX_DELAY_SECS}"
            )));
        }
        if self.retry.max_backoff.is_zero() {
            return Err(Error::Config(
                "RETRY_MAX_BACKOFF_MS must be positive".to_string(),
            ));
        }
        if self.archive_name.trim().is_empty() {
            return Err(Error::Config("ARCHIVE_NAME must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn random_delay(&self) -> RandomDelay {
        RandomDelay::new(self.delay_mean_secs, self.delay_std_dev_secs)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(&self.archive_name)
    }

    /// Runs `git`/`gh` from the working directory, the repository the datasets belong to.
    pub fn git_publisher(&self) -> GitPublisher {
        GitPublisher {
            repo_dir: PathBuf::from("."),
            branch: self.git_branch.clone(),
            identity: self.git_identity.clone(),
        }
    }
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split([',', '，'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid {key} value: `{raw}`"))),
        None => Ok(default),
    }
}
