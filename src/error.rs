use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    ParseMissingSelector(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Page {page} answered with non-retryable status {status}")]
    HttpStatus { page: usize, status: StatusCode },
    #[error("Page {page} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        page: usize,
        attempts: u32,
        last: String,
    },

    #[error("`{keyword}` reports {total_pages} pages, more than the {max} allowed")]
    TooManyPages {
        keyword: String,
        total_pages: usize,
        max: usize,
    },

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Xlsx Error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("Zip Error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("`{program} {args}` exited with {status}: {stderr}")]
    Command {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
