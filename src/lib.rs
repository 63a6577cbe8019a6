//! COPYRIGHT REGISTRATION SCRAPER
//! Keeps one JSON dataset per keyword in sync with the Guangdong copyright announcement
//! search, exports the datasets to spreadsheets and publishes them as a tagged release.

mod error;
mod macros;

pub mod cli;
pub mod config;
pub mod delay;
pub mod export;
pub mod parse;
pub mod process;
pub mod publish;
pub mod record;
pub mod request;

use chrono::NaiveDate;

pub use error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "https://www.gd-copyright.cn/gdbq/show/copyright/anno/z11/";
pub const DEFAULT_KEYWORDS: [&str; 2] = ["奥飞", "原创动力"];
pub const DEFAULT_ARCHIVE: &str = "copyright_data.zip";
/// Start of the window when nothing was stored yet.
pub const EPOCH_DATE: &str = "1970-01-01";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Retries after the first attempt of a page request.
pub const MAX_RETRIES: u32 = 100;
pub const DELAY_MEAN_SECS: f64 = 10.0;
pub const DELAY_STD_DEV_SECS: f64 = 5.0;
/// Largest page count a status line may report before the keyword is refused.
pub const MAX_PAGES: usize = 10_000;

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|_| Error::InvalidDate(s.into()))
}
