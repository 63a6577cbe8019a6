use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "copyright-sync")]
#[command(about = "Sync, export and publish copyright registration announcements", long_about = None)]
pub struct Cli {
    /// Keyword to sync, repeat for several. Replaces KEYWORDS
    #[arg(short, long = "keyword", global = true)]
    pub keywords: Vec<String>,

    /// Last day of the crawl window (YYYY-MM-DD). Replaces END_DATE
    #[arg(long, global = true)]
    pub end_date: Option<NaiveDate>,

    /// Directory holding datasets and spreadsheets. Replaces DATA_DIR
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Search endpoint. Replaces ENDPOINT_URL
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Sync every keyword, export the datasets and publish a release
    Run {
        /// Log the release instead of committing and publishing it
        #[arg(long)]
        no_publish: bool,
    },

    /// Only sync the datasets
    Sync,

    /// Only export the stored datasets to spreadsheets
    Export,
}

impl Cli {
    /// Flags given on the command line win over the environment.
    pub fn apply(&self, settings: &mut Settings) {
        if !self.keywords.is_empty() {
            settings.keywords = self.keywords.clone();
        }
        if let Some(end_date) = self.end_date {
            settings.end_date = end_date;
        }
        if let Some(data_dir) = &self.data_dir {
            settings.data_dir = data_dir.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            settings.endpoint = endpoint.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "copyright-sync",
            "run",
            "--no-publish",
            "-k",
            "奥飞",
            "--keyword",
            "灵龙",
            "--end-date",
            "2018-12-31",
        ]);
        assert_eq!(cli.command, Commands::Run { no_publish: true });

        let mut settings = Settings::from_lookup(|_| None).unwrap();
        cli.apply(&mut settings);
        assert_eq!(settings.keywords, ["奥飞", "灵龙"]);
        assert_eq!(
            settings.end_date,
            NaiveDate::from_ymd_opt(2018, 12, 31).unwrap()
        );
        assert_eq!(settings.data_dir, PathBuf::from("."));
    }

    #[test]
    fn rejects_malformed_end_date() {
        let parsed = Cli::try_parse_from(["copyright-sync", "sync", "--end-date", "2018/12/31"]);
        assert!(parsed.is_err());
    }
}
