use std::fs::File;
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tokio::process::Command;
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::{Error, Result};

/// Everything the release step needs to know about one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// `v<YYYYMMDD>` of the crawl end date.
    pub tag: String,
    pub commit_message: String,
    pub title: String,
    /// Dataset files committed to the repository.
    pub datasets: Vec<PathBuf>,
    /// Archive attached to the release.
    pub archive: PathBuf,
}

impl Release {
    pub fn new(end_date: NaiveDate, datasets: Vec<PathBuf>, archive: PathBuf) -> Self {
        let tag = release_tag(end_date);
        Self {
            commit_message: format!("自动更新版权数据 {tag}"),
            title: format!("数据发布 {tag}"),
            tag,
            datasets,
            archive,
        }
    }
}

pub fn release_tag(end_date: NaiveDate) -> String {
    format!("v{}", end_date.format("%Y%m%d"))
}

/// Zips `files` flat (by file name) into `archive`, replacing an older archive.
pub fn create_archive(files: &[PathBuf], archive: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(archive)?));

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Config(format!("`{}` has no file name", file.display())))?;
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(name, options)?;
        zip.write_all(&std::fs::read(file)?)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}

pub async fn create_archive_blocking(files: Vec<PathBuf>, archive: PathBuf) -> Result<PathBuf> {
    spawn_blocking(move || -> Result<PathBuf> {
        create_archive(&files, &archive)?;
        Ok(archive)
    })
    .await?
}

/// Ships a finished [`Release`] somewhere.
pub trait Publisher {
    fn publish(&self, release: &Release) -> impl Future<Output = Result<()>> + Send;
}

/// Commits the datasets, tags, pushes and creates a GitHub release with `git` and `gh`.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    pub repo_dir: PathBuf,
    pub branch: String,
    /// `(name, email)` set globally before committing when given.
    pub identity: Option<(String, String)>,
}

impl GitPublisher {
    async fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        debug!("Running `{} {}`", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Command {
                program: program.to_string(),
                args: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Publisher for GitPublisher {
    async fn publish(&self, release: &Release) -> Result<()> {
        if let Some((name, email)) = &self.identity {
            self.run("git", &["config", "--global", "user.email", email.as_str()])
                .await?;
            self.run("git", &["config", "--global", "user.name", name.as_str()])
                .await?;
        }

        let datasets: Vec<String> = release
            .datasets
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut add = vec!["add"];
        add.extend(datasets.iter().map(String::as_str));
        self.run("git", &add).await?;

        self.run("git", &["commit", "-m", release.commit_message.as_str()])
            .await?;
        self.run("git", &["tag", release.tag.as_str()]).await?;
        self.run("git", &["push", "origin", self.branch.as_str(), "--tags"])
            .await?;

        let archive = release.archive.to_string_lossy();
        self.run(
            "gh",
            &[
                "release",
                "create",
                release.tag.as_str(),
                &*archive,
                "-t",
                release.title.as_str(),
            ],
        )
        .await?;

        info!("Published release {}", release.tag);
        Ok(())
    }
}

/// Only logs what would have been published.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunPublisher;

impl Publisher for DryRunPublisher {
    async fn publish(&self, release: &Release) -> Result<()> {
        info!(
            "Dry run: would commit {} dataset(s) as `{}`, tag {} and release {} titled `{}`",
            release.datasets.len(),
            release.commit_message,
            release.tag,
            release.archive.display(),
            release.title
        );
        Ok(())
    }
}
