use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::Result;

/// One copyright registration entry as listed on the announcement page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Record {
    pub registration_num: String,
    pub registration_date: String,
    pub work_name: String,
    pub work_type: String,
    pub copyright_owner: String,
    pub creation_date: String,
    pub publication_date: String,
}

impl Record {
    /// Column titles of the exported sheet, in the same order as [`Record::fields`].
    pub const HEADERS: [&'static str; 7] = [
        "登记号",
        "登记日期",
        "作品名称",
        "作品类型",
        "著作权人",
        "创作完成日期",
        "首次发表日期",
    ];

    pub fn fields(&self) -> [&str; 7] {
        [
            self.registration_num.as_str(),
            self.registration_date.as_str(),
            self.work_name.as_str(),
            self.work_type.as_str(),
            self.copyright_owner.as_str(),
            self.creation_date.as_str(),
            self.publication_date.as_str(),
        ]
    }
}

/// Concatenates `prior` and `fresh`, keeps one record per `registration_num` and sorts
/// by `registration_date`.
///
/// A key keeps the position of its first occurrence but takes the value of its last one,
/// so freshly fetched records replace stored ones. The sort is stable, which makes merging
/// a dataset with itself a no-op.
pub fn merge_records(prior: Vec<Record>, fresh: Vec<Record>) -> Vec<Record> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(prior.len() + fresh.len());
    let mut merged: Vec<Record> = Vec::with_capacity(prior.len() + fresh.len());

    for record in prior.into_iter().chain(fresh) {
        match positions.get(&record.registration_num) {
            Some(&idx) => merged[idx] = record,
            None => {
                positions.insert(record.registration_num.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    merged.sort_by(|a, b| a.registration_date.cmp(&b.registration_date));
    merged
}

/// Registration date of the newest stored record, if any.
pub fn last_registration_date(records: &[Record]) -> Option<&str> {
    records.last().map(|r| r.registration_date.as_str())
}

/// Keyword keyed JSON files inside one directory.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, keyword: &str) -> PathBuf {
        self.dir.join(format!("{keyword}.json"))
    }

    pub async fn exists(&self, keyword: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(keyword)).await?)
    }

    /// Loads the dataset of `keyword`, or an empty one when no file was written yet.
    pub async fn load(&self, keyword: &str) -> Result<Vec<Record>> {
        let path = self.path_for(keyword);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No dataset at {}", path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replaces the dataset of `keyword` wholesale.
    /// Writes to a sibling file first and renames it over the old one.
    pub async fn save(&self, keyword: &str, records: &[Record]) -> Result<PathBuf> {
        let path = self.path_for(keyword);
        let tmp_path = self.dir.join(format!(".{keyword}.json.tmp"));

        fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec(records)?;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;

        Ok(path)
    }
}
