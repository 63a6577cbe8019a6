use std::collections::HashSet;

use chrono::{Local, NaiveDate};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::delay::RandomDelay;
use crate::export::export_all;
use crate::parse::{parse_page_blocking, ParsedPage};
use crate::publish::{create_archive_blocking, Publisher, Release};
use crate::record::{last_registration_date, merge_records, DatasetStore, Record};
use crate::request::{PageSource, SearchQuery};
use crate::{info_time, parse_date, Error, Result, EPOCH_DATE, MAX_PAGES};

/// Full run: sync every keyword, export every dataset, archive the spreadsheets and hand
/// the release to `publisher`. Any failure aborts the remaining steps.
pub async fn process_site<S, P>(settings: &Settings, source: S, publisher: &P) -> Result<()>
where
    S: PageSource,
    P: Publisher,
{
    let start_time = Local::now();
    let reports = sync_keywords(settings, source).await?;
    info_time!(
        start_time,
        "Finished syncing {} keywords ({} new records)",
        reports.len(),
        reports.iter().map(|r| r.new_records).sum::<usize>()
    );

    let store = DatasetStore::new(&settings.data_dir);
    let sheets = export_all(&store, &settings.keywords).await?;
    let archive = create_archive_blocking(sheets, settings.archive_path()).await?;
    info_time!("Archived spreadsheets to {}", archive.display());

    let mut datasets = Vec::with_capacity(settings.keywords.len());
    for keyword in &settings.keywords {
        if store.exists(keyword).await? {
            datasets.push(store.path_for(keyword));
        }
    }
    let release = Release::new(settings.end_date, datasets, archive);
    publisher.publish(&release).await?;
    info_time!(start_time, "Released {}", release.tag);

    Ok(())
}

/// Syncs every configured keyword against `source`.
pub async fn sync_keywords<S: PageSource>(
    settings: &Settings,
    source: S,
) -> Result<Vec<SyncReport>> {
    let store = DatasetStore::new(&settings.data_dir);
    let mut engine = SyncEngine::new(
        source,
        store,
        settings.random_delay(),
        settings.end_date,
    );
    engine.sync_all(&settings.keywords).await
}

/// Outcome of one keyword's sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub keyword: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_pages: usize,
    /// Records parsed from all fetched pages, duplicates included.
    pub fetched: usize,
    /// Records whose registration number was not stored before.
    pub new_records: usize,
    pub total_records: usize,
    /// Pages that had neither the results table nor the status line.
    pub missing_layout_pages: usize,
}

/// First day of the next crawl window.
///
/// One day before the newest stored registration date, so a day that was only partially
/// published during the previous run is fetched again. An empty dataset starts at the epoch.
pub fn window_start(prior: &[Record]) -> Result<NaiveDate> {
    match last_registration_date(prior) {
        Some(last) => {
            let last = parse_date(last)?;
            Ok(last.pred_opt().unwrap_or(last))
        }
        // No day subtracted here, the window opens on the epoch itself.
        None => parse_date(EPOCH_DATE),
    }
}

/// Incrementally syncs keyword datasets against a [`PageSource`].
pub struct SyncEngine<S> {
    source: S,
    store: DatasetStore,
    delay: RandomDelay,
    end_date: NaiveDate,
}

impl<S: PageSource> SyncEngine<S> {
    pub fn new(source: S, store: DatasetStore, delay: RandomDelay, end_date: NaiveDate) -> Self {
        Self {
            source,
            store,
            delay,
            end_date,
        }
    }

    /// Syncs every keyword in order. The first failure aborts the whole run.
    pub async fn sync_all(&mut self, keywords: &[String]) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            reports.push(self.sync_keyword(keyword).await?);
        }
        Ok(reports)
    }

    /// Loads the stored dataset, fetches everything registered since its newest record,
    /// merges and writes it back.
    ///
    /// Pages are fetched from the last one back to the second one after page 1 revealed
    /// the page count, with a random pause before each request. Nothing is written unless
    /// every page was fetched.
    pub async fn sync_keyword(&mut self, keyword: &str) -> Result<SyncReport> {
        let start_time = Local::now();

        let prior = self.store.load(keyword).await?;
        let prior_len = prior.len();
        let start_date = window_start(&prior)?;
        let end_date = self.end_date;
        info_time!(
            "Syncing `{}` from {} to {} ({} stored records)",
            keyword,
            start_date,
            end_date,
            prior_len
        );

        let query = SearchQuery {
            keyword: keyword.to_string(),
            start_date,
            end_date,
            page: 1,
        };
        let first = self.fetch_parsed(&query).await?;
        let total_pages = first.total_pages;
        if total_pages > MAX_PAGES {
            return Err(Error::TooManyPages {
                keyword: keyword.to_string(),
                total_pages,
                max: MAX_PAGES,
            });
        }
        let mut missing_layout_pages = usize::from(first.layout_missing());
        info_time!("`{}`: {} pages in window", keyword, total_pages);

        // From the last page down to page 2.
        let mut older_pages: Vec<Vec<Record>> = Vec::new();
        for page in (2..=total_pages).rev() {
            info_time!("`{}`: fetching page {}, {} remaining", keyword, page, page - 1);

            let pause = self.delay.next_delay();
            debug!("Waiting {:.2}s before page {}", pause.as_secs_f64(), page);
            sleep(pause).await;

            let parsed = self.fetch_parsed(&query.with_page(page)).await?;
            missing_layout_pages += usize::from(parsed.layout_missing());
            older_pages.push(parsed.records);
        }

        // Pages 2..=last in order, page 1 on the tail.
        let fresh: Vec<Record> = older_pages
            .into_iter()
            .rev()
            .flatten()
            .chain(first.records)
            .collect();
        let fetched = fresh.len();

        let prior_keys: HashSet<&str> = prior.iter().map(|r| r.registration_num.as_str()).collect();
        let new_records = fresh
            .iter()
            .map(|r| r.registration_num.as_str())
            .filter(|num| !prior_keys.contains(num))
            .collect::<HashSet<_>>()
            .len();

        let merged = merge_records(prior, fresh);
        let path = self.store.save(keyword, &merged).await?;
        info_time!(
            start_time,
            "Saved {} records ({} new) to {}",
            merged.len(),
            new_records,
            path.display()
        );

        Ok(SyncReport {
            keyword: keyword.to_string(),
            start_date,
            end_date,
            total_pages,
            fetched,
            new_records,
            total_records: merged.len(),
            missing_layout_pages,
        })
    }

    async fn fetch_parsed(&self, query: &SearchQuery) -> Result<ParsedPage> {
        let html = self.source.fetch_page(query).await?;
        let parsed = parse_page_blocking(html).await?;
        if parsed.layout_missing() {
            warn!(
                "`{}` page {}: results table and status line both missing, the site layout may have changed",
                query.keyword, query.page
            );
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::Error;

    /// Serves canned pages and remembers which ones were asked for.
    struct CannedPages {
        pages: HashMap<usize, String>,
        requested: Mutex<Vec<SearchQuery>>,
    }

    impl CannedPages {
        fn new(pages: impl IntoIterator<Item = (usize, String)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageSource for &CannedPages {
        async fn fetch_page(&self, query: &SearchQuery) -> Result<String> {
            self.requested.lock().unwrap().push(query.clone());
            self.pages
                .get(&query.page)
                .cloned()
                .ok_or(Error::RetriesExhausted {
                    page: query.page,
                    attempts: 1,
                    last: "no such page".into(),
                })
        }
    }

    fn record(num: &str, date: &str, name: &str) -> Record {
        Record {
            registration_num: num.into(),
            registration_date: date.into(),
            work_name: name.into(),
            ..Default::default()
        }
    }

    fn page_html(records: &[Record], total_pages: usize) -> String {
        let rows: String = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let cells: String = r.fields().iter().map(|f| format!("<td>{f}</td>")).collect();
                format!("<tr><td>{}</td>{cells}</tr>", i + 1)
            })
            .collect();
        format!(
            r#"<table id="tableabb"><tbody>{rows}</tbody></table>
            <span id="span_text">共{} 条记录  第1 页/共{total_pages} 页</span>"#,
            records.len()
        )
    }

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn window_starts_one_day_before_newest_record() {
        let prior = vec![record("A", "2021-05-01", "a"), record("B", "2021-05-10", "b")];
        assert_eq!(window_start(&prior).unwrap(), date("2021-05-09"));
    }

    #[test]
    fn empty_dataset_starts_at_epoch() {
        assert_eq!(window_start(&[]).unwrap(), date("1970-01-01"));
    }

    #[test]
    fn unreadable_stored_date_is_an_error() {
        let prior = vec![record("A", "10/05/2021", "a")];
        assert!(matches!(window_start(&prior), Err(Error::InvalidDate(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn merges_pages_into_stored_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        store
            .save(
                "奥飞",
                &[
                    record("A", "2020-01-01", "a"),
                    record("B", "2020-01-02", "b"),
                ],
            )
            .await
            .unwrap();

        let source = CannedPages::new([
            (1, page_html(&[record("B", "2020-01-02", "b updated")], 2)),
            (2, page_html(&[record("Z", "2019-12-31", "z")], 2)),
        ]);
        let mut engine = SyncEngine::new(
            &source,
            store.clone(),
            RandomDelay::seeded(10.0, 5.0, 1),
            date("2020-01-31"),
        );

        let report = engine.sync_keyword("奥飞").await.unwrap();

        let saved = store.load("奥飞").await.unwrap();
        assert_eq!(
            saved,
            vec![
                record("Z", "2019-12-31", "z"),
                record("A", "2020-01-01", "a"),
                record("B", "2020-01-02", "b updated"),
            ]
        );
        assert_eq!(report.start_date, date("2020-01-01"));
        assert_eq!(report.total_pages, 2);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.new_records, 1);
        assert_eq!(report.total_records, 3);
        assert_eq!(report.missing_layout_pages, 0);

        let requested = source.requested.lock().unwrap();
        let pages: Vec<usize> = requested.iter().map(|q| q.page).collect();
        assert_eq!(pages, [1, 2]);
        assert!(requested.iter().all(|q| q.start_date == date("2020-01-01")
            && q.end_date == date("2020-01-31")
            && q.keyword == "奥飞"));
    }

    #[tokio::test(start_paused = true)]
    async fn walks_pages_backwards_from_the_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let source = CannedPages::new((1..=4).map(|p| {
            let day = format!("2020-01-0{}", 5 - p);
            (p, page_html(&[record(&format!("R{p}"), &day, "w")], 4))
        }));
        let mut engine = SyncEngine::new(
            &source,
            store.clone(),
            RandomDelay::seeded(10.0, 5.0, 2),
            date("2020-02-01"),
        );

        let report = engine.sync_keyword("原创动力").await.unwrap();

        let pages: Vec<usize> = source
            .requested
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.page)
            .collect();
        assert_eq!(pages, [1, 4, 3, 2]);
        assert_eq!(report.start_date, date("1970-01-01"));

        let saved = store.load("原创动力").await.unwrap();
        let nums: Vec<&str> = saved.iter().map(|r| r.registration_num.as_str()).collect();
        assert_eq!(nums, ["R4", "R3", "R2", "R1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_fetch_order_for_records_of_the_same_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let source = CannedPages::new([
            (1, page_html(&[record("P1", "2020-01-01", "w")], 3)),
            (2, page_html(&[record("P2", "2020-01-01", "w")], 3)),
            (3, page_html(&[record("P3", "2020-01-01", "w")], 3)),
        ]);
        let mut engine = SyncEngine::new(
            &source,
            store.clone(),
            RandomDelay::seeded(10.0, 5.0, 3),
            date("2020-02-01"),
        );

        engine.sync_keyword("k").await.unwrap();

        let saved = store.load("k").await.unwrap();
        let nums: Vec<&str> = saved.iter().map(|r| r.registration_num.as_str()).collect();
        assert_eq!(nums, ["P2", "P3", "P1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_leaves_dataset_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let stored = vec![record("A", "2020-01-01", "a")];
        store.save("k", &stored).await.unwrap();

        // Page 2 of 3 is missing.
        let source = CannedPages::new([
            (1, page_html(&[record("B", "2020-01-02", "b")], 3)),
            (3, page_html(&[record("C", "2020-01-01", "c")], 3)),
        ]);
        let mut engine = SyncEngine::new(
            &source,
            store.clone(),
            RandomDelay::seeded(10.0, 5.0, 4),
            date("2020-02-01"),
        );

        let err = engine.sync_keyword("k").await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { page: 2, .. }));
        assert_eq!(store.load("k").await.unwrap(), stored);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_page_counts_as_single_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let source = CannedPages::new([(1, "<html><body>Access denied</body></html>".to_string())]);
        let mut engine = SyncEngine::new(
            &source,
            store.clone(),
            RandomDelay::seeded(10.0, 5.0, 5),
            date("2020-02-01"),
        );

        let report = engine.sync_keyword("k").await.unwrap();

        assert_eq!(report.total_pages, 1);
        assert_eq!(report.fetched, 0);
        assert_eq!(report.missing_layout_pages, 1);
        assert!(store.exists("k").await.unwrap());
        assert!(store.load("k").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn absurd_page_count_is_refused_before_paging() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let stored = vec![record("A", "2020-01-01", "a")];
        store.save("k", &stored).await.unwrap();

        let source = CannedPages::new([(
            1,
            page_html(&[record("B", "2020-01-02", "b")], 99_999_999_999_999),
        )]);
        let mut engine = SyncEngine::new(
            &source,
            store.clone(),
            RandomDelay::seeded(10.0, 5.0, 6),
            date("2020-02-01"),
        );

        let err = engine.sync_keyword("k").await.unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyPages {
                total_pages: 99_999_999_999_999,
                max: MAX_PAGES,
                ..
            }
        ));
        let pages: Vec<usize> = source
            .requested
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.page)
            .collect();
        assert_eq!(pages, [1]);
        assert_eq!(store.load("k").await.unwrap(), stored);
    }

    #[tokio::test(start_paused = true)]
    async fn largest_allowed_page_count_is_walked() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let source = CannedPages::new(
            (1..=MAX_PAGES).map(|p| (p, page_html(&[], MAX_PAGES))),
        );
        let mut engine = SyncEngine::new(
            &source,
            store.clone(),
            RandomDelay::seeded(0.0, 0.0, 7),
            date("2020-02-01"),
        );

        let report = engine.sync_keyword("k").await.unwrap();
        assert_eq!(report.total_pages, MAX_PAGES);
        assert_eq!(source.requested.lock().unwrap().len(), MAX_PAGES);
    }
}
