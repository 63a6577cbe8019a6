use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;

use crate::record::Record;
use crate::{Error, Result};

const TABLE_SELECTOR: &str = "#tableabb";
const ROW_SELECTOR: &str = "#tableabb tbody tr";
const CELL_SELECTOR: &str = "td";
const STATUS_SELECTOR: &str = "#span_text";

/// Status line reads like `共123 条记录  第1 页/共13 页`.
static PAGE_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"共\s*\d+\s*条记录\s*第\s*\d+\s*页\s*/\s*共\s*(\d+)\s*页")
        .expect("page count pattern is valid")
});

/// Everything one result page yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    pub records: Vec<Record>,
    /// Falls back to 1 when the status line is missing or unreadable.
    pub total_pages: usize,
    pub table_found: bool,
    pub status_found: bool,
}

impl ParsedPage {
    /// Neither the results table nor the status line were present. Usually means the site
    /// layout changed or the request got served a block page.
    pub fn layout_missing(&self) -> bool {
        !self.table_found && !self.status_found
    }
}

/// Parses a page on the blocking pool, `Html` is not `Send`.
pub(crate) async fn parse_page_blocking(html: String) -> Result<ParsedPage> {
    spawn_blocking(move || parse_page(&html)).await?
}

pub fn parse_page(html: &str) -> Result<ParsedPage> {
    let doc = Html::parse_document(html);
    let table_selector = create_selector(TABLE_SELECTOR)?;
    let status_selector = create_selector(STATUS_SELECTOR)?;

    Ok(ParsedPage {
        records: records_in(&doc)?,
        total_pages: total_pages_in(&doc)?,
        table_found: doc.select(&table_selector).next().is_some(),
        status_found: doc.select(&status_selector).next().is_some(),
    })
}

/// Extracts the records of the results table. No table or no rows means no records.
pub fn parse_records(html: &str) -> Result<Vec<Record>> {
    records_in(&Html::parse_document(html))
}

/// Reads the total page count from the status line, 1 if it can't be found.
pub fn parse_total_pages(html: &str) -> Result<usize> {
    total_pages_in(&Html::parse_document(html))
}

fn records_in(doc: &Html) -> Result<Vec<Record>> {
    let row_selector = create_selector(ROW_SELECTOR)?;
    let cell_selector = create_selector(CELL_SELECTOR)?;

    let records = doc
        .select(&row_selector)
        .map(|row| {
            let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
            // Cell 0 is the running number of the row.
            let cell = |idx: usize| cells.get(idx).map(cell_text).unwrap_or_default();
            Record {
                registration_num: cell(1),
                registration_date: cell(2),
                work_name: cell(3),
                work_type: cell(4),
                copyright_owner: cell(5),
                creation_date: cell(6),
                publication_date: cell(7),
            }
        })
        .collect();
    Ok(records)
}

fn total_pages_in(doc: &Html) -> Result<usize> {
    let status_selector = create_selector(STATUS_SELECTOR)?;
    let text: String = doc
        .select(&status_selector)
        .flat_map(|el| el.text())
        .collect();

    Ok(PAGE_COUNT_RE
        .captures(&text)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(1))
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}
