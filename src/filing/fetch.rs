use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{Document, FiscalYear};
use crate::config::EdgarConfig;
use crate::error::FetchError;

const DATA_URL: &str = "https://data.sec.gov";
const SEC_URL: &str = "https://www.sec.gov";

/// Source of annual filing text.
#[async_trait]
pub trait FilingFetcher: Send + Sync {
    /// The filing for `entity` covering `fiscal_year`, or [`FetchError::NotFound`].
    async fn fetch(&self, entity: &str, fiscal_year: FiscalYear) -> Result<Document, FetchError>;
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
}

#[derive(Debug, Deserialize)]
struct Submissions {
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

/// Column-oriented filing index as EDGAR serves it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub report_date: Vec<String>,
    #[serde(default)]
    pub filing_date: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

/// One row of [`RecentFilings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRef {
    pub accession_number: String,
    pub primary_document: String,
    pub report_date: String,
}

impl FilingRef {
    pub fn archive_url(&self, cik: u64) -> String {
        format!(
            "{}/Archives/edgar/data/{}/{}/{}",
            SEC_URL,
            cik,
            self.accession_number.replace('-', ""),
            self.primary_document
        )
    }
}

/// Pick the `form` filing whose reporting period ends in `fiscal_year`.
/// Rows are newest first; the first match wins, so an original filing beats
/// an older one for the same period.
pub fn select_filing(recent: &RecentFilings, form: &str, fiscal_year: FiscalYear) -> Option<FilingRef> {
    let year = fiscal_year.to_string();
    (0..recent.form.len()).find_map(|i| {
        if recent.form[i] != form {
            return None;
        }
        // Older rows sometimes lack a report date; fall back to the filing
        // date, which lands in the year after the period ends.
        let period_year = match recent.report_date.get(i).and_then(|d| d.get(..4)) {
            Some(year) => year.to_string(),
            None => {
                let filed: FiscalYear = recent.filing_date.get(i)?.get(..4)?.parse().ok()?;
                (filed - 1).to_string()
            }
        };
        if period_year != year {
            return None;
        }
        Some(FilingRef {
            accession_number: recent.accession_number.get(i)?.clone(),
            primary_document: recent.primary_document.get(i)?.clone(),
            report_date: recent.report_date.get(i).cloned().unwrap_or_default(),
        })
    })
}

/// Fetches 10-K filings from SEC EDGAR.
///
/// `entity` is a ticker symbol or a numeric CIK. The ticker map is
/// downloaded once and cached for the life of the fetcher.
pub struct EdgarFetcher {
    client: reqwest::Client,
    config: EdgarConfig,
    tickers: RwLock<Option<HashMap<String, u64>>>,
}

impl EdgarFetcher {
    pub fn new(config: EdgarConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            config,
            tickers: RwLock::new(None),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(EdgarConfig::from_env()?)
    }

    async fn resolve_cik(&self, entity: &str) -> Result<u64, FetchError> {
        if let Ok(cik) = entity.trim().parse::<u64>() {
            return Ok(cik);
        }
        let ticker = entity.trim().to_ascii_uppercase();

        // Fast path: read lock
        {
            let cache = self.tickers.read().await;
            if let Some(map) = cache.as_ref() {
                return map.get(&ticker).copied().ok_or(FetchError::NotFound);
            }
        }

        let url = format!("{}/files/company_tickers.json", SEC_URL);
        let entries: HashMap<String, TickerEntry> = self.get_json(&url).await?;
        let map: HashMap<String, u64> = entries
            .into_values()
            .map(|e| (e.ticker.to_ascii_uppercase(), e.cik_str))
            .collect();
        debug!(tickers = map.len(), "Ticker map loaded");

        let cik = map.get(&ticker).copied();
        *self.tickers.write().await = Some(map);
        cik.ok_or(FetchError::NotFound)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("GET {} failed: {}", url, e)))?;
        match resp.status() {
            s if s.is_success() => Ok(resp),
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            s => Err(FetchError::Transport(format!("GET {} returned {}", url, s))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Transport(format!("invalid JSON from {}: {}", url, e)))
    }
}

#[async_trait]
impl FilingFetcher for EdgarFetcher {
    async fn fetch(&self, entity: &str, fiscal_year: FiscalYear) -> Result<Document, FetchError> {
        let cik = self.resolve_cik(entity).await?;

        let url = format!("{}/submissions/CIK{:010}.json", DATA_URL, cik);
        let submissions: Submissions = self.get_json(&url).await?;
        let filing = select_filing(&submissions.filings.recent, &self.config.form_type, fiscal_year)
            .ok_or(FetchError::NotFound)?;

        let html = self
            .get(&filing.archive_url(cik))
            .await?
            .text()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read filing body: {}", e)))?;

        // html2text is CPU-bound on multi-megabyte filings
        let entity_owned = entity.to_string();
        let document = tokio::task::spawn_blocking(move || {
            Document::from_html(entity_owned, fiscal_year, &html)
        })
        .await
        .map_err(|e| FetchError::Transport(format!("HTML conversion task failed: {}", e)))?;

        info!(
            entity,
            fiscal_year,
            cik,
            accession = %filing.accession_number,
            doc_id = %document.id,
            size = document.len(),
            "Filing fetched"
        );
        Ok(document)
    }
}
