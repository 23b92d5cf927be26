use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, SkipReason};
use crate::extract::schema::SchemaKind;
use crate::extract::ExtractionResult;
use crate::filing::types::{DocId, FiscalYear, SectionMap, SegmentationWarning};

/// One batch: an entity, the years to cover and the schemas to extract.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub entity: String,
    pub fiscal_years: BTreeSet<FiscalYear>,
    pub schema_kinds: BTreeSet<SchemaKind>,
    /// Ceiling on simultaneous external calls across the whole batch.
    pub concurrency: usize,
    pub deadline: Option<Instant>,
}

impl BatchRequest {
    pub fn new(
        entity: impl Into<String>,
        fiscal_years: impl IntoIterator<Item = FiscalYear>,
        schema_kinds: impl IntoIterator<Item = SchemaKind>,
    ) -> Self {
        Self {
            entity: entity.into(),
            fiscal_years: fiscal_years.into_iter().collect(),
            schema_kinds: schema_kinds.into_iter().collect(),
            concurrency: PipelineConfig::default().concurrency,
            deadline: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// What happened to one schema kind within a year.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaOutcome {
    Extracted(ExtractionResult),
    Skipped { reason: SkipReason },
    Failed { error: ExtractionError },
}

impl SchemaOutcome {
    pub fn result(&self) -> Option<&ExtractionResult> {
        match self {
            SchemaOutcome::Extracted(result) => Some(result),
            _ => None,
        }
    }
}

/// A year with at least one successful extraction.
#[derive(Debug, Clone, Serialize)]
pub struct YearExtraction {
    pub document_id: DocId,
    pub sections: SectionMap,
    pub warnings: Vec<SegmentationWarning>,
    pub schemas: BTreeMap<SchemaKind, SchemaOutcome>,
}

impl YearExtraction {
    pub fn result(&self, kind: SchemaKind) -> Option<&ExtractionResult> {
        self.schemas.get(&kind).and_then(SchemaOutcome::result)
    }

    pub fn failed(&self) -> usize {
        self.schemas
            .values()
            .filter(|o| matches!(o, SchemaOutcome::Failed { .. }))
            .count()
    }
}

/// Typed reason a year produced no extraction.
#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum YearFailure {
    #[error("no filing found for this fiscal year")]
    NotFound,

    #[error("filing fetch failed: {message}")]
    FetchFailed { message: String },

    #[error("segmentation found no usable sections")]
    NoUsableSections,

    #[error("every schema kind was skipped")]
    Skipped {
        schemas: BTreeMap<SchemaKind, SkipReason>,
    },

    #[error("every attempted extraction failed")]
    Extraction {
        errors: BTreeMap<SchemaKind, ExtractionError>,
    },

    #[error("batch deadline expired before the year settled")]
    Timeout,

    #[error("year task ended abnormally: {message}")]
    Internal { message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YearOutcome {
    Success(YearExtraction),
    Failure(YearFailure),
}

#[derive(Debug, Clone, Serialize)]
pub struct YearResult {
    pub fiscal_year: FiscalYear,
    pub outcome: YearOutcome,
}

impl YearResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, YearOutcome::Success(_))
    }

    pub fn extraction(&self) -> Option<&YearExtraction> {
        match &self.outcome {
            YearOutcome::Success(extraction) => Some(extraction),
            YearOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&YearFailure> {
        match &self.outcome {
            YearOutcome::Failure(failure) => Some(failure),
            YearOutcome::Success(_) => None,
        }
    }

    /// Extraction errors recorded for this year, whether or not it succeeded.
    pub fn failed_extractions(&self) -> usize {
        match &self.outcome {
            YearOutcome::Success(extraction) => extraction.failed(),
            YearOutcome::Failure(YearFailure::Extraction { errors }) => errors.len(),
            YearOutcome::Failure(_) => 0,
        }
    }
}

/// Usage rolled up over the whole batch.
///
/// Token and cost totals cover every billed gateway call, including calls
/// whose response was later discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateUsage {
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    /// Longest single extraction, repairs and reissues included.
    pub max_latency_ms: u64,
    pub failed_years: usize,
    pub failed_extractions: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub entity: String,
    /// One entry per requested year, ascending.
    pub years: Vec<YearResult>,
    pub usage: AggregateUsage,
    pub timed_out: bool,
}

impl BatchResult {
    pub fn year(&self, fiscal_year: FiscalYear) -> Option<&YearResult> {
        self.years.iter().find(|y| y.fiscal_year == fiscal_year)
    }

    pub fn successes(&self) -> impl Iterator<Item = &YearResult> {
        self.years.iter().filter(|y| y.is_success())
    }
}
