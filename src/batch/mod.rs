pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ContractViolation, FetchError};
use crate::extract::request::build_request;
use crate::extract::schema::SchemaKind;
use crate::extract::ExtractionClient;
use crate::filing::fetch::FilingFetcher;
use crate::filing::segment::Segmenter;
use crate::filing::types::{Document, FiscalYear, SectionMap};
use crate::gate::CallGate;
use crate::llm::ModelGateway;
use crate::usage::{PricingTable, UsageAccumulator};

pub use types::{
    AggregateUsage, BatchRequest, BatchResult, SchemaOutcome, YearExtraction, YearFailure,
    YearOutcome, YearResult,
};

/// Fans a batch out into one task per fiscal year and folds the outcomes
/// back into a [`BatchResult`].
pub struct Orchestrator {
    fetcher: Arc<dyn FilingFetcher>,
    client: Arc<ExtractionClient>,
    segmenter: Segmenter,
    suspicious_section_chars: usize,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn FilingFetcher>,
        gateway: Arc<dyn ModelGateway>,
        pricing: PricingTable,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            client: Arc::new(ExtractionClient::new(gateway, Arc::new(pricing), config.retry)),
            segmenter: Segmenter::new(config.min_section_chars),
            suspicious_section_chars: config.suspicious_section_chars,
        }
    }

    /// Run one batch. Per-year problems are recorded in the result; only a
    /// malformed request is returned as an error.
    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchResult, ContractViolation> {
        check_request(&request)?;

        let started = StdInstant::now();
        let gate = CallGate::new(request.concurrency);
        let billing = Arc::new(UsageAccumulator::new());
        let kinds: Arc<[SchemaKind]> = request.schema_kinds.iter().copied().collect();

        info!(
            entity = %request.entity,
            years = ?request.fiscal_years,
            kinds = ?kinds,
            concurrency = request.concurrency,
            model = self.client.model_id(),
            "Starting batch"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<(FiscalYear, YearOutcome)>();
        let mut tasks = JoinSet::new();
        for &fiscal_year in &request.fiscal_years {
            let job = YearJob {
                entity: request.entity.clone(),
                fiscal_year,
                kinds: kinds.clone(),
                fetcher: self.fetcher.clone(),
                client: self.client.clone(),
                segmenter: self.segmenter,
                suspicious_section_chars: self.suspicious_section_chars,
                gate: gate.clone(),
                billing: billing.clone(),
            };
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = job.run().await;
                // Receiver gone means the batch already gave up on us.
                let _ = tx.send((fiscal_year, outcome));
            });
        }
        drop(tx);

        let mut settled: BTreeMap<FiscalYear, YearOutcome> = BTreeMap::new();
        let mut timed_out = false;
        while settled.len() < request.fiscal_years.len() {
            let next = match request.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => rx.recv().await,
            };
            match next {
                Some((fiscal_year, outcome)) => {
                    settled.insert(fiscal_year, outcome);
                }
                // Every sender dropped: the remaining tasks died without reporting.
                None => break,
            }
        }

        if timed_out {
            warn!(
                settled = settled.len(),
                pending = request.fiscal_years.len() - settled.len(),
                "Batch deadline expired, abandoning outstanding years"
            );
        }
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "Year task panicked");
                }
            }
        }

        let years: Vec<YearResult> = request
            .fiscal_years
            .iter()
            .map(|&fiscal_year| {
                let outcome = settled.remove(&fiscal_year).unwrap_or_else(|| {
                    YearOutcome::Failure(if timed_out {
                        YearFailure::Timeout
                    } else {
                        YearFailure::Internal {
                            message: "year task ended without reporting".to_string(),
                        }
                    })
                });
                YearResult {
                    fiscal_year,
                    outcome,
                }
            })
            .collect();

        let usage = aggregate(&years, &billing, started);
        info!(
            entity = %request.entity,
            years = years.len(),
            failed_years = usage.failed_years,
            failed_extractions = usage.failed_extractions,
            calls = usage.calls,
            total_tokens = usage.total_tokens,
            cost_usd = usage.cost_usd,
            elapsed_ms = usage.elapsed_ms,
            timed_out,
            "Batch complete"
        );

        Ok(BatchResult {
            entity: request.entity,
            years,
            usage,
            timed_out,
        })
    }
}

fn check_request(request: &BatchRequest) -> Result<(), ContractViolation> {
    if request.schema_kinds.is_empty() {
        return Err(ContractViolation::NoSchemaKinds);
    }
    if request.concurrency == 0 {
        return Err(ContractViolation::ZeroConcurrency);
    }
    for kind in &request.schema_kinds {
        kind.descriptor().check()?;
    }
    Ok(())
}

fn aggregate(years: &[YearResult], billing: &UsageAccumulator, started: StdInstant) -> AggregateUsage {
    let billed = billing.snapshot();

    let max_latency_ms = years
        .iter()
        .flat_map(|y| {
            let from_results = y
                .extraction()
                .into_iter()
                .flat_map(|e| e.schemas.values())
                .filter_map(|o| match o {
                    SchemaOutcome::Extracted(r) => Some(r.usage.latency_ms),
                    SchemaOutcome::Failed { error } => Some(error.usage.latency_ms),
                    SchemaOutcome::Skipped { .. } => None,
                });
            let from_failures: Vec<u64> = match y.failure() {
                Some(YearFailure::Extraction { errors }) => {
                    errors.values().map(|e| e.usage.latency_ms).collect()
                }
                _ => Vec::new(),
            };
            from_results.chain(from_failures).collect::<Vec<_>>()
        })
        .max()
        .unwrap_or(0);

    AggregateUsage {
        calls: billed.calls,
        input_tokens: billed.input_tokens,
        output_tokens: billed.output_tokens,
        total_tokens: billed.input_tokens + billed.output_tokens,
        cost_usd: billed.cost_usd,
        max_latency_ms,
        failed_years: years.iter().filter(|y| !y.is_success()).count(),
        failed_extractions: years.iter().map(YearResult::failed_extractions).sum(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Everything one year task needs, owned so the task can be spawned.
struct YearJob {
    entity: String,
    fiscal_year: FiscalYear,
    kinds: Arc<[SchemaKind]>,
    fetcher: Arc<dyn FilingFetcher>,
    client: Arc<ExtractionClient>,
    segmenter: Segmenter,
    suspicious_section_chars: usize,
    gate: CallGate,
    billing: Arc<UsageAccumulator>,
}

impl YearJob {
    async fn run(self) -> YearOutcome {
        match self.extract_year().await {
            Ok(extraction) => YearOutcome::Success(extraction),
            Err(failure) => {
                warn!(
                    entity = %self.entity,
                    fiscal_year = self.fiscal_year,
                    failure = %failure,
                    "Year failed"
                );
                YearOutcome::Failure(failure)
            }
        }
    }

    async fn extract_year(&self) -> Result<YearExtraction, YearFailure> {
        let document = self
            .gate
            .run(self.fetcher.fetch(&self.entity, self.fiscal_year))
            .await
            .map_err(|e| match e {
                FetchError::NotFound => YearFailure::NotFound,
                FetchError::Transport(message) => YearFailure::FetchFailed { message },
            })?;
        let document = Arc::new(document);

        let sections = self.segment(document.clone()).await?;
        let warnings = sections.suspicious(self.suspicious_section_chars);
        for warning in &warnings {
            warn!(
                fiscal_year = self.fiscal_year,
                section = %warning.kind,
                char_len = warning.char_len,
                "Section suspiciously short, segmentation may be wrong"
            );
        }
        debug!(
            fiscal_year = self.fiscal_year,
            doc_id = %document.id,
            sections = ?sections.kinds(),
            "Filing segmented"
        );
        if sections.is_empty() {
            return Err(YearFailure::NoUsableSections);
        }

        let extractions = self.kinds.iter().map(|&kind| {
            let document = &document;
            let sections = &sections;
            async move { (kind, self.extract_schema(kind, document, sections).await) }
        });
        let schemas: BTreeMap<SchemaKind, SchemaOutcome> =
            join_all(extractions).await.into_iter().collect();

        if schemas.values().any(|o| o.result().is_some()) {
            info!(
                entity = %self.entity,
                fiscal_year = self.fiscal_year,
                extracted = schemas.values().filter(|o| o.result().is_some()).count(),
                of = schemas.len(),
                "Year complete"
            );
            return Ok(YearExtraction {
                document_id: document.id.clone(),
                sections,
                warnings,
                schemas,
            });
        }

        let errors: BTreeMap<SchemaKind, _> = schemas
            .iter()
            .filter_map(|(kind, o)| match o {
                SchemaOutcome::Failed { error } => Some((*kind, error.clone())),
                _ => None,
            })
            .collect();
        if !errors.is_empty() {
            return Err(YearFailure::Extraction { errors });
        }

        let skipped = schemas
            .into_iter()
            .filter_map(|(kind, o)| match o {
                SchemaOutcome::Skipped { reason } => Some((kind, reason)),
                _ => None,
            })
            .collect();
        Err(YearFailure::Skipped { schemas: skipped })
    }

    /// Segmentation is pure CPU work over a multi-megabyte string, so it runs
    /// on the blocking pool.
    async fn segment(&self, document: Arc<Document>) -> Result<SectionMap, YearFailure> {
        let segmenter = self.segmenter;
        tokio::task::spawn_blocking(move || segmenter.segment(document.text()))
            .await
            .map_err(|e| YearFailure::Internal {
                message: format!("segmentation task failed: {}", e),
            })
    }

    async fn extract_schema(
        &self,
        kind: SchemaKind,
        document: &Document,
        sections: &SectionMap,
    ) -> SchemaOutcome {
        let request = match build_request(kind, document, sections) {
            Ok(request) => request,
            Err(reason) => {
                info!(
                    fiscal_year = self.fiscal_year,
                    schema = %kind,
                    reason = %reason,
                    "Schema skipped"
                );
                return SchemaOutcome::Skipped { reason };
            }
        };

        match self.client.extract(&request, &self.gate, &self.billing).await {
            Ok(result) => SchemaOutcome::Extracted(result),
            Err(error) => SchemaOutcome::Failed { error },
        }
    }
}
