//! Filing segmentation and concurrent schema extraction.
//!
//! An [`Orchestrator`] takes an entity and a set of fiscal years, fetches each
//! year's annual filing, splits it into sections, and extracts one structured
//! record per requested [`SchemaKind`] through a [`ModelGateway`]. Years run
//! concurrently under a shared ceiling on outstanding external calls; a
//! failing year never takes its siblings down with it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use filing_extract::{
//!     BatchRequest, EdgarFetcher, HttpGateway, Orchestrator, PipelineConfig, PricingTable,
//!     SchemaKind,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::default();
//! let orchestrator = Orchestrator::new(
//!     Arc::new(EdgarFetcher::from_env()?),
//!     Arc::new(HttpGateway::from_env()?),
//!     PricingTable::default(),
//!     &config,
//! );
//! let request = BatchRequest::new("NVDA", 2021..=2024, [SchemaKind::RiskSummary]);
//! let batch = orchestrator.run_batch(request).await?;
//! println!("{}", serde_json::to_string_pretty(&batch)?);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod filing;
pub mod gate;
pub mod llm;
pub mod usage;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{
    AggregateUsage, BatchRequest, BatchResult, Orchestrator, SchemaOutcome, YearExtraction,
    YearFailure, YearOutcome, YearResult,
};
pub use config::{EdgarConfig, GatewayConfig, PipelineConfig, RetryPolicy};
pub use error::{
    ContractViolation, ExtractionError, ExtractionErrorKind, FetchError, GatewayError, SkipReason,
};
pub use extract::schema::{SchemaDescriptor, SchemaKind};
pub use extract::{ExtractionClient, ExtractionResult};
pub use filing::fetch::{EdgarFetcher, FilingFetcher};
pub use filing::segment::Segmenter;
pub use filing::types::{Document, FiscalYear, SectionKind, SectionMap, SectionSpan};
pub use llm::{HttpGateway, ModelGateway};
pub use usage::{PricingTable, Rates, Usage};
