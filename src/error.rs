//! Error taxonomy for the extraction pipeline.
//!
//! Everything below the year level is converted into one of these typed
//! outcomes and recorded in the batch result. Only [`ContractViolation`]
//! is ever returned to the caller as an `Err`.

use serde::Serialize;
use thiserror::Error;

use crate::filing::types::SectionKind;
use crate::usage::Usage;

/// Failure reported by a model gateway for a single call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rate limited the request")]
    RateLimited,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    /// Transport failures and rate limits are worth another try; a rejected
    /// request will be rejected again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::RateLimited | GatewayError::Unavailable(_))
    }
}

/// Failure reported by a filing fetcher for one fiscal year.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("no filing for this fiscal year")]
    NotFound,

    #[error("fetch failed: {0}")]
    Transport(String),
}

/// Terminal classification of a failed extraction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    #[error("model output could not be parsed")]
    MalformedOutput,

    #[error("model gateway unavailable")]
    GatewayUnavailable,

    #[error("model output violates the schema")]
    SchemaViolation,
}

/// An extraction that exhausted its retries.
///
/// Carries the usage of every call that was made on its behalf, since those
/// calls were billed even though nothing usable came back.
#[derive(Error, Debug, Clone, Serialize)]
#[error("{kind}: {detail}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub detail: String,
    pub usage: Usage,
}

/// Why a schema kind was not sent to the model at all.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("required section {section} not found in filing")]
    SectionUnavailable { section: SectionKind },

    #[error("none of the source sections were found: {sections:?}")]
    InsufficientMaterial { sections: Vec<SectionKind> },
}

/// Programming-contract violation. Fatal to the whole batch call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("no schema kinds requested")]
    NoSchemaKinds,

    #[error("concurrency ceiling must be at least 1")]
    ZeroConcurrency,

    #[error("schema descriptor {kind} is malformed: {reason}")]
    MalformedDescriptor { kind: String, reason: String },
}
