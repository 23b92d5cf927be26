pub mod payload;
pub mod prompts;
pub mod repair;
pub mod request;
pub mod schema;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::{ExtractionError, ExtractionErrorKind, GatewayError};
use crate::filing::types::{DocId, SectionKind};
use crate::gate::CallGate;
use crate::llm::{GatewayResponse, Message, ModelGateway};
use crate::usage::{CallUsage, PricingTable, Usage, UsageAccumulator};

use payload::{validate, Payload};
use request::ExtractionRequest;
use schema::{SchemaDescriptor, SchemaKind};

/// A schema-conformant extraction plus what it cost.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub schema: SchemaKind,
    pub document_id: DocId,
    pub payload: Payload,
    pub usage: Usage,
    /// Sections whose text was sent.
    pub sections: Vec<SectionKind>,
    /// Optional sources the filing did not have.
    pub missing_sections: Vec<SectionKind>,
    /// Local repair that made the accepted response parse, if any.
    pub repair: Option<&'static str>,
    pub reissues: u8,
    pub extracted_at: DateTime<Utc>,
}

/// How a single response was judged.
enum Verdict {
    Accepted {
        payload: Payload,
        repair: Option<&'static str>,
    },
    Rejected {
        problem: String,
        violation: bool,
    },
}

/// Runs extraction requests against a model gateway with bounded repair
/// and retry.
///
/// Per request the attempt sequence is: send, parse, up to
/// `repair_attempts` local repairs, then up to `reissues` fresh calls with a
/// strict-format reminder. Every gateway call goes through the batch's
/// [`CallGate`] and is billed to both the request's [`Usage`] and the
/// batch-wide [`UsageAccumulator`].
pub struct ExtractionClient {
    gateway: Arc<dyn ModelGateway>,
    pricing: Arc<PricingTable>,
    retry: RetryPolicy,
}

impl ExtractionClient {
    pub fn new(gateway: Arc<dyn ModelGateway>, pricing: Arc<PricingTable>, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            pricing,
            retry,
        }
    }

    pub fn model_id(&self) -> &str {
        self.gateway.model_id()
    }

    pub async fn extract(
        &self,
        request: &ExtractionRequest,
        gate: &CallGate,
        billing: &UsageAccumulator,
    ) -> Result<ExtractionResult, ExtractionError> {
        let started = Instant::now();
        let schema = request.descriptor.json_schema();
        let mut messages = prompts::initial_messages(request);
        let mut usage = Usage::default();
        let mut reissues = 0u8;

        debug!(
            schema = %request.kind(),
            fiscal_year = request.fiscal_year,
            chars = request.char_len(),
            "Starting extraction"
        );

        loop {
            let response = match self.send(&messages, &schema, gate, billing, &mut usage).await {
                Ok(response) => response,
                Err(e) => {
                    return Err(self.fail(
                        request,
                        ExtractionErrorKind::GatewayUnavailable,
                        e.to_string(),
                        usage,
                        started,
                    ))
                }
            };

            match self.judge(request.descriptor, &response.content) {
                Verdict::Accepted { payload, repair } => {
                    usage.latency_ms = started.elapsed().as_millis() as u64;
                    info!(
                        schema = %request.kind(),
                        fiscal_year = request.fiscal_year,
                        calls = usage.calls,
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        cost_usd = usage.cost_usd,
                        latency_ms = usage.latency_ms,
                        repair,
                        reissues,
                        "Extraction complete"
                    );
                    return Ok(ExtractionResult {
                        schema: request.kind(),
                        document_id: request.document_id.clone(),
                        payload,
                        usage,
                        sections: request.sections.clone(),
                        missing_sections: request.missing_sections.clone(),
                        repair,
                        reissues,
                        extracted_at: Utc::now(),
                    });
                }
                Verdict::Rejected { problem, violation } => {
                    if reissues >= self.retry.reissues {
                        let kind = if violation {
                            ExtractionErrorKind::SchemaViolation
                        } else {
                            ExtractionErrorKind::MalformedOutput
                        };
                        return Err(self.fail(request, kind, problem, usage, started));
                    }

                    reissues += 1;
                    warn!(
                        schema = %request.kind(),
                        fiscal_year = request.fiscal_year,
                        reissue = reissues,
                        problem = %problem,
                        "Response unusable, re-issuing with strict format"
                    );
                    messages.push(Message::assistant(response.content));
                    messages.push(Message::user(prompts::strict_format_reminder(
                        request, &problem,
                    )));
                }
            }
        }
    }

    /// One billed call, retrying retryable gateway failures with linear backoff.
    async fn send(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
        gate: &CallGate,
        billing: &UsageAccumulator,
        usage: &mut Usage,
    ) -> Result<GatewayResponse, GatewayError> {
        let mut retries = 0u8;
        loop {
            let call_started = Instant::now();
            match gate.run(self.gateway.invoke(messages, schema)).await {
                Ok(response) => {
                    let model = self.gateway.model_id();
                    let call = CallUsage {
                        model: model.to_string(),
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                        cost_usd: self.pricing.cost(
                            model,
                            response.input_tokens,
                            response.output_tokens,
                        ),
                        latency_ms: call_started.elapsed().as_millis() as u64,
                    };
                    usage.record(&call);
                    billing.record(&call);
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && retries < self.retry.gateway_retries => {
                    retries += 1;
                    let delay = self.retry.backoff * u32::from(retries);
                    warn!(error = %e, retry = retries, ?delay, "Gateway call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Parse and validate a raw response, falling back to local repairs.
    fn judge(&self, descriptor: &SchemaDescriptor, raw: &str) -> Verdict {
        let problem = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => match validate(descriptor, value) {
                Ok(payload) => {
                    return Verdict::Accepted {
                        payload,
                        repair: None,
                    }
                }
                Err(e) if e.is_violation() => {
                    return Verdict::Rejected {
                        problem: e.to_string(),
                        violation: true,
                    }
                }
                Err(e) => e.to_string(),
            },
            Err(e) => format!("invalid JSON: {}", e),
        };

        let passes = usize::from(self.retry.repair_attempts).min(repair::REPAIRS.len());
        for &(name, pass) in &repair::REPAIRS[..passes] {
            let Some(candidate) = pass(raw) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate) else {
                continue;
            };
            match validate(descriptor, value) {
                Ok(payload) => {
                    debug!(repair = name, "Response repaired locally");
                    return Verdict::Accepted {
                        payload,
                        repair: Some(name),
                    };
                }
                Err(e) if e.is_violation() => {
                    return Verdict::Rejected {
                        problem: e.to_string(),
                        violation: true,
                    }
                }
                Err(_) => {}
            }
        }

        Verdict::Rejected {
            problem,
            violation: false,
        }
    }

    fn fail(
        &self,
        request: &ExtractionRequest,
        kind: ExtractionErrorKind,
        detail: String,
        mut usage: Usage,
        started: Instant,
    ) -> ExtractionError {
        usage.latency_ms = started.elapsed().as_millis() as u64;
        warn!(
            schema = %request.kind(),
            fiscal_year = request.fiscal_year,
            kind = ?kind,
            calls = usage.calls,
            cost_usd = usage.cost_usd,
            detail = %detail,
            "Extraction failed"
        );
        ExtractionError {
            kind,
            detail,
            usage,
        }
    }
}
