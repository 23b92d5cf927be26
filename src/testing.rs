//! In-memory collaborators for tests: a scripted model gateway, a filing
//! fetcher backed by a map, and generators for realistic filing text.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FetchError, GatewayError};
use crate::extract::schema::SchemaKind;
use crate::filing::fetch::FilingFetcher;
use crate::filing::types::{Document, FiscalYear};
use crate::llm::{GatewayResponse, Message, ModelGateway};

pub const MOCK_MODEL: &str = "test/model";
pub const MOCK_INPUT_TOKENS: u64 = 1000;
pub const MOCK_OUTPUT_TOKENS: u64 = 200;

/// Tracks how many external calls are outstanding at once, across mocks.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

type Responder = Box<dyn Fn(&[Message]) -> Result<String, GatewayError> + Send + Sync>;

/// Gateway whose replies come from a closure. Every successful call reports
/// the same token counts.
pub struct MockGateway {
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<Message>>,
    in_flight: Arc<InFlight>,
}

impl MockGateway {
    pub fn new(
        responder: impl Fn(&[Message]) -> Result<String, GatewayError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Same content for every call.
    pub fn replying(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::new(move |_| Ok(content.clone()))
    }

    /// Replies in order; the last one repeats.
    pub fn scripted(replies: Vec<Result<String, GatewayError>>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            let mut replies = replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        })
    }

    /// A valid payload for whichever schema the prompt asks for.
    pub fn schema_aware() -> Self {
        Self::new(|messages| {
            let prompt = messages.iter().map(|m| m.content.as_str()).collect::<String>();
            SchemaKind::ALL
                .into_iter()
                .find(|k| prompt.contains(k.descriptor().instructions))
                .map(|k| valid_payload(k).to_string())
                .ok_or_else(|| GatewayError::Rejected {
                    status: 400,
                    message: "unrecognised prompt".to_string(),
                })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    fn model_id(&self) -> &str {
        MOCK_MODEL
    }

    async fn invoke(
        &self,
        messages: &[Message],
        _schema: &Value,
    ) -> Result<GatewayResponse, GatewayError> {
        let _guard = self.in_flight.enter();
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let content = (self.responder)(messages)?;
        Ok(GatewayResponse {
            content,
            model: MOCK_MODEL.to_string(),
            input_tokens: MOCK_INPUT_TOKENS,
            output_tokens: MOCK_OUTPUT_TOKENS,
        })
    }
}

/// Fetcher serving filing text from memory. Years without an entry are
/// not found.
#[derive(Default)]
pub struct MockFetcher {
    filings: HashMap<FiscalYear, Result<String, FetchError>>,
    delays: HashMap<FiscalYear, Duration>,
    calls: AtomicUsize,
    in_flight: Arc<InFlight>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filing(mut self, year: FiscalYear, text: impl Into<String>) -> Self {
        self.filings.insert(year, Ok(text.into()));
        self
    }

    pub fn with_error(mut self, year: FiscalYear, error: FetchError) -> Self {
        self.filings.insert(year, Err(error));
        self
    }

    pub fn with_delay(mut self, year: FiscalYear, delay: Duration) -> Self {
        self.delays.insert(year, delay);
        self
    }

    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FilingFetcher for MockFetcher {
    async fn fetch(&self, entity: &str, fiscal_year: FiscalYear) -> Result<Document, FetchError> {
        let _guard = self.in_flight.enter();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&fiscal_year) {
            tokio::time::sleep(*delay).await;
        }
        match self.filings.get(&fiscal_year) {
            Some(Ok(text)) => Ok(Document::new(entity, fiscal_year, text.clone())),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FetchError::NotFound),
        }
    }
}

fn prose(topic: &str, year: FiscalYear, sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "In fiscal {} our {} disclosures cover matter number {} in detail.",
                year, topic, i
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A 10-K-shaped filing with a table of contents and every recognised section.
pub fn sample_filing(year: FiscalYear) -> String {
    format!(
        "UNITED STATES SECURITIES AND EXCHANGE COMMISSION\n\
         FORM 10-K\n\
         For the fiscal year ended January {year}\n\
         Table of Contents\n\
         Item 1. Business 4\n\
         Item 1A. Risk Factors 14\n\
         Item 1C. Cybersecurity 32\n\
         Item 7. Management's Discussion and Analysis 40\n\
         PART I\n\
         Item 1. Business\n\
         {business}\n\
         Competition\n\
         {competition}\n\
         Human Capital\n\
         {people}\n\
         Item 1A. Risk Factors\n\
         {risks}\n\
         Item 1B. Unresolved Staff Comments\n\
         None.\n\
         Item 1C. Cybersecurity\n\
         {cyber}\n\
         Item 2. Properties\n\
         {properties}\n\
         PART II\n\
         Item 7. Management's Discussion and Analysis of Financial Condition and Results of Operations\n\
         {mdna}\n\
         Item 8. Financial Statements and Supplementary Data\n\
         {financials}\n",
        year = year,
        business = prose("business", year, 10),
        competition = prose("competition", year, 10),
        people = prose("workforce", year, 6),
        risks = prose("risk", year, 12),
        cyber = prose("cybersecurity", year, 10),
        properties = prose("property", year, 4),
        mdna = prose("results", year, 10),
        financials = prose("financial", year, 4),
    )
}

/// A filing that only has a Business section.
pub fn business_only_filing(year: FiscalYear) -> String {
    format!(
        "PART I\nItem 1. Business\n{}\nItem 2. Properties\n{}\n",
        prose("business", year, 10),
        prose("property", year, 4)
    )
}

/// A payload that validates against `kind`'s descriptor.
pub fn valid_payload(kind: SchemaKind) -> Value {
    match kind {
        SchemaKind::Competitors => json!({
            "competitors": [
                { "name": "AMD", "categories": ["GPU", "CPU"] },
                { "name": "Intel", "categories": ["CPU"] },
            ],
            "competitive_factors": ["performance", "software ecosystem"],
        }),
        SchemaKind::Cybersecurity => json!({
            "frameworks": ["NIST CSF"],
            "has_cso": true,
            "cso_reports_to": "Chief Information Officer",
            "cso_experience_years": 20,
            "board_oversight": "Audit Committee",
            "has_incident_response_team": true,
            "has_vendor_risk_process": true,
            "key_practices": ["penetration testing"],
        }),
        SchemaKind::RiskSummary => json!({
            "risk_categories": ["Supply chain", "Regulatory"],
            "risks": [
                { "title": "Reliance on third-party foundries", "category": "Supply chain" },
                { "title": "Export controls", "category": "Regulatory" },
            ],
        }),
        SchemaKind::BusinessOverview => json!({
            "company_description": "Designs accelerated computing platforms.",
            "business_segments": [
                { "name": "Compute & Networking", "description": "Data center platforms" },
            ],
            "markets": ["Data Center", "Gaming"],
            "employee_count": 29600,
            "headquarters": "Santa Clara, California",
            "key_technologies": ["GPU", "CUDA"],
        }),
        SchemaKind::AiAnalysis => json!({
            "ai_narrative_stance": "opportunity-focused",
            "ai_mention_count": 42,
            "ai_products_services": [
                { "name": "DGX Cloud", "description": "AI training service", "monetization": "subscription" },
            ],
            "ai_risks_disclosed": [
                { "risk": "AI regulation", "category": "regulatory" },
            ],
            "key_ai_quotes": ["AI is the defining technology of our time."],
        }),
    }
}
