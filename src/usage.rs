use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

/// Published rates for one model, in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Rates {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// USD per single input token.
    pub fn input_rate(&self) -> f64 {
        self.input_per_million / 1_000_000.0
    }

    /// USD per single output token.
    pub fn output_rate(&self) -> f64 {
        self.output_per_million / 1_000_000.0
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input_rate() + output_tokens as f64 * self.output_rate()
    }
}

/// Read-only model pricing, injected once at orchestrator construction.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, Rates>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let known = [
            ("anthropic/claude-3.5-sonnet", Rates::new(3.00, 15.00)),
            ("anthropic/claude-3-haiku", Rates::new(0.25, 1.25)),
            ("anthropic/claude-3-opus", Rates::new(15.00, 75.00)),
            ("openai/gpt-4o", Rates::new(2.50, 10.00)),
            ("openai/gpt-4o-mini", Rates::new(0.15, 0.60)),
            ("google/gemini-2.0-flash-001", Rates::new(0.10, 0.40)),
            ("google/gemini-2.0-flash-lite-001", Rates::new(0.075, 0.30)),
            ("meta-llama/llama-3.3-70b-instruct:free", Rates::new(0.0, 0.0)),
        ];
        Self {
            rates: known
                .into_iter()
                .map(|(model, rates)| (model.to_string(), rates))
                .collect(),
        }
    }
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, model: impl Into<String>, rates: Rates) -> Self {
        self.rates.insert(model.into(), rates);
        self
    }

    pub fn rates(&self, model: &str) -> Option<Rates> {
        self.rates.get(model).copied()
    }

    /// Cost of one call. Unpriced models cost nothing but are logged, so a
    /// missing rate shows up instead of silently under-reporting.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.rates(model) {
            Some(rates) => rates.cost(input_tokens, output_tokens),
            None => {
                warn!(model, "No pricing for model, cost recorded as 0");
                0.0
            }
        }
    }
}

/// Usage of one billed gateway call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// Usage rolled up over every call made for one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Usage {
    pub model: Option<String>,
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Wall clock for the whole attempt sequence, repairs included.
    pub latency_ms: u64,
}

impl Usage {
    pub fn record(&mut self, call: &CallUsage) {
        self.model.get_or_insert_with(|| call.model.clone());
        self.calls += 1;
        self.input_tokens += call.input_tokens;
        self.output_tokens += call.output_tokens;
        self.cost_usd += call.cost_usd;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Running totals of billed calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BilledTotals {
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Thread-safe sink for every billed call in a batch.
///
/// Calls are recorded as they complete, so work abandoned at the batch
/// deadline is still accounted for.
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    totals: Mutex<BilledTotals>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: &CallUsage) {
        let mut totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        totals.calls += 1;
        totals.input_tokens += call.input_tokens;
        totals.output_tokens += call.output_tokens;
        totals.cost_usd += call.cost_usd;
    }

    pub fn snapshot(&self) -> BilledTotals {
        *self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(input: u64, output: u64, cost: f64) -> CallUsage {
        CallUsage {
            model: "test/model".to_string(),
            input_tokens: input,
            output_tokens: output,
            cost_usd: cost,
            latency_ms: 10,
        }
    }

    #[test]
    fn test_cost_uses_per_million_rates() {
        let pricing = PricingTable::default();
        let cost = pricing.cost("anthropic/claude-3.5-sonnet", 1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        let pricing = PricingTable::empty();
        assert_eq!(pricing.cost("nobody/unknown", 5_000, 5_000), 0.0);
    }

    #[test]
    fn test_usage_record_sums_calls() {
        let mut usage = Usage::default();
        usage.record(&call(100, 20, 0.5));
        usage.record(&call(50, 10, 0.25));
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.total_tokens(), 180);
        assert!((usage.cost_usd - 0.75).abs() < 1e-12);
        assert_eq!(usage.model.as_deref(), Some("test/model"));
    }

    #[test]
    fn test_accumulator_snapshot() {
        let acc = UsageAccumulator::new();
        acc.record(&call(10, 1, 0.1));
        acc.record(&call(20, 2, 0.2));
        let totals = acc.snapshot();
        assert_eq!(totals.calls, 2);
        assert_eq!(totals.input_tokens, 30);
        assert_eq!(totals.output_tokens, 3);
        assert!((totals.cost_usd - 0.3).abs() < 1e-12);
    }
}
