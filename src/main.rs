use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filing_extract::{
    BatchRequest, EdgarFetcher, FiscalYear, HttpGateway, Orchestrator, PipelineConfig,
    PricingTable, SchemaKind,
};

/// Extract structured records from a company's annual filings.
#[derive(Parser, Debug)]
#[command(name = "filing-extract", version, about)]
struct Cli {
    /// Ticker symbol or CIK
    #[arg(long, required_unless_present = "list_kinds")]
    entity: Option<String>,

    /// Fiscal years, comma separated (e.g. 2021,2022,2023) or a range (2019-2024)
    #[arg(long, value_delimiter = ',', required_unless_present = "list_kinds")]
    years: Vec<String>,

    /// Schema kinds to extract, comma separated
    #[arg(long, value_delimiter = ',', default_value = "risk_summary")]
    kinds: Vec<SchemaKind>,

    /// Ceiling on simultaneous external calls
    #[arg(long, env = "PIPELINE_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Batch deadline in seconds (0 disables it)
    #[arg(long, env = "PIPELINE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Print the schema registry and exit
    #[arg(long)]
    list_kinds: bool,
}

fn parse_years(raw: &[String]) -> Result<Vec<FiscalYear>> {
    let mut years = Vec::new();
    for item in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        match item.split_once('-') {
            Some((from, to)) => {
                let from: FiscalYear = from.trim().parse().with_context(|| format!("Invalid year: {}", item))?;
                let to: FiscalYear = to.trim().parse().with_context(|| format!("Invalid year: {}", item))?;
                if from > to {
                    bail!("Empty year range: {}", item);
                }
                years.extend(from..=to);
            }
            None => years.push(item.parse().with_context(|| format!("Invalid year: {}", item))?),
        }
    }
    Ok(years)
}

fn list_kinds() -> Result<()> {
    let registry: Vec<serde_json::Value> = SchemaKind::ALL
        .iter()
        .map(|kind| {
            let descriptor = kind.descriptor();
            serde_json::json!({
                "kind": kind,
                "sources": descriptor.sources.iter().map(|s| serde_json::json!({
                    "section": s.section,
                    "budget": s.budget,
                    "required": s.required,
                })).collect::<Vec<_>>(),
                "schema": descriptor.schema_hint(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&registry)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.list_kinds {
        return list_kinds();
    }

    let mut config = PipelineConfig::from_env()?;
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(secs) = cli.timeout_secs {
        config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let entity = cli.entity.context("--entity is required")?;
    let years = parse_years(&cli.years)?;

    let fetcher = Arc::new(EdgarFetcher::from_env()?);
    let gateway = Arc::new(HttpGateway::from_env()?);
    let orchestrator = Orchestrator::new(fetcher, gateway, PricingTable::default(), &config);
    info!("Orchestrator initialized");

    let mut request = BatchRequest::new(entity, years, cli.kinds).with_concurrency(config.concurrency);
    if let Some(timeout) = config.timeout {
        request = request.with_timeout(timeout);
    }

    let batch = orchestrator.run_batch(request).await?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_years_lists_and_ranges() {
        let raw = vec!["2019-2021".to_string(), " 2024".to_string()];
        assert_eq!(parse_years(&raw).unwrap(), vec![2019, 2020, 2021, 2024]);
    }

    #[test]
    fn test_parse_years_rejects_garbage() {
        assert!(parse_years(&["20x1".to_string()]).is_err());
        assert!(parse_years(&["2024-2020".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_kinds() {
        let cli = Cli::try_parse_from([
            "filing-extract",
            "--entity",
            "NVDA",
            "--years",
            "2023,2024",
            "--kinds",
            "risk_summary,ai-analysis",
        ])
        .unwrap();
        assert_eq!(cli.kinds, vec![SchemaKind::RiskSummary, SchemaKind::AiAnalysis]);
        assert_eq!(cli.years, vec!["2023", "2024"]);
    }
}
