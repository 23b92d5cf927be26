use super::request::ExtractionRequest;
use crate::llm::Message;

pub const SYSTEM_PROMPT: &str = "You are a financial analyst extracting structured data from SEC filings. \
You read the filing text you are given and nothing else. Output a single valid JSON object that matches \
the requested schema. Use null for facts the text does not state; never invent values.";

/// Opening messages for an extraction call.
pub fn initial_messages(request: &ExtractionRequest) -> Vec<Message> {
    let descriptor = request.descriptor;
    let schema = serde_json::to_string_pretty(&descriptor.schema_hint())
        .unwrap_or_else(|_| descriptor.schema_hint().to_string());

    let prompt = format!(
        "{instructions}\n\n\
         Company: {entity}\n\
         Fiscal year: {year}\n\n\
         Output valid JSON matching this schema:\n{schema}\n\n\
         Text to analyze:\n{text}\n\n\
         Respond with ONLY valid JSON, no other text.",
        instructions = descriptor.instructions,
        entity = request.entity,
        year = request.fiscal_year,
        schema = schema,
        text = request.text,
    );

    vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)]
}

/// Follow-up sent when a response could not be used, asking for strict output.
pub fn strict_format_reminder(request: &ExtractionRequest, problem: &str) -> String {
    let required: Vec<&str> = request
        .descriptor
        .required_fields()
        .map(|f| f.name)
        .collect();

    format!(
        "Your previous response could not be used: {problem}.\n\
         Reply again with exactly one JSON object and nothing else: no markdown fences, \
         no commentary, no trailing text. Every one of these fields must be present \
         with the declared type: {fields}. Use null only for optional fields.",
        problem = problem,
        fields = required.join(", "),
    )
}
