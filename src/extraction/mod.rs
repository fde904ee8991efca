//! Extraction layer
//!
//! This module provides:
//! - The `Extractor` trait, wrapping a text-understanding service
//! - `ExtractionAdapter`, the single normalization boundary that
//!   turns service output into a `JobRecord`
//!
//! No other module inspects raw extraction output.

pub mod azure;

use std::sync::Arc;

use anyhow::{anyhow, bail};
use serde_json::{Map, Value};

use crate::config::ExtractionConfig;
use crate::metrics::{METRICS, RuntimeMetrics};
use crate::schema::{FieldSchema, JobRecord};

/// Raw structured output: field key → JSON value.
pub type ExtractedFields = Map<String, Value>;

/// One request to the extraction service.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    /// Fixed instruction describing the target schema
    pub instruction: &'a str,

    /// Fields the service must return
    pub schema: &'a FieldSchema,

    /// Message text to analyse
    pub text: &'a str,
}

/// Extractor wraps a concrete text-understanding service.
///
/// CONTRACT:
/// - Returns the service's structured object as-is
/// - Any transport, status or parse failure is an `Err`
/// - Must not normalize; `ExtractionAdapter` does that
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn infer(&self, request: ExtractionRequest<'_>) -> anyhow::Result<ExtractedFields>;
}

/// Builds the configured extractor.
pub fn build_extractor(cfg: &ExtractionConfig) -> anyhow::Result<Arc<dyn Extractor>> {
    Ok(Arc::new(azure::AzureOpenAiExtractor::new(cfg)?))
}

/// Builds the fixed system instruction for a schema.
pub fn instruction_for(schema: &FieldSchema) -> String {
    let mut out = String::from(
        "Extract the following details from the message if it's a job posting:\n",
    );
    for field in schema.fields() {
        out.push_str("- ");
        out.push_str(field.label());
        out.push('\n');
    }

    let keys: Vec<&str> = schema.fields().iter().map(|f| f.key()).collect();
    out.push_str("Return the details as a JSON object with exact keys: ");
    out.push_str(&keys.join(", "));
    out.push_str(".\nIf any information is missing, leave it as an empty string.");
    out
}

// ------------------------------------------------------------
// Extraction adapter
// ------------------------------------------------------------
//
// Turns one message text into one JobRecord. Never fails: any
// service error or schema mismatch becomes the empty sentinel.
//
pub struct ExtractionAdapter {
    extractor: Arc<dyn Extractor>,
    schema: FieldSchema,
    instruction: String,
}

impl ExtractionAdapter {
    pub fn new(config: &ExtractionConfig, extractor: Arc<dyn Extractor>) -> Self {
        Self::with_schema(FieldSchema::from_config(config.fields.as_deref()), extractor)
    }

    pub fn with_schema(schema: FieldSchema, extractor: Arc<dyn Extractor>) -> Self {
        let instruction = instruction_for(&schema);
        Self {
            extractor,
            schema,
            instruction,
        }
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub async fn extract(&self, text: &str) -> JobRecord {
        let request = ExtractionRequest {
            instruction: &self.instruction,
            schema: &self.schema,
            text,
        };

        let result = self
            .extractor
            .infer(request)
            .await
            .and_then(|fields| normalize(&self.schema, &fields));

        match result {
            Ok(record) => {
                if record.is_empty() {
                    log::debug!("No job details in extraction response");
                } else {
                    log::debug!("Structured job details: {:?}", record);
                }
                record
            }
            Err(e) => {
                log::error!("Error in {} extraction response: {:#}", self.extractor.name(), e);
                RuntimeMetrics::incr(&METRICS.extraction_failures);
                JobRecord::empty()
            }
        }
    }
}

/// Validates and normalizes raw service output.
///
/// RULES:
/// - Every schema key must be present (`null` counts as empty)
/// - Strings are trimmed; numbers are rendered as text
/// - Any other JSON type is a schema violation
/// - Keys outside the schema are ignored
/// - A record without any primary field collapses to the sentinel
fn normalize(schema: &FieldSchema, fields: &ExtractedFields) -> anyhow::Result<JobRecord> {
    let mut record = JobRecord::empty();

    for field in schema.fields() {
        let value = fields
            .get(field.key())
            .ok_or_else(|| anyhow!("missing field `{}`", field.key()))?;

        let text = match value {
            Value::Null => String::new(),
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => bail!("field `{}` has unexpected type: {}", field.key(), other),
        };
        record.set(*field, text);
    }

    let has_primary = schema
        .fields()
        .iter()
        .any(|f| f.is_primary() && !record.get(*f).is_empty());
    if !has_primary {
        return Ok(JobRecord::empty());
    }

    Ok(record)
}
