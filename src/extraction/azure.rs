use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{ExtractedFields, ExtractionRequest, Extractor};
use crate::config::ExtractionConfig;
use crate::schema::FieldSchema;

/// Azure OpenAI chat-completions extractor.
///
/// Uses the `json_schema` response format (strict) so the model
/// must return exactly the configured keys.
///
/// REST:
/// POST {endpoint}/openai/deployments/{deployment}/chat/completions?api-version=...
pub struct AzureOpenAiExtractor {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

impl AzureOpenAiExtractor {
    pub fn new(cfg: &ExtractionConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = cfg.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            http: builder.build()?,
            url: completions_url(cfg),
            api_key: cfg.resolve_api_key()?,
        })
    }
}

fn completions_url(cfg: &ExtractionConfig) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        cfg.endpoint.trim_end_matches('/'),
        cfg.deployment,
        cfg.api_version
    )
}

/// Strict JSON schema for the configured fields. Every key is
/// required and typed as string; absence is an empty string.
fn response_schema(schema: &FieldSchema) -> Value {
    let mut properties = Map::new();
    for field in schema.fields() {
        properties.insert(
            field.key().to_string(),
            json!({ "type": "string", "description": field.description() }),
        );
    }
    let required: Vec<&str> = schema.fields().iter().map(|f| f.key()).collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn request_body(request: &ExtractionRequest<'_>) -> Value {
    json!({
        "messages": [
            { "role": "system", "content": request.instruction },
            { "role": "user", "content": request.text },
        ],
        "temperature": 0,
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": "job_details",
                "strict": true,
                "schema": response_schema(request.schema),
            }
        }
    })
}

/// Pulls the structured object out of a chat-completions reply.
fn parse_reply(resp: ChatResponse) -> anyhow::Result<ExtractedFields> {
    let message = resp
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| anyhow!("no choices in response"))?;

    if let Some(refusal) = message.refusal {
        return Err(anyhow!("model refused: {refusal}"));
    }

    let content = message.content.ok_or_else(|| anyhow!("empty message content"))?;
    match serde_json::from_str::<Value>(&content).context("content is not JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected JSON object, got {other}")),
    }
}

#[async_trait::async_trait]
impl Extractor for AzureOpenAiExtractor {
    fn name(&self) -> &'static str {
        "azure-openai"
    }

    async fn infer(&self, request: ExtractionRequest<'_>) -> anyhow::Result<ExtractedFields> {
        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&request_body(&request))
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error {status}: {error_text}"));
        }

        let body: ChatResponse = response.json().await.context("malformed response")?;
        parse_reply(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::JobField;

    fn reply(content: Value) -> ChatResponse {
        serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }))
        .unwrap()
    }

    #[test]
    fn builds_deployment_url() {
        let cfg = ExtractionConfig {
            endpoint: "https://x.openai.azure.com/".into(),
            deployment: "gpt-4o".into(),
            api_version: "2024-08-01-preview".into(),
            api_key: Some("k".into()),
            request_timeout_secs: None,
            fields: None,
        };

        assert_eq!(
            completions_url(&cfg),
            "https://x.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-08-01-preview"
        );
    }

    #[test]
    fn schema_requires_configured_keys_only() {
        let schema = FieldSchema::from_config(Some(&[JobField::Ctc]));
        let v = response_schema(&schema);

        assert_eq!(v["required"], json!(["company_name", "job_role", "ctc"]));
        assert!(v["properties"].get("application_link").is_none());
        assert_eq!(v["additionalProperties"], json!(false));
    }

    #[test]
    fn body_carries_instruction_and_text() {
        let schema = FieldSchema::all();
        let body = request_body(&ExtractionRequest {
            instruction: "extract",
            schema: &schema,
            text: "Acme hiring",
        });

        assert_eq!(body["messages"][0]["content"], "extract");
        assert_eq!(body["messages"][1]["content"], "Acme hiring");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn parses_object_content() {
        let fields = parse_reply(reply(json!(r#"{"company_name":"Acme","job_role":"SDE"}"#))).unwrap();
        assert_eq!(fields["company_name"], "Acme");
    }

    #[test]
    fn rejects_bad_replies() {
        assert!(parse_reply(reply(json!("not json"))).is_err());
        assert!(parse_reply(reply(json!("[1,2]"))).is_err());
        assert!(parse_reply(reply(Value::Null)).is_err());
        assert!(parse_reply(ChatResponse { choices: vec![] }).is_err());

        let refused: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": null, "refusal": "no" } }]
        }))
        .unwrap();
        assert!(parse_reply(refused).is_err());
    }
}
