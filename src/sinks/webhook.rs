use anyhow::{Context, anyhow};
use reqwest::Url;
use serde_json::json;

use super::Sink;

/// Posts each row to an HTTP endpoint as `{"values": [...]}`.
///
/// This is the shape a spreadsheet script endpoint (e.g. an Apps
/// Script web app calling `appendRow`) expects.
pub struct WebhookSink {
    id: String,
    url: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(id: &str, url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid webhook url {url}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("unsupported webhook scheme: {}", url.scheme()));
        }

        Ok(Self {
            id: id.to_string(),
            url,
            token,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl Sink for WebhookSink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn append_row(&self, row: &[String]) -> anyhow::Result<()> {
        let mut req = self.http.post(self.url.clone()).json(&json!({ "values": row }));
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }

        req.send().await?.error_for_status()?;
        Ok(())
    }
}
