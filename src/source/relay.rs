use std::collections::HashSet;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt, TryStreamExt, stream};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{MessageSource, MessageStream};
use crate::config::SourceConfig;
use crate::schema::{ChannelHandle, RawMessage};

/// Live queue depth between the socket reader and the pipeline.
const LIVE_QUEUE: usize = 1_024;

/// Relay message source
///
/// Talks to a message relay that fronts the channel-messaging
/// network:
///
/// - `GET  {api}/channels?ref=<id>`                      → `{"title": ...}`
/// - `GET  {api}/messages?channel=<id>&since=&offset=&limit=` → `[{"timestamp","text"}]`
/// - `WS   {live}` subscribe frame, then one frame per new message
///
/// History pages are returned oldest first by the relay.
pub struct RelaySource {
    http: reqwest::Client,
    api: Url,
    live_url: String,
    token: Option<String>,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryItem {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LiveFrame {
    channel: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    text: Option<String>,
}

impl RelaySource {
    pub fn new(cfg: &SourceConfig) -> anyhow::Result<Self> {
        // `Url::join` drops the last segment unless the base ends in '/'
        let mut base = cfg.api_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api: Url::parse(&base).with_context(|| format!("invalid relay url {}", cfg.api_url))?,
            live_url: cfg.live_url.clone(),
            token: cfg.token.clone(),
            page_size: cfg.page_size.max(1),
        })
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        authorized(self.http.get(url), self.token.as_deref())
    }

    fn pager(&self, channel_ref: &str, since: DateTime<Utc>) -> HistoryPager {
        HistoryPager {
            http: self.http.clone(),
            token: self.token.clone(),
            api: self.api.clone(),
            channel_ref: channel_ref.to_string(),
            since,
            page_size: self.page_size,
        }
    }

    fn subscribe_frame(&self, channels: &[ChannelHandle]) -> serde_json::Value {
        let refs: Vec<&str> = channels.iter().map(|c| c.channel_ref.as_str()).collect();
        json!({
            "op": "subscribe",
            "channels": refs,
            "token": self.token,
        })
    }
}

/// Attaches the relay bearer token, when configured.
fn authorized(req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(t) => req.bearer_auth(t),
        None => req,
    }
}

/// Parses one live frame.
///
/// Returns `None` for acks, heartbeats, blank messages and
/// anything that is not a message frame. Never panics.
fn parse_live_frame(raw: &str) -> Option<RawMessage> {
    let frame: LiveFrame = serde_json::from_str(raw).ok()?;
    RawMessage::new(frame.channel, frame.timestamp, frame.text.unwrap_or_default())
}

#[async_trait::async_trait]
impl MessageSource for RelaySource {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn resolve(&self, identifier: &str) -> anyhow::Result<ChannelHandle> {
        let mut url = self.api.join("channels")?;
        url.query_pairs_mut().append_pair("ref", identifier);

        let info: ChannelInfo = self
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("malformed channel info")?;

        Ok(ChannelHandle {
            channel_ref: identifier.to_string(),
            display_name: info.title.unwrap_or_else(|| identifier.to_string()),
        })
    }

    async fn replay_messages(
        &self,
        channel: &ChannelHandle,
        since: DateTime<Utc>,
    ) -> anyhow::Result<MessageStream> {
        // Pages are fetched lazily as the consumer drains the stream
        struct Cursor {
            offset: usize,
            done: bool,
        }

        let pager = self.pager(&channel.channel_ref, since);

        let pages = stream::try_unfold(Cursor { offset: 0, done: false }, move |cur| {
            let pager = pager.clone();
            async move {
                if cur.done {
                    return Ok(None);
                }

                let items = pager.fetch(cur.offset).await?;
                let fetched = items.len();
                let mut page: Vec<RawMessage> = items
                    .into_iter()
                    .filter_map(|i| {
                        RawMessage::new(pager.channel_ref.as_str(), i.timestamp, i.text.unwrap_or_default())
                    })
                    .collect();
                page.sort_by_key(|m| m.timestamp);

                let next = Cursor {
                    offset: cur.offset + fetched,
                    done: fetched < pager.page_size,
                };
                Ok::<_, anyhow::Error>(Some((page, next)))
            }
        });

        Ok(pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<RawMessage, anyhow::Error>)))
            .try_flatten()
            .boxed())
    }

    async fn subscribe(
        &self,
        channels: &[ChannelHandle],
    ) -> anyhow::Result<mpsc::Receiver<RawMessage>> {
        let (ws, _) = connect_async(self.live_url.as_str())
            .await
            .with_context(|| format!("live connect failed: {}", self.live_url))?;
        let (mut write, mut read) = ws.split();

        let sub = self.subscribe_frame(channels);
        write.send(Message::Text(sub.to_string().into())).await?;

        let wanted: HashSet<String> = channels.iter().map(|c| c.channel_ref.clone()).collect();
        let (tx, rx) = mpsc::channel(LIVE_QUEUE);

        // ------------------------------------------------------------
        // READER TASK
        // ------------------------------------------------------------
        // Ends on close or error; dropping `tx` tells the pipeline
        // the transport is gone.
        tokio::spawn(async move {
            let _write = write;

            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Some(msg) = parse_live_frame(&text) else {
                            continue;
                        };
                        if !wanted.contains(&msg.channel_ref) {
                            continue;
                        }
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }

                    Ok(Message::Close(_)) => break,

                    // Ignore ping/pong/binary
                    Ok(_) => {}

                    Err(e) => {
                        log::warn!("relay live read failed: {}", e);
                        break;
                    }
                }
            }

            log::warn!("relay live stream ended");
        });

        Ok(rx)
    }
}

/// Fetches history pages for one channel.
#[derive(Clone)]
struct HistoryPager {
    http: reqwest::Client,
    token: Option<String>,
    api: Url,
    channel_ref: String,
    since: DateTime<Utc>,
    page_size: usize,
}

impl HistoryPager {
    fn url(&self, offset: usize) -> anyhow::Result<Url> {
        let mut url = self.api.join("messages")?;
        url.query_pairs_mut()
            .append_pair("channel", &self.channel_ref)
            .append_pair("since", &self.since.to_rfc3339_opts(SecondsFormat::Secs, true))
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &self.page_size.to_string());
        Ok(url)
    }

    async fn fetch(&self, offset: usize) -> anyhow::Result<Vec<HistoryItem>> {
        let req = authorized(self.http.get(self.url(offset)?), self.token.as_deref());

        let items = req
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("malformed history page at offset {offset}"))?;
        Ok(items)
    }
}
