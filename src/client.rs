//! Seq 服务端的客户端抽象与 HTTP 实现。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures::stream::{BoxStream, Stream};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::SeqConfig;
use crate::error::{Result, SeqMcpError};
use crate::model::{Event, Signal};

pub type EventStream = BoxStream<'static, Result<Event>>;

const API_KEY_HEADER: &str = "X-Seq-ApiKey";

/// 已连接到某个工作区的 Seq 客户端。
///
/// 事件以流的形式返回；丢弃流即取消进行中的请求。
#[async_trait]
pub trait SeqClient: Send + Sync {
    /// 按过滤条件枚举历史事件，最多 `count` 条，保持服务端顺序。
    fn enumerate_events(&self, filter: &str, count: usize, render: bool) -> EventStream;

    /// 实时订阅：只产出订阅开始之后到达的事件，永不自行结束。
    fn stream_events(&self, filter: Option<&str>) -> EventStream;

    async fn list_signals(&self, shared_only: bool) -> Result<Vec<Signal>>;
}

/// 根据工作区名称提供客户端。`None` 表示默认工作区。
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, workspace: Option<&str>) -> Result<Arc<dyn SeqClient>>;
}

#[derive(Clone)]
pub struct HttpSeqClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
    poll_interval: Duration,
}

impl HttpSeqClient {
    pub fn new(server_url: &str, api_key: Option<String>, cfg: &SeqConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: cfg.page_size.max(1),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let rb = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.api_key {
            Some(key) => rb.header(API_KEY_HEADER, key),
            None => rb,
        }
    }

    async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SeqMcpError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    async fn fetch_events(&self, query: &[(&str, String)]) -> Result<Vec<Event>> {
        debug!(base = %self.base_url, ?query, "GET api/events");
        let resp = self.get("api/events").query(query).send().await?;
        Self::read_json(resp).await
    }
}

fn paged_events(
    client: HttpSeqClient,
    filter: String,
    count: usize,
    render: bool,
) -> impl Stream<Item = Result<Event>> {
    try_stream! {
        let mut remaining = count;
        let mut after_id: Option<String> = None;
        while remaining > 0 {
            let take = remaining.min(client.page_size);
            let mut query = vec![("count", take.to_string()), ("render", render.to_string())];
            if !filter.is_empty() {
                query.push(("filter", filter.clone()));
            }
            if let Some(id) = &after_id {
                query.push(("afterId", id.clone()));
            }
            let page: Vec<Event> = client.fetch_events(&query).await?;
            let fetched = page.len().min(take);
            after_id = page.last().and_then(|e| e.id.clone());
            for ev in page.into_iter().take(take) {
                yield ev;
            }
            remaining -= fetched;
            if fetched < take || after_id.is_none() {
                break;
            }
        }
    }
}

/// 轮询下界相对订阅时刻的回退量，容纳时钟偏差和批量上报造成的迟到事件。
const LIVE_GRACE_SECS: i64 = 60;

/// 轮询模拟的实时订阅，按时间正序产出订阅开始之后到达的事件。
///
/// `fromDateUtc` 下界固定不动：事件时间戳来自上报方，不代表到达顺序。
/// 首次轮询取到的事件视为订阅前已存在，只记录 id 不产出；之后靠 id 去重。
fn polled_events(client: HttpSeqClient, filter: Option<String>) -> impl Stream<Item = Result<Event>> {
    try_stream! {
        let since = (Utc::now() - chrono::Duration::seconds(LIVE_GRACE_SECS))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut seen: HashSet<String> = HashSet::new();
        let mut primed = false;
        let mut ticker = tokio::time::interval(client.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let mut query = vec![
                ("count", client.page_size.to_string()),
                ("render", "true".to_string()),
                ("fromDateUtc", since.clone()),
            ];
            if let Some(f) = &filter {
                query.push(("filter", f.clone()));
            }
            let mut page: Vec<Event> = client.fetch_events(&query).await?;
            if !primed {
                seen.extend(page.into_iter().filter_map(|e| e.id));
                primed = true;
                continue;
            }
            // 服务端按时间倒序返回
            page.reverse();
            for ev in page {
                if let Some(id) = &ev.id {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                }
                yield ev;
            }
        }
    }
}

#[async_trait]
impl SeqClient for HttpSeqClient {
    fn enumerate_events(&self, filter: &str, count: usize, render: bool) -> EventStream {
        Box::pin(paged_events(self.clone(), filter.to_string(), count, render))
    }

    fn stream_events(&self, filter: Option<&str>) -> EventStream {
        let filter = filter
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        Box::pin(polled_events(self.clone(), filter))
    }

    async fn list_signals(&self, shared_only: bool) -> Result<Vec<Signal>> {
        let mut req = self.get("api/signals");
        if shared_only {
            req = req.query(&[("shared", "true")]);
        }
        let resp = req.send().await?;
        let mut signals: Vec<Signal> = Self::read_json(resp).await?;
        if shared_only {
            signals.retain(|s| s.owner_id.is_none());
        }
        Ok(signals)
    }
}

/// 按配置的工作区构建并持有 HTTP 客户端。
pub struct WorkspaceConnectionFactory {
    default_workspace: String,
    clients: HashMap<String, Arc<HttpSeqClient>>,
}

impl WorkspaceConnectionFactory {
    pub fn new(cfg: &SeqConfig) -> Result<Self> {
        let mut clients = HashMap::new();
        for (name, ws) in &cfg.workspaces {
            let client = HttpSeqClient::new(&ws.server_url, ws.resolve_api_key(), cfg)?;
            info!(workspace = %name, server = %client.base_url(), "workspace registered");
            clients.insert(name.clone(), Arc::new(client));
        }
        if !clients.contains_key(&cfg.default_workspace) {
            return Err(SeqMcpError::Config(format!(
                "默认工作区不存在: {}",
                cfg.default_workspace
            )));
        }
        Ok(Self {
            default_workspace: cfg.default_workspace.clone(),
            clients,
        })
    }

    pub fn workspaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ConnectionFactory for WorkspaceConnectionFactory {
    fn connect(&self, workspace: Option<&str>) -> Result<Arc<dyn SeqClient>> {
        let name = workspace
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .unwrap_or(&self.default_workspace);
        self.clients
            .get(name)
            .map(|c| c.clone() as Arc<dyn SeqClient>)
            .ok_or_else(|| SeqMcpError::UnknownWorkspace(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;

    fn seq_config() -> SeqConfig {
        let mut cfg = SeqConfig::default();
        cfg.default_workspace = "prod".to_string();
        for (name, url) in [("prod", "http://prod:5341/"), ("dev", "http://dev:5341")] {
            cfg.workspaces.insert(
                name.to_string(),
                WorkspaceConfig {
                    server_url: url.to_string(),
                    api_key: None,
                    api_key_env: None,
                },
            );
        }
        cfg
    }

    #[test]
    fn connect_defaults_to_default_workspace() {
        let factory = WorkspaceConnectionFactory::new(&seq_config()).unwrap();
        assert_eq!(factory.workspaces(), vec!["dev", "prod"]);
        assert!(factory.connect(None).is_ok());
        assert!(factory.connect(Some("")).is_ok());
        assert!(factory.connect(Some("dev")).is_ok());
    }

    #[test]
    fn unknown_workspace_is_caller_error() {
        let factory = WorkspaceConnectionFactory::new(&seq_config()).unwrap();
        let err = factory.connect(Some("staging")).err().unwrap();
        assert!(matches!(err, SeqMcpError::UnknownWorkspace(ref w) if w == "staging"));
        assert!(err.is_caller_error());
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = HttpSeqClient::new("http://prod:5341/", None, &SeqConfig::default()).unwrap();
        assert_eq!(client.base_url(), "http://prod:5341");
    }
}
