use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alias::AliasResolver;
use crate::client::{ConnectionFactory, SeqClient};
use crate::error::{Result, SeqMcpError};
use crate::filter::{title_case, FilterBuilder};
use crate::model::{Event, Fetched, Signal};

/// `SeqWaitForEvents` 最长阻塞时间。
pub const LIVE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// `InvocationTrace` 的结果上限，单次调用的日志不会超过此数。
pub const INVOCATION_TRACE_LIMIT: usize = 1000;

const MAX_HOURS: i64 = 8760;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    SeqSearch,
    SeqWaitForEvents,
    SignalList,
    AppSearch,
    InvocationTrace,
    SlowExecutions,
    EntityTrace,
    ErrorDashboard,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::SeqSearch,
        ToolName::SeqWaitForEvents,
        ToolName::SignalList,
        ToolName::AppSearch,
        ToolName::InvocationTrace,
        ToolName::SlowExecutions,
        ToolName::EntityTrace,
        ToolName::ErrorDashboard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::SeqSearch => "SeqSearch",
            ToolName::SeqWaitForEvents => "SeqWaitForEvents",
            ToolName::SignalList => "SignalList",
            ToolName::AppSearch => "AppSearch",
            ToolName::InvocationTrace => "InvocationTrace",
            ToolName::SlowExecutions => "SlowExecutions",
            ToolName::EntityTrace => "EntityTrace",
            ToolName::ErrorDashboard => "ErrorDashboard",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = SeqMcpError;

    fn from_str(s: &str) -> Result<Self> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SeqMcpError::invalid(format!("unknown tool: {s}")))
    }
}

// ---- 参数校验 ----

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SeqMcpError::invalid(format!("{name} is required")));
    }
    Ok(())
}

fn bounded(name: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(SeqMcpError::invalid(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn default_hours() -> i64 {
    24
}

fn default_level() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeqSearchParams {
    #[serde(default)]
    pub filter: String,
    #[serde(default = "SeqSearchParams::default_count")]
    pub count: i64,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl SeqSearchParams {
    fn default_count() -> i64 {
        100
    }

    pub fn validate(&self) -> Result<()> {
        require("filter", &self.filter)?;
        bounded("count", self.count, 1, 1000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForEventsParams {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "WaitForEventsParams::default_count")]
    pub count: i64,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl WaitForEventsParams {
    fn default_count() -> i64 {
        10
    }

    pub fn validate(&self) -> Result<()> {
        bounded("count", self.count, 1, 100)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalListParams {
    #[serde(default)]
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSearchParams {
    #[serde(default)]
    pub app: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default = "AppSearchParams::default_count")]
    pub count: i64,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl AppSearchParams {
    fn default_count() -> i64 {
        50
    }

    pub fn validate(&self) -> Result<()> {
        require("app", &self.app)?;
        bounded("hours", self.hours, 1, MAX_HOURS)?;
        bounded("count", self.count, 1, 500)
    }

    /// level 只做大小写规整，不校验取值；`all` 或空值表示不限级别。
    pub fn filter(&self, aliases: &AliasResolver) -> String {
        let mut f = FilterBuilder::new().eq("AppName", &aliases.resolve(&self.app));
        if !self.level.is_empty() && !self.level.eq_ignore_ascii_case("all") {
            f = f.eq("@Level", &title_case(&self.level));
        }
        f.eq_opt("FunctionName", non_empty(&self.function))
            .within_hours(self.hours as u32)
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationTraceParams {
    #[serde(default)]
    pub invocation_id: String,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl InvocationTraceParams {
    pub fn validate(&self) -> Result<()> {
        require("invocationId", &self.invocation_id)
    }

    pub fn filter(&self) -> String {
        FilterBuilder::new()
            .eq("InvocationId", &self.invocation_id)
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowExecutionsParams {
    #[serde(default = "SlowExecutionsParams::default_threshold")]
    pub threshold_ms: i64,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default = "SlowExecutionsParams::default_count")]
    pub count: i64,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl SlowExecutionsParams {
    fn default_threshold() -> i64 {
        5000
    }

    fn default_count() -> i64 {
        20
    }

    pub fn validate(&self) -> Result<()> {
        bounded("thresholdMs", self.threshold_ms, 1, i64::MAX)?;
        bounded("hours", self.hours, 1, MAX_HOURS)?;
        bounded("count", self.count, 1, 100)
    }

    /// 结果保持服务端的时间倒序，不按耗时排序。
    pub fn filter(&self, aliases: &AliasResolver) -> String {
        let app = non_empty(&self.app).map(|a| aliases.resolve(a));
        FilterBuilder::new()
            .gt("DurationMs", self.threshold_ms as u64)
            .eq_opt("AppName", app.as_deref())
            .eq_opt("FunctionName", non_empty(&self.function))
            .within_hours(self.hours as u32)
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTraceParams {
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default = "EntityTraceParams::default_count")]
    pub count: i64,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl EntityTraceParams {
    fn default_count() -> i64 {
        100
    }

    pub fn validate(&self) -> Result<()> {
        require("entityType", &self.entity_type)?;
        require("entityId", &self.entity_id)?;
        bounded("hours", self.hours, 1, MAX_HOURS)?;
        bounded("count", self.count, 1, 200)
    }

    pub fn filter(&self) -> String {
        FilterBuilder::new()
            .eq("EntityType", &self.entity_type)
            .eq("EntityId", &self.entity_id)
            .within_hours(self.hours as u32)
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDashboardParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default = "ErrorDashboardParams::default_count")]
    pub count: i64,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl ErrorDashboardParams {
    fn default_count() -> i64 {
        200
    }

    pub fn validate(&self) -> Result<()> {
        bounded("hours", self.hours, 1, MAX_HOURS)?;
        bounded("count", self.count, 1, 500)
    }

    /// 返回原始错误事件，分组交给调用方。
    pub fn filter(&self, aliases: &AliasResolver) -> String {
        let app = non_empty(&self.app).map(|a| aliases.resolve(a));
        FilterBuilder::new()
            .eq("@Level", "Error")
            .eq_opt("AppName", app.as_deref())
            .within_hours(self.hours as u32)
            .build()
    }
}

/// 工具集合：校验参数、拼装过滤条件并委托给 Seq 客户端。
///
/// 不持有单次调用的状态，各方法可并发执行。
pub struct SeqTools {
    connections: Arc<dyn ConnectionFactory>,
    aliases: Arc<AliasResolver>,
}

impl SeqTools {
    pub fn new(connections: Arc<dyn ConnectionFactory>, aliases: Arc<AliasResolver>) -> Self {
        Self {
            connections,
            aliases,
        }
    }

    pub async fn seq_search(
        &self,
        p: SeqSearchParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        p.validate()?;
        self.search(ToolName::SeqSearch, p.workspace.as_deref(), &p.filter, p.count as usize, cancel)
            .await
    }

    pub async fn wait_for_events(
        &self,
        p: WaitForEventsParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        p.validate()?;
        let client = self.connections.connect(p.workspace.as_deref())?;
        debug!(tool = %ToolName::SeqWaitForEvents, workspace = ?p.workspace, filter = ?p.filter, "live wait");
        let res = wait_live(client.as_ref(), non_empty(&p.filter), p.count as usize, cancel).await;
        report(ToolName::SeqWaitForEvents, &res);
        res
    }

    pub async fn signal_list(
        &self,
        p: SignalListParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Signal>> {
        let client = self.connections.connect(p.workspace.as_deref())?;
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(Fetched::Interrupted(Vec::new())),
            res = client.list_signals(true) => res.map(Fetched::Complete),
        };
        report(ToolName::SignalList, &res);
        res
    }

    pub async fn app_search(
        &self,
        p: AppSearchParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        p.validate()?;
        let filter = p.filter(&self.aliases);
        self.search(ToolName::AppSearch, p.workspace.as_deref(), &filter, p.count as usize, cancel)
            .await
    }

    pub async fn invocation_trace(
        &self,
        p: InvocationTraceParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        p.validate()?;
        self.search(
            ToolName::InvocationTrace,
            p.workspace.as_deref(),
            &p.filter(),
            INVOCATION_TRACE_LIMIT,
            cancel,
        )
        .await
    }

    pub async fn slow_executions(
        &self,
        p: SlowExecutionsParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        p.validate()?;
        let filter = p.filter(&self.aliases);
        self.search(ToolName::SlowExecutions, p.workspace.as_deref(), &filter, p.count as usize, cancel)
            .await
    }

    pub async fn entity_trace(
        &self,
        p: EntityTraceParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        p.validate()?;
        self.search(ToolName::EntityTrace, p.workspace.as_deref(), &p.filter(), p.count as usize, cancel)
            .await
    }

    pub async fn error_dashboard(
        &self,
        p: ErrorDashboardParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        p.validate()?;
        let filter = p.filter(&self.aliases);
        self.search(ToolName::ErrorDashboard, p.workspace.as_deref(), &filter, p.count as usize, cancel)
            .await
    }

    /// 按工具名分发 JSON 参数，结果列表以 JSON 返回。
    pub async fn call(
        &self,
        tool: ToolName,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let value = match tool {
            ToolName::SeqSearch => to_json(self.seq_search(parse_args(args)?, cancel).await?)?,
            ToolName::SeqWaitForEvents => {
                to_json(self.wait_for_events(parse_args(args)?, cancel).await?)?
            }
            ToolName::SignalList => to_json(self.signal_list(parse_args(args)?, cancel).await?)?,
            ToolName::AppSearch => to_json(self.app_search(parse_args(args)?, cancel).await?)?,
            ToolName::InvocationTrace => {
                to_json(self.invocation_trace(parse_args(args)?, cancel).await?)?
            }
            ToolName::SlowExecutions => {
                to_json(self.slow_executions(parse_args(args)?, cancel).await?)?
            }
            ToolName::EntityTrace => to_json(self.entity_trace(parse_args(args)?, cancel).await?)?,
            ToolName::ErrorDashboard => {
                to_json(self.error_dashboard(parse_args(args)?, cancel).await?)?
            }
        };
        Ok(value)
    }

    async fn search(
        &self,
        tool: ToolName,
        workspace: Option<&str>,
        filter: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Event>> {
        let client = self.connections.connect(workspace)?;
        debug!(%tool, ?workspace, %filter, count, "enumerate events");
        let res = enumerate(client.as_ref(), filter, count, cancel).await;
        report(tool, &res);
        res
    }
}

fn parse_args<P: serde::de::DeserializeOwned>(args: Value) -> Result<P> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| SeqMcpError::invalid(format!("invalid arguments: {e}")))
}

fn to_json<T: Serialize>(fetched: Fetched<T>) -> Result<Value> {
    Ok(serde_json::to_value(fetched.into_items())?)
}

fn report<T>(tool: ToolName, res: &Result<Fetched<T>>) {
    match res {
        Ok(Fetched::Complete(items)) => info!(%tool, results = items.len(), "tool completed"),
        Ok(Fetched::Interrupted(items)) => {
            debug!(%tool, results = items.len(), "tool interrupted by cancellation or timeout")
        }
        Err(e) => warn!(%tool, error = %e, "tool failed"),
    }
}

/// 最多收集 `count` 条事件；取消时丢弃已收集的部分，返回空列表。
async fn enumerate(
    client: &dyn SeqClient,
    filter: &str,
    count: usize,
    cancel: &CancellationToken,
) -> Result<Fetched<Event>> {
    let mut stream = client.enumerate_events(filter, count, true);
    let collect = async {
        let mut out = Vec::with_capacity(count.min(INVOCATION_TRACE_LIMIT));
        while let Some(ev) = stream.next().await {
            out.push(ev?);
            if out.len() >= count {
                break;
            }
        }
        Ok::<_, SeqMcpError>(out)
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(Fetched::Interrupted(Vec::new())),
        res = collect => res.map(Fetched::Complete),
    }
}

/// 等待 `count` 条实时事件；调用方取消或超过 `LIVE_WAIT_TIMEOUT` 时返回已收到的部分。
async fn wait_live(
    client: &dyn SeqClient,
    filter: Option<&str>,
    count: usize,
    cancel: &CancellationToken,
) -> Result<Fetched<Event>> {
    let mut stream = client.stream_events(filter);
    let deadline = tokio::time::sleep(LIVE_WAIT_TIMEOUT);
    tokio::pin!(deadline);
    let mut out = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Fetched::Interrupted(out)),
            _ = &mut deadline => return Ok(Fetched::Interrupted(out)),
            next = stream.next() => match next {
                Some(Ok(ev)) => {
                    out.push(ev);
                    if out.len() >= count {
                        return Ok(Fetched::Complete(out));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(Fetched::Complete(out)),
            },
        }
    }
}
