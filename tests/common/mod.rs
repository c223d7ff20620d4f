//! 工具测试用的内存版 Seq 客户端。

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::json;

use seq_mcp::alias::AliasResolver;
use seq_mcp::client::{ConnectionFactory, EventStream, SeqClient};
use seq_mcp::error::{Result, SeqMcpError};
use seq_mcp::model::{Event, Signal};
use seq_mcp::tools::SeqTools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 返回预置的事件。
    Ready,
    /// 永不完成。
    Pending,
    /// 返回服务端错误。
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerateCall {
    pub filter: String,
    pub count: usize,
    pub render: bool,
}

pub struct FakeClient {
    pub mode: Mode,
    pub events: Vec<Event>,
    /// 实时流先产出这些事件，之后保持挂起。
    pub live: Vec<Event>,
    pub signals: Vec<Signal>,
    pub enumerate_calls: Mutex<Vec<EnumerateCall>>,
    pub stream_calls: Mutex<Vec<Option<String>>>,
    pub signal_calls: Mutex<Vec<bool>>,
}

impl FakeClient {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            events: Vec::new(),
            live: Vec::new(),
            signals: Vec::new(),
            enumerate_calls: Mutex::new(Vec::new()),
            stream_calls: Mutex::new(Vec::new()),
            signal_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    pub fn with_live(mut self, live: Vec<Event>) -> Self {
        self.live = live;
        self
    }

    pub fn with_signals(mut self, signals: Vec<Signal>) -> Self {
        self.signals = signals;
        self
    }

    pub fn last_filter(&self) -> String {
        self.enumerate_calls
            .lock()
            .unwrap()
            .last()
            .map(|c| c.filter.clone())
            .expect("no enumerate call")
    }

    fn server_error() -> SeqMcpError {
        SeqMcpError::Server {
            status: 503,
            body: "seq unavailable".into(),
        }
    }
}

#[async_trait]
impl SeqClient for FakeClient {
    fn enumerate_events(&self, filter: &str, count: usize, render: bool) -> EventStream {
        self.enumerate_calls.lock().unwrap().push(EnumerateCall {
            filter: filter.to_string(),
            count,
            render,
        });
        match self.mode {
            Mode::Ready => {
                let items: Vec<Result<Event>> = self.events.iter().cloned().take(count).map(Ok).collect();
                Box::pin(stream::iter(items))
            }
            Mode::Pending => Box::pin(stream::pending::<Result<Event>>()),
            Mode::Fail => Box::pin(stream::iter(vec![Err::<Event, _>(Self::server_error())])),
        }
    }

    fn stream_events(&self, filter: Option<&str>) -> EventStream {
        self.stream_calls
            .lock()
            .unwrap()
            .push(filter.map(str::to_string));
        match self.mode {
            Mode::Fail => Box::pin(stream::iter(vec![Err::<Event, _>(Self::server_error())])),
            _ => {
                let items: Vec<Result<Event>> = self.live.iter().cloned().map(Ok).collect();
                Box::pin(stream::iter(items).chain(stream::pending()))
            }
        }
    }

    async fn list_signals(&self, shared_only: bool) -> Result<Vec<Signal>> {
        self.signal_calls.lock().unwrap().push(shared_only);
        match self.mode {
            Mode::Ready => Ok(self.signals.clone()),
            Mode::Pending => futures::future::pending().await,
            Mode::Fail => Err(Self::server_error()),
        }
    }
}

pub struct FakeFactory {
    pub client: Arc<FakeClient>,
    pub connects: Mutex<Vec<Option<String>>>,
}

impl ConnectionFactory for FakeFactory {
    fn connect(&self, workspace: Option<&str>) -> Result<Arc<dyn SeqClient>> {
        self.connects
            .lock()
            .unwrap()
            .push(workspace.map(str::to_string));
        if workspace == Some("missing") {
            return Err(SeqMcpError::UnknownWorkspace("missing".into()));
        }
        Ok(self.client.clone())
    }
}

impl FakeFactory {
    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

pub fn tools_with(client: FakeClient) -> (SeqTools, Arc<FakeFactory>, Arc<FakeClient>) {
    let client = Arc::new(client);
    let factory = Arc::new(FakeFactory {
        client: client.clone(),
        connects: Mutex::new(Vec::new()),
    });
    let tools = SeqTools::new(factory.clone(), Arc::new(AliasResolver::builtin()));
    (tools, factory, client)
}

pub fn event(id: &str) -> Event {
    serde_json::from_value(json!({
        "Id": id,
        "Timestamp": "2024-05-01T10:00:00.0000000Z",
        "Level": "Information",
        "RenderedMessage": format!("message {id}"),
        "Properties": [{ "Name": "AppName", "Value": "pims-services" }]
    }))
    .unwrap()
}

pub fn signal(id: &str, title: &str) -> Signal {
    serde_json::from_value(json!({
        "Id": id,
        "Title": title,
        "Filters": [{ "Filter": "@Level = 'Error'" }]
    }))
    .unwrap()
}
