use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Seq 事件。除了常用字段，服务端返回的其他字段原样保留在 `extra` 中。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(default)]
    pub properties: Vec<EventProperty>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventProperty {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// 保存的搜索（signal）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Signal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub filters: Vec<SignalFilter>,
    /// 私有 signal 才带 owner。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignalFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub filter: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 一次拉取的结果：完整拿到，或被取消/超时打断。
///
/// 取消不是错误，故障走 `Result::Err`。
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Complete(Vec<T>),
    Interrupted(Vec<T>),
}

impl<T> Fetched<T> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Fetched::Interrupted(_))
    }

    pub fn items(&self) -> &[T] {
        match self {
            Fetched::Complete(v) | Fetched::Interrupted(v) => v,
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Fetched::Complete(v) | Fetched::Interrupted(v) => v,
        }
    }
}
