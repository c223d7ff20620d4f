use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqMcpError};

pub const DEFAULT_WORKSPACE: &str = "default";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5341";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    pub http_addr: Option<String>,
    pub http_port: Option<u16>,
}

/// 单个工作区（租户）的连接信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub server_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// 从环境变量读取 API key，优先级低于 `api_key`。
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl WorkspaceConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok())
                    .filter(|k| !k.is_empty())
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqConfig {
    #[serde(default = "default_workspace_name")]
    pub default_workspace: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub workspaces: HashMap<String, WorkspaceConfig>,
}

impl Default for SeqConfig {
    fn default() -> Self {
        Self {
            default_workspace: default_workspace_name(),
            request_timeout_ms: default_request_timeout_ms(),
            page_size: default_page_size(),
            poll_interval_ms: default_poll_interval_ms(),
            workspaces: HashMap::new(),
        }
    }
}

fn default_workspace_name() -> String {
    DEFAULT_WORKSPACE.to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_page_size() -> usize {
    500
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub seq: SeqConfig,
    /// 额外的应用别名，覆盖或补充内置别名表。
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Config {
    /// 按扩展名加载 YAML 或 JSON 配置文件。
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SeqMcpError::Config(format!("无法读取 {}: {e}", path.display()))
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let cfg: Config = if is_json {
            serde_json::from_str(&text)
                .map_err(|e| SeqMcpError::Config(format!("JSON 解析失败: {e}")))?
        } else {
            serde_yaml::from_str(&text)
                .map_err(|e| SeqMcpError::Config(format!("YAML 解析失败: {e}")))?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// 无配置文件时，从 SEQ_SERVER_URL / SEQ_API_KEY 构建单一 default 工作区。
    pub fn from_env() -> Self {
        let server_url =
            std::env::var("SEQ_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let mut cfg = Config::default();
        cfg.seq.workspaces.insert(
            DEFAULT_WORKSPACE.to_string(),
            WorkspaceConfig {
                server_url,
                api_key: None,
                api_key_env: Some("SEQ_API_KEY".to_string()),
            },
        );
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.seq.workspaces.is_empty() {
            return Err(SeqMcpError::Config("至少需要配置一个工作区".into()));
        }
        if !self.seq.workspaces.contains_key(&self.seq.default_workspace) {
            return Err(SeqMcpError::Config(format!(
                "默认工作区不存在: {}",
                self.seq.default_workspace
            )));
        }
        for (name, ws) in &self.seq.workspaces {
            if ws.server_url.trim().is_empty() {
                return Err(SeqMcpError::Config(format!("工作区 {name} 缺少 server_url")));
            }
        }
        if self.seq.page_size == 0 {
            return Err(SeqMcpError::Config("page_size 必须大于 0".into()));
        }
        if self.seq.poll_interval_ms == 0 {
            return Err(SeqMcpError::Config("poll_interval_ms 必须大于 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(suffix: &str, body: &str) -> NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_yaml_with_defaults() {
        let f = write_config(
            ".yaml",
            r#"
seq:
  workspaces:
    default:
      server_url: http://seq.local:5341
      api_key: abc
aliases:
  billing: billing-api
"#,
        );
        let cfg = Config::load_from_path(f.path()).unwrap();
        assert_eq!(cfg.server.mode, ServerMode::Stdio);
        assert_eq!(cfg.seq.default_workspace, "default");
        assert_eq!(cfg.seq.page_size, 500);
        assert_eq!(cfg.seq.poll_interval_ms, 500);
        assert_eq!(cfg.aliases.get("billing").map(String::as_str), Some("billing-api"));
        let ws = &cfg.seq.workspaces["default"];
        assert_eq!(ws.resolve_api_key().as_deref(), Some("abc"));
    }

    #[test]
    fn loads_json_by_extension() {
        let f = write_config(
            ".json",
            r#"{"server":{"mode":"http","http_port":8080},
                "seq":{"default_workspace":"prod",
                       "workspaces":{"prod":{"server_url":"https://seq.example"}}}}"#,
        );
        let cfg = Config::load_from_path(f.path()).unwrap();
        assert_eq!(cfg.server.mode, ServerMode::Http);
        assert_eq!(cfg.server.http_port, Some(8080));
        assert!(cfg.seq.workspaces.contains_key("prod"));
    }

    #[test]
    fn missing_default_workspace_is_rejected() {
        let f = write_config(
            ".yaml",
            r#"
seq:
  default_workspace: staging
  workspaces:
    prod:
      server_url: https://seq.example
"#,
        );
        let err = Config::load_from_path(f.path()).unwrap_err();
        assert!(matches!(err, SeqMcpError::Config(_)));
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn empty_workspaces_are_rejected() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_config_has_default_workspace() {
        let cfg = Config::from_env();
        assert!(cfg.validate().is_ok());
        assert!(cfg.seq.workspaces.contains_key(DEFAULT_WORKSPACE));
    }
}
