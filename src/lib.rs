//! Seq 日志查询 MCP 工具核心库
//! 把高层参数（应用别名、级别、时间窗口、实体标识）翻译为 Seq 过滤表达式并代为查询。

pub mod alias;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod mcp;
pub mod model;
pub mod tools;
