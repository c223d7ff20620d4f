use thiserror::Error;

pub type Result<T> = std::result::Result<T, SeqMcpError>;

#[derive(Debug, Error)]
pub enum SeqMcpError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("未知工作区: {0}")]
    UnknownWorkspace(String),

    #[error("Seq 服务返回错误 {status}: {body}")]
    Server { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SeqMcpError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SeqMcpError::InvalidArgument(msg.into())
    }

    /// 调用方错误：参数或工作区不合法，未联系 Seq 服务即被拒绝。
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SeqMcpError::InvalidArgument(_) | SeqMcpError::UnknownWorkspace(_)
        )
    }
}
