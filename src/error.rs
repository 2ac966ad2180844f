use thiserror::Error;

/// 消息解析错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// 无法解码为 JSON 对象
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Token 解析错误（唯一的失败路径：目录查询失败）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("token directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl From<DirectoryError> for ResolveError {
    fn from(err: DirectoryError) -> Self {
        ResolveError::DirectoryUnavailable(err.to_string())
    }
}

/// Token 目录错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// 目录服务不可达或返回错误
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    /// 条目不存在
    #[error("directory entry not found: {0}")]
    NotFound(String),
    /// 文档结构无法解析
    #[error("directory decode error: {0}")]
    Decode(String),
    /// 认证失败
    #[error("directory auth error: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DirectoryError::Decode(err.to_string())
        } else {
            DirectoryError::Unavailable(err.to_string())
        }
    }
}

impl From<AuthError> for DirectoryError {
    fn from(err: AuthError) -> Self {
        DirectoryError::Auth(err.to_string())
    }
}

/// 推送服务商返回的错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// 设备已注销
    #[error("device unregistered: {0}")]
    Unregistered(String),
    /// Token 格式无效或不属于当前项目
    #[error("invalid registration token: {0}")]
    InvalidToken(String),
    /// 被限流（可选 retry-after 秒数）
    #[error("rate limited (retry after {0:?}s)")]
    RateLimited(Option<u64>),
    /// 服务暂不可用
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// 网络错误
    #[error("network error: {0}")]
    Network(String),
    /// 请求超时
    #[error("request timed out")]
    Timeout,
    /// 认证失败
    #[error("provider auth error: {0}")]
    Auth(String),
    /// 其他拒绝
    #[error("rejected by provider: status={status}, {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<AuthError> for ProviderError {
    fn from(err: AuthError) -> Self {
        ProviderError::Auth(err.to_string())
    }
}

/// Google OAuth2 认证错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("failed to sign assertion: {0}")]
    Signing(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
}

/// 服务级错误
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, BridgeError>;
