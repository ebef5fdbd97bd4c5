//! 网关错误类型定义

use thiserror::Error;

/// 网关错误类型
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 协议不支持（未知探测字节或版本标识）
    #[error("unsupported protocol")]
    UnsupportedProtocol,

    /// 协议解析失败（帧结构不完整）
    #[error("parse failed")]
    ParseFailed,

    /// 无效的参数（签名请求字段缺失/非法或时间戳过期）
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// 不认识的租户
    #[error("unknown app: {0}")]
    UnknownApp(String),

    /// 需要认证（可重试）
    #[error("need auth")]
    NeedAuth,

    /// 认证失败
    #[error("auth failed")]
    AuthFailed,

    /// 连接已关闭
    #[error("connection closed")]
    ConnectionClosed,

    /// 安全退出超时
    #[error("close timeout")]
    CloseTimeout,

    /// 信令数据反序列化失败
    #[error("decode command data: {0}")]
    DataDecode(#[from] serde_json::Error),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 网关结果类型
pub type Result<T> = std::result::Result<T, GatewayError>;
