//! 多租户信令网关公共库
//!
//! 客户端保持长连接接入网关；网关完成认证、信令编解码，把命令经
//! broker 转发到所属租户的业务后端，并把响应/推送扇出回一个、
//! 一批或全部在线连接。

pub mod bootstrap;
pub mod broker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod protocol;
pub mod router;
pub mod shutdown;
pub mod tenant;
pub mod transport;
pub mod util;

pub use bootstrap::GatewayApplication;
pub use config::AppConfig;
pub use error::{GatewayError, Result};
