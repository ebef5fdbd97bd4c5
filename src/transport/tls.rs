//! TLS 侦听辅助
//!
//! 证书与密钥由环境提供（PEM 文件路径）；这里只负责装载并构建 acceptor。

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;

use crate::error::Result;

/// 从 PEM 证书/密钥文件构建 TLS acceptor
pub fn acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor> {
    let cert_reader = File::open(cert_file)
        .with_context(|| format!("open cert file {}", cert_file.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_reader))
        .collect::<std::io::Result<Vec<_>>>()
        .context("decode certificates")?;

    let key_reader = File::open(key_file)
        .with_context(|| format!("open key file {}", key_file.display()))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_reader))
        .context("decode private key")?
        .ok_or_else(|| anyhow!("no private key in {}", key_file.display()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("build tls config")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
