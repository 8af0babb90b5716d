//! gRPC channel to lockboxd, over a Unix socket or a remote endpoint

use anyhow::Context;
use std::path::Path;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use lockbox_core::config::ClientConfig;
use lockbox_core::VaultResult;

use crate::expand_tilde;

/// `endpoint` wins over `socket` when both are configured.
pub async fn connect(config: &ClientConfig) -> VaultResult<Channel> {
    match &config.endpoint {
        Some(url) => connect_endpoint(url).await,
        None => connect_unix(&expand_tilde(&config.socket)).await,
    }
}

pub async fn connect_endpoint(url: &str) -> VaultResult<Channel> {
    let channel = Endpoint::from_shared(url.to_string())
        .with_context(|| format!("invalid endpoint {url}"))?
        .connect()
        .await
        .with_context(|| format!("connecting to lockboxd at {url}"))?;
    Ok(channel)
}

pub async fn connect_unix(socket_path: &Path) -> VaultResult<Channel> {
    let path = socket_path.to_path_buf();

    // tonic over Unix domain socket: use a tower service_fn connector
    let channel = Endpoint::from_static("http://[::]:0")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let stream = tokio::net::UnixStream::connect(&path).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
            }
        }))
        .await
        .with_context(|| format!("connecting to lockboxd at {}", socket_path.display()))?;

    Ok(channel)
}
