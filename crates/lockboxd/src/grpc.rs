//! tonic gRPC server over a Unix domain socket or TCP

use anyhow::Result;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::info;

use lockbox_core::proto::{auth_server::AuthServer, resources_server::ResourcesServer};

use crate::auth::{AuthInterceptor, AuthService};
use crate::resources::ResourcesService;

/// Where the server accepts connections
#[derive(Debug, Clone)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

/// `Auth` is open; every `Resources` call must carry a bearer token.
pub fn router(auth: AuthService, resources: ResourcesService, interceptor: AuthInterceptor) -> Router {
    Server::builder()
        .add_service(AuthServer::new(auth))
        .add_service(ResourcesServer::with_interceptor(resources, interceptor))
}

/// Serve until `stop` is cancelled, then finish open connections and return.
pub async fn serve(endpoint: &Endpoint, router: Router, stop: CancellationToken) -> Result<()> {
    let served = match endpoint {
        Endpoint::Unix(socket_path) => {
            let listener = bind_unix(socket_path).await?;
            info!(socket = %socket_path.display(), "gRPC server ready");
            router
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), stop.cancelled_owned())
                .await
        }
        Endpoint::Tcp(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow::anyhow!("gRPC bind {addr}: {e}"))?;
            info!(addr = %addr, "gRPC server ready");
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), stop.cancelled_owned())
                .await
        }
    };
    served.map_err(|e| anyhow::anyhow!("gRPC server error: {e}"))
}

async fn bind_unix(socket_path: &Path) -> Result<UnixListener> {
    // Remove stale socket if it exists
    if socket_path.exists() {
        tokio::fs::remove_file(socket_path).await?;
    }

    // Create parent directory if needed
    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    Ok(UnixListener::bind(socket_path)?)
}
