//! gRPC server wiring for the CSI services.

use std::fs;
use std::future::Future;
use std::io;
use std::path::Path;

use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use crate::config::Endpoint;
use crate::csi::identity_server::IdentityServer;
use crate::csi::node_server::NodeServer;
use crate::error::Result;
use crate::node::{IdentityService, NodeService};

/// Serve the Identity and Node services on `endpoint` until `shutdown`
/// resolves.
///
/// A socket file left behind by a previous run is removed before binding.
///
/// # Errors
///
/// Returns an error if the endpoint cannot be bound or the server fails.
pub async fn serve(
    endpoint: &Endpoint,
    max_concurrent_requests: usize,
    node: NodeService,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let router = Server::builder()
        .concurrency_limit_per_connection(max_concurrent_requests)
        .add_service(IdentityServer::new(IdentityService))
        .add_service(NodeServer::new(node));

    match endpoint {
        Endpoint::Unix(path) => {
            prepare_socket_path(path)?;
            let listener = UnixListener::bind(path)?;
            info!(endpoint = %endpoint, "Serving CSI gRPC");
            router
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
                .await?;
        }
        Endpoint::Tcp(addr) => {
            info!(endpoint = %endpoint, "Serving CSI gRPC");
            router.serve_with_shutdown(*addr, shutdown).await?;
        }
    }

    info!("CSI gRPC server stopped");
    Ok(())
}

fn prepare_socket_path(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove stale socket");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stale_socket_is_removed() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("plugins/csi.sock");
        fs::create_dir_all(socket.parent().unwrap()).unwrap();
        fs::write(&socket, b"").unwrap();

        prepare_socket_path(&socket).unwrap();

        assert!(!socket.exists());
        assert!(socket.parent().unwrap().is_dir());
    }

    #[test]
    fn missing_socket_is_fine() {
        let dir = TempDir::new().unwrap();
        prepare_socket_path(&dir.path().join("a/b/csi.sock")).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
