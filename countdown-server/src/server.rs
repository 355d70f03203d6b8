use crate::router;
use crate::subsystems::registry::CoordinatorRegistry;
use bytes::Bytes;
use countdown_core::ipc::{CountdownRequest, CountdownResponse};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub async fn run_unix_server(
    socket_path: &str,
    registry: Arc<CoordinatorRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC Server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    serve_connection(read, write, &registry).await;
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

/// Answer frames on one connection until the peer hangs up.
/// Frames are a 4-byte little-endian length prefix followed by a MessagePack payload.
pub async fn serve_connection<R, W>(read: R, write: W, registry: &CoordinatorRegistry)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let le_codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed_read = FramedRead::new(read, le_codec());
    let mut framed_write = FramedWrite::new(write, le_codec());

    while let Some(frame) = framed_read.next().await {
        let bytes_mut = match frame {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Frame error: {}", e);
                break;
            }
        };

        let response = match rmp_serde::from_slice::<CountdownRequest>(&bytes_mut) {
            Ok(request) => router::handle_request(request, registry).await,
            Err(e) => CountdownResponse::err("validation", format!("Deserialization error: {}", e)),
        };

        match rmp_serde::to_vec_named(&response) {
            Ok(resp_bytes) => {
                if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                    tracing::error!("Failed to send response: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize response: {}", e);
                break;
            }
        }
    }
}
