//! Exposes a [`ControlSurface`] over a local Unix-domain socket (spec. §6:
//! "the real pseudo-filesystem mount is out of scope, only the key/value
//! dispatch and handlers"). One line in, one line out — `READ <path>` or
//! `WRITE <path> <value>`, replying `OK[ <value>]` or `ERR <message>` —
//! grounded in `wormhole`'s own accept-loop-plus-`tokio::spawn`-per-connection
//! shape (`wormhole/src/bin/server/main.rs::WormholeServer::listen`).

use std::sync::Arc;

use clondike_node::ControlSurface;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub async fn serve(socket_path: &str, surface: Arc<dyn ControlSurface>) -> anyhow::Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(socket_path, "control socket listening");

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let surface = surface.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, surface).await {
                        tracing::debug!(error = %e, "control connection ended");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "control socket accept failed"),
        }
    }
}

async fn handle_connection(stream: UnixStream, surface: Arc<dyn ControlSurface>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let reply = dispatch(&line, surface.as_ref()).await;
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

async fn dispatch(line: &str, surface: &dyn ControlSurface) -> String {
    let mut parts = line.splitn(2, ' ');
    let verb = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    match verb {
        "READ" => match surface.read(rest).await {
            Ok(value) => format!("OK {value}"),
            Err(e) => format!("ERR {e}"),
        },
        "WRITE" => {
            let mut parts = rest.splitn(2, ' ');
            let path = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            match surface.write(path, value).await {
                Ok(()) => "OK".to_string(),
                Err(e) => format!("ERR {e}"),
            }
        }
        other => format!("ERR unknown verb {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clondike_wire::{ClondikeError, Result};
    use std::sync::Mutex;

    struct StubSurface {
        last_write: Mutex<Option<(String, String)>>,
    }

    #[async_trait]
    impl ControlSurface for StubSurface {
        async fn read(&self, path: &str) -> Result<String> {
            if path == "ccn/nodes/0/state" {
                Ok("Connected".to_string())
            } else {
                Err(ClondikeError::NotFound(path.to_string()))
            }
        }

        async fn write(&self, path: &str, value: &str) -> Result<()> {
            *self.last_write.lock().unwrap() = Some((path.to_string(), value.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_routes_read_and_write() {
        let surface = StubSurface { last_write: Mutex::new(None) };

        assert_eq!(dispatch("READ ccn/nodes/0/state", &surface).await, "OK Connected");
        assert!(dispatch("READ ccn/nodes/1/state", &surface).await.starts_with("ERR"));

        assert_eq!(dispatch("WRITE ccn/listen x86_64:0.0.0.0:7874", &surface).await, "OK");
        assert_eq!(
            *surface.last_write.lock().unwrap(),
            Some(("ccn/listen".to_string(), "x86_64:0.0.0.0:7874".to_string()))
        );
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_verb() {
        let surface = StubSurface { last_write: Mutex::new(None) };
        assert!(dispatch("PATCH foo", &surface).await.starts_with("ERR"));
    }
}
