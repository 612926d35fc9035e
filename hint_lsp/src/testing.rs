//! Scripted in-process language server for tests.

use crate::transport::{TransportReader, TransportWriter};
use serde_json::Value;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::runtime::Runtime;

/// What the fake server does after reading a client message.
pub(crate) enum Reply {
    /// Send these messages, in order.
    Send(Vec<Value>),
    /// Write raw bytes to the stream.
    Raw(Vec<u8>),
    /// Close the connection.
    Hangup,
}

pub(crate) fn test_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Spawns a server that answers every client message with `script`.
/// Returns the client's ends of the connection.
pub(crate) fn fake_server<F>(
    runtime: &Runtime,
    mut script: F,
) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>)
where
    F: FnMut(&Value) -> Reply + Send + 'static,
{
    let (client, server) = tokio::io::duplex(1 << 16);
    let (server_read, server_write) = tokio::io::split(server);
    runtime.spawn(async move {
        let mut reader = TransportReader::new(server_read);
        let mut writer = TransportWriter::new(server_write);
        while let Ok(message) = reader.read_message().await {
            match script(&message) {
                Reply::Send(messages) => {
                    for message in messages {
                        if writer.send_message(&message).await.is_err() {
                            return;
                        }
                    }
                }
                Reply::Raw(bytes) => {
                    if writer.send_raw(&bytes).await.is_err() {
                        return;
                    }
                }
                Reply::Hangup => return,
            }
        }
    });
    tokio::io::split(client)
}
