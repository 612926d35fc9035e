//! LSP client - manages the type checker process and the protocol calls
//! the oracle needs.

use crate::error::TransportError;
use crate::transport::Transport;
use crate::types::TextChange;
use lsp_types::*;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::runtime::{Handle, Runtime};

/// How long a server gets to exit on its own after `exit`.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Language server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Command to start the server.
    pub command: String,
    /// Arguments to the command.
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Creates a configuration for pyright's language server.
    pub fn pyright() -> Self {
        Self {
            command: "pyright-langserver".to_string(),
            args: vec!["--stdio".to_string()],
            working_dir: None,
        }
    }

    /// Creates a configuration for a generic LSP server.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::pyright()
    }
}

/// Typed protocol calls over a [`Transport`].
///
/// Owns the server process and the runtime its reader task runs on when
/// created with [`LanguageClient::start`].
pub struct LanguageClient {
    transport: Transport,
    child: Option<Child>,
    runtime: Option<Runtime>,
}

impl LanguageClient {
    /// Spawns the server and connects to its stdio.
    pub fn start(config: &ServerConfig, request_timeout: Option<Duration>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("typehint-lsp")
            .enable_all()
            .build()?;

        let mut child = {
            let _guard = runtime.enter();
            let mut cmd = Command::new(&config.command);
            cmd.args(&config.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(ref dir) = config.working_dir {
                cmd.current_dir(dir);
            }
            cmd.spawn()?
        };

        log::info!("Started language server: {} {}", config.command, config.args.join(" "));

        let missing = |stream: &str| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("server {} not piped", stream))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            runtime.spawn(forward_stderr(stderr));
        }

        let transport = Transport::new(runtime.handle().clone(), stdout, stdin)
            .with_request_timeout(request_timeout);
        let client = Self {
            transport,
            child: Some(child),
            runtime: Some(runtime),
        };
        client.install_default_handlers();
        Ok(client)
    }

    /// Connects to a server over existing streams. The reader task runs on
    /// `runtime`, which must outlive the client.
    pub fn connect<R, W>(
        runtime: Handle,
        reader: R,
        writer: W,
        request_timeout: Option<Duration>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Transport::new(runtime, reader, writer).with_request_timeout(request_timeout);
        let client = Self {
            transport,
            child: None,
            runtime: None,
        };
        client.install_default_handlers();
        client
    }

    fn install_default_handlers(&self) {
        self.transport.on_request("workspace/configuration", |params| {
            let items = params
                .as_ref()
                .and_then(|p| p.get("items"))
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            Value::Array(vec![Value::Null; items])
        });
        self.transport.on_notification("window/logMessage", |params| {
            if let Some(Ok(log_params)) = params.map(serde_json::from_value::<LogMessageParams>) {
                match log_params.typ {
                    MessageType::ERROR => log::warn!("server: {}", log_params.message),
                    _ => log::trace!("server: {}", log_params.message),
                }
            }
        });
        self.transport.set_default_handler(|method, _| {
            log::trace!("Unhandled notification: {}", method);
        });
    }

    /// The underlying transport, for registering handlers.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Registers a handler for a server notification.
    pub fn on_notification(&self, method: &str, handler: impl Fn(Option<Value>) + Send + Sync + 'static) {
        self.transport.on_notification(method, handler);
    }

    /// Sends `initialize` and returns the server's answer.
    #[allow(deprecated)]
    pub fn initialize(
        &self,
        root_uri: Uri,
        workspace_name: &str,
    ) -> Result<InitializeResult, TransportError> {
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            capabilities: ClientCapabilities {
                text_document: Some(TextDocumentClientCapabilities {
                    synchronization: Some(TextDocumentSyncClientCapabilities {
                        dynamic_registration: Some(false),
                        ..Default::default()
                    }),
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                        related_information: Some(true),
                        version_support: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                workspace: Some(WorkspaceClientCapabilities {
                    configuration: Some(true),
                    workspace_folders: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: workspace_name.to_string(),
            }]),
            client_info: Some(ClientInfo {
                name: "typehint".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        };

        let result = self
            .transport
            .send_request("initialize", Some(serde_json::to_value(params)?))?;
        let result: InitializeResult = serde_json::from_value(result)?;
        if let Some(info) = &result.server_info {
            log::info!(
                "Connected to {} {}",
                info.name,
                info.version.as_deref().unwrap_or("")
            );
        }
        Ok(result)
    }

    /// Sends `initialized`.
    pub fn initialized(&self) -> Result<(), TransportError> {
        self.notify("initialized", InitializedParams {})
    }

    pub fn did_open(
        &self,
        uri: Uri,
        language_id: &str,
        version: i32,
        text: String,
    ) -> Result<(), TransportError> {
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri,
                language_id: language_id.to_string(),
                version,
                text,
            },
        };
        self.notify("textDocument/didOpen", params)
    }

    pub fn did_change(&self, uri: Uri, version: i32, change: TextChange) -> Result<(), TransportError> {
        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier { uri, version },
            content_changes: vec![change.into()],
        };
        self.notify("textDocument/didChange", params)
    }

    pub fn did_close(&self, uri: Uri) -> Result<(), TransportError> {
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri },
        };
        self.notify("textDocument/didClose", params)
    }

    /// Sends the `shutdown` request.
    pub fn shutdown(&self) -> Result<(), TransportError> {
        self.transport.send_request("shutdown", None).map(|_| ())
    }

    /// Sends the `exit` notification.
    pub fn exit(&self) -> Result<(), TransportError> {
        self.transport.send_notification("exit", None)
    }

    /// Closes the transport and waits briefly for the server process,
    /// killing it if it does not exit.
    pub fn terminate(&mut self) {
        self.transport.shutdown();
        if let (Some(mut child), Some(runtime)) = (self.child.take(), self.runtime.as_ref()) {
            runtime.block_on(async {
                match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(Ok(status)) => log::debug!("Language server exited with {}", status),
                    Ok(Err(e)) => log::warn!("Failed to wait for language server: {}", e),
                    Err(_) => {
                        log::warn!("Language server did not exit, killing it");
                        let _ = child.kill().await;
                    }
                }
            });
        }
    }

    /// Whether the connection to the server is gone.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn notify(&self, method: &str, params: impl serde::Serialize) -> Result<(), TransportError> {
        self.transport
            .send_notification(method, Some(serde_json::to_value(params)?))
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        self.transport.shutdown();
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("server stderr: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_server, test_runtime, Reply};
    use serde_json::json;

    #[test]
    fn test_pyright_config() {
        let config = ServerConfig::pyright();
        assert_eq!(config.command, "pyright-langserver");
        assert_eq!(config.args, vec!["--stdio".to_string()]);
        assert_eq!(ServerConfig::default(), config);
    }

    #[test]
    fn test_initialize_handshake_and_notifications() {
        let runtime = test_runtime();
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded::<Value>();
        let (reader, writer) = fake_server(&runtime, move |message| {
            let _ = seen_tx.send(message.clone());
            match message["method"].as_str() {
                Some("initialize") => Reply::Send(vec![json!({
                    "jsonrpc": "2.0",
                    "id": message["id"],
                    "result": {
                        "capabilities": {"textDocumentSync": 2},
                        "serverInfo": {"name": "fake", "version": "1.0"}
                    }
                })]),
                Some("shutdown") => Reply::Send(vec![json!({
                    "jsonrpc": "2.0", "id": message["id"], "result": null
                })]),
                _ => Reply::Send(vec![]),
            }
        });
        let client = LanguageClient::connect(runtime.handle().clone(), reader, writer, None);

        let root: Uri = "file:///tmp/project".parse().unwrap();
        let result = client.initialize(root.clone(), "project").unwrap();
        assert_eq!(
            result.capabilities.text_document_sync,
            Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::INCREMENTAL))
        );
        client.initialized().unwrap();
        let doc: Uri = "file:///tmp/project/a.py".parse().unwrap();
        client.did_open(doc.clone(), "python", 1, "x = 1\n".to_string()).unwrap();
        client
            .did_change(doc.clone(), 2, TextChange::Full("x = 2\n".to_string()))
            .unwrap();
        client.did_close(doc).unwrap();
        client.shutdown().unwrap();
        client.exit().unwrap();

        let methods: Vec<String> = (0..7)
            .map(|_| seen_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .map(|m| m["method"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            methods,
            vec![
                "initialize",
                "initialized",
                "textDocument/didOpen",
                "textDocument/didChange",
                "textDocument/didClose",
                "shutdown",
                "exit"
            ]
        );
    }
}
