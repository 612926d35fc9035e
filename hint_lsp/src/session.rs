//! Oracle session: one type checker, one open document at a time.
//!
//! Every edit is sent as a new document version, then the session blocks
//! until the checker publishes diagnostics for that version (the
//! diagnostics barrier) and classifies them with a [`DiagnosticPolicy`].

use crate::client::{LanguageClient, ServerConfig};
use crate::diagnostics::{evaluate, DiagnosticPolicy, Verdict};
use crate::error::{SessionError, TransportError};
use crate::types::{path_to_uri, same_document, Diagnostic, PublishedDiagnostics, Range, TextChange};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use lsp_types::{
    InitializeResult, PublishDiagnosticsParams, TextDocumentSyncCapability, TextDocumentSyncKind,
    Uri,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Oracle session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server: ServerConfig,
    pub language_id: String,
    /// Bound on each diagnostics barrier.
    pub diagnostics_timeout: Duration,
    /// Bound on each request round trip.
    pub request_timeout: Duration,
    /// Send range edits when the server supports incremental sync.
    pub incremental_sync: bool,
    pub policy: DiagnosticPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::pyright(),
            language_id: "python".to_string(),
            diagnostics_timeout: DEFAULT_DIAGNOSTICS_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            incremental_sync: false,
            policy: DiagnosticPolicy::default(),
        }
    }
}

/// Lifecycle of an [`OracleSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Initializing,
    Ready,
    DocumentOpen,
    Changing,
    DocumentClosed,
    Stopped,
}

struct OpenDocument {
    uri: Uri,
    path: Option<PathBuf>,
    version: i32,
    text: String,
    baseline: HashSet<String>,
    latest: Vec<Diagnostic>,
}

/// A type checker used as an edit oracle.
pub struct OracleSession {
    config: SessionConfig,
    state: SessionState,
    client: Option<LanguageClient>,
    diagnostics: Option<Receiver<PublishedDiagnostics>>,
    document: Option<OpenDocument>,
    incremental: bool,
}

impl OracleSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Unstarted,
            client: None,
            diagnostics: None,
            document: None,
            incremental: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether edits go out as ranges rather than full text.
    pub fn uses_incremental_sync(&self) -> bool {
        self.incremental
    }

    /// Spawns the checker rooted at `root` and runs the handshake.
    pub fn start(&mut self, root: &Path) -> Result<(), SessionError> {
        self.require("start", &[SessionState::Unstarted])?;
        let root = std::fs::canonicalize(root)?;

        let mut server = self.config.server.clone();
        if server.working_dir.is_none() {
            server.working_dir = Some(root.clone());
        }
        let client = LanguageClient::start(&server, Some(self.config.request_timeout)).map_err(
            |source| SessionError::Spawn {
                command: server.command.clone(),
                source,
            },
        )?;
        self.attach(client, &root)
    }

    /// Runs the handshake over an already connected client.
    pub fn attach(&mut self, client: LanguageClient, root: &Path) -> Result<(), SessionError> {
        self.require("attach", &[SessionState::Unstarted])?;

        let (tx, rx) = crossbeam_channel::unbounded();
        client.on_notification("textDocument/publishDiagnostics", move |params| {
            match params.map(serde_json::from_value::<PublishDiagnosticsParams>) {
                Some(Ok(params)) => {
                    let _ = tx.send(PublishedDiagnostics::from(params));
                }
                Some(Err(e)) => log::warn!("Malformed publishDiagnostics: {}", e),
                None => log::warn!("publishDiagnostics without params"),
            }
        });

        self.state = SessionState::Initializing;
        self.diagnostics = Some(rx);
        let client = self.client.insert(client);

        let root_uri = path_to_uri(root)?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        let result = client.initialize(root_uri, &name)?;
        client.initialized()?;

        self.incremental = self.config.incremental_sync && supports_incremental(&result);
        self.state = SessionState::Ready;
        log::debug!(
            "Oracle session ready (sync: {})",
            if self.incremental { "incremental" } else { "full" }
        );
        Ok(())
    }

    /// Opens the file at `path` and records its baseline diagnostics.
    /// Returns the file's text.
    pub fn open_file(&mut self, path: &Path) -> Result<String, SessionError> {
        let path = std::fs::canonicalize(path)?;
        let text = std::fs::read_to_string(&path)?;
        let uri = path_to_uri(&path)?;
        self.open(uri, Some(path), text.clone())?;
        Ok(text)
    }

    /// Opens an in-memory document and records its baseline diagnostics.
    pub fn open_document(&mut self, uri: Uri, text: String) -> Result<(), SessionError> {
        self.open(uri, None, text)
    }

    fn open(&mut self, uri: Uri, path: Option<PathBuf>, text: String) -> Result<(), SessionError> {
        self.require("open", &[SessionState::Ready, SessionState::DocumentClosed])?;
        self.drain_stale();

        let client = self.client("open")?;
        client.did_open(uri.clone(), &self.config.language_id, 1, text.clone())?;
        self.document = Some(OpenDocument {
            uri: uri.clone(),
            path,
            version: 1,
            text,
            baseline: HashSet::new(),
            latest: Vec::new(),
        });
        self.state = SessionState::DocumentOpen;

        let published = self.await_diagnostics(uri.as_str(), 1)?;
        if let Some(doc) = self.document.as_mut() {
            doc.baseline = published.diagnostics.iter().map(|d| d.message.clone()).collect();
            log::debug!(
                "Opened {} with {} baseline diagnostics",
                uri.as_str(),
                doc.baseline.len()
            );
            doc.latest = published.diagnostics;
        }
        Ok(())
    }

    /// Replaces the document text and reports whether the change
    /// introduced new errors, scoped to `modified` when given.
    pub fn apply_change(
        &mut self,
        new_text: &str,
        modified: Option<Range>,
    ) -> Result<Verdict, SessionError> {
        self.require("apply_change", &[SessionState::DocumentOpen])?;
        let incremental = self.incremental;
        let (uri, version, change) = {
            let doc = self.document.as_mut().ok_or(SessionError::NoDocument)?;
            let change = if incremental {
                TextChange::diff(&doc.text, new_text)
            } else {
                TextChange::Full(new_text.to_string())
            };
            doc.version += 1;
            doc.text = new_text.to_string();
            (doc.uri.clone(), doc.version, change)
        };

        self.state = SessionState::Changing;
        self.drain_stale();
        let result = self.send_and_wait(uri, version, change);
        self.state = SessionState::DocumentOpen;
        let published = result?;

        let doc = self.document.as_mut().ok_or(SessionError::NoDocument)?;
        let verdict = evaluate(&published.diagnostics, &doc.baseline, modified, &self.config.policy);
        for diagnostic in &verdict.offending {
            log::debug!(
                "New error at {}:{}: {}",
                diagnostic.range.start.line + 1,
                diagnostic.range.start.character + 1,
                diagnostic.message
            );
        }
        doc.latest = published.diagnostics;
        Ok(verdict)
    }

    fn send_and_wait(
        &self,
        uri: Uri,
        version: i32,
        change: TextChange,
    ) -> Result<PublishedDiagnostics, SessionError> {
        let client = self.client("apply_change")?;
        client.did_change(uri.clone(), version, change)?;
        self.await_diagnostics(uri.as_str(), version)
    }

    /// Adds the latest diagnostics to the baseline, after an edit the
    /// caller keeps regardless of the verdict.
    pub fn refresh_baseline(&mut self) -> Result<(), SessionError> {
        let doc = self.document.as_mut().ok_or(SessionError::NoDocument)?;
        doc.baseline
            .extend(doc.latest.iter().map(|d| d.message.clone()));
        Ok(())
    }

    /// The diagnostics of the most recent version.
    pub fn latest_diagnostics(&self) -> &[Diagnostic] {
        self.document
            .as_ref()
            .map(|doc| doc.latest.as_slice())
            .unwrap_or(&[])
    }

    /// The text of the open document as the checker sees it.
    pub fn document_text(&self) -> Option<&str> {
        self.document.as_ref().map(|doc| doc.text.as_str())
    }

    /// The path of the open document, if it was opened from disk.
    pub fn document_path(&self) -> Option<&Path> {
        self.document.as_ref().and_then(|doc| doc.path.as_deref())
    }

    /// Closes the open document.
    pub fn close_file(&mut self) -> Result<(), SessionError> {
        self.require("close_file", &[SessionState::DocumentOpen])?;
        let doc = self.document.take().ok_or(SessionError::NoDocument)?;
        self.state = SessionState::DocumentClosed;

        let client = self.client("close_file")?;
        client.did_close(doc.uri.clone())?;

        // The checker clears the closed document's diagnostics; wait for
        // that so it cannot reach the next barrier.
        let deadline = Instant::now() + self.config.diagnostics_timeout.min(Duration::from_secs(1));
        if let Some(rx) = &self.diagnostics {
            while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                match rx.recv_timeout(remaining) {
                    Ok(published)
                        if same_document(&published.uri, doc.uri.as_str())
                            && published.diagnostics.is_empty() =>
                    {
                        break
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        }
        log::debug!("Closed {}", doc.uri.as_str());
        Ok(())
    }

    /// Shuts the checker down. Idempotent.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        self.state = SessionState::Stopped;
        self.document = None;
        self.diagnostics = None;

        let Some(mut client) = self.client.take() else {
            return Ok(());
        };
        let result = if client.is_closed() {
            Ok(())
        } else {
            client.shutdown().and_then(|_| client.exit())
        };
        client.terminate();
        result.map_err(SessionError::from)
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn client(&self, operation: &'static str) -> Result<&LanguageClient, SessionError> {
        self.client.as_ref().ok_or(SessionError::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn drain_stale(&self) {
        if let Some(rx) = &self.diagnostics {
            let stale = rx.try_iter().count();
            if stale > 0 {
                log::trace!("Discarded {} stale diagnostic sets", stale);
            }
        }
    }

    /// Blocks until diagnostics for `uri` at `version` or later arrive.
    fn await_diagnostics(&self, uri: &str, version: i32) -> Result<PublishedDiagnostics, SessionError> {
        let rx = self.diagnostics.as_ref().ok_or(SessionError::NoDocument)?;
        let timeout = self.config.diagnostics_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(SessionError::DiagnosticsTimeout { version, timeout })?;
            match rx.recv_timeout(remaining) {
                Ok(published) => {
                    if !same_document(&published.uri, uri) {
                        log::trace!("Ignoring diagnostics for {}", published.uri);
                        continue;
                    }
                    match published.version {
                        Some(v) if v < version => {
                            log::trace!("Ignoring diagnostics for stale version {}", v);
                        }
                        _ => return Ok(published),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("No diagnostics for version {} within {:?}", version, timeout);
                    return Err(SessionError::DiagnosticsTimeout { version, timeout });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let reason = self
                        .client
                        .as_ref()
                        .and_then(|c| c.transport().close_reason())
                        .unwrap_or_else(|| TransportError::Closed("server went away".to_string()));
                    return Err(reason.into());
                }
            }
        }
    }
}

impl Drop for OracleSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::debug!("Error stopping oracle session: {}", e);
        }
    }
}

fn supports_incremental(result: &InitializeResult) -> bool {
    match &result.capabilities.text_document_sync {
        Some(TextDocumentSyncCapability::Kind(kind)) => *kind == TextDocumentSyncKind::INCREMENTAL,
        Some(TextDocumentSyncCapability::Options(options)) => {
            options.change == Some(TextDocumentSyncKind::INCREMENTAL)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_server, test_runtime, Reply};
    use crate::types::Position;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tokio::runtime::Runtime;

    const URI: &str = "file:///project/mod.py";

    fn diag(line: u32, message: &str) -> Value {
        json!({
            "range": {"start": {"line": line, "character": 0}, "end": {"line": line, "character": 4}},
            "severity": 1,
            "message": message
        })
    }

    fn publish(uri: &str, version: i64, diagnostics: Vec<Value>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": uri, "version": version, "diagnostics": diagnostics}
        })
    }

    /// Scripted checker: reports a baseline error on open, and for each
    /// change the diagnostics `on_change` returns for the new text.
    fn checker<F>(runtime: &Runtime, sync: u8, on_change: F) -> (LanguageClient, Arc<Mutex<Vec<Value>>>)
    where
        F: Fn(&Value, i64) -> Vec<Value> + Send + 'static,
    {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&changes);
        let (reader, writer) = fake_server(runtime, move |message| {
            match message["method"].as_str() {
                Some("initialize") => Reply::Send(vec![json!({
                    "jsonrpc": "2.0",
                    "id": message["id"],
                    "result": {"capabilities": {"textDocumentSync": sync}}
                })]),
                Some("textDocument/didOpen") => {
                    let uri = message["params"]["textDocument"]["uri"].as_str().unwrap_or_default();
                    Reply::Send(vec![publish(uri, 1, vec![diag(0, "\"legacy\" is not defined")])])
                }
                Some("textDocument/didChange") => {
                    let params = &message["params"];
                    let uri = params["textDocument"]["uri"].as_str().unwrap_or_default();
                    let version = params["textDocument"]["version"].as_i64().unwrap_or_default();
                    let change = params["contentChanges"][0].clone();
                    recorded.lock().unwrap().push(change.clone());
                    Reply::Send(vec![
                        publish("file:///project/other.py", version, vec![diag(0, "x is not defined")]),
                        publish(uri, version - 1, vec![diag(0, "stale is not defined")]),
                        publish(uri, version, on_change(&change, version)),
                    ])
                }
                Some("textDocument/didClose") => {
                    let uri = message["params"]["textDocument"]["uri"].as_str().unwrap_or_default();
                    Reply::Send(vec![json!({
                        "jsonrpc": "2.0",
                        "method": "textDocument/publishDiagnostics",
                        "params": {"uri": uri, "diagnostics": []}
                    })])
                }
                Some("shutdown") => Reply::Send(vec![json!({
                    "jsonrpc": "2.0", "id": message["id"], "result": null
                })]),
                _ => Reply::Send(vec![]),
            }
        });
        let client = LanguageClient::connect(runtime.handle().clone(), reader, writer, None);
        (client, changes)
    }

    fn session_with(client: LanguageClient, config: SessionConfig) -> OracleSession {
        let mut session = OracleSession::new(config);
        session.attach(client, Path::new("/project")).unwrap();
        session
    }

    fn uri() -> Uri {
        URI.parse().unwrap()
    }

    #[test]
    fn test_baseline_and_new_errors() {
        let runtime = test_runtime();
        let (client, _) = checker(&runtime, 1, |change, _| {
            let text = change["text"].as_str().unwrap_or_default();
            let mut diagnostics = vec![diag(0, "\"legacy\" is not defined")];
            if text.contains("x: str") {
                diagnostics.push(diag(2, "Expression of type \"int\" cannot be assigned to parameter of type \"str\""));
            }
            diagnostics
        });
        let mut session = session_with(client, SessionConfig::default());
        assert_eq!(session.state(), SessionState::Ready);

        session.open_document(uri(), "legacy\ndef f(x):\n    return x + 1\n".to_string()).unwrap();
        assert_eq!(session.state(), SessionState::DocumentOpen);
        assert_eq!(session.latest_diagnostics().len(), 1);

        let ok = session
            .apply_change("legacy\ndef f(x: int):\n    return x + 1\n", None)
            .unwrap();
        assert!(!ok.new_error);

        let bad = session
            .apply_change("legacy\ndef f(x: str):\n    return x + 1\n", None)
            .unwrap();
        assert!(bad.new_error);
        assert_eq!(bad.offending.len(), 1);
        assert_eq!(session.state(), SessionState::DocumentOpen);

        session.close_file().unwrap();
        assert_eq!(session.state(), SessionState::DocumentClosed);
        session.stop().unwrap();
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_modified_range_scopes_verdict() {
        let runtime = test_runtime();
        let (client, _) = checker(&runtime, 1, |_, _| {
            vec![diag(9, "\"Path\" is not defined")]
        });
        let mut session = session_with(client, SessionConfig::default());
        session.open_document(uri(), "x = 1\n".to_string()).unwrap();

        let elsewhere = Range::new(Position::new(0, 0), Position::new(3, 0));
        let verdict = session.apply_change("x = 2\n", Some(elsewhere)).unwrap();
        assert!(!verdict.new_error);

        let around = Range::new(Position::new(8, 0), Position::new(10, 0));
        let verdict = session.apply_change("x = 3\n", Some(around)).unwrap();
        assert!(verdict.new_error);
    }

    #[test]
    fn test_allowed_pattern_is_never_fatal() {
        let runtime = test_runtime();
        let (client, _) = checker(&runtime, 1, |_, _| {
            vec![diag(1, "\"Unknown\" is not defined")]
        });
        let mut session = session_with(client, SessionConfig::default());
        session.open_document(uri(), "x = 1\n".to_string()).unwrap();
        let verdict = session.apply_change("x = 2\n", None).unwrap();
        assert!(!verdict.new_error);
        assert_eq!(verdict.diagnostics.len(), 1);
    }

    #[test]
    fn test_refresh_baseline_absorbs_latest_errors() {
        let runtime = test_runtime();
        let (client, _) = checker(&runtime, 1, |_, _| {
            vec![diag(4, "\"helper\" is not defined")]
        });
        let mut session = session_with(client, SessionConfig::default());
        session.open_document(uri(), "x = 1\n".to_string()).unwrap();
        assert!(session.apply_change("x = 2\n", None).unwrap().new_error);
        session.refresh_baseline().unwrap();
        assert!(!session.apply_change("x = 3\n", None).unwrap().new_error);
    }

    #[test]
    fn test_incremental_sync_sends_ranges() {
        let runtime = test_runtime();
        let (client, changes) = checker(&runtime, 2, |_, _| Vec::new());
        let config = SessionConfig {
            incremental_sync: true,
            ..SessionConfig::default()
        };
        let mut session = session_with(client, config);
        assert!(session.uses_incremental_sync());
        session.open_document(uri(), "def f(x):\n    pass\n".to_string()).unwrap();
        session.apply_change("def f(x: int):\n    pass\n", None).unwrap();
        assert_eq!(session.document_text(), Some("def f(x: int):\n    pass\n"));

        let recorded = changes.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0]["text"], json!(": int"));
        assert_eq!(recorded[0]["range"]["start"], json!({"line": 0, "character": 7}));
    }

    #[test]
    fn test_full_sync_when_server_lacks_incremental() {
        let runtime = test_runtime();
        let (client, changes) = checker(&runtime, 1, |_, _| Vec::new());
        let config = SessionConfig {
            incremental_sync: true,
            ..SessionConfig::default()
        };
        let mut session = session_with(client, config);
        assert!(!session.uses_incremental_sync());
        session.open_document(uri(), "a\n".to_string()).unwrap();
        session.apply_change("b\n", None).unwrap();
        let recorded = changes.lock().unwrap();
        assert_eq!(recorded[0]["text"], json!("b\n"));
        assert!(recorded[0].get("range").map_or(true, Value::is_null));
    }

    #[test]
    fn test_barrier_timeout() {
        let runtime = test_runtime();
        let (reader, writer) = fake_server(&runtime, |message| match message["method"].as_str() {
            Some("initialize") => Reply::Send(vec![json!({
                "jsonrpc": "2.0", "id": message["id"], "result": {"capabilities": {}}
            })]),
            Some("textDocument/didOpen") => Reply::Send(vec![publish(URI, 1, vec![])]),
            Some("shutdown") => Reply::Send(vec![json!({
                "jsonrpc": "2.0", "id": message["id"], "result": null
            })]),
            _ => Reply::Send(vec![]),
        });
        let client = LanguageClient::connect(runtime.handle().clone(), reader, writer, None);
        let config = SessionConfig {
            diagnostics_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let mut session = session_with(client, config);
        session.open_document(uri(), "x = 1\n".to_string()).unwrap();

        let result = session.apply_change("x = 2\n", None);
        assert!(matches!(
            result,
            Err(SessionError::DiagnosticsTimeout { version: 2, .. })
        ));
        assert_eq!(session.state(), SessionState::DocumentOpen);
    }

    #[test]
    fn test_server_exit_fails_barrier() {
        let runtime = test_runtime();
        let (reader, writer) = fake_server(&runtime, |message| match message["method"].as_str() {
            Some("initialize") => Reply::Send(vec![json!({
                "jsonrpc": "2.0", "id": message["id"], "result": {"capabilities": {}}
            })]),
            Some("textDocument/didOpen") => Reply::Send(vec![publish(URI, 1, vec![])]),
            Some("textDocument/didChange") => Reply::Hangup,
            _ => Reply::Send(vec![]),
        });
        let client = LanguageClient::connect(runtime.handle().clone(), reader, writer, None);
        let mut session = session_with(client, SessionConfig::default());
        session.open_document(uri(), "x = 1\n".to_string()).unwrap();

        let result = session.apply_change("x = 2\n", None);
        let err = result.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Closed(_))));
        assert!(err.is_fatal());
        session.stop().unwrap();
    }

    #[test]
    fn test_operations_require_state() {
        let mut session = OracleSession::new(SessionConfig::default());
        assert!(matches!(
            session.apply_change("x", None),
            Err(SessionError::InvalidState { state: SessionState::Unstarted, .. })
        ));
        assert!(matches!(
            session.close_file(),
            Err(SessionError::InvalidState { .. })
        ));
        session.stop().unwrap();
        assert!(matches!(
            session.open_document(uri(), String::new()),
            Err(SessionError::InvalidState { state: SessionState::Stopped, .. })
        ));
    }

    #[test]
    fn test_open_file_reads_from_disk() {
        let runtime = test_runtime();
        let (client, _) = checker(&runtime, 1, |_, _| Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        std::fs::write(&path, "y = 2\n").unwrap();

        let mut session = session_with(client, SessionConfig::default());
        let text = session.open_file(&path).unwrap();
        assert_eq!(text, "y = 2\n");
        assert_eq!(
            session.document_path(),
            Some(std::fs::canonicalize(&path).unwrap().as_path())
        );
    }
}
