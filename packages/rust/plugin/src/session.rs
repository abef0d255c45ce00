//! JSON-lines session with a plugin host subprocess.
//!
//! The host script is embedded and passed to the interpreter with `-c`, so
//! nothing besides the interpreter needs to be installed. The plugin's own
//! stdout is redirected to stderr by the host; stdout carries protocol
//! messages only.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::Value;
use tracing::{debug, info, warn};

use extractflow_shared::{ExtractflowError, Result};

use crate::contract::{ClassInfo, PluginDescription};

/// The plugin host program.
pub const HOST_SCRIPT: &str = include_str!("host.py");

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Request message sent to the host.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Describe,
    Init {
        class: &'a str,
        kwargs: &'a Value,
    },
    Invoke {
        method: &'a str,
        kwargs: &'a Value,
    },
    Shutdown,
}

/// Response message received from the host.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Ok,
    Description(PluginDescription),
    Result {
        #[serde(default)]
        value: Value,
    },
    Error {
        error: String,
        #[serde(default)]
        traceback: Option<String>,
    },
}

/// Outcome of compiling a source without executing it.
///
/// When the source compiles, `classes` describes its top-level classes as
/// read from the syntax tree, so the interface can be checked before any
/// of the module's imports run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct SyntaxCheck {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
}

impl SyntaxCheck {
    /// Static description of the checked source.
    pub fn description(&self) -> PluginDescription {
        PluginDescription {
            classes: self.classes.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle to a running plugin host serving one plugin module.
pub struct PluginSession {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    closed: bool,
}

impl PluginSession {
    /// Start the host for the module at `source` and wait until it is loaded.
    pub fn spawn(interpreter: &str, source: &Path) -> Result<Self> {
        info!(interpreter, source = %source.display(), "starting plugin host");

        let mut child = Command::new(interpreter)
            .arg("-c")
            .arg(HOST_SCRIPT)
            .arg("serve")
            .arg(source)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // plugin logs go to parent stderr
            .spawn()
            .map_err(|e| {
                ExtractflowError::Plugin(format!(
                    "failed to spawn plugin host: {e}. Is `{interpreter}` installed?"
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractflowError::Plugin("failed to capture plugin stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractflowError::Plugin("failed to capture plugin stdout".into()))?;

        let mut session = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            closed: false,
        };
        session.wait_for_ready()?;
        Ok(session)
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message()? {
            ResponseMessage::Ready => {
                debug!("plugin host is ready");
                Ok(())
            }
            ResponseMessage::Error { error, .. } => Err(ExtractflowError::Plugin(error)),
            other => Err(ExtractflowError::Plugin(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    /// Introspect the classes the module defines.
    pub fn describe(&mut self) -> Result<PluginDescription> {
        match self.request(&RequestMessage::Describe)? {
            ResponseMessage::Description(description) => Ok(description),
            other => Err(unexpected("describe", &other)),
        }
    }

    /// Instantiate `class` with keyword arguments.
    pub fn init(&mut self, class: &str, kwargs: &Value) -> Result<()> {
        match self.request(&RequestMessage::Init { class, kwargs })? {
            ResponseMessage::Ok => Ok(()),
            other => Err(unexpected("init", &other)),
        }
    }

    /// Call `method` on the instance with keyword arguments.
    pub fn invoke(&mut self, method: &str, kwargs: &Value) -> Result<Value> {
        match self.request(&RequestMessage::Invoke { method, kwargs })? {
            ResponseMessage::Result { value } => Ok(value),
            other => Err(unexpected("invoke", &other)),
        }
    }

    /// Ask the host to exit and wait for it.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Ok(json) = serde_json::to_string(&RequestMessage::Shutdown) {
            let _ = writeln!(self.stdin, "{json}");
            let _ = self.stdin.flush();
        }

        match self.child.wait() {
            Ok(status) => debug!(?status, "plugin host exited"),
            Err(e) => warn!("plugin host wait error: {e}"),
        }
    }

    fn request(&mut self, message: &RequestMessage<'_>) -> Result<ResponseMessage> {
        let json = serde_json::to_string(message).map_err(|e| {
            ExtractflowError::Plugin(format!("failed to serialize request: {e}"))
        })?;

        writeln!(self.stdin, "{json}").map_err(|e| {
            ExtractflowError::Plugin(format!("failed to write to plugin stdin: {e}"))
        })?;
        self.stdin.flush().map_err(|e| {
            ExtractflowError::Plugin(format!("failed to flush plugin stdin: {e}"))
        })?;

        match self.read_message()? {
            ResponseMessage::Error { error, traceback } => {
                if let Some(tb) = traceback {
                    debug!(traceback = %tb, "plugin raised");
                }
                Err(ExtractflowError::Plugin(error))
            }
            other => Ok(other),
        }
    }

    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| ExtractflowError::Plugin(format!("plugin read error: {e}")))?;

        if line.is_empty() {
            return Err(ExtractflowError::Plugin(
                "plugin host closed stdout unexpectedly".into(),
            ));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            let preview: String = line.chars().take(200).collect();
            ExtractflowError::Plugin(format!("invalid plugin response: {e} (got: {preview})"))
        })
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn unexpected(request: &str, response: &ResponseMessage) -> ExtractflowError {
    ExtractflowError::Plugin(format!("unexpected response to {request}: {response:?}"))
}

/// Compile `source` with the interpreter without executing it.
pub fn check_syntax(interpreter: &str, source: &str) -> Result<SyntaxCheck> {
    let mut child = Command::new(interpreter)
        .arg("-c")
        .arg(HOST_SCRIPT)
        .arg("check")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| {
            ExtractflowError::Plugin(format!(
                "failed to spawn syntax checker: {e}. Is `{interpreter}` installed?"
            ))
        })?;

    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractflowError::Plugin("failed to capture checker stdin".into()))?;
        stdin.write_all(source.as_bytes()).map_err(|e| {
            ExtractflowError::Plugin(format!("failed to write to checker stdin: {e}"))
        })?;
    }

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout
            .read_to_string(&mut output)
            .map_err(|e| ExtractflowError::Plugin(format!("checker read error: {e}")))?;
    }
    let status = child
        .wait()
        .map_err(|e| ExtractflowError::Plugin(format!("checker wait error: {e}")))?;

    serde_json::from_str(output.trim()).map_err(|e| {
        ExtractflowError::Plugin(format!(
            "syntax checker failed ({status}): {e} (got: {})",
            output.trim()
        ))
    })
}
