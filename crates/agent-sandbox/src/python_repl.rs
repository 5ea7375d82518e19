// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A persistent `python3` child process the guest agent drives over stdin/
//! stdout to give the `python` request type module-global persistence across
//! calls, as required by §4.4's guest-agent protocol.
//!
//! Each submitted cell is written as one JSON line on the child's stdin; the
//! wrapper script executes it against a process-lifetime globals dict and
//! writes one `\x00`-prefixed JSON line back. User `print()` output never
//! reaches the real stdout — the wrapper redirects it into the captured
//! buffers before composing its own reply.

use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};

/// The interpreter script run inside the child. Kept as one string so the
/// behavior (sentinel framing, matplotlib capture, traceback formatting) is
/// visible in one place rather than spread across string concatenation.
const WRAPPER_SCRIPT: &str = r#"
import sys, json, base64, io, contextlib, traceback

_globals = {}
_exec_count = 0

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        payload = json.loads(line)
    except Exception:
        continue
    cmd = payload.get("cmd")
    if cmd == "shutdown":
        break
    if cmd == "reset":
        _globals = {}
        sys.stdout.write("\x00" + json.dumps({"ok": True}) + "\n")
        sys.stdout.flush()
        continue
    if cmd == "get_state":
        names = {}
        for k, v in _globals.items():
            if k.startswith("__"):
                continue
            try:
                names[k] = repr(v)[:200]
            except Exception:
                names[k] = "<unreprable>"
        sys.stdout.write("\x00" + json.dumps({"ok": True, "names": names}) + "\n")
        sys.stdout.flush()
        continue

    code = payload.get("code", "")
    _exec_count += 1
    stdout_buf = io.StringIO()
    stderr_buf = io.StringIO()
    err = None
    try:
        with contextlib.redirect_stdout(stdout_buf), contextlib.redirect_stderr(stderr_buf):
            exec(compile(code, "<cell>", "exec"), _globals)
    except Exception:
        err = traceback.format_exc()

    images = []
    try:
        import matplotlib
        matplotlib.use("Agg")
        import matplotlib.pyplot as plt
        for num in plt.get_fignums():
            fig = plt.figure(num)
            buf = io.BytesIO()
            fig.savefig(buf, format="png")
            images.append(base64.b64encode(buf.getvalue()).decode("ascii"))
        plt.close("all")
    except Exception:
        pass

    result = {
        "stdout": stdout_buf.getvalue(),
        "stderr": stderr_buf.getvalue(),
        "error": err,
        "images": images,
        "exec_count": _exec_count,
    }
    sys.stdout.write("\x00" + json.dumps(result) + "\n")
    sys.stdout.flush()
"#;

#[derive(Debug, Deserialize, Default)]
pub struct CellResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub exec_count: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct StateResult {
    #[serde(default)]
    pub names: std::collections::BTreeMap<String, String>,
}

pub struct PythonRepl {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl PythonRepl {
    /// Spawn `python3` running the wrapper script against `cwd` as its
    /// working directory, so relative `write_file`/`read_file` calls and the
    /// Python process agree on the filesystem root.
    pub fn spawn(cwd: &std::path::Path, python_bin: &str) -> std::io::Result<Self> {
        let mut child = tokio::process::Command::new(python_bin)
            .arg("-u")
            .arg("-c")
            .arg(WRAPPER_SCRIPT)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        Ok(Self { child, stdin, stdout })
    }

    async fn round_trip(&mut self, payload: serde_json::Value) -> std::io::Result<String> {
        let mut line = serde_json::to_string(&payload).unwrap_or_default();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let mut raw = String::new();
            let n = self.stdout.read_line(&mut raw).await?;
            if n == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "guest python process exited"));
            }
            if let Some(body) = raw.strip_prefix('\u{0}') {
                return Ok(body.trim_end().to_string());
            }
            // Anything not sentinel-prefixed is stray interpreter noise
            // (e.g. a startup warning); skip it and keep reading.
        }
    }

    pub async fn execute(&mut self, code: &str) -> std::io::Result<CellResult> {
        let raw = self
            .round_trip(serde_json::json!({ "cmd": "exec", "code": code }))
            .await?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    pub async fn get_state(&mut self) -> std::io::Result<StateResult> {
        let raw = self.round_trip(serde_json::json!({ "cmd": "get_state" })).await?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    pub async fn reset(&mut self) -> std::io::Result<()> {
        self.round_trip(serde_json::json!({ "cmd": "reset" })).await?;
        Ok(())
    }

    pub async fn shutdown(mut self) {
        let _ = self.stdin.write_all(b"{\"cmd\":\"shutdown\"}\n").await;
        let _ = self.child.wait().await;
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}
