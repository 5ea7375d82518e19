// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The process launched inside each sandbox VM's work directory, standing in
//! for the real guest agent a microVM would run. It listens on a UNIX socket
//! (the vsock stand-in, §4.4/§9), performs the `CONNECT`/`OK` handshake, and
//! serves [`agent_sandbox::protocol`] requests until told to shut down.
//!
//! Invoked by the host's `VmManager` as a child process:
//! `agent-sandbox-guest --socket <path> --port <port> --workdir <dir>`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use agent_sandbox::protocol::{self, GuestRequest, GuestResponse, Output, OutputKind};
use agent_sandbox::python_repl::PythonRepl;
use base64::Engine;
use tokio::net::{UnixListener, UnixStream};

struct Args {
    socket: PathBuf,
    port: u32,
    workdir: PathBuf,
    python_bin: String,
}

fn parse_args() -> Args {
    let mut socket = None;
    let mut port = 5005u32;
    let mut workdir = None;
    let mut python_bin = "python3".to_string();
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--socket" => socket = it.next(),
            "--port" => port = it.next().and_then(|v| v.parse().ok()).unwrap_or(5005),
            "--workdir" => workdir = it.next(),
            "--python" => python_bin = it.next().unwrap_or(python_bin),
            _ => {}
        }
    }
    Args {
        socket: socket.expect("--socket is required").into(),
        port,
        workdir: workdir.expect("--workdir is required").into(),
        python_bin,
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = parse_args();
    let _ = std::fs::remove_file(&args.socket);
    std::fs::create_dir_all(&args.workdir)?;
    let listener = UnixListener::bind(&args.socket)?;

    let mut repl = PythonRepl::spawn(&args.workdir, &args.python_bin)?;
    let mut exec_count: u64 = 0;

    loop {
        let (mut stream, _) = listener.accept().await?;
        if !handshake(&mut stream, args.port).await {
            continue;
        }
        loop {
            let req: GuestRequest = match protocol::read_frame(&mut stream).await {
                Ok(r) => r,
                Err(_) => break,
            };
            let shutdown_requested = matches!(req, GuestRequest::Shutdown);
            let resp = handle(&req, &mut repl, &args.workdir, &mut exec_count).await;
            let _ = protocol::write_frame(&mut stream, &resp).await;
            if shutdown_requested {
                repl.shutdown().await;
                return Ok(());
            }
        }
    }
}

async fn handshake(stream: &mut UnixStream, expected_port: u32) -> bool {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read_exact(&mut byte).await.is_err() {
            return false;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 256 {
            return false;
        }
    }
    let text = String::from_utf8_lossy(&line);
    let port = text.strip_prefix("CONNECT ").and_then(|p| p.parse::<u32>().ok());
    match port {
        Some(p) if p == expected_port => {
            let _ = stream.write_all(format!("OK {p}\n").as_bytes()).await;
            true
        }
        _ => false,
    }
}

async fn handle(
    req: &GuestRequest,
    repl: &mut PythonRepl,
    workdir: &std::path::Path,
    exec_count: &mut u64,
) -> GuestResponse {
    let started = Instant::now();
    match req {
        GuestRequest::Python { code, cell_id, timeout_secs } => {
            *exec_count += 1;
            let result = tokio::time::timeout(Duration::from_secs(*timeout_secs), repl.execute(code)).await;
            match result {
                Ok(Ok(cell)) => {
                    let mut outputs = Vec::new();
                    if !cell.stdout.is_empty() {
                        outputs.push(Output::text(cell.stdout.clone()));
                    }
                    if !cell.stderr.is_empty() {
                        outputs.push(Output { kind: OutputKind::Stderr, content: cell.stderr.clone(), name: None, format: None, encoding: None });
                    }
                    for (i, img) in cell.images.iter().enumerate() {
                        let mut o = Output::image_png_base64(img.clone());
                        o.name = Some(format!("figure_{i}.png"));
                        outputs.push(o);
                    }
                    if let Some(err) = &cell.error {
                        outputs.push(Output { kind: OutputKind::Error, content: err.clone(), name: None, format: None, encoding: None });
                    }
                    GuestResponse {
                        success: cell.error.is_none(),
                        outputs,
                        output: cell.stdout,
                        stderr: cell.stderr,
                        error: cell.error,
                        execution_time: started.elapsed().as_secs_f64(),
                        cell_id: cell_id.clone(),
                        exit_code: None,
                    }
                }
                Ok(Err(e)) => err_response(format!("python repl i/o error: {e}"), started, cell_id.clone()),
                Err(_) => err_response("python execution timed out".into(), started, cell_id.clone()),
            }
        }
        GuestRequest::Bash { command, cell_id, timeout_secs } => {
            let result = tokio::time::timeout(
                Duration::from_secs(*timeout_secs),
                tokio::process::Command::new("bash").arg("-c").arg(command).current_dir(workdir).output(),
            )
            .await;
            match result {
                Ok(Ok(out)) => GuestResponse {
                    success: out.status.success(),
                    outputs: vec![Output::text(String::from_utf8_lossy(&out.stdout).to_string())],
                    output: String::from_utf8_lossy(&out.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                    error: None,
                    execution_time: started.elapsed().as_secs_f64(),
                    cell_id: cell_id.clone(),
                    exit_code: out.status.code(),
                },
                Ok(Err(e)) => err_response(format!("failed to spawn shell: {e}"), started, cell_id.clone()),
                Err(_) => err_response("bash command timed out".into(), started, cell_id.clone()),
            }
        }
        GuestRequest::WriteFile { path, content } => {
            match std::fs::write(workdir.join(path), content) {
                Ok(()) => ok_response(started),
                Err(e) => err_response(e.to_string(), started, None),
            }
        }
        GuestRequest::ReadFile { path } => match std::fs::read_to_string(workdir.join(path)) {
            Ok(text) => GuestResponse { outputs: vec![Output::text(text.clone())], output: text, ..ok_response(started) },
            Err(e) => err_response(e.to_string(), started, None),
        },
        GuestRequest::WriteFileB { path, content_b64 } => {
            match base64::engine::general_purpose::STANDARD.decode(content_b64) {
                Ok(bytes) => match std::fs::write(workdir.join(path), bytes) {
                    Ok(()) => ok_response(started),
                    Err(e) => err_response(e.to_string(), started, None),
                },
                Err(e) => err_response(format!("invalid base64: {e}"), started, None),
            }
        }
        GuestRequest::ReadFileB { path } => match std::fs::read(workdir.join(path)) {
            Ok(bytes) => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
                GuestResponse { outputs: vec![Output { kind: OutputKind::File, content: b64, name: None, format: None, encoding: Some("base64".into()) }], ..ok_response(started) }
            }
            Err(e) => err_response(e.to_string(), started, None),
        },
        GuestRequest::ListFiles { path } => match std::fs::read_dir(workdir.join(path)) {
            Ok(entries) => {
                let names: Vec<String> = entries.flatten().map(|e| e.file_name().to_string_lossy().to_string()).collect();
                GuestResponse { outputs: vec![Output::text(names.join("\n"))], output: names.join("\n"), ..ok_response(started) }
            }
            Err(e) => err_response(e.to_string(), started, None),
        },
        GuestRequest::Install { packages } => {
            let out = tokio::process::Command::new("pip").arg("install").args(packages).output().await;
            match out {
                Ok(o) => GuestResponse { success: o.status.success(), output: String::from_utf8_lossy(&o.stdout).to_string(), stderr: String::from_utf8_lossy(&o.stderr).to_string(), ..ok_response(started) },
                Err(e) => err_response(format!("failed to spawn pip: {e}"), started, None),
            }
        }
        GuestRequest::GetState => match repl.get_state().await {
            Ok(state) => {
                let rendered = state.names.iter().map(|(k, v)| format!("{k} = {v}")).collect::<Vec<_>>().join("\n");
                GuestResponse { outputs: vec![Output::text(rendered.clone())], output: rendered, ..ok_response(started) }
            }
            Err(e) => err_response(e.to_string(), started, None),
        },
        GuestRequest::Reset => match repl.reset().await {
            Ok(()) => {
                *exec_count = 0;
                ok_response(started)
            }
            Err(e) => err_response(e.to_string(), started, None),
        },
        GuestRequest::Ping => GuestResponse {
            outputs: vec![Output::text(serde_json::json!({"pong": true, "exec_count": *exec_count}).to_string())],
            ..ok_response(started)
        },
        GuestRequest::Shutdown => ok_response(started),
    }
}

fn ok_response(started: Instant) -> GuestResponse {
    GuestResponse {
        success: true,
        outputs: Vec::new(),
        output: String::new(),
        stderr: String::new(),
        error: None,
        execution_time: started.elapsed().as_secs_f64(),
        cell_id: None,
        exit_code: None,
    }
}

fn err_response(message: String, started: Instant, cell_id: Option<String>) -> GuestResponse {
    GuestResponse {
        success: false,
        outputs: vec![Output { kind: OutputKind::Error, content: message.clone(), name: None, format: None, encoding: None }],
        output: String::new(),
        stderr: String::new(),
        error: Some(message),
        execution_time: started.elapsed().as_secs_f64(),
        cell_id,
        exit_code: None,
    }
}
