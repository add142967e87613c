use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn cli_leader_and_client_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("distributed_lock");

    let (mut leader_child, mut leader_stdout) = spawn_leader(&binary).await?;
    let addr = read_listen_addr(&mut leader_stdout).await?;

    // Drain further leader logs so the pipe never fills.
    let leader_log_task = tokio::spawn(async move {
        drain_stdout(leader_stdout).await;
    });

    assert_eq!(run_client(&binary, &addr, "alice", "own", "printer").await?, "NONE");
    assert_eq!(run_client(&binary, &addr, "alice", "lock", "printer").await?, "SUCCESS");
    assert_eq!(run_client(&binary, &addr, "bob", "lock", "printer").await?, "FAIL");
    assert_eq!(run_client(&binary, &addr, "bob", "own", "printer").await?, "alice");
    assert_eq!(run_client(&binary, &addr, "bob", "unlock", "printer").await?, "FAIL");
    assert_eq!(run_client(&binary, &addr, "alice", "unlock", "printer").await?, "SUCCESS");
    assert_eq!(run_client(&binary, &addr, "bob", "own", "printer").await?, "NONE");

    let _ = leader_child.kill().await;
    let _ = leader_child.wait().await;
    let _ = leader_log_task.await;

    Ok(())
}

async fn spawn_leader(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("leader")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn leader")?;
    let stdout = child
        .stdout
        .take()
        .context("leader stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

/// Skips log lines until the listening banner and returns its address.
async fn read_listen_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    loop {
        let line = read_line(reader)
            .await?
            .context("leader did not emit listening address")?;
        if !line.contains("node listening on") {
            continue;
        }
        let addr = line
            .split_whitespace()
            .last()
            .context("unexpected leader banner format")?;
        if !addr.contains(':') {
            return Err(anyhow!("leader banner missing socket: {line}"));
        }
        return Ok(addr.to_string());
    }
}

async fn run_client(binary: &Path, addr: &str, id: &str, command: &str, lock: &str) -> Result<String> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .arg("--id")
        .arg(id)
        .arg(command)
        .arg(lock)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null())
        .stderr(Stdio::null());

    let output = timeout(READ_TIMEOUT, cmd.output())
        .await
        .map_err(|_| anyhow!("client {id} {command} {lock} timed out"))?
        .with_context(|| format!("failed to run client {id}"))?;
    if !output.status.success() {
        return Err(anyhow!("client {id} exited with status {}", output.status));
    }

    let stdout = String::from_utf8(output.stdout).context("client output is not utf-8")?;
    stdout
        .lines()
        .last()
        .map(str::to_string)
        .context("client printed nothing")
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let bytes_io = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if bytes_io? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
