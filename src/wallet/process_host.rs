//! Sandboxes as child processes
//!
//! Each wallet runs as `<program> [args..] <executor>` and speaks newline-delimited
//! JSON over stdin/stdout. The wallet id, network and provider list are passed as
//! `OMNI_WALLET_ID`, `OMNI_NETWORK` and `OMNI_PROVIDERS` (JSON). The child is killed
//! when its link goes away.

use super::{SandboxEnv, SandboxHost};
use crate::manifest::WalletManifest;
use crate::rpc::MessageLink;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

pub struct ProcessSandboxHost {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSandboxHost {
    /// `program` is the runtime executing wallet code, e.g. a JavaScript engine
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl SandboxHost for ProcessSandboxHost {
    async fn launch(&self, manifest: &WalletManifest, env: &SandboxEnv) -> crate::Result<MessageLink> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&manifest.executor)
            .env("OMNI_WALLET_ID", &env.wallet_id)
            .env("OMNI_NETWORK", env.network.to_string())
            .env("OMNI_PROVIDERS", serde_json::to_string(&env.providers)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("sandbox stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("sandbox stdout not captured"))?;

        let (host_end, sandbox_end) = MessageLink::pair(64);
        let MessageLink {
            outbound,
            mut inbound,
        } = sandbox_end;
        let wallet_id = manifest.id.clone();
        tracing::info!(
            wallet_id = %wallet_id,
            program = %self.program.display(),
            pid = ?child.id(),
            "Spawned sandbox process"
        );

        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let mut line = message.to_string();
                line.push('\n');
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::warn!(error = %e, "Sandbox stdin write failed");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            // Owns the child so it is killed when the reader stops.
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let message: Value = match serde_json::from_str(&line) {
                            Ok(message) => message,
                            Err(e) => {
                                tracing::warn!(wallet_id = %wallet_id, error = %e, "Sandbox wrote a non-JSON line");
                                continue;
                            }
                        };
                        if outbound.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(wallet_id = %wallet_id, "Sandbox process closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(wallet_id = %wallet_id, error = %e, "Sandbox stdout read failed");
                        break;
                    }
                }
            }
        });

        Ok(host_end)
    }
}
