//! Remote execution over SSH
//!
//! `ssh2` is blocking, so every connect and command runs on tokio's blocking
//! pool. A session holds one authenticated connection; commands on the same
//! session are serialized. The connect timeout covers only connection setup;
//! a command runs until it exits unless `command_timeout_secs` is set.

use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fleet_bench_core::{CommandOutput, InstanceRecord, RemoteError, RemoteExecutor, RemoteSession};
use serde::{Deserialize, Serialize};
use ssh2::{Channel, Session};

const READ_IDLE: Duration = Duration::from_millis(20);

/// SSH connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Login user
    pub user: String,
    /// Private key file; `~` is expanded
    pub key_path: String,
    /// Port
    pub port: u16,
    /// TCP connect, handshake and authentication timeout, in seconds
    pub connect_timeout_secs: u64,
    /// Limit on a single remote command, in seconds; 0 means none
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "ec2-user".to_string(),
            key_path: "~/.ssh/id_rsa".to_string(),
            port: 22,
            connect_timeout_secs: 10,
            command_timeout_secs: 0,
        }
    }
}

impl SshConfig {
    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Command timeout, if any
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    /// Key path with `~` expanded
    pub fn expanded_key_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.key_path).as_ref())
    }
}

/// `RemoteExecutor` that opens one SSH session per `connect`
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: Arc<SshConfig>,
}

impl SshExecutor {
    /// Create an executor
    pub fn new(config: SshConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(
        &self,
        instance: &InstanceRecord,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let host = instance.public_address.clone().ok_or_else(|| {
            RemoteError::Unreachable(format!("{} has no public address", instance.id))
        })?;
        let config = Arc::clone(&self.config);

        let session = tokio::task::spawn_blocking(move || open_session(&host, &config))
            .await
            .map_err(|e| RemoteError::Unreachable(format!("connect task failed: {e}")))??;

        tracing::debug!(instance_id = %instance.id, host = %session.host, "SSH session established");
        Ok(Box::new(session))
    }

    async fn probe(&self, instance: &InstanceRecord) -> bool {
        let session = match self.connect(instance).await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(instance_id = %instance.id, error = %e, "SSH probe failed");
                return false;
            }
        };
        matches!(session.run("true").await, Ok(output) if output.success())
    }
}

fn open_session(host: &str, config: &SshConfig) -> Result<SshSession, RemoteError> {
    let key_path = config.expanded_key_path();
    if !key_path.exists() {
        return Err(RemoteError::Unreachable(format!(
            "SSH key not found: {}",
            key_path.display()
        )));
    }

    let addr = (host, config.port)
        .to_socket_addrs()
        .map_err(|e| RemoteError::Unreachable(format!("resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| RemoteError::Unreachable(format!("no address for {host}")))?;

    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout())
        .map_err(|e| RemoteError::Unreachable(format!("connect {addr}: {e}")))?;

    let ssh_err = |stage: &str, e: ssh2::Error| RemoteError::Unreachable(format!("{stage} {addr}: {e}"));
    let mut session = Session::new().map_err(|e| ssh_err("session", e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_millis(config.connect_timeout()));
    session.handshake().map_err(|e| ssh_err("handshake", e))?;
    session
        .userauth_pubkey_file(&config.user, None, &key_path, None)
        .map_err(|e| ssh_err("authenticate", e))?;

    if !session.authenticated() {
        return Err(RemoteError::Unreachable(format!(
            "authentication failed for {}@{addr}",
            config.user
        )));
    }
    // Commands are bounded by `command_timeout` in `exec`, not by libssh2
    session.set_timeout(0);

    Ok(SshSession {
        session: Arc::new(Mutex::new(session)),
        host: addr.to_string(),
        command_timeout: config.command_timeout(),
    })
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// An authenticated SSH connection
pub struct SshSession {
    session: Arc<Mutex<Session>>,
    host: String,
    command_timeout: Option<Duration>,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let session = Arc::clone(&self.session);
        let command = command.to_string();
        let timeout = self.command_timeout;
        tracing::debug!(host = %self.host, command = %command, "SSH exec");

        tokio::task::spawn_blocking(move || {
            let session = session
                .lock()
                .map_err(|_| RemoteError::Command("session lock poisoned".into()))?;
            exec(&session, &command, timeout)
        })
        .await
        .map_err(|e| RemoteError::Command(format!("exec task failed: {e}")))?
    }
}

fn command_error(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::Command(e.to_string())
}

fn exec(session: &Session, command: &str, timeout: Option<Duration>) -> Result<CommandOutput, RemoteError> {
    let mut channel = session.channel_session().map_err(command_error)?;
    channel.exec(command).map_err(command_error)?;

    session.set_blocking(false);
    let drained = drain(&mut channel, timeout);
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel.wait_close().map_err(command_error)?;
    let exit_code = channel.exit_status().map_err(command_error)?;

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
    })
}

/// Read stdout and stderr together until EOF, so neither fills its window
fn drain(channel: &mut Channel, timeout: Option<Duration>) -> Result<(String, String), RemoteError> {
    let start = Instant::now();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let mut progressed = read_available(channel, &mut buf, &mut stdout)?;
        progressed |= read_available(&mut channel.stderr(), &mut buf, &mut stderr)?;

        if !progressed {
            if channel.eof() {
                break;
            }
            if timeout.is_some_and(|limit| start.elapsed() > limit) {
                return Err(RemoteError::Command(format!(
                    "command timed out after {}s",
                    start.elapsed().as_secs()
                )));
            }
            std::thread::sleep(READ_IDLE);
        }
    }

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

/// Non-blocking read of whatever `reader` has buffered; true if anything arrived
fn read_available(reader: &mut impl Read, buf: &mut [u8], out: &mut Vec<u8>) -> Result<bool, RemoteError> {
    let mut progressed = false;
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(command_error(e)),
        }
    }
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession").field("host", &self.host).finish()
    }
}
