//! One-shot SSH command execution against configured servers. A
//! session is opened per command and closed on completion; there is no
//! pooling. Output can be captured whole or streamed line by line.

use std::sync::Arc;

use russh::{ChannelMsg, Disconnect, client};
use russh_keys::key;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::db::entities::server::{self, AuthType};
use crate::services::secrets;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("connection failed: {0}")]
    Connect(#[source] russh::Error),
    #[error("authentication rejected for user {0}")]
    AuthRejected(String),
    #[error("invalid private key: {0}")]
    Key(#[from] russh_keys::Error),
    #[error("credential error: {0}")]
    Credential(String),
    #[error("server has no stored {0}")]
    MissingCredential(&'static str),
    #[error("protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

pub enum SshAuth {
    Password(String),
    Key {
        pem: String,
        passphrase: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

struct ClientHandler;

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not pinned; targets are user-configured hosts.
        Ok(true)
    }
}

pub struct SshSession {
    handle: client::Handle<ClientHandler>,
}

impl SshSession {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        auth: SshAuth,
    ) -> Result<Self, SshError> {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (host, port), ClientHandler)
            .await
            .map_err(SshError::Connect)?;

        let authenticated = match auth {
            SshAuth::Password(password) => {
                handle.authenticate_password(username, &password).await?
            }
            SshAuth::Key { pem, passphrase } => {
                let key_pair = russh_keys::decode_secret_key(&pem, passphrase.as_deref())?;
                handle
                    .authenticate_publickey(username, Arc::new(key_pair))
                    .await?
            }
        };
        if !authenticated {
            return Err(SshError::AuthRejected(username.to_owned()));
        }
        Ok(Self { handle })
    }

    /// Decrypts the stored credentials and opens a session to a
    /// configured server.
    pub async fn open(server: &server::Model, credential_key: &str) -> Result<Self, SshError> {
        let auth = match server.auth_type {
            AuthType::Password => {
                let enc = server
                    .password_enc
                    .as_deref()
                    .ok_or(SshError::MissingCredential("password"))?;
                SshAuth::Password(secrets::decrypt(enc, credential_key).map_err(SshError::Credential)?)
            }
            AuthType::Key => {
                let enc = server
                    .private_key_enc
                    .as_deref()
                    .ok_or(SshError::MissingCredential("private key"))?;
                let pem = secrets::decrypt(enc, credential_key).map_err(SshError::Credential)?;
                let passphrase = match server.key_passphrase_enc.as_deref() {
                    Some(enc) => {
                        Some(secrets::decrypt(enc, credential_key).map_err(SshError::Credential)?)
                    }
                    None => None,
                };
                SshAuth::Key { pem, passphrase }
            }
        };
        Self::connect(&server.host, server.port as u16, &server.username, auth).await
    }

    /// Runs one command and forwards stdout/stderr lines over `tx` as
    /// they arrive. Returns the remote exit status. A dropped receiver
    /// stops delivery but not the remote command.
    pub async fn exec_streamed(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        tx: mpsc::Sender<OutputLine>,
    ) -> Result<u32, SshError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        if let Some(data) = stdin {
            channel.data(data).await?;
            channel.eof().await?;
        }

        let mut stdout_buf: Vec<u8> = Vec::new();
        let mut stderr_buf: Vec<u8> = Vec::new();
        let mut exit_code = 0u32;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout_buf.extend_from_slice(data);
                    for line in drain_complete_lines(&mut stdout_buf) {
                        let _ = tx
                            .send(OutputLine {
                                stream: OutputStream::Stdout,
                                line,
                            })
                            .await;
                    }
                }
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    stderr_buf.extend_from_slice(data);
                    for line in drain_complete_lines(&mut stderr_buf) {
                        let _ = tx
                            .send(OutputLine {
                                stream: OutputStream::Stderr,
                                line,
                            })
                            .await;
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = exit_status;
                }
                _ => {}
            }
        }

        for (buf, stream) in [
            (&mut stdout_buf, OutputStream::Stdout),
            (&mut stderr_buf, OutputStream::Stderr),
        ] {
            if let Some(line) = flush_partial_line(buf) {
                let _ = tx.send(OutputLine { stream, line }).await;
            }
        }

        Ok(exit_code)
    }

    /// Runs one command and captures its full output.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0u32;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status,
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

/// Splits off every complete line in `buf`, leaving any trailing
/// partial line in place for the next chunk.
fn drain_complete_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop(); // the newline itself
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

fn flush_partial_line(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"first li");
        assert!(drain_complete_lines(&mut buf).is_empty());
        buf.extend_from_slice(b"ne\nsecond\npartial");
        assert_eq!(drain_complete_lines(&mut buf), vec!["first line", "second"]);
        assert_eq!(flush_partial_line(&mut buf).as_deref(), Some("partial"));
        assert_eq!(flush_partial_line(&mut buf), None);
    }

    #[test]
    fn crlf_endings_are_trimmed() {
        let mut buf = b"progress 10%\r\nprogress 20%\r\n".to_vec();
        assert_eq!(
            drain_complete_lines(&mut buf),
            vec!["progress 10%", "progress 20%"]
        );
        assert!(buf.is_empty());
    }
}
