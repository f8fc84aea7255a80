//! Self-update. The update itself is fire-and-forget: a detached
//! shell process appends to a log file that the websocket handler
//! tails back to the browser. Nothing here can report success
//! synchronously.

use std::io;
use std::io::SeekFrom;
use std::path::Path;
use std::process::Stdio;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tracing::info;

pub const DEFAULT_UPDATE_COMMAND: &str = "./self-update.sh";

pub fn update_command() -> String {
    std::env::var("SELF_UPDATE_COMMAND").unwrap_or_else(|_| DEFAULT_UPDATE_COMMAND.to_string())
}

/// Spawns the update process detached, with both streams redirected to
/// the log file. The child is not awaited; dropping the handle leaves
/// it running.
pub async fn trigger_self_update(log_path: &Path) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Truncate so the tail shows only the current run.
    let log = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)
        .await?
        .into_std()
        .await;
    let log_err = log.try_clone()?;

    let command = update_command();
    info!(command = %command, log = %log_path.display(), "Spawning self-update process.");

    let child = Command::new("bash")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()?;
    drop(child);
    Ok(())
}

/// Reads whatever was appended to the log since `offset`. Returns the
/// new text and the next offset; a missing file reads as empty.
pub async fn read_log_from(log_path: &Path, offset: u64) -> io::Result<(String, u64)> {
    let mut file = match File::open(log_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((String::new(), offset)),
        Err(e) => return Err(e),
    };
    let len = file.metadata().await?.len();
    // A truncated log means a new run started; begin again from zero.
    let start = if offset > len { 0 } else { offset };
    if start == len {
        return Ok((String::new(), len));
    }
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await?;
    Ok((String::from_utf8_lossy(&buf).into_owned(), len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_tail_tracks_appends_and_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.log");

        let (text, offset) = read_log_from(&path, 0).await.unwrap();
        assert!(text.is_empty());

        tokio::fs::write(&path, "step one\n").await.unwrap();
        let (text, offset) = read_log_from(&path, offset).await.unwrap();
        assert_eq!(text, "step one\n");

        let mut current = tokio::fs::read_to_string(&path).await.unwrap();
        current.push_str("step two\n");
        tokio::fs::write(&path, &current).await.unwrap();
        let (text, offset) = read_log_from(&path, offset).await.unwrap();
        assert_eq!(text, "step two\n");

        // Truncation restarts the tail from the top.
        tokio::fs::write(&path, "fresh\n").await.unwrap();
        let (text, _) = read_log_from(&path, offset).await.unwrap();
        assert_eq!(text, "fresh\n");
    }
}
