//! Install websocket. The client sends one request message, the
//! server streams back the live output of the install script and a
//! final outcome. The full output is also persisted on the
//! installed-script record, so a closed browser tab loses nothing.

use std::process::Stdio;
use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::db::entities::installed_script::InstallStatus;
use crate::db::entities::{script, server, source_repo};
use crate::db::services as db_services;
use crate::proxmox;
use crate::ssh::{OutputLine, OutputStream, SshSession};
use crate::sync::catalog;
use crate::web::{AppError, AppState, middleware::auth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum InstallMode {
    Local,
    Ssh,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallRequest {
    slug: String,
    mode: InstallMode,
    server_id: Option<i32>,
    method: Option<String>,
}

pub async fn install_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    // Same check as the protected routes; installs must not be
    // reachable anonymously just because they upgrade to a websocket.
    auth::authorize(&app_state.db, &app_state.config.jwt_secret, &headers, &jar).await?;
    Ok(ws.on_upgrade(move |socket| handle_install_socket(socket, app_state)))
}

async fn handle_install_socket(mut socket: WebSocket, app_state: Arc<AppState>) {
    let request = match read_request(&mut socket).await {
        Some(request) => request,
        None => return,
    };
    info!(slug = %request.slug, mode = ?request.mode, "Install requested.");

    if let Err(e) = run_install(&mut socket, &app_state, request).await {
        warn!(error = %e, "Install aborted.");
        send_json(
            &mut socket,
            &json!({ "type": "error", "message": e.to_string() }),
        )
        .await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn read_request(socket: &mut WebSocket) -> Option<InstallRequest> {
    while let Some(Ok(msg)) = socket.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<InstallRequest>(&text) {
                Ok(request) => return Some(request),
                Err(e) => {
                    send_json(
                        socket,
                        &json!({ "type": "error", "message": format!("Invalid install request: {e}") }),
                    )
                    .await;
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> bool {
    let text = value.to_string();
    socket
        .send(Message::Text(Utf8Bytes::from(text)))
        .await
        .is_ok()
}

/// Picks the script file to run: the requested method type, or the
/// first method that carries a script path.
fn select_script_path(
    script: &script::Model,
    method: Option<&str>,
) -> Result<String, AppError> {
    let methods: Vec<catalog::InstallMethod> =
        serde_json::from_value(script.install_methods.clone()).unwrap_or_default();
    let chosen = match method {
        Some(wanted) => methods.iter().find(|m| m.method_type == wanted),
        None => methods.iter().find(|m| m.script.is_some()),
    };
    chosen
        .and_then(|m| m.script.clone())
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Script '{}' has no runnable install method{}",
                script.slug,
                method.map(|m| format!(" of type '{m}'")).unwrap_or_default()
            ))
        })
}

async fn resolve_ssh_target(
    db: &sea_orm::DatabaseConnection,
    server_id: Option<i32>,
) -> Result<server::Model, AppError> {
    let Some(server_id) = server_id else {
        if db_services::count_servers(db).await? == 0 {
            return Err(AppError::InvalidInput(
                "No servers are configured; add a server before installing over SSH".to_string(),
            ));
        }
        return Err(AppError::InvalidInput(
            "serverId is required for an SSH install".to_string(),
        ));
    };
    db_services::get_server(db, server_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {server_id} not found")))
}

async fn find_repo(
    app_state: &AppState,
    script: &script::Model,
) -> Result<source_repo::Model, AppError> {
    db_services::get_repo(&app_state.db, script.source_repo_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Source repository for '{}' no longer exists",
                script.slug
            ))
        })
}

async fn run_install(
    socket: &mut WebSocket,
    app_state: &AppState,
    request: InstallRequest,
) -> Result<(), AppError> {
    let script = db_services::get_script_by_slug(&app_state.db, &request.slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Script '{}' not found", request.slug)))?;

    let server = match request.mode {
        InstallMode::Ssh => Some(resolve_ssh_target(&app_state.db, request.server_id).await?),
        InstallMode::Local => None,
    };

    let script_path = select_script_path(&script, request.method.as_deref())?;

    // Fetch the files on demand so an install never runs a stale or
    // missing local copy silently.
    if !app_state.store.exists(&script_path).await {
        let repo = find_repo(app_state, &script).await?;
        let client = catalog::github_client_from_settings(&app_state.db, &app_state.config).await?;
        catalog::download_script_files(
            &client,
            &app_state.store,
            &repo,
            &script.slug,
            &script.install_methods,
        )
        .await?;
    }

    let content = app_state
        .store
        .read(&script_path)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Script file for '{}' missing", script.slug)))?;

    let record = db_services::create_installed(
        &app_state.db,
        &script.slug,
        server.as_ref().map(|s| s.id),
        None,
        InstallStatus::InProgress,
    )
    .await?;

    send_json(
        socket,
        &json!({ "type": "start", "recordId": record.id, "slug": script.slug }),
    )
    .await;

    let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
    let exec =
        start_execution_or_fail(app_state, record.id, server.as_ref(), content.into_bytes(), tx)
            .await?;

    let mut log = String::new();
    let mut socket_open = true;
    while let Some(line) = rx.recv().await {
        log.push_str(&line.line);
        log.push('\n');
        if socket_open {
            socket_open = send_json(
                socket,
                &json!({ "type": "line", "stream": line.stream, "line": line.line }),
            )
            .await;
        }
    }

    let exit_code = match exec.await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            db_services::finalize_install(
                &app_state.db,
                record.id,
                InstallStatus::Failed,
                format!("{log}\nexecution error: {e}"),
                None,
                None,
            )
            .await?;
            return Err(e);
        }
        Err(e) => {
            error!(error = %e, "Install task panicked.");
            db_services::finalize_install(
                &app_state.db,
                record.id,
                InstallStatus::Failed,
                log,
                None,
                None,
            )
            .await?;
            return Err(AppError::InternalServerError("install task failed".to_string()));
        }
    };

    let status = if exit_code == 0 {
        InstallStatus::Success
    } else {
        InstallStatus::Failed
    };

    // After an SSH install, try to find the freshly created container
    // so the record gets a container id and a clickable address.
    let mut container_id = None;
    let mut web_ui_url = None;
    if status == InstallStatus::Success {
        if let Some(server) = &server {
            match locate_container(app_state, server, &script).await {
                Ok(Some((ctid, url))) => {
                    container_id = Some(ctid);
                    web_ui_url = url;
                }
                Ok(None) => {}
                Err(e) => warn!(slug = %script.slug, error = %e, "Post-install detection failed."),
            }
        }
    }

    let final_record = db_services::finalize_install(
        &app_state.db,
        record.id,
        status,
        log,
        container_id,
        web_ui_url.clone(),
    )
    .await?;

    send_json(
        socket,
        &json!({
            "type": "done",
            "recordId": final_record.id,
            "exitCode": exit_code,
            "status": final_record.status,
            "containerId": final_record.container_id,
            "webUiUrl": final_record.web_ui_url,
        }),
    )
    .await;
    Ok(())
}

/// Launches the execution task. When the launch itself fails (SSH
/// connect, auth rejection, credential decrypt) the record is
/// finalized as failed so it never stays stuck at in-progress.
async fn start_execution_or_fail(
    app_state: &AppState,
    record_id: i32,
    server: Option<&server::Model>,
    script_bytes: Vec<u8>,
    tx: mpsc::Sender<OutputLine>,
) -> Result<tokio::task::JoinHandle<Result<u32, AppError>>, AppError> {
    match spawn_execution(app_state, server, script_bytes, tx).await {
        Ok(handle) => Ok(handle),
        Err(e) => {
            db_services::finalize_install(
                &app_state.db,
                record_id,
                InstallStatus::Failed,
                format!("execution error: {e}"),
                None,
                None,
            )
            .await?;
            Err(e)
        }
    }
}

/// Starts the install script and returns the task that resolves to its
/// exit code. SSH installs pipe the script into `bash -s` on the
/// remote host; local installs run it in a child process here.
async fn spawn_execution(
    app_state: &AppState,
    server: Option<&server::Model>,
    script_bytes: Vec<u8>,
    tx: mpsc::Sender<OutputLine>,
) -> Result<tokio::task::JoinHandle<Result<u32, AppError>>, AppError> {
    match server {
        Some(server) => {
            let session =
                SshSession::open(server, &app_state.config.credential_encryption_key).await?;
            Ok(tokio::spawn(async move {
                let result = session
                    .exec_streamed("bash -s", Some(&script_bytes), tx)
                    .await;
                session.close().await;
                Ok(result?)
            }))
        }
        None => Ok(tokio::spawn(async move {
            run_local_script(&script_bytes, tx).await.map_err(AppError::from)
        })),
    }
}

async fn run_local_script(
    script_bytes: &[u8],
    tx: mpsc::Sender<OutputLine>,
) -> std::io::Result<u32> {
    use tokio::io::AsyncWriteExt;

    let mut child = Command::new("bash")
        .arg("-s")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(script_bytes).await?;
        drop(stdin);
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut readers = Vec::new();
    if let Some(stdout) = stdout {
        let tx = tx.clone();
        readers.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx
                    .send(OutputLine {
                        stream: OutputStream::Stdout,
                        line,
                    })
                    .await;
            }
        }));
    }
    if let Some(stderr) = stderr {
        let tx = tx.clone();
        readers.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx
                    .send(OutputLine {
                        stream: OutputStream::Stderr,
                        line,
                    })
                    .await;
            }
        }));
    }
    drop(tx);

    for reader in readers {
        let _ = reader.await;
    }
    let status = child.wait().await?;
    Ok(status.code().unwrap_or(1) as u32)
}

/// Scans the server for a tagged container matching the installed
/// slug. Returns its ctid and, when an IP is visible, a web address
/// using the script's interface port.
async fn locate_container(
    app_state: &AppState,
    server: &server::Model,
    script: &script::Model,
) -> Result<Option<(i32, Option<String>)>, AppError> {
    let session = SshSession::open(server, &app_state.config.credential_encryption_key).await?;
    let result = async {
        let containers = proxmox::list_tagged_containers(&session)
            .await
            .map_err(|e| AppError::SshError(e.to_string()))?;
        let Some(container) = containers.iter().find(|c| c.slug == script.slug) else {
            return Ok(None);
        };
        let ip = proxmox::detect_container_ip(&session, container.ctid)
            .await
            .unwrap_or(None);
        let url = ip.map(|ip| match script.interface_port {
            Some(port) => format!("{ip}:{port}"),
            None => ip,
        });
        Ok(Some((container.ctid, url)))
    }
    .await;
    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::schema;
    use crate::script_store::ScriptStore;
    use crate::services::secrets;
    use sea_orm::Database;

    async fn test_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        schema::init_schema(&db).await.unwrap();
        db
    }

    fn test_app_state(db: sea_orm::DatabaseConnection) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            db,
            config: Arc::new(ServerConfig {
                listen_addr: "127.0.0.1:0".to_owned(),
                database_url: "sqlite::memory:".to_owned(),
                scripts_dir: dir.path().join("scripts"),
                data_dir: dir.path().to_path_buf(),
                jwt_secret: "test-secret".to_owned(),
                credential_encryption_key: "11".repeat(32),
                github_token: None,
            }),
            store: ScriptStore::new(dir.path().join("scripts")),
            sync_guard: Arc::new(tokio::sync::Mutex::new(())),
        };
        (state, dir)
    }

    #[tokio::test]
    async fn unreachable_server_finalizes_the_record_as_failed() {
        let db = test_db().await;
        let (app_state, _dir) = test_app_state(db.clone());
        let record =
            db_services::create_installed(&db, "homarr", Some(1), None, InstallStatus::InProgress)
                .await
                .unwrap();

        // Port 1 on loopback refuses the connection immediately.
        let key = &app_state.config.credential_encryption_key;
        let target = server::Model {
            id: 1,
            name: "pve".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 1,
            username: "root".to_owned(),
            auth_type: server::AuthType::Password,
            password_enc: Some(secrets::encrypt("hunter2", key).unwrap()),
            private_key_enc: None,
            key_passphrase_enc: None,
            color: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let (tx, _rx) = mpsc::channel::<OutputLine>(8);
        let err = start_execution_or_fail(&app_state, record.id, Some(&target), Vec::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SshError(_)));

        let stored = db_services::get_installed(&db, record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InstallStatus::Failed);
        assert!(stored.output_log.contains("execution error"));
    }

    #[tokio::test]
    async fn ssh_install_without_any_server_gets_a_clear_error() {
        let db = test_db().await;
        let err = resolve_ssh_target(&db, None).await.unwrap_err();
        assert!(err.to_string().contains("No servers are configured"));
    }

    #[tokio::test]
    async fn ssh_install_with_unknown_server_id_is_not_found() {
        let db = test_db().await;
        let err = resolve_ssh_target(&db, Some(42)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn script_path_selection_honors_the_method_type() {
        let script = script_with_methods(serde_json::json!([
            { "type": "default", "script": "ct/homarr.sh" },
            { "type": "alpine", "script": "ct/alpine-homarr.sh" }
        ]));
        assert_eq!(select_script_path(&script, None).unwrap(), "ct/homarr.sh");
        assert_eq!(
            select_script_path(&script, Some("alpine")).unwrap(),
            "ct/alpine-homarr.sh"
        );
        assert!(select_script_path(&script, Some("missing")).is_err());
    }

    #[test]
    fn script_without_runnable_method_is_rejected() {
        let script = script_with_methods(serde_json::json!([{ "type": "default" }]));
        assert!(select_script_path(&script, None).is_err());
    }

    fn script_with_methods(install_methods: serde_json::Value) -> script::Model {
        script::Model {
            id: 1,
            slug: "homarr".to_owned(),
            source_repo_id: 1,
            name: "Homarr".to_owned(),
            description: None,
            categories: serde_json::json!([]),
            install_methods,
            updateable: false,
            website: None,
            documentation: None,
            date_created: None,
            interface_port: Some(7575),
            fetched_at: chrono::Utc::now(),
        }
    }
}
