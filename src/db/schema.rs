use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};

/// Creates the inventory tables if they do not exist yet. All DDL is
/// idempotent so this runs unconditionally at startup.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS servers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL DEFAULT 22,
            username TEXT NOT NULL,
            auth_type TEXT NOT NULL,
            password_enc TEXT,
            private_key_enc TEXT,
            key_passphrase_enc TEXT,
            color TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS source_repos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            owner_repo TEXT NOT NULL,
            branch TEXT NOT NULL,
            json_path TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            auto_download INTEGER NOT NULL DEFAULT 0,
            is_default INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS scripts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT NOT NULL UNIQUE,
            source_repo_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            categories TEXT NOT NULL,
            install_methods TEXT NOT NULL,
            updateable INTEGER NOT NULL DEFAULT 0,
            website TEXT,
            documentation TEXT,
            date_created TEXT,
            interface_port INTEGER,
            fetched_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS installed_scripts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            script_slug TEXT NOT NULL,
            server_id INTEGER,
            container_id INTEGER,
            status TEXT NOT NULL,
            web_ui_url TEXT,
            output_log TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_installed_scripts_server
            ON installed_scripts (server_id, container_id)
        "#,
    ];

    for stmt in statements {
        db.execute_unprepared(stmt).await?;
    }
    Ok(())
}
