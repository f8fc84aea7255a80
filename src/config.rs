use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub scripts_dir: PathBuf,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub credential_encryption_key: String,
    /// Fallback token when no `github_token` setting is stored.
    pub github_token: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://scripthub.db?mode=rwc".to_string());

        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));

        let scripts_dir = env::var("SCRIPTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("scripts"));

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set".to_string())?;

        let credential_encryption_key = env::var("CREDENTIAL_ENCRYPTION_KEY")
            .map_err(|_| "CREDENTIAL_ENCRYPTION_KEY must be set (32-byte hex string)".to_string())?;
        if hex::decode(&credential_encryption_key)
            .map(|b| b.len() != 32)
            .unwrap_or(true)
        {
            return Err("CREDENTIAL_ENCRYPTION_KEY must be a 32-byte hex string".to_string());
        }

        let github_token = env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(ServerConfig {
            listen_addr,
            database_url,
            scripts_dir,
            data_dir,
            jwt_secret,
            credential_encryption_key,
            github_token,
        })
    }

    pub fn update_log_path(&self) -> PathBuf {
        self.data_dir.join("update.log")
    }
}
