//! Catalog sync: fetch JSON script descriptors from the configured
//! source repositories, merge them (dedup by slug, first occurrence
//! wins), attach categories from the metadata file, and replace the
//! local descriptor set wholesale in one transaction.

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::db::entities::{script, source_repo};
use crate::db::services as db_services;
use crate::db::services::script_service::{NewCategory, NewScript};
use crate::db::services::settings_service::KEY_GITHUB_TOKEN;
use crate::github::{GithubClient, GithubError};
use crate::script_store::ScriptStore;
use crate::web::error::AppError;

const METADATA_FILE: &str = "metadata.json";

/// Remote script descriptor as published by the source repositories.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogDescriptor {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub categories: Vec<i32>,
    pub date_created: Option<String>,
    #[serde(default)]
    pub updateable: bool,
    pub interface_port: Option<i32>,
    pub documentation: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub install_methods: Vec<InstallMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallMethod {
    #[serde(rename = "type")]
    pub method_type: String,
    pub script: Option<String>,
    pub resources: Option<ResourceHints>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHints {
    pub cpu: Option<i64>,
    pub ram: Option<i64>,
    pub hdd: Option<i64>,
    pub os: Option<String>,
    pub version: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CategoryMetadata {
    #[serde(default)]
    categories: Vec<CategoryEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    id: i32,
    name: String,
    #[serde(default)]
    sort_order: i32,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub repos: usize,
    pub scripts: usize,
    pub categories: usize,
    pub duplicates_skipped: usize,
    pub auto_downloaded: usize,
}

/// Merges descriptor batches in repo order. The first descriptor seen
/// for a slug wins; later occurrences are dropped.
pub fn merge_descriptors(
    batches: Vec<(i32, Vec<CatalogDescriptor>)>,
) -> (Vec<(i32, CatalogDescriptor)>, usize) {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    let mut duplicates = 0;
    for (repo_id, descriptors) in batches {
        for descriptor in descriptors {
            if seen.insert(descriptor.slug.clone()) {
                merged.push((repo_id, descriptor));
            } else {
                duplicates += 1;
            }
        }
    }
    (merged, duplicates)
}

/// Script file paths referenced by a stored `install_methods` column.
pub fn method_script_paths(install_methods: &serde_json::Value) -> Vec<String> {
    install_methods
        .as_array()
        .map(|methods| {
            methods
                .iter()
                .filter_map(|m| m.get("script").and_then(|s| s.as_str()))
                .map(|s| s.to_owned())
                .collect()
        })
        .unwrap_or_default()
}

pub async fn github_client_from_settings(
    db: &DatabaseConnection,
    config: &ServerConfig,
) -> Result<GithubClient, AppError> {
    let token = db_services::get_string_setting(db, KEY_GITHUB_TOKEN)
        .await?
        .or_else(|| config.github_token.clone());
    Ok(GithubClient::new(token)?)
}

async fn fetch_repo_descriptors(
    client: &GithubClient,
    repo: &source_repo::Model,
) -> Result<Vec<CatalogDescriptor>, AppError> {
    let entries = client
        .list_dir(&repo.owner_repo, &repo.json_path, &repo.branch)
        .await?;

    let mut descriptors = Vec::new();
    for entry in entries
        .iter()
        .filter(|e| e.is_json_file() && e.name != METADATA_FILE)
    {
        let text = client
            .fetch_text(&repo.owner_repo, &repo.branch, &entry.path)
            .await?;
        match serde_json::from_str::<CatalogDescriptor>(&text) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => {
                // One malformed descriptor must not sink the repo.
                warn!(repo = %repo.owner_repo, file = %entry.path, error = %e, "Skipping unparsable descriptor.");
            }
        }
    }
    Ok(descriptors)
}

async fn fetch_categories(
    client: &GithubClient,
    repo: &source_repo::Model,
) -> Result<Vec<NewCategory>, AppError> {
    let path = format!("{}/{METADATA_FILE}", repo.json_path);
    let text = match client.fetch_text(&repo.owner_repo, &repo.branch, &path).await {
        Ok(text) => text,
        Err(GithubError::NotFound(_)) => {
            warn!(repo = %repo.owner_repo, "No category metadata file; continuing without categories.");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    let metadata: CategoryMetadata = serde_json::from_str(&text)
        .map_err(|e| AppError::GithubError(format!("Invalid category metadata: {e}")))?;
    Ok(metadata
        .categories
        .into_iter()
        .map(|c| NewCategory {
            id: c.id,
            name: c.name,
            sort_order: c.sort_order,
        })
        .collect())
}

/// Runs one full sync cycle. Aborts without touching the database on
/// any fetch error; rerunning with unchanged remote data produces the
/// same descriptor set.
pub async fn run_catalog_sync(
    db: &DatabaseConnection,
    config: &ServerConfig,
    store: &ScriptStore,
) -> Result<SyncReport, AppError> {
    let client = github_client_from_settings(db, config).await?;
    let repos = db_services::list_enabled_repos(db).await?;

    let mut batches = Vec::new();
    for repo in &repos {
        let descriptors = fetch_repo_descriptors(&client, repo).await?;
        info!(repo = %repo.owner_repo, count = descriptors.len(), "Fetched script descriptors.");
        batches.push((repo.id, descriptors));
    }

    let categories = match repos.iter().find(|r| r.is_default).or(repos.first()) {
        Some(repo) => fetch_categories(&client, repo).await?,
        None => Vec::new(),
    };

    let (merged, duplicates_skipped) = merge_descriptors(batches);

    let new_scripts: Vec<NewScript> = merged
        .iter()
        .map(|(repo_id, d)| NewScript {
            slug: d.slug.clone(),
            source_repo_id: *repo_id,
            name: d.name.clone(),
            description: d.description.clone(),
            categories: serde_json::json!(d.categories),
            install_methods: serde_json::to_value(&d.install_methods)
                .unwrap_or_else(|_| serde_json::json!([])),
            updateable: d.updateable,
            website: d.website.clone(),
            documentation: d.documentation.clone(),
            date_created: d.date_created.clone(),
            interface_port: d.interface_port,
        })
        .collect();

    let mut report = SyncReport {
        repos: repos.len(),
        scripts: new_scripts.len(),
        categories: categories.len(),
        duplicates_skipped,
        auto_downloaded: 0,
    };

    db_services::replace_catalog(db, categories, new_scripts).await?;

    // Follow-on: refresh local copies for auto-download repos through
    // the same path as a manual load.
    for repo in repos.iter().filter(|r| r.auto_download) {
        for (repo_id, descriptor) in merged.iter().filter(|(id, _)| *id == repo.id) {
            debug_assert_eq!(*repo_id, repo.id);
            let methods = serde_json::to_value(&descriptor.install_methods)
                .unwrap_or_else(|_| serde_json::json!([]));
            match refresh_local_copy(&client, store, repo, &descriptor.slug, &methods).await {
                Ok(true) => report.auto_downloaded += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(slug = %descriptor.slug, error = %e, "Auto-download failed.");
                }
            }
        }
    }

    info!(
        scripts = report.scripts,
        categories = report.categories,
        duplicates = report.duplicates_skipped,
        auto_downloaded = report.auto_downloaded,
        "Catalog sync finished."
    );
    Ok(report)
}

/// Downloads every install-method script file for a slug into the
/// local store. A missing remote file reports the slug, not a generic
/// failure.
pub async fn download_script_files(
    client: &GithubClient,
    store: &ScriptStore,
    repo: &source_repo::Model,
    slug: &str,
    install_methods: &serde_json::Value,
) -> Result<Vec<String>, AppError> {
    let paths = method_script_paths(install_methods);
    if paths.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Script '{slug}' has no install method with a script path"
        )));
    }
    let mut saved = Vec::new();
    for path in paths {
        let content = client
            .fetch_text(&repo.owner_repo, &repo.branch, &path)
            .await
            .map_err(|e| fetch_error_for_slug(slug, e))?;
        store.save(&path, &content).await?;
        saved.push(path);
    }
    Ok(saved)
}

/// A missing script file is reported against the slug, not just the
/// raw URL.
fn fetch_error_for_slug(slug: &str, e: GithubError) -> AppError {
    match e {
        GithubError::NotFound(url) => {
            AppError::NotFound(format!("Script file for '{slug}' not found: {url}"))
        }
        other => other.into(),
    }
}

/// True when every script file for the slug exists locally and matches
/// the remote content byte for byte. Computed at view time; nothing is
/// cached.
pub async fn is_up_to_date(
    client: &GithubClient,
    store: &ScriptStore,
    repo: &source_repo::Model,
    script: &script::Model,
) -> Result<bool, AppError> {
    let paths = method_script_paths(&script.install_methods);
    if paths.is_empty() {
        return Ok(false);
    }
    for path in paths {
        let Some(local) = store.read(&path).await? else {
            return Ok(false);
        };
        let remote = client
            .fetch_text(&repo.owner_repo, &repo.branch, &path)
            .await?;
        if local != remote {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Auto-download helper: downloads when the local copy is missing or
/// stale. Returns whether anything was written.
async fn refresh_local_copy(
    client: &GithubClient,
    store: &ScriptStore,
    repo: &source_repo::Model,
    slug: &str,
    install_methods: &serde_json::Value,
) -> Result<bool, AppError> {
    let paths = method_script_paths(install_methods);
    if paths.is_empty() {
        return Ok(false);
    }
    let mut wrote = false;
    for path in paths {
        let remote = client
            .fetch_text(&repo.owner_repo, &repo.branch, &path)
            .await
            .map_err(|e| fetch_error_for_slug(slug, e))?;
        if store.read(&path).await?.as_deref() != Some(remote.as_str()) {
            store.save(&path, &remote).await?;
            wrote = true;
        }
    }
    Ok(wrote)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(slug: &str, name: &str) -> CatalogDescriptor {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "slug": slug,
            "categories": [1],
            "install_methods": [
                {"type": "default", "script": format!("ct/{slug}.sh"),
                 "resources": {"cpu": 2, "ram": 2048, "hdd": 8, "os": "debian", "version": 12}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn merge_keeps_first_occurrence_per_slug() {
        let batches = vec![
            (1, vec![descriptor("homarr", "Homarr"), descriptor("jellyfin", "Jellyfin")]),
            (2, vec![descriptor("homarr", "Homarr Fork"), descriptor("paperless", "Paperless")]),
        ];
        let (merged, duplicates) = merge_descriptors(batches);
        assert_eq!(duplicates, 1);
        let slugs: Vec<&str> = merged.iter().map(|(_, d)| d.slug.as_str()).collect();
        assert_eq!(slugs, vec!["homarr", "jellyfin", "paperless"]);
        // The winner is the first-seen descriptor, from repo 1.
        let (repo_id, winner) = &merged[0];
        assert_eq!(*repo_id, 1);
        assert_eq!(winner.name, "Homarr");
    }

    #[test]
    fn duplicate_within_one_repo_is_also_dropped() {
        let batches = vec![(1, vec![descriptor("a", "First"), descriptor("a", "Second")])];
        let (merged, duplicates) = merge_descriptors(batches);
        assert_eq!(merged.len(), 1);
        assert_eq!(duplicates, 1);
        assert_eq!(merged[0].1.name, "First");
    }

    #[test]
    fn descriptor_parses_with_missing_optionals() {
        let parsed: CatalogDescriptor =
            serde_json::from_str(r#"{"name": "Bare", "slug": "bare"}"#).unwrap();
        assert_eq!(parsed.slug, "bare");
        assert!(!parsed.updateable);
        assert!(parsed.install_methods.is_empty());
        assert!(parsed.categories.is_empty());
    }

    #[test]
    fn missing_script_file_error_names_the_slug() {
        let err = fetch_error_for_slug(
            "homarr",
            GithubError::NotFound("https://example.invalid/ct/homarr.sh".to_string()),
        );
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(err.to_string().contains("homarr"));
    }

    #[test]
    fn script_paths_from_install_methods_json() {
        let value = serde_json::json!([
            {"type": "default", "script": "ct/homarr.sh"},
            {"type": "alpine", "script": "ct/alpine-homarr.sh"},
            {"type": "broken"}
        ]);
        assert_eq!(
            method_script_paths(&value),
            vec!["ct/homarr.sh", "ct/alpine-homarr.sh"]
        );
        assert!(method_script_paths(&serde_json::json!({})).is_empty());
    }
}
