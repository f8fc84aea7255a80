pub mod config;
pub mod db;
pub mod github;
pub mod proxmox;
pub mod script_store;
pub mod services;
pub mod ssh;
pub mod sync;
pub mod update;
pub mod version;
pub mod web;
