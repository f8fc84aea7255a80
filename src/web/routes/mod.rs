pub mod installed_routes;
pub mod repo_routes;
pub mod script_routes;
pub mod server_routes;
pub mod settings_routes;
pub mod sync_routes;
pub mod update_routes;
