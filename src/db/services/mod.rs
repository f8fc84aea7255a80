//! High-level database API. Encapsulates the query logic so HTTP
//! handlers and background tasks work with domain models without
//! touching the schema directly. One sub-module per entity area; all
//! public functions are re-exported here.

pub mod installed_service;
pub mod repo_service;
pub mod script_service;
pub mod server_service;
pub mod settings_service;

pub use installed_service::*;
pub use repo_service::*;
pub use script_service::*;
pub use server_service::*;
pub use settings_service::*;
