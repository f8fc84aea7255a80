//! SeaORM entities mapping to the inventory tables.

pub mod category;
pub mod installed_script;
pub mod script;
pub mod server;
pub mod setting;
pub mod source_repo;
