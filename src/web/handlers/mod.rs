pub mod install_ws_handler;
pub mod update_log_ws_handler;
