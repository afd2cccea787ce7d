pub mod blog;
pub mod client;
pub mod controller;
pub mod db;
pub mod error;
pub mod log_capture;
pub mod notification;
pub mod server;
pub mod session;
pub mod state;
pub mod tui;
