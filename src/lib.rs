pub mod api;
pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod direct_upload;
pub mod error;
pub mod exit_code;
pub mod path_resolver;
pub mod publisher;
pub mod resumable_upload;
pub mod retry;
pub mod signed_url;
pub mod transfer;
pub mod types;
pub mod ui;
