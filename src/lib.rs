pub mod archive;
pub mod config;
pub mod content;
pub mod errors;
pub mod launcher;
pub mod provision;
pub mod registry;
pub mod safe_path;
pub mod web;
