//! HTTP surface over the provisioning pipeline.
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         │ POST /upload                           │
//!                       │         v                                        │
//!                       │  provision.rs  (Provisioner)                     │
//!                       │     ├─ archive.rs   (ArchiveExtractor)           │
//!                       │     ├─ registry.rs  (SiteRegistry)               │
//!                       │     └─ launcher.rs  (ProcessLauncher)            │
//!                       │                                                  │
//!                       │         │ GET /site/{directory}/{*path}          │
//!                       │         v                                        │
//!                       │  content.rs  (SiteContent, Resolution)           │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Routes
//!
//! | Route                              | Handler            |
//! |------------------------------------|--------------------|
//! | `GET /health`                      | `health_check`     |
//! | `GET /`                            | `upload_form`      |
//! | `POST /upload`                     | `upload`           |
//! | `GET /sites`                       | `list_sites`       |
//! | `GET /sites/{directory}`           | `get_site`         |
//! | `GET /site/{directory}`            | `serve_site_root`  |
//! | `GET /site/{directory}/{*path}`    | `serve_site_file`  |
//!
//! Uploads block the request until extraction and registration are done;
//! only the start command outlives the request.

pub mod api;
pub mod server;
