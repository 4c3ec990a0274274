//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `deploy` | `Deploy`         |
//! | `sites`  | `List`, `Show`   |

pub mod deploy;
pub mod serve;
pub mod sites;

pub use deploy::cmd_deploy;
pub use serve::cmd_serve;
pub use sites::{cmd_list, cmd_show};
