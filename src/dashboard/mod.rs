//! The web dashboard: HTTP API, live event feed and embedded UI.
//!
//! | Module     | Role                                                   |
//! |------------|--------------------------------------------------------|
//! | `repo`     | Typed reads and writes of the store documents          |
//! | `views`    | Read models: board columns, department queues, filters |
//! | `workflow` | Every operation, with authorization and logging        |
//! | `api`      | axum handlers mapping HTTP onto `workflow`             |
//! | `ws`       | Change notifications pushed to connected dashboards    |
//! | `server`   | Router assembly, static UI and the listen loop         |

pub mod api;
pub mod embedded;
pub mod repo;
pub mod server;
pub mod views;
pub mod workflow;
pub mod ws;

pub use server::{ServerConfig, build_router, start_server};
pub use workflow::Workflow;
