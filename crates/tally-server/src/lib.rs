//! Tally Server - HTTP front end for the metric store
//!
//! Routes:
//!
//! | Method | Path | Ingress chain |
//! |--------|------|---------------|
//! | POST | `/update/:kind/:name/:value` | no |
//! | POST | `/update/` | yes |
//! | POST | `/updates/` | yes |
//! | GET | `/value/:kind/:name` | no |
//! | POST | `/value/` | yes |
//! | GET | `/` | no |
//! | GET | `/ping` | no |

mod error;
mod handlers;
pub mod middleware;
mod server;
mod state;

pub use error::ApiError;
pub use server::{bind, router, serve};
pub use state::{build_pipeline, open_persister, AppState};
