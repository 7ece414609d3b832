//! Guarded server: HTTPS endpoint that only talks to clients holding a
//! certificate from the trust pool.

mod handler;
mod server;

pub use handler::{ACKNOWLEDGEMENT, AppState, BODY_ERROR, create_router};
pub use server::{GuardedServer, IDENTITY_POLL_INTERVAL, wait_for_identity};
