//! Durable session storage.

mod session;

pub use session::{SessionStore, StoreError};
