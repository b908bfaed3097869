//! HTTP request handlers.

mod admin;
mod health;
mod turns;

pub use admin::admin_sessions;
pub use health::{health, metrics};
pub use turns::{chat_completions, messages};
