//! Config generation and deployment
//!
//! `generate` functions are pure: identical input gives identical text apart from
//! the timestamp line in the header. `deploy` and `ConfigPusher` do the side effects.

pub mod deploy;
pub mod greyhole;
pub mod hosts;
pub mod push;
pub mod samba;

use chrono::{DateTime, Utc};

pub use deploy::{deploy, DeployError, DeployReport};
pub use push::{ConfigPusher, PushReport};
pub use samba::SambaInput;

/// Prefix of the only line that differs between two generations of the same input
pub const TIMESTAMP_PREFIX: &str = "# generated at: ";

/// Comment header shared by every generated file
pub(crate) fn header(what: &str, now: DateTime<Utc>) -> String {
    format!(
        "# {} generated by amahi-agent; manual changes will be overwritten\n{}{}\n",
        what,
        TIMESTAMP_PREFIX,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Generated text without its timestamp line
pub fn without_timestamp(text: &str) -> String {
    text.lines()
        .filter(|l| !l.starts_with(TIMESTAMP_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
}
