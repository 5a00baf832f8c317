//! Discover and destroy cloud resources that match user-supplied filters.
//!
//! The engine ([`nuke`]) drives every resource type through the same
//! pipeline: initialize a scoped client, list candidates, filter them
//! ([`filter`], [`first_seen`]), dry-run the delete when the type supports
//! it, then hand the survivors to the type's deletion strategy
//! ([`resource::strategy`]). Outcomes are collected in a [`report::Report`].
//!
//! [`gcp`] provides the Google Cloud bindings.

pub mod config;
pub mod error;
pub mod filter;
pub mod first_seen;
pub mod gcp;
pub mod nuke;
pub mod report;
pub mod resource;
pub mod wait;

/// Version injected at compile time via CLOUD_NUKE_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUD_NUKE_VERSION") {
    Some(v) => v,
    None => "dev",
};
