//! GCP API interaction module
//!
//! This module provides the core functionality for interacting with Google Cloud Platform
//! APIs, including authentication, HTTP client, and the resource type bindings
//! the engine drives.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client: URLs, requests, operation polling
//! - [`http`] - HTTP utilities for REST API calls
//! - [`fetcher`] - List pagination
//! - [`labels`] - First-seen label codec
//! - [`projects`] - Target project and region lookup
//! - [`resources`] - Resource type bindings, in deletion order
//!
//! # Example
//!
//! ```ignore
//! use crate::gcp::client::GcpClient;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new("my-project").await?;
//!     let registry = crate::gcp::resources::registry(&client)?;
//!     println!("{:?}", registry.type_names());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod fetcher;
pub mod http;
pub mod labels;
pub mod projects;
pub mod resources;
