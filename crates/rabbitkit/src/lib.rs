//! # rabbitkit
//!
//! Pure Rust library for converging RabbitMQ users through `rabbitmqctl`.
//!
//! This crate provides functionality for:
//! - Detecting the broker version and whether it supports user tags
//! - Parsing `list_users` output in both the legacy and tagged formats
//! - Creating, deleting, tagging and promoting users idempotently
//! - Waiting for a broker to come up with bounded, deadline-aware retries
//!
//! ## Example
//!
//! ```no_run
//! use rabbitkit::{DesiredUser, Reconciler};
//!
//! let reconciler = Reconciler::new().expect("rabbitmqctl not available");
//!
//! // Compare a declared user with the broker
//! let app = DesiredUser::new("app")
//!     .with_password("s3cret")
//!     .with_tags(["monitoring"]);
//! let drift = reconciler.plan(&app).expect("listing failed");
//! println!("{drift:?}");
//!
//! // Converge it
//! reconciler.converge(&app).expect("converge failed");
//! ```
//!
//! ## Readiness
//!
//! A freshly started node rejects commands for a while. Gate work on
//! [`Reconciler::wait_for_ready`], which retries on a fixed step and kills
//! any attempt that outlives its deadline.
//!
//! ```no_run
//! use rabbitkit::{Reconciler, RetryPolicy, retry::LogCallback};
//! use std::time::Duration;
//!
//! let reconciler = Reconciler::new().unwrap();
//! let policy = RetryPolicy::new(10, Duration::from_secs(3), Duration::from_secs(10));
//! reconciler.wait_for_ready(&policy, Some(&LogCallback)).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod parser;
pub mod reconciler;
pub mod retry;
pub mod types;
pub mod version;

pub use error::{Error, ErrorCategory, Result};
pub use reconciler::{Reconciler, UserProvider};
pub use types::{
    ADMIN_TAG, ApplyResult, BrokerVersion, Catalog, CatalogEntry, DesiredUser, DiscoveredUser,
    Drift, Ensure, RetryPolicy, TagStrategy, UserSnapshot, UserTags,
};
