//! # kbcapi
//!
//! Keboola Management API binding for the [`reconcile`] engine.
//!
//! - [`catalog`]: capability descriptor of every managed resource type
//! - [`routes`]: endpoint templates and field mapping per type
//! - [`client`]: [`ManagementClient`], a blocking [`reconcile::ResourceApi`]
//!
//! ## Example
//!
//! ```no_run
//! use kbcapi::{ClientConfig, ManagementClient};
//! use reconcile::{fields, CancelToken, DesiredState, Reconciler};
//!
//! let client = ManagementClient::new(ClientConfig::new("keboola.com", "manage-token"))?;
//! client.verify_token()?;
//!
//! let reconciler = Reconciler::new(kbcapi::registry(), &client);
//! let desired = DesiredState::new("maintainer", fields! { "name" => "Acme" });
//! let result = reconciler.reconcile(&desired, None, &CancelToken::new())?;
//! println!("{:?} {:?}", result.action, result.observed.external_id);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod catalog;
pub mod client;
pub mod routes;

pub use catalog::registry;
pub use client::{ClientConfig, DEFAULT_TIMEOUT, ManagementClient, TokenInfo};
pub use routes::{Coercion, ReadStrategy, Route, normalize};
