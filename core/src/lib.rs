//! shortage-core: daily settlement short-delivery reconciliation.
//!
//! Pipeline, leaf-first:
//!   locator  → finds the business day's export on the remote tree
//!   reader   → gunzips and header-resolves the delimited export
//!   store    → the only module that talks to the database
//!   engine   → runs the ordered stages for one business day
//!   notify   → tells shortaged clients, one request per channel

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod locator;
pub mod notify;
pub mod reader;
pub mod store;
pub mod types;
