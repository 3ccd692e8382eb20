//! BodyVerse regional pricing engine.
//!
//! Resolves a visitor's currency, keeps a cached USD exchange-rate table,
//! converts amounts, and renders localized subscription prices. Exposed
//! through the `bodyverse` CLI and a small JSON HTTP API.

pub mod config;
pub mod logging;
pub mod pricing;
pub mod server;
