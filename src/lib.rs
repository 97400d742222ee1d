//! Prometheus exporter for Nutanix Prism.
//!
//! Each configured Prism endpoint gets a scrape loop that pages through the
//! VM inventory, fetches per-VM stats, reads cluster and host stats, and
//! publishes normalized gauges into a shared [`registry::MetricRegistry`]
//! served on `/metrics`.

pub mod agent;
pub mod aggregate;
pub mod config;
pub mod export;
pub mod inventory;
pub mod prism;
pub mod registry;
pub mod scrape;
