//! Address and name reservation for NodeSets.
//!
//! The operator consumes these as facades: it asks for reservations and
//! records, then polls until they report ready. The store-backed
//! implementations here allocate from the namespace's `NetConfig` and
//! publish `DNSData` records.

pub mod dns;
pub mod ipam;

/// Outcome of a facade call that may have to be retried later.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness<T> {
    Ready(T),
    /// Not ready yet; the message says what is missing.
    Waiting(String),
}
