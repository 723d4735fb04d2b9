//! Cached data access for the digital nomad city and job matching API.
//!
//! [`data::DataAccess`] is the entry point: it owns the HTTP client, the TTL
//! response cache and the observable client state store, and exposes the
//! city, job and user operations on top of them.

pub mod api;
pub mod cache;
pub mod config;
pub mod data;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod logging;
pub mod storage;
pub mod store;
