//! # atrium-backend
//!
//! Pluggable backend adapters for the Atrium hub.
//!
//! The [`Backend`] trait is the capability contract every hosted generation
//! of the app provides: ordered reads, row writes, filtered change-feed
//! subscriptions, object-storage uploads, and auth. Two implementations ship
//! here: [`memory::MemoryBackend`] (in-process store driving the test suite
//! and local development) and [`rest::RestBackend`] (hosted Postgres over
//! PostgREST-style endpoints with a polling change feed).

pub mod adapter;
pub mod memory;
pub mod rest;

mod error;

pub use adapter::{Backend, ChangeEvent, Identity, NewMessage, ProfileUpdate, Subscription};
pub use error::{BackendError, Result};
pub use memory::MemoryBackend;
pub use rest::{RestBackend, RestConfig};
