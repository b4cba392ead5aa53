//! In-memory messaging backend for development mode and tests.
//!
//! Serves deterministic generated files through the same transport traits a
//! production client implements, with injectable faults for exercising retry
//! and early-termination paths.

pub mod client;
pub mod library;

pub use client::{
    ClientStats, FetchFailure, InMemoryClient, InMemorySession, LibraryResolver, SimulatedFaults,
};
pub use library::{MediaLibrary, SIMULATED_CHAT_ID, SimulatedFile, deterministic_content};
