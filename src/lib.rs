//! Offline request-interception agent.
//!
//! Every request the hosted application makes is classified and served
//! through a per-class strategy against a versioned cache store:
//!
//! - [`cache`]: named stores of request identity → response snapshot
//! - [`generation`]: install and activation of cache generations
//! - [`classify`]: request → resource class
//! - [`policy`]: network-first, cache-first and stale-while-revalidate, with fallbacks
//! - [`activation`]: eager or deferred handoff to a new generation
//! - [`agent`]: the event surface a host runtime drives

pub mod activation;
pub mod agent;
pub mod cache;
pub mod classify;
pub mod config;
pub mod generation;
pub mod logging;
pub mod network;
pub mod policy;

pub use agent::Agent;
pub use config::Config;
