#![doc = include_str!("../README.md")]

pub mod cache;
mod common;
pub mod config;
mod engine;
pub mod issuer;
pub mod registry;
pub mod segment;
pub mod store;
pub mod sync;

pub use crate::common::*;
pub use crate::config::EngineConfig;
pub use crate::engine::*;
