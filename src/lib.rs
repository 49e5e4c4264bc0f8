// ABOUTME: Library root for kahua - node acquisition control plane.
// ABOUTME: The main binary is in main.rs.

pub mod adapter;
pub mod batch;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod hosts;
pub mod lifecycle;
pub mod output;
pub mod source;
pub mod ssh;
pub mod state;
pub mod types;
