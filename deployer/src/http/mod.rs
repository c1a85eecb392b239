//! Source control HTTP API

pub mod client;
pub mod commits;

pub use client::HttpClient;
