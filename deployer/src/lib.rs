//! ezdeploy
//!
//! Deployment orchestration: detect a project's framework, build it into a
//! container image, run it behind the routing proxy, and keep each
//! deployment's record in step with what the container runtime reports.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
