//! Data model

pub mod deployment;
pub mod environment;
pub mod framework;
pub mod project;
