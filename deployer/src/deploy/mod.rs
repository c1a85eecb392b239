//! Deployment pipeline

pub mod build_plan;
pub mod container;
pub mod detect;
pub mod docker;
pub mod fsm;
pub mod git;
pub mod lifecycle;
pub mod source;
