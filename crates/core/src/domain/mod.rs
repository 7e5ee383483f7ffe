pub mod action;
pub mod workflow;
