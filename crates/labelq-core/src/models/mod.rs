//! Data models for tasks, extracted fields, and configuration.

pub mod config;
pub mod task;
