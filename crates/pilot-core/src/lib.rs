//! Drives a voxel game with two models: a reasoning model picks one action per cycle and a
//! vision model grounds on-screen targets. Input goes out through a local control service.

pub mod agent;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod llm;
pub mod vision;
