// Gatehouse - race coordination server for the robotics track

pub mod config;
pub mod core;
pub mod transport;
