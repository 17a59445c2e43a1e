//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The relay WebSocket endpoint
//! - Health and metrics routes

pub mod api;
