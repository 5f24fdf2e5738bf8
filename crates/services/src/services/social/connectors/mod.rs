//! Platform-specific connectors
//!
//! Each connector implements the PlatformConnector trait for a specific platform.

pub mod instagram;
pub mod tiktok;
pub mod wordpress;
pub mod youtube;
