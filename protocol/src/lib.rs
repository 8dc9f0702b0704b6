//! Wire types shared by the forge3d client and its test doubles.
//!
//! - `api`: request and response bodies for discovery and job endpoints
//! - `common`: values that appear inside several bodies

pub mod api;
pub mod common;

/// Header required by the tunnelled deployment on every backend call.
pub const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

/// Relative path of the discovery endpoint on the web host.
pub const DISCOVERY_PATH: &str = "/api/get-backend-url";
