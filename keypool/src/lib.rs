#![ allow( clippy::missing_errors_doc ) ]
#![ allow( clippy::missing_panics_doc ) ]
#![ allow( clippy::must_use_candidate ) ]
#![ allow( clippy::module_name_repetitions ) ]

//! Authenticating, key-multiplexing reverse proxy in front of a
//! `SiliconFlow`-compatible LLM inference endpoint.
//!
//! The proxy holds a pool of upstream API credentials (C1 durable store,
//! C2 write-behind cache), picks one per inbound request according to a
//! configurable strategy (C4 selector) within a rate budget (C3 rate
//! limiter), dispatches with retry and streaming passthrough (C6
//! dispatcher), and periodically revalidates the pool against upstream
//! (C5 validator, C7 refresh scheduler). Runtime behavior is controlled by
//! a hot-reloadable config snapshot (C8).
//!
//! ## Governing principle
//!
//! The proxy is a transparent multiplexer, not a second API surface:
//! every downstream request body and response body is forwarded
//! byte-for-byte. The only things the proxy adds are which upstream
//! credential answered, how many times it has been used, and whether it
//! is still good.

#[ cfg( feature = "enabled" ) ]
use mod_interface::mod_interface;

mod private {}

#[ cfg( feature = "enabled" ) ]
crate::mod_interface!
{
  layer auth;
  layer cache;
  layer config;
  layer dispatcher;
  layer error;
  layer health_gate;
  layer model;
  layer rate_limit;
  layer refresh;
  layer secret;
  layer selector;
  layer state;
  layer store;
  layer validator;
  #[ cfg( feature = "performance_metrics" ) ]
  layer metrics;
  layer routes;
  layer admin;
  layer server;
}

/// Error-related exports.
#[ cfg( feature = "enabled" ) ]
pub mod error_tools
{
  pub use ::error_tools::*;
  pub use ::error_tools::dependency::thiserror;
}
