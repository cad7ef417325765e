mod private
{
  //! Shared application state handed to every axum handler.

  use crate::cache::WriteBehindCache;
  use crate::config::ConfigStore;
  use crate::dispatcher::Dispatcher;
  use crate::health_gate::HealthGate;
  use crate::rate_limit::RateLimiter;
  use crate::store::Store;
  use std::sync::Arc;

  /// Everything a request handler needs, cloned cheaply per-request
  /// (every field is an `Arc` or an internally-`Arc`'d handle).
  #[ derive( Debug, Clone ) ]
  pub struct AppState
  {
    pub store : Store,
    pub cache : WriteBehindCache,
    pub config : Arc< ConfigStore >,
    pub limiter : Arc< RateLimiter >,
    pub dispatcher : Arc< Dispatcher >,
    pub health : Arc< HealthGate >,
    #[ cfg( feature = "performance_metrics" ) ]
    pub metrics : Arc< crate::metrics::PoolMetrics >,
  }
}

crate::mod_interface!
{
  exposed use
  {
    AppState,
  };
}
