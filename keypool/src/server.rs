mod private
{
  //! Wires every component together into one runnable service: builds
  //! [`AppState`], merges the data-plane and admin routers under one
  //! permissive CORS layer (§6 requires a 200 response with permissive
  //! CORS on `OPTIONS` for every downstream endpoint; the admin surface
  //! gets the same treatment for its own `OPTIONS` routes), and spawns
  //! the long-lived background tasks — the write-behind flush timer (owned
  //! internally by [`WriteBehindCache::new`]), the refresh scheduler (C7),
  //! the connection-pool janitor, and the downstream self-health poll.
  //!
  //! Grounded on the bootstrap shape of `nfagerlund-eardogger-rs`'s
  //! `main.rs` (build state → spawn workers outside the request path →
  //! serve with graceful shutdown → join workers on the way out), adapted
  //! to this crate's `mod_interface` layering.

  use crate::admin::admin_router;
  use crate::cache::WriteBehindCache;
  use crate::config::ConfigStore;
  use crate::dispatcher::Dispatcher;
  use crate::error::Result;
  use crate::health_gate::HealthGate;
  use crate::rate_limit::RateLimiter;
  use crate::refresh::RefreshScheduler;
  use crate::routes::data_plane_router;
  use crate::state::AppState;
  use crate::store::Store;
  use axum::Router;
  use std::sync::Arc;
  use std::time::Duration;
  use tower_http::cors::CorsLayer;
  use tracing::info;

  /// Default number of concurrent in-flight upstream calls the dispatcher
  /// admits before new work queues. Per §4.6, "target ceiling in the
  /// thousands"; kept modest here so a default run doesn't silently open
  /// thousands of sockets against upstream.
  pub const DEFAULT_CAPACITY : usize = 512;

  /// How often the connection-pool janitor rotates the dispatcher's shared
  /// HTTP client, bounding idle-connection growth (SPEC_FULL's
  /// "Connection-pool janitor" supplemented feature).
  const JANITOR_INTERVAL : Duration = Duration::from_secs( 10 * 60 );

  /// Everything the process needs to serve traffic: the merged router and
  /// every background task's handle, so `main` can join them cleanly on
  /// shutdown.
  #[ derive( Debug ) ]
  pub struct Service
  {
    /// The fully-assembled router, ready for `axum::serve`.
    pub router : Router,
    /// Shared application state, exposed for callers that want direct
    /// access (e.g. the admin CLI import path, or tests).
    pub state : AppState,
    background : Background,
  }

  /// Handles to every spawned background task plus their stop signals.
  #[ derive( Debug ) ]
  struct Background
  {
    cache : WriteBehindCache,
    refresh_stop : Arc< tokio::sync::Notify >,
    refresh_handle : tokio::task::JoinHandle< () >,
    janitor_stop : Arc< tokio::sync::Notify >,
    janitor_handle : tokio::task::JoinHandle< () >,
    health_stop : Arc< tokio::sync::Notify >,
    health_handle : Option< tokio::task::JoinHandle< () > >,
  }

  impl Service
  {
    /// Builds the full service: opens the durable store, loads config,
    /// constructs every component, and spawns its background tasks. Does
    /// not bind a listener — callers choose how and where to serve
    /// `self.router`.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable store cannot be opened, the config
    /// document cannot be loaded, or the HTTP client cannot be built.
    pub async fn build( db_path : &str, config_path : std::path::PathBuf, capacity : usize, self_poll_port : Option< u16 > ) -> Result< Self >
    {
      let store = Store::open( db_path ).await?;
      let cache = WriteBehindCache::new( store.clone(), Duration::from_secs( 30 ), 100 );
      let config = Arc::new( ConfigStore::load( config_path )? );
      let limiter = Arc::new( RateLimiter::new() );
      let health = Arc::new( HealthGate::new() );

      let dispatcher = Arc::new( Dispatcher::new(
        store.clone(),
        cache.clone(),
        Arc::clone( &limiter ),
        Arc::clone( &config ),
        Arc::clone( &health ),
        capacity,
      )? );

      #[ cfg( feature = "performance_metrics" ) ]
      let metrics = Arc::new( crate::metrics::PoolMetrics::new() );

      let state = AppState
      {
        store : store.clone(),
        cache : cache.clone(),
        config : Arc::clone( &config ),
        limiter,
        dispatcher : Arc::clone( &dispatcher ),
        health : Arc::clone( &health ),
        #[ cfg( feature = "performance_metrics" ) ]
        metrics,
      };

      let refresh_scheduler = Arc::new( RefreshScheduler::new( store, cache.clone(), config ) );
      let refresh_stop = refresh_scheduler.stop_handle();
      let refresh_handle = refresh_scheduler.spawn();

      let janitor_stop = Arc::new( tokio::sync::Notify::new() );
      let janitor_handle = spawn_janitor( Arc::clone( &dispatcher ), Arc::clone( &janitor_stop ) );

      let health_stop = Arc::new( tokio::sync::Notify::new() );
      let health_handle = self_poll_port.map( | port |
      {
        health.clone().spawn_self_poll( reqwest::Client::new(), port, Arc::clone( &health_stop ) )
      } );

      // Every downstream and admin route answers its own `OPTIONS` with a
      // permissive CORS response (§6's "OPTIONS on each of the above — 200
      // with permissive CORS"); applying the layer to the merged router
      // covers the data plane as well as the admin surface in one place.
      let router = data_plane_router()
        .merge( admin_router() )
        .layer( CorsLayer::permissive() )
        .with_state( state.clone() );

      Ok( Self
      {
        router,
        state,
        background : Background { cache : cache.clone(), refresh_stop, refresh_handle, janitor_stop, janitor_handle, health_stop, health_handle },
      } )
    }

    /// Stops every background task and performs a final write-behind
    /// flush. Idempotent-ish: safe to call once at the end of `main`.
    pub async fn shutdown( self )
    {
      self.background.refresh_stop.notify_waiters();
      self.background.janitor_stop.notify_waiters();
      self.background.health_stop.notify_waiters();

      let _ = self.background.refresh_handle.await;
      let _ = self.background.janitor_handle.await;
      if let Some( handle ) = self.background.health_handle
      {
        let _ = handle.await;
      }

      self.background.cache.shutdown().await;
      info!( "service shutdown complete" );
    }
  }

  fn spawn_janitor( dispatcher : Arc< Dispatcher >, stop : Arc< tokio::sync::Notify > ) -> tokio::task::JoinHandle< () >
  {
    tokio::spawn( async move
    {
      loop
      {
        tokio::select!
        {
          () = tokio::time::sleep( JANITOR_INTERVAL ) =>
          {
            if let Err( error ) = dispatcher.rotate_client()
            {
              tracing::warn!( %error, "connection pool janitor failed to rotate http client" );
            }
          }
          () = stop.notified() => break,
        }
      }
    } )
  }
}

crate::mod_interface!
{
  exposed use
  {
    Service,
    DEFAULT_CAPACITY,
  };
}
