//! `keypool-proxy` binary entry point.
//!
//! Loads configuration, opens the durable store, wires every component
//! together via [`keypool::server::Service`], serves the merged router,
//! and drains in-flight work and the write-behind cache on shutdown.

use keypool::{ ConfigStore, Service, DEFAULT_CAPACITY };
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{ error, info };
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

#[ tokio::main ]
async fn main() -> error_tools::untyped::Result< () >
{
  tracing_subscriber::registry()
    .with( EnvFilter::try_from_default_env().unwrap_or_else( | _ | "keypool=info,tower_http=info".into() ) )
    .with( tracing_subscriber::fmt::layer() )
    .init();

  let port : u16 = std::env::var( "KEYPOOL_PORT" )
    .ok()
    .and_then( | v | v.parse().ok() )
    .unwrap_or( 8080 );

  let db_path = std::env::var( "KEYPOOL_DB_PATH" ).unwrap_or_else( | _ | "keypool.sqlite3".to_string() );

  let config_path = std::env::var( "KEYPOOL_CONFIG_PATH" )
    .map( PathBuf::from )
    .unwrap_or_else( | _ | ConfigStore::default_path() );

  let capacity : usize = std::env::var( "KEYPOOL_CAPACITY" )
    .ok()
    .and_then( | v | v.parse().ok() )
    .unwrap_or( DEFAULT_CAPACITY );

  info!( port, db_path, config_path = %config_path.display(), capacity, "starting keypool-proxy" );

  let service = Service::build( &db_path, config_path, capacity, Some( port ) ).await?;

  let listener = TcpListener::bind( ( "0.0.0.0", port ) ).await?;
  info!( "listening on 0.0.0.0:{port}" );

  let serve_result = axum::serve( listener, service.router.clone() )
    .with_graceful_shutdown( shutdown_signal() )
    .await;

  if let Err( error ) = serve_result
  {
    error!( %error, "server loop exited with an error" );
  }

  info!( "draining background tasks and flushing write-behind cache" );
  service.shutdown().await;
  info!( "see ya" );

  Ok( () )
}

/// Waits for either Ctrl-C or SIGTERM, whichever comes first.
async fn shutdown_signal()
{
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };

  #[ cfg( unix ) ]
  let terminate = async {
    let Ok( mut signal ) = tokio::signal::unix::signal( tokio::signal::unix::SignalKind::terminate() )
    else
    {
      return;
    };
    signal.recv().await;
  };

  #[ cfg( not( unix ) ) ]
  let terminate = std::future::pending::< () >();

  tokio::select!
  {
    () = ctrl_c => { info!( "received ctrl-c, starting shutdown" ) },
    () = terminate => { info!( "received sigterm, starting shutdown" ) },
  }
}
