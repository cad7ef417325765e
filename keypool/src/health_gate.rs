mod private
{
  use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };
  use std::time::Duration;
  use tracing::warn;

  const POLL_INTERVAL : Duration = Duration::from_secs( 5 );
  const FAILURE_THRESHOLD : u32 = 3;

  /// Self-shedding admission gate (§4.6 "Downstream health self-check").
  ///
  /// A background task polls the proxy's own `/health` endpoint; once
  /// [`FAILURE_THRESHOLD`] consecutive polls fail, [`HealthGate::is_healthy`]
  /// starts returning `false` and the dispatcher briefly sleeps before
  /// admitting new work, rather than rejecting it outright.
  #[ derive( Debug, Default ) ]
  pub struct HealthGate
  {
    healthy : AtomicBool,
    consecutive_failures : AtomicU32,
  }

  impl HealthGate
  {
    /// Creates a gate that starts out healthy.
    #[ must_use ]
    pub fn new() -> Self
    {
      Self { healthy : AtomicBool::new( true ), consecutive_failures : AtomicU32::new( 0 ) }
    }

    /// Whether the gate currently considers the process healthy.
    #[ must_use ]
    pub fn is_healthy( &self ) -> bool
    {
      self.healthy.load( Ordering::Relaxed )
    }

    /// Records the outcome of one health probe.
    pub fn record( &self, probe_ok : bool )
    {
      if probe_ok
      {
        self.consecutive_failures.store( 0, Ordering::Relaxed );
        self.healthy.store( true, Ordering::Relaxed );
      }
      else
      {
        let failures = self.consecutive_failures.fetch_add( 1, Ordering::Relaxed ) + 1;
        if failures >= FAILURE_THRESHOLD
        {
          self.healthy.store( false, Ordering::Relaxed );
        }
      }
    }

    /// Spawns the self-poll loop against `http://127.0.0.1:{port}/health`,
    /// running until `stop` is notified.
    #[ must_use ]
    pub fn spawn_self_poll( self : std::sync::Arc< Self >, client : reqwest::Client, port : u16, stop : std::sync::Arc< tokio::sync::Notify > ) -> tokio::task::JoinHandle< () >
    {
      let url = format!( "http://127.0.0.1:{port}/health" );
      tokio::spawn( async move
      {
        loop
        {
          tokio::select!
          {
            () = tokio::time::sleep( POLL_INTERVAL ) =>
            {
              let ok = client.get( &url ).timeout( Duration::from_secs( 2 ) ).send().await.is_ok_and( | r | r.status().is_success() );
              if !ok
              {
                warn!( "self health-check probe failed" );
              }
              self.record( ok );
            }
            () = stop.notified() => break,
          }
        }
      } )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn starts_healthy()
    {
      assert!( HealthGate::new().is_healthy() );
    }

    #[ test ]
    fn becomes_unhealthy_after_threshold_consecutive_failures()
    {
      let gate = HealthGate::new();
      gate.record( false );
      assert!( gate.is_healthy() );
      gate.record( false );
      assert!( gate.is_healthy() );
      gate.record( false );
      assert!( !gate.is_healthy() );
    }

    #[ test ]
    fn a_single_success_resets_the_failure_streak()
    {
      let gate = HealthGate::new();
      gate.record( false );
      gate.record( false );
      gate.record( true );
      gate.record( false );
      gate.record( false );
      assert!( gate.is_healthy(), "streak was reset by the intervening success" );
    }

    #[ test ]
    fn recovers_once_a_success_is_recorded()
    {
      let gate = HealthGate::new();
      gate.record( false );
      gate.record( false );
      gate.record( false );
      assert!( !gate.is_healthy() );
      gate.record( true );
      assert!( gate.is_healthy() );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    HealthGate,
  };
}
