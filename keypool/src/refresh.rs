mod private
{
  //! Periodic validator sweep over the credential pool (C7).

  use crate::cache::{ SqlValue, WriteBehindCache };
  use crate::config::ConfigStore;
  use crate::store::Store;
  use crate::validator;
  use std::sync::Arc;
  use std::time::Duration;
  use tracing::{ info, warn };

  const TICK_DEADLINE : Duration = Duration::from_secs( 5 * 60 );
  const TICK_RETRY_ATTEMPTS : u32 = 3;
  const TICK_RETRY_DELAY : Duration = Duration::from_secs( 10 );
  const SLEEP_SEGMENT : Duration = Duration::from_secs( 5 );

  /// Upstream base used by the validator probe. Fixed per §6.
  const UPSTREAM_BASE : &str = "https://api.siliconflow.cn";

  /// Periodic task that revalidates every credential on a configurable
  /// minute interval (§4.7). `interval_minutes == 0` disables the sweep
  /// entirely; reading it from the live [`ConfigStore`] on every tick (not
  /// once at startup) is what makes a live update to the refresh interval
  /// take effect without restarting the process, per §4.8.
  #[ derive( Debug ) ]
  pub struct RefreshScheduler
  {
    store : Store,
    cache : WriteBehindCache,
    config : Arc< ConfigStore >,
    client : reqwest::Client,
    stop : Arc< tokio::sync::Notify >,
  }

  impl RefreshScheduler
  {
    /// Builds a scheduler; call [`RefreshScheduler::spawn`] to start it running.
    #[ must_use ]
    pub fn new( store : Store, cache : WriteBehindCache, config : Arc< ConfigStore > ) -> Self
    {
      Self
      {
        store,
        cache,
        config,
        client : reqwest::Client::new(),
        stop : Arc::new( tokio::sync::Notify::new() ),
      }
    }

    /// A handle that, when notified, tells the scheduler's loop to stop at
    /// the next opportunity (checked every [`SLEEP_SEGMENT`] of its
    /// inter-tick sleep, so shutdown is prompt even on a long interval).
    #[ must_use ]
    pub fn stop_handle( &self ) -> Arc< tokio::sync::Notify >
    {
      Arc::clone( &self.stop )
    }

    /// Spawns the scheduler's loop as a background task.
    pub fn spawn( self : Arc< Self > ) -> tokio::task::JoinHandle< () >
    {
      tokio::spawn( async move { self.run().await } )
    }

    async fn run( &self )
    {
      loop
      {
        let interval_minutes = self.config.snapshot().refresh_interval;

        if interval_minutes > 0 && self.sleep_segmented( Duration::from_secs( interval_minutes * 60 ) ).await
        {
          return;
        }
        else if interval_minutes == 0 && self.sleep_segmented( SLEEP_SEGMENT ).await
        {
          return;
        }

        if interval_minutes == 0
        {
          continue;
        }

        self.run_tick_with_retry().await;
      }
    }

    /// Sleeps for `total`, checked in [`SLEEP_SEGMENT`] increments so a
    /// stop signal is observed promptly. Returns `true` if stop fired.
    async fn sleep_segmented( &self, total : Duration ) -> bool
    {
      let mut remaining = total;
      loop
      {
        let segment = remaining.min( SLEEP_SEGMENT );
        tokio::select!
        {
          () = tokio::time::sleep( segment ) => {}
          () = self.stop.notified() => return true,
        }

        remaining = remaining.saturating_sub( segment );
        if remaining.is_zero()
        {
          return false;
        }
      }
    }

    async fn run_tick_with_retry( &self )
    {
      for attempt in 1..=TICK_RETRY_ATTEMPTS
      {
        match tokio::time::timeout( TICK_DEADLINE, self.run_tick() ).await
        {
          Ok( () ) => return,
          Err( _timed_out ) =>
          {
            warn!( attempt, "refresh tick exceeded its deadline" );
            if attempt < TICK_RETRY_ATTEMPTS
            {
              tokio::time::sleep( TICK_RETRY_DELAY ).await;
            }
          }
        }
      }
      warn!( "refresh tick failed {TICK_RETRY_ATTEMPTS} times in a row, waiting for the next interval" );
    }

    /// Runs one sweep: probe every credential in parallel, apply the
    /// §4.5 state-effect rule to each, and queue the resulting mutation.
    /// A failure probing one credential never aborts the tick for the rest.
    async fn run_tick( &self )
    {
      let credentials = match self.store.all_credentials().await
      {
        Ok( credentials ) => credentials,
        Err( error ) =>
        {
          warn!( %error, "refresh tick could not list credentials" );
          return;
        }
      };

      let probes = credentials.into_iter().map( | credential |
      {
        let client = self.client.clone();
        async move
        {
          let outcome = validator::validate( &client, UPSTREAM_BASE, &credential.key ).await;
          ( credential, outcome )
        }
      } );

      let results = futures_util::future::join_all( probes ).await;

      for ( credential, outcome ) in results
      {
        let Some( ( balance, enabled, is_invalid ) ) = outcome.apply_to( credential.balance )
        else { continue };

        self.cache.queue_update_credential(
          credential.key.clone(),
          vec!
          [
            ( "balance".to_string(), SqlValue::Real( balance ) ),
            ( "enabled".to_string(), SqlValue::Bool( enabled ) ),
            ( "is_invalid".to_string(), SqlValue::Bool( is_invalid ) ),
          ],
        ).await;

        info!(
          fingerprint = %fingerprint( &credential.key ),
          enabled, is_invalid,
          "refresh sweep updated credential state",
        );
      }
    }
  }

  fn fingerprint( key : &str ) -> String
  {
    let take = key.char_indices().nth( 8 ).map_or( key.len(), | ( i, _ ) | i );
    format!( "{}***", &key[ ..take ] )
  }
}

crate::mod_interface!
{
  exposed use
  {
    RefreshScheduler,
  };
}
