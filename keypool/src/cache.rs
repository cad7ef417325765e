mod private
{
  use crate::error::{ PoolError, Result };
  use crate::model::{ Credential, CallRecord };
  use crate::store::Store;
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::sync::Mutex;
  use tracing::{ info, warn };

  /// A typed value for a write-behind `UPDATE` assignment.
  ///
  /// Stands in for Python's untyped `dict` of column → value in the
  /// original cache's `queue_update`.
  #[ derive( Debug, Clone, PartialEq ) ]
  pub enum SqlValue
  {
    Real( f64 ),
    Integer( i64 ),
    Bool( bool ),
    Text( String ),
  }

  #[ derive( Debug, Default ) ]
  struct PendingInserts
  {
    credentials : Vec< Credential >,
    logs : Vec< CallRecord >,
  }

  impl PendingInserts
  {
    fn len( &self ) -> usize
    {
      self.credentials.len() + self.logs.len()
    }
  }

  #[ derive( Debug, Clone ) ]
  struct PendingUpdate
  {
    key : String,
    set : Vec< ( String, SqlValue ) >,
  }

  /// Lifetime (since process start) counters, independent of pending counts.
  #[ derive( Debug, Clone, Copy, Default ) ]
  pub struct CacheStats
  {
    pub pending_inserts : usize,
    pub pending_updates : usize,
    pub pending_deletes : usize,
    pub lifetime_inserts : u64,
    pub lifetime_updates : u64,
    pub lifetime_deletes : u64,
    pub flush_count : u64,
    pub consecutive_failures : u64,
    pub last_flush_time : Option< f64 >,
  }

  #[ derive( Debug, Default ) ]
  struct CacheState
  {
    inserts : PendingInserts,
    updates : Vec< PendingUpdate >,
    deletes : Vec< String >,
    stats : CacheStats,
  }

  /// Batched, asynchronous persistence of credential/log mutations (C2).
  ///
  /// Buffers `queue_insert`/`queue_update`/`queue_delete` calls in memory
  /// and flushes them to [`Store`] either when the pending-operation count
  /// reaches `max_batch`, when `flush_interval` elapses, on an explicit
  /// [`WriteBehindCache::flush`], or on [`WriteBehindCache::shutdown`].
  ///
  /// A flush either moves every buffered operation through to the store or
  /// preserves every buffered operation for a later attempt — there is no
  /// partial-apply outcome.
  #[ derive( Debug, Clone ) ]
  pub struct WriteBehindCache
  {
    store : Store,
    state : Arc< Mutex< CacheState > >,
    max_batch : usize,
    stop : Arc< tokio::sync::Notify >,
  }

  impl WriteBehindCache
  {
    /// Creates a new cache over `store` and spawns its background flush
    /// timer, which wakes every `flush_interval` or on an explicit stop
    /// signal, whichever comes first.
    #[ must_use ]
    pub fn new( store : Store, flush_interval : Duration, max_batch : usize ) -> Self
    {
      let cache = Self
      {
        store,
        state : Arc::new( Mutex::new( CacheState::default() ) ),
        max_batch,
        stop : Arc::new( tokio::sync::Notify::new() ),
      };

      cache.spawn_timer( flush_interval );
      cache
    }

    fn spawn_timer( &self, flush_interval : Duration )
    {
      let cache = self.clone();
      tokio::spawn( async move
      {
        loop
        {
          tokio::select!
          {
            () = tokio::time::sleep( flush_interval ) =>
            {
              if let Err( error ) = cache.flush().await
              {
                warn!( %error, "periodic flush failed, buffers preserved" );
              }
            }
            () = cache.stop.notified() => break,
          }
        }
      } );
    }

    /// Buffers a new credential row for insertion.
    pub async fn queue_insert_credential( &self, credential : Credential )
    {
      let reached_threshold =
      {
        let mut state = self.state.lock().await;
        state.inserts.credentials.push( credential );
        self.pending_len( &state ) >= self.max_batch
      };
      self.maybe_flush_at_threshold( reached_threshold ).await;
    }

    /// Buffers a new call-log row for insertion.
    pub async fn queue_insert_log( &self, record : CallRecord )
    {
      let reached_threshold =
      {
        let mut state = self.state.lock().await;
        state.inserts.logs.push( record );
        self.pending_len( &state ) >= self.max_batch
      };
      self.maybe_flush_at_threshold( reached_threshold ).await;
    }

    /// Buffers an update to one credential, keyed by its primary key.
    /// Later calls for the same key accumulate; they are not merged —
    /// each is replayed individually at flush time, in submission order.
    pub async fn queue_update_credential( &self, key : impl Into< String >, set : Vec< ( String, SqlValue ) > )
    {
      let reached_threshold =
      {
        let mut state = self.state.lock().await;
        state.updates.push( PendingUpdate { key : key.into(), set } );
        self.pending_len( &state ) >= self.max_batch
      };
      self.maybe_flush_at_threshold( reached_threshold ).await;
    }

    /// Buffers a deletion of one credential.
    pub async fn queue_delete_credential( &self, key : impl Into< String > )
    {
      let reached_threshold =
      {
        let mut state = self.state.lock().await;
        state.deletes.push( key.into() );
        self.pending_len( &state ) >= self.max_batch
      };
      self.maybe_flush_at_threshold( reached_threshold ).await;
    }

    fn pending_len( &self, state : &CacheState ) -> usize
    {
      state.inserts.len() + state.updates.len() + state.deletes.len()
    }

    async fn maybe_flush_at_threshold( &self, reached_threshold : bool )
    {
      if !reached_threshold
      {
        return;
      }
      if let Err( error ) = self.flush().await
      {
        warn!( %error, "threshold-triggered flush failed, buffers preserved" );
      }
    }

    /// Returns a snapshot of cache statistics.
    pub async fn stats( &self ) -> CacheStats
    {
      self.state.lock().await.stats
    }

    /// Flushes every buffered operation to the store inside one logical
    /// transaction: inserts first (`INSERT OR IGNORE`, so a duplicate
    /// primary key silently no-ops), then updates, then deletes. On
    /// success all buffers are cleared; on failure every buffer is left
    /// exactly as it was and the failure counter is incremented.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PersistenceFailure`] if any step fails; in
    /// that case no buffer was cleared.
    pub async fn flush( &self ) -> Result< () >
    {
      let mut state = self.state.lock().await;

      if state.inserts.len() + state.updates.len() + state.deletes.len() == 0
      {
        return Ok( () );
      }

      let result = self.apply( &state ).await;

      match result
      {
        Ok( ( inserted, updated, deleted ) ) =>
        {
          state.inserts = PendingInserts::default();
          state.updates.clear();
          state.deletes.clear();
          state.stats.pending_inserts = 0;
          state.stats.pending_updates = 0;
          state.stats.pending_deletes = 0;
          state.stats.lifetime_inserts += inserted;
          state.stats.lifetime_updates += updated;
          state.stats.lifetime_deletes += deleted;
          state.stats.flush_count += 1;
          state.stats.consecutive_failures = 0;
          state.stats.last_flush_time = Some( now_secs() );
          Ok( () )
        }
        Err( error ) =>
        {
          state.stats.consecutive_failures += 1;
          state.stats.pending_inserts = state.inserts.len();
          state.stats.pending_updates = state.updates.len();
          state.stats.pending_deletes = state.deletes.len();
          if state.stats.consecutive_failures >= 10
          {
            warn!( consecutive_failures = state.stats.consecutive_failures, "write-behind cache has failed to flush 10+ times in a row" );
          }
          Err( PoolError::PersistenceFailure( error.to_string() ).into() )
        }
      }
    }

    /// Applies every buffered operation inside one SQL transaction: a
    /// failure partway through rolls back everything staged so far (via
    /// `tx`'s drop, uncommitted) rather than leaving a partially-applied
    /// batch durable while the in-memory buffer is preserved for retry.
    async fn apply( &self, state : &CacheState ) -> Result< ( u64, u64, u64 ) >
    {
      let mut tx = self.store.begin_flush().await?;

      for credential in &state.inserts.credentials
      {
        Store::insert_credential_txn( &mut tx, credential ).await?;
      }
      for record in &state.inserts.logs
      {
        Store::insert_log_txn( &mut tx, record ).await?;
      }
      for update in &state.updates
      {
        let set : Vec< ( &str, SqlValue ) > = update.set.iter().map( | ( f, v ) | ( f.as_str(), v.clone() ) ).collect();
        Store::update_credential_txn( &mut tx, &update.key, &set ).await?;
      }
      for key in &state.deletes
      {
        Store::delete_credential_txn( &mut tx, key ).await?;
      }

      tx.commit().await?;

      Ok( (
        state.inserts.len() as u64,
        state.updates.len() as u64,
        state.deletes.len() as u64,
      ) )
    }

    /// Signals the background timer to stop, then performs one final
    /// flush. Errors from the final flush are logged, not propagated —
    /// shutdown always completes.
    pub async fn shutdown( &self )
    {
      self.stop.notify_waiters();
      if let Err( error ) = self.flush().await
      {
        warn!( %error, "final flush on shutdown failed, pending operations were not persisted" );
      }
      else
      {
        info!( "write-behind cache flushed cleanly on shutdown" );
      }
    }
  }

  fn now_secs() -> f64
  {
    std::time::SystemTime::now()
      .duration_since( std::time::UNIX_EPOCH )
      .map( | d | d.as_secs_f64() )
      .unwrap_or( 0.0 )
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use std::sync::atomic::{ AtomicU64, Ordering };

    static COUNTER : AtomicU64 = AtomicU64::new( 0 );

    async fn scratch_store() -> Store
    {
      let id = COUNTER.fetch_add( 1, Ordering::Relaxed );
      let path = std::env::temp_dir().join( format!( "keypool-cache-test-{}-{id}.sqlite3", std::process::id() ) );
      Store::open( path.to_str().expect( "utf8 path" ) ).await.expect( "open store" )
    }

    fn credential( key : &str ) -> Credential
    {
      Credential { key : key.to_string(), add_time : 1.0, balance : 1.0, usage_count : 0, enabled : true, is_invalid : false }
    }

    #[ tokio::test ]
    async fn queued_insert_is_invisible_until_flushed()
    {
      let store = scratch_store().await;
      let cache = WriteBehindCache::new( store.clone(), Duration::from_secs( 3600 ), 100 );

      cache.queue_insert_credential( credential( "sk-a" ) ).await;
      assert!( store.credential( "sk-a" ).await.expect( "query" ).is_none() );

      cache.flush().await.expect( "flush" );
      assert!( store.credential( "sk-a" ).await.expect( "query" ).is_some() );

      cache.shutdown().await;
    }

    #[ tokio::test ]
    async fn threshold_triggers_an_automatic_flush()
    {
      let store = scratch_store().await;
      let cache = WriteBehindCache::new( store.clone(), Duration::from_secs( 3600 ), 2 );

      cache.queue_insert_credential( credential( "sk-a" ) ).await;
      assert!( store.credential( "sk-a" ).await.expect( "query" ).is_none(), "below threshold, still buffered" );

      cache.queue_insert_credential( credential( "sk-b" ) ).await;
      assert!( store.credential( "sk-a" ).await.expect( "query" ).is_some(), "threshold reached, auto-flushed" );
      assert!( store.credential( "sk-b" ).await.expect( "query" ).is_some() );

      cache.shutdown().await;
    }

    #[ tokio::test ]
    async fn flush_clears_buffers_and_updates_lifetime_stats()
    {
      let store = scratch_store().await;
      let cache = WriteBehindCache::new( store.clone(), Duration::from_secs( 3600 ), 100 );

      cache.queue_insert_credential( credential( "sk-a" ) ).await;
      cache.queue_update_credential( "sk-a", vec![ ( "balance".to_string(), SqlValue::Real( 9.0 ) ) ] ).await;
      cache.flush().await.expect( "flush" );

      let stats = cache.stats().await;
      assert_eq!( stats.pending_inserts, 0 );
      assert_eq!( stats.pending_updates, 0 );
      assert_eq!( stats.lifetime_inserts, 1 );
      assert_eq!( stats.lifetime_updates, 1 );
      assert_eq!( stats.flush_count, 1 );
      assert_eq!( stats.consecutive_failures, 0 );

      let found = store.credential( "sk-a" ).await.expect( "query" ).expect( "present" );
      assert_eq!( found.balance, 9.0 );

      cache.shutdown().await;
    }

    #[ tokio::test ]
    async fn shutdown_flushes_pending_operations()
    {
      let store = scratch_store().await;
      let cache = WriteBehindCache::new( store.clone(), Duration::from_secs( 3600 ), 100 );

      cache.queue_insert_credential( credential( "sk-a" ) ).await;
      cache.shutdown().await;

      assert!( store.credential( "sk-a" ).await.expect( "query" ).is_some() );
    }

    #[ tokio::test ]
    async fn empty_flush_is_a_no_op()
    {
      let store = scratch_store().await;
      let cache = WriteBehindCache::new( store, Duration::from_secs( 3600 ), 100 );

      cache.flush().await.expect( "flush" );
      assert_eq!( cache.stats().await.flush_count, 0 );

      cache.shutdown().await;
    }

    #[ tokio::test ]
    async fn failed_flush_rolls_back_earlier_ops_in_the_same_batch()
    {
      let store = scratch_store().await;
      let cache = WriteBehindCache::new( store.clone(), Duration::from_secs( 3600 ), 100 );

      cache.queue_insert_credential( credential( "sk-a" ) ).await;
      cache.queue_update_credential( "sk-a", vec![ ( "no_such_column".to_string(), SqlValue::Integer( 1 ) ) ] ).await;

      assert!( cache.flush().await.is_err(), "the bad update column should fail the whole transaction" );
      assert!(
        store.credential( "sk-a" ).await.expect( "query" ).is_none(),
        "the insert staged earlier in the same failed batch must not have been committed"
      );

      let stats = cache.stats().await;
      assert_eq!( stats.pending_inserts, 1, "buffer preserved for retry on failure" );
      assert_eq!( stats.consecutive_failures, 1 );
    }

    #[ tokio::test ]
    async fn deletes_and_inserts_are_applied_in_flush_order()
    {
      let store = scratch_store().await;
      store.insert_credential_now( &credential( "sk-old" ) ).await.expect( "seed" );

      let cache = WriteBehindCache::new( store.clone(), Duration::from_secs( 3600 ), 100 );
      cache.queue_delete_credential( "sk-old" ).await;
      cache.queue_insert_credential( credential( "sk-new" ) ).await;
      cache.flush().await.expect( "flush" );

      assert!( store.credential( "sk-old" ).await.expect( "query" ).is_none() );
      assert!( store.credential( "sk-new" ).await.expect( "query" ).is_some() );

      cache.shutdown().await;
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    SqlValue,
    CacheStats,
    WriteBehindCache,
  };
}
