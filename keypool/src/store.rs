mod private
{
  use crate::error::Result;
  use crate::model::{ Credential, CallRecord };
  use sqlx::{ SqlitePool, Row };
  use sqlx::sqlite::SqlitePoolOptions;

  /// Embedded relational store over the credential pool and the call log.
  ///
  /// A single `SqlitePool` with a one-connection ceiling: the spec requires
  /// writer serialization, and SQLite's own file-level locking makes a
  /// larger pool pointless for writes. Read paths (selector, admin
  /// listings) share the same connection; SQLite's read-committed-by-
  /// default journal mode is sufficient since writes always go through
  /// [`crate::cache::WriteBehindCache`].
  #[ derive( Debug, Clone ) ]
  pub struct Store
  {
    pool : SqlitePool,
  }

  impl Store
  {
    /// Opens (creating if absent) the SQLite file at `path` and ensures the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot
    /// be created.
    pub async fn open( path : &str ) -> Result< Self >
    {
      let url = format!( "sqlite://{path}?mode=rwc" );
      let pool = SqlitePoolOptions::new()
        .max_connections( 1 )
        .connect( &url )
        .await?;

      let store = Self { pool };
      store.init_schema().await?;
      Ok( store )
    }

    async fn init_schema( &self ) -> Result< () >
    {
      sqlx::query(
        "CREATE TABLE IF NOT EXISTS api_keys (
          key TEXT PRIMARY KEY,
          add_time REAL NOT NULL,
          balance REAL NOT NULL,
          usage_count INTEGER NOT NULL DEFAULT 0,
          enabled INTEGER NOT NULL DEFAULT 1,
          is_invalid INTEGER NOT NULL DEFAULT 0
        )"
      ).execute( &self.pool ).await?;

      sqlx::query(
        "CREATE TABLE IF NOT EXISTS logs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          used_key TEXT NOT NULL,
          model TEXT NOT NULL,
          api_endpoint TEXT NOT NULL,
          call_time REAL NOT NULL,
          input_tokens INTEGER NOT NULL,
          output_tokens INTEGER NOT NULL,
          total_tokens INTEGER NOT NULL
        )"
      ).execute( &self.pool ).await?;

      Ok( () )
    }

    /// Returns every enabled credential, ordered by `key` for determinism.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn enabled_credentials( &self ) -> Result< Vec< Credential > >
    {
      let rows = sqlx::query( "SELECT key, add_time, balance, usage_count, enabled, is_invalid FROM api_keys WHERE enabled = 1 ORDER BY key" )
        .fetch_all( &self.pool )
        .await?;

      Ok( rows.iter().map( Self::row_to_credential ).collect() )
    }

    /// Returns every credential regardless of state, ordered by `key`.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn all_credentials( &self ) -> Result< Vec< Credential > >
    {
      let rows = sqlx::query( "SELECT key, add_time, balance, usage_count, enabled, is_invalid FROM api_keys ORDER BY key" )
        .fetch_all( &self.pool )
        .await?;

      Ok( rows.iter().map( Self::row_to_credential ).collect() )
    }

    /// Looks up a single credential by key.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn credential( &self, key : &str ) -> Result< Option< Credential > >
    {
      let row = sqlx::query( "SELECT key, add_time, balance, usage_count, enabled, is_invalid FROM api_keys WHERE key = ?" )
        .bind( key )
        .fetch_optional( &self.pool )
        .await?;

      Ok( row.as_ref().map( Self::row_to_credential ) )
    }

    /// Truncates the call log and reclaims space.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn clear_logs( &self ) -> Result< () >
    {
      sqlx::query( "DELETE FROM logs" ).execute( &self.pool ).await?;
      sqlx::query( "VACUUM" ).execute( &self.pool ).await?;
      Ok( () )
    }

    /// Queries the call log, optionally restricted to a model and/or
    /// endpoint tag. Ordered most-recent-first.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn logs( &self, model : Option< &str >, endpoint : Option< &str > ) -> Result< Vec< CallRecord > >
    {
      let rows = sqlx::query(
        "SELECT id, used_key, model, api_endpoint, call_time, input_tokens, output_tokens, total_tokens
         FROM logs
         WHERE (?1 IS NULL OR model = ?1) AND (?2 IS NULL OR api_endpoint = ?2)
         ORDER BY id DESC"
      )
      .bind( model )
      .bind( endpoint )
      .fetch_all( &self.pool )
      .await?;

      Ok( rows.iter().map( | row |
        CallRecord
        {
          id : row.get::< i64, _ >( "id" ).into(),
          used_key : row.get( "used_key" ),
          model : row.get( "model" ),
          api_endpoint : row.get( "api_endpoint" ),
          call_time : row.get( "call_time" ),
          input_tokens : row.get( "input_tokens" ),
          output_tokens : row.get( "output_tokens" ),
          total_tokens : row.get( "total_tokens" ),
        }
      ).collect() )
    }

    /// Direct (non-write-behind) insert, used only by [`crate::cache::WriteBehindCache`]'s
    /// flush transaction.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn insert_credential_now( &self, credential : &Credential ) -> Result< () >
    {
      sqlx::query( "INSERT OR IGNORE INTO api_keys (key, add_time, balance, usage_count, enabled, is_invalid) VALUES (?, ?, ?, ?, ?, ?)" )
        .bind( &credential.key )
        .bind( credential.add_time )
        .bind( credential.balance )
        .bind( credential.usage_count )
        .bind( credential.enabled )
        .bind( credential.is_invalid )
        .execute( &self.pool )
        .await?;
      Ok( () )
    }

    /// Direct insert of a call-log row, used only by the write-behind cache's flush.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn insert_log_now( &self, record : &CallRecord ) -> Result< () >
    {
      sqlx::query( "INSERT INTO logs (used_key, model, api_endpoint, call_time, input_tokens, output_tokens, total_tokens) VALUES (?, ?, ?, ?, ?, ?, ?)" )
        .bind( &record.used_key )
        .bind( &record.model )
        .bind( &record.api_endpoint )
        .bind( record.call_time )
        .bind( record.input_tokens )
        .bind( record.output_tokens )
        .bind( record.total_tokens )
        .execute( &self.pool )
        .await?;
      Ok( () )
    }

    /// Direct update of arbitrary `api_keys` columns for one key, used only
    /// by the write-behind cache's flush.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, or if `set` is empty.
    pub async fn update_credential_now( &self, key : &str, set : &[ ( &str, crate::cache::SqlValue ) ] ) -> Result< () >
    {
      use crate::cache::SqlValue;

      if set.is_empty()
      {
        return Ok( () );
      }

      let assignments : Vec< String > = set.iter().map( | ( field, _ ) | format!( "{field} = ?" ) ).collect();
      let sql = format!( "UPDATE api_keys SET {} WHERE key = ?", assignments.join( ", " ) );

      let mut query = sqlx::query( &sql );
      for ( _, value ) in set
      {
        query = match value
        {
          SqlValue::Real( v ) => query.bind( *v ),
          SqlValue::Integer( v ) => query.bind( *v ),
          SqlValue::Bool( v ) => query.bind( *v ),
          SqlValue::Text( v ) => query.bind( v.clone() ),
        };
      }
      query = query.bind( key );

      query.execute( &self.pool ).await?;
      Ok( () )
    }

    /// Direct delete of one credential, used only by the write-behind cache's flush.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn delete_credential_now( &self, key : &str ) -> Result< () >
    {
      sqlx::query( "DELETE FROM api_keys WHERE key = ?" )
        .bind( key )
        .execute( &self.pool )
        .await?;
      Ok( () )
    }

    /// Opens a transaction against the one-connection pool, for a flush
    /// that must apply every buffered operation atomically (§5, Testable
    /// Property #7): commit once at the end, or drop without committing to
    /// roll back everything applied so far.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction cannot be started.
    pub async fn begin_flush( &self ) -> Result< sqlx::Transaction< '_, sqlx::Sqlite > >
    {
      Ok( self.pool.begin().await? )
    }

    /// Transactional sibling of [`Self::insert_credential_now`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn insert_credential_txn( tx : &mut sqlx::Transaction< '_, sqlx::Sqlite >, credential : &Credential ) -> Result< () >
    {
      sqlx::query( "INSERT OR IGNORE INTO api_keys (key, add_time, balance, usage_count, enabled, is_invalid) VALUES (?, ?, ?, ?, ?, ?)" )
        .bind( &credential.key )
        .bind( credential.add_time )
        .bind( credential.balance )
        .bind( credential.usage_count )
        .bind( credential.enabled )
        .bind( credential.is_invalid )
        .execute( &mut **tx )
        .await?;
      Ok( () )
    }

    /// Transactional sibling of [`Self::insert_log_now`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn insert_log_txn( tx : &mut sqlx::Transaction< '_, sqlx::Sqlite >, record : &CallRecord ) -> Result< () >
    {
      sqlx::query( "INSERT INTO logs (used_key, model, api_endpoint, call_time, input_tokens, output_tokens, total_tokens) VALUES (?, ?, ?, ?, ?, ?, ?)" )
        .bind( &record.used_key )
        .bind( &record.model )
        .bind( &record.api_endpoint )
        .bind( record.call_time )
        .bind( record.input_tokens )
        .bind( record.output_tokens )
        .bind( record.total_tokens )
        .execute( &mut **tx )
        .await?;
      Ok( () )
    }

    /// Transactional sibling of [`Self::update_credential_now`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn update_credential_txn( tx : &mut sqlx::Transaction< '_, sqlx::Sqlite >, key : &str, set : &[ ( &str, crate::cache::SqlValue ) ] ) -> Result< () >
    {
      use crate::cache::SqlValue;

      if set.is_empty()
      {
        return Ok( () );
      }

      let assignments : Vec< String > = set.iter().map( | ( field, _ ) | format!( "{field} = ?" ) ).collect();
      let sql = format!( "UPDATE api_keys SET {} WHERE key = ?", assignments.join( ", " ) );

      let mut query = sqlx::query( &sql );
      for ( _, value ) in set
      {
        query = match value
        {
          SqlValue::Real( v ) => query.bind( *v ),
          SqlValue::Integer( v ) => query.bind( *v ),
          SqlValue::Bool( v ) => query.bind( *v ),
          SqlValue::Text( v ) => query.bind( v.clone() ),
        };
      }
      query = query.bind( key );

      query.execute( &mut **tx ).await?;
      Ok( () )
    }

    /// Transactional sibling of [`Self::delete_credential_now`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn delete_credential_txn( tx : &mut sqlx::Transaction< '_, sqlx::Sqlite >, key : &str ) -> Result< () >
    {
      sqlx::query( "DELETE FROM api_keys WHERE key = ?" )
        .bind( key )
        .execute( &mut **tx )
        .await?;
      Ok( () )
    }

    fn row_to_credential( row : &sqlx::sqlite::SqliteRow ) -> Credential
    {
      Credential
      {
        key : row.get( "key" ),
        add_time : row.get( "add_time" ),
        balance : row.get( "balance" ),
        usage_count : row.get( "usage_count" ),
        enabled : row.get( "enabled" ),
        is_invalid : row.get( "is_invalid" ),
      }
    }
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
      let path = std::env::temp_dir().join( format!( "keypool-store-test-{}-{id}.sqlite3", std::process::id() ) );
      Store::open( path.to_str().expect( "utf8 path" ) ).await.expect( "open store" )
    }

    fn credential( key : &str, balance : f64 ) -> Credential
    {
      Credential { key : key.to_string(), add_time : 1.0, balance, usage_count : 0, enabled : true, is_invalid : false }
    }

    #[ tokio::test ]
    async fn insert_and_lookup_round_trips()
    {
      let store = scratch_store().await;
      store.insert_credential_now( &credential( "sk-a", 5.0 ) ).await.expect( "insert" );

      let found = store.credential( "sk-a" ).await.expect( "query" ).expect( "present" );
      assert_eq!( found.balance, 5.0 );
      assert!( store.credential( "sk-missing" ).await.expect( "query" ).is_none() );
    }

    #[ tokio::test ]
    async fn duplicate_insert_is_ignored()
    {
      let store = scratch_store().await;
      store.insert_credential_now( &credential( "sk-a", 5.0 ) ).await.expect( "insert" );
      store.insert_credential_now( &credential( "sk-a", 999.0 ) ).await.expect( "insert or ignore" );

      let found = store.credential( "sk-a" ).await.expect( "query" ).expect( "present" );
      assert_eq!( found.balance, 5.0, "first insert wins, second is ignored" );
    }

    #[ tokio::test ]
    async fn enabled_credentials_excludes_disabled_rows()
    {
      let store = scratch_store().await;
      store.insert_credential_now( &credential( "sk-on", 1.0 ) ).await.expect( "insert" );
      let mut off = credential( "sk-off", 1.0 );
      off.enabled = false;
      store.insert_credential_now( &off ).await.expect( "insert" );

      let enabled = store.enabled_credentials().await.expect( "query" );
      assert_eq!( enabled.len(), 1 );
      assert_eq!( enabled[ 0 ].key, "sk-on" );

      let all = store.all_credentials().await.expect( "query" );
      assert_eq!( all.len(), 2 );
    }

    #[ tokio::test ]
    async fn update_credential_now_applies_only_named_columns()
    {
      let store = scratch_store().await;
      store.insert_credential_now( &credential( "sk-a", 5.0 ) ).await.expect( "insert" );

      store.update_credential_now( "sk-a", &[ ( "balance", crate::cache::SqlValue::Real( 2.0 ) ) ] ).await.expect( "update" );

      let found = store.credential( "sk-a" ).await.expect( "query" ).expect( "present" );
      assert_eq!( found.balance, 2.0 );
      assert_eq!( found.usage_count, 0 );
    }

    #[ tokio::test ]
    async fn delete_credential_now_removes_the_row()
    {
      let store = scratch_store().await;
      store.insert_credential_now( &credential( "sk-a", 5.0 ) ).await.expect( "insert" );
      store.delete_credential_now( "sk-a" ).await.expect( "delete" );
      assert!( store.credential( "sk-a" ).await.expect( "query" ).is_none() );
    }

    #[ tokio::test ]
    async fn logs_filter_by_model_and_endpoint()
    {
      let store = scratch_store().await;
      let record = | model : &str, endpoint : &str | CallRecord
      {
        id : None,
        used_key : "sk-a".to_string(),
        model : model.to_string(),
        api_endpoint : endpoint.to_string(),
        call_time : 1.0,
        input_tokens : 1,
        output_tokens : 1,
        total_tokens : 2,
      };

      store.insert_log_now( &record( "deepseek-chat", "chat_completions" ) ).await.expect( "insert" );
      store.insert_log_now( &record( "bge-m3", "embeddings" ) ).await.expect( "insert" );

      let filtered = store.logs( Some( "deepseek-chat" ), None ).await.expect( "query" );
      assert_eq!( filtered.len(), 1 );
      assert_eq!( filtered[ 0 ].api_endpoint, "chat_completions" );

      let all = store.logs( None, None ).await.expect( "query" );
      assert_eq!( all.len(), 2 );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    Store,
  };
}
