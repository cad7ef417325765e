mod private
{
  use crate::error::{ PoolError, Result };
  use crate::model::SelectionStrategy;
  use former::Former;
  use serde::{ Serialize, Deserialize };
  use std::path::{ Path, PathBuf };
  use std::sync::RwLock;

  /// Typed runtime configuration, persisted as a single JSON document.
  ///
  /// Replaces the source's ambient module-level globals: every component
  /// that needs a configuration value is handed an explicit snapshot
  /// (`RuntimeConfig`) rather than reading shared mutable state. The
  /// `Former` derive gives tests a builder for constructing partial
  /// configs without repeating every field, the same pattern
  /// `ClientConfig` uses for its own settings struct.
  #[ derive( Debug, Clone, Serialize, Deserialize, PartialEq, Former ) ]
  pub struct RuntimeConfig
  {
    /// Credential selection strategy.
    #[ former( default = SelectionStrategy::default() ) ]
    pub strategy : SelectionStrategy,

    /// Proxy-facing bearer token required on inbound requests. Empty ⇒ no auth.
    #[ serde( default ) ]
    #[ former( default = String::new() ) ]
    pub custom_api_key : String,

    /// Proxy-facing bearer token that flags a request as free-tier-only. Empty ⇒ disabled.
    #[ serde( default ) ]
    #[ former( default = String::new() ) ]
    pub free_model_api_key : String,

    /// Minutes between automatic validator sweeps. `0` ⇒ disabled.
    #[ former( default = 60_u64 ) ]
    pub refresh_interval : u64,

    /// Per-credential requests-per-minute ceiling. `0` ⇒ unenforced.
    #[ former( default = 0_u32 ) ]
    pub rpm_limit : u32,

    /// Per-credential tokens-per-minute ceiling. `0` ⇒ unenforced.
    #[ former( default = 0_u32 ) ]
    pub tpm_limit : u32,

    /// Admin panel basic-auth username.
    #[ serde( default ) ]
    #[ former( default = "admin".to_string() ) ]
    pub admin_username : String,

    /// Admin panel basic-auth password.
    #[ serde( default ) ]
    #[ former( default = "admin".to_string() ) ]
    pub admin_password : String,
  }

  impl Default for RuntimeConfig
  {
    fn default() -> Self
    {
      Self
      {
        strategy : SelectionStrategy::default(),
        custom_api_key : String::new(),
        free_model_api_key : String::new(),
        refresh_interval : 60,
        rpm_limit : 0,
        tpm_limit : 0,
        admin_username : "admin".to_string(),
        admin_password : "admin".to_string(),
      }
    }
  }

  /// Snapshot-based configuration store (§9 redesign: no ambient global state).
  ///
  /// Holds the current [`RuntimeConfig`] behind a `RwLock` and persists every
  /// mutation back to `path` as a JSON document. Readers take a cloned
  /// snapshot; they never observe a torn write.
  #[ derive( Debug ) ]
  pub struct ConfigStore
  {
    path : PathBuf,
    current : RwLock< RuntimeConfig >,
  }

  impl ConfigStore
  {
    /// Resolves the config document's default location via `workspace_tools`
    /// (`<workspace root>/keypool.config.json`), falling back to a path
    /// relative to the current directory if no workspace can be resolved.
    ///
    /// Mirrors the workspace-first priority chain `Secret::load_with_fallbacks`
    /// uses for credentials: workspace location first, bare relative path
    /// as the fallback for environments without a `Cargo.toml`-rooted tree.
    #[ must_use ]
    pub fn default_path() -> PathBuf
    {
      workspace_tools::workspace()
        .map( | ws | ws.root().join( "keypool.config.json" ) )
        .unwrap_or_else( | _ | PathBuf::from( "keypool.config.json" ) )
    }

    /// Loads configuration from `path`, falling back to defaults (and
    /// writing them out) if the file doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] if the file exists but is not
    /// valid JSON, or if it cannot be written back.
    pub fn load( path : impl AsRef< Path > ) -> Result< Self >
    {
      let path = path.as_ref().to_path_buf();

      let config = match std::fs::read_to_string( &path )
      {
        Ok( contents ) => serde_json::from_str( &contents )
          .map_err( | e | PoolError::Configuration( format!( "malformed config at {} : {e}", path.display() ) ) )?,
        Err( _ ) => RuntimeConfig::default(),
      };

      let store = Self { path, current : RwLock::new( config ) };
      store.persist()?;
      Ok( store )
    }

    /// Returns a cloned snapshot of the current configuration.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[ must_use ]
    pub fn snapshot( &self ) -> RuntimeConfig
    {
      self.current.read().expect( "config lock poisoned" ).clone()
    }

    /// Replaces the entire configuration and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] if persistence fails.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn replace( &self, config : RuntimeConfig ) -> Result< () >
    {
      *self.current.write().expect( "config lock poisoned" ) = config;
      self.persist()
    }

    /// Applies `mutate` to a clone of the current configuration and
    /// persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] if persistence fails.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn update( &self, mutate : impl FnOnce( &mut RuntimeConfig ) ) -> Result< RuntimeConfig >
    {
      let mut guard = self.current.write().expect( "config lock poisoned" );
      mutate( &mut guard );
      let snapshot = guard.clone();
      drop( guard );
      self.persist()?;
      Ok( snapshot )
    }

    fn persist( &self ) -> Result< () >
    {
      let snapshot = self.snapshot();
      let serialized = serde_json::to_string_pretty( &snapshot )?;
      std::fs::write( &self.path, serialized )
        .map_err( | e | PoolError::Configuration( format!( "failed to write {} : {e}", self.path.display() ) ) )?;
      Ok( () )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use std::sync::atomic::{ AtomicU64, Ordering };

    static COUNTER : AtomicU64 = AtomicU64::new( 0 );

    fn scratch_path() -> PathBuf
    {
      let id = COUNTER.fetch_add( 1, Ordering::Relaxed );
      std::env::temp_dir().join( format!( "keypool-config-test-{}-{id}.json", std::process::id() ) )
    }

    #[ test ]
    fn load_writes_defaults_when_file_is_absent()
    {
      let path = scratch_path();
      let store = ConfigStore::load( &path ).expect( "load" );
      assert_eq!( store.snapshot(), RuntimeConfig::default() );
      assert!( path.exists() );
      let _ = std::fs::remove_file( &path );
    }

    #[ test ]
    fn update_persists_across_a_fresh_load()
    {
      let path = scratch_path();
      let store = ConfigStore::load( &path ).expect( "load" );
      store.update( | config | config.rpm_limit = 120 ).expect( "update" );

      let reloaded = ConfigStore::load( &path ).expect( "reload" );
      assert_eq!( reloaded.snapshot().rpm_limit, 120 );
      let _ = std::fs::remove_file( &path );
    }

    #[ test ]
    fn malformed_existing_file_is_rejected()
    {
      let path = scratch_path();
      std::fs::write( &path, "not json" ).expect( "write garbage" );
      assert!( ConfigStore::load( &path ).is_err() );
      let _ = std::fs::remove_file( &path );
    }

    #[ test ]
    fn replace_overwrites_the_entire_document()
    {
      let path = scratch_path();
      let store = ConfigStore::load( &path ).expect( "load" );
      let next = RuntimeConfig::former()
        .strategy( SelectionStrategy::RoundRobin )
        .custom_api_key( "sk-admin".to_string() )
        .form();
      store.replace( next.clone() ).expect( "replace" );
      assert_eq!( store.snapshot(), next );
      let _ = std::fs::remove_file( &path );
    }

    #[ test ]
    fn former_builder_fills_unset_fields_with_their_defaults()
    {
      let config = RuntimeConfig::former().rpm_limit( 120 ).form();
      assert_eq!( config.rpm_limit, 120 );
      assert_eq!( config.refresh_interval, 60 );
      assert_eq!( config.admin_username, "admin" );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    RuntimeConfig,
    ConfigStore,
  };
}
