mod private
{
  use crate::error::{ PoolError, Result };
  use secrecy::{ SecretString, ExposeSecret };
  use std::sync::atomic::{ AtomicUsize, Ordering };

  /// Global counter tracking the number of times secrets have been exposed.
  ///
  /// Used for security auditing. Each call to `expose_secret()` increments
  /// this counter; it is never reset.
  static EXPOSURE_COUNTER : AtomicUsize = AtomicUsize::new( 0 );

  /// Secure wrapper around a pooled API credential.
  ///
  /// Wraps a `SecretString` so the key never appears in `Debug` output or
  /// accidental `Display` formatting. Only [`Secret::fingerprint`] is safe
  /// to log.
  ///
  /// # Key format
  ///
  /// Credentials must:
  /// - Start with `sk-`
  /// - Contain only `[A-Za-z0-9]` after the prefix
  #[ derive( Debug, Clone ) ]
  pub struct Secret( SecretString );

  impl Secret
  {
    /// Creates a new `Secret` from a string, validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidCredential`] if the format check fails.
    pub fn new( key : String ) -> Result< Self >
    {
      Self::validate_format( &key )?;
      Ok( Self( SecretString::new( key.into_boxed_str() ) ) )
    }

    /// Extracts the `sk-...` substring from `raw`, tolerating trailing
    /// noise such as stray parentheses or whitespace pasted alongside the
    /// key, then validates and wraps it.
    ///
    /// Mirrors the cleanup step the original importer performs before a
    /// credential ever reaches the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidCredential`] if no `sk-...` substring is
    /// found or the extracted substring fails format validation.
    pub fn clean_and_new( raw : &str ) -> Result< Self >
    {
      static PATTERN : std::sync::OnceLock< regex::Regex > = std::sync::OnceLock::new();
      let re = PATTERN.get_or_init( || regex::Regex::new( "(sk-[A-Za-z0-9]+)" ).expect( "valid regex" ) );

      let extracted = re
        .find( raw )
        .map( | m | m.as_str().to_string() )
        .unwrap_or_else( || raw.trim().to_string() );

      Self::new( extracted )
    }

    /// Validates key format without constructing a `Secret`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidCredential`] if validation fails.
    pub fn validate_format( key : &str ) -> Result< () >
    {
      if !key.starts_with( "sk-" )
      {
        return Err( PoolError::InvalidCredential( "credential must start with 'sk-' prefix".to_string() ).into() );
      }

      let suffix = &key[ 3.. ];
      if suffix.is_empty() || !suffix.chars().all( | c | c.is_ascii_alphanumeric() )
      {
        return Err( PoolError::InvalidCredential( "credential must be 'sk-' followed by alphanumeric characters".to_string() ).into() );
      }

      Ok( () )
    }

    /// Exposes the secret value for use in an `Authorization` header.
    ///
    /// Each call increments the global exposure counter for auditing.
    pub fn expose_secret( &self ) -> &str
    {
      EXPOSURE_COUNTER.fetch_add( 1, Ordering::Relaxed );
      self.0.expose_secret()
    }

    /// Returns a log-safe fingerprint: the first 8 characters followed by
    /// `***`, matching the original implementation's `key[:8] + "***"`
    /// logging convention.
    #[ must_use ]
    pub fn fingerprint( &self ) -> String
    {
      let exposed = self.0.expose_secret();
      let take = exposed.char_indices().nth( 8 ).map_or( exposed.len(), | ( i, _ ) | i );
      format!( "{}***", &exposed[ ..take ] )
    }

    /// Returns the number of times any `Secret` has had its value exposed.
    #[ must_use ]
    pub fn exposure_count() -> usize
    {
      EXPOSURE_COUNTER.load( Ordering::Relaxed )
    }
  }

  impl PartialEq for Secret
  {
    fn eq( &self, other : &Self ) -> bool
    {
      self.0.expose_secret() == other.0.expose_secret()
    }
  }

  impl Eq for Secret {}

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn accepts_well_formed_key()
    {
      assert!( Secret::new( "sk-abc123".to_string() ).is_ok() );
    }

    #[ test ]
    fn rejects_missing_prefix()
    {
      assert!( Secret::new( "abc123".to_string() ).is_err() );
    }

    #[ test ]
    fn rejects_empty_suffix()
    {
      assert!( Secret::new( "sk-".to_string() ).is_err() );
    }

    #[ test ]
    fn rejects_non_alphanumeric_suffix()
    {
      assert!( Secret::new( "sk-abc-123".to_string() ).is_err() );
    }

    #[ test ]
    fn clean_and_new_extracts_key_from_pasted_noise()
    {
      let secret = Secret::clean_and_new( "  (sk-abc123)  \n" ).expect( "extracted" );
      assert_eq!( secret.expose_secret(), "sk-abc123" );
    }

    #[ test ]
    fn clean_and_new_falls_back_to_trimmed_input_when_no_match()
    {
      assert!( Secret::clean_and_new( "   not-a-key   " ).is_err() );
    }

    #[ test ]
    fn fingerprint_never_reveals_more_than_eight_characters()
    {
      let secret = Secret::new( "sk-abcdefghijklmnop".to_string() ).expect( "valid" );
      assert_eq!( secret.fingerprint(), "sk-abcde***" );
    }

    #[ test ]
    fn fingerprint_handles_short_keys_without_panicking()
    {
      let secret = Secret::new( "sk-ab".to_string() ).expect( "valid" );
      assert_eq!( secret.fingerprint(), "sk-ab***" );
    }

    #[ test ]
    fn equality_compares_exposed_value()
    {
      let a = Secret::new( "sk-same".to_string() ).expect( "valid" );
      let b = Secret::new( "sk-same".to_string() ).expect( "valid" );
      let c = Secret::new( "sk-different".to_string() ).expect( "valid" );
      assert_eq!( a, b );
      assert_ne!( a, c );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    Secret,
  };
}
