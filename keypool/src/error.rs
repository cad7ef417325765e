mod private
{
  use error_tools::dependency::thiserror;

  /// Error taxonomy for the credential-pool proxy.
  ///
  /// Every fallible path in the proxy resolves to one of these variants.
  /// They mirror the classification the dispatcher needs to decide
  /// whether a failure is retryable, whether it should roll back a
  /// credential's rate-limit reservation, and what status code to
  /// return to the inbound caller.
  #[ derive( Debug, Clone, thiserror::Error ) ]
  #[ non_exhaustive ]
  pub enum PoolError
  {
    /// A credential failed format or upstream validation.
    #[ error( "invalid credential : {0}" ) ]
    InvalidCredential( String ),

    /// Upstream returned a retryable failure (5xx, 429, connect reset).
    #[ error( "transient upstream error : {0}" ) ]
    TransientUpstream( String ),

    /// Upstream connection was dropped mid-response without a clean close.
    #[ error( "eof-like upstream failure : {0}" ) ]
    EofLike( String ),

    /// No enabled credential satisfied the selection strategy.
    #[ error( "no credential available" ) ]
    NoCredentialAvailable,

    /// A request waited in the dispatch queue longer than the configured timeout.
    #[ error( "queue timeout after {0:?}" ) ]
    QueueTimeout( std::time::Duration ),

    /// The inbound client disconnected before a response could be delivered.
    #[ error( "client disconnected" ) ]
    ClientDisconnect,

    /// A write to the durable store failed (buffered writes are retried, not dropped).
    #[ error( "persistence failure : {0}" ) ]
    PersistenceFailure( String ),

    /// Generic HTTP-level failure that doesn't fit a more specific category.
    #[ error( "http error : {0}" ) ]
    Http( String ),

    /// JSON encode/decode failure.
    #[ error( "serialization error : {0}" ) ]
    Serialization( String ),

    /// Configuration is missing or malformed.
    #[ error( "configuration error : {0}" ) ]
    Configuration( String ),
  }

  /// Result type alias used throughout the crate.
  pub type Result< T > = error_tools::untyped::Result< T >;

  impl From< reqwest::Error > for PoolError
  {
    fn from( error : reqwest::Error ) -> Self
    {
      if error.is_timeout() || error.is_connect()
      {
        PoolError::TransientUpstream( error.to_string() )
      }
      else if error.is_body() || error.is_decode()
      {
        PoolError::EofLike( error.to_string() )
      }
      else if let Some( status ) = error.status()
      {
        if status.as_u16() == 429 || status.is_server_error()
        {
          PoolError::TransientUpstream( format!( "upstream status {status}" ) )
        }
        else
        {
          PoolError::Http( error.to_string() )
        }
      }
      else
      {
        PoolError::Http( error.to_string() )
      }
    }
  }

  impl From< serde_json::Error > for PoolError
  {
    fn from( error : serde_json::Error ) -> Self
    {
      PoolError::Serialization( error.to_string() )
    }
  }

  impl From< url::ParseError > for PoolError
  {
    fn from( error : url::ParseError ) -> Self
    {
      PoolError::Configuration( format!( "invalid url : {error}" ) )
    }
  }

  impl From< sqlx::Error > for PoolError
  {
    fn from( error : sqlx::Error ) -> Self
    {
      PoolError::PersistenceFailure( error.to_string() )
    }
  }

  impl PoolError
  {
    /// Whether the dispatcher should retry the request against the same
    /// or a different credential, as opposed to surfacing the error.
    #[ must_use ]
    pub fn is_retryable( &self ) -> bool
    {
      matches!( self, PoolError::TransientUpstream( _ ) | PoolError::EofLike( _ ) )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn only_transient_and_eof_like_are_retryable()
    {
      assert!( PoolError::TransientUpstream( "x".to_string() ).is_retryable() );
      assert!( PoolError::EofLike( "x".to_string() ).is_retryable() );
      assert!( !PoolError::Http( "x".to_string() ).is_retryable() );
      assert!( !PoolError::InvalidCredential( "x".to_string() ).is_retryable() );
      assert!( !PoolError::NoCredentialAvailable.is_retryable() );
      assert!( !PoolError::ClientDisconnect.is_retryable() );
      assert!( !PoolError::QueueTimeout( std::time::Duration::from_secs( 1 ) ).is_retryable() );
      assert!( !PoolError::PersistenceFailure( "x".to_string() ).is_retryable() );
      assert!( !PoolError::Serialization( "x".to_string() ).is_retryable() );
      assert!( !PoolError::Configuration( "x".to_string() ).is_retryable() );
    }

    #[ test ]
    fn serde_json_errors_convert_to_serialization()
    {
      let parse_error = serde_json::from_str::< serde_json::Value >( "not json" ).unwrap_err();
      let pool_error : PoolError = parse_error.into();
      assert!( matches!( pool_error, PoolError::Serialization( _ ) ) );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    PoolError,
    Result,
  };
}
