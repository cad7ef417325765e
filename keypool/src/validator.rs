mod private
{
  use crate::secret::Secret;
  use std::time::Duration;
  use tracing::warn;

  const MAX_ATTEMPTS : u32 = 4;
  const PROBE_TIMEOUT : Duration = Duration::from_secs( 30 );
  const BASE_BACKOFF : Duration = Duration::from_millis( 500 );
  const PROBE_PATH : &str = "/v1/user/info";

  /// Outcome of probing a credential against upstream (C5).
  ///
  /// A three-way classification, unlike the two-tuple the original probe
  /// returns: distinguishing an authoritative rejection from a transient
  /// network failure is what lets the state-effect rule in
  /// [`Outcome::apply_to`] protect a credential's balance from flapping
  /// under mere network noise.
  #[ derive( Debug, Clone, PartialEq ) ]
  pub enum Outcome
  {
    /// HTTP 200 with a parseable balance.
    Valid
    {
      balance : f64,
    },
    /// Authoritative rejection (401/403, or local format check failure).
    /// No retry is warranted; the credential is terminally bad.
    Invalid
    {
      message : String,
    },
    /// Network error, timeout, 429, or any non-2xx other than 401/403,
    /// after exhausting retries. The credential's state should not be
    /// touched unless its balance is already non-positive.
    Transient
    {
      message : String,
    },
  }

  /// Probes one credential against the upstream `/v1/user/info` endpoint
  /// and classifies the result, retrying transient failures up to
  /// [`MAX_ATTEMPTS`] times with doubling backoff.
  ///
  /// The local format check (`^sk-[A-Za-z0-9]+$`) is applied first and
  /// unconditionally yields [`Outcome::Invalid`] — it never consumes a
  /// network attempt.
  pub async fn validate( client : &reqwest::Client, upstream_base : &str, key : &str ) -> Outcome
  {
    if Secret::validate_format( key ).is_err()
    {
      return Outcome::Invalid { message : "malformed credential".to_string() };
    }

    let url = format!( "{}{}", upstream_base.trim_end_matches( '/' ), PROBE_PATH );
    let mut backoff = BASE_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS
    {
      match probe_once( client, &url, key ).await
      {
        ProbeResult::Valid( balance ) => return Outcome::Valid { balance },
        ProbeResult::Unauthorized( message ) => return Outcome::Invalid { message },
        ProbeResult::Transient( message ) =>
        {
          if attempt == MAX_ATTEMPTS
          {
            return Outcome::Transient { message };
          }
          warn!( attempt, %message, "validator probe failed, retrying" );
          tokio::time::sleep( backoff ).await;
          backoff *= 2;
        }
      }
    }

    unreachable!( "loop always returns by the final attempt" )
  }

  enum ProbeResult
  {
    Valid( f64 ),
    Unauthorized( String ),
    Transient( String ),
  }

  async fn probe_once( client : &reqwest::Client, url : &str, key : &str ) -> ProbeResult
  {
    let response = match client
      .get( url )
      .bearer_auth( key )
      .timeout( PROBE_TIMEOUT )
      .send()
      .await
    {
      Ok( response ) => response,
      Err( error ) => return ProbeResult::Transient( error.to_string() ),
    };

    let status = response.status();

    if status.as_u16() == 401 || status.as_u16() == 403
    {
      let message = response.text().await.unwrap_or_else( | _ | "unauthorized".to_string() );
      return ProbeResult::Unauthorized( message );
    }

    if !status.is_success()
    {
      let message = format!( "upstream status {status}" );
      return ProbeResult::Transient( message );
    }

    let body : serde_json::Value = match response.json().await
    {
      Ok( body ) => body,
      Err( error ) => return ProbeResult::Transient( error.to_string() ),
    };

    let balance = body
      .get( "data" )
      .and_then( | data | data.get( "totalBalance" ) )
      .and_then( serde_json::Value::as_f64 );

    // A 200 with an unparseable balance is still a live credential —
    // free-tier-only. The original treats this as `(true, 0)`.
    ProbeResult::Valid( balance.unwrap_or( 0.0 ) )
  }

  impl Outcome
  {
    /// Applies the §4.5 state-effect rule to `(balance, enabled, is_invalid)`
    /// and returns the updated triple, or `None` if no change should be
    /// made (the transient-with-positive-balance case).
    ///
    /// The balance-protection rule (an authoritative rejection leaves a
    /// credential untouched unless its recorded balance is already
    /// non-positive) has exactly one exception: a local format-validation
    /// failure marks the credential invalid unconditionally, regardless of
    /// its current balance.
    #[ must_use ]
    pub fn apply_to( &self, current_balance : f64 ) -> Option< ( f64, bool, bool ) >
    {
      match self
      {
        Outcome::Valid { balance } => Some( ( *balance, true, false ) ),
        Outcome::Invalid { .. } =>
        {
          if self.is_format_failure() || current_balance <= 0.0
          {
            Some( ( current_balance, false, true ) )
          }
          else
          {
            None
          }
        }
        Outcome::Transient { .. } => None,
      }
    }

    /// Whether this outcome unconditionally marks the credential invalid,
    /// bypassing the balance-protection rule. Only true for a local
    /// format-validation failure, matching §4.5's sole exception.
    #[ must_use ]
    pub fn is_format_failure( &self ) -> bool
    {
      matches!( self, Outcome::Invalid { message } if message == "malformed credential" )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn valid_outcome_always_updates_balance_and_enables()
    {
      let outcome = Outcome::Valid { balance : 42.0 };
      assert_eq!( outcome.apply_to( -5.0 ), Some( ( 42.0, true, false ) ) );
      assert_eq!( outcome.apply_to( 0.0 ), Some( ( 42.0, true, false ) ) );
    }

    #[ test ]
    fn authoritative_rejection_is_protected_by_a_positive_balance()
    {
      let outcome = Outcome::Invalid { message : "unauthorized".to_string() };
      assert_eq!( outcome.apply_to( 10.0 ), None );
    }

    #[ test ]
    fn authoritative_rejection_demotes_a_non_positive_balance()
    {
      let outcome = Outcome::Invalid { message : "unauthorized".to_string() };
      assert_eq!( outcome.apply_to( 0.0 ), Some( ( 0.0, false, true ) ) );
      assert_eq!( outcome.apply_to( -1.0 ), Some( ( -1.0, false, true ) ) );
    }

    #[ test ]
    fn format_failure_demotes_even_a_positive_balance()
    {
      let outcome = Outcome::Invalid { message : "malformed credential".to_string() };
      assert_eq!( outcome.apply_to( 999.0 ), Some( ( 999.0, false, true ) ) );
      assert!( outcome.is_format_failure() );
    }

    #[ test ]
    fn transient_outcome_never_changes_state()
    {
      let outcome = Outcome::Transient { message : "timeout".to_string() };
      assert_eq!( outcome.apply_to( 10.0 ), None );
      assert_eq!( outcome.apply_to( 0.0 ), None );
      assert!( !outcome.is_format_failure() );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    Outcome,
    validate,
  };
}
