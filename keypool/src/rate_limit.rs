mod private
{
  use std::collections::HashMap;
  use std::sync::Mutex;
  use std::time::{ SystemTime, UNIX_EPOCH };

  const WINDOW_SECS : f64 = 60.0;
  const COOLDOWN_SECS : f64 = 60.0;

  #[ derive( Debug, Clone, Copy ) ]
  struct Sample
  {
    ts : f64,
    reqs : u32,
    tokens : u32,
  }

  #[ derive( Debug, Default ) ]
  struct CredentialState
  {
    history : Vec< Sample >,
    cooldown_until : Option< f64 >,
  }

  /// Per-credential sliding one-minute window tracking requests and
  /// tokens, with a fixed 60-second cooldown on breach (C3).
  ///
  /// All state lives behind one mutex; it is never held across I/O —
  /// every method here is synchronous arithmetic over in-memory history.
  #[ derive( Debug, Default ) ]
  pub struct RateLimiter
  {
    state : Mutex< HashMap< String, CredentialState > >,
  }

  impl RateLimiter
  {
    /// Creates an empty rate limiter.
    #[ must_use ]
    pub fn new() -> Self
    {
      Self::default()
    }

    /// Records one observation of `reqs` requests and `tokens` tokens for
    /// `key` at the current time, then prunes entries older than the
    /// 60-second window.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn track( &self, key : &str, reqs : u32, tokens : u32 )
    {
      let now = now_secs();
      let mut guard = self.state.lock().expect( "rate limiter lock poisoned" );
      let entry = guard.entry( key.to_string() ).or_default();
      entry.history.push( Sample { ts : now, reqs, tokens } );
      prune( entry, now );
    }

    /// Checks whether `key` may be admitted against the given `rpm`/`tpm`
    /// ceilings (`0` disables enforcement for that axis).
    ///
    /// A credential already under an unexpired cooldown is denied without
    /// recomputing its window. Otherwise the window is refreshed; if
    /// either configured ceiling is met or exceeded, a fresh 60-second
    /// cooldown is armed and the call is denied.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn check( &self, key : &str, rpm : u32, tpm : u32 ) -> bool
    {
      let now = now_secs();
      let mut guard = self.state.lock().expect( "rate limiter lock poisoned" );
      let entry = guard.entry( key.to_string() ).or_default();

      if let Some( until ) = entry.cooldown_until
      {
        if now < until
        {
          return false;
        }
      }

      prune( entry, now );

      let ( current_rpm, current_tpm ) = window_totals( entry );

      let breaches_rpm = rpm > 0 && current_rpm >= rpm;
      let breaches_tpm = tpm > 0 && current_tpm >= tpm;

      if breaches_rpm || breaches_tpm
      {
        entry.cooldown_until = Some( now + COOLDOWN_SECS );
        false
      }
      else
      {
        true
      }
    }

    /// Returns the subset of `keys` that currently pass [`RateLimiter::check`].
    /// Keys with no prior history are treated as never having breached and
    /// do not have a cooldown armed against them by this call.
    #[ must_use ]
    pub fn available< 'k >( &self, keys : &[ &'k str ], rpm : u32, tpm : u32 ) -> Vec< &'k str >
    {
      keys.iter().copied().filter( | key | self.check( key, rpm, tpm ) ).collect()
    }

    /// Returns `(current_rpm, current_tpm)` for `key` without mutating state.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[ must_use ]
    pub fn usage( &self, key : &str ) -> ( u32, u32 )
    {
      let now = now_secs();
      let mut guard = self.state.lock().expect( "rate limiter lock poisoned" );
      let entry = guard.entry( key.to_string() ).or_default();
      prune( entry, now );
      window_totals( entry )
    }
  }

  fn prune( entry : &mut CredentialState, now : f64 )
  {
    entry.history.retain( | sample | sample.ts > now - WINDOW_SECS );
  }

  fn window_totals( entry : &CredentialState ) -> ( u32, u32 )
  {
    entry.history.iter().fold( ( 0u32, 0u32 ), | ( r, t ), sample | ( r + sample.reqs, t + sample.tokens ) )
  }

  fn now_secs() -> f64
  {
    SystemTime::now().duration_since( UNIX_EPOCH ).map( | d | d.as_secs_f64() ).unwrap_or( 0.0 )
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn zero_limits_disable_enforcement()
    {
      let limiter = RateLimiter::new();
      for _ in 0..1000
      {
        limiter.track( "key-a", 1, 1000 );
      }
      assert!( limiter.check( "key-a", 0, 0 ) );
    }

    #[ test ]
    fn rpm_breach_arms_cooldown()
    {
      let limiter = RateLimiter::new();
      limiter.track( "key-a", 5, 0 );
      assert!( !limiter.check( "key-a", 5, 0 ) );
      // still within the 60s cooldown, further checks stay denied regardless of window contents
      assert!( !limiter.check( "key-a", 5, 0 ) );
    }

    #[ test ]
    fn tpm_breach_arms_cooldown_independently_of_rpm()
    {
      let limiter = RateLimiter::new();
      limiter.track( "key-a", 1, 10_000 );
      assert!( !limiter.check( "key-a", 0, 10_000 ) );
    }

    #[ test ]
    fn unseen_key_is_available_and_does_not_arm_a_cooldown()
    {
      let limiter = RateLimiter::new();
      let available = limiter.available( &[ "fresh-key" ], 1, 1 );
      assert_eq!( available, vec![ "fresh-key" ] );
      assert!( limiter.check( "fresh-key", 1, 1 ) );
    }

    #[ test ]
    fn usage_reports_window_totals_without_mutating_cooldown()
    {
      let limiter = RateLimiter::new();
      limiter.track( "key-a", 3, 300 );
      limiter.track( "key-a", 2, 200 );
      assert_eq!( limiter.usage( "key-a" ), ( 5, 500 ) );
    }

    #[ test ]
    fn available_filters_only_breaching_keys()
    {
      let limiter = RateLimiter::new();
      limiter.track( "hot", 10, 0 );
      let available = limiter.available( &[ "hot", "cold" ], 5, 0 );
      assert_eq!( available, vec![ "cold" ] );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    RateLimiter,
  };
}
