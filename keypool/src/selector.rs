mod private
{
  use crate::model::{ Credential, SelectionStrategy };
  use crate::rate_limit::RateLimiter;
  use std::sync::atomic::{ AtomicUsize, Ordering };

  /// Applies a [`SelectionStrategy`] over a candidate credential set (C4).
  ///
  /// Stateless except for the monotonic counter backing `round_robin`,
  /// which is shared across all calls on one instance.
  #[ derive( Debug, Default ) ]
  pub struct Selector
  {
    round_robin_counter : AtomicUsize,
  }

  impl Selector
  {
    /// Creates a new selector with its round-robin counter at zero.
    #[ must_use ]
    pub fn new() -> Self
    {
      Self::default()
    }

    /// Chooses one credential from `candidates` (already known to be
    /// `enabled = 1`) according to `strategy`, `rpm`/`tpm` ceilings enforced
    /// via `limiter`, and `use_free_tier_only`.
    ///
    /// Pipeline, matching §4.4:
    /// 1. Partition by balance into `zero` (≤ 0) and `positive` (> 0).
    /// 2. Restrict to `zero` if `use_free_tier_only`, else to `positive`.
    /// 3. Filter the restricted set through the rate limiter, if either
    ///    ceiling is configured.
    /// 4. Apply the strategy; when `use_free_tier_only` holds, the
    ///    strategy is forced to `random` regardless of configuration.
    ///
    /// Returns `None` when no candidate survives filtering.
    #[ must_use ]
    pub fn select< 'c >(
      &self,
      candidates : &'c [ Credential ],
      strategy : SelectionStrategy,
      rpm : u32,
      tpm : u32,
      use_free_tier_only : bool,
      limiter : &RateLimiter,
    ) -> Option< &'c Credential >
    {
      let partitioned : Vec< &Credential > = candidates
        .iter()
        .filter( | c | c.enabled )
        .filter( | c | if use_free_tier_only { c.is_free_tier() } else { !c.is_free_tier() } )
        .collect();

      if partitioned.is_empty()
      {
        return None;
      }

      let eligible : Vec< &Credential > = if rpm > 0 || tpm > 0
      {
        let keys : Vec< &str > = partitioned.iter().map( | c | c.key.as_str() ).collect();
        let allowed = limiter.available( &keys, rpm, tpm );
        partitioned.into_iter().filter( | c | allowed.contains( &c.key.as_str() ) ).collect()
      }
      else
      {
        partitioned
      };

      if eligible.is_empty()
      {
        return None;
      }

      let effective_strategy = if use_free_tier_only { SelectionStrategy::Random } else { strategy };

      Some( self.apply_strategy( &eligible, effective_strategy ) )
    }

    fn apply_strategy< 'c >( &self, eligible : &[ &'c Credential ], strategy : SelectionStrategy ) -> &'c Credential
    {
      match strategy
      {
        SelectionStrategy::Random =>
        {
          let index = rand::random_range( 0..eligible.len() );
          eligible[ index ]
        }
        SelectionStrategy::High => eligible.iter().copied().max_by( | a, b | a.balance.total_cmp( &b.balance ) ).expect( "non-empty" ),
        SelectionStrategy::Low => eligible.iter().copied().min_by( | a, b | a.balance.total_cmp( &b.balance ) ).expect( "non-empty" ),
        SelectionStrategy::LeastUsed => eligible.iter().copied().min_by_key( | c | c.usage_count ).expect( "non-empty" ),
        SelectionStrategy::MostUsed => eligible.iter().copied().max_by_key( | c | c.usage_count ).expect( "non-empty" ),
        SelectionStrategy::Oldest => eligible.iter().copied().min_by( | a, b | a.add_time.total_cmp( &b.add_time ) ).expect( "non-empty" ),
        SelectionStrategy::Newest => eligible.iter().copied().max_by( | a, b | a.add_time.total_cmp( &b.add_time ) ).expect( "non-empty" ),
        SelectionStrategy::RoundRobin =>
        {
          let mut sorted = eligible.to_vec();
          sorted.sort_by( | a, b | a.key.cmp( &b.key ) );
          let index = self.round_robin_counter.fetch_add( 1, Ordering::Relaxed ) % sorted.len();
          sorted[ index ]
        }
      }
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::rate_limit::RateLimiter;

    fn credential( key : &str, balance : f64, usage_count : i64, add_time : f64 ) -> Credential
    {
      Credential { key : key.to_string(), add_time, balance, usage_count, enabled : true, is_invalid : false }
    }

    #[ test ]
    fn round_robin_visits_every_candidate_once_per_cycle()
    {
      let selector = Selector::new();
      let limiter = RateLimiter::new();
      let candidates = vec!
      [
        credential( "sk-a", 10.0, 0, 1.0 ),
        credential( "sk-b", 10.0, 0, 2.0 ),
        credential( "sk-c", 10.0, 0, 3.0 ),
      ];

      let mut seen = std::collections::HashSet::new();
      for _ in 0..candidates.len()
      {
        let picked = selector.select( &candidates, SelectionStrategy::RoundRobin, 0, 0, false, &limiter ).expect( "candidate" );
        seen.insert( picked.key.clone() );
      }
      assert_eq!( seen.len(), candidates.len() );

      // a second full cycle revisits the same three keys in the same order
      let first_cycle_second_pass = selector.select( &candidates, SelectionStrategy::RoundRobin, 0, 0, false, &limiter ).expect( "candidate" );
      assert_eq!( first_cycle_second_pass.key, "sk-a" );
    }

    #[ test ]
    fn free_tier_only_restricts_to_zero_balance_and_forces_random()
    {
      let selector = Selector::new();
      let limiter = RateLimiter::new();
      let candidates = vec!
      [
        credential( "sk-paid", 5.0, 0, 1.0 ),
        credential( "sk-free", 0.0, 0, 2.0 ),
      ];

      // even with RoundRobin configured, free-tier selection must land on the only zero-balance key
      let picked = selector.select( &candidates, SelectionStrategy::RoundRobin, 0, 0, true, &limiter ).expect( "candidate" );
      assert_eq!( picked.key, "sk-free" );
    }

    #[ test ]
    fn disabled_credentials_are_never_eligible()
    {
      let selector = Selector::new();
      let limiter = RateLimiter::new();
      let mut disabled = credential( "sk-off", 10.0, 0, 1.0 );
      disabled.enabled = false;
      let candidates = vec![ disabled ];

      assert!( selector.select( &candidates, SelectionStrategy::Random, 0, 0, false, &limiter ).is_none() );
    }

    #[ test ]
    fn high_and_low_pick_balance_extremes()
    {
      let selector = Selector::new();
      let limiter = RateLimiter::new();
      let candidates = vec!
      [
        credential( "sk-mid", 5.0, 0, 1.0 ),
        credential( "sk-hi", 9.0, 0, 2.0 ),
        credential( "sk-lo", 1.0, 0, 3.0 ),
      ];

      assert_eq!( selector.select( &candidates, SelectionStrategy::High, 0, 0, false, &limiter ).unwrap().key, "sk-hi" );
      assert_eq!( selector.select( &candidates, SelectionStrategy::Low, 0, 0, false, &limiter ).unwrap().key, "sk-lo" );
    }

    #[ test ]
    fn rate_limited_candidates_are_excluded_from_selection()
    {
      let selector = Selector::new();
      let limiter = RateLimiter::new();
      let candidates = vec!
      [
        credential( "sk-a", 10.0, 0, 1.0 ),
        credential( "sk-b", 10.0, 0, 2.0 ),
      ];

      limiter.track( "sk-a", 5, 0 );
      assert!( !limiter.check( "sk-a", 5, 0 ) ); // arms the cooldown

      let picked = selector.select( &candidates, SelectionStrategy::Random, 5, 0, false, &limiter ).expect( "candidate" );
      assert_eq!( picked.key, "sk-b" );
    }
  }

}

crate::mod_interface!
{
  exposed use
  {
    Selector,
  };
}
