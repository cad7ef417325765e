mod private
{
  use serde::{ Serialize, Deserialize };

  /// A pooled upstream credential and its accounting state.
  ///
  /// Mirrors the richer of the two schemas found in the source material:
  /// the one that tracks `is_invalid` separately from `enabled`, so a
  /// credential can be disabled by an admin without being marked
  /// permanently invalid by the validator.
  #[ derive( Debug, Clone, Serialize, Deserialize, PartialEq ) ]
  pub struct Credential
  {
    /// Primary key; format `sk-` followed by alphanumerics.
    pub key : String,

    /// Wall-clock seconds at insertion.
    pub add_time : f64,

    /// Remaining quota at upstream, as last observed by the validator.
    pub balance : f64,

    /// Monotonic count of requests dispatched with this credential.
    pub usage_count : i64,

    /// `false` ⇒ never selected, regardless of `is_invalid`.
    pub enabled : bool,

    /// `true` ⇒ upstream has authoritatively rejected this credential.
    ///
    /// Invariant: `is_invalid == true` implies `enabled == false`.
    pub is_invalid : bool,
  }

  impl Credential
  {
    /// Whether this credential is eligible for the free tier (`balance <= 0`).
    #[ must_use ]
    pub fn is_free_tier( &self ) -> bool
    {
      self.balance <= 0.0
    }
  }

  /// One append-only entry in the call log.
  #[ derive( Debug, Clone, Serialize, Deserialize, PartialEq ) ]
  pub struct CallRecord
  {
    /// Auto-incrementing id, assigned by the store on insert.
    pub id : Option< i64 >,

    /// The credential key used to serve the call.
    pub used_key : String,

    /// Upstream model name from the request body.
    pub model : String,

    /// A short tag identifying which downstream endpoint was hit
    /// (e.g. `"chat_completions"`, `"embeddings"`).
    pub api_endpoint : String,

    /// Wall-clock seconds when the call completed.
    pub call_time : f64,

    pub input_tokens : i64,
    pub output_tokens : i64,
    pub total_tokens : i64,
  }

  /// Selection strategy applied by the selector (C4).
  #[ derive( Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq ) ]
  #[ serde( rename_all = "snake_case" ) ]
  pub enum SelectionStrategy
  {
    /// Uniform random choice among eligible candidates. Default.
    #[ default ]
    Random,
    /// Highest balance first.
    High,
    /// Lowest balance first.
    Low,
    /// Fewest dispatched requests first.
    LeastUsed,
    /// Most dispatched requests first.
    MostUsed,
    /// Earliest `add_time` first.
    Oldest,
    /// Latest `add_time` first.
    Newest,
    /// Rotate through the eligible set via a monotonic counter mod N.
    RoundRobin,
  }

  /// Token usage reported by the upstream for one call.
  #[ derive( Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq ) ]
  pub struct Usage
  {
    pub prompt_tokens : i64,
    pub completion_tokens : i64,
    pub total_tokens : i64,
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    fn credential( balance : f64 ) -> Credential
    {
      Credential { key : "sk-x".to_string(), add_time : 0.0, balance, usage_count : 0, enabled : true, is_invalid : false }
    }

    #[ test ]
    fn free_tier_is_balance_at_or_below_zero()
    {
      assert!( credential( 0.0 ).is_free_tier() );
      assert!( credential( -1.0 ).is_free_tier() );
      assert!( !credential( 0.01 ).is_free_tier() );
    }

    #[ test ]
    fn default_selection_strategy_is_random()
    {
      assert_eq!( SelectionStrategy::default(), SelectionStrategy::Random );
    }

    #[ test ]
    fn selection_strategy_serializes_as_snake_case()
    {
      let json = serde_json::to_string( &SelectionStrategy::LeastUsed ).expect( "serialize" );
      assert_eq!( json, "\"least_used\"" );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    Credential,
    CallRecord,
    SelectionStrategy,
    Usage,
  };
}
