mod private
{
  //! Inbound proxy-facing authentication (§6 "Inbound authentication").

  use crate::config::RuntimeConfig;

  /// Outcome of checking one inbound request's `Authorization` header
  /// against the current [`RuntimeConfig`].
  #[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
  pub enum Admission
  {
    /// No inbound token is configured, or the supplied token matched
    /// `custom_api_key`. The request is not restricted to free-tier
    /// credentials.
    Allowed,
    /// The supplied token matched `free_model_api_key`: the request must
    /// only be served by zero-balance credentials.
    AllowedFreeTier,
    /// Both tokens are configured (or just `custom_api_key`) and neither matched.
    Denied,
  }

  /// Checks `bearer` (the raw value of an inbound `Authorization: Bearer
  /// {token}` header, already stripped of the `Bearer ` prefix) against
  /// `config`.
  ///
  /// Semantics, per §6: if `custom_api_key` is set, it is required; if
  /// `free_model_api_key` is set and received instead, the request is
  /// flagged free-tier. If both are empty, there is no inbound auth.
  #[ must_use ]
  pub fn check( bearer : Option< &str >, config : &RuntimeConfig ) -> Admission
  {
    let custom_set = !config.custom_api_key.is_empty();
    let free_set = !config.free_model_api_key.is_empty();

    if !custom_set && !free_set
    {
      return Admission::Allowed;
    }

    if let Some( token ) = bearer
    {
      if free_set && token == config.free_model_api_key
      {
        return Admission::AllowedFreeTier;
      }
      if custom_set && token == config.custom_api_key
      {
        return Admission::Allowed;
      }
    }

    Admission::Denied
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    fn config( custom : &str, free : &str ) -> RuntimeConfig
    {
      RuntimeConfig { custom_api_key : custom.to_string(), free_model_api_key : free.to_string(), ..RuntimeConfig::default() }
    }

    #[ test ]
    fn no_keys_configured_allows_anything()
    {
      let cfg = config( "", "" );
      assert_eq!( check( None, &cfg ), Admission::Allowed );
      assert_eq!( check( Some( "whatever" ), &cfg ), Admission::Allowed );
    }

    #[ test ]
    fn matching_custom_key_is_allowed()
    {
      let cfg = config( "sk-custom", "" );
      assert_eq!( check( Some( "sk-custom" ), &cfg ), Admission::Allowed );
      assert_eq!( check( Some( "sk-wrong" ), &cfg ), Admission::Denied );
      assert_eq!( check( None, &cfg ), Admission::Denied );
    }

    #[ test ]
    fn matching_free_tier_key_is_flagged()
    {
      let cfg = config( "sk-custom", "sk-free" );
      assert_eq!( check( Some( "sk-free" ), &cfg ), Admission::AllowedFreeTier );
      assert_eq!( check( Some( "sk-custom" ), &cfg ), Admission::Allowed );
      assert_eq!( check( Some( "sk-other" ), &cfg ), Admission::Denied );
    }

    #[ test ]
    fn only_free_tier_key_configured()
    {
      let cfg = config( "", "sk-free" );
      assert_eq!( check( Some( "sk-free" ), &cfg ), Admission::AllowedFreeTier );
      assert_eq!( check( Some( "sk-anything-else" ), &cfg ), Admission::Denied );
      assert_eq!( check( None, &cfg ), Admission::Denied );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    Admission,
    check,
  };
}
