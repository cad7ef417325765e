mod private
{
  //! Admin surface: credential CRUD, bulk/single refresh, export, stats,
  //! call-log queries, and the config-mutation routes (SPEC_FULL's
  //! "Admin CRUD surface" and "Config admin surface", grounded on
  //! `routers/api_keys.py` and `routers/config.py`).
  //!
  //! Every handler here requires HTTP Basic auth against the configured
  //! `admin_username`/`admin_password`; unlike the data-plane routes this
  //! surface is not part of the proxied wire protocol, so a conventional
  //! browser-friendly scheme is used instead of a bearer token. An empty
  //! username and password (the default) disables the check entirely,
  //! matching the "auth both empty ⇒ no inbound auth" convention §6
  //! applies to the data plane.

  use crate::cache::SqlValue;
  use crate::config::RuntimeConfig;
  use crate::model::{ Credential, SelectionStrategy };
  use crate::secret::Secret;
  use crate::state::AppState;
  use crate::validator::{ self, Outcome };
  use axum::extract::{ Path, Query, State };
  use axum::http::{ HeaderMap, StatusCode };
  use axum::response::{ IntoResponse, Response };
  use axum::routing::{ delete, get, post };
  use axum::{ Json, Router };
  use serde::{ Deserialize, Serialize };

  const UPSTREAM_BASE : &str = "https://api.siliconflow.cn";

  /// Builds the router for every admin endpoint.
  ///
  /// Callers should layer `tower_http::cors::CorsLayer::permissive()` onto
  /// this router only — the data-plane router in [`crate::routes`] mirrors
  /// a third-party wire protocol and has no such requirement.
  #[ must_use ]
  pub fn admin_router() -> Router< AppState >
  {
    Router::new()
      .route( "/admin/credentials", get( list_credentials ).post( import_credentials ) )
      .route( "/admin/credentials/export", get( export_credentials ) )
      .route( "/admin/credentials/:key", delete( delete_credential ) )
      .route( "/admin/credentials/:key/toggle", post( toggle_credential ) )
      .route( "/admin/credentials/:key/refresh", post( refresh_one ) )
      .route( "/admin/refresh", post( refresh_all ) )
      .route( "/admin/stats", get( stats ) )
      .route( "/admin/logs", get( logs ) )
      .route( "/admin/logs/clear", post( clear_logs ) )
      .route( "/admin/config", get( get_config ).post( update_config ) )
      .merge( metrics_router() )
  }

  #[ cfg( feature = "performance_metrics" ) ]
  fn metrics_router() -> Router< AppState >
  {
    Router::new().route( "/metrics", get( metrics ) )
  }

  #[ cfg( not( feature = "performance_metrics" ) ) ]
  fn metrics_router() -> Router< AppState >
  {
    Router::new()
  }

  /// Prometheus text-format scrape endpoint. Refreshes the credential-pool
  /// gauges from the live store immediately before exporting, since the
  /// dispatcher only reports request counters as calls happen.
  #[ cfg( feature = "performance_metrics" ) ]
  async fn metrics( State( state ) : State< AppState > ) -> Response
  {
    if let Ok( credentials ) = state.store.all_credentials().await
    {
      let enabled = credentials.iter().filter( | c | c.enabled ).count();
      let invalid = credentials.iter().filter( | c | c.is_invalid ).count();
      state.metrics.set_credential_counts( enabled, invalid );
    }

    ( StatusCode::OK, state.metrics.export() ).into_response()
  }

  /// Checks `headers` against `config`'s admin credentials.
  ///
  /// An empty username and password disables the check. Otherwise an
  /// `Authorization: Basic base64(user:pass)` header is required and must
  /// decode to an exact match.
  fn authorized( headers : &HeaderMap, config : &RuntimeConfig ) -> bool
  {
    if config.admin_username.is_empty() && config.admin_password.is_empty()
    {
      return true;
    }

    let Some( value ) = headers.get( axum::http::header::AUTHORIZATION ).and_then( | v | v.to_str().ok() )
    else { return false };

    let Some( encoded ) = value.strip_prefix( "Basic " ) else { return false };

    use base64::Engine;
    let Ok( decoded ) = base64::engine::general_purpose::STANDARD.decode( encoded ) else { return false };
    let Ok( decoded ) = String::from_utf8( decoded ) else { return false };
    let Some( ( user, pass ) ) = decoded.split_once( ':' ) else { return false };

    user == config.admin_username && pass == config.admin_password
  }

  fn unauthorized() -> Response
  {
    (
      StatusCode::UNAUTHORIZED,
      [ ( axum::http::header::WWW_AUTHENTICATE, "Basic realm=\"keypool-admin\"" ) ],
      "admin authentication required",
    ).into_response()
  }

  // ---- credential CRUD --------------------------------------------------

  async fn list_credentials( State( state ) : State< AppState >, headers : HeaderMap ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    match state.store.all_credentials().await
    {
      Ok( credentials ) => Json( credentials ).into_response(),
      Err( error ) => server_error( &error ),
    }
  }

  #[ derive( Debug, Deserialize ) ]
  struct ImportRequest
  {
    /// One credential per entry; each is cleaned of surrounding noise and
    /// format-validated before a single liveness probe is attempted, per
    /// the data model's "one attempt to validate before insertion" rule.
    keys : Vec< String >,
  }

  #[ derive( Debug, Serialize ) ]
  struct ImportOutcome
  {
    key : String,
    imported : bool,
    reason : Option< String >,
  }

  async fn import_credentials(
    State( state ) : State< AppState >,
    headers : HeaderMap,
    Json( request ) : Json< ImportRequest >,
  ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let client = reqwest::Client::new();
    let mut outcomes = Vec::with_capacity( request.keys.len() );

    for raw in request.keys
    {
      let secret = match Secret::clean_and_new( &raw )
      {
        Ok( secret ) => secret,
        Err( error ) =>
        {
          outcomes.push( ImportOutcome { key : raw, imported : false, reason : Some( error.to_string() ) } );
          continue;
        }
      };

      let key = secret.expose_secret().to_string();
      let outcome = validator::validate( &client, UPSTREAM_BASE, &key ).await;

      let ( balance, enabled, is_invalid ) = match &outcome
      {
        Outcome::Valid { balance } => ( *balance, true, false ),
        Outcome::Invalid { message } =>
        {
          outcomes.push( ImportOutcome { key, imported : false, reason : Some( message.clone() ) } );
          continue;
        }
        Outcome::Transient { message } =>
        {
          outcomes.push( ImportOutcome { key, imported : false, reason : Some( message.clone() ) } );
          continue;
        }
      };

      state.cache.queue_insert_credential( Credential
      {
        key : key.clone(),
        add_time : now_secs(),
        balance,
        usage_count : 0,
        enabled,
        is_invalid,
      } ).await;

      outcomes.push( ImportOutcome { key, imported : true, reason : None } );
    }

    Json( outcomes ).into_response()
  }

  async fn toggle_credential( State( state ) : State< AppState >, headers : HeaderMap, Path( key ) : Path< String > ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let Ok( Some( credential ) ) = state.store.credential( &key ).await
    else { return ( StatusCode::NOT_FOUND, "no such credential" ).into_response() };

    let next_enabled = !credential.enabled;
    state.cache.queue_update_credential(
      key,
      vec![ ( "enabled".to_string(), SqlValue::Bool( next_enabled ) ) ],
    ).await;

    Json( serde_json::json!( { "enabled" : next_enabled } ) ).into_response()
  }

  async fn delete_credential( State( state ) : State< AppState >, headers : HeaderMap, Path( key ) : Path< String > ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    state.cache.queue_delete_credential( key ).await;
    StatusCode::NO_CONTENT.into_response()
  }

  async fn refresh_one( State( state ) : State< AppState >, headers : HeaderMap, Path( key ) : Path< String > ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let Ok( Some( credential ) ) = state.store.credential( &key ).await
    else { return ( StatusCode::NOT_FOUND, "no such credential" ).into_response() };

    let client = reqwest::Client::new();
    let outcome = validator::validate( &client, UPSTREAM_BASE, &key ).await;

    let Some( ( balance, enabled, is_invalid ) ) = outcome.apply_to( credential.balance )
    else { return Json( credential ).into_response() };

    state.cache.queue_update_credential(
      key.clone(),
      vec!
      [
        ( "balance".to_string(), SqlValue::Real( balance ) ),
        ( "enabled".to_string(), SqlValue::Bool( enabled ) ),
        ( "is_invalid".to_string(), SqlValue::Bool( is_invalid ) ),
      ],
    ).await;

    Json( Credential { key, balance, enabled, is_invalid, ..credential } ).into_response()
  }

  async fn refresh_all( State( state ) : State< AppState >, headers : HeaderMap ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let Ok( credentials ) = state.store.all_credentials().await
    else { return server_error_msg( "could not list credentials" ) };

    let client = reqwest::Client::new();
    let probes = credentials.into_iter().map( | credential |
    {
      let client = client.clone();
      async move
      {
        let outcome = validator::validate( &client, UPSTREAM_BASE, &credential.key ).await;
        ( credential, outcome )
      }
    } );

    let results = futures_util::future::join_all( probes ).await;
    let mut refreshed = 0usize;

    for ( credential, outcome ) in results
    {
      let Some( ( balance, enabled, is_invalid ) ) = outcome.apply_to( credential.balance )
      else { continue };

      state.cache.queue_update_credential(
        credential.key,
        vec!
        [
          ( "balance".to_string(), SqlValue::Real( balance ) ),
          ( "enabled".to_string(), SqlValue::Bool( enabled ) ),
          ( "is_invalid".to_string(), SqlValue::Bool( is_invalid ) ),
        ],
      ).await;
      refreshed += 1;
    }

    Json( serde_json::json!( { "refreshed" : refreshed } ) ).into_response()
  }

  // ---- export -------------------------------------------------------------

  #[ derive( Debug, Deserialize ) ]
  struct ExportParams
  {
    #[ serde( default = "default_format" ) ]
    format : String,
  }

  fn default_format() -> String { "line".to_string() }

  async fn export_credentials(
    State( state ) : State< AppState >,
    headers : HeaderMap,
    Query( params ) : Query< ExportParams >,
  ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let Ok( credentials ) = state.store.all_credentials().await
    else { return server_error_msg( "could not list credentials" ) };

    let body = match params.format.as_str()
    {
      "line_balance" => credentials.iter().map( | c | format!( "{}:{}", c.key, c.balance ) ).collect::< Vec< _ > >().join( "\n" ),
      "csv" =>
      {
        let mut out = "key,balance,usage_count,enabled,is_invalid\n".to_string();
        for c in &credentials
        {
          out.push_str( &format!( "{},{},{},{},{}\n", c.key, c.balance, c.usage_count, c.enabled, c.is_invalid ) );
        }
        out
      }
      _ => credentials.iter().map( | c | c.key.clone() ).collect::< Vec< _ > >().join( "\n" ),
    };

    ( StatusCode::OK, [ ( axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8" ) ], body ).into_response()
  }

  // ---- stats ----------------------------------------------------------------

  #[ derive( Debug, Serialize ) ]
  struct Stats
  {
    total_credentials : usize,
    enabled_credentials : usize,
    invalid_credentials : usize,
    total_balance : f64,
    total_calls : usize,
  }

  async fn stats( State( state ) : State< AppState >, headers : HeaderMap ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let Ok( credentials ) = state.store.all_credentials().await
    else { return server_error_msg( "could not list credentials" ) };

    let Ok( logs ) = state.store.logs( None, None ).await
    else { return server_error_msg( "could not list call log" ) };

    let stats = Stats
    {
      total_credentials : credentials.len(),
      enabled_credentials : credentials.iter().filter( | c | c.enabled ).count(),
      invalid_credentials : credentials.iter().filter( | c | c.is_invalid ).count(),
      total_balance : credentials.iter().map( | c | c.balance ).sum(),
      total_calls : logs.len(),
    };

    Json( stats ).into_response()
  }

  // ---- call log ---------------------------------------------------------------

  #[ derive( Debug, Deserialize, Default ) ]
  struct LogParams
  {
    /// `"today"` restricts to calls from the last 24h; `"all"` (default) does not.
    date : Option< String >,
    model : Option< String >,
    endpoint : Option< String >,
  }

  async fn logs( State( state ) : State< AppState >, headers : HeaderMap, Query( params ) : Query< LogParams > ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let Ok( records ) = state.store.logs( params.model.as_deref(), params.endpoint.as_deref() ).await
    else { return server_error_msg( "could not query call log" ) };

    let filtered = if params.date.as_deref() == Some( "today" )
    {
      let cutoff = now_secs() - 86_400.0;
      records.into_iter().filter( | r | r.call_time >= cutoff ).collect()
    }
    else
    {
      records
    };

    Json( filtered ).into_response()
  }

  async fn clear_logs( State( state ) : State< AppState >, headers : HeaderMap ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    match state.store.clear_logs().await
    {
      Ok( () ) => StatusCode::NO_CONTENT.into_response(),
      Err( error ) => server_error( &error ),
    }
  }

  // ---- config admin surface ----------------------------------------------------

  async fn get_config( State( state ) : State< AppState >, headers : HeaderMap ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    Json( state.config.snapshot() ).into_response()
  }

  /// A partial update to the runtime configuration. Every field is
  /// optional so a single call can touch just `strategy`, just the proxy
  /// tokens, just the refresh interval, or just the rate limits — mirroring
  /// the original's separate `/config/strategy`, `/config/custom_api_key`,
  /// `/config/free_model_api_key`, `/config/refresh_interval`, and
  /// `/config/rpm_tpm_limits` routes as one typed endpoint.
  #[ derive( Debug, Default, Deserialize ) ]
  struct ConfigUpdate
  {
    strategy : Option< SelectionStrategy >,
    custom_api_key : Option< String >,
    free_model_api_key : Option< String >,
    refresh_interval : Option< u64 >,
    rpm_limit : Option< u32 >,
    tpm_limit : Option< u32 >,
    admin_username : Option< String >,
    admin_password : Option< String >,
  }

  async fn update_config(
    State( state ) : State< AppState >,
    headers : HeaderMap,
    Json( update ) : Json< ConfigUpdate >,
  ) -> Response
  {
    if !authorized( &headers, &state.config.snapshot() ) { return unauthorized() }

    let result = state.config.update( | config |
    {
      if let Some( strategy ) = update.strategy { config.strategy = strategy }
      if let Some( key ) = update.custom_api_key { config.custom_api_key = key }
      if let Some( key ) = update.free_model_api_key { config.free_model_api_key = key }
      if let Some( interval ) = update.refresh_interval { config.refresh_interval = interval }
      if let Some( rpm ) = update.rpm_limit { config.rpm_limit = rpm }
      if let Some( tpm ) = update.tpm_limit { config.tpm_limit = tpm }
      if let Some( user ) = update.admin_username { config.admin_username = user }
      if let Some( pass ) = update.admin_password { config.admin_password = pass }
    } );

    match result
    {
      Ok( snapshot ) => Json( snapshot ).into_response(),
      Err( error ) => server_error( &error ),
    }
  }

  fn server_error( error : &error_tools::untyped::Error ) -> Response
  {
    ( StatusCode::INTERNAL_SERVER_ERROR, error.to_string() ).into_response()
  }

  fn server_error_msg( message : &str ) -> Response
  {
    ( StatusCode::INTERNAL_SERVER_ERROR, message.to_string() ).into_response()
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

    fn basic_auth_header( user : &str, pass : &str ) -> HeaderMap
    {
      use base64::Engine;
      let encoded = base64::engine::general_purpose::STANDARD.encode( format!( "{user}:{pass}" ) );
      let mut headers = HeaderMap::new();
      headers.insert( axum::http::header::AUTHORIZATION, format!( "Basic {encoded}" ).parse().expect( "header value" ) );
      headers
    }

    #[ test ]
    fn empty_credentials_disable_the_check()
    {
      let config = RuntimeConfig { admin_username : String::new(), admin_password : String::new(), ..RuntimeConfig::default() };
      assert!( authorized( &HeaderMap::new(), &config ) );
    }

    #[ test ]
    fn matching_basic_auth_is_authorized()
    {
      let config = RuntimeConfig { admin_username : "admin".to_string(), admin_password : "hunter2".to_string(), ..RuntimeConfig::default() };
      assert!( authorized( &basic_auth_header( "admin", "hunter2" ), &config ) );
    }

    #[ test ]
    fn wrong_password_is_denied()
    {
      let config = RuntimeConfig { admin_username : "admin".to_string(), admin_password : "hunter2".to_string(), ..RuntimeConfig::default() };
      assert!( !authorized( &basic_auth_header( "admin", "wrong" ), &config ) );
    }

    #[ test ]
    fn missing_header_is_denied_when_credentials_are_configured()
    {
      let config = RuntimeConfig { admin_username : "admin".to_string(), admin_password : "hunter2".to_string(), ..RuntimeConfig::default() };
      assert!( !authorized( &HeaderMap::new(), &config ) );
    }

    #[ test ]
    fn malformed_header_is_denied()
    {
      let config = RuntimeConfig { admin_username : "admin".to_string(), admin_password : "hunter2".to_string(), ..RuntimeConfig::default() };
      let mut headers = HeaderMap::new();
      headers.insert( axum::http::header::AUTHORIZATION, "Bearer not-basic-auth".parse().expect( "header value" ) );
      assert!( !authorized( &headers, &config ) );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    admin_router,
  };
}
