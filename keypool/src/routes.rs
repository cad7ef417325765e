mod private
{
  //! Downstream data-plane handlers (§6 "Downstream HTTP endpoints").
  //!
  //! Every handler here does the same four things: check inbound auth,
  //! decide streaming vs unary from the caller's own body, hand the raw
  //! bytes to [`crate::dispatcher::Dispatcher`] unchanged, and translate
  //! whatever comes back into an axum response. None of them parse or
  //! transform the body beyond sniffing a `"stream"` field.

  use crate::auth::{ self, Admission };
  use crate::dispatcher::{ DispatchOutcome, DispatchRequest };
  use crate::error::PoolError;
  use crate::state::AppState;
  use axum::extract::State;
  use axum::http::{ HeaderMap, StatusCode };
  use axum::response::{ IntoResponse, Response };
  use axum::routing::{ get, post };
  use axum::Router;
  use bytes::Bytes;

  /// Builds the router for every downstream (non-admin) endpoint.
  #[ must_use ]
  pub fn data_plane_router() -> Router< AppState >
  {
    Router::new()
      .route( "/health", get( health ) )
      .route( "/v1/chat/completions", post( chat_completions ) )
      .route( "/v1/completions", post( completions ) )
      .route( "/v1/embeddings", post( embeddings ) )
      .route( "/v1/rerank", post( rerank ) )
      .route( "/v1/images/generations", post( images_generations ) )
      .route( "/v1/models", get( models ) )
  }

  async fn health() -> StatusCode
  {
    StatusCode::OK
  }

  async fn chat_completions( State( state ) : State< AppState >, headers : HeaderMap, body : Bytes ) -> Response
  {
    dispatch_proxied( &state, &headers, body, "chat_completions", "/v1/chat/completions", true, true ).await
  }

  async fn completions( State( state ) : State< AppState >, headers : HeaderMap, body : Bytes ) -> Response
  {
    dispatch_proxied( &state, &headers, body, "completions", "/v1/completions", true, true ).await
  }

  async fn embeddings( State( state ) : State< AppState >, headers : HeaderMap, body : Bytes ) -> Response
  {
    dispatch_proxied( &state, &headers, body, "embeddings", "/v1/embeddings", false, true ).await
  }

  /// Credential fallback does not apply here (§6): a rerank failure surfaces directly.
  async fn rerank( State( state ) : State< AppState >, headers : HeaderMap, body : Bytes ) -> Response
  {
    dispatch_proxied( &state, &headers, body, "rerank", "/v1/rerank", false, false ).await
  }

  /// Credential fallback does not apply here (§6): an image-generation failure surfaces directly.
  async fn images_generations( State( state ) : State< AppState >, headers : HeaderMap, body : Bytes ) -> Response
  {
    dispatch_proxied( &state, &headers, body, "images_generations", "/v1/images/generations", false, false ).await
  }

  async fn models( State( state ) : State< AppState >, headers : HeaderMap ) -> Response
  {
    let admission = auth::check( bearer_of( &headers ).as_deref(), &state.config.snapshot() );
    if matches!( admission, Admission::Denied )
    {
      return ( StatusCode::FORBIDDEN, "missing or invalid credential" ).into_response();
    }

    let request = DispatchRequest::get( "models", "/v1/models" );
    dispatch( &state, request ).await
  }

  async fn dispatch_proxied(
    state : &AppState,
    headers : &HeaderMap,
    body : Bytes,
    endpoint_tag : &str,
    upstream_path : &str,
    allow_stream : bool,
    applies_fallback : bool,
  ) -> Response
  {
    let admission = auth::check( bearer_of( headers ).as_deref(), &state.config.snapshot() );
    let free_tier = match admission
    {
      Admission::Denied => return ( StatusCode::FORBIDDEN, "missing or invalid credential" ).into_response(),
      Admission::AllowedFreeTier => true,
      Admission::Allowed => false,
    };

    if body.is_empty()
    {
      return ( StatusCode::BAD_REQUEST, "empty request body" ).into_response();
    }

    let is_stream = allow_stream && requests_streaming( &body );
    let request = DispatchRequest::post( endpoint_tag, upstream_path, body, is_stream, free_tier, applies_fallback );
    dispatch( state, request ).await
  }

  async fn dispatch( state : &AppState, request : DispatchRequest ) -> Response
  {
    #[ cfg( feature = "performance_metrics" ) ]
    let mut timer = crate::metrics::RequestTimer::start( &state.metrics, request.endpoint_tag.clone() );

    match state.dispatcher.dispatch( request ).await
    {
      Ok( outcome ) => outcome_response( outcome ),
      Err( error ) =>
      {
        #[ cfg( feature = "performance_metrics" ) ]
        {
          state.metrics.record_error( error_kind( &error ) );
          timer.cancel();
        }
        error_response( &error )
      }
    }
  }

  /// Short classification tag for the `performance_metrics` error counter.
  #[ cfg( feature = "performance_metrics" ) ]
  fn error_kind( error : &error_tools::untyped::Error ) -> &'static str
  {
    match error.downcast_ref::< PoolError >()
    {
      Some( PoolError::InvalidCredential( _ ) ) => "invalid_credential",
      Some( PoolError::TransientUpstream( _ ) ) => "transient_upstream",
      Some( PoolError::EofLike( _ ) ) => "eof_like",
      Some( PoolError::NoCredentialAvailable ) => "no_credential_available",
      Some( PoolError::QueueTimeout( _ ) ) => "queue_timeout",
      Some( PoolError::ClientDisconnect ) => "client_disconnect",
      Some( PoolError::PersistenceFailure( _ ) ) => "persistence_failure",
      _ => "other",
    }
  }

  fn bearer_of( headers : &HeaderMap ) -> Option< String >
  {
    headers
      .get( axum::http::header::AUTHORIZATION )
      .and_then( | value | value.to_str().ok() )
      .and_then( | value | value.strip_prefix( "Bearer " ) )
      .map( str::to_string )
  }

  /// Sniffs the caller's own body for `"stream": true`, without otherwise
  /// interpreting it — a malformed or non-JSON body is simply treated as
  /// non-streaming and passed upstream verbatim either way.
  fn requests_streaming( body : &Bytes ) -> bool
  {
    serde_json::from_slice::< serde_json::Value >( body )
      .ok()
      .and_then( | json | json.get( "stream" ).and_then( serde_json::Value::as_bool ) )
      .unwrap_or( false )
  }

  fn outcome_response( outcome : DispatchOutcome ) -> Response
  {
    match outcome
    {
      DispatchOutcome::Unary { status, body } =>
      {
        let status = StatusCode::from_u16( status ).unwrap_or( StatusCode::INTERNAL_SERVER_ERROR );
        ( status, body ).into_response()
      }
      DispatchOutcome::Streaming { status, chunks } =>
      {
        let status = StatusCode::from_u16( status ).unwrap_or( StatusCode::INTERNAL_SERVER_ERROR );
        let stream = futures_util::stream::unfold( chunks, | mut rx | async move
        {
          rx.recv().await.map( | item |
          {
            let mapped = item.map_err( | error | std::io::Error::other( error.to_string() ) );
            ( mapped, rx )
          } )
        } );
        let body = axum::body::Body::from_stream( stream );
        ( status, [ ( axum::http::header::CONTENT_TYPE, "text/event-stream" ) ], body ).into_response()
      }
    }
  }

  /// Maps a surfaced dispatch failure onto §6's status-code table.
  fn error_response( error : &error_tools::untyped::Error ) -> Response
  {
    let status = match error.downcast_ref::< PoolError >()
    {
      Some( PoolError::NoCredentialAvailable ) => StatusCode::INTERNAL_SERVER_ERROR,
      Some( PoolError::QueueTimeout( _ ) ) => StatusCode::SERVICE_UNAVAILABLE,
      Some( PoolError::ClientDisconnect ) => StatusCode::from_u16( 499 ).unwrap_or( StatusCode::INTERNAL_SERVER_ERROR ),
      Some( PoolError::InvalidCredential( _ ) ) => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ( status, error.to_string() ).into_response()
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn requests_streaming_reads_the_stream_flag()
    {
      assert!( requests_streaming( &Bytes::from_static( br#"{"stream":true}"# ) ) );
      assert!( !requests_streaming( &Bytes::from_static( br#"{"stream":false}"# ) ) );
      assert!( !requests_streaming( &Bytes::from_static( br#"{"model":"x"}"# ) ) );
      assert!( !requests_streaming( &Bytes::from_static( b"not json" ) ) );
    }

    #[ test ]
    fn bearer_of_strips_the_bearer_prefix()
    {
      let mut headers = HeaderMap::new();
      headers.insert( axum::http::header::AUTHORIZATION, "Bearer sk-abc".parse().expect( "header value" ) );
      assert_eq!( bearer_of( &headers ), Some( "sk-abc".to_string() ) );
    }

    #[ test ]
    fn bearer_of_is_none_without_the_header()
    {
      assert_eq!( bearer_of( &HeaderMap::new() ), None );
    }

    #[ test ]
    fn error_response_maps_pool_errors_to_the_documented_status_codes()
    {
      let cases : &[ ( PoolError, StatusCode ) ] =
      &[
        ( PoolError::NoCredentialAvailable, StatusCode::INTERNAL_SERVER_ERROR ),
        ( PoolError::QueueTimeout( std::time::Duration::from_secs( 1 ) ), StatusCode::SERVICE_UNAVAILABLE ),
        ( PoolError::ClientDisconnect, StatusCode::from_u16( 499 ).expect( "valid code" ) ),
        ( PoolError::InvalidCredential( "bad".to_string() ), StatusCode::BAD_REQUEST ),
        ( PoolError::Http( "boom".to_string() ), StatusCode::INTERNAL_SERVER_ERROR ),
      ];

      for ( pool_error, expected ) in cases
      {
        let error : error_tools::untyped::Error = pool_error.clone().into();
        let response = error_response( &error );
        assert_eq!( response.status(), *expected );
      }
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    data_plane_router,
  };
}
