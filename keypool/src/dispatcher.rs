mod private
{
  use crate::cache::{ SqlValue, WriteBehindCache };
  use crate::config::ConfigStore;
  use crate::error::{ PoolError, Result };
  use crate::health_gate::HealthGate;
  use crate::model::{ CallRecord, Credential, SelectionStrategy, Usage };
  use crate::rate_limit::RateLimiter;
  use crate::secret::Secret;
  use crate::selector::Selector;
  use crate::store::Store;
  use crate::validator;
  use bytes::Bytes;
  use std::sync::atomic::{ AtomicUsize, Ordering };
  use std::sync::{ Arc, RwLock };
  use std::time::{ Duration, Instant };
  use tokio::sync::Semaphore;
  use tracing::{ info, warn };

  const MAX_ATTEMPTS : u32 = 8;
  const RETRY_BASE : Duration = Duration::from_millis( 500 );
  const ENQUEUE_TIMEOUT : Duration = Duration::from_secs( 5 );
  const QUEUE_DEADLINE : Duration = Duration::from_secs( 180 );
  const UNARY_TIMEOUT : Duration = Duration::from_secs( 1800 );
  const IMAGE_TIMEOUT : Duration = Duration::from_secs( 120 );
  const FAST_PATH_FRACTION : f64 = 0.2;

  /// Upstream base used by the post-dispatch revalidation probe (§4.6 step 4).
  const UPSTREAM_BASE : &str = "https://api.siliconflow.cn";

  /// The body and relevant metadata of one inbound call, already stripped
  /// of the caller's `Authorization` header (the dispatcher sets its own).
  #[ derive( Debug, Clone ) ]
  pub struct DispatchRequest
  {
    /// Short endpoint tag (e.g. `"chat_completions"`) used for logging and timeouts.
    pub endpoint_tag : String,
    /// The upstream path to call, e.g. `/v1/chat/completions`.
    pub upstream_path : String,
    /// Raw request body bytes, forwarded unchanged.
    pub body : Bytes,
    /// Whether the caller requested a streamed response (`"stream": true`).
    pub is_stream : bool,
    /// Whether the request is flagged free-tier (restricts selection to zero-balance credentials).
    pub free_tier : bool,
    /// HTTP method to use upstream. `GET` for `/v1/models`, `POST` for everything else.
    pub method : reqwest::Method,
    /// Whether credential fallback (disable-and-retry-once on failure) applies to
    /// this request. Scoped to `chat_completions`/`completions`/`embeddings`; every
    /// other endpoint surfaces the failure as-is without touching credential state.
    pub applies_fallback : bool,
  }

  impl DispatchRequest
  {
    /// Builds a `POST` request, the common case for every downstream endpoint except `/v1/models`.
    #[ must_use ]
    pub fn post( endpoint_tag : impl Into< String >, upstream_path : impl Into< String >, body : Bytes, is_stream : bool, free_tier : bool, applies_fallback : bool ) -> Self
    {
      Self { endpoint_tag : endpoint_tag.into(), upstream_path : upstream_path.into(), body, is_stream, free_tier, method : reqwest::Method::POST, applies_fallback }
    }

    /// Builds a `GET` request (used only for `/v1/models`). Fallback never applies.
    #[ must_use ]
    pub fn get( endpoint_tag : impl Into< String >, upstream_path : impl Into< String > ) -> Self
    {
      Self { endpoint_tag : endpoint_tag.into(), upstream_path : upstream_path.into(), body : Bytes::new(), is_stream : false, free_tier : false, method : reqwest::Method::GET, applies_fallback : false }
    }
  }

  /// Result of one dispatched call.
  #[ derive( Debug ) ]
  pub enum DispatchOutcome
  {
    /// A complete, buffered upstream response.
    Unary
    {
      status : u16,
      body : Bytes,
    },
    /// A streamed upstream response, relayed chunk by chunk.
    Streaming
    {
      status : u16,
      chunks : tokio::sync::mpsc::Receiver< Result< Bytes > >,
    },
  }

  /// Admission, queueing, retry, and streaming-forward dispatch (C6).
  ///
  /// Concurrency is bounded by a semaphore of `capacity` permits rather
  /// than a literal consumer-loop-over-a-channel: for a single-process
  /// proxy the two are observationally identical (FIFO-ish waiting,
  /// bounded concurrency, a timeout on the wait) and the semaphore avoids
  /// an extra actor task and its associated shutdown bookkeeping.
  #[ derive( Debug ) ]
  pub struct Dispatcher
  {
    store : Store,
    cache : WriteBehindCache,
    selector : Selector,
    limiter : Arc< RateLimiter >,
    config : Arc< ConfigStore >,
    client : RwLock< reqwest::Client >,
    permits : Arc< Semaphore >,
    capacity : usize,
    in_flight : Arc< AtomicUsize >,
    health : Arc< HealthGate >,
  }

  impl Dispatcher
  {
    /// Builds a dispatcher with `capacity` max concurrent upstream calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the default HTTP client cannot be built.
    pub fn new(
      store : Store,
      cache : WriteBehindCache,
      limiter : Arc< RateLimiter >,
      config : Arc< ConfigStore >,
      health : Arc< HealthGate >,
      capacity : usize,
    ) -> Result< Self >
    {
      Ok( Self
      {
        store,
        cache,
        selector : Selector::new(),
        limiter,
        config,
        client : RwLock::new( build_client()? ),
        permits : Arc::new( Semaphore::new( capacity ) ),
        capacity,
        in_flight : Arc::new( AtomicUsize::new( 0 ) ),
        health,
      } )
    }

    /// Replaces the shared HTTP transport with a freshly built client.
    ///
    /// Called periodically by the connection-pool janitor task to bound
    /// idle-connection growth, and internally on the "EOF"-flavored retry
    /// path to avoid reusing a poisoned pooled connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the new client cannot be built.
    pub fn rotate_client( &self ) -> Result< () >
    {
      let fresh = build_client()?;
      *self.client.write().expect( "client lock poisoned" ) = fresh;
      info!( "connection pool janitor rotated the shared http client" );
      Ok( () )
    }

    /// Dispatches one request end-to-end: admission, credential selection,
    /// upstream call with retry, usage extraction, and logging.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoCredentialAvailable`], [`PoolError::QueueTimeout`],
    /// or the terminal upstream error after retries are exhausted.
    pub async fn dispatch( &self, request : DispatchRequest ) -> Result< DispatchOutcome >
    {
      if !self.health.is_healthy()
      {
        tokio::time::sleep( Duration::from_millis( 200 ) ).await;
      }

      let enqueued_at = Instant::now();
      let _permit = self.admit( enqueued_at ).await?;

      self.execute_with_fallback( request ).await
    }

    /// Admits one item, applying §4.6's two independent timeouts: an
    /// `ENQUEUE_TIMEOUT` (~5s) bounding the initial attempt to get a
    /// permit at all (backpressure), and — only if that attempt times
    /// out — a `QUEUE_DEADLINE` (~180s) bounding the *total* time since
    /// `enqueued_at` that the item may continue waiting in queue.
    async fn admit( &self, enqueued_at : Instant ) -> Result< TrackedPermit >
    {
      let fast_path_eligible = ( self.in_flight.load( Ordering::Relaxed ) as f64 ) < ( self.capacity as f64 * FAST_PATH_FRACTION );

      if fast_path_eligible
      {
        if let Ok( permit ) = Arc::clone( &self.permits ).try_acquire_owned()
        {
          self.in_flight.fetch_add( 1, Ordering::Relaxed );
          return Ok( TrackedPermit::new( permit, Arc::clone( &self.in_flight ) ) );
        }
      }

      if let Ok( acquired ) = tokio::time::timeout( ENQUEUE_TIMEOUT, Arc::clone( &self.permits ).acquire_owned() ).await
      {
        let permit = acquired.map_err( | _ | PoolError::QueueTimeout( ENQUEUE_TIMEOUT ) )?;
        self.in_flight.fetch_add( 1, Ordering::Relaxed );
        return Ok( TrackedPermit::new( permit, Arc::clone( &self.in_flight ) ) );
      }

      let remaining = QUEUE_DEADLINE.saturating_sub( enqueued_at.elapsed() );
      if remaining.is_zero()
      {
        return Err( PoolError::QueueTimeout( QUEUE_DEADLINE ).into() );
      }

      let permit = tokio::time::timeout( remaining, Arc::clone( &self.permits ).acquire_owned() ).await
        .map_err( | _ | PoolError::QueueTimeout( QUEUE_DEADLINE ) )?
        .map_err( | _ | PoolError::QueueTimeout( QUEUE_DEADLINE ) )?;

      self.in_flight.fetch_add( 1, Ordering::Relaxed );
      Ok( TrackedPermit::new( permit, Arc::clone( &self.in_flight ) ) )
    }

    /// Executes `request` against a selected credential. Credential fallback —
    /// disabling the failed credential and retrying once against a fresh one
    /// under round-robin — only applies when `request.applies_fallback` is set;
    /// every other endpoint surfaces the first failure untouched.
    async fn execute_with_fallback( &self, request : DispatchRequest ) -> Result< DispatchOutcome >
    {
      let config = self.config.snapshot();

      let Some( credential ) = self.pick_credential( &config, request.free_tier ).await?
      else
      {
        return Err( PoolError::NoCredentialAvailable.into() );
      };

      let outcome = self.execute_with_retry( &request, &credential ).await;

      if !request.applies_fallback
      {
        return outcome;
      }

      match outcome
      {
        Ok( outcome ) => Ok( outcome ),
        Err( error ) =>
        {
          self.disable_or_skip( &credential ).await;

          if config.strategy != SelectionStrategy::RoundRobin
          {
            return Err( error );
          }

          let Some( fresh ) = self.pick_credential( &config, request.free_tier ).await?
          else
          {
            return Err( error );
          };

          self.execute_with_retry( &request, &fresh ).await
        }
      }
    }

    async fn pick_credential( &self, config : &crate::config::RuntimeConfig, free_tier : bool ) -> Result< Option< Credential > >
    {
      let candidates = self.store.enabled_credentials().await?;
      let selected = self.selector.select(
        &candidates,
        config.strategy,
        config.rpm_limit,
        config.tpm_limit,
        free_tier,
        &self.limiter,
      );
      Ok( selected.cloned() )
    }

    async fn disable_or_skip( &self, credential : &Credential )
    {
      if credential.balance <= 0.0
      {
        self.cache.queue_update_credential(
          credential.key.clone(),
          vec!
          [
            ( "enabled".to_string(), SqlValue::Bool( false ) ),
          ],
        ).await;
        warn!( fingerprint = %fingerprint_of( &credential.key ), "disabling credential after upstream failure (balance exhausted)" );
      }
    }

    async fn execute_with_retry( &self, request : &DispatchRequest, credential : &Credential ) -> Result< DispatchOutcome >
    {
      if credential.key.trim().is_empty()
      {
        return Err( PoolError::InvalidCredential( "empty credential".to_string() ).into() );
      }

      self.cache.queue_update_credential(
        credential.key.clone(),
        vec![ ( "usage_count".to_string(), SqlValue::Integer( credential.usage_count + 1 ) ) ],
      ).await;

      let timeout = if request.endpoint_tag == "images_generations" { IMAGE_TIMEOUT } else { UNARY_TIMEOUT };

      let mut attempt = 0u32;
      loop
      {
        attempt += 1;
        let secret = Secret::new( credential.key.clone() )?;

        match self.call_once( request, &secret, timeout ).await
        {
          Ok( outcome ) => return Ok( outcome ),
          Err( error ) =>
          {
            let pool_error = classify( &error );

            if attempt >= MAX_ATTEMPTS || !pool_error.is_retryable()
            {
              return Err( error );
            }

            if matches!( pool_error, PoolError::EofLike( _ ) )
            {
              self.rotate_client()?;
              tokio::time::sleep( RETRY_BASE ).await;
            }
            else
            {
              tokio::time::sleep( RETRY_BASE * attempt ).await;
            }
          }
        }
      }
    }

    async fn call_once( &self, request : &DispatchRequest, credential : &Secret, timeout : Duration ) -> Result< DispatchOutcome >
    {
      let client = self.client.read().expect( "client lock poisoned" ).clone();
      let url = format!( "https://api.siliconflow.cn{}", request.upstream_path );

      let response = client
        .request( request.method.clone(), &url )
        .bearer_auth( credential.expose_secret() )
        .header( reqwest::header::CONTENT_TYPE, "application/json" )
        .timeout( timeout )
        .body( request.body.clone() )
        .send()
        .await
        .map_err( PoolError::from )?;

      let status = response.status().as_u16();

      if request.is_stream
      {
        Ok( self.relay_stream( response, status, request, credential ).await )
      }
      else
      {
        let body = response.bytes().await.map_err( PoolError::from )?;
        self.record_unary_usage( &body, request, credential );
        Ok( DispatchOutcome::Unary { status, body } )
      }
    }

    async fn relay_stream( &self, response : reqwest::Response, status : u16, request : &DispatchRequest, credential : &Secret ) -> DispatchOutcome
    {
      use futures_util::StreamExt;

      let ( tx, rx ) = tokio::sync::mpsc::channel( 32 );
      let mut upstream = response.bytes_stream();
      let endpoint_tag = request.endpoint_tag.clone();
      let used_key = credential_key_of( credential );
      let model = extract_model( &request.body );
      let store = self.store.clone();
      let cache = self.cache.clone();
      let limiter = Arc::clone( &self.limiter );
      let client_for_revalidation = self.client.read().expect( "client lock poisoned" ).clone();

      tokio::spawn( async move
      {
        let mut last_usage = Usage::default();

        while let Some( chunk ) = upstream.next().await
        {
          match chunk
          {
            Ok( bytes ) =>
            {
              if let Some( usage ) = parse_sse_usage( &bytes )
              {
                last_usage = usage;
              }
              if tx.send( Ok( bytes ) ).await.is_err()
              {
                return;
              }
            }
            Err( error ) =>
            {
              let _ = tx.send( Err( PoolError::EofLike( error.to_string() ).into() ) ).await;
              return;
            }
          }
        }

        log_completion( &store, &cache, &limiter, &used_key, &model, &endpoint_tag, last_usage ).await;
        schedule_revalidation( store, cache, client_for_revalidation, used_key ).await;
      } );

      let _ = status;
      DispatchOutcome::Streaming { status, chunks : rx }
    }

    fn record_unary_usage( &self, body : &Bytes, request : &DispatchRequest, credential : &Secret )
    {
      let usage = extract_unary_usage( body, &request.endpoint_tag );
      let used_key = credential_key_of( credential );
      let model = extract_model( &request.body );
      let store = self.store.clone();
      let cache = self.cache.clone();
      let limiter = Arc::clone( &self.limiter );
      let endpoint_tag = request.endpoint_tag.clone();
      let client_for_revalidation = self.client.read().expect( "client lock poisoned" ).clone();

      tokio::spawn( async move
      {
        log_completion( &store, &cache, &limiter, &used_key, &model, &endpoint_tag, usage ).await;
        schedule_revalidation( store, cache, client_for_revalidation, used_key ).await;
      } );
    }
  }

  /// Fire-and-forget revalidation of the credential just used, per §4.6
  /// step 4: a successful call is a good moment to refresh its balance and
  /// enabled/invalid state without waiting for the next scheduled sweep.
  async fn schedule_revalidation( store : Store, cache : WriteBehindCache, client : reqwest::Client, key : String )
  {
    let current_balance = match store.credential( &key ).await
    {
      Ok( Some( credential ) ) => credential.balance,
      _ => return,
    };

    let outcome = validator::validate( &client, UPSTREAM_BASE, &key ).await;

    let Some( ( balance, enabled, is_invalid ) ) = outcome.apply_to( current_balance )
    else { return };

    cache.queue_update_credential(
      key,
      vec!
      [
        ( "balance".to_string(), SqlValue::Real( balance ) ),
        ( "enabled".to_string(), SqlValue::Bool( enabled ) ),
        ( "is_invalid".to_string(), SqlValue::Bool( is_invalid ) ),
      ],
    ).await;
  }

  async fn log_completion(
    _store : &Store,
    cache : &WriteBehindCache,
    limiter : &RateLimiter,
    used_key : &str,
    model : &str,
    endpoint_tag : &str,
    usage : Usage,
  )
  {
    limiter.track( used_key, 1, usage.total_tokens.max( 0 ) as u32 );

    cache.queue_insert_log( CallRecord
    {
      id : None,
      used_key : used_key.to_string(),
      model : model.to_string(),
      api_endpoint : endpoint_tag.to_string(),
      call_time : now_secs(),
      input_tokens : usage.prompt_tokens,
      output_tokens : usage.completion_tokens,
      total_tokens : usage.total_tokens,
    } ).await;
  }

  fn extract_unary_usage( body : &Bytes, endpoint_tag : &str ) -> Usage
  {
    let Ok( json ) = serde_json::from_slice::< serde_json::Value >( body ) else { return Usage::default() };

    if endpoint_tag == "rerank"
    {
      let input = json.pointer( "/meta/tokens/input_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( 0 );
      let output = json.pointer( "/meta/tokens/output_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( 0 );
      return Usage { prompt_tokens : input, completion_tokens : output, total_tokens : input + output };
    }

    let prompt = json.pointer( "/usage/prompt_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( 0 );
    let completion = json.pointer( "/usage/completion_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( 0 );
    let total = json.pointer( "/usage/total_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( prompt + completion );

    Usage { prompt_tokens : prompt, completion_tokens : completion, total_tokens : total }
  }

  /// Opportunistically parses one SSE `data: {json}` frame for a `usage`
  /// object. The upstream protocol's final frame before `[DONE]` carries
  /// cumulative usage; earlier frames typically omit it, so the caller
  /// keeps only the last-seen value.
  fn parse_sse_usage( chunk : &Bytes ) -> Option< Usage >
  {
    let text = std::str::from_utf8( chunk ).ok()?;

    for line in text.lines()
    {
      let Some( payload ) = line.strip_prefix( "data: " ) else { continue };
      if payload.trim() == "[DONE]"
      {
        continue;
      }
      if let Ok( json ) = serde_json::from_str::< serde_json::Value >( payload )
      {
        let usage = json.get( "usage" )?;
        let prompt = usage.get( "prompt_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( 0 );
        let completion = usage.get( "completion_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( 0 );
        let total = usage.get( "total_tokens" ).and_then( serde_json::Value::as_i64 ).unwrap_or( prompt + completion );
        return Some( Usage { prompt_tokens : prompt, completion_tokens : completion, total_tokens : total } );
      }
    }

    None
  }

  fn extract_model( body : &Bytes ) -> String
  {
    serde_json::from_slice::< serde_json::Value >( body )
      .ok()
      .and_then( | json | json.get( "model" ).and_then( serde_json::Value::as_str ).map( str::to_string ) )
      .unwrap_or_else( || "unknown".to_string() )
  }

  fn credential_key_of( secret : &Secret ) -> String
  {
    // The dispatcher only ever holds a `Secret` derived directly from a
    // `Credential::key`; re-deriving the fingerprint here keeps call
    // records keyed by the full credential as stored, not the redacted form.
    secret.expose_secret().to_string()
  }

  fn fingerprint_of( key : &str ) -> String
  {
    let take = key.char_indices().nth( 8 ).map_or( key.len(), | ( i, _ ) | i );
    format!( "{}***", &key[ ..take ] )
  }

  fn classify( error : &error_tools::untyped::Error ) -> PoolError
  {
    error
      .downcast_ref::< PoolError >()
      .cloned()
      .unwrap_or_else( || PoolError::TransientUpstream( error.to_string() ) )
  }

  fn build_client() -> Result< reqwest::Client >
  {
    Ok(
      reqwest::Client::builder()
        .pool_max_idle_per_host( 64 )
        .tcp_keepalive( Duration::from_secs( 60 ) )
        .build()?
    )
  }

  fn now_secs() -> f64
  {
    std::time::SystemTime::now()
      .duration_since( std::time::UNIX_EPOCH )
      .map( | d | d.as_secs_f64() )
      .unwrap_or( 0.0 )
  }

  /// Holds a semaphore permit and decrements the shared in-flight gauge
  /// when dropped, so `admit`'s fast-path eligibility check reflects calls
  /// actually in progress rather than a monotonically growing count.
  #[ derive( Debug ) ]
  struct TrackedPermit
  {
    _permit : tokio::sync::OwnedSemaphorePermit,
    in_flight : Arc< AtomicUsize >,
  }

  impl TrackedPermit
  {
    fn new( permit : tokio::sync::OwnedSemaphorePermit, in_flight : Arc< AtomicUsize > ) -> Self
    {
      Self { _permit : permit, in_flight }
    }
  }

  impl Drop for TrackedPermit
  {
    fn drop( &mut self )
    {
      self.in_flight.fetch_sub( 1, Ordering::Relaxed );
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn extract_unary_usage_reads_chat_style_usage_block()
    {
      let body = Bytes::from_static( br#"{"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"# );
      let usage = extract_unary_usage( &body, "chat_completions" );
      assert_eq!( usage, Usage { prompt_tokens : 10, completion_tokens : 5, total_tokens : 15 } );
    }

    #[ test ]
    fn extract_unary_usage_derives_total_when_absent()
    {
      let body = Bytes::from_static( br#"{"usage":{"prompt_tokens":10,"completion_tokens":5}}"# );
      let usage = extract_unary_usage( &body, "completions" );
      assert_eq!( usage.total_tokens, 15 );
    }

    #[ test ]
    fn extract_unary_usage_reads_rerank_style_meta_block()
    {
      let body = Bytes::from_static( br#"{"meta":{"tokens":{"input_tokens":7,"output_tokens":3}}}"# );
      let usage = extract_unary_usage( &body, "rerank" );
      assert_eq!( usage, Usage { prompt_tokens : 7, completion_tokens : 3, total_tokens : 10 } );
    }

    #[ test ]
    fn extract_unary_usage_defaults_on_malformed_body()
    {
      let body = Bytes::from_static( b"not json at all" );
      assert_eq!( extract_unary_usage( &body, "chat_completions" ), Usage::default() );
    }

    #[ test ]
    fn parse_sse_usage_finds_the_usage_frame_and_ignores_done()
    {
      let chunk = Bytes::from_static(
        b"data: {\"choices\":[]}\n\ndata: {\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":4,\"total_tokens\":6}}\n\ndata: [DONE]\n\n"
      );
      let usage = parse_sse_usage( &chunk ).expect( "usage frame" );
      assert_eq!( usage, Usage { prompt_tokens : 2, completion_tokens : 4, total_tokens : 6 } );
    }

    #[ test ]
    fn parse_sse_usage_returns_none_without_a_usage_field()
    {
      let chunk = Bytes::from_static( b"data: {\"choices\":[]}\n\ndata: [DONE]\n\n" );
      assert!( parse_sse_usage( &chunk ).is_none() );
    }

    #[ test ]
    fn extract_model_reads_the_model_field()
    {
      let body = Bytes::from_static( br#"{"model":"deepseek-chat","messages":[]}"# );
      assert_eq!( extract_model( &body ), "deepseek-chat" );
    }

    #[ test ]
    fn extract_model_falls_back_to_unknown()
    {
      let body = Bytes::from_static( b"{}" );
      assert_eq!( extract_model( &body ), "unknown" );
    }

    #[ test ]
    fn classify_downcasts_a_typed_pool_error()
    {
      let error : error_tools::untyped::Error = PoolError::EofLike( "reset".to_string() ).into();
      assert!( matches!( classify( &error ), PoolError::EofLike( _ ) ) );
    }

    #[ test ]
    fn fingerprint_of_never_reveals_more_than_eight_characters()
    {
      assert_eq!( fingerprint_of( "sk-abcdefghijklmnop" ), "sk-abcde***" );
      assert_eq!( fingerprint_of( "sk-ab" ), "sk-ab***" );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    DispatchRequest,
    DispatchOutcome,
    Dispatcher,
  };
}
