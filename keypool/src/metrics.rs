mod private
{
  //! Prometheus metrics for the proxy's request surface (admin `/metrics`).
  //!
  //! Grounded on the shape of a client-side metrics collector found
  //! elsewhere in the pack's sibling crates: one process-wide
  //! [`prometheus::Registry`], a handful of counters/histograms, and a
  //! text-format `export()` for scraping. Here it counts the dispatcher's
  //! own request surface rather than an upstream client's, since the
  //! proxy is the thing being scraped.

  #[ cfg( feature = "performance_metrics" ) ]
  use prometheus::{ Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry };
  use std::time::{ Duration, Instant };

  /// Process-wide metrics registry for the dispatcher and credential pool.
  #[ cfg( feature = "performance_metrics" ) ]
  #[ derive( Debug ) ]
  pub struct PoolMetrics
  {
    registry : Registry,
    requests_total : CounterVec,
    requests_duration : Histogram,
    tokens_total : Counter,
    errors_total : CounterVec,
    credentials_enabled : Gauge,
    credentials_invalid : Gauge,
  }

  #[ cfg( feature = "performance_metrics" ) ]
  impl PoolMetrics
  {
    /// Builds a fresh registry with every metric registered.
    ///
    /// # Panics
    ///
    /// Panics if a metric fails to register, which only happens on a
    /// duplicate metric name within the same registry.
    #[ must_use ]
    pub fn new() -> Self
    {
      let registry = Registry::new();

      let requests_total = CounterVec::new(
        Opts::new( "keypool_requests_total", "Total dispatched requests by endpoint tag" ),
        &[ "endpoint" ],
      ).expect( "valid metric" );

      let requests_duration = Histogram::with_opts(
        HistogramOpts::new( "keypool_request_duration_seconds", "Upstream call latency" )
      ).expect( "valid metric" );

      let tokens_total = Counter::new( "keypool_tokens_total", "Total tokens accounted across all credentials" )
        .expect( "valid metric" );

      let errors_total = CounterVec::new(
        Opts::new( "keypool_errors_total", "Total dispatch failures by classification" ),
        &[ "kind" ],
      ).expect( "valid metric" );

      let credentials_enabled = Gauge::new( "keypool_credentials_enabled", "Number of currently enabled credentials" )
        .expect( "valid metric" );
      let credentials_invalid = Gauge::new( "keypool_credentials_invalid", "Number of credentials marked invalid" )
        .expect( "valid metric" );

      registry.register( Box::new( requests_total.clone() ) ).expect( "unique metric name" );
      registry.register( Box::new( requests_duration.clone() ) ).expect( "unique metric name" );
      registry.register( Box::new( tokens_total.clone() ) ).expect( "unique metric name" );
      registry.register( Box::new( errors_total.clone() ) ).expect( "unique metric name" );
      registry.register( Box::new( credentials_enabled.clone() ) ).expect( "unique metric name" );
      registry.register( Box::new( credentials_invalid.clone() ) ).expect( "unique metric name" );

      Self { registry, requests_total, requests_duration, tokens_total, errors_total, credentials_enabled, credentials_invalid }
    }

    /// Records one completed dispatch.
    pub fn record_request( &self, endpoint_tag : &str, duration : Duration, tokens : i64 )
    {
      self.requests_total.with_label_values( &[ endpoint_tag ] ).inc();
      self.requests_duration.observe( duration.as_secs_f64() );
      if tokens > 0
      {
        self.tokens_total.inc_by( tokens as f64 );
      }
    }

    /// Records one dispatch failure, tagged by its [`crate::error::PoolError`] kind.
    pub fn record_error( &self, kind : &str )
    {
      self.errors_total.with_label_values( &[ kind ] ).inc();
    }

    /// Updates the credential-pool gauges from a fresh count.
    pub fn set_credential_counts( &self, enabled : usize, invalid : usize )
    {
      self.credentials_enabled.set( enabled as f64 );
      self.credentials_invalid.set( invalid as f64 );
    }

    /// Renders every registered metric in Prometheus text exposition format.
    ///
    /// # Panics
    ///
    /// Panics if the encoder produces non-UTF-8 output, which the
    /// Prometheus text encoder never does in practice.
    #[ must_use ]
    pub fn export( &self ) -> String
    {
      use prometheus::Encoder;
      let encoder = prometheus::TextEncoder::new();
      let families = self.registry.gather();
      let mut buffer = Vec::new();
      encoder.encode( &families, &mut buffer ).expect( "prometheus text encoding never fails" );
      String::from_utf8( buffer ).expect( "prometheus text encoder emits utf-8" )
    }
  }

  #[ cfg( feature = "performance_metrics" ) ]
  impl Default for PoolMetrics
  {
    fn default() -> Self
    {
      Self::new()
    }
  }

  /// RAII timer that records one request's duration on drop, unless cancelled.
  #[ cfg( feature = "performance_metrics" ) ]
  #[ derive( Debug ) ]
  pub struct RequestTimer< 'm >
  {
    metrics : &'m PoolMetrics,
    endpoint_tag : String,
    start : Instant,
    tokens : i64,
    cancelled : bool,
  }

  #[ cfg( feature = "performance_metrics" ) ]
  impl< 'm > RequestTimer< 'm >
  {
    /// Starts timing one dispatch against `endpoint_tag`.
    #[ must_use ]
    pub fn start( metrics : &'m PoolMetrics, endpoint_tag : impl Into< String > ) -> Self
    {
      Self { metrics, endpoint_tag : endpoint_tag.into(), start : Instant::now(), tokens : 0, cancelled : false }
    }

    /// Records the token total observed for this request, if any.
    pub fn set_tokens( &mut self, tokens : i64 )
    {
      self.tokens = tokens;
    }

    /// Suppresses the `record_request` call on drop, for callers that report
    /// failed dispatches through [`PoolMetrics::record_error`] instead.
    pub fn cancel( &mut self )
    {
      self.cancelled = true;
    }
  }

  #[ cfg( feature = "performance_metrics" ) ]
  impl< 'm > Drop for RequestTimer< 'm >
  {
    fn drop( &mut self )
    {
      if !self.cancelled
      {
        self.metrics.record_request( &self.endpoint_tag, self.start.elapsed(), self.tokens );
      }
    }
  }
}

#[ cfg( feature = "performance_metrics" ) ]
crate::mod_interface!
{
  exposed use
  {
    PoolMetrics,
    RequestTimer,
  };
}
