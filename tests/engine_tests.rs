//! Execution engine tests against a local wiremock server
//!
//! Every test builds its config through the public parsing entry points, so
//! these double as end-to-end checks of the whole pipeline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kurl::config::StreamingBody;
use kurl::transport::{CircuitBreaker, RateLimiter};
use kurl::{
    parse_args, Cancellation, CancellationError, CircuitBreakerTransport, DeadlineSource,
    ExecutionError, Executor, KurlError, MemoryLoader, OutboundRequest, RateLimitedTransport,
    RequestConfig, Transport, TransportError, TransportResponse,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// HELPERS
// =============================================================================

fn config(args: &[&str]) -> RequestConfig {
    parse_args(args).unwrap()
}

fn url(server: &MockServer, route: &str) -> String {
    format!("{}{}", server.uri(), route)
}

/// Always answers 200 and counts calls.
#[derive(Default)]
struct Counting {
    calls: AtomicU32,
}

#[async_trait]
impl Transport for Counting {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransportResponse::from_bytes(
            kurl::transport::StatusCode::OK,
            Default::default(),
            request.url,
            "counted",
        ))
    }
}

// =============================================================================
// RETRIES
// =============================================================================

#[tokio::test]
async fn test_retry_budget_is_exact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let cfg = config(&["--retry", "2", "--retry-delay", "0.01", &url(&server, "/flaky")]);
    let err = Executor::new()
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap_err();

    match &err {
        KurlError::Execution(ExecutionError::RetriesExhausted { attempts, last }) => {
            assert_eq!(*attempts, 3);
            assert!(matches!(
                **last,
                ExecutionError::RetryableStatus { status: 503, .. }
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_retry_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&server)
        .await;

    let cfg = config(&["--retry", "5", "--retry-delay", "0.01", &url(&server, "/")]);
    let response = Executor::new()
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 3);
    assert_eq!(response.text(), "finally");
}

#[tokio::test]
async fn test_no_retry_returns_status_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(1)
        .mount(&server)
        .await;

    let response = Executor::new()
        .execute(&config(&[&url(&server, "/")]), &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 503);
    assert_eq!(response.attempts, 1);
}

#[tokio::test]
async fn test_streamed_upload_is_sent_once() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(body_string("from stdin"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder()
        .loader(MemoryLoader::new().with_stdin("from stdin"))
        .build();
    let cfg = config(&["-T", "-", "--retry", "3", "--retry-delay", "0.01", &url(&server, "/up")]);
    let response = executor.execute(&cfg, &Cancellation::new()).await.unwrap();
    assert_eq!(response.status.as_u16(), 503);
    assert_eq!(response.attempts, 1);
}

// =============================================================================
// DEADLINES AND CANCELLATION
// =============================================================================

#[tokio::test]
async fn test_caller_deadline_wins_over_configured_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let cfg = config(&["-m", "2", &url(&server, "/slow")]);
    let cancel = Cancellation::new().with_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let err = Executor::new().execute(&cfg, &cancel).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        KurlError::Cancellation(CancellationError::DeadlineExceeded {
            origin: DeadlineSource::Caller,
            ..
        })
    ));
    assert!(elapsed >= Duration::from_millis(190), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
}

#[tokio::test]
async fn test_configured_timeout_applies_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let cfg = config(&["-m", "0.2", &url(&server, "/slow")]);
    let started = Instant::now();
    let err = Executor::new()
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KurlError::Cancellation(CancellationError::DeadlineExceeded {
            origin: DeadlineSource::Config,
            ..
        })
    ));
    assert_eq!(err.exit_code(), 28);
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let cfg = config(&[&url(&server, "/slow")]);
    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = Executor::new().execute(&cfg, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        KurlError::Cancellation(CancellationError::Cancelled)
    ));
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn test_cancel_during_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&["--retry", "3", "--retry-delay", "5", &url(&server, "/")]);
    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let err = Executor::new().execute(&cfg, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        KurlError::Cancellation(CancellationError::Cancelled)
    ));
}

// =============================================================================
// REDIRECTS
// =============================================================================

#[tokio::test]
async fn test_redirect_followed_with_location() {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .mount(&server)
        .await;

    let executor = Executor::new();
    let followed = executor
        .execute(&config(&["-L", "-d", "x=1", &url(&server, "/old")]), &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(followed.status.as_u16(), 200);
    assert_eq!(followed.redirects, 1);
    assert_eq!(followed.url.path(), "/new");
    assert_eq!(followed.text(), "moved here");

    let not_followed = executor
        .execute(&config(&[&url(&server, "/old")]), &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(not_followed.status.as_u16(), 302);
    assert_eq!(not_followed.redirects, 0);
}

#[tokio::test]
async fn test_attempts_counted_across_hops() {
    let server = MockServer::start().await;
    Mock::given(path("/start"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/done"))
        .mount(&server)
        .await;
    Mock::given(path("/done"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&server)
        .await;

    let cfg = config(&["-L", "--retry", "2", "--retry-delay", "0.01", &url(&server, "/start")]);
    let response = Executor::new()
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap();

    assert_eq!(response.text(), "done");
    assert_eq!(response.redirects, 1);
    assert_eq!(response.attempts, 3);
}

#[tokio::test]
async fn test_redirect_loop_detected() {
    let server = MockServer::start().await;
    Mock::given(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/b"))
        .mount(&server)
        .await;
    Mock::given(path("/b"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/a"))
        .mount(&server)
        .await;

    let err = Executor::new()
        .execute(&config(&["-L", &url(&server, "/a")]), &Cancellation::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KurlError::Execution(ExecutionError::RedirectLoopExceeded { .. })
    ));
    assert_eq!(err.exit_code(), 47);
}

#[tokio::test]
async fn test_max_redirs_caps_hops() {
    let server = MockServer::start().await;
    for hop in 0..3 {
        Mock::given(path(format!("/hop{hop}")))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", format!("/hop{}", hop + 1)),
            )
            .mount(&server)
            .await;
    }
    Mock::given(path("/hop3"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let executor = Executor::new();
    let capped = executor
        .execute(
            &config(&["-L", "--max-redirs", "2", &url(&server, "/hop0")]),
            &Cancellation::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        capped,
        KurlError::Execution(ExecutionError::RedirectLoopExceeded { max: 2, .. })
    ));

    let enough = executor
        .execute(
            &config(&["-L", "--max-redirs", "3", &url(&server, "/hop0")]),
            &Cancellation::new(),
        )
        .await
        .unwrap();
    assert_eq!(enough.redirects, 3);
}

// =============================================================================
// BODIES, QUERY, HEADERS
// =============================================================================

#[tokio::test]
async fn test_get_mode_moves_data_to_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust lang"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&[
        "-G",
        "--data-urlencode",
        "q=rust lang",
        "-d",
        "page=2",
        &url(&server, "/search"),
    ]);
    let response = Executor::new()
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn test_json_body_sets_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/json"))
        .and(header("accept", "application/json"))
        .and(body_string(r#"{"name":"kurl"}"#))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&["--json", r#"{"name":"kurl"}"#, &url(&server, "/items")]);
    let response = Executor::new()
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_multipart_form_from_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("name=\"title\"\r\n\r\nhello\r\n"))
        .and(body_string_contains("filename=\"notes.txt\""))
        .and(body_string_contains("file contents"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder()
        .loader(MemoryLoader::new().with_file("notes.txt", "file contents"))
        .build();
    let cfg = config(&[
        "-F",
        "title=hello",
        "-F",
        "doc=@notes.txt",
        &url(&server, "/upload"),
    ]);
    let response = executor.execute(&cfg, &Cancellation::new()).await.unwrap();
    assert!(response.is_success());

    let requests = server.received_requests().await.unwrap();
    let content_type = requests[0].headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
}

#[tokio::test]
async fn test_default_user_agent_and_override() {
    let server = MockServer::start().await;
    Mock::given(header("user-agent", kurl::DEFAULT_USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_string("default"))
        .mount(&server)
        .await;
    Mock::given(header("user-agent", "tester/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("custom"))
        .mount(&server)
        .await;

    let executor = Executor::new();
    let plain = executor
        .execute(&config(&[&url(&server, "/")]), &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(plain.text(), "default");

    let custom = executor
        .execute(&config(&["-A", "tester/1", &url(&server, "/")]), &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(custom.text(), "custom");
}

#[tokio::test]
async fn test_response_size_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("0123456789A"))
        .mount(&server)
        .await;

    let executor = Executor::new();
    let err = executor
        .execute(
            &config(&["--max-filesize", "10", &url(&server, "/")]),
            &Cancellation::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KurlError::Execution(ExecutionError::ResponseTooLarge { limit: 10 })
    ));

    let fits = executor
        .execute(
            &config(&["--max-filesize", "11", &url(&server, "/")]),
            &Cancellation::new(),
        )
        .await
        .unwrap();
    assert_eq!(fits.body.len(), 11);
}

// =============================================================================
// COOKIES
// =============================================================================

#[tokio::test]
async fn test_cookies_persist_across_calls() {
    let server = MockServer::start().await;
    Mock::given(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "sid=42; Path=/"))
        .mount(&server)
        .await;
    Mock::given(path("/me"))
        .and(header("cookie", "theme=dark; sid=42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome back"))
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::new();
    let login = executor
        .execute(&config(&[&url(&server, "/login")]), &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(login.cookies.len(), 1);
    assert_eq!(login.cookies[0].name, "sid");

    let me = executor
        .execute(
            &config(&["-b", "theme=dark", &url(&server, "/me")]),
            &Cancellation::new(),
        )
        .await
        .unwrap();
    assert_eq!(me.text(), "welcome back");
}

#[tokio::test]
async fn test_cookie_file_is_sent() {
    let server = MockServer::start().await;
    Mock::given(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let file = "127.0.0.1\tFALSE\t/\tFALSE\t0\tsession\tabc\n";
    let executor = Executor::builder()
        .loader(MemoryLoader::new().with_file("cookies.txt", file))
        .build();
    let response = executor
        .execute(
            &config(&["-b", "cookies.txt", &url(&server, "/")]),
            &Cancellation::new(),
        )
        .await
        .unwrap();
    assert!(response.is_success());
}

// =============================================================================
// VALIDATION AND CUSTOM TRANSPORTS
// =============================================================================

#[tokio::test]
async fn test_plaintext_credentials_never_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cfg = RequestConfig::builder()
        .url(url(&server, "/"))
        .basic_auth("alice", Some("hunter2".to_string()))
        .build();
    let err = Executor::new()
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap_err();
    assert!(matches!(err, KurlError::Validation(_)));
    assert!(!err.to_string().contains("hunter2"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_custom_transport_behind_wrappers() {
    let counting = Arc::new(Counting::default());
    let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(60)));
    let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
    let transport = CircuitBreakerTransport::new(
        RateLimitedTransport::new(Arc::clone(&counting), limiter)
            .with_max_wait(Duration::from_millis(10)),
        breaker,
    );
    let executor = Executor::builder().transport(transport).build();
    let cfg = config(&["https://api.test/"]);

    for _ in 0..2 {
        let response = executor.execute(&cfg, &Cancellation::new()).await.unwrap();
        assert_eq!(response.text(), "counted");
    }
    let err = executor
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("rate limit"));
    assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stream_body_is_sent_once_per_config() {
    let counting = Arc::new(Counting::default());
    let executor = Executor::builder().transport(Arc::clone(&counting)).build();
    let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(bytes::Bytes::from("abc"))]);
    let cfg = RequestConfig::builder()
        .method("POST")
        .url("https://api.test/upload")
        .body_stream(StreamingBody::new(stream))
        .build();

    executor.execute(&cfg, &Cancellation::new()).await.unwrap();
    let err = executor
        .execute(&cfg, &Cancellation::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, KurlError::Execution(ExecutionError::Resource { .. })),
        "{err}"
    );
    assert!(err.to_string().contains("already consumed"));
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
}
