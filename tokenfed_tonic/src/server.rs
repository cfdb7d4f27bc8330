use std::{fmt, future::Future, pin::Pin, time::Duration};

use http::{header, HeaderMap, Request, Response};
use tokenfed::{AuthError, BearerToken, BearerTokenRef, ErrorKind};
use tokenfed_traits::Authority;
use tonic::{Code, Status};
use tower_http::auth::{AsyncAuthorizeRequest, AsyncRequireAuthorizationLayer};

use crate::{util::status_response, TerseErrorHandler, VerboseErrorHandler};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Verifies the bearer token on every inbound call with an authority
///
/// Calls without `authorization: Bearer <token>` metadata, or whose token is
/// refused, never reach the inner service. On success, the verified caller is
/// inserted into the request extensions. Verification is bounded by the
/// call's `grpc-timeout`, when one is given.
pub struct VerifyCaller<A, OnError> {
    authority: A,
    on_error: OnError,
}

impl<A, OnError> Clone for VerifyCaller<A, OnError>
where
    A: Clone,
    OnError: Clone,
{
    #[inline]
    fn clone(&self) -> Self {
        Self {
            authority: self.authority.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<A, OnError> fmt::Debug for VerifyCaller<A, OnError>
where
    A: fmt::Debug,
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VerifyCaller")
            .field("authority", &self.authority)
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl<A, OnError> VerifyCaller<A, OnError> {
    /// Constructs a new verifier
    #[inline]
    pub fn new(authority: A, on_error: OnError) -> Self {
        Self {
            authority,
            on_error,
        }
    }
}

impl<A, OnError, ReqBody> AsyncAuthorizeRequest<ReqBody> for VerifyCaller<A, OnError>
where
    A: Authority<Token = BearerTokenRef, Error = AuthError> + Clone + 'static,
    A::Verified: Clone + Send + Sync + 'static,
    OnError: OnAuthError + Clone + Send + Sync + 'static,
    OnError::Body: Send + 'static,
    ReqBody: Send + 'static,
{
    type RequestBody = ReqBody;
    type ResponseBody = OnError::Body;
    type Future = BoxFuture<Result<Request<ReqBody>, Response<OnError::Body>>>;

    fn authorize(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let authority = self.authority.clone();
        let on_error = self.on_error.clone();

        Box::pin(async move {
            let token = match extract_bearer(request.headers()) {
                Some(token) => token,
                None => return Err(reject(&on_error, AuthError::MissingCredentials)),
            };

            let verification = authority.verify(&token);
            let verified = match grpc_timeout(request.headers()) {
                Some(deadline) => match tokio::time::timeout(deadline, verification).await {
                    Ok(result) => result,
                    Err(_) => Err(AuthError::DeadlineExceeded),
                },
                None => verification.await,
            };

            match verified {
                Ok(verified) => {
                    tracing::trace!("caller was verified");
                    request.extensions_mut().insert(verified);
                    Ok(request)
                }
                Err(err) => Err(reject(&on_error, err)),
            }
        })
    }
}

fn reject<OnError: OnAuthError>(on_error: &OnError, error: AuthError) -> Response<OnError::Body> {
    if matches!(
        error.kind(),
        ErrorKind::MissingCredentialsInRequest | ErrorKind::DeadlineExceeded
    ) {
        tracing::info!(
            error.kind = error.kind().as_str(),
            error.message = %error,
            "caller rejected"
        );
    }
    on_error.on_auth_error(&error)
}

/// Wraps [`VerifyCaller`] in a layer suitable for `tonic::transport::Server::layer`
pub fn federated_auth_layer<A, OnError>(
    authority: A,
    on_error: OnError,
) -> AsyncRequireAuthorizationLayer<VerifyCaller<A, OnError>> {
    AsyncRequireAuthorizationLayer::new(VerifyCaller::new(authority, on_error))
}

/// Reads the token from `authorization: Bearer <token>`
///
/// The scheme is matched case-insensitively. Any other scheme, or an empty
/// token, is treated as no credentials at all.
pub fn extract_bearer(headers: &HeaderMap) -> Option<BearerToken> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;

    if auth.len() <= 7 || !auth[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }

    let token = auth[7..].trim();
    if token.is_empty() {
        None
    } else {
        Some(BearerToken::from(token))
    }
}

/// Reads the deadline a caller placed on the call through `grpc-timeout`
///
/// The value is at most eight ASCII digits followed by a unit: `H`ours,
/// `M`inutes, `S`econds, `m`illiseconds, `u`microseconds, or `n`anoseconds.
/// Malformed values are ignored.
pub fn grpc_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("grpc-timeout")?.to_str().ok()?;

    if value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };

    Some(duration)
}

/// The gRPC status code for a failure category
pub const fn code_for(kind: ErrorKind) -> Code {
    match kind {
        ErrorKind::MissingCredentialsInRequest => Code::InvalidArgument,
        ErrorKind::MalformedToken
        | ErrorKind::MissingRoutingKey
        | ErrorKind::UnknownAuthority
        | ErrorKind::AuthorityRejected
        | ErrorKind::InvalidResponse
        | ErrorKind::CredentialUnavailable => Code::Unauthenticated,
        ErrorKind::NetworkError => Code::Unavailable,
        ErrorKind::Unauthorized => Code::PermissionDenied,
        ErrorKind::DeadlineExceeded => Code::DeadlineExceeded,
    }
}

/// Handler for responding to failures while verifying a caller
pub trait OnAuthError {
    /// The body type returned on an error
    type Body;

    /// Response when the caller could not be verified or is not permitted
    fn on_auth_error(&self, error: &AuthError) -> Response<Self::Body>;
}

macro_rules! delegate_impls {
    ($($ty:ty)*) => {
        $(
            impl<T> OnAuthError for $ty
            where
                T: OnAuthError,
            {
                type Body = T::Body;

                fn on_auth_error(&self, error: &AuthError) -> Response<Self::Body> {
                    T::on_auth_error(self, error)
                }
            }
        )*
    }
}

delegate_impls!(
    &'_ T
    Box<T>
    std::sync::Arc<T>
);

impl<ResBody> OnAuthError for TerseErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn on_auth_error(&self, error: &AuthError) -> Response<Self::Body> {
        let kind = error.kind();
        let message = match kind {
            ErrorKind::MissingCredentialsInRequest => "missing bearer credentials",
            ErrorKind::Unauthorized => "caller is not permitted",
            ErrorKind::NetworkError => "token authority unavailable",
            ErrorKind::DeadlineExceeded => "deadline exceeded while verifying caller",
            _ => "caller could not be authenticated",
        };
        tracing::debug!("caller verification failed: {message}");
        status_response(&Status::new(code_for(kind), message))
    }
}

impl<ResBody> OnAuthError for VerboseErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn on_auth_error(&self, error: &AuthError) -> Response<Self::Body> {
        use std::fmt::Write;

        let mut description = String::new();
        let mut err: &dyn std::error::Error = error;
        let _ = write!(&mut description, "{err}");
        while let Some(next) = err.source() {
            let _ = write!(&mut description, ": {next}");
            err = next;
        }
        tracing::debug!("caller verification failed: {description}");
        status_response(&Status::new(code_for(error.kind()), description))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use async_trait::async_trait;
    use http::HeaderValue;
    use tokenfed::{
        policy::Unauthorized, registry::UnknownAuthority, review::ReviewError,
        routing::RoutingError, Identity, RoutingKey,
    };
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Caller(String);

    #[derive(Clone, Debug)]
    enum Outcome {
        Verified(&'static str),
        Rejected(fn() -> AuthError),
        Hang,
    }

    #[derive(Clone, Debug)]
    struct FakeAuthority {
        outcome: Outcome,
        calls: Arc<AtomicUsize>,
    }

    impl FakeAuthority {
        fn new(outcome: Outcome) -> Self {
            Self {
                outcome,
                calls: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Authority for FakeAuthority {
        type Token = BearerTokenRef;
        type Verified = Caller;
        type Error = AuthError;

        async fn verify(&self, token: &BearerTokenRef) -> Result<Caller, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Verified(identity) => Ok(Caller(format!("{identity}:{token:#}"))),
                Outcome::Rejected(err) => Err(err()),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(AuthError::DeadlineExceeded)
                }
            }
        }
    }

    struct Harness {
        authority: FakeAuthority,
        handled: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(outcome: Outcome) -> Self {
            Self {
                authority: FakeAuthority::new(outcome),
                handled: Arc::default(),
            }
        }

        async fn call(&self, request: Request<()>) -> Response<String> {
            let handled = Arc::clone(&self.handled);
            let inner = service_fn(move |req: Request<()>| {
                let handled = Arc::clone(&handled);
                async move {
                    handled.fetch_add(1, Ordering::SeqCst);
                    let caller = req.extensions().get::<Caller>().cloned();
                    let body = caller.map(|c| c.0).unwrap_or_default();
                    Ok::<_, Infallible>(Response::new(format!("hello {body}")))
                }
            });

            ServiceBuilder::new()
                .layer(federated_auth_layer(
                    self.authority.clone(),
                    TerseErrorHandler::<String>::new(),
                ))
                .service(inner)
                .oneshot(request)
                .await
                .unwrap()
        }

        fn verifications(&self) -> usize {
            self.authority.calls.load(Ordering::SeqCst)
        }

        fn handled(&self) -> usize {
            self.handled.load(Ordering::SeqCst)
        }
    }

    fn with_auth(value: &str) -> Request<()> {
        Request::builder()
            .header(header::AUTHORIZATION, value)
            .body(())
            .unwrap()
    }

    fn grpc_code<B>(resp: &Response<B>) -> Option<Code> {
        Status::from_header_map(resp.headers()).map(|s| s.code())
    }

    #[tokio::test]
    async fn verified_caller_reaches_handler_once() {
        let harness = Harness::new(Outcome::Verified("admin"));

        let resp = harness.call(with_auth("Bearer a.b.c")).await;

        assert_eq!(resp.body(), "hello admin:a.b.c");
        assert_eq!(grpc_code(&resp), None);
        assert_eq!(harness.verifications(), 1);
        assert_eq!(harness.handled(), 1);
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let harness = Harness::new(Outcome::Verified("admin"));

        let resp = harness.call(with_auth("bEaReR a.b.c")).await;

        assert_eq!(resp.body(), "hello admin:a.b.c");
    }

    #[tokio::test]
    async fn missing_credentials_are_invalid_argument() {
        let harness = Harness::new(Outcome::Verified("admin"));

        let resp = harness
            .call(Request::builder().body(()).unwrap())
            .await;

        assert_eq!(grpc_code(&resp), Some(Code::InvalidArgument));
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/grpc"))
        );
        assert_eq!(harness.verifications(), 0);
        assert_eq!(harness.handled(), 0);
    }

    #[tokio::test]
    async fn other_schemes_are_missing_credentials() {
        for value in ["Basic YWxhZGRpbjpvcGVuc2VzYW1l", "Bearer ", "Bearer", "a.b.c"] {
            let harness = Harness::new(Outcome::Verified("admin"));

            let resp = harness.call(with_auth(value)).await;

            assert_eq!(grpc_code(&resp), Some(Code::InvalidArgument), "{value}");
            assert_eq!(harness.handled(), 0);
        }
    }

    #[tokio::test]
    async fn failures_map_to_status_codes() {
        let cases: [(fn() -> AuthError, Code); 6] = [
            (
                || AuthError::from(RoutingError::MissingRoutingKey),
                Code::Unauthenticated,
            ),
            (
                || {
                    AuthError::from(UnknownAuthority {
                        key: RoutingKey::from_static("cluster-z"),
                    })
                },
                Code::Unauthenticated,
            ),
            (
                || AuthError::Review {
                    key: RoutingKey::from_static("cluster-a"),
                    source: ReviewError::Rejected { status: None },
                },
                Code::Unauthenticated,
            ),
            (
                || {
                    AuthError::from(Unauthorized {
                        identity: Identity::from_static("system:anonymous"),
                    })
                },
                Code::PermissionDenied,
            ),
            (|| AuthError::DeadlineExceeded, Code::DeadlineExceeded),
            (|| AuthError::MissingCredentials, Code::InvalidArgument),
        ];

        for (err, code) in cases {
            let harness = Harness::new(Outcome::Rejected(err));

            let resp = harness.call(with_auth("Bearer a.b.c")).await;

            assert_eq!(grpc_code(&resp), Some(code));
            assert_eq!(harness.verifications(), 1);
            assert_eq!(harness.handled(), 0);
        }
    }

    #[tokio::test]
    async fn every_call_is_verified() {
        let harness = Harness::new(Outcome::Verified("admin"));

        harness.call(with_auth("Bearer a.b.c")).await;
        harness.call(with_auth("Bearer a.b.c")).await;
        harness.call(with_auth("Bearer a.b.c")).await;

        assert_eq!(harness.verifications(), 3);
        assert_eq!(harness.handled(), 3);
    }

    #[tokio::test]
    async fn verification_is_bounded_by_grpc_timeout() {
        let harness = Harness::new(Outcome::Hang);
        let request = Request::builder()
            .header(header::AUTHORIZATION, "Bearer a.b.c")
            .header("grpc-timeout", "20m")
            .body(())
            .unwrap();

        let resp = harness.call(request).await;

        assert_eq!(grpc_code(&resp), Some(Code::DeadlineExceeded));
        assert_eq!(harness.handled(), 0);
    }

    #[test]
    fn terse_handler_does_not_reveal_details() {
        let err = AuthError::from(Unauthorized {
            identity: Identity::from_static("system:serviceaccount:default:intruder"),
        });

        let resp: Response<String> = TerseErrorHandler::new().on_auth_error(&err);
        let status = Status::from_header_map(resp.headers()).unwrap();

        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(status.message(), "caller is not permitted");
    }

    #[test]
    fn verbose_handler_reports_error_chain() {
        let err = AuthError::from(Unauthorized {
            identity: Identity::from_static("system:serviceaccount:default:intruder"),
        });

        let resp: Response<String> = VerboseErrorHandler::new().on_auth_error(&err);
        let status = Status::from_header_map(resp.headers()).unwrap();

        assert_eq!(
            status.message(),
            "caller is not authorized: identity system:serviceaccount:default:intruder is not permitted"
        );
    }

    #[test]
    fn parses_grpc_timeouts() {
        let cases = [
            ("1H", Some(Duration::from_secs(3600))),
            ("2M", Some(Duration::from_secs(120))),
            ("3S", Some(Duration::from_secs(3))),
            ("400m", Some(Duration::from_millis(400))),
            ("500u", Some(Duration::from_micros(500))),
            ("600n", Some(Duration::from_nanos(600))),
            ("99999999S", Some(Duration::from_secs(99_999_999))),
            ("123456789S", None),
            ("S", None),
            ("10", None),
            ("-1S", None),
            ("+1S", None),
            ("1x", None),
        ];

        for (value, expected) in cases {
            let mut headers = HeaderMap::new();
            headers.insert("grpc-timeout", HeaderValue::from_static(value));

            assert_eq!(grpc_timeout(&headers), expected, "{value}");
        }

        assert_eq!(grpc_timeout(&HeaderMap::new()), None);
    }

    #[test]
    #[tracing_test::traced_test]
    fn bearer_extraction_trims_and_redacts() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer   a.b.c  "),
        );

        let token = extract_bearer(&headers).unwrap();
        tracing::info!(?token, "extracted");

        assert_eq!(token.as_str(), "a.b.c");
        assert!(logs_contain("***BEARER TOKEN***"));
        assert!(!logs_contain("a.b.c"));
    }
}
