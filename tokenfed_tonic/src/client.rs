use std::{
    error, fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::{header, HeaderValue, Request};
use thiserror::Error;
use tokenfed::BearerTokenRef;
use tokenfed_tokens::TokenSource;
use tonic::{metadata::MetadataMap, service::Interceptor, Status};
use tower_layer::Layer;
use tower_service::Service;

type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Indicates that a token cannot be carried in request metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("token contains characters that cannot be sent as metadata")]
pub struct InvalidTokenCharacters;

fn bearer_header(token: &BearerTokenRef) -> Result<HeaderValue, InvalidTokenCharacters> {
    let mut value = HeaderValue::try_from(format!("Bearer {}", token.as_str()))
        .map_err(|_| InvalidTokenCharacters)?;
    value.set_sensitive(true);
    Ok(value)
}

/// Attaches a fixed bearer token to every outbound call
///
/// The token is acquired once, typically at startup. Use [`AttachTokenLayer`]
/// when the token should be requested afresh for every call.
#[derive(Clone)]
pub struct BearerInterceptor {
    value: HeaderValue,
}

impl BearerInterceptor {
    /// Constructs an interceptor for the given token
    pub fn new(token: &BearerTokenRef) -> Result<Self, InvalidTokenCharacters> {
        Ok(Self {
            value: bearer_header(token)?,
        })
    }
}

impl fmt::Debug for BearerInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BearerInterceptor")
            .field("value", &"***BEARER TOKEN***")
            .finish()
    }
}

impl Interceptor for BearerInterceptor {
    fn call(&mut self, request: tonic::Request<()>) -> Result<tonic::Request<()>, Status> {
        let (metadata, extensions, message) = request.into_parts();
        let mut headers = metadata.into_headers();
        headers.insert(header::AUTHORIZATION, self.value.clone());
        Ok(tonic::Request::from_parts(
            MetadataMap::from_headers(headers),
            extensions,
            message,
        ))
    }
}

/// Layer that attaches a token from a [`TokenSource`] to every outbound call
pub struct AttachTokenLayer<S: ?Sized> {
    source: Arc<S>,
}

impl<S: ?Sized> AttachTokenLayer<S> {
    /// Constructs a new layer over a shared token source
    #[inline]
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }
}

impl<S: ?Sized> Clone for AttachTokenLayer<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<S: ?Sized> fmt::Debug for AttachTokenLayer<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AttachTokenLayer").finish_non_exhaustive()
    }
}

impl<Inner, S: ?Sized> Layer<Inner> for AttachTokenLayer<S> {
    type Service = AttachToken<Inner, S>;

    fn layer(&self, inner: Inner) -> Self::Service {
        AttachToken {
            inner,
            source: Arc::clone(&self.source),
        }
    }
}

/// Service that requests a token for every call and attaches it as
/// `authorization: Bearer <token>`
///
/// If no token can be obtained, the call fails with `Unauthenticated` and
/// nothing is sent to the server.
pub struct AttachToken<Inner, S: ?Sized> {
    inner: Inner,
    source: Arc<S>,
}

impl<Inner, S: ?Sized> AttachToken<Inner, S> {
    /// Wraps `inner`, attaching tokens from `source`
    #[inline]
    pub fn new(inner: Inner, source: Arc<S>) -> Self {
        Self { inner, source }
    }
}

impl<Inner: Clone, S: ?Sized> Clone for AttachToken<Inner, S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            source: Arc::clone(&self.source),
        }
    }
}

impl<Inner: fmt::Debug, S: ?Sized> fmt::Debug for AttachToken<Inner, S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AttachToken")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<Inner, S, ReqBody> Service<Request<ReqBody>> for AttachToken<Inner, S>
where
    Inner: Service<Request<ReqBody>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    Inner::Error: Into<BoxError>,
    S: TokenSource + ?Sized + 'static,
    ReqBody: Send + 'static,
{
    type Response = Inner::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        // The ready service is the one that must handle this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let source = Arc::clone(&self.source);

        Box::pin(async move {
            let token = source.request_token().await.map_err(|err| {
                tracing::warn!(
                    error.kind = err.kind().as_str(),
                    error.message = %err,
                    "unable to obtain a token for outbound call"
                );
                Box::new(Status::unauthenticated(err.to_string())) as BoxError
            })?;

            let value = bearer_header(&token)
                .map_err(|err| Box::new(Status::unauthenticated(err.to_string())) as BoxError)?;
            request.headers_mut().insert(header::AUTHORIZATION, value);

            inner.call(request).await.map_err(Into::into)
        })
    }
}
