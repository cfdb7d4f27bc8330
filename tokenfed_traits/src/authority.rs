use async_trait::async_trait;

/// An authority that decides whether a presented token is authentic and
/// which caller it identifies
///
/// Implementations are expected to be shared between concurrently executing
/// requests, so verification takes `&self` and must not rely on any state
/// carried over from a previous verification.
#[async_trait]
pub trait Authority: Send + Sync {
    /// The borrowed form of the token being verified
    type Token: ?Sized + Sync;

    /// The verified outcome handed to the protected service
    type Verified;

    /// The error returned when the token is rejected
    type Error;

    /// Verifies the token, returning the verified caller
    async fn verify(&self, token: &Self::Token) -> Result<Self::Verified, Self::Error>;
}

#[async_trait]
impl<A> Authority for std::sync::Arc<A>
where
    A: Authority + ?Sized,
{
    type Token = A::Token;
    type Verified = A::Verified;
    type Error = A::Error;

    async fn verify(&self, token: &Self::Token) -> Result<Self::Verified, Self::Error> {
        A::verify(self, token).await
    }
}
