use std::sync::Arc;

use async_trait::async_trait;
use tokenfed_traits::Policy;

use crate::{
    policy::IdentityPolicy,
    registry::{AuthorityEndpoint, AuthorityResolver, StaticRegistry},
    review::TokenReviewClient,
    routing, AuthError, BearerTokenRef, Identity, IdentityRef, RoutingKey, RoutingKeyRef,
};

/// A caller whose token was verified by its authority and whose identity is
/// permitted by the local policy
///
/// Values of this type are only produced by [`FederatedAuthority`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedCaller {
    routing_key: RoutingKey,
    authority: AuthorityEndpoint,
    identity: Identity,
    uid: Option<String>,
    groups: Vec<String>,
}

impl VerifiedCaller {
    /// The key id that selected the authority
    #[inline]
    pub fn routing_key(&self) -> &RoutingKeyRef {
        &self.routing_key
    }

    /// The authority that verified the token
    #[inline]
    pub fn authority(&self) -> &AuthorityEndpoint {
        &self.authority
    }

    /// The identity reported by the authority
    #[inline]
    pub fn identity(&self) -> &IdentityRef {
        &self.identity
    }

    /// The unique identifier reported by the authority, if any
    #[inline]
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// The groups reported by the authority
    #[inline]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

/// Verifies tokens by asking the authority that issued them
///
/// The authority is chosen by the key id in the token header, looked up in a
/// provisioned registry. The authority's verdict, not the token's contents,
/// decides authenticity. The verified identity must then be permitted by the
/// local [`IdentityPolicy`].
///
/// The configuration is immutable and shared behind an [`Arc`], so clones are
/// cheap and may be used from any number of concurrent requests.
#[derive(Debug)]
pub struct FederatedAuthority<R = StaticRegistry> {
    inner: Arc<Inner<R>>,
}

#[derive(Debug)]
struct Inner<R> {
    resolver: R,
    client: TokenReviewClient,
    policy: IdentityPolicy,
}

impl<R> Clone for FederatedAuthority<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: AuthorityResolver> FederatedAuthority<R> {
    /// Constructs a new federated authority
    pub fn new(resolver: R, client: TokenReviewClient, policy: IdentityPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                client,
                policy,
            }),
        }
    }

    /// The authority registry
    pub fn resolver(&self) -> &R {
        &self.inner.resolver
    }

    /// The identities permitted to call
    pub fn policy(&self) -> &IdentityPolicy {
        &self.inner.policy
    }

    /// Verifies the token with its authority and checks the resulting
    /// identity against the policy
    ///
    /// Every call performs a fresh review. An unknown key id fails before
    /// any network call is made.
    #[tracing::instrument(
        name = "verify_token",
        skip_all,
        fields(
            routing_key = tracing::field::Empty,
            authority = tracing::field::Empty,
        ),
    )]
    pub async fn verify(&self, token: &BearerTokenRef) -> Result<VerifiedCaller, AuthError> {
        let result = self.verify_impl(token).await;

        match &result {
            Ok(caller) => tracing::debug!(identity = %caller.identity(), "caller verified"),
            Err(err) => tracing::info!(
                error.kind = err.kind().as_str(),
                error.message = %err,
                "caller rejected"
            ),
        }

        result
    }

    async fn verify_impl(&self, token: &BearerTokenRef) -> Result<VerifiedCaller, AuthError> {
        let span = tracing::Span::current();

        let routing_key = routing::extract_routing_key(token)?;
        span.record("routing_key", routing_key.as_str());

        let authority = self.inner.resolver.resolve(&routing_key)?;
        span.record("authority", tracing::field::display(authority));

        let verified = match self.inner.client.verify(authority, token).await {
            Ok(verified) => verified,
            Err(source) => {
                return Err(AuthError::Review {
                    key: routing_key,
                    source,
                })
            }
        };

        self.inner.policy.evaluate(&verified.identity)?;

        Ok(VerifiedCaller {
            routing_key,
            authority: authority.clone(),
            identity: verified.identity,
            uid: verified.uid,
            groups: verified.groups,
        })
    }
}

#[async_trait]
impl<R: AuthorityResolver> tokenfed_traits::Authority for FederatedAuthority<R> {
    type Token = BearerTokenRef;
    type Verified = VerifiedCaller;
    type Error = AuthError;

    async fn verify(&self, token: &Self::Token) -> Result<Self::Verified, Self::Error> {
        FederatedAuthority::verify(self, token).await
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{review::DEFAULT_REVIEW_PATH, ErrorKind};

    const ADMIN: &str = "system:serviceaccount:default:admin-user";

    fn token_for(kid: &str) -> String {
        format!(
            "{}.eyJzdWIiOiJhZG1pbiJ9.c2VjcmV0LXNpZ25hdHVyZQ",
            URL_SAFE_NO_PAD.encode(json!({ "alg": "RS256", "kid": kid }).to_string())
        )
    }

    fn authenticated_as(username: &str) -> ResponseTemplate {
        ResponseTemplate::new(201).set_body_json(json!({
            "status": {
                "authenticated": true,
                "user": { "username": username, "uid": "1234", "groups": ["system:authenticated"] },
            },
        }))
    }

    fn authority(server: &MockServer, policy: IdentityPolicy) -> FederatedAuthority {
        let registry = StaticRegistry::builder()
            .allow_plaintext(true)
            .with_authority("cluster-a", &server.uri())
            .unwrap()
            .build()
            .unwrap();

        let client = TokenReviewClient::builder()
            .allow_plaintext(true)
            .build()
            .unwrap();

        FederatedAuthority::new(registry, client, policy)
    }

    fn admin_only() -> IdentityPolicy {
        IdentityPolicy::allow_one(Identity::from_static(ADMIN))
    }

    #[tokio::test]
    async fn verifies_permitted_caller() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DEFAULT_REVIEW_PATH))
            .respond_with(authenticated_as(ADMIN))
            .expect(1)
            .mount(&server)
            .await;

        let authority = authority(&server, admin_only());
        let token = token_for("cluster-a");

        let caller = authority
            .verify(BearerTokenRef::from_str(&token))
            .await
            .unwrap();

        assert_eq!(caller.routing_key().as_str(), "cluster-a");
        assert_eq!(caller.identity().as_str(), ADMIN);
        assert_eq!(caller.uid(), Some("1234"));
        assert_eq!(caller.groups(), ["system:authenticated"]);
        assert_eq!(caller.authority().url().as_str(), format!("{}/", server.uri()));
    }

    #[tokio::test]
    async fn unknown_key_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(authenticated_as(ADMIN))
            .expect(0)
            .mount(&server)
            .await;

        let authority = authority(&server, admin_only());
        let token = token_for("cluster-z");

        let err = authority
            .verify(BearerTokenRef::from_str(&token))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownAuthority);
    }

    #[tokio::test]
    async fn malformed_token_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(authenticated_as(ADMIN))
            .expect(0)
            .mount(&server)
            .await;

        let authority = authority(&server, admin_only());

        let err = authority
            .verify(BearerTokenRef::from_str("!!!.e30.c2ln"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedToken);
    }

    #[tokio::test]
    async fn rejected_token_is_authority_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"status": {"authenticated": false}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let authority = authority(&server, admin_only());
        let token = token_for("cluster-a");

        let err = authority
            .verify(BearerTokenRef::from_str(&token))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthorityRejected);
    }

    #[tokio::test]
    async fn unexpected_identity_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(authenticated_as("system:serviceaccount:default:intruder"))
            .expect(1)
            .mount(&server)
            .await;

        let authority = authority(&server, admin_only());
        let token = token_for("cluster-a");

        let err = authority
            .verify(BearerTokenRef::from_str(&token))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn every_verification_asks_the_authority() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(authenticated_as(ADMIN))
            .expect(2)
            .mount(&server)
            .await;

        let authority = authority(&server, admin_only());
        let token = token_for("cluster-a");

        let first = authority
            .verify(BearerTokenRef::from_str(&token))
            .await
            .unwrap();
        let second = authority
            .clone()
            .verify(BearerTokenRef::from_str(&token))
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn usable_through_the_authority_trait() {
        async fn check<A>(authority: &A, token: &BearerTokenRef) -> Result<A::Verified, A::Error>
        where
            A: tokenfed_traits::Authority<Token = BearerTokenRef>,
        {
            authority.verify(token).await
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(authenticated_as(ADMIN))
            .expect(1)
            .mount(&server)
            .await;

        let authority = Arc::new(authority(&server, admin_only()));
        let token = token_for("cluster-a");

        let caller = check(&authority, BearerTokenRef::from_str(&token))
            .await
            .unwrap();

        assert_eq!(caller.identity().as_str(), ADMIN);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn token_never_appears_in_logs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(authenticated_as("system:serviceaccount:default:intruder"))
            .mount(&server)
            .await;

        let authority = authority(&server, admin_only());
        let token = token_for("cluster-a");

        let _ = authority.verify(BearerTokenRef::from_str(&token)).await;
        let _ = authority
            .verify(BearerTokenRef::from_str(&token_for("cluster-z")))
            .await;

        assert!(logs_contain("caller rejected"));
        assert!(logs_contain("cluster-a"));
        assert!(!logs_contain(&token));
        assert!(!logs_contain("c2VjcmV0LXNpZ25hdHVyZQ"));
    }
}
