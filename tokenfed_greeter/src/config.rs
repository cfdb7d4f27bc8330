//! Command-line and environment configuration for the greeter binaries
//!
//! Every option may also be supplied through the environment variable named
//! in its help text. The binaries load a `.env` file before parsing.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{bail, WrapErr};
use tokenfed::{
    registry::AuthorityEntry, review::DEFAULT_REVIEW_PATH, FederatedAuthority, IdentityPolicy,
    StaticRegistry, TokenReviewClient,
};
use tokenfed_tokens::{
    sources::{
        service_account::{DEFAULT_OVERRIDE_VAR, DEFAULT_TOKEN_PATH},
        token_request::{IN_CLUSTER_API_SERVER, IN_CLUSTER_CA_PATH},
        ServiceAccountTokenSource, TokenRequestSource,
    },
    TokenSource,
};
use url::Url;

/// Options for `greeter-server`
#[derive(Clone, Debug, Parser)]
#[command(name = "greeter-server", version, about)]
pub struct ServerOptions {
    /// The address to listen on
    #[arg(long, env = "GREETER_LISTEN", default_value = "[::]:50051")]
    pub listen: SocketAddr,

    /// A directory with one file per key id, each holding an authority URL
    #[arg(long, env = "TOKENFED_AUTHORITY_DIR")]
    pub authority_dir: Option<PathBuf>,

    /// An inline authority in the form `KEY=URL`
    #[arg(
        long = "authority",
        env = "TOKENFED_AUTHORITIES",
        value_delimiter = ',',
        value_parser = AuthorityEntry::from_str
    )]
    pub authorities: Vec<AuthorityEntry>,

    /// An identity permitted to call the service
    #[arg(
        long = "expect-identity",
        env = "TOKENFED_EXPECTED_IDENTITIES",
        value_delimiter = ',',
        required = true
    )]
    pub expected_identities: Vec<String>,

    /// A PEM bundle of certificate authorities to trust when calling authorities
    #[arg(long = "ca-bundle", env = "TOKENFED_CA_BUNDLES", value_delimiter = ',')]
    pub ca_bundles: Vec<PathBuf>,

    /// Disables TLS certificate verification toward authorities
    #[arg(long, env = "TOKENFED_INSECURE_SKIP_TLS_VERIFY")]
    pub insecure_skip_tls_verify: bool,

    /// Permits authorities reached over plain HTTP
    #[arg(long, env = "TOKENFED_ALLOW_PLAINTEXT_AUTHORITIES")]
    pub allow_plaintext_authorities: bool,

    /// Seconds allowed for a single token review
    #[arg(long, env = "TOKENFED_REVIEW_TIMEOUT", default_value_t = 10)]
    pub review_timeout_secs: u64,

    /// The path of the token review resource on each authority
    #[arg(long, env = "TOKENFED_REVIEW_PATH", default_value = DEFAULT_REVIEW_PATH)]
    pub review_path: String,

    /// An audience the reviewed token must be valid for
    #[arg(long = "audience", env = "TOKENFED_AUDIENCES", value_delimiter = ',')]
    pub audiences: Vec<String>,
}

impl ServerOptions {
    /// Builds the registry described by the options
    pub async fn registry(&self) -> color_eyre::Result<StaticRegistry> {
        let mut builder = StaticRegistry::builder().allow_plaintext(self.allow_plaintext_authorities);

        if let Some(dir) = &self.authority_dir {
            builder = builder
                .load_dir(dir)
                .await
                .wrap_err_with(|| format!("unable to load authorities from {}", dir.display()))?;
        }

        for entry in &self.authorities {
            builder = builder.with_entry(entry.clone());
        }

        let registry = builder.build()?;
        if registry.is_empty() {
            bail!("no authorities were configured");
        }

        Ok(registry)
    }

    /// Builds the review client described by the options
    pub async fn review_client(&self) -> color_eyre::Result<TokenReviewClient> {
        let mut builder = TokenReviewClient::builder()
            .insecure_skip_tls_verify(self.insecure_skip_tls_verify)
            .allow_plaintext(self.allow_plaintext_authorities)
            .timeout(Duration::from_secs(self.review_timeout_secs))
            .review_path(self.review_path.clone())
            .audiences(self.audiences.iter().cloned());

        for path in &self.ca_bundles {
            let pem = tokio::fs::read(path)
                .await
                .wrap_err_with(|| format!("unable to read CA bundle {}", path.display()))?;
            builder = builder.with_ca_bundle_pem(pem);
        }

        Ok(builder.build()?)
    }

    /// The identities permitted to call the service
    pub fn policy(&self) -> IdentityPolicy {
        self.expected_identities.iter().map(String::as_str).collect()
    }

    /// Builds the authority that verifies inbound callers
    pub async fn authority(&self) -> color_eyre::Result<FederatedAuthority> {
        let registry = self.registry().await?;
        let client = self.review_client().await?;
        let policy = self.policy();

        tracing::info!(
            authorities = registry.len(),
            identities = policy.iter().count(),
            "configured federated authority"
        );

        Ok(FederatedAuthority::new(registry, client, policy))
    }
}

/// How the client obtains the token it presents
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TokenStrategy {
    /// Present the mounted service account token as is
    Mounted,
    /// Exchange the mounted token for a time-boxed token with a TokenRequest
    TokenRequest,
}

/// Options for `greeter-client`
#[derive(Clone, Debug, Parser)]
#[command(name = "greeter-client", version, about)]
pub struct ClientOptions {
    /// The greeter to call
    #[arg(long, env = "GREETER_SERVER", default_value = "http://localhost:50051")]
    pub server: String,

    /// The name to send in the greeting
    #[arg(long, env = "GREETER_NAME", default_value = "a dummy name")]
    pub name: String,

    /// How to obtain the presented token
    #[arg(long, env = "TOKENFED_TOKEN_STRATEGY", value_enum, default_value_t = TokenStrategy::Mounted)]
    pub token_strategy: TokenStrategy,

    /// An environment variable that, when set, overrides the mounted token
    #[arg(long, env = "TOKENFED_TOKEN_OVERRIDE_VAR", default_value = DEFAULT_OVERRIDE_VAR)]
    pub override_var: String,

    /// The mounted service account token
    #[arg(long, env = "TOKENFED_TOKEN_PATH", default_value = DEFAULT_TOKEN_PATH)]
    pub token_path: PathBuf,

    /// The API server that issues time-boxed tokens
    #[arg(long, env = "TOKENFED_API_SERVER", default_value = IN_CLUSTER_API_SERVER)]
    pub api_server: Url,

    /// The namespace of the service account to request a token for
    #[arg(long, env = "TOKENFED_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// The service account to request a token for
    #[arg(long, env = "TOKENFED_SERVICE_ACCOUNT", default_value = "admin-user")]
    pub service_account: String,

    /// Lifetime in seconds of requested tokens
    #[arg(long, env = "TOKENFED_TOKEN_EXPIRATION", default_value_t = 3600)]
    pub expiration_secs: u64,

    /// A PEM bundle of certificate authorities to trust when calling the API server
    #[arg(long, env = "TOKENFED_API_CA_BUNDLE", default_value = IN_CLUSTER_CA_PATH)]
    pub api_ca_bundle: PathBuf,

    /// Disables TLS certificate verification toward the API server
    #[arg(long, env = "TOKENFED_INSECURE_SKIP_TLS_VERIFY")]
    pub insecure_skip_tls_verify: bool,

    /// Seconds allowed for the greeting call
    #[arg(long, env = "GREETER_TIMEOUT", default_value_t = 5)]
    pub timeout_secs: u64,
}

impl ClientOptions {
    fn mounted(&self) -> ServiceAccountTokenSource {
        ServiceAccountTokenSource::new()
            .with_override_var(self.override_var.clone())
            .with_token_path(self.token_path.clone())
    }

    /// Builds the token source selected by the options
    pub async fn token_source(&self) -> color_eyre::Result<Arc<dyn TokenSource>> {
        match self.token_strategy {
            TokenStrategy::Mounted => Ok(Arc::new(self.mounted())),
            TokenStrategy::TokenRequest => {
                let mut builder = reqwest::Client::builder();
                if self.insecure_skip_tls_verify {
                    tracing::warn!("TLS certificate verification toward the API server is disabled");
                    builder = builder.danger_accept_invalid_certs(true);
                } else {
                    let pem = tokio::fs::read(&self.api_ca_bundle).await.wrap_err_with(|| {
                        format!("unable to read CA bundle {}", self.api_ca_bundle.display())
                    })?;
                    for cert in reqwest::Certificate::from_pem_bundle(&pem)? {
                        builder = builder.add_root_certificate(cert);
                    }
                }

                let source = TokenRequestSource::new(
                    builder.build()?,
                    &self.api_server,
                    &self.namespace,
                    &self.service_account,
                    self.mounted(),
                )?
                .with_expiration(Duration::from_secs(self.expiration_secs));

                Ok(Arc::new(source))
            }
        }
    }
}
