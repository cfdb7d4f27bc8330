//! The default token source for workloads running in a cluster

use std::path::PathBuf;

use async_trait::async_trait;
use tokenfed::BearerToken;

use super::{CredentialUnavailable, EnvTokenSource, FileTokenSource, TokenSource};

/// The environment variable consulted before the mounted token
pub const DEFAULT_OVERRIDE_VAR: &str = "K8S_SERVICEACCOUNT_TOKEN";

/// The path at which the kubelet mounts the service account token
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// A token source for the workload's own service account
///
/// An explicit override in the environment wins if it is set and non-empty.
/// Otherwise the token mounted into the pod is read. Both are consulted on
/// every request, so rotation of the mounted token is picked up.
#[derive(Clone, Debug)]
pub struct ServiceAccountTokenSource {
    override_var: EnvTokenSource,
    mounted: FileTokenSource,
}

impl Default for ServiceAccountTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceAccountTokenSource {
    /// Constructs a source using the default override variable and mount path
    pub fn new() -> Self {
        Self {
            override_var: EnvTokenSource::new(DEFAULT_OVERRIDE_VAR),
            mounted: FileTokenSource::new(DEFAULT_TOKEN_PATH),
        }
    }

    /// Uses a different override variable
    pub fn with_override_var(mut self, var: impl Into<std::borrow::Cow<'static, str>>) -> Self {
        self.override_var = EnvTokenSource::new(var);
        self
    }

    /// Uses a different mounted token path
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounted = FileTokenSource::new(path);
        self
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable> {
        if let Some(token) = self.override_var.read() {
            tracing::debug!(
                token.source = "env",
                env.var = self.override_var.var(),
                "using service account token override"
            );
            return Ok(token);
        }

        let token = self.mounted.request_token().await.map_err(|err| {
            CredentialUnavailable::with_source(
                format!(
                    "{} is not set and the mounted service account token is unusable",
                    self.override_var.var()
                ),
                err,
            )
        })?;

        tracing::debug!(
            token.source = "file",
            token.path = %self.mounted.path().display(),
            "using mounted service account token"
        );

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[tokio::test]
    async fn override_wins_over_mounted_token() {
        std::env::set_var("TOKENFED_TEST_SA_OVERRIDE_SET", "override.token.value");
        let mounted = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(mounted.path(), "mounted.token.value").unwrap();

        let source = ServiceAccountTokenSource::new()
            .with_override_var("TOKENFED_TEST_SA_OVERRIDE_SET")
            .with_token_path(mounted.path());

        let token = source.request_token().await.unwrap();

        assert_eq!(token.as_str(), "override.token.value");
    }

    #[tokio::test]
    async fn falls_back_to_mounted_token() {
        let mounted = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(mounted.path(), "mounted.token.value\n").unwrap();

        let source = ServiceAccountTokenSource::new()
            .with_override_var("TOKENFED_TEST_SA_OVERRIDE_UNSET")
            .with_token_path(mounted.path());

        let token = source.request_token().await.unwrap();

        assert_eq!(token.as_str(), "mounted.token.value");
    }

    #[tokio::test]
    async fn blank_override_falls_back_to_mounted_token() {
        std::env::set_var("TOKENFED_TEST_SA_OVERRIDE_BLANK", "");
        let mounted = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(mounted.path(), "mounted.token.value").unwrap();

        let source = ServiceAccountTokenSource::new()
            .with_override_var("TOKENFED_TEST_SA_OVERRIDE_BLANK")
            .with_token_path(mounted.path());

        let token = source.request_token().await.unwrap();

        assert_eq!(token.as_str(), "mounted.token.value");
    }

    #[tokio::test]
    async fn neither_source_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();

        let source = ServiceAccountTokenSource::new()
            .with_override_var("TOKENFED_TEST_SA_OVERRIDE_NEITHER")
            .with_token_path(dir.path().join("token"));

        let err = source.request_token().await.unwrap_err();

        assert!(err.reason().contains("TOKENFED_TEST_SA_OVERRIDE_NEITHER"));
        assert!(err.source().is_some());
    }
}
