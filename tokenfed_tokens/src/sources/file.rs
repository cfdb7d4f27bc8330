//! A token source that reads a file

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokenfed::BearerToken;

use super::{non_empty_token, CredentialUnavailable, TokenSource};

/// A token source that reads the token from a local file
///
/// The file is read on every request, so a token rotated on disk is picked
/// up by the next call. Surrounding whitespace is ignored.
#[derive(Clone, Debug)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    /// Constructs a new file token source
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the file that is read
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenSource for FileTokenSource {
    async fn request_token(&self) -> Result<BearerToken, CredentialUnavailable> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| {
                CredentialUnavailable::with_source(
                    format!("unable to read token file {}", self.path.display()),
                    err,
                )
            })?;

        non_empty_token(&data).ok_or_else(|| {
            CredentialUnavailable::new(format!("token file {} is empty", self.path.display()))
        })
    }
}
