//! Credential artifact handling.
//!
//! The artifact is a file holding an OAuth2 bearer token, either as the bare
//! token or as a JSON object with an `access_token` field (the shape of a
//! token endpoint response). Minting tokens is left to external tooling.

use serde_json::Value;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{
    CredentialsEmptySnafu, CredentialsError, CredentialsJsonSnafu, CredentialsMissingSnafu,
    CredentialsReadSnafu, MissingAccessTokenSnafu,
};

/// Lazily loaded bearer token backed by a file on disk.
///
/// Nothing is read until the first request needs a token, so a missing file
/// can be reported by the readiness check before any client touches it.
#[derive(Debug)]
pub struct CredentialFile {
    path: PathBuf,
    token: OnceCell<String>,
}

impl CredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            token: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the artifact exists as a regular file.
    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }

    /// Bearer token, read from disk on first use and cached afterwards.
    pub async fn bearer_token(&self) -> Result<&str, CredentialsError> {
        let token = self
            .token
            .get_or_try_init(|| load_token(&self.path))
            .await?;
        Ok(token.as_str())
    }
}

async fn load_token(path: &Path) -> Result<String, CredentialsError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return CredentialsMissingSnafu { path }.fail();
        }
        Err(e) => return Err(e).context(CredentialsReadSnafu { path }),
    };
    debug!(path = %path.display(), "Loaded credentials file");
    parse_token(&content, path)
}

fn parse_token(content: &str, path: &Path) -> Result<String, CredentialsError> {
    let trimmed = content.trim();
    ensure!(!trimmed.is_empty(), CredentialsEmptySnafu { path });

    if !trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }

    let value: Value = serde_json::from_str(trimmed).context(CredentialsJsonSnafu { path })?;
    value
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .context(MissingAccessTokenSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_plain_token_is_trimmed() {
        let file = write_temp("  ya29.token-value\n");
        let creds = CredentialFile::new(file.path());
        assert!(creds.is_present());
        assert_eq!(creds.bearer_token().await.unwrap(), "ya29.token-value");
    }

    #[tokio::test]
    async fn test_json_access_token() {
        let file = write_temp(r#"{"access_token":"abc","expires_in":3599}"#);
        let creds = CredentialFile::new(file.path());
        assert_eq!(creds.bearer_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_service_account_key_is_rejected() {
        let file = write_temp(r#"{"type":"service_account","private_key":"..."}"#);
        let creds = CredentialFile::new(file.path());
        let err = creds.bearer_token().await.unwrap_err();
        assert!(matches!(err, CredentialsError::MissingAccessToken { .. }));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let creds = CredentialFile::new(dir.path().join("credentials.json"));
        assert!(!creds.is_present());
        let err = creds.bearer_token().await.unwrap_err();
        assert!(matches!(err, CredentialsError::CredentialsMissing { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_not_present() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!CredentialFile::new(dir.path()).is_present());
    }

    #[test]
    fn test_empty_file() {
        let err = parse_token(" \n", Path::new("creds")).unwrap_err();
        assert!(matches!(err, CredentialsError::CredentialsEmpty { .. }));
    }
}
