//! Bearer tokens for the storage API.
//!
//! Tokens are signed for the service account in the plugin's key file and
//! cached by the signer until shortly before they expire. A fixed token can
//! replace the account, which is how emulators and tests are driven.

use std::fmt;
use std::sync::Arc;

use gcp_auth::{CustomServiceAccount, TokenProvider};

use super::StorageError;

/// OAuth scope requested for every storage call.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";

/// Where access tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    /// A fixed token supplied through configuration.
    Static(String),
    /// Tokens exchanged for a JWT signed with the service-account key.
    ServiceAccount(Arc<CustomServiceAccount>),
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("TokenSource::Static(..)"),
            Self::ServiceAccount(_) => f.write_str("TokenSource::ServiceAccount(..)"),
        }
    }
}

impl TokenSource {
    /// Builds a signer from the JSON document of a service-account key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Token`] when the document is not a usable
    /// service-account key.
    pub fn service_account(key_json: &str) -> Result<Self, StorageError> {
        CustomServiceAccount::from_json(key_json)
            .map(|account| Self::ServiceAccount(Arc::new(account)))
            .map_err(|err| StorageError::Token {
                message: format!("unusable service-account key: {err}"),
            })
    }

    /// Returns a bearer token, refreshing the cached one when it expired.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Token`] when the token exchange fails.
    pub async fn token(&self) -> Result<String, StorageError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(account) => {
                let token = account
                    .token(&[STORAGE_SCOPE])
                    .await
                    .map_err(|err| StorageError::Token {
                        message: err.to_string(),
                    })?;
                Ok(token.as_str().to_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let source = TokenSource::Static(String::from("abc"));
        assert_eq!(source.token().await.expect("token"), "abc");
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"type":"service_account","project_id":"my-proj"}"#)]
    fn keys_without_signing_material_are_rejected(#[case] document: &str) {
        let err = TokenSource::service_account(document).expect_err("unusable key");
        assert!(
            matches!(err, StorageError::Token { ref message } if message.starts_with("unusable service-account key")),
            "{err}"
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let source = TokenSource::Static(String::from("ya29.secret"));
        assert!(!format!("{source:?}").contains("ya29"));
    }
}
