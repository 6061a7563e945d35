//! Authentication data providers.

use std::fmt;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::AuthError;

/// Produces the authentication blob sent to the broker on connect.
#[async_trait]
pub trait Authentication: Send + Sync {
    /// Method identifier announced alongside the data.
    fn method_name(&self) -> &str;

    async fn authentication_data(&self, cancel: &CancellationToken) -> Result<Bytes, AuthError>;
}

/// Basic-scheme credentials.
///
/// The blob is `Authorization Basic {base64(user_id:password)}` in UTF-8,
/// which the broker's basic-auth verifier expects byte for byte.
#[derive(Clone)]
pub struct BasicAuthentication {
    user_id: String,
    data: Bytes,
}

impl BasicAuthentication {
    pub const METHOD_NAME: &'static str = "Basic";

    /// Bind a credential pair. Rejects an empty user id, and one containing
    /// `:` since it could not be split back out of `user_id:password`.
    pub fn new(user_id: impl Into<String>, password: impl AsRef<str>) -> Result<Self, AuthError> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(AuthError::MissingUserId);
        }
        if user_id.contains(':') {
            return Err(AuthError::InvalidUserId(user_id));
        }

        let credentials = BASE64.encode(format!("{user_id}:{}", password.as_ref()));
        let data = Bytes::from(format!("Authorization Basic {credentials}"));
        Ok(Self { user_id, data })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Debug for BasicAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthentication")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Authentication for BasicAuthentication {
    fn method_name(&self) -> &str {
        Self::METHOD_NAME
    }

    // Pure and non-blocking; the token is accepted for uniformity only.
    async fn authentication_data(&self, _cancel: &CancellationToken) -> Result<Bytes, AuthError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn data_of(auth: &BasicAuthentication) -> String {
        let bytes = auth
            .authentication_data(&CancellationToken::new())
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn encodes_known_pair() {
        let auth = BasicAuthentication::new("alice", "secret").unwrap();
        assert_eq!(data_of(&auth).await, "Authorization Basic YWxpY2U6c2VjcmV0");
    }

    #[tokio::test]
    async fn password_may_contain_colon_and_unicode() {
        let auth = BasicAuthentication::new("bob", "pa:ss wörd").unwrap();
        let expected = format!("Authorization Basic {}", BASE64.encode("bob:pa:ss wörd"));
        assert_eq!(data_of(&auth).await, expected);
    }

    #[tokio::test]
    async fn empty_password_is_allowed() {
        let auth = BasicAuthentication::new("carol", "").unwrap();
        assert_eq!(data_of(&auth).await, "Authorization Basic Y2Fyb2w6");
    }

    #[tokio::test]
    async fn ignores_cancelled_token() {
        let auth = BasicAuthentication::new("alice", "secret").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let first = auth.authentication_data(&cancel).await.unwrap();
        let second = auth.authentication_data(&cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..], b"Authorization Basic YWxpY2U6c2VjcmV0");
    }

    #[test]
    fn method_name_is_basic() {
        let auth = BasicAuthentication::new("alice", "secret").unwrap();
        assert_eq!(auth.method_name(), "Basic");
    }

    #[test]
    fn rejects_missing_user_id() {
        assert_eq!(
            BasicAuthentication::new("", "secret").unwrap_err(),
            AuthError::MissingUserId
        );
    }

    #[test]
    fn rejects_user_id_with_colon() {
        assert_eq!(
            BasicAuthentication::new("a:b", "secret").unwrap_err(),
            AuthError::InvalidUserId("a:b".into())
        );
    }

    #[test]
    fn debug_output_omits_password() {
        let auth = BasicAuthentication::new("alice", "hunter2").unwrap();
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("YWxpY2U6aHVudGVyMg=="));
    }
}
