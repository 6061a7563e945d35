//! Deserializable consumer and credential settings.

use serde::Deserialize;

use crate::auth::BasicAuthentication;
use crate::error::{AuthError, ConfigError};
use crate::types::{SubscriptionIdentity, SubscriptionType};

/// Consumer settings as they appear in a config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsumerOptions {
    pub service_url: url::Url,
    pub topic: String,
    pub subscription_name: String,
    #[serde(default)]
    pub subscription_type: SubscriptionType,
}

impl ConsumerOptions {
    pub fn new(
        service_url: url::Url,
        topic: impl Into<String>,
        subscription_name: impl Into<String>,
    ) -> Self {
        Self {
            service_url,
            topic: topic.into(),
            subscription_name: subscription_name.into(),
            subscription_type: SubscriptionType::default(),
        }
    }

    pub fn with_subscription_type(mut self, subscription_type: SubscriptionType) -> Self {
        self.subscription_type = subscription_type;
        self
    }

    /// Validate and freeze into the identity a consumer handle carries.
    pub fn into_identity(self) -> Result<SubscriptionIdentity, ConfigError> {
        match self.service_url.scheme() {
            "pulsar" | "pulsar+ssl" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::EmptyField("topic"));
        }
        if self.subscription_name.trim().is_empty() {
            return Err(ConfigError::EmptyField("subscription_name"));
        }
        Ok(SubscriptionIdentity {
            service_url: self.service_url,
            subscription_name: self.subscription_name,
            topic: self.topic,
            subscription_type: self.subscription_type,
        })
    }
}

/// Basic-scheme credentials as they appear in a config file.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub user_id: String,
    #[serde(default)]
    pub password: String,
}

impl AuthConfig {
    pub fn into_authentication(self) -> Result<BasicAuthentication, AuthError> {
        BasicAuthentication::new(self.user_id, self.password)
    }
}
