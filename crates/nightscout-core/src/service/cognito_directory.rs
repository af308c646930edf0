//! User directory backed by the Cognito user pool
//!
//! Each user's Nightscout site lives in two custom attributes of their pool
//! entry, read with `AdminGetUser` on every lookup.

use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::error::DisplayErrorContext;
use aws_sdk_cognitoidentityprovider::types::AttributeType;
use aws_sdk_cognitoidentityprovider::Client;
use tracing::{debug, error};

use super::user_directory::{resolve_site, DirectoryError, UserDirectory};
use crate::domain::{CognitoConfig, ConfigError, NightscoutSite};

/// Attribute holding the site URL
pub const BASE_URL_ATTRIBUTE: &str = "custom:nightscout_base_url";
/// Attribute holding the site access token
pub const TOKEN_ATTRIBUTE: &str = "custom:nightscout_token";

pub struct CognitoUserDirectory {
    client: Client,
    user_pool_id: String,
}

impl CognitoUserDirectory {
    pub fn new(client: Client, user_pool_id: impl Into<String>) -> Self {
        Self {
            client,
            user_pool_id: user_pool_id.into(),
        }
    }

    /// Client for the pool's region with credentials from the default AWS chain
    pub async fn from_config(config: &CognitoConfig) -> Result<Self, ConfigError> {
        let user_pool_id = config
            .user_pool_id
            .clone()
            .ok_or(ConfigError::Missing("COGNITO_USER_POOL_ID"))?;

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        debug!(
            "[Directory] Reading user attributes from pool {} in {}",
            user_pool_id, config.region
        );
        Ok(Self::new(Client::new(&sdk_config), user_pool_id))
    }
}

#[async_trait]
impl UserDirectory for CognitoUserDirectory {
    async fn nightscout_site(&self, username: &str) -> Result<NightscoutSite, DirectoryError> {
        debug!(
            "[Directory] AdminGetUser {} in {}",
            username, self.user_pool_id
        );

        let output = self
            .client
            .admin_get_user()
            .user_pool_id(&self.user_pool_id)
            .username(username)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_user_not_found_exception() {
                    return DirectoryError::UnknownUser(username.to_string());
                }
                error!(
                    "[Directory] Failed to read attributes of {}: {}",
                    username,
                    DisplayErrorContext(&service_error)
                );
                DirectoryError::Provider(service_error.to_string())
            })?;

        site_from_attributes(username, output.user_attributes())
    }
}

fn site_from_attributes(
    username: &str,
    attributes: &[AttributeType],
) -> Result<NightscoutSite, DirectoryError> {
    let value = |name: &str| {
        attributes
            .iter()
            .find(|attribute| attribute.name() == name)
            .and_then(|attribute| attribute.value())
    };

    debug!(
        "[Directory] {} has {} attribute(s)",
        username,
        attributes.len()
    );
    resolve_site(username, value(BASE_URL_ATTRIBUTE), value(TOKEN_ATTRIBUTE))
}
