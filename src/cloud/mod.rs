//! Cloud appliance API abstraction and wire types.
//!
//! The daemon is entirely a client of the appliance cloud: authorization
//! exchanges, the fleet listing, and per-appliance capability lookups all go
//! through the [`ApplianceApi`] seam so the reconciliation and polling logic
//! can be exercised against mock backends.

pub mod http;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpApplianceApi;

/// One appliance as reported by the remote fleet listing.
///
/// Immutable per fetch; a later fetch may carry an updated display name or a
/// fresh status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceDescriptor {
    /// Stable identifier, the basis for the local accessory identity.
    pub appliance_id: String,

    /// Model tag used to select a device controller.
    pub model_name: String,

    /// Human-readable name chosen by the owner.
    pub display_name: String,

    /// Remote state document consumed by controller updates.
    #[serde(default)]
    pub status: serde_json::Value,
}

/// Token material returned by a sign-in or refresh exchange.
///
/// The refresh token rotates on every use; the caller must overwrite its
/// stored copy, never append.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
    /// Regional API endpoint assigned to this account, when the cloud
    /// provides one.
    #[serde(default)]
    pub regional_base_url: Option<String>,
}

/// Errors produced by the cloud client.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: StatusCode,
        body: String,
    },

    /// The requested resource does not exist. Distinct from other failures
    /// because a missing capability document is a valid classification, not
    /// an error.
    #[error("resource not found")]
    NotFound,

    #[error("authorization rejected: {0}")]
    Auth(String),
}

impl CloudError {
    /// Best-effort extraction of a human-readable message from a structured
    /// error body.
    pub fn api_message(&self) -> Option<String> {
        let body = match self {
            CloudError::UnexpectedStatus { body, .. } => body,
            _ => return None,
        };
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_owned)
    }
}

/// Formats an error for tick-boundary logging, unwrapping a structured cloud
/// error body when one is present in the chain.
pub fn describe(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(cloud) = cause.downcast_ref::<CloudError>() {
            if let Some(message) = cloud.api_message() {
                return format!("{err:#} ({message})");
            }
        }
    }
    format!("{err:#}")
}

/// Authenticated appliance cloud operations.
///
/// Abstract and not wire-exact: implementations decide endpoints and payload
/// shapes. [`HttpApplianceApi`] is the production implementation.
#[async_trait]
pub trait ApplianceApi: Send + Sync {
    /// Obtains a fresh session via the authorization exchange.
    async fn sign_in(&self) -> Result<SessionTokens, CloudError>;

    /// Exchanges a refresh token for a new session. The submitted token is
    /// consumed whether or not the exchange succeeds.
    async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, CloudError>;

    /// Fetches the full remote appliance listing.
    async fn list_appliances(
        &self,
        access_token: &str,
        base_url: &str,
    ) -> Result<Vec<ApplianceDescriptor>, CloudError>;

    /// Fetches the capability document for one appliance.
    ///
    /// Returns [`CloudError::NotFound`] when the appliance has no capability
    /// document.
    async fn get_capabilities(
        &self,
        appliance_id: &str,
        access_token: &str,
        base_url: &str,
    ) -> Result<serde_json::Value, CloudError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use pretty_assertions::assert_eq;

    #[test]
    fn descriptor_deserializes_camel_case() {
        let json = r#"{
            "applianceId": "950011538111111111111111",
            "modelName": "PURE500",
            "displayName": "Living Room",
            "status": {"applianceState": "running"}
        }"#;

        let descriptor: ApplianceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.appliance_id, "950011538111111111111111");
        assert_eq!(descriptor.model_name, "PURE500");
        assert_eq!(descriptor.display_name, "Living Room");
        assert_eq!(descriptor.status["applianceState"], "running");
    }

    #[test]
    fn descriptor_status_defaults_to_null() {
        let json = r#"{"applianceId": "a", "modelName": "m", "displayName": "d"}"#;
        let descriptor: ApplianceDescriptor = serde_json::from_str(json).unwrap();
        assert!(descriptor.status.is_null());
    }

    #[test]
    fn api_message_extracted_from_structured_body() {
        let err = CloudError::UnexpectedStatus {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: r#"{"message": "rate limit exceeded"}"#.to_string(),
        };
        assert_eq!(err.api_message().as_deref(), Some("rate limit exceeded"));
    }

    #[test]
    fn api_message_absent_for_unstructured_body() {
        let err = CloudError::UnexpectedStatus {
            status: StatusCode::BAD_GATEWAY,
            body: "<html>Bad Gateway</html>".to_string(),
        };
        assert!(err.api_message().is_none());
    }

    #[test]
    fn describe_unwraps_cloud_error_body() {
        let cloud_err = CloudError::UnexpectedStatus {
            status: StatusCode::FORBIDDEN,
            body: r#"{"message": "token revoked"}"#.to_string(),
        };
        let err = anyhow::Error::from(cloud_err)
            .context("session refresh")
            .context("poll cycle");

        let described = describe(&err);
        assert!(described.contains("token revoked"));
        assert!(described.contains("session refresh"));
    }

    #[test]
    fn describe_falls_back_to_error_chain() {
        let err = anyhow::anyhow!("connection reset").context("appliance listing");
        assert_eq!(describe(&err), "appliance listing: connection reset");
    }
}
