//! HTTP implementation of the appliance cloud API.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

use super::{ApplianceApi, ApplianceDescriptor, CloudError, SessionTokens};

/// Production appliance cloud client over HTTPS.
///
/// The authorization endpoint is fixed at construction; data endpoints are
/// resolved per call from the session's regional base URL.
pub struct HttpApplianceApi {
    http: Client,
    auth_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase", tag = "grantType")]
enum TokenRequest<'a> {
    #[serde(rename_all = "camelCase")]
    ClientCredentials { client_id: &'a str },
    #[serde(rename_all = "camelCase")]
    RefreshToken { refresh_token: &'a str },
}

impl HttpApplianceApi {
    pub fn new(auth_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            auth_url: auth_url.into(),
            api_key,
        }
    }

    async fn token_exchange(&self, request: TokenRequest<'_>) -> Result<SessionTokens, CloudError> {
        let url = format!("{}/v1/token", self.auth_url);
        let res = self.http.post(url).json(&request).send().await?;

        match res.status() {
            status if status.is_success() => Ok(res.json::<SessionTokens>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = res.text().await.unwrap_or_default();
                Err(CloudError::Auth(body))
            }
            _ => Err(unexpected_status(res).await),
        }
    }

    async fn get_json(&self, url: String, access_token: &str) -> Result<Value, CloudError> {
        let res = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?;

        match res.status() {
            status if status.is_success() => Ok(res.json::<Value>().await?),
            StatusCode::NOT_FOUND => Err(CloudError::NotFound),
            _ => Err(unexpected_status(res).await),
        }
    }
}

async fn unexpected_status(res: Response) -> CloudError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    CloudError::UnexpectedStatus { status, body }
}

#[async_trait]
impl ApplianceApi for HttpApplianceApi {
    async fn sign_in(&self) -> Result<SessionTokens, CloudError> {
        let client_id = self
            .api_key
            .as_deref()
            .ok_or_else(|| CloudError::Auth("no api_key configured for sign-in".to_string()))?;
        self.token_exchange(TokenRequest::ClientCredentials { client_id })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, CloudError> {
        self.token_exchange(TokenRequest::RefreshToken { refresh_token })
            .await
    }

    async fn list_appliances(
        &self,
        access_token: &str,
        base_url: &str,
    ) -> Result<Vec<ApplianceDescriptor>, CloudError> {
        let url = format!("{base_url}/v1/appliances");
        let listing = self.get_json(url, access_token).await?;
        serde_json::from_value(listing).map_err(|e| CloudError::UnexpectedStatus {
            status: StatusCode::OK,
            body: format!("malformed appliance listing: {e}"),
        })
    }

    async fn get_capabilities(
        &self,
        appliance_id: &str,
        access_token: &str,
        base_url: &str,
    ) -> Result<Value, CloudError> {
        let url = format!("{base_url}/v1/appliances/{appliance_id}/capabilities");
        self.get_json(url, access_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_request_serializes_grant_type_tag() {
        let request = TokenRequest::RefreshToken {
            refresh_token: "abc",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["grantType"], "refreshToken");
        assert_eq!(json["refreshToken"], "abc");

        let request = TokenRequest::ClientCredentials { client_id: "key" };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["grantType"], "clientCredentials");
        assert_eq!(json["clientId"], "key");
    }

    #[tokio::test]
    async fn sign_in_without_api_key_is_auth_error() {
        let api = HttpApplianceApi::new("https://auth.invalid", None);
        match api.sign_in().await {
            Err(CloudError::Auth(msg)) => assert!(msg.contains("api_key")),
            other => panic!("Expected Auth error, got {other:?}"),
        }
    }
}
