use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};

use crate::types::*;
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The room a setpoint write lands on. The vendor API addresses rooms, not
/// devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomRef {
    pub user_id: u64,
    pub home_id: u64,
    pub room_id: u64,
}

/// Everything the adapter needs from the heater cloud.
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Password grant.
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair>;

    async fn get_user_id(&self, access_token: &str) -> Result<u64>;

    async fn get_authorization_code(&self) -> Result<String>;

    async fn exchange_code(&self, code: &str) -> Result<TokenPair>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair>;

    async fn fetch_tree(&self, access_token: &str, user_id: u64) -> Result<DeviceTreeSnapshot>;

    async fn set_target_temperature(
        &self,
        access_token: &str,
        room: RoomRef,
        temp: Temperature,
    ) -> Result<()>;
}

/// Endpoint and OAuth client settings for one vendor deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorProfile {
    pub name: &'static str,
    pub base_url: String,
    pub client_id: String,
    pub redirect_uri: String,
}

impl VendorProfile {
    pub fn glamox() -> Self {
        Self {
            name: "glamox",
            base_url: "https://api-1.glamoxheating.com/r-api".to_string(),
            client_id: "future-home-api-test".to_string(),
            redirect_uri: "https://postman-echo.com/get?foo1=bar1".to_string(),
        }
    }

    pub fn adax() -> Self {
        Self {
            name: "adax",
            base_url: "https://adax-api-test.azurewebsites.net/r-test-api".to_string(),
            ..Self::glamox()
        }
    }
}

pub struct HttpVendorClientBuilder {
    profile: VendorProfile,
    base_url: Option<String>,
    client_secret: String,
    timeout: Duration,
}

impl HttpVendorClientBuilder {
    pub fn new(profile: VendorProfile) -> Self {
        Self {
            profile,
            base_url: None,
            client_secret: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Point the client somewhere other than the profile's host.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Secret paired with the profile's client id for the code exchange.
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = secret.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpVendorClient> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::fetch(format!("building HTTP client: {e}")))?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| self.profile.base_url.clone())
            .trim_end_matches('/')
            .to_string();

        Ok(HttpVendorClient {
            http,
            base_url,
            profile: self.profile,
            client_secret: self.client_secret,
        })
    }
}

/// reqwest implementation of [`VendorClient`].
pub struct HttpVendorClient {
    http: reqwest::Client,
    base_url: String,
    profile: VendorProfile,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

impl From<TokenResponse> for TokenPair {
    fn from(r: TokenResponse) -> Self {
        TokenPair {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
        }
    }
}

#[derive(Deserialize)]
struct CodeResponse {
    args: CodeArgs,
}

#[derive(Deserialize)]
struct CodeArgs {
    code: String,
}

#[derive(Deserialize)]
struct UserResponse {
    id: u64,
}

impl HttpVendorClient {
    pub fn builder(profile: VendorProfile) -> HttpVendorClientBuilder {
        HttpVendorClientBuilder::new(profile)
    }

    pub fn profile(&self) -> &VendorProfile {
        &self.profile
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token_grant(&self, req: RequestBuilder) -> Result<TokenPair> {
        let resp: TokenResponse = send(req, auth_error).await?;
        if resp.access_token.is_empty() {
            return Err(Error::auth("token endpoint returned an empty access token"));
        }
        Ok(resp.into())
    }
}

fn auth_error(msg: String) -> Error {
    Error::auth(msg)
}

/// Send `req` and decode a 200 body, mapping every failure to `kind`.
async fn send<T: DeserializeOwned>(req: RequestBuilder, kind: fn(String) -> Error) -> Result<T> {
    let resp = req.send().await.map_err(|e| kind(e.to_string()))?;
    let status = resp.status();
    trace!(%status, url = %resp.url(), "vendor response");
    if status != StatusCode::OK {
        return Err(kind(format!("bad HTTP status {}", status.as_u16())));
    }
    resp.json::<T>()
        .await
        .map_err(|e| kind(format!("decoding response: {e}")))
}

async fn send_empty(req: RequestBuilder, kind: fn(String) -> Error) -> Result<()> {
    let resp = req.send().await.map_err(|e| kind(e.to_string()))?;
    let status = resp.status();
    if status != StatusCode::OK {
        return Err(kind(format!("bad HTTP status {}", status.as_u16())));
    }
    Ok(())
}

#[async_trait]
impl VendorClient for HttpVendorClient {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        debug!(vendor = self.profile.name, "password login");
        let req = self.http.post(self.url("/auth/token")).form(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ]);
        self.token_grant(req).await
    }

    async fn get_user_id(&self, access_token: &str) -> Result<u64> {
        let req = self.http.get(self.url("/rest/users")).bearer_auth(access_token);
        let user: UserResponse = send(req, auth_error).await?;
        debug!(user = user.id, "resolved user id");
        Ok(user.id)
    }

    async fn get_authorization_code(&self) -> Result<String> {
        let req = self.http.get(self.url("/auth/auth")).query(&[
            ("client_id", self.profile.client_id.as_str()),
            ("response_type", "code"),
            ("state", "fimp"),
            ("redirect_uri", self.profile.redirect_uri.as_str()),
        ]);
        let resp: CodeResponse = send(req, auth_error).await?;
        if resp.args.code.is_empty() {
            return Err(Error::auth("authorization endpoint returned an empty code"));
        }
        Ok(resp.args.code)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenPair> {
        let req = self
            .http
            .post(self.url("/auth/token"))
            .basic_auth(&self.profile.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.profile.redirect_uri.as_str()),
            ]);
        self.token_grant(req).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair> {
        let req = self.http.post(self.url("/auth/token")).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]);
        let mut pair = self.token_grant(req).await?;
        if pair.refresh_token.is_empty() {
            pair.refresh_token = refresh_token.to_string();
        }
        Ok(pair)
    }

    async fn fetch_tree(&self, access_token: &str, user_id: u64) -> Result<DeviceTreeSnapshot> {
        let body = json!({
            "userIds": [user_id],
            "withTemperatures": true,
            "withPowerUsage": true,
        });
        let req = self
            .http
            .post(self.url("/rest/v1/state"))
            .bearer_auth(access_token)
            .json(&body);
        let snapshot: DeviceTreeSnapshot = send(req, Error::Fetch).await?;
        debug!(
            users = snapshot.users.len(),
            devices = snapshot.devices().count(),
            "fetched device tree"
        );
        Ok(snapshot)
    }

    async fn set_target_temperature(
        &self,
        access_token: &str,
        room: RoomRef,
        temp: Temperature,
    ) -> Result<()> {
        let body = json!({
            "users": [{
                "id": room.user_id,
                "homes": [{
                    "id": room.home_id,
                    "rooms": [{
                        "id": room.room_id,
                        "targetTemperature": temp.hundredths(),
                    }],
                }],
            }],
        });
        debug!(room = room.room_id, %temp, "setting target temperature");
        let req = self
            .http
            .put(self.url("/rest/v1/control"))
            .bearer_auth(access_token)
            .json(&body);
        send_empty(req, Error::Set).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_differ_only_in_host() {
        let glamox = VendorProfile::glamox();
        let adax = VendorProfile::adax();
        assert_ne!(glamox.base_url, adax.base_url);
        assert_eq!(glamox.client_id, adax.client_id);
        assert!(adax.base_url.ends_with("/r-test-api"));
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let client = HttpVendorClient::builder(VendorProfile::glamox())
            .base_url("http://127.0.0.1:9000/")
            .build()
            .unwrap();
        assert_eq!(client.url("/rest/users"), "http://127.0.0.1:9000/rest/users");
        assert_eq!(client.profile().name, "glamox");
    }
}
