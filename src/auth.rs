use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::AuthFailure;
use crate::store::Store;
use crate::types::{Credentials, TokenPair};
use crate::vendor::VendorClient;
use crate::{Error, Result};

/// Owns the credential lifecycle. Token operations never overlap, and every
/// successful acquisition is persisted before it is returned.
pub struct TokenManager {
    vendor: Arc<dyn VendorClient>,
    store: Arc<Store>,
    lock: Mutex<()>,
}

fn into_auth(e: Error) -> Error {
    match e {
        Error::Auth(_) => e,
        other => Error::Auth(AuthFailure::Vendor(other.to_string())),
    }
}

impl TokenManager {
    pub fn new(vendor: Arc<dyn VendorClient>, store: Arc<Store>) -> Self {
        Self {
            vendor,
            store,
            lock: Mutex::new(()),
        }
    }

    /// The stored access token, or a freshly acquired one if there is none.
    pub async fn ensure_authenticated(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        let creds = self.store.credentials().await;
        if !creds.access_token.is_empty() {
            return Ok(creds.access_token);
        }
        debug!("no access token stored, reacquiring");
        self.reacquire_locked().await
    }

    /// Drop the access token and run the authorization code flow again.
    pub async fn reacquire(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        self.reacquire_locked().await
    }

    pub async fn refresh(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        self.refresh_locked().await
    }

    /// One refresh, then one reacquisition if the refresh fails.
    pub async fn recover(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        match self.refresh_locked().await {
            Ok(token) => Ok(token),
            Err(e) => {
                warn!(error = %e, "token refresh failed, reacquiring");
                self.reacquire_locked().await
            }
        }
    }

    /// Exchange tokens handed over by the hub for this installation's own
    /// pair. Returns the vendor user id.
    pub async fn authorize(&self, access_token: &str, refresh_token: &str) -> Result<u64> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(Error::Auth(AuthFailure::EmptyTokens));
        }
        let _guard = self.lock.lock().await;

        let user_id = self.vendor.get_user_id(access_token).await.map_err(into_auth)?;
        let code = self.vendor.get_authorization_code().await.map_err(into_auth)?;
        let pair = self.vendor.exchange_code(&code).await.map_err(into_auth)?;

        self.store
            .update_config(|c| {
                c.credentials.user_id = Some(user_id);
                c.credentials.code = code;
                c.credentials.access_token = pair.access_token;
                c.credentials.refresh_token = pair.refresh_token;
            })
            .await?;
        info!(user = user_id, "authorized");
        Ok(user_id)
    }

    /// Password grant, then resolve the user id with the new token.
    pub async fn login(&self, username: &str, password: &str) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let pair = self.vendor.login(username, password).await.map_err(into_auth)?;
        let user_id = self
            .vendor
            .get_user_id(&pair.access_token)
            .await
            .map_err(into_auth)?;
        self.store
            .update_config(|c| {
                c.credentials.user_id = Some(user_id);
                c.credentials.access_token = pair.access_token;
                c.credentials.refresh_token = pair.refresh_token;
            })
            .await?;
        info!(user = user_id, "logged in");
        Ok(user_id)
    }

    /// Forget every credential.
    pub async fn invalidate(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store
            .update_config(|c| c.credentials = Credentials::default())
            .await?;
        info!("credentials cleared");
        Ok(())
    }

    async fn reacquire_locked(&self) -> Result<String> {
        self.store
            .update_config(|c| c.credentials.access_token.clear())
            .await?;
        let code = self.vendor.get_authorization_code().await.map_err(into_auth)?;
        let pair = self.vendor.exchange_code(&code).await.map_err(into_auth)?;
        let token = pair.access_token.clone();
        self.store
            .update_config(|c| {
                c.credentials.code = code;
                store_pair(&mut c.credentials, pair);
            })
            .await?;
        info!("access token reacquired");
        Ok(token)
    }

    async fn refresh_locked(&self) -> Result<String> {
        let refresh_token = self.store.credentials().await.refresh_token;
        if refresh_token.is_empty() {
            return Err(Error::Auth(AuthFailure::NoRefreshToken));
        }
        let pair = self
            .vendor
            .refresh_token(&refresh_token)
            .await
            .map_err(into_auth)?;
        let token = pair.access_token.clone();
        self.store
            .update_config(|c| store_pair(&mut c.credentials, pair))
            .await?;
        debug!("access token refreshed");
        Ok(token)
    }
}

fn store_pair(creds: &mut Credentials, pair: TokenPair) {
    creds.access_token = pair.access_token;
    if !pair.refresh_token.is_empty() {
        creds.refresh_token = pair.refresh_token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::*;
    use crate::vendor::RoomRef;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeVendor {
        calls: StdMutex<Vec<&'static str>>,
        fail_refresh: AtomicBool,
        fail_code: AtomicBool,
    }

    impl FakeVendor {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn pair(tag: &str) -> TokenPair {
        TokenPair {
            access_token: format!("access-{tag}"),
            refresh_token: format!("refresh-{tag}"),
        }
    }

    #[async_trait]
    impl VendorClient for FakeVendor {
        async fn login(&self, _: &str, _: &str) -> Result<TokenPair> {
            self.record("login");
            Ok(pair("login"))
        }

        async fn get_user_id(&self, _: &str) -> Result<u64> {
            self.record("user");
            Ok(77)
        }

        async fn get_authorization_code(&self) -> Result<String> {
            self.record("code");
            if self.fail_code.load(Ordering::SeqCst) {
                return Err(Error::auth("no code"));
            }
            Ok("the-code".into())
        }

        async fn exchange_code(&self, _: &str) -> Result<TokenPair> {
            self.record("exchange");
            Ok(pair("exchanged"))
        }

        async fn refresh_token(&self, _: &str) -> Result<TokenPair> {
            self.record("refresh");
            if self.fail_refresh.load(Ordering::SeqCst) {
                return Err(Error::fetch("status 400"));
            }
            Ok(pair("refreshed"))
        }

        async fn fetch_tree(&self, _: &str, _: u64) -> Result<DeviceTreeSnapshot> {
            Ok(DeviceTreeSnapshot::default())
        }

        async fn set_target_temperature(&self, _: &str, _: RoomRef, _: Temperature) -> Result<()> {
            Ok(())
        }
    }

    fn manager(dir: &TempDir) -> (Arc<FakeVendor>, Arc<Store>, TokenManager) {
        let vendor = Arc::new(FakeVendor::default());
        let store = Arc::new(Store::new(Config::new(dir.path())));
        let tm = TokenManager::new(vendor.clone(), store.clone());
        (vendor, store, tm)
    }

    #[tokio::test]
    async fn authorize_persists_everything() {
        let dir = TempDir::new().unwrap();
        let (vendor, _store, tm) = manager(&dir);
        assert_eq!(tm.authorize("hub-access", "hub-refresh").await.unwrap(), 77);
        assert_eq!(vendor.calls(), vec!["user", "code", "exchange"]);

        let creds = Config::load(dir.path()).unwrap().credentials;
        assert_eq!(creds.user_id, Some(77));
        assert_eq!(creds.code, "the-code");
        assert_eq!(creds.access_token, "access-exchanged");
        assert_eq!(creds.refresh_token, "refresh-exchanged");
    }

    #[tokio::test]
    async fn authorize_rejects_empty_tokens() {
        let dir = TempDir::new().unwrap();
        let (vendor, _store, tm) = manager(&dir);
        let err = tm.authorize("", "refresh").await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthFailure::EmptyTokens)));
        assert!(vendor.calls().is_empty());
    }

    #[tokio::test]
    async fn ensure_authenticated_uses_stored_token() {
        let dir = TempDir::new().unwrap();
        let (vendor, store, tm) = manager(&dir);
        store
            .update_config(|c| c.credentials.access_token = "stored".into())
            .await
            .unwrap();
        assert_eq!(tm.ensure_authenticated().await.unwrap(), "stored");
        assert!(vendor.calls().is_empty());
    }

    #[tokio::test]
    async fn ensure_authenticated_reacquires_when_empty() {
        let dir = TempDir::new().unwrap();
        let (vendor, _store, tm) = manager(&dir);
        assert_eq!(tm.ensure_authenticated().await.unwrap(), "access-exchanged");
        assert_eq!(vendor.calls(), vec!["code", "exchange"]);
    }

    #[tokio::test]
    async fn refresh_without_token_fails() {
        let dir = TempDir::new().unwrap();
        let (_vendor, _store, tm) = manager(&dir);
        let err = tm.refresh().await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthFailure::NoRefreshToken)));
    }

    #[tokio::test]
    async fn recover_falls_back_to_reacquire_once() {
        let dir = TempDir::new().unwrap();
        let (vendor, store, tm) = manager(&dir);
        store
            .update_config(|c| c.credentials.refresh_token = "old".into())
            .await
            .unwrap();
        vendor.fail_refresh.store(true, Ordering::SeqCst);
        assert_eq!(tm.recover().await.unwrap(), "access-exchanged");
        assert_eq!(vendor.calls(), vec!["refresh", "code", "exchange"]);
    }

    #[tokio::test]
    async fn failed_reacquire_is_auth_error_and_clears_access() {
        let dir = TempDir::new().unwrap();
        let (vendor, store, tm) = manager(&dir);
        store
            .update_config(|c| c.credentials.access_token = "stale".into())
            .await
            .unwrap();
        vendor.fail_code.store(true, Ordering::SeqCst);
        let err = tm.reacquire().await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthFailure::Vendor(_))));
        assert!(store.credentials().await.access_token.is_empty());
    }

    #[tokio::test]
    async fn login_then_invalidate() {
        let dir = TempDir::new().unwrap();
        let (_vendor, store, tm) = manager(&dir);
        assert_eq!(tm.login("user", "pass").await.unwrap(), 77);
        assert_eq!(store.credentials().await.access_token, "access-login");
        tm.invalidate().await.unwrap();
        assert_eq!(store.credentials().await, Credentials::default());
    }
}
