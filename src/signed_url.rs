use crate::api::models::{read_blob_paths, write_signed_url_mapping};
use crate::backend::{BackendError, HttpMethod, UrlSigner};
use crate::config::{Config, StorageSettings, DEFAULT_URL_LIFETIME_SECS};
use anyhow::{ensure, Context, Result};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SIGNED_URL_CACHE_CAPACITY: u64 = 200;

/// Issues short-lived signed URLs, keeping already signed download URLs
/// around for the lifetime they were issued with.
pub struct SignedUrlProvider {
    signer: Arc<dyn UrlSigner>,
    url_lifetime_secs: AtomicU64,
    get_cache_enabled: bool,
    links: Cache<String, String>,
}

impl SignedUrlProvider {
    pub fn new(signer: Arc<dyn UrlSigner>, url_lifetime_secs: u64, get_cache_enabled: bool) -> Self {
        let links = Cache::builder()
            .max_capacity(SIGNED_URL_CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(url_lifetime_secs))
            .build();

        Self {
            signer,
            url_lifetime_secs: AtomicU64::new(url_lifetime_secs),
            get_cache_enabled,
            links,
        }
    }

    pub fn with_default_lifetime(signer: Arc<dyn UrlSigner>) -> Self {
        Self::new(signer, DEFAULT_URL_LIFETIME_SECS, false)
    }

    /// Builds a provider with the configured URL lifetime and GET cache switch.
    pub fn from_config(signer: Arc<dyn UrlSigner>, config: &Config) -> Self {
        Self::new(
            signer,
            config.url_lifetime_secs,
            config.signed_url_get_cache_enabled,
        )
    }

    /// Picks up a changed URL lifetime from a reloaded configuration.
    pub fn reload(&self, config: &Config) {
        self.set_url_lifetime_secs(config.url_lifetime_secs);
    }

    pub fn url_lifetime_secs(&self) -> u64 {
        self.url_lifetime_secs.load(Ordering::Relaxed)
    }

    /// Changes the lifetime of newly signed URLs. Entries already cached keep
    /// the expiry the cache was built with.
    pub fn set_url_lifetime_secs(&self, secs: u64) {
        self.url_lifetime_secs.store(secs, Ordering::Relaxed);
    }

    pub async fn get_signed_url(
        &self,
        method: HttpMethod,
        path: &str,
        settings: &StorageSettings,
        content_type: Option<&str>,
    ) -> Result<(String, u64), BackendError> {
        let lifetime = self.url_lifetime_secs();

        if method == HttpMethod::Get && self.get_cache_enabled {
            let key = cache_identity(settings, path);
            let url = self
                .links
                .try_get_with(key, self.sign(method, path, lifetime, content_type))
                .await
                .map_err(|err: Arc<BackendError>| (*err).clone())?;
            return Ok((url, lifetime));
        }

        let url = self.sign(method, path, lifetime, content_type).await?;
        Ok((url, lifetime))
    }

    async fn sign(
        &self,
        method: HttpMethod,
        path: &str,
        lifetime: u64,
        content_type: Option<&str>,
    ) -> Result<String, BackendError> {
        let url = self
            .signer
            .sign_url(path, method, Duration::from_secs(lifetime), content_type)
            .await?;
        log::debug!("signedURL: {url}");
        log::debug!("contentType: {}", content_type.unwrap_or_default());
        Ok(url)
    }

    /// Answers an upload authorization request: one resumable-session URL
    /// per requested blob, rendered as a signed URL mapping document.
    pub async fn resolve_upload_urls(
        &self,
        blob_paths_xml: &str,
        settings: &StorageSettings,
    ) -> Result<String> {
        let blob_paths = read_blob_paths(blob_paths_xml);
        ensure!(!blob_paths.is_empty(), "Blob paths collection is empty");

        let mut mapping = BTreeMap::new();
        for (blob_path, content_type) in &blob_paths {
            let (url, _) = self
                .get_signed_url(HttpMethod::Post, blob_path, settings, Some(content_type))
                .await
                .with_context(|| format!("Failed to resolve signed upload url for {blob_path}"))?;
            mapping.insert(blob_path.clone(), url);
        }

        Ok(write_signed_url_mapping(&mapping))
    }
}

fn cache_identity(settings: &StorageSettings, path: &str) -> String {
    let identity = format!(
        "{}{}{}{}",
        settings.credentials_kind.as_str(),
        settings.access_key.as_deref().unwrap_or_default(),
        settings.bucket_name,
        path
    )
    .to_lowercase();

    hex::encode(Sha256::digest(identity.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialsKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSigner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UrlSigner for CountingSigner {
        async fn sign_url(
            &self,
            blob_path: &str,
            method: HttpMethod,
            lifetime: Duration,
            content_type: Option<&str>,
        ) -> Result<String, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "https://signed.example/{blob_path}?m={method}&ttl={}&ct={}&n={n}",
                lifetime.as_secs(),
                content_type.unwrap_or("none")
            ))
        }
    }

    fn settings() -> StorageSettings {
        StorageSettings {
            credentials_kind: CredentialsKind::Key,
            access_key: Some("{\"private_key\":\"k\"}".into()),
            access_token: None,
            bucket_name: "artifacts".into(),
        }
    }

    #[tokio::test]
    async fn test_get_urls_are_cached_within_ttl() {
        let signer = Arc::new(CountingSigner::default());
        let provider = SignedUrlProvider::new(signer.clone(), 60, true);

        let (first, lifetime) = provider
            .get_signed_url(HttpMethod::Get, "p/a.txt", &settings(), None)
            .await
            .unwrap();
        let (second, _) = provider
            .get_signed_url(HttpMethod::Get, "p/a.txt", &settings(), None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(lifetime, 60);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_get_url_expires_with_ttl() {
        let signer = Arc::new(CountingSigner::default());
        let provider = SignedUrlProvider::new(signer.clone(), 1, true);

        let (first, _) = provider
            .get_signed_url(HttpMethod::Get, "p/a.txt", &settings(), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let (second, _) = provider
            .get_signed_url(HttpMethod::Get, "p/a.txt", &settings(), None)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_post_urls_are_never_cached() {
        let signer = Arc::new(CountingSigner::default());
        let provider = SignedUrlProvider::new(signer.clone(), 60, true);

        let (first, _) = provider
            .get_signed_url(HttpMethod::Post, "p/a.txt", &settings(), Some("text/plain"))
            .await
            .unwrap();
        let (second, _) = provider
            .get_signed_url(HttpMethod::Post, "p/a.txt", &settings(), Some("text/plain"))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(first.contains("m=POST"));
        assert!(first.contains("ct=text/plain"));
    }

    #[tokio::test]
    async fn test_cache_disabled_signs_every_time() {
        let signer = Arc::new(CountingSigner::default());
        let provider = SignedUrlProvider::new(signer.clone(), 60, false);

        for _ in 0..3 {
            provider
                .get_signed_url(HttpMethod::Get, "p/a.txt", &settings(), None)
                .await
                .unwrap();
        }
        assert_eq!(signer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lifetime_is_reloadable() {
        let provider =
            SignedUrlProvider::with_default_lifetime(Arc::new(CountingSigner::default()));
        provider.set_url_lifetime_secs(300);

        let (url, lifetime) = provider
            .get_signed_url(HttpMethod::Post, "p/a.txt", &settings(), None)
            .await
            .unwrap();
        assert_eq!(lifetime, 300);
        assert!(url.contains("ttl=300"));
    }

    #[tokio::test]
    async fn test_provider_follows_configuration() {
        let signer = Arc::new(CountingSigner::default());
        let mut config = Config {
            url_lifetime_secs: 90,
            signed_url_get_cache_enabled: true,
            ..Config::default()
        };
        let provider = SignedUrlProvider::from_config(signer.clone(), &config);

        for _ in 0..2 {
            let (url, lifetime) = provider
                .get_signed_url(HttpMethod::Get, "p/a.txt", &settings(), None)
                .await
                .unwrap();
            assert_eq!(lifetime, 90);
            assert!(url.contains("ttl=90"));
        }
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);

        config.url_lifetime_secs = 30;
        provider.reload(&config);
        let (_, lifetime) = provider
            .get_signed_url(HttpMethod::Post, "p/a.txt", &settings(), None)
            .await
            .unwrap();
        assert_eq!(lifetime, 30);
    }

    #[tokio::test]
    async fn test_default_configuration_disables_get_cache() {
        let signer = Arc::new(CountingSigner::default());
        let provider = SignedUrlProvider::from_config(signer.clone(), &Config::default());

        for _ in 0..2 {
            provider
                .get_signed_url(HttpMethod::Get, "p/a.txt", &settings(), None)
                .await
                .unwrap();
        }
        assert_eq!(provider.url_lifetime_secs(), DEFAULT_URL_LIFETIME_SECS);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cache_identity_is_case_insensitive() {
        let mut upper = settings();
        upper.bucket_name = "ARTIFACTS".into();
        assert_eq!(
            cache_identity(&settings(), "P/A.txt"),
            cache_identity(&upper, "p/a.TXT")
        );
        assert_ne!(
            cache_identity(&settings(), "p/a.txt"),
            cache_identity(&settings(), "p/b.txt")
        );
    }

    #[tokio::test]
    async fn test_resolve_upload_urls_renders_mapping() {
        let provider = SignedUrlProvider::new(Arc::new(CountingSigner::default()), 60, true);
        let request = r#"<blobPaths><blobPath contentType="application/zip">p/a.zip</blobPath></blobPaths>"#;

        let response = provider.resolve_upload_urls(request, &settings()).await.unwrap();
        let mapping = crate::api::models::read_signed_url_mapping(&response);

        let url = mapping.get("p/a.zip").expect("mapping for requested blob");
        assert!(url.contains("m=POST"));
        assert!(url.contains("ct=application/zip"));
    }

    #[tokio::test]
    async fn test_resolve_upload_urls_rejects_empty_request() {
        let provider = SignedUrlProvider::new(Arc::new(CountingSigner::default()), 60, true);
        let err = provider
            .resolve_upload_urls("not xml", &settings())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
