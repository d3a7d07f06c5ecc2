//! S3-compatible object storage client.
//!
//! One bucket, two operations. No retries here -- callers decide what a
//! failed upload or download means for their task.

use anyhow::{Context, Result};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

/// Storage configuration, resolved from the `MINIO_*` env vars.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Endpoint host, host:port, or full URL.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
    pub region: String,
}

/// Derive the endpoint URL the SDK should talk to.
///
/// A Supabase storage subdomain is rewritten to its S3 API path; a full URL
/// is used verbatim; a bare host gets a protocol prefix from the SSL flag.
pub fn derive_endpoint_url(endpoint: &str, use_ssl: bool) -> String {
    if endpoint.starts_with("http") {
        endpoint.to_string()
    } else if endpoint.contains(".storage.supabase.co") {
        format!("https://{endpoint}/storage/v1/s3")
    } else {
        let protocol = if use_ssl { "https" } else { "http" };
        format!("{protocol}://{endpoint}")
    }
}

/// Thin wrapper over the S3 client bound to a single bucket.
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl ObjectStore {
    /// Build a client for the configured endpoint.
    ///
    /// Path-style addressing is forced so MinIO-style endpoints work without
    /// per-bucket DNS.
    pub fn new(config: &StorageConfig) -> Self {
        let endpoint_url = derive_endpoint_url(&config.endpoint, config.use_ssl);
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "relay-static",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload an object.
    pub async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("failed to upload object {key}"))?;
        Ok(())
    }

    /// Download an object's bytes.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to fetch object {key}"))?;

        let bytes = response
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read object body for {key}"))?;
        Ok(bytes.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_is_used_verbatim() {
        assert_eq!(
            derive_endpoint_url("http://minio:9000", true),
            "http://minio:9000"
        );
        assert_eq!(
            derive_endpoint_url("https://storage.example.com", false),
            "https://storage.example.com"
        );
    }

    #[test]
    fn supabase_subdomain_is_rewritten_to_s3_path() {
        assert_eq!(
            derive_endpoint_url("abc123.storage.supabase.co", true),
            "https://abc123.storage.supabase.co/storage/v1/s3"
        );
    }

    #[test]
    fn bare_host_gets_protocol_from_flag() {
        assert_eq!(derive_endpoint_url("minio:9000", false), "http://minio:9000");
        assert_eq!(derive_endpoint_url("minio:9000", true), "https://minio:9000");
    }
}
