//! Key→bytes object store for non-content-addressed artifacts.

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

use crate::CasError;

/// S3-compatible object store, or a null sink when none is configured.
pub enum ObjectStore {
    S3 {
        client: aws_sdk_s3::Client,
        bucket: String,
        public_base: Option<String>,
    },
    Null,
}

impl ObjectStore {
    /// Build a client against any S3-compatible endpoint (path-style access,
    /// static credentials).
    pub async fn s3(
        endpoint: &str,
        bucket: impl Into<String>,
        access_key: &str,
        secret_key: &str,
        public_base: Option<String>,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "refinery");
        let base = aws_config::from_env()
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&base)
            .force_path_style(true)
            .build();
        Self::S3 {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: bucket.into(),
            public_base,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Write `bytes` under `key`. The null store silently discards.
    pub async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), CasError> {
        match self {
            Self::S3 { client, bucket, .. } => {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .content_type(content_type)
                    .body(ByteStream::from(bytes))
                    .send()
                    .await
                    .map_err(|err| CasError::ObjectStore(err.to_string()))?;
                Ok(())
            }
            Self::Null => Ok(()),
        }
    }

    /// Browser-friendly URL for a stored key, when one can be formed.
    pub fn url(&self, key: &str) -> Option<String> {
        match self {
            Self::S3 {
                bucket,
                public_base: Some(base),
                ..
            } => Some(format!("{}/{bucket}/{key}", base.trim_end_matches('/'))),
            Self::S3 { .. } | Self::Null => None,
        }
    }
}
