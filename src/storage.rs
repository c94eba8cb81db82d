// src/storage.rs
//
// Object storage for listing images.
// Keys follow `<category>/<entityId>_<filename>`.

use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct Storage {
    client: S3Client,
    config: StorageConfig,
}

pub fn sanitize(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn object_key(category: &str, entity_id: impl std::fmt::Display, filename: &str) -> String {
    format!("{category}/{entity_id}_{}", sanitize(filename))
}

pub fn build_public_url(base: &str, bucket: &str, key: &str) -> String {
    let trimmed = base.trim_end_matches('/');

    // https://host/{bucket}/{key} or https://bucket.host/{key}
    if trimmed.contains("{bucket}") || trimmed.contains("{key}") {
        return trimmed.replace("{bucket}", bucket).replace("{key}", key);
    }

    if trimmed.contains(bucket) {
        format!("{}/{}", trimmed, key)
    } else {
        format!("{}/{}/{}", trimmed, bucket, key)
    }
}

impl Storage {
    pub fn new(client: S3Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    pub fn public_url(&self, key: &str) -> String {
        build_public_url(&self.config.public_base_url, &self.config.bucket, key)
    }

    /// Stores `bytes` under `key` and returns the public URL.
    pub async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<String> {
        if !self.config.mock {
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(|e| AppError::Storage(format!("put {key}: {e}")))?;
        }
        Ok(self.public_url(key))
    }

    /// Deletes objects, logging failures. Orphaned blobs are acceptable.
    pub async fn delete_best_effort(&self, keys: &[String]) {
        if self.config.mock {
            return;
        }
        for key in keys {
            if let Err(e) = self
                .client
                .delete_object()
                .bucket(&self.config.bucket)
                .key(key)
                .send()
                .await
            {
                log::warn!("s3 delete failed key={}: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_category_entity_filename() {
        assert_eq!(object_key("cars", 42, "front view.JPG"), "cars/42_frontview.JPG");
        assert_eq!(object_key("hotels", 7, "../../etc/passwd"), "hotels/7_etcpasswd");
        assert_eq!(object_key("clubs", 1, "///"), "clubs/1_file");
    }

    #[test]
    fn public_url_variants() {
        assert_eq!(
            build_public_url("https://cdn.example.com/", "media", "cars/1_a.jpg"),
            "https://cdn.example.com/media/cars/1_a.jpg"
        );
        assert_eq!(
            build_public_url("https://media.s3.amazonaws.com", "media", "cars/1_a.jpg"),
            "https://media.s3.amazonaws.com/cars/1_a.jpg"
        );
        assert_eq!(
            build_public_url("https://{bucket}.host/{key}", "media", "k"),
            "https://media.host/k"
        );
    }
}
