//! Cloud Storage JSON API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, GcpClient, ObjectPage, ObjectStore};
use crate::domain::AudioReference;
use crate::error::{PipelineError, Result};

const STORAGE_API: &str = "https://storage.googleapis.com";

/// Objects requested per listing page
const PAGE_SIZE: &str = "1000";

/// Cloud Storage client
pub struct GcsStore {
    client: GcpClient,
    endpoint: String,
}

impl GcsStore {
    pub fn new(client: GcpClient) -> Self {
        Self::with_endpoint(client, STORAGE_API)
    }

    /// Client for a non-default API root (emulators, tests)
    pub fn with_endpoint(client: GcpClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}", self.endpoint, bucket)
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.endpoint, bucket)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    /// uint64 encoded as a string
    size: Option<String>,
    content_type: Option<String>,
    time_created: Option<DateTime<Utc>>,
}

impl ListResponse {
    fn into_page(self, bucket: &str) -> ObjectPage {
        let objects = self
            .items
            .into_iter()
            .map(|item| AudioReference {
                size: item.size.and_then(|s| s.parse().ok()),
                content_type: item.content_type,
                created: item.time_created,
                ..AudioReference::new(bucket, item.name)
            })
            .collect();

        ObjectPage {
            objects,
            next_page_token: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

fn storage_error(bucket: &str, err: ApiError) -> PipelineError {
    if err.is_not_found() {
        PipelineError::storage(bucket, format!("bucket not found ({})", err))
    } else if err.is_permission_denied() {
        PipelineError::storage(bucket, format!("permission denied ({})", err))
    } else {
        PipelineError::storage(bucket, err.to_string())
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn check_bucket(&self, bucket: &str) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .get(&self.bucket_url(bucket), &[("fields", "name")])
            .await
            .map_err(|e| storage_error(bucket, e))?;
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage> {
        let url = format!("{}/o", self.bucket_url(bucket));
        let mut query = vec![
            ("prefix", prefix),
            ("maxResults", PAGE_SIZE),
            (
                "fields",
                "items(name,size,contentType,timeCreated),nextPageToken",
            ),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response: ListResponse = self
            .client
            .get(&url, &query)
            .await
            .map_err(|e| storage_error(bucket, e))?;

        debug!(bucket, prefix, objects = response.items.len(), "Listed storage page");
        Ok(response.into_page(bucket))
    }

    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(body)
            .map_err(|e| PipelineError::storage(bucket, format!("cannot encode {}: {}", object, e)))?;

        self.client
            .post_bytes(
                &self.upload_url(bucket),
                &[("uploadType", "media"), ("name", object)],
                "application/json",
                bytes,
            )
            .await
            .map_err(|e| storage_error(bucket, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mockito::{Matcher, Server};

    use crate::config::Settings;
    use crate::core::AudioLister;

    #[test]
    fn test_urls() {
        let store = GcsStore::new(GcpClient::new("token"));
        assert_eq!(
            store.bucket_url("calls"),
            "https://storage.googleapis.com/storage/v1/b/calls"
        );
        assert_eq!(
            store.upload_url("archive"),
            "https://storage.googleapis.com/upload/storage/v1/b/archive/o"
        );
    }

    #[test]
    fn test_list_response_into_page() {
        let body = r#"{
            "items": [
                {"name": "2024/merged_1.wav", "size": "48000", "contentType": "audio/wav",
                 "timeCreated": "2024-06-01T10:00:00.000Z"},
                {"name": "2024/notes.txt"}
            ],
            "nextPageToken": "abc"
        }"#;
        let response: ListResponse = serde_json::from_str(body).unwrap();
        let page = response.into_page("calls");

        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].uri(), "gs://calls/2024/merged_1.wav");
        assert_eq!(page.objects[0].size, Some(48000));
        assert!(page.objects[0].created.is_some());
        assert_eq!(page.objects[1].size, None);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_empty_listing() {
        let response: ListResponse = serde_json::from_str("{}").unwrap();
        let page = response.into_page("calls");
        assert!(page.objects.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_storage_error_classification() {
        let err = storage_error("calls", ApiError::from_response(403, ""));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("permission denied"));

        let err = storage_error("calls", ApiError::from_response(404, ""));
        assert!(err.to_string().contains("bucket not found"));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_fatal() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/storage/v1/b/calls")
            .match_query(Matcher::UrlEncoded("fields".into(), "name".into()))
            .match_header("authorization", "Bearer token")
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"message":"The specified bucket does not exist."}}"#)
            .create();

        let store = GcsStore::with_endpoint(GcpClient::new("token"), server.url());
        let err = store.check_bucket("calls").await.unwrap_err();

        assert!(err.is_fatal());
        assert!(err.to_string().contains("bucket not found"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_forbidden_listing_is_fatal() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/storage/v1/b/calls/o")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"caller does not have storage.objects.list access"}}"#)
            .create();

        let store = GcsStore::with_endpoint(GcpClient::new("token"), server.url());
        let err = store.list_page("calls", "", None).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_lister_follows_page_tokens() {
        let mut server = Server::new_async().await;
        // First request carries no pageToken, so the fields parameter is last
        let first = server
            .mock("GET", "/storage/v1/b/calls/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("prefix".into(), "2024/".into()),
                Matcher::Regex("nextPageToken$".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"items":[{"name":"2024/merged_a.wav"},{"name":"2024/notes.txt"}],
                    "nextPageToken":"page-2"}"#,
            )
            .expect(1)
            .create();
        let second = server
            .mock("GET", "/storage/v1/b/calls/o")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "page-2".into()))
            .with_status(200)
            .with_body(r#"{"items":[{"name":"2024/merged_b.wav"}]}"#)
            .expect(1)
            .create();

        let settings = Settings::from_yaml(
            "gcp: {project_id: p}\nstorage: {input_bucket: calls, input_folder: 2024/}",
        )
        .unwrap();
        let store = GcsStore::with_endpoint(GcpClient::new("token"), server.url());
        let mut lister = AudioLister::new(Arc::new(store), &settings.storage, None).unwrap();

        let files = lister.collect_all().await.unwrap();
        let uris: Vec<String> = files.iter().map(|f| f.uri()).collect();
        assert_eq!(uris, vec!["gs://calls/2024/merged_a.wav", "gs://calls/2024/merged_b.wav"]);

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_json_posts_media() {
        let mut server = Server::new_async().await;
        let upload = server
            .mock("POST", "/upload/storage/v1/b/archive/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "media".into()),
                Matcher::UrlEncoded("name".into(), "records/call.json".into()),
            ]))
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({"medium": "PHONE_CALL"})))
            .with_status(200)
            .with_body(r#"{"name":"records/call.json"}"#)
            .create();

        let store = GcsStore::with_endpoint(GcpClient::new("token"), server.url());
        store
            .upload_json("archive", "records/call.json", &serde_json::json!({"medium": "PHONE_CALL"}))
            .await
            .unwrap();

        upload.assert_async().await;
    }
}
