//! Google Cloud Storage JSON API client.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use super::{BucketStore, ObjectPage, StorageError, StorageFuture, TokenSource};

/// Default JSON API base URL.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com/storage/v1";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Placement settings for new buckets and the API location.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcsSettings {
    /// JSON API base URL.
    pub endpoint: String,
    /// Bucket location, for example `US`.
    pub location: String,
    /// Bucket storage class, for example `STANDARD`.
    pub storage_class: String,
}

impl Default for GcsSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_STORAGE_ENDPOINT.to_owned(),
            location: String::from("US"),
            storage_class: String::from("STANDARD"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Operation {
    ListBuckets,
    InsertBucket,
    DeleteBucket,
    ListObjects,
    DeleteObject,
}

impl Operation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ListBuckets => "list buckets",
            Self::InsertBucket => "insert bucket",
            Self::DeleteBucket => "delete bucket",
            Self::ListObjects => "list objects",
            Self::DeleteObject => "delete object",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertBucketRequest<'a> {
    name: &'a str,
    location: &'a str,
    storage_class: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<NamedItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct NamedItem {
    name: String,
}

/// [`BucketStore`] backed by the Cloud Storage JSON API.
#[derive(Clone, Debug)]
pub struct GcsStore {
    settings: GcsSettings,
    tokens: TokenSource,
}

impl GcsStore {
    /// Builds a client, validating the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transport`] when the endpoint is not an
    /// absolute hierarchical URL.
    pub fn new(settings: GcsSettings, tokens: TokenSource) -> Result<Self, StorageError> {
        let store = Self { settings, tokens };
        store.url(&[])?;
        Ok(store)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.settings.endpoint).map_err(|err| StorageError::Transport {
            message: format!("invalid storage endpoint {}: {err}", self.settings.endpoint),
        })?;
        url.path_segments_mut()
            .map_err(|()| StorageError::Transport {
                message: format!(
                    "storage endpoint {} cannot carry a path",
                    self.settings.endpoint
                ),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<(u16, Vec<u8>), StorageError> {
        let token = self.tokens.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| StorageError::Transport {
                message: format!("{}: {err}", operation.as_str()),
            })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| StorageError::Transport {
                message: format!("{}: {err}", operation.as_str()),
            })?;
        Ok((status, body.to_vec()))
    }

    async fn list_page(
        &self,
        operation: Operation,
        bucket: &str,
        mut url: Url,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, StorageError> {
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        let (status, body) = self.execute(operation, HTTP_CLIENT.get(url)).await?;
        check_status(operation, bucket, status, &body)?;
        parse_page(operation, &body)
    }
}

impl BucketStore for GcsStore {
    fn list_buckets<'a>(&'a self, project_id: &'a str) -> StorageFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut names = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let mut url = self.url(&["b"])?;
                url.query_pairs_mut().append_pair("project", project_id);
                let page = self
                    .list_page(Operation::ListBuckets, "", url, cursor.as_deref())
                    .await?;
                names.extend(page.names);
                match page.next_page_token {
                    Some(token) => cursor = Some(token),
                    None => break,
                }
            }
            Ok(names)
        })
    }

    fn insert_bucket<'a>(
        &'a self,
        project_id: &'a str,
        bucket: &'a str,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let mut url = self.url(&["b"])?;
            url.query_pairs_mut().append_pair("project", project_id);
            let payload = InsertBucketRequest {
                name: bucket,
                location: &self.settings.location,
                storage_class: &self.settings.storage_class,
            };
            let (status, body) = self
                .execute(Operation::InsertBucket, HTTP_CLIENT.post(url).json(&payload))
                .await?;
            check_status(Operation::InsertBucket, bucket, status, &body)
        })
    }

    fn delete_bucket<'a>(&'a self, bucket: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&["b", bucket])?;
            let (status, body) = self
                .execute(Operation::DeleteBucket, HTTP_CLIENT.delete(url))
                .await?;
            check_status(Operation::DeleteBucket, bucket, status, &body)
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        page_token: Option<&'a str>,
    ) -> StorageFuture<'a, ObjectPage> {
        Box::pin(async move {
            let url = self.url(&["b", bucket, "o"])?;
            self.list_page(Operation::ListObjects, bucket, url, page_token)
                .await
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, object: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&["b", bucket, "o", object])?;
            let (status, body) = self
                .execute(Operation::DeleteObject, HTTP_CLIENT.delete(url))
                .await?;
            // Already gone is what we wanted.
            if status == 404 {
                return Ok(());
            }
            check_status(Operation::DeleteObject, bucket, status, &body)
        })
    }
}

fn check_status(
    operation: Operation,
    bucket: &str,
    status: u16,
    body: &[u8],
) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let bucket_name = bucket.to_owned();
    Err(match (operation, status) {
        (Operation::InsertBucket, 409) => StorageError::BucketAlreadyExists {
            bucket: bucket_name,
        },
        (Operation::DeleteBucket, 409) => StorageError::BucketNotEmpty {
            bucket: bucket_name,
        },
        (Operation::DeleteBucket | Operation::ListObjects, 404) => StorageError::BucketNotFound {
            bucket: bucket_name,
        },
        _ => StorageError::Api {
            operation: operation.as_str().to_owned(),
            status,
            message: String::from_utf8_lossy(body).trim().to_owned(),
        },
    })
}

fn parse_page(operation: Operation, body: &[u8]) -> Result<ObjectPage, StorageError> {
    let parsed: ListResponse =
        serde_json::from_slice(body).map_err(|err| StorageError::Decode {
            operation: operation.as_str().to_owned(),
            message: err.to_string(),
        })?;
    Ok(ObjectPage {
        names: parsed.items.into_iter().map(|item| item.name).collect(),
        next_page_token: parsed.next_page_token.filter(|token| !token.is_empty()),
    })
}
