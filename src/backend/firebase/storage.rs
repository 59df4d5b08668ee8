//! Firebase Storage REST client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{response_error, trim_base};
use crate::backend::{AuthUser, BackendError, BlobListing, BlobStore};

pub struct FirebaseStorage {
    client: Client,
    /// `{base}/v0/b/{bucket}/o`
    objects_url: String,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsResponse {
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl FirebaseStorage {
    pub fn new(client: Client, base_url: &str, bucket: &str) -> Self {
        Self {
            client,
            objects_url: format!("{}/v0/b/{}/o", trim_base(base_url), bucket),
        }
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/{}", self.objects_url, urlencoding::encode(name))
    }
}

#[async_trait]
impl BlobStore for FirebaseStorage {
    async fn list(&self, user: &AuthUser, prefix: &str) -> Result<BlobListing, BackendError> {
        let mut listing = BlobListing::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("prefix", prefix), ("delimiter", "/")];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            let response = self
                .client
                .get(&self.objects_url)
                .bearer_auth(&user.id_token)
                .query(&query)
                .send()
                .await?;

            match response.status() {
                StatusCode::NOT_FOUND => return Ok(listing),
                status if status.is_success() => {}
                _ => return Err(response_error(response).await),
            }

            let page: ListObjectsResponse = response.json().await?;
            listing.items.extend(page.items.into_iter().map(|item| item.name));
            listing.prefixes.extend(page.prefixes);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(listing)
    }

    async fn delete(&self, user: &AuthUser, name: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.object_url(name))
            .bearer_auth(&user.id_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(response_error(response).await),
        }
    }
}
