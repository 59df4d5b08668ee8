//! Firestore REST client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{response_error, trim_base};
use crate::backend::{AuthUser, BackendError, DocumentRef, DocumentStore};

/// Page size used when listing collections.
const PAGE_SIZE: &str = "300";

pub struct Firestore {
    client: Client,
    /// `{base}/v1/projects/{project}/databases/(default)/documents`
    documents_url: String,
    /// Resource-name prefix stripped from returned document names.
    name_prefix: String,
}

#[derive(Debug, Deserialize)]
struct DocumentName {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<DocumentName>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<DocumentName>,
}

impl Firestore {
    pub fn new(client: Client, base_url: &str, project_id: &str) -> Self {
        let name_prefix = format!("projects/{}/databases/(default)/documents/", project_id);
        Self {
            client,
            documents_url: format!("{}/v1/{}", trim_base(base_url), name_prefix.trim_end_matches('/')),
            name_prefix,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.documents_url, path.trim_matches('/'))
    }

    fn to_ref(&self, name: String) -> DocumentRef {
        match name.strip_prefix(&self.name_prefix) {
            Some(path) => DocumentRef::new(path),
            None => DocumentRef::new(name),
        }
    }
}

#[async_trait]
impl DocumentStore for Firestore {
    async fn get(
        &self,
        user: &AuthUser,
        path: &str,
    ) -> Result<Option<serde_json::Value>, BackendError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&user.id_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(response_error(response).await),
        }
    }

    async fn delete(&self, user: &AuthUser, path: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.url(path))
            .bearer_auth(&user.id_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(response_error(response).await),
        }
    }

    async fn list(
        &self,
        user: &AuthUser,
        collection_path: &str,
    ) -> Result<Vec<DocumentRef>, BackendError> {
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", PAGE_SIZE), ("showMissing", "true")];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            let response = self
                .client
                .get(self.url(collection_path))
                .bearer_auth(&user.id_token)
                .query(&query)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(response_error(response).await);
            }

            let page: ListDocumentsResponse = response.json().await?;
            refs.extend(page.documents.into_iter().map(|d| self.to_ref(d.name)));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(refs)
    }

    async fn query_by_field(
        &self,
        user: &AuthUser,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<DocumentRef>, BackendError> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": { "stringValue": value }
                    }
                },
                "select": { "fields": [{ "fieldPath": "__name__" }] }
            }
        });

        let response = self
            .client
            .post(format!("{}:runQuery", self.documents_url))
            .bearer_auth(&user.id_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        let items: Vec<RunQueryItem> = response.json().await?;
        Ok(items
            .into_iter()
            .filter_map(|item| item.document)
            .map(|d| self.to_ref(d.name))
            .collect())
    }
}
