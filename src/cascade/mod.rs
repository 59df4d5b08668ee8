//! Cascade deletion of everything an account owns.
//!
//! Records are discovered first. A failure while discovering the primary
//! hierarchy aborts the cascade before anything is deleted, since data could
//! otherwise stay behind unnoticed. Once discovery succeeds, deletes within a
//! phase are issued together and joined; individual failures are collected
//! and logged but never abort the cascade.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use serde::Serialize;
use thiserror::Error;

use crate::backend::{AuthUser, BackendError, BlobStore, DocumentRef, DocumentStore};

/// Where an account's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeLayout {
    /// Collection holding one root record per account, keyed by uid.
    pub root_collection: String,
    /// Sub-collection of the root record (groups).
    pub group_collection: String,
    /// Sub-collection of each group (members).
    pub member_collection: String,
    /// Sub-collection of each group (time entries).
    pub entry_collection: String,
    /// Flat top-level collection referencing the account by owner field.
    pub auxiliary_collection: String,
    pub auxiliary_owner_field: String,
    /// Blob prefix under which each account has a `{uid}/` folder.
    pub blob_root: String,
}

impl Default for CascadeLayout {
    fn default() -> Self {
        Self {
            root_collection: "users".to_string(),
            group_collection: "classes".to_string(),
            member_collection: "students".to_string(),
            entry_collection: "attendance".to_string(),
            auxiliary_collection: "feedback".to_string(),
            auxiliary_owner_field: "userId".to_string(),
            blob_root: "users".to_string(),
        }
    }
}

impl CascadeLayout {
    pub fn root_path(&self, uid: &str) -> String {
        format!("{}/{}", self.root_collection, uid)
    }

    pub fn blob_prefix(&self, uid: &str) -> String {
        format!("{}/{}/", self.blob_root.trim_end_matches('/'), uid)
    }
}

/// Outcome of a completed cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub root_deleted: bool,
    pub groups_deleted: usize,
    /// Root, group, member and entry records.
    pub records_deleted: usize,
    pub auxiliary_deleted: usize,
    pub blobs_deleted: usize,
    /// Tolerated failures, one line per item.
    #[serde(skip)]
    pub failures: Vec<String>,
}

/// Fatal cascade failure.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("failed to discover {path}: {source}")]
    Discovery {
        path: String,
        #[source]
        source: BackendError,
    },
}

struct GroupPlan {
    group: DocumentRef,
    leaves: Vec<DocumentRef>,
}

struct RecordPlan {
    root: Option<String>,
    groups: Vec<GroupPlan>,
}

#[derive(Default)]
struct Tally {
    deleted: usize,
    failures: Vec<String>,
}

impl Tally {
    fn absorb(&mut self, target: &str, outcome: Result<(), BackendError>) -> bool {
        match outcome {
            Ok(()) => {
                self.deleted += 1;
                true
            }
            Err(e) => {
                tracing::warn!(target_path = %target, error = %e, "Delete failed, continuing");
                self.failures.push(format!("{}: {}", target, e));
                false
            }
        }
    }

    fn merge(&mut self, other: Tally) {
        self.deleted += other.deleted;
        self.failures.extend(other.failures);
    }
}

/// Removes an account's records, auxiliary records and blobs.
pub struct CascadeDeleter {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    layout: CascadeLayout,
}

impl CascadeDeleter {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        layout: CascadeLayout,
    ) -> Self {
        Self {
            documents,
            blobs,
            layout,
        }
    }

    pub fn layout(&self) -> &CascadeLayout {
        &self.layout
    }

    /// Delete everything owned by `user`, leaving the identity in place.
    pub async fn run(&self, user: &AuthUser) -> Result<CascadeReport, CascadeError> {
        tracing::info!(uid = %user.uid, "Starting cascade deletion");

        let plan = self.discover(user).await?;
        let root_present = plan.root.is_some();
        let group_count = plan.groups.len();

        let ((records, groups_deleted, root_deleted), auxiliary) =
            futures::join!(self.delete_records(user, plan), self.delete_auxiliary(user));
        let blobs = self.delete_blobs(user).await;

        let mut failures = records.failures;
        failures.extend(auxiliary.failures);
        failures.extend(blobs.failures);

        let report = CascadeReport {
            root_deleted,
            groups_deleted,
            records_deleted: records.deleted,
            auxiliary_deleted: auxiliary.deleted,
            blobs_deleted: blobs.deleted,
            failures,
        };

        tracing::info!(
            uid = %user.uid,
            root_present,
            groups = group_count,
            records = report.records_deleted,
            auxiliary = report.auxiliary_deleted,
            blobs = report.blobs_deleted,
            failures = report.failures.len(),
            "Cascade deletion finished"
        );
        Ok(report)
    }

    async fn discover(&self, user: &AuthUser) -> Result<RecordPlan, CascadeError> {
        let root_path = self.layout.root_path(&user.uid);

        let root = match self.documents.get(user, &root_path).await {
            Ok(Some(_)) => Some(root_path.clone()),
            Ok(None) | Err(BackendError::NotFound(_)) => None,
            Err(BackendError::PermissionDenied(reason)) => {
                tracing::debug!(path = %root_path, %reason, "Root record not readable, skipping");
                None
            }
            Err(source) => {
                return Err(CascadeError::Discovery {
                    path: root_path,
                    source,
                })
            }
        };

        let groups_path = format!("{}/{}", root_path, self.layout.group_collection);
        let groups = self.list_primary(user, &groups_path).await?;
        let groups = try_join_all(groups.into_iter().map(|group| self.discover_group(user, group))).await?;

        Ok(RecordPlan { root, groups })
    }

    async fn discover_group(
        &self,
        user: &AuthUser,
        group: DocumentRef,
    ) -> Result<GroupPlan, CascadeError> {
        let members_path = group.child_collection(&self.layout.member_collection);
        let entries_path = group.child_collection(&self.layout.entry_collection);

        let (mut leaves, entries) = futures::try_join!(
            self.list_primary(user, &members_path),
            self.list_primary(user, &entries_path)
        )?;
        leaves.extend(entries);

        Ok(GroupPlan { group, leaves })
    }

    async fn list_primary(
        &self,
        user: &AuthUser,
        collection_path: &str,
    ) -> Result<Vec<DocumentRef>, CascadeError> {
        match self.documents.list(user, collection_path).await {
            Ok(refs) => Ok(refs),
            Err(BackendError::NotFound(_)) => Ok(Vec::new()),
            Err(source) => {
                tracing::error!(path = %collection_path, error = %source, "Listing failed, aborting cascade");
                Err(CascadeError::Discovery {
                    path: collection_path.to_string(),
                    source,
                })
            }
        }
    }

    /// Returns the tally, the number of deleted group records and whether
    /// the root record was deleted.
    async fn delete_records(&self, user: &AuthUser, plan: RecordPlan) -> (Tally, usize, bool) {
        let root = async {
            match plan.root.as_deref() {
                Some(path) => Some((path, self.documents.delete(user, path).await)),
                None => None,
            }
        };
        let groups = join_all(plan.groups.iter().map(|group| self.delete_group(user, group)));

        let (root_outcome, group_tallies) = futures::join!(root, groups);

        let mut tally = Tally::default();
        let mut groups_deleted = 0;
        for (group_tally, group_deleted) in group_tallies {
            tally.merge(group_tally);
            if group_deleted {
                groups_deleted += 1;
            }
        }

        let root_deleted = match root_outcome {
            Some((path, outcome)) => tally.absorb(path, outcome),
            None => false,
        };

        (tally, groups_deleted, root_deleted)
    }

    /// Delete the members and entries of a group, then the group record.
    async fn delete_group(&self, user: &AuthUser, plan: &GroupPlan) -> (Tally, bool) {
        tracing::debug!(group = %plan.group.id(), leaves = plan.leaves.len(), "Deleting group");
        let outcomes = join_all(
            plan.leaves
                .iter()
                .map(|leaf| self.documents.delete(user, &leaf.path)),
        )
        .await;

        let mut tally = Tally::default();
        for (leaf, outcome) in plan.leaves.iter().zip(outcomes) {
            tally.absorb(&leaf.path, outcome);
        }

        let outcome = self.documents.delete(user, &plan.group.path).await;
        let deleted = tally.absorb(&plan.group.path, outcome);
        (tally, deleted)
    }

    async fn delete_auxiliary(&self, user: &AuthUser) -> Tally {
        let mut tally = Tally::default();

        let matches = match self
            .documents
            .query_by_field(
                user,
                &self.layout.auxiliary_collection,
                &self.layout.auxiliary_owner_field,
                &user.uid,
            )
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(
                    collection = %self.layout.auxiliary_collection,
                    error = %e,
                    "Auxiliary record query failed, skipping"
                );
                tally
                    .failures
                    .push(format!("{}: {}", self.layout.auxiliary_collection, e));
                return tally;
            }
        };

        let outcomes = join_all(matches.iter().map(|doc| self.documents.delete(user, &doc.path))).await;
        for (doc, outcome) in matches.iter().zip(outcomes) {
            tally.absorb(&doc.path, outcome);
        }
        tally
    }

    /// Walk the blob namespace breadth-first, deleting every object.
    async fn delete_blobs(&self, user: &AuthUser) -> Tally {
        let mut tally = Tally::default();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([self.layout.blob_prefix(&user.uid)]);

        while let Some(prefix) = queue.pop_front() {
            if !visited.insert(prefix.clone()) {
                continue;
            }

            let listing = match self.blobs.list(user, &prefix).await {
                Ok(listing) => listing,
                Err(BackendError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::warn!(%prefix, error = %e, "Blob listing failed, skipping folder");
                    tally.failures.push(format!("{}: {}", prefix, e));
                    continue;
                }
            };

            let outcomes = join_all(listing.items.iter().map(|name| self.blobs.delete(user, name))).await;
            for (name, outcome) in listing.items.iter().zip(outcomes) {
                tally.absorb(name, outcome);
            }

            queue.extend(listing.prefixes);
        }

        tally
    }
}
