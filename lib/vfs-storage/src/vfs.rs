//! Virtual file system entities: folders forming a tree, and files in folders.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    Condition, Context, Entity, Filter, Model, Op, Operation, Pager, QueryExecutor, Repository,
    Search, SortField, StatusId, StorageDatetime, StorageError,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "vfs_folders")]
#[serde(rename_all = "camelCase", default)]
pub struct VfsFolder {
    #[id]
    pub id: i64,
    pub parent_folder_id: Option<i64>,
    pub title: String,
    pub is_favorite: bool,
    #[created_at]
    pub created_at: Option<StorageDatetime>,
    #[status]
    pub status_id: StatusId,

    #[relation(local = "parent_folder_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<Box<VfsFolder>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "vfs_files")]
#[serde(rename_all = "camelCase", default)]
pub struct VfsFile {
    #[id]
    pub id: i64,
    pub folder_id: i64,
    pub title: String,
    pub path: String,
    /// Free-form metadata stored as JSON.
    pub params: Option<serde_json::Value>,
    pub is_favorite: bool,
    pub mime_type: String,
    pub file_size: Option<i64>,
    pub file_exists: bool,
    #[created_at]
    pub created_at: Option<StorageDatetime>,
    #[status]
    pub status_id: StatusId,

    #[relation(local = "folder_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<Box<VfsFolder>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VfsFolderSearch {
    pub id: Option<i64>,
    pub ids: Option<Vec<i64>>,
    pub parent_folder_id: Option<i64>,
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    pub is_favorite: Option<bool>,
    pub status_id: Option<StatusId>,
    pub status_ids: Option<Vec<StatusId>>,
}

impl Search for VfsFolderSearch {
    fn filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        if let Some(id) = self.id {
            filters.push(Filter::new("id", Condition::eq("id", id)));
        }
        if let Some(ids) = self.ids.as_ref().filter(|ids| !ids.is_empty()) {
            filters.push(Filter::new("ids", Condition::r#in("id", ids.clone())));
        }
        if let Some(parent_folder_id) = self.parent_folder_id {
            filters.push(Filter::new(
                "parent_folder_id",
                Condition::eq("parent_folder_id", parent_folder_id),
            ));
        }
        if let Some(title) = &self.title {
            filters.push(Filter::new("title", Condition::contains("title", title)));
        }
        if let Some(is_favorite) = self.is_favorite {
            filters.push(Filter::new(
                "is_favorite",
                Condition::eq("is_favorite", is_favorite),
            ));
        }
        push_status(&mut filters, self.status_id, self.status_ids.as_deref());
        filters
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VfsFileSearch {
    pub id: Option<i64>,
    pub ids: Option<Vec<i64>>,
    pub folder_id: Option<i64>,
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    pub path: Option<String>,
    pub mime_type: Option<String>,
    pub is_favorite: Option<bool>,
    pub status_id: Option<StatusId>,
    pub status_ids: Option<Vec<StatusId>>,
}

impl Search for VfsFileSearch {
    fn filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        if let Some(id) = self.id {
            filters.push(Filter::new("id", Condition::eq("id", id)));
        }
        if let Some(ids) = self.ids.as_ref().filter(|ids| !ids.is_empty()) {
            filters.push(Filter::new("ids", Condition::r#in("id", ids.clone())));
        }
        if let Some(folder_id) = self.folder_id {
            filters.push(Filter::new("folder_id", Condition::eq("folder_id", folder_id)));
        }
        if let Some(title) = &self.title {
            filters.push(Filter::new("title", Condition::contains("title", title)));
        }
        if let Some(path) = &self.path {
            filters.push(Filter::new("path", Condition::eq("path", path)));
        }
        if let Some(mime_type) = &self.mime_type {
            filters.push(Filter::new("mime_type", Condition::eq("mime_type", mime_type)));
        }
        if let Some(is_favorite) = self.is_favorite {
            filters.push(Filter::new(
                "is_favorite",
                Condition::eq("is_favorite", is_favorite),
            ));
        }
        push_status(&mut filters, self.status_id, self.status_ids.as_deref());
        filters
    }
}

fn push_status(filters: &mut Vec<Filter>, status: Option<StatusId>, statuses: Option<&[StatusId]>) {
    if let Some(status) = status {
        filters.push(Filter::new("status_id", Condition::eq("status_id", status)));
    }
    if let Some(statuses) = statuses.filter(|s| !s.is_empty()) {
        let ids: Vec<i64> = statuses.iter().map(|s| s.as_i32() as i64).collect();
        filters.push(Filter::new("status_ids", Condition::r#in("status_id", ids)));
    }
}

impl Model for VfsFolder {
    type Search = VfsFolderSearch;

    fn id_search(id: i64) -> Self::Search {
        VfsFolderSearch {
            id: Some(id),
            ..Default::default()
        }
    }

    fn default_sort() -> Vec<SortField> {
        vec![SortField::desc("created_at")]
    }
}

impl Model for VfsFile {
    type Search = VfsFileSearch;

    fn id_search(id: i64) -> Self::Search {
        VfsFileSearch {
            id: Some(id),
            ..Default::default()
        }
    }

    fn default_sort() -> Vec<SortField> {
        vec![SortField::desc("created_at")]
    }
}

impl<X: QueryExecutor> Repository<VfsFolder, X> {
    /// Parents of folder `id`, nearest first, up to the root.
    ///
    /// Stops early when a parent cannot be found (missing, or hidden by the
    /// repository's filters) or when a folder repeats.
    pub async fn ancestors(&self, ctx: &Context, id: i64) -> Result<Vec<VfsFolder>, StorageError> {
        let mut ancestors = Vec::new();
        let mut visited = HashSet::from([id]);

        let search = VfsFolder::id_search(id);
        let Some(folder) = self.single(ctx, &search, &[], Operation::Ancestors).await? else {
            return Ok(ancestors);
        };

        let mut next = folder.parent_folder_id;
        while let Some(parent_id) = next {
            if !visited.insert(parent_id) {
                tracing::warn!(folder = id, parent = parent_id, "folder ancestry contains a cycle");
                break;
            }
            let search = VfsFolder::id_search(parent_id);
            let Some(parent) = self.single(ctx, &search, &[], Operation::Ancestors).await? else {
                break;
            };
            next = parent.parent_folder_id;
            ancestors.push(parent);
        }

        Ok(ancestors)
    }

    /// Direct children of `parent_id`.
    pub async fn children(
        &self,
        ctx: &Context,
        parent_id: i64,
        pager: Pager,
        ops: &[Op],
    ) -> Result<Vec<VfsFolder>, StorageError> {
        let search = VfsFolderSearch {
            parent_folder_id: Some(parent_id),
            ..Default::default()
        };
        self.list(ctx, &search, pager, ops).await
    }
}

/// Repositories for every VFS entity over one executor.
#[derive(Debug, Clone)]
pub struct VfsRepo<X> {
    files: Repository<VfsFile, X>,
    folders: Repository<VfsFolder, X>,
}

impl<X: QueryExecutor> VfsRepo<X> {
    pub fn new(executor: X) -> Self {
        Self {
            files: Repository::new(executor.clone()),
            folders: Repository::new(executor),
        }
    }

    pub fn files(&self) -> &Repository<VfsFile, X> {
        &self.files
    }

    pub fn folders(&self) -> &Repository<VfsFolder, X> {
        &self.folders
    }

    pub fn executor(&self) -> &X {
        self.folders.executor()
    }

    /// Same configuration for every entity, bound to `tx`.
    pub fn with_transaction<T: QueryExecutor>(&self, tx: T) -> VfsRepo<T> {
        VfsRepo {
            files: self.files.with_transaction(tx.clone()),
            folders: self.folders.with_transaction(tx),
        }
    }

    /// Copy that only ever sees enabled rows of every entity.
    pub fn with_enabled_only(&self) -> Self {
        Self {
            files: self.files.with_enabled_only(),
            folders: self.folders.with_enabled_only(),
        }
    }
}
