//! SQLite document store backends
//!
//! Each row is one JSON document plus the columns the store filters and
//! orders on (partition key, parent, kind, tombstone flag, creation order,
//! version token). Every statement is scoped to the `world_id` partition and
//! `replace` is a compare-and-swap on the version column, so SQLite behaves
//! like the partitioned, ETag-guarded document store the services expect.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::application::ports::outbound::{
    DeleteOperationStorePort, EntityPage, EntityQuery, EntityStorePort, ParentFilter,
};
use crate::domain::entities::{DeleteOperation, WorldEntity};
use crate::domain::errors::EntityError;
use crate::domain::value_objects::{
    DeleteOperationId, EntityId, PageCursor, UserId, VersionToken, WorldId,
};

fn backend_err(e: sqlx::Error) -> EntityError {
    EntityError::Backend(e.to_string())
}

fn decode_entity(doc: &str) -> Result<WorldEntity, EntityError> {
    serde_json::from_str(doc).map_err(|e| EntityError::Serialization(e.to_string()))
}

fn decode_operation(doc: &str) -> Result<DeleteOperation, EntityError> {
    serde_json::from_str(doc).map_err(|e| EntityError::Serialization(e.to_string()))
}

pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                world_id TEXT NOT NULL,
                id TEXT NOT NULL,
                parent_id TEXT,
                kind TEXT NOT NULL,
                tags TEXT NOT NULL,
                is_deleted INTEGER NOT NULL,
                created_at_us INTEGER NOT NULL,
                version TEXT NOT NULL,
                doc TEXT NOT NULL,
                PRIMARY KEY (world_id, id)
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_entities_hierarchy
            ON entities (world_id, parent_id, is_deleted, created_at_us, id)
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl EntityStorePort for SqliteEntityStore {
    async fn insert(&self, entity: &WorldEntity) -> Result<WorldEntity, EntityError> {
        let mut stored = entity.clone();
        stored.set_version(VersionToken::mint());
        let doc =
            serde_json::to_string(&stored).map_err(|e| EntityError::Serialization(e.to_string()))?;
        let tags = serde_json::to_string(stored.tags())
            .map_err(|e| EntityError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO entities
                (world_id, id, parent_id, kind, tags, is_deleted, created_at_us, version, doc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(stored.world_id().to_string())
        .bind(stored.id().to_string())
        .bind(stored.parent_id().map(|id| id.to_string()))
        .bind(stored.kind().as_str())
        .bind(tags)
        .bind(stored.is_deleted() as i64)
        .bind(stored.created_at().timestamp_micros())
        .bind(stored.version().map(|v| v.to_string()).unwrap_or_default())
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(stored)
    }

    async fn replace(
        &self,
        entity: &WorldEntity,
        expected_version: Option<&VersionToken>,
    ) -> Result<WorldEntity, EntityError> {
        let mut stored = entity.clone();
        stored.set_version(VersionToken::mint());
        let doc =
            serde_json::to_string(&stored).map_err(|e| EntityError::Serialization(e.to_string()))?;
        let tags = serde_json::to_string(stored.tags())
            .map_err(|e| EntityError::Serialization(e.to_string()))?;
        let new_version = stored.version().map(|v| v.to_string()).unwrap_or_default();

        let result = match expected_version {
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE entities
                    SET parent_id = ?, kind = ?, tags = ?, is_deleted = ?, version = ?, doc = ?
                    WHERE world_id = ? AND id = ? AND version = ?
                "#,
                )
                .bind(stored.parent_id().map(|id| id.to_string()))
                .bind(stored.kind().as_str())
                .bind(tags)
                .bind(stored.is_deleted() as i64)
                .bind(&new_version)
                .bind(doc)
                .bind(stored.world_id().to_string())
                .bind(stored.id().to_string())
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE entities
                    SET parent_id = ?, kind = ?, tags = ?, is_deleted = ?, version = ?, doc = ?
                    WHERE world_id = ? AND id = ?
                "#,
                )
                .bind(stored.parent_id().map(|id| id.to_string()))
                .bind(stored.kind().as_str())
                .bind(tags)
                .bind(stored.is_deleted() as i64)
                .bind(&new_version)
                .bind(doc)
                .bind(stored.world_id().to_string())
                .bind(stored.id().to_string())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT version FROM entities WHERE world_id = ? AND id = ?")
                    .bind(stored.world_id().to_string())
                    .bind(stored.id().to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(backend_err)?;
            return Err(match actual {
                None => EntityError::EntityNotFound(stored.id()),
                Some(actual) => EntityError::VersionConflict {
                    expected: expected_version.map(|v| v.to_string()).unwrap_or_default(),
                    actual,
                },
            });
        }

        Ok(stored)
    }

    async fn find(
        &self,
        world_id: WorldId,
        entity_id: EntityId,
    ) -> Result<Option<WorldEntity>, EntityError> {
        let doc: Option<String> =
            sqlx::query_scalar("SELECT doc FROM entities WHERE world_id = ? AND id = ?")
                .bind(world_id.to_string())
                .bind(entity_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend_err)?;
        doc.map(|doc| decode_entity(&doc)).transpose()
    }

    async fn query(
        &self,
        world_id: WorldId,
        query: &EntityQuery,
    ) -> Result<EntityPage, EntityError> {
        let mut sql =
            String::from("SELECT doc FROM entities WHERE world_id = ? AND is_deleted = 0");
        match query.parent {
            ParentFilter::Roots => sql.push_str(" AND parent_id IS NULL"),
            ParentFilter::ChildrenOf(_) => sql.push_str(" AND parent_id = ?"),
            ParentFilter::Any => {}
        }
        if query.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        for _ in &query.tags {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM json_each(entities.tags) WHERE json_each.value = ?)",
            );
        }
        if query.cursor.is_some() {
            sql.push_str(" AND (created_at_us > ? OR (created_at_us = ? AND id > ?))");
        }
        sql.push_str(" ORDER BY created_at_us, id LIMIT ?");

        let mut statement = sqlx::query_scalar::<_, String>(&sql).bind(world_id.to_string());
        if let ParentFilter::ChildrenOf(parent_id) = query.parent {
            statement = statement.bind(parent_id.to_string());
        }
        if let Some(kind) = query.kind {
            statement = statement.bind(kind.as_str());
        }
        for tag in &query.tags {
            statement = statement.bind(tag);
        }
        if let Some(cursor) = &query.cursor {
            statement = statement
                .bind(cursor.created_at_us())
                .bind(cursor.created_at_us())
                .bind(cursor.id().to_string());
        }
        statement = statement.bind(query.limit as i64 + 1);

        let docs = statement
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        let mut items = docs
            .iter()
            .map(|doc| decode_entity(doc))
            .collect::<Result<Vec<_>, _>>()?;

        let limit = query.limit as usize;
        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items
                .last()
                .map(|last| PageCursor::after(last.created_at(), last.id()))
        } else {
            None
        };
        Ok(EntityPage { items, next_cursor })
    }

    async fn children(
        &self,
        world_id: WorldId,
        parent_id: EntityId,
        include_deleted: bool,
    ) -> Result<Vec<WorldEntity>, EntityError> {
        let sql = if include_deleted {
            "SELECT doc FROM entities WHERE world_id = ? AND parent_id = ? \
             ORDER BY created_at_us, id"
        } else {
            "SELECT doc FROM entities WHERE world_id = ? AND parent_id = ? AND is_deleted = 0 \
             ORDER BY created_at_us, id"
        };
        let docs: Vec<String> = sqlx::query_scalar(sql)
            .bind(world_id.to_string())
            .bind(parent_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        docs.iter().map(|doc| decode_entity(doc)).collect()
    }
}

pub struct SqliteOperationStore {
    pool: SqlitePool,
}

impl SqliteOperationStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delete_operations (
                world_id TEXT NOT NULL,
                id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at_us INTEGER NOT NULL,
                expires_at_us INTEGER NOT NULL,
                version TEXT NOT NULL,
                doc TEXT NOT NULL,
                PRIMARY KEY (world_id, id)
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_delete_operations_recent
            ON delete_operations (world_id, created_at_us)
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DeleteOperationStorePort for SqliteOperationStore {
    async fn insert(&self, operation: &DeleteOperation) -> Result<DeleteOperation, EntityError> {
        let mut stored = operation.clone();
        stored.set_version(VersionToken::mint());
        let doc =
            serde_json::to_string(&stored).map_err(|e| EntityError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO delete_operations
                (world_id, id, status, created_by, created_at_us, expires_at_us, version, doc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(stored.world_id().to_string())
        .bind(stored.id().to_string())
        .bind(stored.status().as_str())
        .bind(stored.created_by().to_string())
        .bind(stored.created_at().timestamp_micros())
        .bind(stored.expires_at().timestamp_micros())
        .bind(stored.version().map(|v| v.to_string()).unwrap_or_default())
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(stored)
    }

    async fn replace(
        &self,
        operation: &DeleteOperation,
        expected_version: Option<&VersionToken>,
    ) -> Result<DeleteOperation, EntityError> {
        let mut stored = operation.clone();
        stored.set_version(VersionToken::mint());
        let doc =
            serde_json::to_string(&stored).map_err(|e| EntityError::Serialization(e.to_string()))?;
        let new_version = stored.version().map(|v| v.to_string()).unwrap_or_default();

        let result = match expected_version {
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE delete_operations SET status = ?, version = ?, doc = ?
                    WHERE world_id = ? AND id = ? AND version = ?
                "#,
                )
                .bind(stored.status().as_str())
                .bind(&new_version)
                .bind(doc)
                .bind(stored.world_id().to_string())
                .bind(stored.id().to_string())
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE delete_operations SET status = ?, version = ?, doc = ?
                    WHERE world_id = ? AND id = ?
                "#,
                )
                .bind(stored.status().as_str())
                .bind(&new_version)
                .bind(doc)
                .bind(stored.world_id().to_string())
                .bind(stored.id().to_string())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            let actual: Option<String> = sqlx::query_scalar(
                "SELECT version FROM delete_operations WHERE world_id = ? AND id = ?",
            )
            .bind(stored.world_id().to_string())
            .bind(stored.id().to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
            return Err(match actual {
                None => EntityError::OperationNotFound(stored.id()),
                Some(actual) => EntityError::VersionConflict {
                    expected: expected_version.map(|v| v.to_string()).unwrap_or_default(),
                    actual,
                },
            });
        }

        Ok(stored)
    }

    async fn find(
        &self,
        world_id: WorldId,
        operation_id: DeleteOperationId,
    ) -> Result<Option<DeleteOperation>, EntityError> {
        let doc: Option<String> =
            sqlx::query_scalar("SELECT doc FROM delete_operations WHERE world_id = ? AND id = ?")
                .bind(world_id.to_string())
                .bind(operation_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend_err)?;
        doc.map(|doc| decode_operation(&doc)).transpose()
    }

    async fn recent_by_world(
        &self,
        world_id: WorldId,
        limit: u32,
    ) -> Result<Vec<DeleteOperation>, EntityError> {
        let docs: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT doc FROM delete_operations WHERE world_id = ?
            ORDER BY created_at_us DESC, id DESC LIMIT ?
        "#,
        )
        .bind(world_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        docs.iter().map(|doc| decode_operation(doc)).collect()
    }

    async fn count_active_by_user(
        &self,
        world_id: WorldId,
        user_id: UserId,
    ) -> Result<u64, EntityError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM delete_operations
            WHERE world_id = ? AND created_by = ? AND status IN ('pending', 'in_progress')
        "#,
        )
        .bind(world_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(count as u64)
    }

    async fn purge_expired(&self) -> Result<u64, EntityError> {
        let result = sqlx::query("DELETE FROM delete_operations WHERE expires_at_us <= ?")
            .bind(Utc::now().timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::domain::entities::{EntityKind, DEFAULT_OPERATION_TTL_SECONDS};

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn entity(world_id: WorldId, name: &str, tags: Vec<String>) -> WorldEntity {
        WorldEntity::create(
            world_id,
            None,
            EntityKind::Location,
            name,
            "",
            tags,
            serde_json::json!({}),
            UserId::new(),
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_find_round_trip() {
        let store = SqliteEntityStore::new(pool().await).await.unwrap();
        let world_id = WorldId::new();
        let stored = store
            .insert(&entity(world_id, "Tavern", vec!["indoor".to_string()]))
            .await
            .unwrap();
        assert!(stored.version().is_some());

        let found = store.find(world_id, stored.id()).await.unwrap().unwrap();
        assert_eq!(found.id(), stored.id());
        assert_eq!(found.name(), "Tavern");
        assert_eq!(found.version(), stored.version());
        assert!(store.find(WorldId::new(), stored.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_enforces_version_token() {
        let store = SqliteEntityStore::new(pool().await).await.unwrap();
        let world_id = WorldId::new();
        let stored = store.insert(&entity(world_id, "A", vec![])).await.unwrap();
        let original = stored.version().unwrap().clone();

        let replaced = store.replace(&stored, Some(&original)).await.unwrap();
        assert_ne!(replaced.version(), Some(&original));

        let stale = store.replace(&stored, Some(&original)).await;
        assert!(matches!(stale, Err(EntityError::VersionConflict { .. })));

        let mut missing = entity(world_id, "Ghost", vec![]);
        missing.set_version(VersionToken::mint());
        let gone = store.replace(&missing, None).await;
        assert!(matches!(gone, Err(EntityError::EntityNotFound(_))));
    }

    #[tokio::test]
    async fn test_query_filters_tags_and_pages() {
        let store = SqliteEntityStore::new(pool().await).await.unwrap();
        let world_id = WorldId::new();
        for i in 0..3 {
            store
                .insert(&entity(
                    world_id,
                    &format!("Plain {i}"),
                    vec!["plain".to_string()],
                ))
                .await
                .unwrap();
        }
        store
            .insert(&entity(
                world_id,
                "Tagged",
                vec!["social".to_string(), "indoor".to_string()],
            ))
            .await
            .unwrap();

        let tagged = store
            .query(
                world_id,
                &EntityQuery {
                    parent: ParentFilter::Any,
                    tags: vec!["social".to_string(), "indoor".to_string()],
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tagged.items.len(), 1);
        assert_eq!(tagged.items[0].name(), "Tagged");

        let first_page = store
            .query(
                world_id,
                &EntityQuery {
                    parent: ParentFilter::Roots,
                    limit: 3,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first_page.items.len(), 3);
        let cursor = first_page.next_cursor.expect("one more page");

        let second_page = store
            .query(
                world_id,
                &EntityQuery {
                    parent: ParentFilter::Roots,
                    limit: 3,
                    cursor: Some(cursor),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second_page.items.len(), 1);
        assert!(second_page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_operation_store_counts_and_purges() {
        let store = SqliteOperationStore::new(pool().await).await.unwrap();
        let world_id = WorldId::new();
        let user = UserId::new();
        let root = entity(world_id, "Root", vec![]);

        let mut active = DeleteOperation::new(&root, true, user, DEFAULT_OPERATION_TTL_SECONDS);
        let active_stored = store.insert(&active).await.unwrap();
        assert_eq!(store.count_active_by_user(world_id, user).await.unwrap(), 1);
        assert_eq!(
            store
                .count_active_by_user(world_id, UserId::new())
                .await
                .unwrap(),
            0
        );

        // Finishing the operation drops it from the active count.
        active = active_stored.clone();
        active.begin(1).unwrap();
        active.record_deleted(1);
        active.finish().unwrap();
        store
            .replace(&active, active_stored.version())
            .await
            .unwrap();
        assert_eq!(store.count_active_by_user(world_id, user).await.unwrap(), 0);

        let expired = DeleteOperation::new(&root, true, user, 0);
        store.insert(&expired).await.unwrap();
        let purged = store.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.find(world_id, expired.id()).await.unwrap().is_none());

        let recent = store.recent_by_world(world_id, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id(), active.id());
    }
}
