use crate::config::DatabaseConfig;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Upper bound of `plant.plt_name`, in characters.
pub const MAX_PLANT_NAME_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Plant name `{0}` exceeds the 20 character column limit")]
    NameTooLong(String),
    #[error("Storage write failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct PlantRecord {
    pub plt_id: i64,
    pub plt_name: String,
    pub plt_img: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlant {
    pub name: String,
    pub image_ref: Option<String>,
    pub owner_id: Option<i64>,
}

#[async_trait]
pub trait PlantRepository: Send + Sync + 'static {
    async fn save(&self, plant: NewPlant) -> Result<PlantRecord, PersistenceError>;

    /// Newest first; `owner_id` narrows the listing to one user.
    async fn list(&self, owner_id: Option<i64>) -> Result<Vec<PlantRecord>, PersistenceError>;
}

#[derive(Debug, Clone)]
pub struct SqlitePlantRepository {
    pool: SqlitePool,
}

impl SqlitePlantRepository {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        let repository = Self { pool };
        repository.migrate().await?;
        Ok(repository)
    }

    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS plant (
                plt_id INTEGER PRIMARY KEY AUTOINCREMENT,
                plt_name TEXT NOT NULL,
                plt_img TEXT,
                user_id INTEGER,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS plant_user_id ON plant (user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl PlantRepository for SqlitePlantRepository {
    async fn save(&self, plant: NewPlant) -> Result<PlantRecord, PersistenceError> {
        if plant.name.chars().count() > MAX_PLANT_NAME_LEN {
            return Err(PersistenceError::NameTooLong(plant.name));
        }

        let created_at = now_millis();
        let result = sqlx::query(
            "INSERT INTO plant (plt_name, plt_img, user_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(plant.name.as_str())
        .bind(plant.image_ref.as_deref())
        .bind(plant.owner_id)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(PlantRecord {
            plt_id: result.last_insert_rowid(),
            plt_name: plant.name,
            plt_img: plant.image_ref,
            user_id: plant.owner_id,
            created_at,
        })
    }

    async fn list(&self, owner_id: Option<i64>) -> Result<Vec<PlantRecord>, PersistenceError> {
        let records = match owner_id {
            Some(owner_id) => {
                sqlx::query_as::<_, PlantRecord>(
                    "SELECT plt_id, plt_name, plt_img, user_id, created_at FROM plant
                     WHERE user_id = ? ORDER BY plt_id DESC",
                )
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PlantRecord>(
                    "SELECT plt_id, plt_name, plt_img, user_id, created_at FROM plant
                     ORDER BY plt_id DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }
}
