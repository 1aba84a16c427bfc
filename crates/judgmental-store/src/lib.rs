//! Read-only access to the judgment metadata database written by the analysis
//! and cross-referencing stages.

use std::path::{Path, PathBuf};

use judgmental_core::{
    ErrorKind, InboundReference, JudgmentMetadata, JudgmentRecord, OutboundReference,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Row};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "judgmental-store";

/// Tables the upstream stages populate. Only read here.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS courts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS judgments (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    date TEXT NOT NULL,
    court_id INTEGER NOT NULL REFERENCES courts(id),
    source_url TEXT
);
CREATE TABLE IF NOT EXISTS citations (
    id INTEGER PRIMARY KEY,
    judgment_id INTEGER NOT NULL REFERENCES judgments(id),
    text TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS crossreferences (
    judgment_id INTEGER NOT NULL REFERENCES judgments(id),
    citation_id INTEGER NOT NULL REFERENCES citations(id)
);
"#;

const JUDGMENT_QUERY: &str = "SELECT judgments.id, judgments.title, judgments.date, courts.name AS court_name, judgments.source_url \
     FROM judgments JOIN courts ON judgments.court_id = courts.id \
     WHERE judgments.filename = ?";

const CITATIONS_QUERY: &str =
    "SELECT text FROM citations WHERE judgment_id = ? ORDER BY id";

const OUTBOUND_QUERY: &str = "SELECT citations.text AS citation, judgments.title, judgments.filename \
     FROM crossreferences \
     JOIN citations ON crossreferences.citation_id = citations.id \
     JOIN judgments ON citations.judgment_id = judgments.id \
     WHERE crossreferences.judgment_id = ? \
     ORDER BY citations.id";

const INBOUND_QUERY: &str = "SELECT judgments.title, judgments.filename \
     FROM crossreferences \
     JOIN citations ON crossreferences.citation_id = citations.id \
     JOIN judgments ON crossreferences.judgment_id = judgments.id \
     WHERE citations.judgment_id = ? \
     ORDER BY judgments.id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no metadata found")]
    NoMetadata,
    #[error("metadata store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Query(#[from] sqlx::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoMetadata => ErrorKind::NoMetadata,
            Self::Open { .. } | Self::Query(_) => ErrorKind::StoreError,
        }
    }
}

/// One connection plus an open transaction, owned by a single conversion.
///
/// Sessions are never shared: every document opens its own and must hand it
/// back through [`MetadataStore::finish`], which commits and closes.
#[derive(Debug)]
pub struct MetadataStore {
    conn: SqliteConnection,
}

impl MetadataStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);
        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        sqlx::query("BEGIN").execute(&mut conn).await?;
        Ok(Self { conn })
    }

    /// Looks up the judgment stored under `filename` with its citations and
    /// cross-references in both directions.
    pub async fn fetch_metadata(&mut self, filename: &str) -> Result<JudgmentMetadata, StoreError> {
        let row = sqlx::query(JUDGMENT_QUERY)
            .bind(filename)
            .fetch_optional(&mut self.conn)
            .await?
            .ok_or(StoreError::NoMetadata)?;

        let judgment = JudgmentRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            date: row.try_get("date")?,
            court_name: row.try_get("court_name")?,
            source_url: row.try_get("source_url")?,
        };

        let citations = sqlx::query(CITATIONS_QUERY)
            .bind(judgment.id)
            .fetch_all(&mut self.conn)
            .await?
            .into_iter()
            .map(|row| row.try_get::<String, _>("text"))
            .collect::<Result<Vec<_>, _>>()?;

        let outbound = sqlx::query(OUTBOUND_QUERY)
            .bind(judgment.id)
            .fetch_all(&mut self.conn)
            .await?
            .into_iter()
            .map(|row| -> Result<OutboundReference, sqlx::Error> {
                Ok(OutboundReference {
                    citation: row.try_get("citation")?,
                    title: row.try_get("title")?,
                    filename: row.try_get("filename")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let inbound = sqlx::query(INBOUND_QUERY)
            .bind(judgment.id)
            .fetch_all(&mut self.conn)
            .await?
            .into_iter()
            .map(|row| -> Result<InboundReference, sqlx::Error> {
                Ok(InboundReference {
                    title: row.try_get("title")?,
                    filename: row.try_get("filename")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            filename,
            citations = citations.len(),
            outbound = outbound.len(),
            inbound = inbound.len(),
            "loaded judgment metadata"
        );

        Ok(JudgmentMetadata {
            judgment,
            citations,
            outbound,
            inbound,
        })
    }

    /// Commits and closes. The connection is closed even when the commit
    /// fails, and the commit error is the one reported.
    pub async fn finish(mut self) -> Result<(), StoreError> {
        let committed = sqlx::query("COMMIT").execute(&mut self.conn).await;
        let closed = self.conn.close().await;
        committed?;
        closed?;
        Ok(())
    }
}

/// Creates an empty database carrying [`SCHEMA_SQL`].
pub async fn initialise(path: impl AsRef<Path>) -> Result<SqliteConnection, StoreError> {
    let path = path.as_ref();
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    sqlx::raw_sql(SCHEMA_SQL).execute(&mut conn).await?;
    Ok(conn)
}
