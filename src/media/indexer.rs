/*!
 * Media indexer seam.
 *
 * The external media managers (one for movies, one for shows) live behind
 * this trait; the scheduler only asks an indexer to refresh the media
 * tables and reports how many items changed.
 */

use anyhow::Result;
use async_trait::async_trait;

use crate::database::Repository;

/// External collaborator that populates the media tables
#[async_trait]
pub trait MediaIndexer: Send + Sync {
    /// Refresh movie rows; returns the number of items upserted
    async fn index_movies(&self, repo: &Repository) -> Result<usize>;

    /// Refresh show/season/episode rows; returns the number of items upserted
    async fn index_shows(&self, repo: &Repository) -> Result<usize>;
}

/// Indexer used when no media manager integration is wired in
pub struct NoopIndexer;

#[async_trait]
impl MediaIndexer for NoopIndexer {
    async fn index_movies(&self, _repo: &Repository) -> Result<usize> {
        Ok(0)
    }

    async fn index_shows(&self, _repo: &Repository) -> Result<usize> {
        Ok(0)
    }
}
