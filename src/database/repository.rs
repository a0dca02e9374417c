/*!
 * Repository for persisted entities.
 *
 * All SQL lives here. The repository is the only component that touches the
 * tables directly; ownership of specific columns is split between the
 * request service (request status/progress), the media state engine
 * (translation_state) and the probe/extractor (embedded_subtitles).
 */

use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

use super::connection::DatabaseConnection;
use super::models::{
    CleanupLogRecord, EmbeddedSubtitleRecord, MediaKind, MediaRecord, ProviderLogRecord,
    RequestLogRecord, RequestStatus, ShowRecord, TranslatableSubtitle, TranslationRequestRecord,
    TranslationState,
};

/// Current UTC timestamp in the store's canonical format
fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Sort columns accepted by the paginated request listing
const REQUEST_ORDER_COLUMNS: &[(&str, &str)] = &[
    ("id", "id"),
    ("title", "title"),
    ("status", "status"),
    ("createdAt", "created_at"),
    ("completedAt", "completed_at"),
    ("progress", "progress"),
];

/// Filter and paging options for the request listing
#[derive(Debug, Clone, Default)]
pub struct RequestListQuery {
    /// Substring match against title and languages
    pub search_query: Option<String>,
    /// Column to sort by (API name, see REQUEST_ORDER_COLUMNS)
    pub order_by: Option<String>,
    /// Ascending or descending
    pub ascending: bool,
    /// Page offset in rows
    pub offset: i64,
    /// Page size
    pub limit: i64,
}

/// A page of request rows plus the unpaged total
#[derive(Debug, Clone)]
pub struct RequestPage {
    /// Rows in the requested page
    pub requests: Vec<TranslationRequestRecord>,
    /// Total matching rows before paging
    pub total: i64,
}

/// Repository providing data access for all persisted entities
#[derive(Clone)]
pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository backed by an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Access the underlying connection (stats, vacuum)
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // =========================================================================
    // Media Operations
    // =========================================================================

    fn map_media_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaRecord> {
        Ok(MediaRecord {
            id: row.get(0)?,
            external_id: row.get(1)?,
            kind: row
                .get::<_, String>(2)?
                .parse()
                .unwrap_or(MediaKind::Movie),
            season_id: row.get(3)?,
            title: row.get(4)?,
            path: row.get(5)?,
            file_name: row.get(6)?,
            date_added: row.get(7)?,
            exclude_from_translation: row.get(8)?,
            is_priority: row.get(9)?,
            priority_date: row.get(10)?,
            translation_age_threshold: row.get(11)?,
            translation_state: row
                .get::<_, String>(12)?
                .parse()
                .unwrap_or(TranslationState::Unknown),
            indexed_at: row.get(13)?,
            state_settings_version: row.get(14)?,
            last_subtitle_check_at: row.get(15)?,
        })
    }

    const MEDIA_COLUMNS: &'static str = "id, external_id, kind, season_id, title, path, file_name, date_added, \
         exclude_from_translation, is_priority, priority_date, translation_age_threshold, \
         translation_state, indexed_at, state_settings_version, last_subtitle_check_at";

    /// Insert a media row, or refresh title/path/filename on conflict with
    /// the `(external_id, kind)` identity. Returns the row id.
    pub async fn upsert_media(&self, media: &MediaRecord) -> Result<i64> {
        let media = media.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO media (
                        external_id, kind, season_id, title, path, file_name, date_added,
                        exclude_from_translation, is_priority, priority_date,
                        translation_age_threshold, translation_state,
                        state_settings_version
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    ON CONFLICT(external_id, kind) DO UPDATE SET
                        title = excluded.title,
                        path = excluded.path,
                        file_name = excluded.file_name,
                        season_id = excluded.season_id
                    "#,
                    params![
                        media.external_id,
                        media.kind.to_string(),
                        media.season_id,
                        media.title,
                        media.path,
                        media.file_name,
                        media.date_added,
                        media.exclude_from_translation,
                        media.is_priority,
                        media.priority_date,
                        media.translation_age_threshold,
                        media.translation_state.to_string(),
                        media.state_settings_version,
                    ],
                )?;

                let id: i64 = conn.query_row(
                    "SELECT id FROM media WHERE external_id = ?1 AND kind = ?2",
                    params![media.external_id, media.kind.to_string()],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await
    }

    /// Get a media row by id
    pub async fn get_media(&self, media_id: i64) -> Result<Option<MediaRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM media WHERE id = ?1",
                    Self::MEDIA_COLUMNS
                );
                let result = conn
                    .query_row(&sql, [media_id], Self::map_media_row)
                    .optional()?;
                Ok(result)
            })
            .await
    }

    /// Get a media row by its kind and id (requests address media this way)
    pub async fn get_media_by_kind(
        &self,
        kind: MediaKind,
        media_id: i64,
    ) -> Result<Option<MediaRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM media WHERE id = ?1 AND kind = ?2",
                    Self::MEDIA_COLUMNS
                );
                let result = conn
                    .query_row(&sql, params![media_id, kind.to_string()], Self::map_media_row)
                    .optional()?;
                Ok(result)
            })
            .await
    }

    /// List media with optional kind filter and title search
    pub async fn list_media(
        &self,
        kind: Option<MediaKind>,
        search: Option<String>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<MediaRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut sql = format!("SELECT {} FROM media WHERE 1=1", Self::MEDIA_COLUMNS);
                let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(kind) = kind {
                    sql.push_str(" AND kind = ?");
                    args.push(Box::new(kind.to_string()));
                }
                if let Some(search) = search.filter(|s| !s.is_empty()) {
                    sql.push_str(" AND title LIKE ?");
                    args.push(Box::new(format!("%{}%", search)));
                }
                sql.push_str(" ORDER BY date_added DESC LIMIT ? OFFSET ?");
                args.push(Box::new(limit));
                args.push(Box::new(offset));

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                        Self::map_media_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Toggle exclusion; excluded media is never translated by automation
    pub async fn set_media_exclusion(&self, media_id: i64, excluded: bool) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE media SET exclude_from_translation = ?1 WHERE id = ?2",
                    params![excluded, media_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Toggle the priority flag, stamping priority_date when turning it on
    pub async fn set_media_priority(&self, media_id: i64, priority: bool) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                if priority {
                    conn.execute(
                        "UPDATE media SET is_priority = 1, priority_date = ?1 WHERE id = ?2",
                        params![now_rfc3339(), media_id],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE media SET is_priority = 0, priority_date = NULL WHERE id = ?1",
                        params![media_id],
                    )?;
                }
                Ok(())
            })
            .await
    }

    /// Set the per-item age threshold override (hours); None reverts to the
    /// per-kind setting
    pub async fn set_media_age_threshold(
        &self,
        media_id: i64,
        threshold_hours: Option<i64>,
    ) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE media SET translation_age_threshold = ?1 WHERE id = ?2",
                    params![threshold_hours, media_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Record the computed state together with the settings version it was
    /// derived under
    pub async fn update_media_state(
        &self,
        media_id: i64,
        state: TranslationState,
        settings_version: i64,
    ) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE media SET translation_state = ?1, state_settings_version = ?2 WHERE id = ?3",
                    params![state.to_string(), settings_version, media_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Stamp the embedded-track probe time
    pub async fn set_media_indexed_at(&self, media_id: i64, when: String) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE media SET indexed_at = ?1 WHERE id = ?2",
                    params![when, media_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Stamp the last sidecar-directory inspection time
    pub async fn set_media_last_subtitle_check(&self, media_id: i64, when: String) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE media SET last_subtitle_check_at = ?1 WHERE id = ?2",
                    params![when, media_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Mark every media row stale; invoked when language settings change
    pub async fn mark_all_media_stale(&self) -> Result<usize> {
        self.db
            .execute_async(move |conn| {
                let changed = conn.execute(
                    "UPDATE media SET translation_state = 'stale'",
                    [],
                )?;
                Ok(changed)
            })
            .await
    }

    /// Media eligible for an automation pass: state needs evaluation, not
    /// excluded, no active request, and old enough per the kind threshold
    /// (hours; the per-item override wins when set).
    pub async fn get_media_needing_translation(
        &self,
        limit: i64,
        priority_first: bool,
        movie_age_hours: i64,
        episode_age_hours: i64,
    ) -> Result<Vec<MediaRecord>> {
        self.db
            .execute_async(move |conn| {
                let order = if priority_first {
                    "ORDER BY is_priority DESC, date_added ASC"
                } else {
                    "ORDER BY date_added ASC"
                };
                let sql = format!(
                    r#"
                    SELECT {} FROM media m
                    WHERE translation_state IN ('pending', 'stale', 'unknown')
                      AND exclude_from_translation = 0
                      AND NOT EXISTS (
                          SELECT 1 FROM translation_requests r
                          WHERE r.media_id = m.id AND r.media_kind = m.kind AND r.is_active = 1
                      )
                      AND datetime(date_added) <= datetime('now',
                          '-' || COALESCE(
                              translation_age_threshold,
                              CASE kind WHEN 'movie' THEN ?1 ELSE ?2 END
                          ) || ' hours')
                    {}
                    LIMIT ?3
                    "#,
                    Self::MEDIA_COLUMNS,
                    order
                );

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        params![movie_age_hours, episode_age_hours, limit],
                        Self::map_media_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Insert or refresh a show row; returns its id
    pub async fn upsert_show(&self, show: &ShowRecord) -> Result<i64> {
        let show = show.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO shows (external_id, title, path, date_added)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(external_id) DO UPDATE SET
                        title = excluded.title, path = excluded.path
                    "#,
                    params![show.external_id, show.title, show.path, show.date_added],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM shows WHERE external_id = ?1",
                    [show.external_id],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await
    }

    /// Insert a season if missing; returns its id
    pub async fn upsert_season(&self, show_id: i64, number: i64) -> Result<i64> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO seasons (show_id, number) VALUES (?1, ?2)",
                    params![show_id, number],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM seasons WHERE show_id = ?1 AND number = ?2",
                    params![show_id, number],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await
    }

    // =========================================================================
    // Embedded Subtitle Operations
    // =========================================================================

    fn map_embedded_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmbeddedSubtitleRecord> {
        Ok(EmbeddedSubtitleRecord {
            id: row.get(0)?,
            media_id: row.get(1)?,
            stream_index: row.get(2)?,
            language: row.get(3)?,
            title: row.get(4)?,
            codec_name: row.get(5)?,
            is_text_based: row.get(6)?,
            is_default: row.get(7)?,
            is_forced: row.get(8)?,
            is_extracted: row.get(9)?,
            extracted_path: row.get(10)?,
        })
    }

    /// Replace the known streams of a media item with a fresh probe result,
    /// stamping `indexed_at` in the same transaction
    pub async fn replace_embedded_subtitles(
        &self,
        media_id: i64,
        streams: Vec<EmbeddedSubtitleRecord>,
    ) -> Result<()> {
        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    "DELETE FROM embedded_subtitles WHERE media_id = ?1",
                    [media_id],
                )?;
                for s in &streams {
                    tx.execute(
                        r#"
                        INSERT INTO embedded_subtitles (
                            media_id, stream_index, language, title, codec_name,
                            is_text_based, is_default, is_forced, is_extracted, extracted_path
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                        "#,
                        params![
                            media_id,
                            s.stream_index,
                            s.language,
                            s.title,
                            s.codec_name,
                            s.is_text_based,
                            s.is_default,
                            s.is_forced,
                            s.is_extracted,
                            s.extracted_path,
                        ],
                    )?;
                }
                tx.execute(
                    "UPDATE media SET indexed_at = ?1 WHERE id = ?2",
                    params![now_rfc3339(), media_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Streams known for a media item, ordered by stream index
    pub async fn get_embedded_subtitles(
        &self,
        media_id: i64,
    ) -> Result<Vec<EmbeddedSubtitleRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, media_id, stream_index, language, title, codec_name,
                           is_text_based, is_default, is_forced, is_extracted, extracted_path
                    FROM embedded_subtitles WHERE media_id = ?1 ORDER BY stream_index
                    "#,
                )?;
                let rows = stmt
                    .query_map([media_id], Self::map_embedded_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Flip a stream to extracted with its sidecar path; single statement so
    /// the row is never left half-updated
    pub async fn mark_subtitle_extracted(&self, id: i64, path: String) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE embedded_subtitles SET is_extracted = 1, extracted_path = ?1 WHERE id = ?2",
                    params![path, id],
                )?;
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Translation Request Operations
    // =========================================================================

    fn map_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranslationRequestRecord> {
        Ok(TranslationRequestRecord {
            id: row.get(0)?,
            media_id: row.get(1)?,
            media_kind: row
                .get::<_, String>(2)?
                .parse()
                .unwrap_or(MediaKind::Movie),
            title: row.get(3)?,
            source_language: row.get(4)?,
            target_language: row.get(5)?,
            subtitle_to_translate: row.get(6)?,
            status: row
                .get::<_, String>(7)?
                .parse()
                .unwrap_or(RequestStatus::Pending),
            progress: row.get(8)?,
            created_at: row.get(9)?,
            completed_at: row.get(10)?,
            job_id: row.get(11)?,
            is_active: row.get(12)?,
        })
    }

    const REQUEST_COLUMNS: &'static str = "id, media_id, media_kind, title, source_language, target_language, \
         subtitle_to_translate, status, progress, created_at, completed_at, job_id, is_active";

    /// Insert a Pending request. The partial unique index guards the active
    /// tuple; on violation the existing active row id is returned instead and
    /// `created` is false.
    pub async fn insert_request(
        &self,
        subtitle: &TranslatableSubtitle,
    ) -> Result<(i64, bool)> {
        let subtitle = subtitle.clone();

        self.db
            .execute_async(move |conn| {
                let inserted = conn.execute(
                    r#"
                    INSERT INTO translation_requests (
                        media_id, media_kind, title, source_language, target_language,
                        subtitle_to_translate, status, progress, created_at, is_active
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, 1)
                    "#,
                    params![
                        subtitle.media_id,
                        subtitle.media_kind.to_string(),
                        subtitle.title,
                        subtitle.source_language,
                        subtitle.target_language,
                        subtitle.subtitle_path,
                        now_rfc3339(),
                    ],
                );

                match inserted {
                    Ok(_) => Ok((conn.last_insert_rowid(), true)),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        // Lost the race or a duplicate create: the active row wins
                        let existing: i64 = conn.query_row(
                            r#"
                            SELECT id FROM translation_requests
                            WHERE media_id = ?1 AND media_kind = ?2
                              AND source_language = ?3 AND target_language = ?4
                              AND is_active = 1
                            "#,
                            params![
                                subtitle.media_id,
                                subtitle.media_kind.to_string(),
                                subtitle.source_language,
                                subtitle.target_language,
                            ],
                            |row| row.get(0),
                        )?;
                        Ok((existing, false))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Get a request by id
    pub async fn get_request(&self, id: i64) -> Result<Option<TranslationRequestRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM translation_requests WHERE id = ?1",
                    Self::REQUEST_COLUMNS
                );
                let result = conn
                    .query_row(&sql, [id], Self::map_request_row)
                    .optional()?;
                Ok(result)
            })
            .await
    }

    /// Paginated, filtered request listing
    pub async fn list_requests(&self, query: RequestListQuery) -> Result<RequestPage> {
        self.db
            .execute_async(move |conn| {
                let mut where_clause = String::from("WHERE 1=1");
                let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(search) = query.search_query.as_ref().filter(|s| !s.is_empty()) {
                    where_clause.push_str(
                        " AND (title LIKE ? OR source_language LIKE ? OR target_language LIKE ?)",
                    );
                    let pattern = format!("%{}%", search);
                    args.push(Box::new(pattern.clone()));
                    args.push(Box::new(pattern.clone()));
                    args.push(Box::new(pattern));
                }

                let order_column = query
                    .order_by
                    .as_deref()
                    .and_then(|requested| {
                        REQUEST_ORDER_COLUMNS
                            .iter()
                            .find(|(api, _)| *api == requested)
                            .map(|(_, col)| *col)
                    })
                    .unwrap_or("created_at");
                let direction = if query.ascending { "ASC" } else { "DESC" };

                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM translation_requests {}", where_clause),
                    rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                    |row| row.get(0),
                )?;

                let sql = format!(
                    "SELECT {} FROM translation_requests {} ORDER BY {} {} LIMIT ? OFFSET ?",
                    Self::REQUEST_COLUMNS,
                    where_clause,
                    order_column,
                    direction
                );
                args.push(Box::new(query.limit));
                args.push(Box::new(query.offset));

                let mut stmt = conn.prepare(&sql)?;
                let requests = stmt
                    .query_map(
                        rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                        Self::map_request_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(RequestPage { requests, total })
            })
            .await
    }

    /// Transition a request's status. Terminal transitions clear the active
    /// sentinel and stamp completed_at.
    pub async fn transition_request(&self, id: i64, status: RequestStatus) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                if status.is_terminal() {
                    conn.execute(
                        r#"
                        UPDATE translation_requests
                        SET status = ?1, is_active = NULL, completed_at = ?2
                        WHERE id = ?3
                        "#,
                        params![status.to_string(), now_rfc3339(), id],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE translation_requests SET status = ?1, is_active = 1 WHERE id = ?2",
                        params![status.to_string(), id],
                    )?;
                }
                Ok(())
            })
            .await
    }

    /// Move a request to InProgress with a worker-assigned job id
    pub async fn assign_request_job(&self, id: i64, job_id: String) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE translation_requests SET status = 'in_progress', job_id = ?1 WHERE id = ?2",
                    params![job_id, id],
                )?;
                Ok(())
            })
            .await
    }

    /// Update progress; the MAX keeps stored progress monotonic even if a
    /// late writer reports an older value
    pub async fn update_request_progress(&self, id: i64, progress: i64) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE translation_requests SET progress = MAX(progress, ?1) WHERE id = ?2",
                    params![progress.clamp(0, 100), id],
                )?;
                Ok(())
            })
            .await
    }

    /// Number of requests currently pending or running
    pub async fn get_active_request_count(&self) -> Result<i64> {
        self.db
            .execute_async(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM translation_requests WHERE is_active = 1",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    /// Whether any active request exists for a media item
    pub async fn has_active_request_for_media(
        &self,
        media_id: i64,
        kind: MediaKind,
    ) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM translation_requests WHERE media_id = ?1 AND media_kind = ?2 AND is_active = 1",
                    params![media_id, kind.to_string()],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    /// Pending requests ready for dispatch, priority media first then FIFO
    pub async fn next_pending_requests(&self, limit: i64) -> Result<Vec<TranslationRequestRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    r#"
                    SELECT {} FROM translation_requests r
                    LEFT JOIN media m ON m.id = r.media_id AND m.kind = r.media_kind
                    WHERE r.status = 'pending'
                    ORDER BY COALESCE(m.is_priority, 0) DESC, r.created_at ASC, r.id ASC
                    LIMIT ?1
                    "#,
                    Self::REQUEST_COLUMNS
                        .split(", ")
                        .map(|c| format!("r.{}", c))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([limit], Self::map_request_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Still-queued rows for the reenqueue endpoint
    pub async fn get_queued_requests(
        &self,
        include_in_progress: bool,
    ) -> Result<Vec<TranslationRequestRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = if include_in_progress {
                    format!(
                        "SELECT {} FROM translation_requests WHERE status IN ('pending', 'in_progress') ORDER BY id",
                        Self::REQUEST_COLUMNS
                    )
                } else {
                    format!(
                        "SELECT {} FROM translation_requests WHERE status = 'pending' ORDER BY id",
                        Self::REQUEST_COLUMNS
                    )
                };
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], Self::map_request_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Startup sweep: workers did not outlive the previous process, so any
    /// row still InProgress is flipped to Interrupted
    pub async fn interrupt_in_progress_requests(&self) -> Result<usize> {
        self.db
            .execute_async(move |conn| {
                let changed = conn.execute(
                    r#"
                    UPDATE translation_requests
                    SET status = 'interrupted', is_active = NULL, completed_at = ?1
                    WHERE status = 'in_progress'
                    "#,
                    params![now_rfc3339()],
                )?;
                Ok(changed)
            })
            .await
    }

    /// Merge duplicate active rows for the same tuple: the lowest id wins,
    /// logs of the losers are rewired onto it, losers are deleted. Returns
    /// the number of rows removed.
    pub async fn dedupe_active_requests(&self) -> Result<usize> {
        self.db
            .transaction_async(move |tx| {
                let mut stmt = tx.prepare(
                    r#"
                    SELECT media_id, media_kind, source_language, target_language, MIN(id)
                    FROM translation_requests
                    WHERE status IN ('pending', 'in_progress')
                    GROUP BY media_id, media_kind, source_language, target_language
                    HAVING COUNT(*) > 1
                    "#,
                )?;
                let groups = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);

                let mut removed = 0;
                for (media_id, kind, source, target, keeper) in groups {
                    tx.execute(
                        r#"
                        UPDATE translation_request_logs SET request_id = ?1
                        WHERE request_id IN (
                            SELECT id FROM translation_requests
                            WHERE media_id = ?2 AND media_kind = ?3
                              AND source_language = ?4 AND target_language = ?5
                              AND status IN ('pending', 'in_progress') AND id != ?1
                        )
                        "#,
                        params![keeper, media_id, kind, source, target],
                    )?;
                    removed += tx.execute(
                        r#"
                        DELETE FROM translation_requests
                        WHERE media_id = ?1 AND media_kind = ?2
                          AND source_language = ?3 AND target_language = ?4
                          AND status IN ('pending', 'in_progress') AND id != ?5
                        "#,
                        params![media_id, kind, source, target, keeper],
                    )?;
                }
                Ok(removed)
            })
            .await
    }

    /// Delete a request row (the service refuses while InProgress)
    pub async fn delete_request(&self, id: i64) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute("DELETE FROM translation_requests WHERE id = ?1", [id])?;
                Ok(())
            })
            .await
    }

    /// Clone a historical request into a fresh Pending row (retry). If an
    /// active row for the tuple already exists the existing id is returned
    /// with `created` false, mirroring insert_request.
    pub async fn clone_request_as_pending(&self, id: i64) -> Result<Option<(i64, bool)>> {
        let original = self.get_request(id).await?;
        let Some(original) = original else {
            return Ok(None);
        };

        let subtitle = TranslatableSubtitle {
            media_id: original.media_id,
            media_kind: original.media_kind,
            title: original.title.clone(),
            source_language: original.source_language.clone(),
            target_language: original.target_language.clone(),
            subtitle_path: original.subtitle_to_translate.clone(),
        };
        let inserted = self.insert_request(&subtitle).await?;
        Ok(Some(inserted))
    }

    /// Remove terminal requests older than the given number of days
    pub async fn delete_old_requests(&self, days: i64) -> Result<usize> {
        self.db
            .execute_async(move |conn| {
                let removed = conn.execute(
                    r#"
                    DELETE FROM translation_requests
                    WHERE is_active IS NULL
                      AND datetime(created_at) < datetime('now', '-' || ?1 || ' days')
                    "#,
                    params![days],
                )?;
                Ok(removed)
            })
            .await
    }

    // =========================================================================
    // Request Log Operations
    // =========================================================================

    fn map_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RequestLogRecord> {
        Ok(RequestLogRecord {
            id: row.get(0)?,
            request_id: row.get(1)?,
            level: row.get(2)?,
            message: row.get(3)?,
            details: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Append an audit entry to a request
    pub async fn append_request_log(
        &self,
        request_id: i64,
        level: &str,
        message: &str,
        details: Option<String>,
    ) -> Result<()> {
        let level = level.to_string();
        let message = message.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO translation_request_logs (request_id, level, message, details, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![request_id, level, message, details, now_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    /// All log entries of one request, oldest first
    pub async fn get_request_logs(&self, request_id: i64) -> Result<Vec<RequestLogRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, request_id, level, message, details, created_at
                     FROM translation_request_logs WHERE request_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([request_id], Self::map_log_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Most recent log entries across all requests (SSE replay on connect),
    /// returned oldest first
    pub async fn get_recent_request_logs(&self, limit: i64) -> Result<Vec<RequestLogRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, request_id, level, message, details, created_at
                     FROM translation_request_logs ORDER BY id DESC LIMIT ?1",
                )?;
                let mut rows = stmt
                    .query_map([limit], Self::map_log_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.reverse();
                Ok(rows)
            })
            .await
    }

    // =========================================================================
    // Settings Operations
    // =========================================================================

    /// Get a setting value
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();

        self.db
            .execute_async(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await
    }

    /// Insert or overwrite a setting value
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(())
            })
            .await
    }

    /// All settings as a map
    pub async fn get_all_settings(&self) -> Result<HashMap<String, String>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
                let map = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<rusqlite::Result<HashMap<_, _>>>()?;
                Ok(map)
            })
            .await
    }

    /// Insert defaults for keys that have no value yet
    pub async fn seed_default_settings(&self, defaults: Vec<(String, String)>) -> Result<usize> {
        self.db
            .transaction_async(move |tx| {
                let mut seeded = 0;
                for (key, value) in &defaults {
                    seeded += tx.execute(
                        "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                        params![key, value],
                    )?;
                }
                Ok(seeded)
            })
            .await
    }

    // =========================================================================
    // Audit Operations
    // =========================================================================

    /// Record a deleted orphan sidecar
    pub async fn append_cleanup_log(&self, file_path: &str, reason: &str) -> Result<()> {
        let file_path = file_path.to_string();
        let reason = reason.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT INTO subtitle_cleanup_logs (file_path, reason, created_at) VALUES (?1, ?2, ?3)",
                    params![file_path, reason, now_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    /// Record a provider usage/limit event
    pub async fn append_provider_log(
        &self,
        provider: &str,
        event: &str,
        details: Option<String>,
    ) -> Result<()> {
        let provider = provider.to_string();
        let event = event.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT INTO subtitle_provider_logs (provider, event, details, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![provider, event, details, now_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    /// Recent cleanup audit entries
    pub async fn get_cleanup_logs(&self, limit: i64) -> Result<Vec<CleanupLogRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, file_path, reason, created_at FROM subtitle_cleanup_logs ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok(CleanupLogRecord {
                            id: row.get(0)?,
                            file_path: row.get(1)?,
                            reason: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Recent provider audit entries
    pub async fn get_provider_logs(&self, limit: i64) -> Result<Vec<ProviderLogRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, provider, event, details, created_at FROM subtitle_provider_logs ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok(ProviderLogRecord {
                            id: row.get(0)?,
                            provider: row.get(1)?,
                            event: row.get(2)?,
                            details: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_media(external_id: i64, kind: MediaKind) -> MediaRecord {
        MediaRecord {
            id: 0,
            external_id,
            kind,
            season_id: None,
            title: format!("Media {}", external_id),
            path: "/library/item".into(),
            file_name: "item.mkv".into(),
            date_added: "2020-01-01T00:00:00Z".into(),
            exclude_from_translation: false,
            is_priority: false,
            priority_date: None,
            translation_age_threshold: None,
            translation_state: TranslationState::Unknown,
            indexed_at: None,
            state_settings_version: 0,
            last_subtitle_check_at: None,
        }
    }

    fn test_subtitle(media_id: i64) -> TranslatableSubtitle {
        TranslatableSubtitle {
            media_id,
            media_kind: MediaKind::Movie,
            title: "Example".into(),
            source_language: "en".into(),
            target_language: "ro".into(),
            subtitle_path: Some("/library/item/item.en.srt".into()),
        }
    }

    #[tokio::test]
    async fn test_upsertMedia_twice_shouldKeepSingleRow() {
        let repo = Repository::new_in_memory().unwrap();

        let id1 = repo.upsert_media(&test_media(5, MediaKind::Movie)).await.unwrap();
        let mut updated = test_media(5, MediaKind::Movie);
        updated.title = "Renamed".into();
        let id2 = repo.upsert_media(&updated).await.unwrap();

        assert_eq!(id1, id2);
        let media = repo.get_media(id1).await.unwrap().unwrap();
        assert_eq!(media.title, "Renamed");
    }

    #[tokio::test]
    async fn test_insertRequest_duplicateActive_shouldReturnExistingId() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();

        let (first, created_first) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();
        let (second, created_second) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();

        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first, second);
        assert_eq!(repo.get_active_request_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insertRequest_afterTerminal_shouldCreateFreshActiveRow() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();

        let (first, _) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();
        repo.transition_request(first, RequestStatus::Completed)
            .await
            .unwrap();

        let (second, created) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();
        assert!(created);
        assert_ne!(first, second);

        // History row and new active row coexist
        let completed = repo.get_request(first).await.unwrap().unwrap();
        assert_eq!(completed.status, RequestStatus::Completed);
        assert_eq!(completed.is_active, None);
    }

    #[tokio::test]
    async fn test_transitionRequest_terminal_shouldClearActiveAndStampCompletion() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();
        let (id, _) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();

        repo.transition_request(id, RequestStatus::Failed).await.unwrap();

        let request = repo.get_request(id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert_eq!(request.is_active, None);
        assert!(request.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_updateRequestProgress_shouldBeMonotonic() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();
        let (id, _) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();

        repo.update_request_progress(id, 40).await.unwrap();
        repo.update_request_progress(id, 25).await.unwrap();

        let request = repo.get_request(id).await.unwrap().unwrap();
        assert_eq!(request.progress, 40);
    }

    #[tokio::test]
    async fn test_interruptInProgress_shouldOnlyTouchRunningRows() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();

        let (running, _) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();
        repo.assign_request_job(running, "job-1".into()).await.unwrap();

        let mut other = test_subtitle(media_id);
        other.target_language = "fr".into();
        let (pending, _) = repo.insert_request(&other).await.unwrap();

        let swept = repo.interrupt_in_progress_requests().await.unwrap();
        assert_eq!(swept, 1);

        let interrupted = repo.get_request(running).await.unwrap().unwrap();
        assert_eq!(interrupted.status, RequestStatus::Interrupted);
        let untouched = repo.get_request(pending).await.unwrap().unwrap();
        assert_eq!(untouched.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_dedupeActiveRequests_shouldKeepLowestIdAndRewireLogs() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();

        // Simulate a legacy duplicate: same tuple, queued, but with the
        // sentinel missing so the partial index never saw it
        let (keeper, _) = repo.insert_request(&test_subtitle(media_id)).await.unwrap();
        repo.connection()
            .execute(|conn| {
                conn.execute(
                    r#"
                    INSERT INTO translation_requests (
                        media_id, media_kind, title, source_language, target_language,
                        status, progress, created_at, is_active
                    ) VALUES (?1, 'movie', 'Example', 'en', 'ro', 'pending', 0, datetime('now'), NULL)
                    "#,
                    params![media_id],
                )?;
                Ok(())
            })
            .unwrap();
        let dup_id = keeper + 1;
        repo.append_request_log(dup_id, "info", "from duplicate", None)
            .await
            .unwrap();

        let removed = repo.dedupe_active_requests().await.unwrap();
        assert_eq!(removed, 1);

        let logs = repo.get_request_logs(keeper).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "from duplicate");
        assert!(repo.get_request(dup_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_getMediaNeedingTranslation_shouldHonorExclusionAndActiveRequests() {
        let repo = Repository::new_in_memory().unwrap();

        let eligible = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();
        let excluded = repo.upsert_media(&test_media(2, MediaKind::Movie)).await.unwrap();
        repo.set_media_exclusion(excluded, true).await.unwrap();
        let busy = repo.upsert_media(&test_media(3, MediaKind::Movie)).await.unwrap();
        repo.insert_request(&test_subtitle(busy)).await.unwrap();

        let rows = repo
            .get_media_needing_translation(10, true, 0, 0)
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|m| m.id).collect();

        assert!(ids.contains(&eligible));
        assert!(!ids.contains(&excluded));
        assert!(!ids.contains(&busy));
    }

    #[tokio::test]
    async fn test_getMediaNeedingTranslation_priorityFirst_shouldOrderPriorityAhead() {
        let repo = Repository::new_in_memory().unwrap();

        let mut older = test_media(1, MediaKind::Movie);
        older.date_added = "2020-01-01T00:00:00Z".into();
        let normal = repo.upsert_media(&older).await.unwrap();

        let mut newer = test_media(2, MediaKind::Movie);
        newer.date_added = "2024-01-01T00:00:00Z".into();
        let priority = repo.upsert_media(&newer).await.unwrap();
        repo.set_media_priority(priority, true).await.unwrap();

        let rows = repo
            .get_media_needing_translation(10, true, 0, 0)
            .await
            .unwrap();

        assert_eq!(rows[0].id, priority);
        assert_eq!(rows[1].id, normal);
    }

    #[tokio::test]
    async fn test_markAllMediaStale_shouldTouchEveryRow() {
        let repo = Repository::new_in_memory().unwrap();
        let a = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();
        let b = repo.upsert_media(&test_media(2, MediaKind::Episode)).await.unwrap();
        repo.update_media_state(a, TranslationState::Complete, 1)
            .await
            .unwrap();

        let changed = repo.mark_all_media_stale().await.unwrap();
        assert_eq!(changed, 2);

        for id in [a, b] {
            let media = repo.get_media(id).await.unwrap().unwrap();
            assert_eq!(media.translation_state, TranslationState::Stale);
        }
    }

    #[tokio::test]
    async fn test_replaceEmbeddedSubtitles_shouldSwapRowsAndStampIndexedAt() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();

        let stream = EmbeddedSubtitleRecord {
            id: 0,
            media_id,
            stream_index: 2,
            language: Some("eng".into()),
            title: Some("English".into()),
            codec_name: "subrip".into(),
            is_text_based: true,
            is_default: true,
            is_forced: false,
            is_extracted: false,
            extracted_path: None,
        };
        repo.replace_embedded_subtitles(media_id, vec![stream.clone()])
            .await
            .unwrap();
        repo.replace_embedded_subtitles(media_id, vec![stream])
            .await
            .unwrap();

        let streams = repo.get_embedded_subtitles(media_id).await.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].language.as_deref(), Some("eng"));

        let media = repo.get_media(media_id).await.unwrap().unwrap();
        assert!(media.indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_markSubtitleExtracted_shouldFlipFlagAndPath() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();

        repo.replace_embedded_subtitles(
            media_id,
            vec![EmbeddedSubtitleRecord {
                id: 0,
                media_id,
                stream_index: 0,
                language: Some("eng".into()),
                title: None,
                codec_name: "ass".into(),
                is_text_based: true,
                is_default: false,
                is_forced: false,
                is_extracted: false,
                extracted_path: None,
            }],
        )
        .await
        .unwrap();

        let stream = &repo.get_embedded_subtitles(media_id).await.unwrap()[0];
        repo.mark_subtitle_extracted(stream.id, "/tmp/out.en.ass".into())
            .await
            .unwrap();

        let stream = &repo.get_embedded_subtitles(media_id).await.unwrap()[0];
        assert!(stream.is_extracted);
        assert_eq!(stream.extracted_path.as_deref(), Some("/tmp/out.en.ass"));
    }

    #[tokio::test]
    async fn test_settings_seedDefaults_shouldNotOverwriteExisting() {
        let repo = Repository::new_in_memory().unwrap();
        repo.set_setting("max_batch_size", "25").await.unwrap();

        let seeded = repo
            .seed_default_settings(vec![
                ("max_batch_size".into(), "50".into()),
                ("subtitle_tag".into(), "translarr".into()),
            ])
            .await
            .unwrap();

        assert_eq!(seeded, 1);
        assert_eq!(
            repo.get_setting("max_batch_size").await.unwrap().as_deref(),
            Some("25")
        );
        assert_eq!(
            repo.get_setting("subtitle_tag").await.unwrap().as_deref(),
            Some("translarr")
        );
    }

    #[tokio::test]
    async fn test_listRequests_searchAndPaging_shouldFilter() {
        let repo = Repository::new_in_memory().unwrap();
        let media_id = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();

        for (title, target) in [("Alpha", "ro"), ("Beta", "fr"), ("Alphaville", "de")] {
            let mut subtitle = test_subtitle(media_id);
            subtitle.title = title.into();
            subtitle.target_language = target.into();
            repo.insert_request(&subtitle).await.unwrap();
        }

        let page = repo
            .list_requests(RequestListQuery {
                search_query: Some("Alpha".into()),
                order_by: Some("title".into()),
                ascending: true,
                offset: 0,
                limit: 10,
            })
            .await
            .unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.requests[0].title, "Alpha");
        assert_eq!(page.requests[1].title, "Alphaville");
    }

    #[tokio::test]
    async fn test_nextPendingRequests_shouldPutPriorityMediaFirst() {
        let repo = Repository::new_in_memory().unwrap();

        let normal = repo.upsert_media(&test_media(1, MediaKind::Movie)).await.unwrap();
        let priority = repo.upsert_media(&test_media(2, MediaKind::Movie)).await.unwrap();
        repo.set_media_priority(priority, true).await.unwrap();

        repo.insert_request(&test_subtitle(normal)).await.unwrap();
        let (prio_request, _) = repo.insert_request(&test_subtitle(priority)).await.unwrap();

        let rows = repo.next_pending_requests(10).await.unwrap();
        assert_eq!(rows[0].id, prio_request);
    }
}
