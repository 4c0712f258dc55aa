use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;
use vedfolnir_common::types::{
    CaptionGenerationSettings, CaptionGenerationTask, GenerationResults, Image, ImageStatus,
    PlatformConnection, PlatformType, Post, ProcessingRun, TaskStatus, User, UserRole,
    UserSettings,
};
use vedfolnir_common::VedfolnirError;

use crate::context::PlatformContext;

pub type Result<T> = std::result::Result<T, VedfolnirError>;

/// Wraps a `sqlx::PgPool`. A "session" is simply a borrowed `&Store` whose
/// lifetime is the request/task's lifetime, enforced by the borrow checker
/// rather than a runtime registry — there is no detached-instance class of
/// bug to guard against here.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    role: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            username: r.username,
            email: r.email,
            role: parse_role(&r.role),
            active: r.active,
            created_at: r.created_at,
        }
    }
}

fn parse_role(s: &str) -> UserRole {
    match s {
        "admin" => UserRole::Admin,
        "moderator" => UserRole::Moderator,
        "reviewer" => UserRole::Reviewer,
        _ => UserRole::Viewer,
    }
}

fn role_str(role: UserRole) -> &'static str {
    match role {
        UserRole::Admin => "admin",
        UserRole::Moderator => "moderator",
        UserRole::Reviewer => "reviewer",
        UserRole::Viewer => "viewer",
    }
}

#[derive(sqlx::FromRow)]
struct PlatformConnectionRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    platform_type: PlatformType,
    instance_url: String,
    username: String,
    access_token_ciphertext: Vec<u8>,
    client_key_ciphertext: Option<Vec<u8>>,
    client_secret_ciphertext: Option<Vec<u8>>,
    is_active: bool,
    is_default: bool,
    last_checked_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PlatformConnectionRow> for PlatformConnection {
    fn from(r: PlatformConnectionRow) -> Self {
        PlatformConnection {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            platform_type: r.platform_type,
            instance_url: r.instance_url,
            username: r.username,
            access_token_ciphertext: r.access_token_ciphertext,
            client_key_ciphertext: r.client_key_ciphertext,
            client_secret_ciphertext: r.client_secret_ciphertext,
            is_active: r.is_active,
            is_default: r.is_default,
            last_checked_at: r.last_checked_at,
            last_error: r.last_error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    platform_connection_id: Uuid,
    platform_type: PlatformType,
    instance_url: String,
    user_id: Uuid,
    platform_post_id: String,
    url: String,
    content_text: String,
    created_at: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(r: PostRow) -> Self {
        Post {
            id: r.id,
            platform_connection_id: r.platform_connection_id,
            platform_type: r.platform_type,
            instance_url: r.instance_url,
            user_id: r.user_id,
            platform_post_id: r.platform_post_id,
            url: r.url,
            content_text: r.content_text,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ImageRow {
    id: Uuid,
    post_id: Uuid,
    platform_connection_id: Uuid,
    source_url: String,
    content_path: String,
    media_type: String,
    attachment_index: i32,
    platform_media_id: String,
    original_caption: Option<String>,
    generated_caption: Option<String>,
    reviewed_caption: Option<String>,
    final_caption: Option<String>,
    quality_score: Option<i16>,
    prompt_used: Option<String>,
    status: ImageStatus,
    reviewer_notes: Option<String>,
    processing_error: Option<String>,
    needs_special_review: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ImageRow> for Image {
    fn from(r: ImageRow) -> Self {
        Image {
            id: r.id,
            post_id: r.post_id,
            platform_connection_id: r.platform_connection_id,
            source_url: r.source_url,
            content_path: r.content_path,
            media_type: r.media_type,
            attachment_index: r.attachment_index,
            platform_media_id: r.platform_media_id,
            original_caption: r.original_caption,
            generated_caption: r.generated_caption,
            reviewed_caption: r.reviewed_caption,
            final_caption: r.final_caption,
            quality_score: r.quality_score,
            prompt_used: r.prompt_used,
            status: r.status,
            reviewer_notes: r.reviewer_notes,
            processing_error: r.processing_error,
            needs_special_review: r.needs_special_review,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    user_id: Uuid,
    platform_connection_id: Uuid,
    status: TaskStatus,
    settings: Json<CaptionGenerationSettings>,
    results: Option<Json<GenerationResults>>,
    progress_percent: i16,
    current_step: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancel_requested_at: Option<DateTime<Utc>>,
}

impl From<TaskRow> for CaptionGenerationTask {
    fn from(r: TaskRow) -> Self {
        CaptionGenerationTask {
            id: r.id,
            user_id: r.user_id,
            platform_connection_id: r.platform_connection_id,
            status: r.status,
            settings: r.settings.0,
            results: r.results.map(|j| j.0),
            progress_percent: r.progress_percent as u8,
            current_step: r.current_step,
            error_message: r.error_message,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            cancel_requested_at: r.cancel_requested_at,
        }
    }
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| VedfolnirError::Database(e.into()))?;
        Ok(())
    }

    // ---- Users ----

    pub async fn create_user(&self, username: &str, email: &str, role: UserRole) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (username, email, role, active)
            VALUES ($1, $2, $3, true)
            RETURNING id, username, email, role, active, created_at
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(role_str(role))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, role, active, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    // ---- Platform connections ----

    /// Returns the newly-created connection. Enforces "at most one default
    /// per user" by clearing any existing default first, inside the same
    /// transaction. The id is caller-supplied
    /// (`Uuid::new_v4()`, same convention as `enqueue_task`'s `id` param)
    /// rather than left to the column default, because the API layer must
    /// encrypt credentials with this id as AEAD associated data *before*
    /// the row exists (`CredentialCipher::encrypt` binds ciphertext to the
    /// owning `platform_connection_id`).
    pub async fn create_platform_connection(
        &self,
        id: Uuid,
        user_id: Uuid,
        name: &str,
        platform_type: PlatformType,
        instance_url: &str,
        username: &str,
        access_token_ciphertext: Vec<u8>,
        client_key_ciphertext: Option<Vec<u8>>,
        client_secret_ciphertext: Option<Vec<u8>>,
        make_default: bool,
    ) -> Result<PlatformConnection> {
        let mut tx = self.pool.begin().await?;

        if make_default {
            sqlx::query("UPDATE platform_connections SET is_default = false WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query_as::<_, PlatformConnectionRow>(
            r#"
            INSERT INTO platform_connections
                (id, user_id, name, platform_type, instance_url, username,
                 access_token_ciphertext, client_key_ciphertext, client_secret_ciphertext,
                 is_active, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true, $10)
            RETURNING id, user_id, name, platform_type, instance_url, username,
                      access_token_ciphertext, client_key_ciphertext, client_secret_ciphertext,
                      is_active, is_default, last_checked_at, last_error, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(name)
        .bind(platform_type)
        .bind(instance_url)
        .bind(username)
        .bind(&access_token_ciphertext)
        .bind(&client_key_ciphertext)
        .bind(&client_secret_ciphertext)
        .bind(make_default)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    pub async fn get_platform_connection(&self, id: Uuid) -> Result<Option<PlatformConnection>> {
        let row = sqlx::query_as::<_, PlatformConnectionRow>(
            r#"
            SELECT id, user_id, name, platform_type, instance_url, username,
                   access_token_ciphertext, client_key_ciphertext, client_secret_ciphertext,
                   is_active, is_default, last_checked_at, last_error, created_at, updated_at
            FROM platform_connections WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn list_platform_connections(&self, user_id: Uuid) -> Result<Vec<PlatformConnection>> {
        let rows = sqlx::query_as::<_, PlatformConnectionRow>(
            r#"
            SELECT id, user_id, name, platform_type, instance_url, username,
                   access_token_ciphertext, client_key_ciphertext, client_secret_ciphertext,
                   is_active, is_default, last_checked_at, last_error, created_at, updated_at
            FROM platform_connections WHERE user_id = $1 ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Validates ownership and activeness, then returns a fresh
    /// `PlatformContext` bound to the connection — contexts are immutable
    /// values, so "switching" produces a new one rather than mutating an
    /// existing binding in place.
    pub async fn switch_platform(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<PlatformContext> {
        let connection = self
            .get_platform_connection(connection_id)
            .await?
            .ok_or_else(|| VedfolnirError::Validation("unknown platform connection".into()))?;

        if connection.user_id != user_id {
            return Err(VedfolnirError::Validation(
                "platform connection is not owned by this user".into(),
            ));
        }
        if !connection.is_active {
            return Err(VedfolnirError::Validation(
                "platform connection is not active".into(),
            ));
        }
        Ok(PlatformContext::new(user_id, connection_id))
    }

    pub async fn record_connection_health(
        &self,
        connection_id: Uuid,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE platform_connections SET last_checked_at = now(), last_error = $2 WHERE id = $1",
        )
        .bind(connection_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes a connection, refusing when posts/images/tasks still
    /// reference it unless `force` is set. Referenced
    /// rows cascade-delete with the connection when `force` is set, via the
    /// `ON DELETE CASCADE` foreign keys already declared on those tables.
    pub async fn delete_platform_connection(&self, id: Uuid, force: bool) -> Result<bool> {
        if !force {
            let referenced: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM posts WHERE platform_connection_id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
            if referenced > 0 {
                return Err(VedfolnirError::Validation(
                    "platform connection has referenced posts/images; pass force=true to delete anyway".into(),
                ));
            }
        }
        let result = sqlx::query("DELETE FROM platform_connections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- Posts (platform-scoped) ----

    /// Requires a bound `PlatformContext` — the type signature is what
    /// makes "every query composes the filter predicate" a compile-time
    /// fact rather than a convention.
    pub async fn upsert_post(
        &self,
        ctx: &PlatformContext,
        user_id: Uuid,
        platform_type: PlatformType,
        instance_url: &str,
        platform_post_id: &str,
        url: &str,
        content_text: &str,
    ) -> Result<Post> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts
                (platform_connection_id, platform_type, instance_url, user_id,
                 platform_post_id, url, content_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (platform_connection_id, platform_post_id)
            DO UPDATE SET content_text = EXCLUDED.content_text
            RETURNING id, platform_connection_id, platform_type, instance_url, user_id,
                      platform_post_id, url, content_text, created_at
            "#,
        )
        .bind(ctx.platform_connection_id)
        .bind(platform_type)
        .bind(instance_url)
        .bind(user_id)
        .bind(platform_post_id)
        .bind(url)
        .bind(content_text)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn list_posts(&self, ctx: &PlatformContext) -> Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, platform_connection_id, platform_type, instance_url, user_id,
                   platform_post_id, url, content_text, created_at
            FROM posts WHERE platform_connection_id = $1 ORDER BY created_at DESC
            "#,
        )
        .bind(ctx.platform_connection_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ---- Images (platform-scoped) ----

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_image(
        &self,
        ctx: &PlatformContext,
        post_id: Uuid,
        source_url: &str,
        content_path: &str,
        media_type: &str,
        attachment_index: i32,
        platform_media_id: &str,
        original_caption: Option<&str>,
    ) -> Result<Image> {
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            INSERT INTO images
                (post_id, platform_connection_id, source_url, content_path, media_type,
                 attachment_index, platform_media_id, original_caption, status,
                 needs_special_review)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'error', false)
            ON CONFLICT (source_url) DO UPDATE SET source_url = EXCLUDED.source_url
            RETURNING id, post_id, platform_connection_id, source_url, content_path, media_type,
                      attachment_index, platform_media_id, original_caption, generated_caption,
                      reviewed_caption, final_caption, quality_score, prompt_used, status,
                      reviewer_notes, processing_error, needs_special_review, created_at, updated_at
            "#,
        )
        .bind(post_id)
        .bind(ctx.platform_connection_id)
        .bind(source_url)
        .bind(content_path)
        .bind(media_type)
        .bind(attachment_index)
        .bind(platform_media_id)
        .bind(original_caption)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn set_image_caption_result(
        &self,
        image_id: Uuid,
        generated_caption: Option<&str>,
        quality_score: Option<i16>,
        prompt_used: Option<&str>,
        needs_special_review: bool,
        status: ImageStatus,
        processing_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE images
            SET generated_caption = $2, quality_score = $3, prompt_used = $4,
                needs_special_review = $5, status = $6, processing_error = $7, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(image_id)
        .bind(generated_caption)
        .bind(quality_score)
        .bind(prompt_used)
        .bind(needs_special_review)
        .bind(status)
        .bind(processing_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Looks up an image by its content-addressed source URL, used by the
    /// scheduler worker to decide whether a previously-captioned image
    /// needs reprocessing before it downloads anything.
    pub async fn get_image_by_source_url(&self, source_url: &str) -> Result<Option<Image>> {
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT id, post_id, platform_connection_id, source_url, content_path, media_type,
                   attachment_index, platform_media_id, original_caption, generated_caption,
                   reviewed_caption, final_caption, quality_score, prompt_used, status,
                   reviewer_notes, processing_error, needs_special_review, created_at, updated_at
            FROM images WHERE source_url = $1
            "#,
        )
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn get_image(&self, id: Uuid) -> Result<Option<Image>> {
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT id, post_id, platform_connection_id, source_url, content_path, media_type,
                   attachment_index, platform_media_id, original_caption, generated_caption,
                   reviewed_caption, final_caption, quality_score, prompt_used, status,
                   reviewer_notes, processing_error, needs_special_review, created_at, updated_at
            FROM images WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Applies a reviewer decision. Re-applying the same approval is
    /// idempotent: setting `final_caption`
    /// to a value it already holds is a no-op write.
    pub async fn apply_review_decision(
        &self,
        image_id: Uuid,
        new_status: ImageStatus,
        reviewed_caption: Option<&str>,
        final_caption: Option<&str>,
        notes: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE images
            SET status = $2, reviewed_caption = COALESCE($3, reviewed_caption),
                final_caption = COALESCE($4, final_caption),
                reviewer_notes = COALESCE($5, reviewer_notes), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(image_id)
        .bind(new_status)
        .bind(reviewed_caption)
        .bind(final_caption)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Processing runs ----

    pub async fn open_processing_run(
        &self,
        ctx: &PlatformContext,
        task_id: Uuid,
    ) -> Result<ProcessingRun> {
        let batch_id = Uuid::new_v4();
        let row: (Uuid, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO processing_runs (batch_id, platform_connection_id, task_id, started_at)
            VALUES ($1, $2, $3, now())
            RETURNING id, started_at
            "#,
        )
        .bind(batch_id)
        .bind(ctx.platform_connection_id)
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ProcessingRun {
            id: row.0,
            batch_id,
            platform_connection_id: ctx.platform_connection_id,
            task_id,
            posts_processed: 0,
            images_processed: 0,
            captions_generated: 0,
            errors: 0,
            retry_count: 0,
            total_wait_ms: 0,
            started_at: row.1,
            completed_at: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn close_processing_run(
        &self,
        run_id: Uuid,
        posts_processed: i32,
        images_processed: i32,
        captions_generated: i32,
        errors: i32,
        retry_count: i32,
        total_wait_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processing_runs
            SET posts_processed = $2, images_processed = $3, captions_generated = $4,
                errors = $5, retry_count = $6, total_wait_ms = $7, completed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(posts_processed)
        .bind(images_processed)
        .bind(captions_generated)
        .bind(errors)
        .bind(retry_count)
        .bind(total_wait_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Caption generation tasks ----

    /// Enqueues a task iff the user has no other non-terminal task
    ///, enforced with a partial
    /// unique index (`idx_tasks_one_active_per_user`) rather than a
    /// check-then-insert race.
    pub async fn enqueue_task(
        &self,
        id: Uuid,
        user_id: Uuid,
        platform_connection_id: Uuid,
        settings: &CaptionGenerationSettings,
    ) -> Result<CaptionGenerationTask> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO caption_generation_tasks
                (id, user_id, platform_connection_id, status, settings, progress_percent, current_step)
            VALUES ($1, $2, $3, 'queued', $4, 0, 'queued')
            RETURNING id, user_id, platform_connection_id, status, settings, results,
                      progress_percent, current_step, error_message, created_at, started_at,
                      completed_at, cancel_requested_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(platform_connection_id)
        .bind(Json(settings.clone()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.constraint() == Some("idx_tasks_one_active_per_user") => {
                VedfolnirError::Validation("user already has an active task".into())
            }
            _ => VedfolnirError::Database(e),
        })?;
        Ok(row.into())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<CaptionGenerationTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, user_id, platform_connection_id, status, settings, results,
                   progress_percent, current_step, error_message, created_at, started_at,
                   completed_at, cancel_requested_at
            FROM caption_generation_tasks WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Exactly-once dequeue: CAS `queued -> running`. Returns `Ok(None)`
    /// if another worker already claimed the row.
    pub async fn try_start_task(&self, id: Uuid) -> Result<Option<CaptionGenerationTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE caption_generation_tasks
            SET status = 'running', started_at = now(), current_step = 'starting'
            WHERE id = $1 AND status = 'queued'
            RETURNING id, user_id, platform_connection_id, status, settings, results,
                      progress_percent, current_step, error_message, created_at, started_at,
                      completed_at, cancel_requested_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn update_task_progress(
        &self,
        id: Uuid,
        progress_percent: u8,
        current_step: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE caption_generation_tasks SET progress_percent = $2, current_step = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(progress_percent as i16)
        .bind(current_step)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        results: &GenerationResults,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE caption_generation_tasks
            SET status = $2, results = $3, error_message = $4, completed_at = now(),
                progress_percent = 100
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(Json(results.clone()))
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a cancellable task as cancel-requested, provided `requester_id`
    /// owns it. The actual `running -> cancelled` transition happens
    /// cooperatively inside the worker once it observes the flag. Admins
    /// bypass the ownership check via `request_cancellation_as_admin`.
    pub async fn request_cancellation(&self, id: Uuid, requester_id: Uuid) -> Result<bool> {
        let task = self
            .get_task(id)
            .await?
            .ok_or_else(|| VedfolnirError::Validation("unknown task".into()))?;

        if task.user_id != requester_id {
            return Err(VedfolnirError::Validation("requester does not own this task".into()));
        }

        self.mark_cancel_requested_if_cancellable(id, task.status).await
    }

    /// Admin/moderator variant of `request_cancellation` that bypasses the
    /// ownership check.
    pub async fn request_cancellation_as_admin(&self, id: Uuid) -> Result<bool> {
        let task = self
            .get_task(id)
            .await?
            .ok_or_else(|| VedfolnirError::Validation("unknown task".into()))?;
        self.mark_cancel_requested_if_cancellable(id, task.status).await
    }

    async fn mark_cancel_requested_if_cancellable(&self, id: Uuid, status: TaskStatus) -> Result<bool> {
        if !status.is_cancellable() {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE caption_generation_tasks SET cancel_requested_at = now() WHERE id = $1 AND cancel_requested_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    pub async fn is_cancel_requested(&self, id: Uuid) -> Result<bool> {
        let requested: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT cancel_requested_at FROM caption_generation_tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(requested.is_some())
    }

    /// On boot, reconciles crashed-in-flight tasks back to `queued`.
    pub async fn reconcile_running_tasks_on_boot(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE caption_generation_tasks SET status = 'queued', started_at = NULL WHERE status = 'running'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_active_tasks(&self) -> Result<Vec<CaptionGenerationTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, user_id, platform_connection_id, status, settings, results,
                   progress_percent, current_step, error_message, created_at, started_at,
                   completed_at, cancel_requested_at
            FROM caption_generation_tasks WHERE status IN ('queued', 'running')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list_tasks_for_user(&self, user_id: Uuid) -> Result<Vec<CaptionGenerationTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, user_id, platform_connection_id, status, settings, results,
                   progress_percent, current_step, error_message, created_at, started_at,
                   completed_at, cancel_requested_at
            FROM caption_generation_tasks WHERE user_id = $1 ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn cleanup_terminal_tasks_older_than(&self, hours: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM caption_generation_tasks
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at < now() - ($1 || ' hours')::interval
            "#,
        )
        .bind(hours.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---- User settings ----

    pub async fn get_user_settings(
        &self,
        user_id: Uuid,
        platform_connection_id: Uuid,
    ) -> Result<Option<UserSettings>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, i32, i32, i32, i32, bool, i64)>(
            r#"
            SELECT user_id, platform_connection_id, max_posts_per_run, max_caption_length,
                   optimal_min_length, optimal_max_length, reprocess_existing, processing_delay_ms
            FROM user_settings WHERE user_id = $1 AND platform_connection_id = $2
            "#,
        )
        .bind(user_id)
        .bind(platform_connection_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserSettings {
            user_id: r.0,
            platform_connection_id: r.1,
            max_posts_per_run: r.2 as u32,
            max_caption_length: r.3 as u32,
            optimal_min_length: r.4 as u32,
            optimal_max_length: r.5 as u32,
            reprocess_existing: r.6,
            processing_delay_ms: r.7 as u64,
        }))
    }

    pub async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings
                (user_id, platform_connection_id, max_posts_per_run, max_caption_length,
                 optimal_min_length, optimal_max_length, reprocess_existing, processing_delay_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, platform_connection_id) DO UPDATE SET
                max_posts_per_run = EXCLUDED.max_posts_per_run,
                max_caption_length = EXCLUDED.max_caption_length,
                optimal_min_length = EXCLUDED.optimal_min_length,
                optimal_max_length = EXCLUDED.optimal_max_length,
                reprocess_existing = EXCLUDED.reprocess_existing,
                processing_delay_ms = EXCLUDED.processing_delay_ms
            "#,
        )
        .bind(settings.user_id)
        .bind(settings.platform_connection_id)
        .bind(settings.max_posts_per_run as i32)
        .bind(settings.max_caption_length as i32)
        .bind(settings.optimal_min_length as i32)
        .bind(settings.optimal_max_length as i32)
        .bind(settings.reprocess_existing)
        .bind(settings.processing_delay_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
