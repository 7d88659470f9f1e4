use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Outcome of the transactional vote insert. A duplicate found by the
/// advisory pre-check is reported here; a duplicate that slips past it and
/// trips the unique constraint surfaces as a database error the vote
/// service translates (see `is_unique_violation`).
#[derive(Debug)]
pub enum VoteInsert {
    Inserted(Uuid),
    Duplicate,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Principal Operations --

    pub async fn insert_principal(
        &self,
        username: &str,
        password_hash: &str,
        password_salt: &str,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO principals (username, password_hash, password_salt)
               VALUES ($1, $2, $3)
               RETURNING id"#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(password_salt)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_principal_by_username(
        &self,
        username: &str,
    ) -> sqlx::Result<Option<PrincipalRow>> {
        sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, username, password_hash, password_salt, is_active, created_at FROM principals WHERE username = $1"
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_principal(&self, id: i64) -> sqlx::Result<Option<PrincipalRow>> {
        sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, username, password_hash, password_salt, is_active, created_at FROM principals WHERE id = $1"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_principals(&self) -> sqlx::Result<Vec<PrincipalRow>> {
        sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, username, password_hash, password_salt, is_active, created_at FROM principals ORDER BY id ASC"
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn set_principal_active(&self, id: i64, active: bool) -> sqlx::Result<bool> {
        let result = sqlx::query("UPDATE principals SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Question / Option Operations --

    pub async fn insert_question(
        &self,
        title: &str,
        show_results: bool,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO questions (title, show_results) VALUES ($1, $2) RETURNING id",
        )
        .bind(title)
        .bind(show_results)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn insert_option(
        &self,
        question_id: i64,
        title: &str,
        weight: i32,
    ) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO options (question_id, title, weight)
               VALUES ($1, $2, $3)
               RETURNING id"#,
        )
        .bind(question_id)
        .bind(title)
        .bind(weight)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn count_active_questions(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM questions WHERE status = TRUE")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_active_questions(
        &self,
        offset: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<QuestionRow>> {
        sqlx::query_as::<_, QuestionRow>(
            r#"SELECT id, uuid, title, status, show_results, created_at
               FROM questions WHERE status = TRUE
               ORDER BY id ASC OFFSET $1 LIMIT $2"#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Loads a question only when it exists and is enabled.
    pub async fn get_active_question(&self, id: i64) -> sqlx::Result<Option<QuestionRow>> {
        sqlx::query_as::<_, QuestionRow>(
            r#"SELECT id, uuid, title, status, show_results, created_at
               FROM questions WHERE id = $1 AND status = TRUE"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn count_options(&self, question_id: i64) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM options WHERE question_id = $1")
            .bind(question_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_options(
        &self,
        question_id: i64,
        offset: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<OptionRow>> {
        sqlx::query_as::<_, OptionRow>(
            r#"SELECT id, uuid, question_id, title, weight, created_at
               FROM options WHERE question_id = $1
               ORDER BY weight ASC, id ASC OFFSET $2 LIMIT $3"#,
        )
        .bind(question_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_option(&self, option_id: i64) -> sqlx::Result<Option<OptionRow>> {
        sqlx::query_as::<_, OptionRow>(
            r#"SELECT id, uuid, question_id, title, weight, created_at
               FROM options WHERE id = $1"#,
        )
        .bind(option_id)
        .fetch_optional(&self.pool)
        .await
    }

    // -- Vote Operations --

    /// Advisory existence check plus insert, in one transaction. Concurrent
    /// attempts for the same (question, principal) can both pass the check;
    /// exactly one commit wins and the loser gets a 23505 from the
    /// `votes_question_principal_key` constraint.
    pub async fn insert_vote(
        &self,
        question_id: i64,
        option_id: i64,
        principal_id: i64,
    ) -> sqlx::Result<VoteInsert> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM votes WHERE question_id = $1 AND principal_id = $2)",
        )
        .bind(question_id)
        .bind(principal_id)
        .fetch_one(&mut *tx)
        .await?;

        if exists {
            tx.rollback().await?;
            return Ok(VoteInsert::Duplicate);
        }

        let vote_uuid = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO votes (uuid, question_id, option_id, principal_id, created_at)
               VALUES ($1, $2, $3, $4, NOW())"#,
        )
        .bind(vote_uuid)
        .bind(question_id)
        .bind(option_id)
        .bind(principal_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(VoteInsert::Inserted(vote_uuid))
    }

    /// Per-option vote counts for a question, options ordered by weight.
    pub async fn option_counts(
        &self,
        question_id: i64,
        offset: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<OptionCountRow>> {
        sqlx::query_as::<_, OptionCountRow>(
            r#"SELECT o.id AS option_id, o.title, COUNT(v.id) AS votes
               FROM options o
               LEFT JOIN votes v ON v.option_id = o.id
               WHERE o.question_id = $1
               GROUP BY o.id, o.title, o.weight
               ORDER BY o.weight ASC, o.id ASC
               OFFSET $2 LIMIT $3"#,
        )
        .bind(question_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn total_votes(&self, question_id: i64) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM votes WHERE question_id = $1")
            .bind(question_id)
            .fetch_one(&self.pool)
            .await
    }
}

/// True when a sqlx error is a Postgres unique-constraint violation
/// (SQLSTATE 23505). Only the vote service reinterprets this as a domain
/// rejection; everywhere else it propagates as a storage error.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
        assert!(!is_unique_violation(&sqlx::Error::WorkerCrashed));
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PrincipalRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QuestionRow {
    pub id: i64,
    pub uuid: Uuid,
    pub title: String,
    pub status: bool,
    pub show_results: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct OptionRow {
    pub id: i64,
    pub uuid: Uuid,
    pub question_id: i64,
    pub title: String,
    pub weight: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct OptionCountRow {
    pub option_id: i64,
    pub title: String,
    pub votes: i64,
}
