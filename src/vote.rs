//! Vote casting engine.
//!
//! Preconditions are checked in order and short-circuit; the write path is
//! one transaction pairing an advisory duplicate check with the insert. The
//! unique constraint on (question_id, principal_id) is the authoritative
//! guard: a 23505 raised by a racing insert converges to the same
//! "already voted" rejection as the advisory path.

use serde::Serialize;
use uuid::Uuid;

use crate::cache::{results_key, ResultsCache};
use crate::errors::AppError;
use crate::store::postgres::{is_unique_violation, PgStore, VoteInsert};

#[derive(Debug, Serialize)]
pub struct VoteReceipt {
    pub vote_uuid: Uuid,
    pub question_id: i64,
    pub option_id: i64,
}

pub struct VoteService {
    db: PgStore,
    cache: ResultsCache,
    voting_enabled: bool,
}

impl VoteService {
    pub fn new(db: PgStore, cache: ResultsCache, voting_enabled: bool) -> Self {
        Self {
            db,
            cache,
            voting_enabled,
        }
    }

    pub async fn cast_vote(
        &self,
        question_id: i64,
        option_id: i64,
        principal_id: i64,
    ) -> Result<VoteReceipt, AppError> {
        if !self.voting_enabled {
            return Err(AppError::VotingDisabled);
        }
        if principal_id <= 0 {
            return Err(AppError::MissingToken);
        }

        let question = self
            .db
            .get_active_question(question_id)
            .await?
            .ok_or(AppError::QuestionNotFound)?;

        let option = self
            .db
            .get_option(option_id)
            .await?
            .ok_or(AppError::OptionNotFound)?;
        if option.question_id != question.id {
            return Err(AppError::OptionNotFound);
        }

        let outcome = self
            .db
            .insert_vote(question.id, option.id, principal_id)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::AlreadyVoted
                } else {
                    AppError::Database(e)
                }
            })?;

        let vote_uuid = match outcome {
            VoteInsert::Duplicate => return Err(AppError::AlreadyVoted),
            VoteInsert::Inserted(uuid) => uuid,
        };

        tracing::info!(
            principal = principal_id,
            question = question.id,
            option = option.id,
            "vote registered"
        );

        // Derived results for this question are stale now.
        self.cache.invalidate(&results_key(question.id)).await;

        Ok(VoteReceipt {
            vote_uuid,
            question_id: question.id,
            option_id: option.id,
        })
    }
}
