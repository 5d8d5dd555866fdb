use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::types::CourseRole;
use crate::repositories::{AuthorizationCheck, RepositoryError};

pub(crate) async fn find_role(
    pool: &PgPool,
    course_id: i64,
    username: &str,
) -> Result<Option<CourseRole>, sqlx::Error> {
    sqlx::query_scalar::<_, CourseRole>(
        "SELECT role
         FROM course_memberships
         WHERE course_id = $1 AND username = $2",
    )
    .bind(course_id)
    .bind(username)
    .fetch_optional(pool)
    .await
}

/// Role checks backed by course memberships. Roles are ordered, so an
/// instructor passes every check a student passes.
#[derive(Debug, Clone)]
pub(crate) struct PgAuthorizationCheck {
    pool: PgPool,
}

impl PgAuthorizationCheck {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn has_at_least(
        &self,
        course_id: i64,
        username: &str,
        required: CourseRole,
    ) -> Result<bool, RepositoryError> {
        let role = find_role(&self.pool, course_id, username).await?;
        Ok(role.is_some_and(|role| role >= required))
    }
}

#[async_trait]
impl AuthorizationCheck for PgAuthorizationCheck {
    async fn is_at_least_student(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError> {
        self.has_at_least(course_id, username, CourseRole::Student).await
    }

    async fn is_at_least_tutor(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError> {
        self.has_at_least(course_id, username, CourseRole::Tutor).await
    }

    async fn is_at_least_instructor(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError> {
        self.has_at_least(course_id, username, CourseRole::Instructor).await
    }
}
