use async_trait::async_trait;

use crate::{CommentId, PostId, Time, UserId};

/// What the authorization logic needs to know about an existing comment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommentInfo {
    pub author_id: UserId,
    pub post_id: PostId,
    pub created_at: Time,
    pub is_active: bool,
}

/// The collaborators every deployment of the model must provide: entity
/// existence checks and the moderation capability. Implemented by the
/// server's postgres connection, the mock server, and the client-side dump.
#[async_trait]
pub trait Db {
    fn current_user(&self) -> UserId;
    async fn post_exists(&mut self, p: PostId) -> anyhow::Result<bool>;
    async fn comment_info(&mut self, c: CommentId) -> anyhow::Result<Option<CommentInfo>>;
    async fn can_moderate(&mut self, user: UserId, p: PostId) -> anyhow::Result<bool>;
}
