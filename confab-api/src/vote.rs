use crate::{CommentId, Time, UserId};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum VoteDirection {
    Up,
    Down,
}

/// Aggregate counts for one comment plus the requesting user's own vote.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VoteTally {
    pub upvotes: usize,
    pub downvotes: usize,
    pub my_vote: Option<VoteDirection>,
}

/// Body of a vote request; the voter and timestamp come from the session
/// and the server clock.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewVote {
    pub direction: VoteDirection,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentVote {
    pub comment_id: CommentId,
    pub user_id: UserId,
    pub direction: VoteDirection,
    pub date: Time,
}
