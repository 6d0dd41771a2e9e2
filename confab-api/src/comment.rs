use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::{Error, PostId, Time, UserId, VoteDirection, VoteTally, STUB_UUID};

pub const MAX_COMMENT_LEN: usize = 5000;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// One node of a comment thread.
///
/// Children are not stored on the parent: the set of children of `c` is
/// exactly the set of comments whose `parent_id` is `c.id`, ordered by
/// `created_at`. This keeps parent/child linkage consistent by construction
/// and makes creating a reply a single atomic insert.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,

    pub content: String,

    pub created_at: Time,
    pub updated_at: Time,
    pub is_edited: bool,

    /// false = soft-deleted. The subtree below a soft-deleted comment stays
    /// addressable; only the content is redacted when rendering.
    pub is_active: bool,

    pub is_pinned: bool,
    pub is_flagged: bool,

    pub up_voters: HashSet<UserId>,
    pub down_voters: HashSet<UserId>,
}

impl Comment {
    pub fn now(
        id: CommentId,
        post_id: PostId,
        author_id: UserId,
        parent_id: Option<CommentId>,
        content: String,
    ) -> Comment {
        let date = Utc::now();
        Comment {
            id,
            post_id,
            author_id,
            parent_id,
            content,
            created_at: date,
            updated_at: date,
            is_edited: false,
            is_active: true,
            is_pinned: false,
            is_flagged: false,
            up_voters: HashSet::new(),
            down_voters: HashSet::new(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_time(&self.created_at)?;
        crate::validate_time(&self.updated_at)?;
        validate_content(&self.content)
    }

    /// Toggle semantics: voting the direction already held retracts the
    /// vote, voting the other direction moves it. A user is in at most one
    /// of the two sets at any time.
    pub fn apply_vote(&mut self, user: UserId, direction: VoteDirection) -> VoteTally {
        let (same, other) = match direction {
            VoteDirection::Up => (&mut self.up_voters, &mut self.down_voters),
            VoteDirection::Down => (&mut self.down_voters, &mut self.up_voters),
        };
        if !same.remove(&user) {
            other.remove(&user);
            same.insert(user);
        }
        self.tally(&user)
    }

    pub fn tally(&self, for_user: &UserId) -> VoteTally {
        VoteTally {
            upvotes: self.up_voters.len(),
            downvotes: self.down_voters.len(),
            my_vote: if self.up_voters.contains(for_user) {
                Some(VoteDirection::Up)
            } else if self.down_voters.contains(for_user) {
                Some(VoteDirection::Down)
            } else {
                None
            },
        }
    }
}

pub fn validate_content(content: &str) -> Result<(), Error> {
    crate::validate_string(content)?;
    if content.trim().is_empty() {
        return Err(Error::EmptyContent);
    }
    // the limit is on characters, not bytes; multibyte text gets the full
    // 5000 too
    let chars = content.chars().count();
    if chars > MAX_COMMENT_LEN {
        return Err(Error::ContentTooLong(chars));
    }
    Ok(())
}

/// Request for a top-level comment; the post is named explicitly.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub id: CommentId,
    pub content: String,
}

/// Request for a reply; the post is inherited from the parent and cannot be
/// set independently.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewReply {
    pub id: CommentId,
    pub content: String,
}

/// Body of an edit request; the author and timestamp come from the session
/// and the server clock.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditContent {
    pub content: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentEdit {
    pub comment_id: CommentId,
    pub author_id: UserId,
    pub content: String,
    pub date: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentDelete {
    pub comment_id: CommentId,
    pub requester_id: UserId,
    pub date: Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment() -> Comment {
        Comment::now(
            CommentId(Uuid::new_v4()),
            PostId::stub(),
            UserId::stub(),
            None,
            String::from("hello"),
        )
    }

    #[test]
    fn content_validation() {
        assert_eq!(validate_content("hello"), Ok(()));
        assert_eq!(validate_content("   \n\t "), Err(Error::EmptyContent));
        let too_long = "x".repeat(MAX_COMMENT_LEN + 1);
        assert_eq!(
            validate_content(&too_long),
            Err(Error::ContentTooLong(MAX_COMMENT_LEN + 1))
        );
        // exactly at the limit is fine
        assert_eq!(validate_content(&"x".repeat(MAX_COMMENT_LEN)), Ok(()));
        // the limit counts characters, so multibyte content at the limit
        // also passes even though it is far more bytes
        assert_eq!(validate_content(&"é".repeat(MAX_COMMENT_LEN)), Ok(()));
        assert_eq!(
            validate_content(&"é".repeat(MAX_COMMENT_LEN + 1)),
            Err(Error::ContentTooLong(MAX_COMMENT_LEN + 1))
        );
    }

    #[test]
    fn vote_toggle_retracts() {
        let mut c = comment();
        let u = UserId(Uuid::new_v4());
        let t = c.apply_vote(u, VoteDirection::Up);
        assert_eq!((t.upvotes, t.downvotes, t.my_vote), (1, 0, Some(VoteDirection::Up)));
        let t = c.apply_vote(u, VoteDirection::Up);
        assert_eq!((t.upvotes, t.downvotes, t.my_vote), (0, 0, None));
    }

    #[test]
    fn vote_moves_between_directions() {
        let mut c = comment();
        let u = UserId(Uuid::new_v4());
        let t = c.apply_vote(u, VoteDirection::Up);
        assert_eq!((t.upvotes, t.downvotes), (1, 0));
        let t = c.apply_vote(u, VoteDirection::Down);
        assert_eq!((t.upvotes, t.downvotes, t.my_vote), (0, 1, Some(VoteDirection::Down)));
    }

    #[test]
    fn votes_mutually_exclusive_under_any_sequence() {
        bolero::check!()
            .with_type::<Vec<(u8, bool)>>()
            .cloned()
            .for_each(|votes| {
                let mut c = comment();
                let users: Vec<UserId> = (0..4).map(|_| UserId(Uuid::new_v4())).collect();
                for (u, up) in votes {
                    let user = users[u as usize % users.len()];
                    let dir = if up { VoteDirection::Up } else { VoteDirection::Down };
                    c.apply_vote(user, dir);
                    assert!(c.up_voters.is_disjoint(&c.down_voters));
                }
                assert!(c.up_voters.len() + c.down_voters.len() <= users.len());
            });
    }
}
