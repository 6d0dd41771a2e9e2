use chrono::Utc;

mod action;
mod auth;
mod comment;
mod db;
mod error;
mod post;
mod user;
mod vote;

pub use action::{Action, FeedMessage};
pub use auth::{AuthToken, NewSession};
pub use comment::{
    Comment, CommentDelete, CommentEdit, CommentId, EditContent, NewComment, NewReply,
    MAX_COMMENT_LEN,
};
pub use db::{CommentInfo, Db};
pub use error::Error;
pub use post::{NewPost, Post, PostId, MAX_TITLE_LEN};
pub use user::{NewUser, User, UserId, MAX_NAME_LEN};
pub use vote::{CommentVote, NewVote, VoteDirection, VoteTally};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// Postgres timestamps cannot represent dates outside of this range, and
/// trying to insert one fails the whole statement.
pub fn validate_time(t: &Time) -> Result<(), Error> {
    use chrono::Datelike;
    if t.year() < -4000 || t.year() > 200000 {
        return Err(Error::TimeOutOfRange(*t));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_null_bytes() {
        assert_eq!(
            validate_string("hi\0there"),
            Err(Error::NullByteInString(String::from("hi\0there")))
        );
        assert_eq!(validate_string("hi there"), Ok(()));
    }

    #[test]
    fn rejects_unstorable_times() {
        use chrono::TimeZone;
        let t = Utc.with_ymd_and_hms(262000, 1, 1, 0, 0, 0);
        // chrono itself already refuses to build most of the unstorable range
        if let chrono::LocalResult::Single(t) = t {
            assert!(validate_time(&t).is_err());
        }
        assert_eq!(validate_time(&Utc::now()), Ok(()));
    }
}
