use anyhow::Context;

use crate::{
    Comment, CommentDelete, CommentEdit, CommentVote, Db, Error, Post, User,
};

/// Every write against the forum, in the shape it is applied and relayed to
/// live feeds. REST handlers build one of these, run `validate` + `check`,
/// apply it, then broadcast it so clients can patch their local tree.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub enum Action {
    NewUser(User),
    NewPost(Post),
    NewComment(Comment),
    EditComment(CommentEdit),
    DeleteComment(CommentDelete),
    Vote(CommentVote),
}

/// What goes down the live-feed websocket.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Action(Action),
}

impl Action {
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Action::NewUser(u) => crate::user::validate_name(&u.name),
            Action::NewPost(p) => p.validate(),
            Action::NewComment(c) => c.validate(),
            Action::EditComment(e) => {
                crate::validate_time(&e.date)?;
                crate::comment::validate_content(&e.content)
            }
            Action::DeleteComment(d) => crate::validate_time(&d.date),
            Action::Vote(v) => crate::validate_time(&v.date),
        }
    }

    /// Resolves the targets of this action and checks the caller is allowed
    /// to perform it. The outer error is an internal failure of the `Db`
    /// collaborator; the inner one is what the caller did wrong.
    pub async fn check<D: Db>(&self, db: &mut D) -> anyhow::Result<Result<(), Error>> {
        let me = db.current_user();
        macro_rules! comment_info {
            ($c:expr) => {{
                let c = $c;
                match db
                    .comment_info(c)
                    .await
                    .with_context(|| format!("fetching info of comment {:?}", c))?
                {
                    Some(info) => info,
                    None => return Ok(Err(Error::NotFound(c.0))),
                }
            }};
        }
        Ok(match self {
            // users are only ever created through the admin endpoint
            Action::NewUser(_) => Err(Error::PermissionDenied),
            Action::NewPost(p) => match p.author_id == me {
                true => Ok(()),
                false => Err(Error::PermissionDenied),
            },
            Action::NewComment(c) => {
                if c.author_id != me {
                    return Ok(Err(Error::PermissionDenied));
                }
                if !db
                    .post_exists(c.post_id)
                    .await
                    .with_context(|| format!("checking existence of post {:?}", c.post_id))?
                {
                    return Ok(Err(Error::NotFound(c.post_id.0)));
                }
                if let Some(parent) = c.parent_id {
                    let info = comment_info!(parent);
                    // the post is inherited from the parent, never set freely
                    if info.post_id != c.post_id {
                        return Ok(Err(Error::PermissionDenied));
                    }
                    // a parent is always strictly older than its children;
                    // this is what keeps the thread a forest. An equal
                    // timestamp can only come from a clock oddity, so ask
                    // the caller to retry with a fresh date.
                    if info.created_at >= c.created_at {
                        return Ok(Err(Error::StructuralConflict(parent.0)));
                    }
                    // note: replying below a soft-deleted parent is allowed
                }
                Ok(())
            }
            Action::EditComment(e) => {
                let info = comment_info!(e.comment_id);
                match e.author_id == me && info.author_id == me {
                    true => Ok(()),
                    false => Err(Error::PermissionDenied),
                }
            }
            Action::DeleteComment(d) => {
                let info = comment_info!(d.comment_id);
                if d.requester_id != me {
                    return Ok(Err(Error::PermissionDenied));
                }
                let moderates = db
                    .can_moderate(me, info.post_id)
                    .await
                    .with_context(|| format!("checking moderation rights on {:?}", info.post_id))?;
                match info.author_id == me || moderates {
                    true => Ok(()),
                    false => Err(Error::PermissionDenied),
                }
            }
            Action::Vote(v) => {
                let _ = comment_info!(v.comment_id);
                match v.user_id == me {
                    true => Ok(()),
                    false => Err(Error::PermissionDenied),
                }
            }
        })
    }
}
