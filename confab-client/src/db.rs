use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    api::{
        Action, Comment, CommentId, CommentInfo, Db, Post, PostId, User, UserId, VoteTally,
    },
    ThreadView,
};

/// Display data for a user hover card, with the fallback already applied:
/// an unknown author renders as Anonymous with the default avatar, never as
/// a rendering failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserCard {
    pub name: String,
    pub avatar: Option<String>,
}

impl UserCard {
    fn anonymous() -> UserCard {
        UserCard {
            name: String::from("Anonymous"),
            avatar: None,
        }
    }
}

/// Everything the client knows, fetched from the server and then patched
/// locally from the action feed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DbDump {
    pub owner: UserId,
    pub users: Arc<HashMap<UserId, User>>,
    pub posts: Arc<HashMap<PostId, Post>>,
    pub comments: Arc<HashMap<CommentId, Comment>>,
}

impl DbDump {
    pub fn stub() -> DbDump {
        DbDump {
            owner: UserId::stub(),
            users: Arc::new(HashMap::new()),
            posts: Arc::new(HashMap::new()),
            comments: Arc::new(HashMap::new()),
        }
    }

    pub fn add_users(&mut self, users: Vec<User>) {
        Arc::make_mut(&mut self.users).extend(users.into_iter().map(|u| (u.id, u)));
    }

    pub fn add_posts(&mut self, posts: Vec<Post>) {
        Arc::make_mut(&mut self.posts).extend(posts.into_iter().map(|p| (p.id, p)));
    }

    pub fn add_comments(&mut self, comments: Vec<Comment>) {
        Arc::make_mut(&mut self.comments).extend(comments.into_iter().map(|c| (c.id, c)));
    }

    /// Patch local state with one action coming off the live feed. Actions
    /// about comments we never fetched are ignored.
    pub fn apply_action(&mut self, a: Action) {
        match a {
            Action::NewUser(u) => {
                Arc::make_mut(&mut self.users).insert(u.id, u);
            }
            Action::NewPost(p) => {
                Arc::make_mut(&mut self.posts).insert(p.id, p);
            }
            Action::NewComment(c) => {
                // only track comments of threads we already follow
                if self.posts.contains_key(&c.post_id) {
                    Arc::make_mut(&mut self.comments).insert(c.id, c);
                }
            }
            Action::EditComment(e) => {
                if let Some(c) = Arc::make_mut(&mut self.comments).get_mut(&e.comment_id) {
                    c.content = e.content;
                    c.updated_at = e.date;
                    c.is_edited = true;
                }
            }
            Action::DeleteComment(d) => {
                if let Some(c) = Arc::make_mut(&mut self.comments).get_mut(&d.comment_id) {
                    c.is_active = false;
                }
            }
            Action::Vote(v) => {
                if let Some(c) = Arc::make_mut(&mut self.comments).get_mut(&v.comment_id) {
                    c.apply_vote(v.user_id, v.direction);
                }
            }
        }
    }

    pub fn user_card(&self, user: &UserId) -> UserCard {
        match self.users.get(user) {
            Some(u) => UserCard {
                name: u.name.clone(),
                avatar: u.avatar.clone(),
            },
            None => UserCard::anonymous(),
        }
    }

    pub fn thread_view(&self, post_id: PostId) -> ThreadView {
        ThreadView::build(post_id, &self.comments, &self.owner)
    }

    pub fn tally(&self, comment: &CommentId) -> Option<VoteTally> {
        self.comments.get(comment).map(|c| c.tally(&self.owner))
    }
}

#[async_trait]
impl Db for &DbDump {
    fn current_user(&self) -> UserId {
        self.owner
    }

    async fn post_exists(&mut self, p: PostId) -> anyhow::Result<bool> {
        Ok(self.posts.contains_key(&p))
    }

    async fn comment_info(&mut self, c: CommentId) -> anyhow::Result<Option<CommentInfo>> {
        Ok(self.comments.get(&c).map(|c| CommentInfo {
            author_id: c.author_id,
            post_id: c.post_id,
            created_at: c.created_at,
            is_active: c.is_active,
        }))
    }

    async fn can_moderate(&mut self, user: UserId, p: PostId) -> anyhow::Result<bool> {
        Ok(self.posts.get(&p).map(|p| p.author_id == user).unwrap_or(false))
    }
}
