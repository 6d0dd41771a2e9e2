use std::collections::{btree_map, BTreeMap, HashMap};

use confab_client::{
    api::{
        Action, AuthToken, Comment, CommentDelete, CommentEdit, CommentId, CommentVote, Error,
        FeedMessage, NewComment, NewPost, NewReply, NewSession, NewUser, Post, PostId, User,
        UserId, Uuid, VoteDirection, VoteTally,
    },
    DbDump,
};
use chrono::Utc;
use tokio::sync::mpsc;

/// In-memory rendition of the whole server, for tests: same validation,
/// same authorization path, same actions, no postgres and no axum.
pub struct MockServer {
    users: BTreeMap<UserId, MockUser>,
    sessions: HashMap<AuthToken, (UserId, Device)>,
    db: DbDump,
    feeds: Vec<mpsc::UnboundedSender<FeedMessage>>,
}

#[derive(Debug)]
struct MockUser {
    name: String,
    // mock logins compare plaintext; tests never hash
    pass: String,
}

#[derive(Debug)]
#[allow(dead_code)] // keeps which-device-did-what visible in test failures
struct Device(String);

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            users: BTreeMap::new(),
            sessions: HashMap::new(),
            db: DbDump::stub(),
            feeds: Vec::new(),
        }
    }

    pub fn admin_create_user(&mut self, u: NewUser, password: String) -> Result<(), Error> {
        u.validate()?;

        if self.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(MockUser {
                    name: u.name.clone(),
                    pass: password,
                });
                self.db.add_users(vec![User {
                    id: u.id,
                    name: u.name,
                    avatar: None,
                }]);
                Ok(())
            }
        }
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        for (id, u) in self.users.iter() {
            if u.name == s.user {
                if s.password != u.pass {
                    return Err(Error::PermissionDenied);
                }
                let tok = AuthToken(Uuid::new_v4());
                self.sessions.insert(tok, (*id, Device(s.device)));
                return Ok(tok);
            }
        }
        Err(Error::PermissionDenied)
    }

    fn resolve(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.sessions
            .get(&tok)
            .map(|(u, _)| *u)
            .ok_or(Error::PermissionDenied)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        self.resolve(tok)?;
        self.sessions.remove(&tok);
        Ok(())
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.resolve(tok)
    }

    pub fn fetch_users(&self, tok: AuthToken) -> Result<Vec<User>, Error> {
        self.resolve(tok)?;
        Ok(self.db.users.values().cloned().collect())
    }

    pub fn fetch_posts(&self, tok: AuthToken) -> Result<Vec<Post>, Error> {
        self.resolve(tok)?;
        Ok(self.db.posts.values().cloned().collect())
    }

    pub fn fetch_thread(&self, tok: AuthToken, post: PostId) -> Result<Vec<Comment>, Error> {
        self.resolve(tok)?;
        if !self.db.posts.contains_key(&post) {
            return Err(Error::NotFound(post.0));
        }
        Ok(self
            .db
            .comments
            .values()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect())
    }

    pub async fn create_post(&mut self, tok: AuthToken, p: NewPost) -> Result<Post, Error> {
        let user = self.resolve(tok)?;
        if self.db.posts.contains_key(&p.id) {
            return Err(Error::UuidAlreadyUsed(p.id.0));
        }
        let post = p.into_post(user);
        self.submit(user, Action::NewPost(post.clone())).await?;
        Ok(post)
    }

    pub async fn create_comment(
        &mut self,
        tok: AuthToken,
        post: PostId,
        c: NewComment,
    ) -> Result<Comment, Error> {
        let user = self.resolve(tok)?;
        if self.db.comments.contains_key(&c.id) {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        let comment = Comment::now(c.id, post, user, None, c.content);
        self.submit(user, Action::NewComment(comment.clone())).await?;
        Ok(comment)
    }

    pub async fn create_reply(
        &mut self,
        tok: AuthToken,
        parent: CommentId,
        r: NewReply,
    ) -> Result<Comment, Error> {
        let user = self.resolve(tok)?;
        if self.db.comments.contains_key(&r.id) {
            return Err(Error::UuidAlreadyUsed(r.id.0));
        }
        // the post is inherited from the parent, never chosen by the caller
        let post = match self.db.comments.get(&parent) {
            Some(p) => p.post_id,
            None => return Err(Error::NotFound(parent.0)),
        };
        let comment = Comment::now(r.id, post, user, Some(parent), r.content);
        self.submit(user, Action::NewComment(comment.clone())).await?;
        Ok(comment)
    }

    pub async fn edit_comment(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
        content: String,
    ) -> Result<Comment, Error> {
        let user = self.resolve(tok)?;
        self.submit(
            user,
            Action::EditComment(CommentEdit {
                comment_id: comment,
                author_id: user,
                content,
                date: Utc::now(),
            }),
        )
        .await?;
        Ok(self
            .db
            .comments
            .get(&comment)
            .expect("edited comment vanished")
            .clone())
    }

    pub async fn delete_comment(&mut self, tok: AuthToken, comment: CommentId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        self.submit(
            user,
            Action::DeleteComment(CommentDelete {
                comment_id: comment,
                requester_id: user,
                date: Utc::now(),
            }),
        )
        .await
    }

    pub async fn vote(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
        direction: VoteDirection,
    ) -> Result<VoteTally, Error> {
        let user = self.resolve(tok)?;
        self.submit(
            user,
            Action::Vote(CommentVote {
                comment_id: comment,
                user_id: user,
                direction,
                date: Utc::now(),
            }),
        )
        .await?;
        Ok(self
            .db
            .comments
            .get(&comment)
            .expect("voted comment vanished")
            .tally(&user))
    }

    pub fn action_feed(
        &mut self,
        tok: AuthToken,
    ) -> Result<mpsc::UnboundedReceiver<FeedMessage>, Error> {
        self.resolve(tok)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds.push(sender);
        Ok(receiver)
    }

    /// Shared write path: validate, authorize against the current state,
    /// apply, relay. Exactly what the real server does, minus the sql.
    async fn submit(&mut self, user: UserId, a: Action) -> Result<(), Error> {
        a.validate()?;
        let mut as_user = self.db.clone();
        as_user.owner = user;
        let mut db = &as_user;
        a.check(&mut db)
            .await
            .map_err(|e| Error::Unknown(format!("{e:#}")))??;
        self.db.apply_action(a.clone());
        self.feeds
            .retain(|f| f.send(FeedMessage::Action(a.clone())).is_ok());
        Ok(())
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            id: UserId(Uuid::new_v4()),
            name: String::from(name),
            initial_password_hash: String::from("hunter2"),
        }
    }

    fn login(srv: &mut MockServer, name: &str) -> AuthToken {
        srv.auth(NewSession::new(
            String::from(name),
            String::from("hunter2"),
            String::from("tests"),
        ))
        .expect("logging in")
    }

    /// One server with users alice and bob, both logged in, and a post by
    /// alice.
    async fn setup() -> (MockServer, AuthToken, AuthToken, PostId) {
        let mut srv = MockServer::new();
        srv.admin_create_user(new_user("alice"), String::from("hunter2"))
            .unwrap();
        srv.admin_create_user(new_user("bob"), String::from("hunter2"))
            .unwrap();
        let alice = login(&mut srv, "alice");
        let bob = login(&mut srv, "bob");
        let post = PostId(Uuid::new_v4());
        srv.create_post(
            alice,
            NewPost {
                id: post,
                title: String::from("a post"),
            },
        )
        .await
        .unwrap();
        (srv, alice, bob, post)
    }

    #[test]
    fn duplicate_names_and_uuids_conflict() {
        let mut srv = MockServer::new();
        let u = new_user("alice");
        srv.admin_create_user(u.clone(), String::from("hunter2")).unwrap();
        assert_eq!(
            srv.admin_create_user(new_user("alice"), String::from("x")),
            Err(Error::NameAlreadyUsed(String::from("alice")))
        );
        let mut reused = new_user("carol");
        reused.id = u.id;
        assert_eq!(
            srv.admin_create_user(reused, String::from("x")),
            Err(Error::UuidAlreadyUsed(u.id.0))
        );
    }

    #[test]
    fn bad_credentials_are_denied() {
        let mut srv = MockServer::new();
        srv.admin_create_user(new_user("alice"), String::from("hunter2"))
            .unwrap();
        let res = srv.auth(NewSession::new(
            String::from("alice"),
            String::from("wrong"),
            String::from("tests"),
        ));
        assert_eq!(res, Err(Error::PermissionDenied));
        assert_eq!(srv.whoami(AuthToken::stub()), Err(Error::PermissionDenied));
    }

    #[tokio::test]
    async fn comment_on_unknown_post_is_not_found() {
        let (mut srv, alice, _bob, _post) = setup().await;
        let ghost = PostId(Uuid::new_v4());
        let res = srv
            .create_comment(
                alice,
                ghost,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("hello?"),
                },
            )
            .await;
        assert_eq!(res, Err(Error::NotFound(ghost.0)));
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let (mut srv, alice, _bob, post) = setup().await;
        let res = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("  \n "),
                },
            )
            .await;
        assert_eq!(res, Err(Error::EmptyContent));
    }

    #[tokio::test]
    async fn reply_links_to_parent_and_inherits_post() {
        let (mut srv, alice, bob, post) = setup().await;
        let c1 = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("top"),
                },
            )
            .await
            .unwrap();
        let c2 = srv
            .create_reply(
                bob,
                c1.id,
                NewReply {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("hi"),
                },
            )
            .await
            .unwrap();
        assert_eq!(c2.parent_id, Some(c1.id));
        assert_eq!(c2.post_id, post);

        let thread = srv.fetch_thread(bob, post).unwrap();
        assert_eq!(thread.len(), 2);
    }

    #[tokio::test]
    async fn deleted_root_redacts_but_keeps_children() {
        let (mut srv, alice, bob, post) = setup().await;
        let c1 = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("top"),
                },
            )
            .await
            .unwrap();
        let c2 = srv
            .create_reply(
                bob,
                c1.id,
                NewReply {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("hi"),
                },
            )
            .await
            .unwrap();
        srv.delete_comment(alice, c1.id).await.unwrap();

        // materialize the thread the way a client would
        let mut dump = DbDump::stub();
        dump.owner = srv.whoami(bob).unwrap();
        dump.add_posts(srv.fetch_posts(bob).unwrap());
        dump.add_comments(srv.fetch_thread(bob, post).unwrap());
        let view = dump.thread_view(post);

        let root = view.find(&c1.id).expect("redacted root");
        assert!(root.is_deleted);
        assert_eq!(root.content, confab_client::REDACTED_CONTENT);
        assert_eq!(view.find(&c2.id).unwrap().content, "hi");

        // replying below the deleted comment is still allowed
        let c3 = srv
            .create_reply(
                bob,
                c1.id,
                NewReply {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("still here"),
                },
            )
            .await;
        assert!(c3.is_ok());
    }

    #[tokio::test]
    async fn vote_moves_then_retracts() {
        let (mut srv, alice, bob, post) = setup().await;
        let c = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("vote on me"),
                },
            )
            .await
            .unwrap();

        let t = srv.vote(bob, c.id, VoteDirection::Up).await.unwrap();
        assert_eq!((t.upvotes, t.downvotes, t.my_vote), (1, 0, Some(VoteDirection::Up)));
        let t = srv.vote(bob, c.id, VoteDirection::Down).await.unwrap();
        assert_eq!((t.upvotes, t.downvotes, t.my_vote), (0, 1, Some(VoteDirection::Down)));
        let t = srv.vote(bob, c.id, VoteDirection::Down).await.unwrap();
        assert_eq!((t.upvotes, t.downvotes, t.my_vote), (0, 0, None));
    }

    #[tokio::test]
    async fn only_the_author_edits() {
        let (mut srv, alice, bob, post) = setup().await;
        let c = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("v1"),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            srv.edit_comment(bob, c.id, String::from("defaced")).await,
            Err(Error::PermissionDenied)
        );
        let edited = srv
            .edit_comment(alice, c.id, String::from("v2"))
            .await
            .unwrap();
        assert_eq!(edited.content, "v2");
        assert!(edited.is_edited);
        assert!(edited.updated_at > edited.created_at);
    }

    #[tokio::test]
    async fn moderation_allows_post_author_to_delete() {
        let (mut srv, alice, bob, post) = setup().await;
        let c = srv
            .create_comment(
                bob,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("rude"),
                },
            )
            .await
            .unwrap();

        // carol is neither author nor post owner
        srv.admin_create_user(new_user("carol"), String::from("hunter2"))
            .unwrap();
        let carol = login(&mut srv, "carol");
        assert_eq!(
            srv.delete_comment(carol, c.id).await,
            Err(Error::PermissionDenied)
        );
        // alice owns the post, so she moderates it
        assert_eq!(srv.delete_comment(alice, c.id).await, Ok(()));
    }

    #[tokio::test]
    async fn cross_post_replies_are_rejected() {
        let (mut srv, alice, _bob, post) = setup().await;
        let other_post = PostId(Uuid::new_v4());
        srv.create_post(
            alice,
            NewPost {
                id: other_post,
                title: String::from("another post"),
            },
        )
        .await
        .unwrap();
        let c = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("top"),
                },
            )
            .await
            .unwrap();

        // the REST surface cannot even express a mismatched reply; a forged
        // action claiming the wrong post must be rejected by the model
        let forged = Comment::now(
            CommentId(Uuid::new_v4()),
            other_post,
            srv.whoami(alice).unwrap(),
            Some(c.id),
            String::from("sneaky"),
        );
        let mut as_alice = srv.db.clone();
        as_alice.owner = srv.whoami(alice).unwrap();
        let mut db = &as_alice;
        let res = Action::NewComment(forged).check(&mut db).await.unwrap();
        assert_eq!(res, Err(Error::PermissionDenied));
    }

    #[tokio::test]
    async fn reply_dated_before_its_parent_is_a_structural_conflict() {
        let (mut srv, alice, _bob, post) = setup().await;
        let parent = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("top"),
                },
            )
            .await
            .unwrap();

        // a parent must be strictly older than its children; a reply dated
        // at or before the parent can only come from clock skew and is
        // refused as a retryable conflict
        let mut reply = Comment::now(
            CommentId(Uuid::new_v4()),
            post,
            srv.whoami(alice).unwrap(),
            Some(parent.id),
            String::from("from the past"),
        );
        reply.created_at = parent.created_at;
        reply.updated_at = parent.created_at;
        let mut as_alice = srv.db.clone();
        as_alice.owner = srv.whoami(alice).unwrap();
        let mut db = &as_alice;
        let res = Action::NewComment(reply.clone()).check(&mut db).await.unwrap();
        assert_eq!(res, Err(Error::StructuralConflict(parent.id.0)));

        // same with a properly later date, to pin down that the refusal was
        // really about the timestamp
        reply.created_at = parent.created_at + chrono::Duration::seconds(1);
        reply.updated_at = reply.created_at;
        let mut db = &as_alice;
        let res = Action::NewComment(reply).check(&mut db).await.unwrap();
        assert_eq!(res, Ok(()));
    }

    #[tokio::test]
    async fn feed_relays_applied_actions() {
        let (mut srv, alice, bob, post) = setup().await;
        let mut feed = srv.action_feed(bob).unwrap();
        let c = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    content: String::from("news"),
                },
            )
            .await
            .unwrap();

        match feed.try_recv() {
            Ok(FeedMessage::Action(Action::NewComment(seen))) => assert_eq!(seen.id, c.id),
            other => panic!("expected relayed NewComment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reused_comment_uuid_conflicts() {
        let (mut srv, alice, _bob, post) = setup().await;
        let id = CommentId(Uuid::new_v4());
        srv.create_comment(
            alice,
            post,
            NewComment {
                id,
                content: String::from("first"),
            },
        )
        .await
        .unwrap();
        let res = srv
            .create_comment(
                alice,
                post,
                NewComment {
                    id,
                    content: String::from("second"),
                },
            )
            .await;
        assert_eq!(res, Err(Error::UuidAlreadyUsed(id.0)));
    }
}
