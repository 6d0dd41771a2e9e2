use std::collections::HashMap;

use anyhow::Context;
use chrono::Utc;
use confab_api::{
    Action, AuthToken, Comment, CommentId, CommentInfo, Db, Error as ApiError, NewSession, NewUser,
    Post, PostId, User, UserId, Uuid, VoteDirection, VoteTally,
};
use sqlx::Row;

use crate::Error;

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    let res = sqlx::query("INSERT INTO users (id, name, password) VALUES ($1, $2, $3)")
        .bind(u.id.0)
        .bind(&u.name)
        .bind(&u.initial_password_hash)
        .execute(conn)
        .await;
    match res {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(err)) if err.constraint() == Some("users_pkey") => {
            Err(Error::uuid_already_used(u.id.0))
        }
        Err(sqlx::Error::Database(err)) if err.constraint() == Some("users_name_key") => {
            Err(Error::name_already_used(u.name))
        }
        Err(e) => Err(Error::Anyhow(
            anyhow::Error::from(e).context("inserting user"),
        )),
    }
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let user = sqlx::query("SELECT id, password FROM users WHERE name = $1")
        .bind(&s.user)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table")?;
    let user = match user {
        Some(u) => u,
        None => return Ok(None),
    };
    let id: Uuid = user.try_get("id").context("retrieving the id field")?;
    let hash: String = user
        .try_get("password")
        .context("retrieving the password field")?;
    if !bcrypt::verify(&s.password, &hash).context("verifying password hash")? {
        return Ok(None);
    }
    let token = Uuid::new_v4();
    sqlx::query("INSERT INTO sessions (token, user_id, device, login_time) VALUES ($1, $2, $3, $4)")
        .bind(token)
        .bind(id)
        .bind(&s.device)
        .bind(Utc::now().naive_utc())
        .execute(conn)
        .await
        .context("inserting session")?;
    Ok(Some(AuthToken(token)))
}

pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() > 0)
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let row = sqlx::query("SELECT user_id FROM sessions WHERE token = $1")
        .bind(token.0)
        .fetch_optional(conn)
        .await
        .context("querying sessions table")?;
    match row {
        Some(r) => Ok(UserId(
            r.try_get("user_id")
                .context("retrieving the user_id field")?,
        )),
        None => Err(Error::permission_denied()),
    }
}

pub async fn fetch_users(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<User>> {
    let rows = sqlx::query("SELECT id, name, avatar FROM users ORDER BY name")
        .fetch_all(conn)
        .await
        .context("querying users table")?;
    rows.into_iter()
        .map(|u| {
            Ok(User {
                id: UserId(u.try_get("id").context("retrieving the id field")?),
                name: u.try_get("name").context("retrieving the name field")?,
                avatar: u.try_get("avatar").context("retrieving the avatar field")?,
            })
        })
        .collect()
}

pub async fn fetch_posts(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Post>> {
    let rows = sqlx::query("SELECT id, author_id, date, title FROM posts ORDER BY date")
        .fetch_all(conn)
        .await
        .context("querying posts table")?;
    rows.into_iter()
        .map(|p| {
            Ok(Post {
                id: PostId(p.try_get("id").context("retrieving the id field")?),
                author_id: UserId(
                    p.try_get("author_id")
                        .context("retrieving the author_id field")?,
                ),
                date: p
                    .try_get::<chrono::NaiveDateTime, _>("date")
                    .context("retrieving the date field")?
                    .and_local_timezone(Utc)
                    .unwrap(),
                title: p.try_get("title").context("retrieving the title field")?,
            })
        })
        .collect()
}

pub async fn post_exists(conn: &mut sqlx::PgConnection, post: PostId) -> anyhow::Result<bool> {
    Ok(sqlx::query("SELECT id FROM posts WHERE id = $1")
        .bind(post.0)
        .fetch_optional(conn)
        .await
        .context("querying posts table")?
        .is_some())
}

fn comment_info_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<CommentInfo> {
    Ok(CommentInfo {
        author_id: UserId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        post_id: PostId(
            row.try_get("post_id")
                .context("retrieving the post_id field")?,
        ),
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .context("retrieving the created_at field")?
            .and_local_timezone(Utc)
            .unwrap(),
        is_active: row
            .try_get("is_active")
            .context("retrieving the is_active field")?,
    })
}

pub async fn comment_info(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<Option<CommentInfo>> {
    let row = sqlx::query(
        "SELECT author_id, post_id, created_at, is_active FROM comments WHERE id = $1",
    )
    .bind(comment.0)
    .fetch_optional(conn)
    .await
    .context("querying comments table")?;
    row.as_ref().map(comment_info_from_row).transpose()
}

/// Fetches one whole thread flat; nesting and redaction are the client's
/// business. Vote sets ride along so tallies can be computed locally.
pub async fn fetch_thread(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> Result<Vec<Comment>, Error> {
    if !post_exists(&mut *conn, post)
        .await
        .context("checking post existence")?
    {
        return Err(Error::not_found(post.0));
    }
    let rows = sqlx::query(
        "
            SELECT id, author_id, parent_id, content, created_at, updated_at,
                   is_edited, is_active, is_pinned, is_flagged
                FROM comments
            WHERE post_id = $1
        ",
    )
    .bind(post.0)
    .fetch_all(&mut *conn)
    .await
    .context("querying comments table")?;

    let mut comments = HashMap::with_capacity(rows.len());
    for c in rows {
        let id = CommentId(c.try_get("id").context("retrieving the id field")?);
        let created_at = c
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .context("retrieving the created_at field")?
            .and_local_timezone(Utc)
            .unwrap();
        let updated_at = c
            .try_get::<chrono::NaiveDateTime, _>("updated_at")
            .context("retrieving the updated_at field")?
            .and_local_timezone(Utc)
            .unwrap();
        comments.insert(
            id,
            Comment {
                id,
                post_id: post,
                author_id: UserId(
                    c.try_get("author_id")
                        .context("retrieving the author_id field")?,
                ),
                parent_id: c
                    .try_get::<Option<Uuid>, _>("parent_id")
                    .context("retrieving the parent_id field")?
                    .map(CommentId),
                content: c
                    .try_get("content")
                    .context("retrieving the content field")?,
                created_at,
                updated_at,
                is_edited: c
                    .try_get("is_edited")
                    .context("retrieving the is_edited field")?,
                is_active: c
                    .try_get("is_active")
                    .context("retrieving the is_active field")?,
                is_pinned: c
                    .try_get("is_pinned")
                    .context("retrieving the is_pinned field")?,
                is_flagged: c
                    .try_get("is_flagged")
                    .context("retrieving the is_flagged field")?,
                up_voters: Default::default(),
                down_voters: Default::default(),
            },
        );
    }

    let votes = sqlx::query(
        "
            SELECT v.comment_id, v.user_id, v.is_upvote
                FROM comment_votes v
            INNER JOIN comments c
                ON c.id = v.comment_id
            WHERE c.post_id = $1
        ",
    )
    .bind(post.0)
    .fetch_all(conn)
    .await
    .context("querying comment_votes table")?;
    for v in votes {
        let comment = CommentId(
            v.try_get("comment_id")
                .context("retrieving the comment_id field")?,
        );
        if let Some(c) = comments.get_mut(&comment) {
            let user = UserId(
                v.try_get("user_id")
                    .context("retrieving the user_id field")?,
            );
            match v
                .try_get("is_upvote")
                .context("retrieving the is_upvote field")?
            {
                true => c.up_voters.insert(user),
                false => c.down_voters.insert(user),
            };
        }
    }

    Ok(comments.into_values().collect())
}

/// Fetches one comment with its vote sets; what a mutation hands back as
/// the updated node.
pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> Result<Comment, Error> {
    let row = sqlx::query(
        "
            SELECT post_id, author_id, parent_id, content, created_at, updated_at,
                   is_edited, is_active, is_pinned, is_flagged
                FROM comments
            WHERE id = $1
        ",
    )
    .bind(comment.0)
    .fetch_optional(&mut *conn)
    .await
    .context("querying comments table")?
    .ok_or(Error::not_found(comment.0))?;

    let mut c = Comment {
        id: comment,
        post_id: PostId(
            row.try_get("post_id")
                .context("retrieving the post_id field")?,
        ),
        author_id: UserId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        parent_id: row
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        content: row
            .try_get("content")
            .context("retrieving the content field")?,
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .context("retrieving the created_at field")?
            .and_local_timezone(Utc)
            .unwrap(),
        updated_at: row
            .try_get::<chrono::NaiveDateTime, _>("updated_at")
            .context("retrieving the updated_at field")?
            .and_local_timezone(Utc)
            .unwrap(),
        is_edited: row
            .try_get("is_edited")
            .context("retrieving the is_edited field")?,
        is_active: row
            .try_get("is_active")
            .context("retrieving the is_active field")?,
        is_pinned: row
            .try_get("is_pinned")
            .context("retrieving the is_pinned field")?,
        is_flagged: row
            .try_get("is_flagged")
            .context("retrieving the is_flagged field")?,
        up_voters: Default::default(),
        down_voters: Default::default(),
    };

    let votes = sqlx::query("SELECT user_id, is_upvote FROM comment_votes WHERE comment_id = $1")
        .bind(comment.0)
        .fetch_all(conn)
        .await
        .context("querying comment_votes table")?;
    for v in votes {
        let user = UserId(
            v.try_get("user_id")
                .context("retrieving the user_id field")?,
        );
        match v
            .try_get("is_upvote")
            .context("retrieving the is_upvote field")?
        {
            true => c.up_voters.insert(user),
            false => c.down_voters.insert(user),
        };
    }
    Ok(c)
}

pub async fn fetch_tally(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
    for_user: UserId,
) -> anyhow::Result<VoteTally> {
    let rows = sqlx::query("SELECT user_id, is_upvote FROM comment_votes WHERE comment_id = $1")
        .bind(comment.0)
        .fetch_all(conn)
        .await
        .context("querying comment_votes table")?;
    let mut tally = VoteTally {
        upvotes: 0,
        downvotes: 0,
        my_vote: None,
    };
    for v in rows {
        let user = UserId(
            v.try_get("user_id")
                .context("retrieving the user_id field")?,
        );
        let up: bool = v
            .try_get("is_upvote")
            .context("retrieving the is_upvote field")?;
        match up {
            true => tally.upvotes += 1,
            false => tally.downvotes += 1,
        }
        if user == for_user {
            tally.my_vote = Some(match up {
                true => VoteDirection::Up,
                false => VoteDirection::Down,
            });
        }
    }
    Ok(tally)
}

/// The authorization collaborator, backed by the submitting transaction.
///
/// `comment_info` takes a `FOR UPDATE` lock on the comment it resolves, so
/// concurrent structural changes around the same node serialize on that row
/// for the rest of the transaction.
pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
    pub user: UserId,
}

#[async_trait::async_trait]
impl<'a> Db for PostgresDb<'a> {
    fn current_user(&self) -> UserId {
        self.user
    }

    async fn post_exists(&mut self, p: PostId) -> anyhow::Result<bool> {
        post_exists(&mut *self.conn, p).await
    }

    async fn comment_info(&mut self, c: CommentId) -> anyhow::Result<Option<CommentInfo>> {
        let row = sqlx::query(
            "
                SELECT author_id, post_id, created_at, is_active
                    FROM comments
                WHERE id = $1
                FOR UPDATE
            ",
        )
        .bind(c.0)
        .fetch_optional(&mut *self.conn)
        .await
        .context("querying comments table")?;
        row.as_ref().map(comment_info_from_row).transpose()
    }

    async fn can_moderate(&mut self, user: UserId, p: PostId) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT author_id FROM posts WHERE id = $1")
            .bind(p.0)
            .fetch_optional(&mut *self.conn)
            .await
            .context("querying posts table")?;
        match row {
            Some(r) => Ok(UserId(
                r.try_get("author_id")
                    .context("retrieving the author_id field")?,
            ) == user),
            None => Ok(false),
        }
    }
}

/// Shared write path: validate, then check and apply inside one transaction.
///
/// A structural conflict is retried once; by then the competing transaction
/// has committed, so the second attempt gives a clean success or a real
/// refusal.
pub async fn submit(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    a: &Action,
) -> Result<(), Error> {
    a.validate()?;
    match try_submit(&mut *conn, user, a).await {
        Err(Error::Api(ApiError::StructuralConflict(_))) => try_submit(conn, user, a).await,
        res => res,
    }
}

async fn try_submit(conn: &mut sqlx::PgConnection, user: UserId, a: &Action) -> Result<(), Error> {
    use sqlx::Connection;
    let mut tx = conn.begin().await.context("starting transaction")?;
    {
        let mut db = PostgresDb {
            conn: &mut *tx,
            user,
        };
        match a.check(&mut db).await.context("checking action")? {
            Ok(()) => (),
            Err(e) => return Err(Error::Api(e)),
        }
    }
    apply_action(&mut *tx, a).await?;
    match tx.commit().await {
        Ok(()) => Ok(()),
        Err(e) => Err(translate_commit_error(e, a)),
    }
}

async fn apply_action(conn: &mut sqlx::PgConnection, a: &Action) -> Result<(), Error> {
    match a {
        // users only ever come in through the admin endpoint, which does not
        // go through here; check() refused this one already
        Action::NewUser(_) => Err(Error::permission_denied()),
        Action::NewPost(p) => {
            let res = sqlx::query("INSERT INTO posts (id, author_id, date, title) VALUES ($1, $2, $3, $4)")
                .bind(p.id.0)
                .bind(p.author_id.0)
                .bind(p.date.naive_utc())
                .bind(&p.title)
                .execute(conn)
                .await;
            translate_insert(res, p.id.0, "posts")
        }
        Action::NewComment(c) => {
            // the parent row, if any, is already locked by the check
            let res = sqlx::query(
                "
                    INSERT INTO comments
                        (id, post_id, author_id, parent_id, content, created_at,
                         updated_at, is_edited, is_active, is_pinned, is_flagged)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(c.id.0)
            .bind(c.post_id.0)
            .bind(c.author_id.0)
            .bind(c.parent_id.map(|p| p.0))
            .bind(&c.content)
            .bind(c.created_at.naive_utc())
            .bind(c.updated_at.naive_utc())
            .bind(c.is_edited)
            .bind(c.is_active)
            .bind(c.is_pinned)
            .bind(c.is_flagged)
            .execute(conn)
            .await;
            translate_insert(res, c.id.0, "comments")
        }
        Action::EditComment(e) => {
            let res = sqlx::query(
                "UPDATE comments SET content = $2, updated_at = $3, is_edited = true WHERE id = $1",
            )
            .bind(e.comment_id.0)
            .bind(&e.content)
            .bind(e.date.naive_utc())
            .execute(conn)
            .await
            .context("updating comment content")?;
            expect_one_row(res, e.comment_id.0, "content update")
        }
        Action::DeleteComment(d) => {
            // soft-delete: the row stays so the subtree below keeps its anchor
            let res = sqlx::query("UPDATE comments SET is_active = false WHERE id = $1")
                .bind(d.comment_id.0)
                .execute(conn)
                .await
                .context("soft-deleting comment")?;
            expect_one_row(res, d.comment_id.0, "soft-delete")
        }
        Action::Vote(v) => {
            let existing = sqlx::query(
                "SELECT is_upvote FROM comment_votes WHERE comment_id = $1 AND user_id = $2",
            )
            .bind(v.comment_id.0)
            .bind(v.user_id.0)
            .fetch_optional(&mut *conn)
            .await
            .context("querying comment_votes table")?;
            let up = v.direction == VoteDirection::Up;
            match existing {
                None => {
                    sqlx::query(
                        "INSERT INTO comment_votes (comment_id, user_id, is_upvote) VALUES ($1, $2, $3)",
                    )
                    .bind(v.comment_id.0)
                    .bind(v.user_id.0)
                    .bind(up)
                    .execute(conn)
                    .await
                    .context("inserting vote")?;
                }
                Some(row) => {
                    let was_up: bool = row
                        .try_get("is_upvote")
                        .context("retrieving the is_upvote field")?;
                    if was_up == up {
                        // voting the held direction again retracts the vote
                        sqlx::query(
                            "DELETE FROM comment_votes WHERE comment_id = $1 AND user_id = $2",
                        )
                        .bind(v.comment_id.0)
                        .bind(v.user_id.0)
                        .execute(conn)
                        .await
                        .context("retracting vote")?;
                    } else {
                        sqlx::query(
                            "UPDATE comment_votes SET is_upvote = $3 WHERE comment_id = $1 AND user_id = $2",
                        )
                        .bind(v.comment_id.0)
                        .bind(v.user_id.0)
                        .bind(up)
                        .execute(conn)
                        .await
                        .context("moving vote")?;
                    }
                }
            }
            Ok(())
        }
    }
}

fn translate_insert(
    res: Result<sqlx::postgres::PgQueryResult, sqlx::Error>,
    uuid: Uuid,
    table: &str,
) -> Result<(), Error> {
    match res {
        Ok(r) => expect_one_row(r, uuid, table),
        Err(sqlx::Error::Database(err)) if err.code().as_deref() == Some("23505") => {
            Err(Error::uuid_already_used(uuid))
        }
        Err(e) => Err(Error::Anyhow(
            anyhow::Error::from(e).context(format!("inserting into {table}")),
        )),
    }
}

fn expect_one_row(res: sqlx::postgres::PgQueryResult, uuid: Uuid, what: &str) -> Result<(), Error> {
    match res.rows_affected() {
        1 => Ok(()),
        n => Err(Error::Anyhow(anyhow::anyhow!(
            "{what} for {uuid} affected {n} rows"
        ))),
    }
}

fn translate_commit_error(e: sqlx::Error, a: &Action) -> Error {
    if let sqlx::Error::Database(err) = &e {
        // 40001 is a postgres serialization failure; surface it as the
        // retryable conflict it is
        if err.code().as_deref() == Some("40001") {
            return Error::Api(ApiError::StructuralConflict(action_target(a)));
        }
    }
    Error::Anyhow(anyhow::Error::from(e).context("committing transaction"))
}

fn action_target(a: &Action) -> Uuid {
    match a {
        Action::NewUser(u) => u.id.0,
        Action::NewPost(p) => p.id.0,
        Action::NewComment(c) => c.id.0,
        Action::EditComment(e) => e.comment_id.0,
        Action::DeleteComment(d) => d.comment_id.0,
        Action::Vote(v) => v.comment_id.0,
    }
}
