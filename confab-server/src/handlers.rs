use anyhow::Context;
use axum::{
    extract::{ws::Message, Path, State, WebSocketUpgrade},
    Json,
};
use chrono::Utc;
use confab_api::{
    Action, AuthToken, Comment, CommentDelete, CommentEdit, CommentId, CommentVote, EditContent,
    NewComment, NewPost, NewReply, NewSession, NewUser, NewVote, Post, PostId, User, UserId, Uuid,
    VoteTally,
};
use futures::StreamExt;

use crate::{db, extractors::*, Error, LiveFeeds};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    State(feeds): State<LiveFeeds>,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data.clone()).await?;
    feeds
        .relay_action(Action::NewUser(User {
            id: data.id,
            name: data.name,
            avatar: None,
        }))
        .await;
    Ok(())
}

pub async fn auth(
    mut conn: PgConn,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or(Error::permission_denied())?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user)
}

pub async fn fetch_users(Auth(user): Auth, mut conn: PgConn) -> Result<Json<Vec<User>>, Error> {
    Ok(Json(db::fetch_users(&mut *conn).await.with_context(
        || format!("fetching user list for {:?}", user),
    )?))
}

pub async fn fetch_posts(Auth(user): Auth, mut conn: PgConn) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(db::fetch_posts(&mut *conn).await.with_context(
        || format!("fetching post list for {:?}", user),
    )?))
}

pub async fn create_post(
    Auth(user): Auth,
    State(feeds): State<LiveFeeds>,
    mut conn: PgConn,
    Json(data): Json<NewPost>,
) -> Result<Json<Post>, Error> {
    let post = data.into_post(user);
    let a = Action::NewPost(post.clone());
    db::submit(&mut *conn, user, &a).await?;
    feeds.relay_action(a).await;
    Ok(Json(post))
}

/// The thread comes back flat; nesting, ordering and redaction happen
/// client-side from `parent_id` and `is_active`.
pub async fn fetch_thread(
    Auth(_user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(db::fetch_thread(&mut *conn, PostId(post)).await?))
}

pub async fn create_comment(
    Auth(user): Auth,
    State(feeds): State<LiveFeeds>,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    let comment = Comment::now(data.id, PostId(post), user, None, data.content);
    let a = Action::NewComment(comment.clone());
    db::submit(&mut *conn, user, &a).await?;
    feeds.relay_action(a).await;
    Ok(Json(comment))
}

pub async fn create_reply(
    Auth(user): Auth,
    State(feeds): State<LiveFeeds>,
    mut conn: PgConn,
    Path(parent): Path<Uuid>,
    Json(data): Json<NewReply>,
) -> Result<Json<Comment>, Error> {
    let parent = CommentId(parent);
    // the post is inherited from the parent, never chosen by the caller
    let info = db::comment_info(&mut *conn, parent)
        .await
        .context("fetching parent comment")?
        .ok_or(Error::not_found(parent.0))?;
    let comment = Comment::now(data.id, info.post_id, user, Some(parent), data.content);
    let a = Action::NewComment(comment.clone());
    db::submit(&mut *conn, user, &a).await?;
    feeds.relay_action(a).await;
    Ok(Json(comment))
}

pub async fn edit_comment(
    Auth(user): Auth,
    State(feeds): State<LiveFeeds>,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(data): Json<EditContent>,
) -> Result<Json<Comment>, Error> {
    let comment = CommentId(comment);
    let a = Action::EditComment(CommentEdit {
        comment_id: comment,
        author_id: user,
        content: data.content,
        date: Utc::now(),
    });
    db::submit(&mut *conn, user, &a).await?;
    let updated = db::fetch_comment(&mut *conn, comment).await?;
    feeds.relay_action(a).await;
    Ok(Json(updated))
}

pub async fn delete_comment(
    Auth(user): Auth,
    State(feeds): State<LiveFeeds>,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
) -> Result<(), Error> {
    let a = Action::DeleteComment(CommentDelete {
        comment_id: CommentId(comment),
        requester_id: user,
        date: Utc::now(),
    });
    db::submit(&mut *conn, user, &a).await?;
    feeds.relay_action(a).await;
    Ok(())
}

pub async fn vote(
    Auth(user): Auth,
    State(feeds): State<LiveFeeds>,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(data): Json<NewVote>,
) -> Result<Json<VoteTally>, Error> {
    let comment = CommentId(comment);
    let a = Action::Vote(CommentVote {
        comment_id: comment,
        user_id: user,
        direction: data.direction,
        date: Utc::now(),
    });
    db::submit(&mut *conn, user, &a).await?;
    let tally = db::fetch_tally(&mut *conn, comment, user)
        .await
        .context("fetching vote tally")?;
    feeds.relay_action(a).await;
    Ok(Json(tally))
}

pub async fn action_feed(
    ws: WebSocketUpgrade,
    State(db): State<PgPool>,
    State(feeds): State<LiveFeeds>,
) -> Result<axum::response::Response, Error> {
    Ok(ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        action_feed_impl(write, read, db, feeds)
    }))
}

pub async fn action_feed_impl<W, R>(mut write: W, mut read: R, db: PgPool, feeds: LiveFeeds)
where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    use futures::SinkExt;
    tracing::debug!("action feed websocket connected");
    if let Some(Ok(Message::Text(token))) = read.next().await {
        if let Ok(token) = Uuid::try_from(&token as &str) {
            if let Ok(mut conn) = db.acquire().await {
                if let Ok(user) = db::recover_session(&mut *conn, AuthToken(token)).await {
                    if let Ok(_) = write.send(Message::Text(String::from("ok"))).await {
                        tracing::debug!(?user, "action feed websocket auth success");
                        feeds.add_socket(write, read).await;
                        return;
                    }
                }
            }
        }
        tracing::debug!(?token, "action feed websocket auth failure");
        let _ = write
            .send(Message::Text(String::from("permission denied")))
            .await;
    }
}
