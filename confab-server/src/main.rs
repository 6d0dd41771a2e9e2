use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use confab_api::{AuthToken, Uuid};
use structopt::StructOpt;

mod db;
mod error;
mod extractors;
mod feeds;
mod fuzz;
mod handlers;

pub use error::Error;
pub use extractors::*;
pub use feeds::LiveFeeds;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(
    name = "confab-server",
    about = "REST and websocket server for threaded comment forums"
)]
struct Opt {
    /// Address to listen on
    #[structopt(long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let admin_token = match std::env::var("ADMIN_TOKEN") {
        Ok(t) => Some(AuthToken(
            Uuid::try_from(&t as &str).context("parsing ADMIN_TOKEN")?,
        )),
        Err(std::env::VarError::NotPresent) => None,
        Err(e) => return Err(e).context("reading ADMIN_TOKEN"),
    };

    let db = create_sqlx_pool(&db_url).await?;
    MIGRATOR
        .run(&mut *db.acquire().await?)
        .await
        .context("applying pending migrations")?;

    let app = app(db, admin_token).await;
    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .with_context(|| format!("opening database {db_url:?}"))?,
    ))
}

pub async fn app(db: PgPool, admin_token: Option<AuthToken>) -> Router {
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/users", get(handlers::fetch_users))
        .route(
            "/api/posts",
            get(handlers::fetch_posts).post(handlers::create_post),
        )
        .route(
            "/api/posts/:post/comments",
            get(handlers::fetch_thread).post(handlers::create_comment),
        )
        .route("/api/comments/:comment/replies", post(handlers::create_reply))
        .route(
            "/api/comments/:comment",
            put(handlers::edit_comment).delete(handlers::delete_comment),
        )
        .route("/api/comments/:comment/vote", post(handlers::vote))
        .route("/api/feed", get(handlers::action_feed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AppState {
            db,
            feeds: LiveFeeds::new(),
            admin_token,
        })
}
