use anyhow::Context;
use confab_api::{
    AuthToken, Comment, CommentId, EditContent, Error as ApiError, NewComment, NewPost, NewReply,
    NewSession, NewUser, NewVote, Post, PostId, User, UserId, Uuid, VoteDirection, VoteTally,
};
use confab_client::DbDump;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Server base url, eg. http://localhost:3000
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user (needs the ADMIN_TOKEN environment variable)
    CreateUser {
        /// Username
        name: String,

        /// Initial password
        initial_password: String,
    },

    /// Log in and print the session token
    Login {
        /// Username
        user: String,

        /// Password
        password: String,
    },

    /// Log the current session out
    Logout,

    /// Create a post
    CreatePost {
        /// Post title
        title: String,
    },

    /// List all posts
    ListPosts,

    /// Show the comment tree of a post
    ShowThread {
        /// Post id
        post: Uuid,
    },

    /// Comment at the top level of a post
    Comment {
        /// Post id
        post: Uuid,

        /// Comment text
        content: String,
    },

    /// Reply below an existing comment
    Reply {
        /// Parent comment id
        parent: Uuid,

        /// Reply text
        content: String,
    },

    /// Edit one of your comments
    Edit {
        /// Comment id
        comment: Uuid,

        /// New text
        content: String,
    },

    /// Delete a comment: yours, or anyone's on a post you authored
    Delete {
        /// Comment id
        comment: Uuid,
    },

    /// Upvote a comment; upvoting again retracts the vote
    Upvote {
        /// Comment id
        comment: Uuid,
    },

    /// Downvote a comment; downvoting again retracts the vote
    Downvote {
        /// Comment id
        comment: Uuid,
    },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

fn session_token() -> anyhow::Result<AuthToken> {
    let tok = std::env::var("CONFAB_TOKEN")
        .context("retrieving CONFAB_TOKEN environment variable, log in first")?;
    let tok = Uuid::try_parse(&tok).context("parsing CONFAB_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

/// Decodes a response, turning the server's typed error bodies back into the
/// errors they started as.
async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    let body = resp.bytes().await.context("reading response body")?;
    if status.is_success() {
        serde_json::from_slice(&body).context("parsing response body")
    } else {
        Err(ApiError::parse(&body)
            .unwrap_or_else(|_| ApiError::Unknown(format!("HTTP {status}")))
            .into())
    }
}

async fn expect_ok(resp: reqwest::Response) -> anyhow::Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.bytes().await.context("reading response body")?;
    Err(ApiError::parse(&body)
        .unwrap_or_else(|_| ApiError::Unknown(format!("HTTP {status}")))
        .into())
}

fn show_tally(t: &VoteTally) -> String {
    let mine = match t.my_vote {
        Some(VoteDirection::Up) => ", including yours up",
        Some(VoteDirection::Down) => ", including yours down",
        None => "",
    };
    format!("+{} -{}{mine}", t.upvotes, t.downvotes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();

    match opt.cmd {
        Command::CreateUser {
            name,
            initial_password,
        } => {
            let user = NewUser::new(UserId(Uuid::new_v4()), name, initial_password);
            expect_ok(
                client
                    .post(format!("{}/api/admin/create-user", opt.host))
                    .json(&user)
                    .bearer_auth(admin_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("created user {}", user.id.0);
        }

        Command::Login { user, password } => {
            let tok: AuthToken = parse(
                client
                    .post(format!("{}/api/auth", opt.host))
                    .json(&NewSession::new(user, password, whoami::devicename()))
                    .send()
                    .await?,
            )
            .await?;
            println!("export CONFAB_TOKEN={}", tok.0);
        }

        Command::Logout => {
            expect_ok(
                client
                    .post(format!("{}/api/unauth", opt.host))
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
        }

        Command::CreatePost { title } => {
            let post: Post = parse(
                client
                    .post(format!("{}/api/posts", opt.host))
                    .json(&NewPost {
                        id: PostId(Uuid::new_v4()),
                        title,
                    })
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("created post {}", post.id.0);
        }

        Command::ListPosts => {
            let posts: Vec<Post> = parse(
                client
                    .get(format!("{}/api/posts", opt.host))
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            for p in posts {
                println!("{}  {}  {}", p.id.0, p.date.format("%Y-%m-%d %H:%M"), p.title);
            }
        }

        Command::ShowThread { post } => {
            let tok = session_token()?;
            let me: UserId = parse(
                client
                    .get(format!("{}/api/whoami", opt.host))
                    .bearer_auth(tok.0)
                    .send()
                    .await?,
            )
            .await?;
            let users: Vec<User> = parse(
                client
                    .get(format!("{}/api/users", opt.host))
                    .bearer_auth(tok.0)
                    .send()
                    .await?,
            )
            .await?;
            let posts: Vec<Post> = parse(
                client
                    .get(format!("{}/api/posts", opt.host))
                    .bearer_auth(tok.0)
                    .send()
                    .await?,
            )
            .await?;
            let comments: Vec<Comment> = parse(
                client
                    .get(format!("{}/api/posts/{}/comments", opt.host, post))
                    .bearer_auth(tok.0)
                    .send()
                    .await?,
            )
            .await?;

            let mut db = DbDump::stub();
            db.owner = me;
            db.add_users(users);
            db.add_posts(posts);
            db.add_comments(comments);

            let post = PostId(post);
            if let Some(p) = db.posts.get(&post) {
                let author = db.user_card(&p.author_id);
                println!("# {} (by {})", p.title, author.name);
            }
            for (depth, node) in db.thread_view(post).walk() {
                let author = db.user_card(&node.author_id);
                let indent = "    ".repeat(depth);
                let edited = if node.is_edited { " (edited)" } else { "" };
                println!(
                    "{indent}{} [{}] {}{edited}",
                    author.name,
                    show_tally(&VoteTally {
                        upvotes: node.upvotes,
                        downvotes: node.downvotes,
                        my_vote: node.my_vote,
                    }),
                    node.created_at.format("%Y-%m-%d %H:%M"),
                );
                for line in node.content.lines() {
                    println!("{indent}  {line}");
                }
            }
        }

        Command::Comment { post, content } => {
            let comment: Comment = parse(
                client
                    .post(format!("{}/api/posts/{}/comments", opt.host, post))
                    .json(&NewComment {
                        id: CommentId(Uuid::new_v4()),
                        content,
                    })
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("created comment {}", comment.id.0);
        }

        Command::Reply { parent, content } => {
            let comment: Comment = parse(
                client
                    .post(format!("{}/api/comments/{}/replies", opt.host, parent))
                    .json(&NewReply {
                        id: CommentId(Uuid::new_v4()),
                        content,
                    })
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("created comment {}", comment.id.0);
        }

        Command::Edit { comment, content } => {
            expect_ok(
                client
                    .put(format!("{}/api/comments/{}", opt.host, comment))
                    .json(&EditContent { content })
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("edited comment {comment}");
        }

        Command::Delete { comment } => {
            expect_ok(
                client
                    .delete(format!("{}/api/comments/{}", opt.host, comment))
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("deleted comment {comment}");
        }

        Command::Upvote { comment } => {
            let tally: VoteTally = parse(
                client
                    .post(format!("{}/api/comments/{}/vote", opt.host, comment))
                    .json(&NewVote {
                        direction: VoteDirection::Up,
                    })
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("{}", show_tally(&tally));
        }

        Command::Downvote { comment } => {
            let tally: VoteTally = parse(
                client
                    .post(format!("{}/api/comments/{}/vote", opt.host, comment))
                    .json(&NewVote {
                        direction: VoteDirection::Down,
                    })
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("{}", show_tally(&tally));
        }
    }

    Ok(())
}
