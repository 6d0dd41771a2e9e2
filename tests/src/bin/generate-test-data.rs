use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

const NUM_USERS: usize = 3;
const NUM_POSTS: usize = 5;
const NUM_COMMENTS: usize = 200;
const NUM_VOTES: usize = 300;

const COMMENT_WORD_COUNT: usize = 25;

/// Every generated user logs in with this password.
const PASSWORD: &str = "hunter2";

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn sql_date(d: &DateTime<Utc>) -> String {
    d.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn main() {
    let now = Utc::now();

    // hash once, all seed users share the password anyway
    let password_hash =
        bcrypt::hash(PASSWORD, bcrypt::DEFAULT_COST).expect("failed hashing password");

    println!("-- seed data; every user's password is {PASSWORD:?}");

    let mut users = Vec::new();
    gen_n_items("users (id, name, password)", NUM_USERS, |i| {
        let uuid = Uuid::new_v4();
        users.push(uuid);
        format!("('{}', 'user{}', '{}')", uuid, i, password_hash)
    });
    let gen_user = |users: &[Uuid]| users[rand::thread_rng().gen_range(0..users.len())];

    let mut posts = Vec::new();
    gen_n_items("posts", NUM_POSTS, |_| {
        let uuid = Uuid::new_v4();
        let date = now - Duration::days(rand::thread_rng().gen_range(30..365));
        posts.push((uuid, date));
        format!(
            "('{}', '{}', '{}', '{}')",
            uuid,
            gen_user(&users),
            sql_date(&date),
            lipsum::lipsum_title(),
        )
    });

    // Comments are generated oldest-first, and a child always gets a date
    // strictly after its parent's, so the seed satisfies the same ordering
    // the server enforces on live inserts.
    let mut comments: Vec<(Uuid, Uuid, DateTime<Utc>)> = Vec::new();
    gen_n_items(
        "comments (id, post_id, author_id, parent_id, content, created_at, updated_at)",
        NUM_COMMENTS,
        |_| {
            let mut rng = rand::thread_rng();
            let uuid = Uuid::new_v4();
            let reply = !comments.is_empty() && rng.gen_range(0..10) < 7;
            let (post, parent, date) = if reply {
                let (parent, post, parent_date) = comments[rng.gen_range(0..comments.len())];
                let date = parent_date + Duration::seconds(rng.gen_range(1..86_400));
                (post, Some(parent), date)
            } else {
                let (post, post_date) = posts[rng.gen_range(0..posts.len())];
                let date = post_date + Duration::seconds(rng.gen_range(1..86_400));
                (post, None, date)
            };
            comments.push((uuid, post, date));
            format!(
                "('{}', '{}', '{}', {}, '{}', '{}', '{}')",
                uuid,
                post,
                gen_user(&users),
                match parent {
                    Some(p) => format!("'{}'", p),
                    None => String::from("NULL"),
                },
                lipsum::lipsum(COMMENT_WORD_COUNT),
                sql_date(&date),
                sql_date(&date),
            )
        },
    );

    gen_n_items("comment_votes", NUM_VOTES, |_| {
        let mut rng = rand::thread_rng();
        let (comment, _, _) = comments[rng.gen_range(0..comments.len())];
        format!("('{}', '{}', {})", comment, gen_user(&users), rng.gen_bool(0.7))
    });
}
