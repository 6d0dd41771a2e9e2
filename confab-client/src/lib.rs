mod comment;
pub use comment::{CommentNode, Walk, REDACTED_CONTENT};

mod db;
pub use db::{DbDump, UserCard};

mod thread;
pub use thread::ThreadView;

pub mod api {
    pub use confab_api::*;
}
