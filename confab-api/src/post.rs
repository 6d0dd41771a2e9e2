use chrono::Utc;
use uuid::Uuid;

use crate::{Error, Time, UserId, STUB_UUID};

pub const MAX_TITLE_LEN: usize = 300;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

/// A post is only the anchor a comment thread hangs off of; its body lives
/// with whatever system renders it and is not our concern here.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub date: Time,
    pub title: String,
}

impl Post {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_time(&self.date)?;
        crate::validate_string(&self.title)?;
        if self.title.trim().is_empty() || self.title.len() > MAX_TITLE_LEN {
            return Err(Error::InvalidName(self.title.clone()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub id: PostId,
    pub title: String,
}

impl NewPost {
    pub fn into_post(self, author_id: UserId) -> Post {
        Post {
            id: self.id,
            author_id,
            date: Utc::now(),
            title: self.title,
        }
    }
}
