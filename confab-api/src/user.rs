use uuid::Uuid;

use crate::{Error, STUB_UUID};

pub const MAX_NAME_LEN: usize = 64;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,

    /// Opaque key into avatar storage; resolving it to a displayable URL is
    /// the frontend's concern, with a default avatar as fallback
    pub avatar: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub initial_password_hash: String,
}

impl NewUser {
    pub fn new(id: UserId, name: String, password: String) -> NewUser {
        NewUser {
            id,
            name,
            initial_password_hash: bcrypt::hash(&password, bcrypt::DEFAULT_COST)
                .expect("failed hashing password"),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.initial_password_hash)?;
        validate_name(&self.name)
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), Error> {
    crate::validate_string(name)?;
    if name.trim().is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(String::from(name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert_eq!(validate_name("alice"), Ok(()));
        assert_eq!(
            validate_name("   "),
            Err(Error::InvalidName(String::from("   ")))
        );
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert_eq!(validate_name(&long), Err(Error::InvalidName(long.clone())));
    }
}
