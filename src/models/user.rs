use serde::{Deserialize, Serialize};

/// A stored account. `password` holds the bcrypt hash.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub password: String,
}

/// The acting user for a request, as resolved from its bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Identity { id: id.into(), display_name: display_name.into() }
    }
}

pub fn user_id_of(identity: Option<&Identity>) -> Option<&str> {
    identity.map(|i| i.id.as_str())
}
