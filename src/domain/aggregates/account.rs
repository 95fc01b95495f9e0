//! Account and Profile

use serde::{Deserialize, Serialize};
use crate::domain::aggregates::product::Image;

#[derive(Clone, PartialEq, Eq)]
pub struct Account { pub id: i64, pub username: String, pub first_name: String, pub password_hash: String }

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").field("id", &self.id).field("username", &self.username).finish_non_exhaustive()
    }
}

/// One profile per account, created together with it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(skip)]
    pub account: i64,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<Image>,
}

impl Profile {
    pub fn for_account(account: &Account) -> Self {
        Self { account: account.id, full_name: account.first_name.clone(), ..Self::default() }
    }
}
