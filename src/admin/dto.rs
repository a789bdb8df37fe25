use serde::Serialize;

use crate::auth::services::PublicUser;

/// One row of the admin user table.
#[derive(Debug, Serialize)]
pub struct AdminUserView {
    #[serde(flatten)]
    pub user: PublicUser,
    pub item_count: usize,
}
