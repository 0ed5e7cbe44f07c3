use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentUserResponse {
    pub user_id: String,
    pub username: String,
}
