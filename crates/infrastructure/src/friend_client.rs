//! 好友服务HTTP客户端
//!
//! 在线状态扇出之前需要知道一个用户的好友有哪些，好友关系由
//! 独立的社交服务维护，这里通过HTTP查询。调用方负责超时控制。

use application::{ApplicationError, FriendDirectory};
use async_trait::async_trait;
use domain::UserId;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct FriendListResponse {
    friends: Vec<Uuid>,
}

pub struct HttpFriendDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFriendDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn friends_url(&self, user_id: UserId) -> String {
        format!(
            "{}/api/users/{}/friends",
            self.base_url.trim_end_matches('/'),
            user_id
        )
    }
}

#[async_trait]
impl FriendDirectory for HttpFriendDirectory {
    async fn friends_of(&self, user_id: UserId) -> Result<Vec<UserId>, ApplicationError> {
        let response = self
            .client
            .get(self.friends_url(user_id))
            .send()
            .await
            .map_err(|err| {
                ApplicationError::infrastructure_with_source("好友服务请求失败", err)
            })?;

        let response = response.error_for_status().map_err(|err| {
            ApplicationError::infrastructure_with_source("好友服务返回错误状态", err)
        })?;

        let body: FriendListResponse = response.json().await.map_err(|err| {
            ApplicationError::infrastructure_with_source("好友服务响应解析失败", err)
        })?;

        Ok(body.friends.into_iter().map(UserId::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friends_url_is_well_formed() {
        let directory = HttpFriendDirectory::new("http://social-svc:8080/");
        let user_id = UserId::from(Uuid::nil());
        assert_eq!(
            directory.friends_url(user_id),
            "http://social-svc:8080/api/users/00000000-0000-0000-0000-000000000000/friends"
        );
    }

    #[test]
    fn friend_list_response_parses() {
        let json = r#"{"friends":["6f9619ff-8b86-4d01-b42d-00cf4fc964ff"]}"#;
        let body: FriendListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.friends.len(), 1);
    }

    #[tokio::test]
    #[ignore] // 需要运行中的好友服务
    async fn friends_of_against_live_service() {
        let directory = HttpFriendDirectory::new("http://localhost:8081");
        let result = directory.friends_of(UserId::from(Uuid::new_v4())).await;
        assert!(result.is_ok());
    }
}
