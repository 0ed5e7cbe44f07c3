use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::utils::sha256_hex;

/// API key 的持有方
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyOwner {
    pub name: String,
}

/// API key 查询接口，持久化实现由使用方提供
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn lookup(&self, api_key: &str) -> Option<ApiKeyOwner>;
}

/// 从配置加载的静态 key 表，只保存摘要
#[derive(Debug, Default, Clone)]
pub struct StaticApiKeyStore {
    owners_by_digest: HashMap<String, ApiKeyOwner>,
}

impl StaticApiKeyStore {
    pub fn new<I, O, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (O, K)>,
        O: Into<String>,
        K: AsRef<str>,
    {
        let owners_by_digest = entries
            .into_iter()
            .map(|(owner, key)| {
                (
                    sha256_hex(key.as_ref()),
                    ApiKeyOwner { name: owner.into() },
                )
            })
            .collect();
        Self { owners_by_digest }
    }

    pub fn len(&self) -> usize {
        self.owners_by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners_by_digest.is_empty()
    }
}

#[async_trait]
impl ApiKeyStore for StaticApiKeyStore {
    async fn lookup(&self, api_key: &str) -> Option<ApiKeyOwner> {
        self.owners_by_digest.get(&sha256_hex(api_key)).cloned()
    }
}
