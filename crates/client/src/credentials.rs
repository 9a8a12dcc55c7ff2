// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::sync::RwLock;

use crate::error::Result;

/// Kind of access token handed out by the authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenType {
    /// Long lived token that the authorization server can refresh.
    Offline,
    /// Short lived token that cannot be refreshed.
    Legacy,
}

/// Source of the access token, consulted lazily on first use of a client.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn token(&self) -> Result<Option<String>>;

    async fn token_type(&self) -> Result<Option<TokenType>>;

    async fn save(&self, token: &str, token_type: TokenType) -> Result<()>;

    async fn delete(&self) -> Result<()>;
}

/// Credential store that keeps the token in memory only.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    inner: RwLock<Option<(String, TokenType)>>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn with_token(token: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            inner: RwLock::new(Some((token.into(), token_type))),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.inner.read().await.as_ref().map(|(token, _)| token.clone()))
    }

    async fn token_type(&self) -> Result<Option<TokenType>> {
        Ok(self.inner.read().await.as_ref().map(|(_, kind)| *kind))
    }

    async fn save(&self, token: &str, token_type: TokenType) -> Result<()> {
        *self.inner.write().await = Some((token.to_string(), token_type));
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.inner.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_credentials_lifecycle() {
        let store = MemoryCredentials::new();
        assert!(store.token().await.unwrap().is_none());

        store.save("secret", TokenType::Offline).await.unwrap();
        assert_eq!(store.token().await.unwrap().as_deref(), Some("secret"));
        assert_eq!(store.token_type().await.unwrap(), Some(TokenType::Offline));

        store.delete().await.unwrap();
        assert!(store.token().await.unwrap().is_none());
        assert!(store.token_type().await.unwrap().is_none());
    }

    #[test]
    fn test_token_type_names() {
        assert_eq!(TokenType::Legacy.to_string(), "legacy");
        assert_eq!("offline".parse::<TokenType>().ok(), Some(TokenType::Offline));
    }
}
