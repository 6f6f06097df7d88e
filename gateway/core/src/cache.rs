//! Semantic Cache
//!
//! The router consults a [`SemanticCache`] before calling any backend and
//! populates it after every successful generation. The real similarity cache
//! is an external collaborator; [`ExactMatchCache`] is an in-memory reference
//! implementation that matches on normalized prompt text.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// Namespace used when a request carries none
pub const DEFAULT_NAMESPACE: &str = "default";

/// A cached response and how closely its prompt matched
#[derive(Clone, Debug, PartialEq)]
pub struct CacheHit {
    /// Cached response text
    pub text: String,
    /// Similarity in 0.0 - 1.0
    pub similarity: f32,
}

/// Prompt-to-response cache keyed by `(prompt, namespace)`
#[async_trait]
pub trait SemanticCache: Send + Sync {
    /// Look up a response for the prompt
    async fn get(&self, prompt: &str, namespace: &str) -> anyhow::Result<Option<CacheHit>>;

    /// Store a response with free-form metadata
    async fn put(
        &self,
        prompt: &str,
        response: &str,
        metadata: Value,
        namespace: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    response: String,
    metadata: Value,
}

/// In-memory cache matching on whitespace- and case-normalized prompts
#[derive(Debug, Default)]
pub struct ExactMatchCache {
    entries: DashMap<(String, String), CacheEntry>,
}

impl ExactMatchCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata stored alongside a cached response
    #[must_use]
    pub fn metadata(&self, prompt: &str, namespace: &str) -> Option<Value> {
        self.entries
            .get(&Self::key(prompt, namespace))
            .map(|entry| entry.metadata.clone())
    }

    fn key(prompt: &str, namespace: &str) -> (String, String) {
        let normalized = prompt
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        (namespace.to_string(), normalized)
    }
}

#[async_trait]
impl SemanticCache for ExactMatchCache {
    async fn get(&self, prompt: &str, namespace: &str) -> anyhow::Result<Option<CacheHit>> {
        Ok(self
            .entries
            .get(&Self::key(prompt, namespace))
            .map(|entry| CacheHit {
                text: entry.response.clone(),
                similarity: 1.0,
            }))
    }

    async fn put(
        &self,
        prompt: &str,
        response: &str,
        metadata: Value,
        namespace: &str,
    ) -> anyhow::Result<()> {
        self.entries.insert(
            Self::key(prompt, namespace),
            CacheEntry {
                response: response.to_string(),
                metadata,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_normalized_match_within_namespace() {
        let cache = ExactMatchCache::new();
        cache
            .put("Write  a\nparser", "fn parse() {}", Value::Null, "proj")
            .await
            .unwrap();

        let hit = cache.get("write a parser", "proj").await.unwrap().unwrap();
        assert_eq!(hit.text, "fn parse() {}");
        assert!((hit.similarity - 1.0).abs() < f32::EPSILON);

        assert!(cache.get("write a parser", "other").await.unwrap().is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_is_kept() {
        let cache = ExactMatchCache::new();
        let metadata = serde_json::json!({ "backend": "groq:llama" });
        cache.put("p", "r", metadata.clone(), "ns").await.unwrap();
        assert_eq!(cache.metadata("P", "ns"), Some(metadata));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = ExactMatchCache::new();
        tokio_test::assert_ok!(cache.put("p", "one", Value::Null, DEFAULT_NAMESPACE).await);
        tokio_test::assert_ok!(cache.put("p", "two", Value::Null, DEFAULT_NAMESPACE).await);

        let hit = cache.get("p", DEFAULT_NAMESPACE).await.unwrap().unwrap();
        assert_eq!(hit.text, "two");
    }
}
