//! Profile id resolution from subject references.

use async_trait::async_trait;
use regex::Regex;

use super::ProfileResolver;
use crate::error::ResolutionError;

/// Resolves a profile id by matching the subject against a regex and
/// taking the first capture group.
#[derive(Debug, Clone)]
pub struct PatternResolver {
    regex: Regex,
}

impl PatternResolver {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// Synchronous form of [`ProfileResolver::resolve_profile_id`].
    pub fn extract(&self, subject: &str) -> Option<String> {
        self.regex
            .captures(subject.trim())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|id| !id.is_empty())
    }
}

#[async_trait]
impl ProfileResolver for PatternResolver {
    async fn resolve_profile_id(&self, subject: &str) -> Result<String, ResolutionError> {
        self.extract(subject).ok_or_else(|| ResolutionError {
            subject: subject.to_string(),
            reason: format!("no match for pattern {}", self.regex.as_str()),
        })
    }
}
