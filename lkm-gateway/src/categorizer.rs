//! Category assignment that asks the model first and trusts keyword rules
//! when the model is unsure or unavailable.

use std::sync::Arc;
use std::time::Duration;

use lkm_core::{Category, CoreError};
use lkm_knowledge::categorize::{
    MEDIUM_CONFIDENCE, categorization_prompt, categorize_with_rules, parse_ai_categorization,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ProcessingResult;
use crate::providers::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorizationMethod {
    Ai,
    Rules,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub category: Category,
    pub confidence: f64,
    pub method: CategorizationMethod,
}

pub struct CategorizationService {
    provider: Arc<dyn Provider>,
    batch_delay: Duration,
}

impl CategorizationService {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            batch_delay: Duration::from_millis(500),
        }
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub async fn categorize(&self, content: &str) -> ProcessingResult<Categorization> {
        if content.trim().is_empty() {
            return Err(CoreError::validation("content", content).into());
        }

        match self.provider.generate_content(&categorization_prompt(content)).await {
            Ok(answer) => {
                let (category, confidence) = parse_ai_categorization(&answer);
                if confidence >= MEDIUM_CONFIDENCE {
                    debug!(%category, confidence, "AI categorization accepted");
                    return Ok(Categorization {
                        category,
                        confidence,
                        method: CategorizationMethod::Ai,
                    });
                }
                debug!(%category, confidence, "AI categorization below threshold");
            }
            Err(e) => warn!(error = %e, "AI categorization failed, using rules"),
        }

        let (category, confidence) = categorize_with_rules(content);
        Ok(Categorization {
            category,
            confidence,
            method: CategorizationMethod::Rules,
        })
    }

    /// Categorize several texts, pausing between model calls.
    pub async fn batch_categorize(&self, contents: &[String]) -> Vec<Categorization> {
        let mut results = Vec::with_capacity(contents.len());
        for (i, content) in contents.iter().enumerate() {
            let result = self.categorize(content).await.unwrap_or_else(|e| {
                warn!(index = i, error = %e, "categorization failed");
                Categorization {
                    category: Category::Other,
                    confidence: 0.1,
                    method: CategorizationMethod::Failed,
                }
            });
            results.push(result);
            if i + 1 < contents.len() && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;

    struct Fixed(&'static str);

    #[async_trait::async_trait]
    impl Provider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self) -> &str {
            "fixed-1"
        }

        async fn generate_content(&self, _prompt: &str) -> Result<String, ProviderError> {
            if self.0.is_empty() {
                Err(ProviderError::EmptyResponse)
            } else {
                Ok(self.0.to_string())
            }
        }
    }

    const LEADERSHIP: &str = "Great leadership starts with trust. Managers who coach their team \
        and invest in culture keep their best people longer.";

    #[tokio::test]
    async fn confident_answer_is_used() {
        let service = CategorizationService::new(Arc::new(Fixed(
            "CATEGORY: Marketing & Sales\nCONFIDENCE: 0.9\nREASONING: funnels",
        )));
        let result = service.categorize(LEADERSHIP).await.unwrap();
        assert_eq!(result.category, Category::MarketingSales);
        assert_eq!(result.method, CategorizationMethod::Ai);
    }

    #[tokio::test]
    async fn unsure_answer_falls_back_to_rules() {
        let service = CategorizationService::new(Arc::new(Fixed(
            "CATEGORY: Marketing & Sales\nCONFIDENCE: 0.2",
        )));
        let result = service.categorize(LEADERSHIP).await.unwrap();
        assert_eq!(result.method, CategorizationMethod::Rules);
        assert_eq!(result.category, categorize_with_rules(LEADERSHIP).0);
    }

    #[tokio::test]
    async fn batch_marks_failures() {
        let service = CategorizationService::new(Arc::new(Fixed("")))
            .with_batch_delay(Duration::ZERO);
        let results = service
            .batch_categorize(&[LEADERSHIP.to_string(), "   ".to_string()])
            .await;
        assert_eq!(results[0].method, CategorizationMethod::Rules);
        assert_eq!(results[1].category, Category::Other);
        assert_eq!(results[1].method, CategorizationMethod::Failed);
        assert!((results[1].confidence - 0.1).abs() < f64::EPSILON);
    }
}
