//! Batch coordination
//!
//! Detection for the documents of a batch runs concurrently, bounded by
//! `EngineConfig::batch_concurrency`. Results come back in input order and
//! each document is committed (token assignment, the only registry write)
//! before the next one, so in registry scope identical values across the
//! batch share a token and numbering follows document order.
//!
//! A failing document never drops out of the result: its error is reported
//! at its index and nothing from it is registered.

use crate::assigner::TokenScope;
use crate::engine::PiiEngine;
use crate::error::{PiiError, Result};
use crate::policy::PolicySelector;
use crate::types::{RedactResult, TokenizeResult};
use futures::stream::{self, StreamExt};

/// Outcome for one input document
#[derive(Debug)]
pub struct BatchItem<T> {
    /// Position of the document in the input
    pub index: usize,
    pub outcome: std::result::Result<T, PiiError>,
}

/// Per-document outcomes, in input order
#[derive(Debug)]
pub struct BatchResult<T> {
    pub items: Vec<BatchItem<T>>,
}

impl<T> BatchResult<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True if every document succeeded
    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|item| item.outcome.is_ok())
    }

    /// Successful outputs with their input index
    pub fn succeeded(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .filter_map(|item| item.outcome.as_ref().ok().map(|out| (item.index, out)))
    }

    /// Failures with their input index
    pub fn failures(&self) -> impl Iterator<Item = (usize, &PiiError)> {
        self.items
            .iter()
            .filter_map(|item| item.outcome.as_ref().err().map(|err| (item.index, err)))
    }

    /// One result per input document
    pub fn into_results(self) -> Vec<Result<T>> {
        self.items.into_iter().map(|item| item.outcome).collect()
    }

    /// All outputs, or the first failure
    pub fn into_outputs(self) -> Result<Vec<T>> {
        self.items.into_iter().map(|item| item.outcome).collect()
    }
}

impl PiiEngine {
    /// Tokenize many documents in one operation
    ///
    /// Only an unresolvable policy fails the whole call (before any
    /// detection); every other failure is reported per document.
    pub async fn tokenize_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        selector: &PolicySelector,
        scope: TokenScope,
    ) -> Result<BatchResult<TokenizeResult>> {
        let policy = self.resolve_policy(selector)?;
        let concurrency = self.config().batch_concurrency.max(1);

        let mut detections = stream::iter(texts.iter().enumerate())
            .map(|(index, text)| {
                let policy = &policy;
                async move { (index, self.detect(text.as_ref(), policy).await) }
            })
            .buffered(concurrency);

        let mut items = Vec::with_capacity(texts.len());
        while let Some((index, detected)) = detections.next().await {
            let outcome = detected
                .and_then(|entities| self.tokenize_detected(texts[index].as_ref(), entities, scope));
            if let Err(err) = &outcome {
                tracing::warn!(index, error = %err, "Batch document failed");
            }
            items.push(BatchItem { index, outcome });
        }

        let result = BatchResult { items };
        tracing::info!(
            policy = %policy.name,
            scope = ?scope,
            documents = result.len(),
            failed = result.failures().count(),
            "Batch tokenized"
        );
        Ok(result)
    }

    /// Redact many documents in one operation
    pub async fn redact_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        selector: &PolicySelector,
    ) -> Result<BatchResult<RedactResult>> {
        let policy = self.resolve_policy(selector)?;
        let concurrency = self.config().batch_concurrency.max(1);

        let items: Vec<BatchItem<RedactResult>> = stream::iter(texts.iter().enumerate())
            .map(|(index, text)| {
                let policy = &policy;
                async move {
                    let text = text.as_ref();
                    let outcome = self
                        .detect(text, policy)
                        .await
                        .map(|entities| self.redact_detected(text, entities));
                    if let Err(err) = &outcome {
                        tracing::warn!(index, error = %err, "Batch document failed");
                    }
                    BatchItem { index, outcome }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let result = BatchResult { items };
        tracing::info!(
            policy = %policy.name,
            documents = result.len(),
            failed = result.failures().count(),
            "Batch redacted"
        );
        Ok(result)
    }
}
