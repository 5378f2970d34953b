// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch partitioning and per-batch classification

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::classifier::{ClassificationResult, Classifier};
use crate::walker::FileDescriptor;
use crate::ClassifierError;

/// Split `files` into consecutive batches of at most `batch_size`, keeping order.
/// A zero batch size is treated as one.
pub fn partition(files: Vec<FileDescriptor>, batch_size: usize) -> Vec<Vec<FileDescriptor>> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity((files.len() + size - 1) / size);
    let mut iter = files.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

/// Sends batches to a classifier under a time limit
#[derive(Clone)]
pub struct ClassificationBatcher {
    classifier: Arc<dyn Classifier>,
    batch_size: usize,
    timeout: Duration,
}

impl ClassificationBatcher {
    pub fn new(classifier: Arc<dyn Classifier>, batch_size: usize, timeout: Duration) -> Self {
        Self {
            classifier,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn partition(&self, files: Vec<FileDescriptor>) -> Vec<Vec<FileDescriptor>> {
        partition(files, self.batch_size)
    }

    /// Classify one batch. The whole batch fails together on timeout,
    /// service error or a verdict count that does not match the input.
    pub async fn classify(
        &self,
        batch: &[FileDescriptor],
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let verdicts = tokio::time::timeout(self.timeout, self.classifier.classify(batch))
            .await
            .map_err(|_| ClassifierError::Timeout)??;

        if verdicts.len() != batch.len() {
            return Err(ClassifierError::CountMismatch {
                expected: batch.len(),
                got: verdicts.len(),
            });
        }

        debug!("{} classified {} files", self.classifier.name(), batch.len());
        Ok(batch
            .iter()
            .zip(verdicts)
            .map(|(file, verdict)| ClassificationResult::new(file, verdict))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, QualityRating};
    use async_trait::async_trait;
    use std::path::PathBuf;

    fn files(n: usize) -> Vec<FileDescriptor> {
        (0..n)
            .map(|i| FileDescriptor::from_path(&PathBuf::from(format!("/in/f{}.pdf", i)), i as u64))
            .collect()
    }

    fn verdict(is_plr: bool) -> Classification {
        Classification {
            is_plr,
            confidence: 0.8,
            content_type: "ebook".to_string(),
            niche: None,
            sub_niche: None,
            license_type: "PLR".to_string(),
            quality_rating: QualityRating::C,
            tags: Default::default(),
            reason: String::new(),
        }
    }

    struct ShortClassifier;

    #[async_trait]
    impl Classifier for ShortClassifier {
        fn name(&self) -> &'static str {
            "short"
        }

        async fn classify(
            &self,
            batch: &[FileDescriptor],
        ) -> Result<Vec<Classification>, ClassifierError> {
            Ok(batch.iter().skip(1).map(|_| verdict(true)).collect())
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn classify(
            &self,
            batch: &[FileDescriptor],
        ) -> Result<Vec<Classification>, ClassifierError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(batch.iter().map(|_| verdict(false)).collect())
        }
    }

    struct EchoClassifier;

    #[async_trait]
    impl Classifier for EchoClassifier {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn classify(
            &self,
            batch: &[FileDescriptor],
        ) -> Result<Vec<Classification>, ClassifierError> {
            Ok(batch.iter().map(|f| verdict(f.size % 2 == 0)).collect())
        }
    }

    #[test]
    fn test_partition_conserves_files() {
        for (n, size, expected_batches) in [(0, 10, 0), (1, 10, 1), (10, 10, 1), (11, 10, 2), (25, 10, 3), (7, 1, 7)] {
            let input = files(n);
            let batches = partition(input.clone(), size);
            assert_eq!(batches.len(), expected_batches, "n={} size={}", n, size);
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
            let flattened: Vec<_> = batches.into_iter().flatten().collect();
            assert_eq!(flattened, input);
        }
    }

    #[test]
    fn test_partition_zero_size() {
        assert_eq!(partition(files(3), 0).len(), 3);
    }

    #[tokio::test]
    async fn test_results_bind_positionally() {
        let batcher = ClassificationBatcher::new(Arc::new(EchoClassifier), 10, Duration::from_secs(1));
        let batch = files(3);
        let results = batcher.classify(&batch).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].file_path, batch[1].path);
        assert!(results[0].is_plr);
        assert!(!results[1].is_plr);
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_batch() {
        let batcher = ClassificationBatcher::new(Arc::new(ShortClassifier), 10, Duration::from_secs(1));
        let err = batcher.classify(&files(2)).await.unwrap_err();
        assert_eq!(err, ClassifierError::CountMismatch { expected: 2, got: 1 });
    }

    #[tokio::test]
    async fn test_timeout_fails_batch() {
        let batcher = ClassificationBatcher::new(Arc::new(SlowClassifier), 10, Duration::from_millis(100));
        assert_eq!(batcher.classify(&files(1)).await.unwrap_err(), ClassifierError::Timeout);
    }
}
