//! Concurrent evaluation of every image in a request.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{ComplianceResult, EvaluationError, RepositoryPolicyEvaluator, Verdict};

/// Default cap on evaluations in flight for one request.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Fans evaluations out across images and folds them into one [`Verdict`].
///
/// Every call spawns one task per image on a [`JoinSet`] owned by that call.
/// The first hard error aborts the remaining tasks (and their in-flight
/// registry requests) and is returned. Dropping the returned future has the
/// same effect, so callers cancel by dropping or timing out.
#[derive(Clone)]
pub struct BatchComplianceEngine {
    evaluator: Arc<RepositoryPolicyEvaluator>,
    max_in_flight: usize,
}

impl BatchComplianceEngine {
    /// Create an engine running at most `max_in_flight` evaluations at once.
    ///
    /// Zero is treated as one.
    pub fn new(evaluator: RepositoryPolicyEvaluator, max_in_flight: usize) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            max_in_flight: max_in_flight.clamp(1, Semaphore::MAX_PERMITS),
        }
    }

    /// The concurrency cap in effect.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Evaluate every image. Results keep the order of `images`.
    ///
    /// An empty input yields an empty, compliant verdict.
    ///
    /// # Errors
    ///
    /// Returns the first [`EvaluationError`] reported by any task.
    pub async fn evaluate_all(&self, images: &[String]) -> Result<Verdict, EvaluationError> {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for (index, image) in images.iter().enumerate() {
            let evaluator = Arc::clone(&self.evaluator);
            let permits = Arc::clone(&permits);
            let image = image.clone();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| EvaluationError::TaskFailed(e.to_string()))?;
                evaluator.evaluate(&image).await.map(|result| (index, result))
            });
        }

        // Slot i is written only by the task spawned for images[i].
        let mut slots: Vec<Option<ComplianceResult>> = images.iter().map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(EvaluationError::TaskFailed(e.to_string())),
            };
            match outcome {
                Ok((index, result)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(result);
                    }
                }
                Err(e) => {
                    warn!(error = %e, pending = tasks.len(), "aborting remaining evaluations");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let results = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EvaluationError::TaskFailed("evaluation produced no result".into()))?;

        let verdict = Verdict::from_results(results);
        debug!(
            images = images.len(),
            compliant = verdict.compliant,
            "batch evaluation finished"
        );
        Ok(verdict)
    }
}
