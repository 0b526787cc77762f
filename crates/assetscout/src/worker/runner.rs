use std::future::Future;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, info_span, warn, Instrument};

use super::retry::{RetryClassifier, RetryPolicy, SignatureClassifier};
use crate::discovery::{DiscoveryTask, SupplementaryOutcome, SupplementaryRequest};
use crate::error::TaskError;
use crate::model::{CompanyEntry, JobResult};

/// Runs one company through a task body with bounded retry.
///
/// Stateless between calls; the only effect is the returned value.
#[derive(Clone)]
pub struct TaskRunner {
    task: Arc<dyn DiscoveryTask>,
    classifier: Arc<dyn RetryClassifier>,
    policy: RetryPolicy,
}

impl TaskRunner {
    pub fn new(task: Arc<dyn DiscoveryTask>, policy: RetryPolicy) -> Self {
        Self {
            task,
            classifier: Arc::new(SignatureClassifier),
            policy,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Primary discovery for one entry. Never fails: an exhausted or
    /// permanent error becomes a `failed` result.
    pub async fn run_primary(
        &self,
        entry: &CompanyEntry,
        provider: &str,
        credential: Option<&SecretString>,
        worker_id: usize,
    ) -> JobResult {
        let span = info_span!("primary", company = %entry.name, worker_id);
        let task = &self.task;
        let outcome = self
            .with_retry(&entry.name, move || {
                task.run_primary(entry, provider, credential)
            })
            .instrument(span)
            .await;

        match outcome {
            Ok(outcome) => {
                JobResult::success(entry, outcome.assets_found, outcome.usage, worker_id)
            }
            Err(e) => JobResult::failed(entry, e.message, worker_id),
        }
    }

    /// Supplementary review for one company, with the same retry policy.
    pub async fn run_supplementary(
        &self,
        request: &SupplementaryRequest<'_>,
    ) -> Result<SupplementaryOutcome, TaskError> {
        let span = info_span!("supplementary", company = %request.company_name);
        let task = &self.task;
        self.with_retry(&request.company_name, move || task.run_supplementary(request))
            .instrument(span)
            .await
    }

    async fn with_retry<T, F, Fut>(&self, company: &str, mut attempt_fn: F) -> Result<T, TaskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(company, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= self.policy.max_attempts || !self.classifier.is_transient(&e) {
                        debug!(company, attempt, error = %e, "giving up");
                        return Err(e);
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        company,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::PrimaryOutcome;
    use crate::error::TaskErrorKind;
    use crate::model::{ResultStatus, Usage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted responses, then succeeds.
    struct Scripted {
        responses: Mutex<VecDeque<Result<u32, TaskError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: Vec<Result<u32, TaskError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl DiscoveryTask for Scripted {
        async fn run_primary(
            &self,
            _entry: &CompanyEntry,
            _provider: &str,
            _credential: Option<&SecretString>,
        ) -> Result<PrimaryOutcome, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front().unwrap_or(Ok(1));
            next.map(|assets_found| PrimaryOutcome {
                assets_found,
                usage: Usage::new(10, 5, 0.01),
            })
        }

        async fn run_supplementary(
            &self,
            _request: &SupplementaryRequest<'_>,
        ) -> Result<SupplementaryOutcome, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().unwrap().pop_front() {
                Some(Err(e)) => Err(e),
                _ => Ok(SupplementaryOutcome::default()),
            }
        }
    }

    fn runner(task: Arc<Scripted>) -> TaskRunner {
        TaskRunner::new(task, RetryPolicy::new(3, Duration::from_millis(3_000)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_makes_three_attempts() {
        let task = Scripted::new(vec![
            Err(TaskError::other("429 Too Many Requests")),
            Err(TaskError::other("429 Too Many Requests")),
            Err(TaskError::other("429 Too Many Requests")),
            Ok(7),
        ]);
        let started = tokio::time::Instant::now();

        let result = runner(task.clone())
            .run_primary(&CompanyEntry::new("Acme"), "openai", None, 0)
            .await;

        assert_eq!(task.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("429 Too Many Requests"));
        // 3s before the second attempt, 6s before the third.
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_short_circuits() {
        let task = Scripted::new(vec![Err(TaskError::other("invalid api key"))]);

        let result = runner(task.clone())
            .run_primary(&CompanyEntry::new("Acme"), "openai", None, 2)
            .await;

        assert_eq!(task.calls.load(Ordering::SeqCst), 1);
        assert!(!result.is_success());
        assert_eq!(result.worker_id, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let task = Scripted::new(vec![
            Err(TaskError::new(TaskErrorKind::Timeout, "slow")),
            Err(TaskError::other("socket hang up")),
            Ok(4),
        ]);

        let result = runner(task.clone())
            .run_primary(&CompanyEntry::new("Acme"), "openai", None, 0)
            .await;

        assert_eq!(task.calls.load(Ordering::SeqCst), 3);
        assert!(result.is_success());
        assert_eq!(result.assets_found, Some(4));
        assert_eq!(result.input_tokens, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_supplementary_uses_same_policy() {
        let task = Scripted::new(vec![
            Err(TaskError::other("503 Service Unavailable")),
            Err(TaskError::permanent("refused")),
        ]);
        let entry = CompanyEntry::new("Acme");
        let request = SupplementaryRequest::for_entry(&entry, Vec::new(), "perplexity", None);

        let err = runner(task.clone())
            .run_supplementary(&request)
            .await
            .unwrap_err();

        assert_eq!(task.calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.message, "refused");
    }
}
