//! The bulkhead: one admission decision per request.
//!
//! Admission composes three checks in a fixed order:
//!
//! 1. a read-only budget pre-check, so a request that cannot fit is rejected
//!    before it ever queues;
//! 2. a concurrency slot from the gate, which may wait;
//! 3. the real budget reservation, since headroom may have shrunk while the
//!    request waited. On failure the fresh slot is handed back.
//!
//! [`LlmBulkhead::run`] wraps admission around caller work and, when enabled,
//! collapses identical concurrent requests through the dedup registry.

mod stats;
mod token;

pub use stats::{BulkheadStats, DedupStats, TokenBudgetStats};
pub use token::CompositeToken;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::BulkheadConfig;
use crate::dedup::DedupRegistry;
use crate::error::{ConfigError, RejectReason, RunError};
use crate::estimate::{HeuristicEstimator, TokenEstimator};
use crate::gate::{ConcurrencyGate, GateRequest, SemaphoreGate};
use crate::ledger::TokenLedger;
use crate::request::Request;
use crate::telemetry::{self, RunSpan, SpanExt};

/// Per-call admission options.
#[derive(Debug, Clone, Default)]
pub struct AdmitOptions {
    /// Aborts a queued wait, and is handed to the work function.
    pub cancel: Option<CancellationToken>,
    /// Queue wait bound; overrides the configured default.
    pub timeout: Option<Duration>,
}

impl AdmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Everything admission needs, cheap to clone into a spawned leader task.
#[derive(Clone)]
struct Admission {
    gate: Arc<dyn ConcurrencyGate>,
    ledger: Option<TokenLedger>,
    estimator: Arc<dyn TokenEstimator>,
    default_timeout: Option<Duration>,
}

impl Admission {
    async fn admit(
        &self,
        request: &Request,
        options: &AdmitOptions,
    ) -> Result<CompositeToken, RejectReason> {
        // Estimated once; the request is immutable and estimators are pure.
        let budget = self
            .ledger
            .as_ref()
            .map(|ledger| (ledger, self.estimator.estimate(request).cost()));

        if let Some((ledger, cost)) = budget {
            if !ledger.peek(cost) {
                return Err(reject(RejectReason::BudgetLimit, cost));
            }
        }

        let timeout = options.timeout.or(self.default_timeout);
        let slot = self
            .gate
            .acquire(GateRequest { cancel: options.cancel.as_ref(), timeout })
            .await
            .map_err(|reason| reject(reason, budget.map_or(0, |(_, cost)| cost)))?;

        let reservation = match budget {
            Some((ledger, cost)) => match ledger.check_and_reserve(cost) {
                Ok(reservation) => {
                    telemetry::record_in_flight_tokens(ledger.in_flight_tokens());
                    Some((reservation, ledger.clone()))
                }
                Err(reason) => {
                    slot.release();
                    return Err(reject(reason, cost));
                }
            },
            None => None,
        };

        telemetry::record_admitted();
        let token = CompositeToken::new(slot, reservation);
        tracing::debug!(reserved = token.reserved_tokens(), "request admitted");
        Ok(token)
    }

    /// Admit, run the work, release. Release happens before this returns on
    /// every path; a panic in the work releases through the token's drop.
    async fn execute<T, E, F, Fut>(
        &self,
        request: &Request,
        work: F,
        options: AdmitOptions,
    ) -> Result<T, RunError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = self.admit(request, &options).await?;
        let signal = options.cancel.unwrap_or_default();
        let result = work(signal).await;
        token.release();
        result.map_err(|err| RunError::Work(Arc::new(err)))
    }
}

fn reject(reason: RejectReason, cost: u64) -> RejectReason {
    telemetry::record_rejected(reason);
    tracing::warn!(reason = reason.as_str(), estimated_cost = cost, "request rejected");
    reason
}

/// Admission control in front of LLM calls.
///
/// `T` is the value produced by work passed to [`run`](Self::run) and `E`
/// its error type. Each bulkhead owns its gate, ledger and registry; nothing
/// is shared between instances.
pub struct LlmBulkhead<T, E> {
    admission: Admission,
    dedup: Option<DedupRegistry<Result<T, RunError<E>>>>,
}

impl<T, E> std::fmt::Debug for LlmBulkhead<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmBulkhead").field("stats", &self.stats()).finish()
    }
}

impl<T, E> LlmBulkhead<T, E> {
    /// Build a bulkhead over the default semaphore gate.
    pub fn new(config: BulkheadConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let gate = SemaphoreGate::new(config.max_concurrent, config.max_queue)?;
        Self::with_gate(config, Arc::new(gate))
    }

    /// Build a bulkhead over a caller-supplied gate. The gate's own limits
    /// apply; `max_concurrent` and `max_queue` in `config` are not used.
    pub fn with_gate(
        config: BulkheadConfig,
        gate: Arc<dyn ConcurrencyGate>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (ledger, estimator): (Option<TokenLedger>, Arc<dyn TokenEstimator>) =
            match &config.token_budget {
                Some(budget) => (
                    Some(TokenLedger::new(budget.max_in_flight_tokens)),
                    Arc::new(budget.estimator()),
                ),
                None => (None, Arc::new(HeuristicEstimator::default())),
            };

        Ok(Self {
            admission: Admission {
                gate,
                ledger,
                estimator,
                default_timeout: config.default_timeout(),
            },
            dedup: config.deduplicate.then(DedupRegistry::new),
        })
    }

    /// Replace the token estimator.
    pub fn with_estimator(mut self, estimator: impl TokenEstimator + 'static) -> Self {
        self.admission.estimator = Arc::new(estimator);
        self
    }

    /// Admit a request under manual control.
    ///
    /// The caller must release the returned token (or drop it) when its work
    /// is done.
    pub async fn acquire(
        &self,
        request: &Request,
        options: &AdmitOptions,
    ) -> Result<CompositeToken, RejectReason> {
        self.admission.admit(request, options).await
    }

    /// The ledger, if a token budget is configured.
    pub fn ledger(&self) -> Option<&TokenLedger> {
        self.admission.ledger.as_ref()
    }

    pub fn stats(&self) -> BulkheadStats {
        let gate = self.admission.gate.stats();
        BulkheadStats {
            in_flight: gate.in_flight,
            pending: gate.pending,
            max_concurrent: gate.max_concurrent,
            max_queue: gate.max_queue,
            token_budget: self.admission.ledger.as_ref().map(|ledger| TokenBudgetStats {
                budget: ledger.budget(),
                in_flight_tokens: ledger.in_flight_tokens(),
                available: ledger.available(),
            }),
            deduplication: self.dedup.as_ref().map(|registry| DedupStats {
                active: registry.active_count(),
                hits: registry.hits_count(),
            }),
        }
    }
}

impl<T, E> LlmBulkhead<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Admit `request`, run `work`, and release on every exit path.
    ///
    /// `work` receives the caller's cancellation token (or a fresh one) and
    /// may use it to stop early; the bulkhead never interrupts admitted work.
    ///
    /// With deduplication enabled, identical concurrent requests share one
    /// admission and one invocation of `work`. Every joined caller receives
    /// the same result, including the same rejection or work error.
    pub async fn run<F, Fut>(
        &self,
        request: &Request,
        work: F,
        options: AdmitOptions,
    ) -> Result<T, RunError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let fingerprint = self.dedup.as_ref().and_then(|_| match request.fingerprint() {
            Ok(fp) => Some(fp),
            Err(err) => {
                tracing::warn!(error = %err, "fingerprint unavailable, running without dedup");
                None
            }
        });

        let span = RunSpan::new(&Uuid::new_v4(), fingerprint.as_ref());
        let result = match (&self.dedup, fingerprint) {
            (Some(registry), Some(fp)) => {
                let admission = self.admission.clone();
                let owned = request.clone();
                let leader_span = span.clone();
                let joined = registry.join_or_lead(fp, move || {
                    async move { admission.execute(&owned, work, options).await }
                        .instrument(leader_span)
                });
                span.record("dedup_leader", joined.is_leader());
                if !joined.is_leader() {
                    telemetry::record_dedup_hit();
                }
                match joined.wait().instrument(span.clone()).await {
                    Ok(outcome) => outcome,
                    Err(lost) => Err(RunError::Interrupted(lost.0)),
                }
            }
            _ => {
                self.admission
                    .execute(request, work, options)
                    .instrument(span.clone())
                    .await
            }
        };

        span.record_outcome(&result);
        result
    }
}
