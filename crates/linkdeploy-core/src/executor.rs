//! Deployment executor: the only path from a run to the backend.
//!
//! Wraps an [`ExecutionBackend`] and adds what every call needs regardless
//! of backend: an optional per-step timeout, the write-once address check,
//! error classification against the failing [`Step`], and metrics.
//!
//! Both operations return only after the backend reports the action
//! durable. The executor never retries.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use linkdeploy_backend::{Address, BackendError, Bundle, Deployer, ExecutionBackend, Receipt};
use tracing::debug;

use crate::error::{DeploymentError, Step};
use crate::metrics::METRICS;

pub struct DeploymentExecutor {
    backend: Arc<dyn ExecutionBackend>,
    step_timeout: Option<Duration>,
    assigned: HashSet<Address>,
    calls_issued: usize,
}

impl DeploymentExecutor {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            step_timeout: None,
            assigned: HashSet::new(),
            calls_issued: 0,
        }
    }

    /// Bound every backend call. An expired deploy or mutation may still
    /// land, so it is reported as [`DeploymentError::Unconfirmed`]; an
    /// expired deployer query is [`DeploymentError::BackendUnavailable`].
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Number of deploy and mutate calls sent to the backend so far.
    pub fn calls_issued(&self) -> usize {
        self.calls_issued
    }

    pub async fn deployer(&self) -> Result<Deployer, DeploymentError> {
        self.bounded(Step::QueryDeployer, self.backend.deployer())
            .await
    }

    /// Deploy `bundle` with `args` and return its confirmed address.
    ///
    /// Fails with `UnusableAddress` when the backend returns the placeholder
    /// or an address already assigned in this run. The error keeps the
    /// address, since the deploy itself was confirmed.
    pub async fn deploy(
        &mut self,
        step: &Step,
        bundle: &Bundle,
        args: &[Address],
    ) -> Result<Address, DeploymentError> {
        debug!(step = %step, args = args.len(), "sending deploy");
        self.calls_issued += 1;
        let address = self
            .bounded(step.clone(), self.backend.deploy(bundle, args))
            .await?;

        if address.is_placeholder() {
            return Err(DeploymentError::UnusableAddress {
                step: step.clone(),
                address,
                reason: "it is the placeholder address".to_string(),
            });
        }
        if self.assigned.contains(&address) {
            return Err(DeploymentError::UnusableAddress {
                step: step.clone(),
                address,
                reason: "already assigned in this run".to_string(),
            });
        }
        self.assigned.insert(address.clone());

        METRICS.inc_deploys();
        Ok(address)
    }

    /// Invoke `method` on `target` with `args` and return the receipt.
    pub async fn mutate(
        &mut self,
        step: &Step,
        target: &Address,
        method: &str,
        args: &[Address],
    ) -> Result<Receipt, DeploymentError> {
        debug!(step = %step, target = %target, "sending mutation");
        self.calls_issued += 1;
        let receipt = self
            .bounded(step.clone(), self.backend.mutate(target, method, args))
            .await?;
        METRICS.inc_patches();
        Ok(receipt)
    }

    async fn bounded<T>(
        &self,
        step: Step,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, DeploymentError> {
        let outcome = match self.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let reason = format!("no confirmation within {}s", limit.as_secs_f64());
                    return Err(match step {
                        Step::QueryDeployer => DeploymentError::BackendUnavailable { step, reason },
                        step => DeploymentError::Unconfirmed {
                            step,
                            tx_hash: None,
                            reason,
                        },
                    });
                }
            },
            None => call.await,
        };
        outcome.map_err(|err| DeploymentError::from_backend(step, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use linkdeploy_backend::fakes::MemoryBackend;
    use linkdeploy_backend::BackendResult;

    fn deploy_step(name: &str) -> Step {
        Step::Deploy {
            component: name.to_string(),
        }
    }

    /// Backend that hands out the same address every time.
    struct StuckNonceBackend {
        address: Address,
    }

    #[async_trait]
    impl ExecutionBackend for StuckNonceBackend {
        async fn deployer(&self) -> BackendResult<Deployer> {
            Ok(Deployer("0xdeployer".into()))
        }

        async fn deploy(&self, _bundle: &Bundle, _args: &[Address]) -> BackendResult<Address> {
            Ok(self.address.clone())
        }

        async fn mutate(
            &self,
            _target: &Address,
            _method: &str,
            _args: &[Address],
        ) -> BackendResult<Receipt> {
            Ok(Receipt {
                transaction_hash: "0x0".into(),
                block_number: None,
            })
        }
    }

    /// Backend whose deploys never confirm.
    struct HangingBackend;

    #[async_trait]
    impl ExecutionBackend for HangingBackend {
        async fn deployer(&self) -> BackendResult<Deployer> {
            Ok(Deployer("0xdeployer".into()))
        }

        async fn deploy(&self, _bundle: &Bundle, _args: &[Address]) -> BackendResult<Address> {
            std::future::pending().await
        }

        async fn mutate(
            &self,
            _target: &Address,
            _method: &str,
            _args: &[Address],
        ) -> BackendResult<Receipt> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn deploy_and_mutate_pass_through() {
        let backend = Arc::new(MemoryBackend::new());
        let mut executor = DeploymentExecutor::new(backend.clone());

        let a = executor
            .deploy(&deploy_step("A"), &Bundle(vec![0x60]), &[])
            .await
            .unwrap();
        assert_eq!(a, backend.address_for_nonce(0));

        let step = Step::Patch {
            source: "A".into(),
            dependency: "A".into(),
            method: "updateA".into(),
        };
        let receipt = executor
            .mutate(&step, &a, "updateA", &[a.clone()])
            .await
            .unwrap();
        assert!(receipt.block_number.is_some());
        assert_eq!(executor.calls_issued(), 2);
    }

    #[tokio::test]
    async fn reused_address_is_rejected() {
        let backend = Arc::new(StuckNonceBackend {
            address: Address::new("0x00000000000000000000000000000000000000aa"),
        });
        let mut executor = DeploymentExecutor::new(backend);
        executor
            .deploy(&deploy_step("A"), &Bundle(vec![0x60]), &[])
            .await
            .unwrap();
        let err = executor
            .deploy(&deploy_step("B"), &Bundle(vec![0x60]), &[])
            .await
            .unwrap_err();
        match err {
            DeploymentError::UnusableAddress { step, address, .. } => {
                assert_eq!(step, deploy_step("B"));
                assert_eq!(
                    address,
                    Address::new("0x00000000000000000000000000000000000000aa")
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn placeholder_address_is_rejected() {
        let backend = Arc::new(StuckNonceBackend {
            address: Address::placeholder(),
        });
        let mut executor = DeploymentExecutor::new(backend);
        let err = executor
            .deploy(&deploy_step("A"), &Bundle(vec![0x60]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::UnusableAddress { .. }));
        assert!(err.in_flight().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_leaves_the_deploy_in_doubt() {
        let mut executor = DeploymentExecutor::new(Arc::new(HangingBackend))
            .with_step_timeout(Some(Duration::from_secs(5)));
        let err = executor
            .deploy(&deploy_step("A"), &Bundle(vec![0x60]), &[])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, DeploymentError::Unconfirmed { tx_hash: None, .. }));
        assert_eq!(err.in_flight().unwrap().step, deploy_step("A"));
    }

    #[tokio::test]
    async fn unconfirmed_backend_deploy_keeps_the_tx_hash() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_call(
            0,
            BackendError::Unconfirmed {
                tx_hash: "0x11".into(),
                reason: "no receipt".into(),
            },
        );
        let mut executor = DeploymentExecutor::new(backend);
        let err = executor
            .deploy(&deploy_step("A"), &Bundle(vec![0x60]), &[])
            .await
            .unwrap_err();
        assert_eq!(err.in_flight().unwrap().tx_hash.as_deref(), Some("0x11"));
    }

    #[tokio::test]
    async fn backend_rejection_names_the_step() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_call(0, BackendError::Rejected("out of gas".into()));
        let mut executor = DeploymentExecutor::new(backend);
        let err = executor
            .deploy(&deploy_step("Ticket"), &Bundle(vec![0x60]), &[])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "deploy Ticket: backend rejected the action: out of gas"
        );
    }
}
