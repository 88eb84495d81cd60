//! Desired-versus-actual reconciliation.
//!
//! The diff is a plain set difference over service names and is recomputed
//! from scratch on every pass; a failed start is simply retried on the next
//! one.

use log::{info, warn};

use crate::error::Result;
use crate::lifecycle::{container_name, ServiceManager};
use crate::types::{Action, PassReport, ReconciliationDiff, ServiceFailure, ServiceSet};

pub fn diff(desired: &ServiceSet, actual: &ServiceSet) -> ReconciliationDiff {
    ReconciliationDiff {
        to_start: desired.difference(actual).cloned().collect(),
        to_stop: actual.difference(desired).cloned().collect(),
    }
}

/// Drives the runtime towards `desired`.  Per-service failures are recorded
/// in `report` and do not stop the pass; only failing to read the actual
/// state is an error.
pub async fn reconcile(
    manager: &ServiceManager,
    desired: &ServiceSet,
    report: &mut PassReport,
) -> Result<()> {
    let actual = manager.local_services().await?;
    let diff = diff(desired, &actual);
    if diff.is_empty() {
        return Ok(());
    }
    info!(
        "Reconciling: {} to start, {} to stop",
        diff.to_start.len(),
        diff.to_stop.len()
    );

    for service in &diff.to_start {
        match manager.start(service).await {
            Ok(id) => {
                info!("Service {} running as {}", service, id);
                report.started.push(service.clone());
            }
            Err(e) => {
                warn!("Failed to start service {}: {}", service, e);
                report.failures.push(ServiceFailure {
                    service: service.clone(),
                    action: Action::Start,
                    error: e.to_string(),
                });
            }
        }
    }

    for service in &diff.to_stop {
        match manager.stop(service).await {
            Ok(0) => warn!(
                "Service {} is labelled as running but no container is named {}",
                service,
                container_name(service)
            ),
            Ok(_) => report.stopped.push(service.clone()),
            Err(e) => {
                warn!("Failed to stop service {}: {}", service, e);
                report.failures.push(ServiceFailure {
                    service: service.clone(),
                    action: Action::Stop,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ServiceRegistry, ServiceSpec};
    use crate::test_utils::{managed_container, unmanaged_container, MockRuntime, RuntimeCall};
    use crate::types::Service;
    use std::sync::Arc;

    fn set(names: &[&str]) -> ServiceSet {
        names.iter().map(|n| Service::from(*n)).collect()
    }

    fn manager(runtime: &Arc<MockRuntime>) -> ServiceManager {
        let mut registry = ServiceRegistry::builtin();
        for name in ["WEB", "DNS", "CACHE"] {
            registry.insert(Service::from(name), ServiceSpec::new(format!("example/{name}")));
        }
        ServiceManager::new(runtime.clone(), registry, "i-1", "/cfg", "/var/run/docker.sock")
    }

    #[test]
    fn converged_state_has_empty_diff() {
        let s = set(&["LB", "WEB"]);
        assert!(diff(&s, &s).is_empty());
    }

    #[test]
    fn diff_checks_every_element() {
        let d = diff(&set(&["LB", "WEB", "DNS"]), &set(&["LB", "CACHE", "WEB"]));
        assert_eq!(d.to_start, set(&["DNS"]));
        assert_eq!(d.to_stop, set(&["CACHE"]));
    }

    #[tokio::test]
    async fn one_pass_converges() {
        let runtime = Arc::new(MockRuntime::with_containers(vec![
            managed_container("c1", "LB"),
            managed_container("c2", "CACHE"),
        ]));
        let manager = manager(&runtime);
        let desired = set(&["LB", "WEB", "DNS"]);

        let mut report = PassReport::default();
        reconcile(&manager, &desired, &mut report).await.unwrap();

        assert_eq!(manager.local_services().await.unwrap(), desired);
        assert_eq!(report.started, vec![Service::from("DNS"), Service::from("WEB")]);
        assert_eq!(report.stopped, vec![Service::from("CACHE")]);
        assert_eq!(runtime.count(|c| matches!(c, RuntimeCall::Create(_))), 2);
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = manager(&runtime);
        let desired = set(&["LB", "WEB"]);

        reconcile(&manager, &desired, &mut PassReport::default()).await.unwrap();
        let calls_after_first = runtime.calls().len();

        let mut report = PassReport::default();
        reconcile(&manager, &desired, &mut report).await.unwrap();

        assert_eq!(report, PassReport::default());
        // Only the list of the actual state.
        assert_eq!(runtime.calls().len(), calls_after_first + 1);
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_pass() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = manager(&runtime);

        let mut report = PassReport::default();
        reconcile(&manager, &set(&["BOGUS", "LB"]), &mut report)
            .await
            .unwrap();

        assert_eq!(report.started, vec![Service::from("LB")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].service, Service::from("BOGUS"));
        assert_eq!(report.failures[0].action, Action::Start);
    }

    #[tokio::test]
    async fn unmanaged_containers_are_never_stopped() {
        let runtime = Arc::new(MockRuntime::with_containers(vec![unmanaged_container(
            "x", "LB",
        )]));
        let manager = manager(&runtime);

        let mut report = PassReport::default();
        reconcile(&manager, &ServiceSet::new(), &mut report).await.unwrap();

        assert!(report.stopped.is_empty());
        assert!(runtime.stopped().is_empty());
    }

    #[tokio::test]
    async fn failed_stop_is_recorded_and_the_pass_continues() {
        let runtime = Arc::new(
            MockRuntime::with_containers(vec![
                managed_container("c1", "CACHE"),
                managed_container("c2", "DNS"),
            ])
            .fail_stop("c1"),
        );
        let manager = manager(&runtime);

        let mut report = PassReport::default();
        reconcile(&manager, &set(&["LB"]), &mut report).await.unwrap();

        assert_eq!(report.started, vec![Service::from("LB")]);
        assert_eq!(report.stopped, vec![Service::from("DNS")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].service, Service::from("CACHE"));
        assert_eq!(report.failures[0].action, Action::Stop);
        assert_eq!(runtime.stopped(), vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(manager.local_services().await.unwrap(), set(&["CACHE", "LB"]));
    }

    #[tokio::test]
    async fn misnamed_container_is_not_reported_as_stopped() {
        let mut stray = managed_container("c1", "CACHE");
        stray.names = vec!["cache-by-hand".to_string()];
        let runtime = Arc::new(MockRuntime::with_containers(vec![stray]));
        let manager = manager(&runtime);

        let mut report = PassReport::default();
        reconcile(&manager, &ServiceSet::new(), &mut report).await.unwrap();

        assert!(report.stopped.is_empty());
        assert!(report.failures.is_empty());
        assert!(runtime.stopped().is_empty());
    }
}
