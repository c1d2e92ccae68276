//! Lease-based leader election
//!
//! Only the holder of the lease reconciles, so exactly one daemon writes the
//! feature releases at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const LEASE_NAME: &str = "cluster-features-leader";
pub const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Identity written into the lease: `$HOSTNAME`, else the system hostname
pub fn holder_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    })
}

/// Whether a lease held by someone else can be taken over at `now`.
///
/// A lease that was never renewed counts as expired.
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    spec.and_then(|s| s.renew_time.as_ref())
        .map(|renew| {
            let duration = spec
                .and_then(|s| s.lease_duration_seconds)
                .unwrap_or(LEASE_DURATION_SECS);
            now > renew.0 + chrono::Duration::seconds(duration as i64)
        })
        .unwrap_or(true)
}

/// Keep acquiring or renewing the lease until cancelled, mirroring the
/// outcome into `is_leader`
pub async fn run_leader_election(
    client: kube::Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);
    info!("Leader election using holder ID: {}", identity);

    loop {
        let wait = match try_acquire_or_renew(&leases, namespace, identity).await {
            Ok(true) => {
                if !is_leader.swap(true, Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                RENEW_INTERVAL
            }
            Ok(false) => {
                if is_leader.swap(false, Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                RETRY_INTERVAL
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                RETRY_INTERVAL
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                is_leader.store(false, Ordering::Relaxed);
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    match leases.get_opt(LEASE_NAME).await? {
        Some(existing) => {
            let spec = existing.spec.as_ref();
            let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

            if current_holder == Some(identity) {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                return Ok(true);
            }

            if !lease_expired(spec, now) {
                return Ok(false);
            }

            info!("Lease held by {:?} has expired, taking over", current_holder);
            let patch = serde_json::json!({
                "spec": {
                    "holderIdentity": identity,
                    "acquireTime": MicroTime(now),
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            });
            leases
                .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            Ok(true)
        }
        None => {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    ..Default::default()
                }),
            };
            leases.create(&PostParams::default(), &lease).await?;
            info!("Created lease {} with holder {}", LEASE_NAME, identity);
            Ok(true)
        }
    }
}
