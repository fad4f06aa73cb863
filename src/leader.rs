//! Lease-based leader election
//!
//! The operator holds the coordination Lease `7e980ba4.dell.com` in its own
//! namespace while it runs controllers. A lease is claimable when nobody
//! renewed it within its duration. A leader that cannot renew within
//! [`RENEW_DEADLINE`] exits before a peer may take the lease over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{error, info, warn};

use crate::error::Result;

pub const LEASE_NAME: &str = "7e980ba4.dell.com";
const LEASE_SECONDS: i32 = 15;
const RENEW_EVERY: Duration = Duration::from_secs(5);
/// Must stay below `LEASE_SECONDS`
const RENEW_DEADLINE: Duration = Duration::from_secs(10);
pub const CLAIM_RETRY: Duration = Duration::from_secs(2);

/// Result of one claim attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// We hold the lease (renewed, taken over or created)
    Held,
    /// Another holder renewed it recently
    Busy,
}

/// Whether a lease spec no longer protects its holder at `now`
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(renewed) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let seconds = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_SECONDS);
    now > renewed.0 + chrono::Duration::seconds(i64::from(seconds))
}

/// Whether a leader last renewed at `last_renewed` must step down at `now`
pub fn renewal_overdue(last_renewed: Option<Instant>, now: Instant) -> bool {
    last_renewed.map_or(true, |t| now.saturating_duration_since(t) >= RENEW_DEADLINE)
}

fn holder_patch(identity: &str, now: DateTime<Utc>, acquire: bool) -> serde_json::Value {
    let mut spec = serde_json::json!({
        "holderIdentity": identity,
        "renewTime": MicroTime(now),
        "leaseDurationSeconds": LEASE_SECONDS,
    });
    if acquire {
        spec["acquireTime"] = serde_json::json!(MicroTime(now));
    }
    serde_json::json!({ "spec": spec })
}

pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    async fn patch(&self, acquire: bool) -> Result<()> {
        let patch = holder_patch(&self.identity, Utc::now(), acquire);
        self.leases
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn create(&self) -> Result<()> {
        let now = MicroTime(Utc::now());
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_duration_seconds: Some(LEASE_SECONDS),
                ..Default::default()
            }),
        };
        self.leases.create(&PostParams::default(), &lease).await?;
        info!("Created lease {} held by {}", LEASE_NAME, self.identity);
        Ok(())
    }

    /// Renew, take over or create the lease
    pub async fn claim(&self) -> Result<Claim> {
        let Some(lease) = self.leases.get_opt(LEASE_NAME).await? else {
            self.create().await?;
            return Ok(Claim::Held);
        };
        let spec = lease.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());
        if holder == Some(self.identity.as_str()) {
            self.patch(false).await?;
            return Ok(Claim::Held);
        }
        if !lease_expired(spec, Utc::now()) {
            return Ok(Claim::Busy);
        }
        info!("Lease {} held by {:?} expired. Taking over", LEASE_NAME, holder);
        self.patch(true).await?;
        Ok(Claim::Held)
    }

    /// Keep claiming the lease, flipping `leading` once it is held
    ///
    /// Losing a held lease, or failing to renew it before the deadline,
    /// exits the process so a restarted operator comes back as a follower.
    pub async fn run(self, leading: Arc<AtomicBool>) {
        let mut last_renewed: Option<Instant> = None;
        loop {
            let pause = match self.claim().await {
                Ok(Claim::Held) => {
                    last_renewed = Some(Instant::now());
                    if !leading.swap(true, Ordering::Relaxed) {
                        info!("Became leader as {}", self.identity);
                    }
                    RENEW_EVERY
                }
                Ok(Claim::Busy) if leading.load(Ordering::Relaxed) => {
                    error!("Lost lease {}. Exiting", LEASE_NAME);
                    std::process::exit(1);
                }
                Ok(Claim::Busy) => CLAIM_RETRY,
                Err(e) if leading.load(Ordering::Relaxed)
                    && renewal_overdue(last_renewed, Instant::now()) =>
                {
                    error!("Could not renew lease {} in time: {}. Exiting", LEASE_NAME, e);
                    std::process::exit(1);
                }
                Err(e) => {
                    warn!("Leader election error: {}", e);
                    CLAIM_RETRY
                }
            };
            tokio::time::sleep(pause).await;
        }
    }
}
