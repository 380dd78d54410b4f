mod common;

use chrono::{TimeZone, Utc};
use common::{relational, request, RecordingProvisioner};
use conflux_common::clock::ManualClock;
use conflux_credentials::exchange::{default_providers, default_rule_source};
use conflux_credentials::{Credential, Identity, ProviderRegistry};
use conflux_error::ErrorCode;
use conflux_runtime::pool_state::{
    ConnectionPoolStateCache, CredentialSupplier, PoolLookup, PoolStateHousekeeper,
};
use conflux_runtime::{ExecutionContext, RelationalStoreState};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

fn cache_at_t0() -> (Arc<ManualClock>, ConnectionPoolStateCache) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let cache = ConnectionPoolStateCache::new(clock.clone());
    (clock, cache)
}

#[test]
fn test_eviction_respects_ttl_boundary() {
    let (clock, cache) = cache_at_t0();
    cache.register("DBPool_a", Identity::new("alice"), None);

    clock.advance(TTL - Duration::from_secs(1));
    cache.purge(TTL);
    assert!(cache.get("DBPool_a").is_some());

    clock.advance(Duration::from_secs(2));
    let report = cache.purge(TTL);
    assert!(cache.get("DBPool_a").is_none());
    assert_eq!(report.evicted(), 1);
}

#[test]
fn test_unknown_pool_differs_from_pool_without_supplier() {
    let (_clock, cache) = cache_at_t0();
    cache.register("DBPool_known", Identity::new("alice"), None);

    assert!(matches!(
        cache.credential_supplier("DBPool_missing"),
        PoolLookup::UnknownPool
    ));
    assert!(matches!(
        cache.credential_supplier("DBPool_known"),
        PoolLookup::Registered(None)
    ));

    let err = cache
        .identity("DBPool_missing")
        .or_unknown("DBPool_missing")
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownPool);
    assert_eq!(
        cache
            .identity("DBPool_known")
            .or_unknown("DBPool_known")
            .unwrap()
            .name(),
        "alice"
    );
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_purge_logs_sizes_before_and_after() {
    let (clock, cache) = cache_at_t0();
    cache.register("DBPool_old_1", Identity::new("alice"), None);
    cache.register("DBPool_old_2", Identity::new("bob"), None);
    clock.advance(Duration::from_secs(90));
    for name in ["DBPool_new_1", "DBPool_new_2", "DBPool_new_3"] {
        cache.register(name, Identity::new("carol"), None);
    }
    clock.advance(Duration::from_secs(10));

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let report = tracing::subscriber::with_default(subscriber, || cache.purge(TTL));

    assert_eq!(report.before, 5);
    assert_eq!(report.after, 3);
    assert_eq!(cache.len(), 3);
    assert!(cache.get("DBPool_old_1").is_none());

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = output
        .lines()
        .filter(|l| l.contains("Purged expired connection pool states"))
        .collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("before=5"));
    assert!(lines[0].contains("after=3"));
}

#[tokio::test]
async fn test_housekeeper_purges_on_start() {
    let (clock, cache) = cache_at_t0();
    let cache = Arc::new(cache);
    cache.register("DBPool_stale", Identity::new("alice"), None);
    clock.advance(Duration::from_secs(3600));

    let mut housekeeper = PoolStateHousekeeper::start(cache.clone(), TTL);
    for _ in 0..100 {
        if cache.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cache.is_empty());
    assert!(housekeeper.is_running());

    housekeeper.stop();
    assert!(!housekeeper.is_running());
}

#[tokio::test]
async fn test_provisioning_registers_pool_state_with_supplier() {
    let registry = ProviderRegistry::assemble(
        default_providers(),
        Some(default_rule_source(reqwest::Client::new()).unwrap()),
    )
    .unwrap();
    let (_clock, cache) = cache_at_t0();
    let cache = Arc::new(cache);

    let provisioner = Arc::new(RecordingProvisioner::default());
    let state = RelationalStoreState::new(provisioner.clone(), false)
        .with_credentials(Arc::new(registry))
        .with_pool_states(cache.clone());
    let ctx = ExecutionContext::builder()
        .store_state(Box::new(state))
        .build();

    let mut req = request("sales");
    req.identity =
        Identity::new("alice").with_credential(Credential::username_password("alice", "pw"));
    let pool_name = ConnectionPoolStateCache::pool_name_for(&req.identity, &req.target.key());

    drop(relational(&ctx).acquire_connection(&req).await.unwrap());

    assert_eq!(
        common::calls(&provisioner.log),
        vec!["provision: alice@sales (username_password)"]
    );
    assert_eq!(cache.pools_for_principal("alice"), vec![pool_name.clone()]);

    let supplier = cache
        .credential_supplier(&pool_name)
        .registered()
        .flatten()
        .unwrap();
    let credential = supplier.supply(&req.identity).await.unwrap();
    assert_eq!(credential.kind().as_str(), "username_password");
}
