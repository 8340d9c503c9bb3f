#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use checkout_split::checkout::{Attribution, PlanUrls};
use checkout_split::cycle::lock::{LockPolicy, LockStrategy};
use checkout_split::{
    CheckoutResolver, CycleAssignmentService, MemoryStore, Plan, ServiceSettings,
};

fn resolver() -> CheckoutResolver {
    CheckoutResolver {
        primary: PlanUrls {
            annual: "https://primary.example.com/annual".to_string(),
            monthly: "https://primary.example.com/monthly".to_string(),
        },
        secondary: PlanUrls {
            annual: "https://secondary.example.com/annual".to_string(),
            monthly: "https://secondary.example.com/monthly".to_string(),
        },
    }
}

/// Patient lock policy: enough attempts that no caller falls back.
fn patient_settings(strategy: LockStrategy) -> ServiceSettings {
    ServiceSettings {
        lock: LockPolicy {
            strategy,
            max_attempts: 200,
            confirm_delay: Duration::from_millis(2),
            backoff_step: Duration::from_millis(1),
            ..LockPolicy::default()
        },
        ..ServiceSettings::default()
    }
}

async fn run_concurrent(
    service: Arc<CycleAssignmentService<Arc<MemoryStore>>>,
    tasks: usize,
) -> Vec<checkout_split::AssignmentResult> {
    let mut handles = Vec::new();
    for _ in 0..tasks {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .assign(Plan::Annual, &Attribution::new())
                .await
                .unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

/// Concurrent callers with compare-and-swap each get a distinct slot, and the
/// counter advances exactly once per coordinated assignment.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_compare_and_swap_hands_out_distinct_slots() {
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(1)));
    let service = Arc::new(
        CycleAssignmentService::new(
            Arc::clone(&store),
            patient_settings(LockStrategy::CompareAndSwap),
            resolver(),
        )
        .unwrap(),
    );
    service.ensure_state().await.unwrap();

    let results = run_concurrent(Arc::clone(&service), 8).await;

    let mut indices: Vec<u32> = results
        .iter()
        .filter_map(|r| r.cycle_info.map(|info| info.cycle_index))
        .collect();
    indices.sort_unstable();
    let coordinated = u32::try_from(indices.len()).unwrap();
    assert_eq!(indices, (0..coordinated).collect::<Vec<_>>());

    let state = service.state().await.unwrap().unwrap();
    assert_eq!(state.cycle_index, coordinated);
    assert!(!state.locked);
}

/// Fallback and coordinated assignments together account for every caller,
/// even with an impatient lock policy.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_impatient_callers_fall_back_without_losing_requests() {
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(5)));
    let settings = ServiceSettings {
        lock: LockPolicy {
            max_attempts: 1,
            ..LockPolicy::default()
        },
        ..ServiceSettings::default()
    };
    let service =
        Arc::new(CycleAssignmentService::new(Arc::clone(&store), settings, resolver()).unwrap());
    service.ensure_state().await.unwrap();

    let results = run_concurrent(Arc::clone(&service), 6).await;
    assert_eq!(results.len(), 6);

    let coordinated = results.iter().filter(|r| !r.used_fallback).count();
    assert!(coordinated >= 1);
    for result in results.iter().filter(|r| r.used_fallback) {
        assert!(result.cycle_info.is_none());
        assert_eq!(result.split_version, "cycle-80-20-fallback");
    }

    let state = service.state().await.unwrap().unwrap();
    assert_eq!(state.cycle_index, u32::try_from(coordinated).unwrap());
    assert!(!state.locked);
}

/// The double-check strategy still serializes callers when the confirm delay
/// outlasts the store round trip.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_check_advances_once_per_coordinated_call() {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(
        CycleAssignmentService::new(
            Arc::clone(&store),
            patient_settings(LockStrategy::DoubleCheck),
            resolver(),
        )
        .unwrap(),
    );
    service.ensure_state().await.unwrap();

    let results = run_concurrent(Arc::clone(&service), 5).await;

    let coordinated = results.iter().filter(|r| !r.used_fallback).count();
    assert_eq!(coordinated, 5);
    let state = service.state().await.unwrap().unwrap();
    assert_eq!(state.cycle_index, 5);
    assert!(!state.locked);
}
