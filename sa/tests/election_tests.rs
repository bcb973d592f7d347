//! Integration tests for singleapp
//!
//! Most elections run on tokio's paused clock, so their timings are exact:
//! the runtime only advances time once all tasks are idle, which means all
//! in-flight messages are delivered before any window can elapse. The churn
//! tests at the end use a multi-threaded runtime and real time instead.

use std::time::Duration;

use singleapp::{ChannelHub, ElectionConfig, ElectionState, InstanceCoordinator, Role};
use tokio::time::{Instant, sleep};

const T: Duration = Duration::from_millis(100);

fn config(channel: &str) -> ElectionConfig {
    ElectionConfig {
        window_ms: T.as_millis() as u64,
        ..ElectionConfig::for_channel(channel)
    }
}

fn start(hub: &ChannelHub, config: &ElectionConfig) -> InstanceCoordinator {
    let coordinator = InstanceCoordinator::new(hub.clone(), config.clone());
    coordinator.initialize().expect("initialize should succeed inside a runtime");
    coordinator
}

fn primaries(coordinators: &[InstanceCoordinator]) -> usize {
    coordinators.iter().filter(|c| c.is_primary()).count()
}

// =============================================================================
// Single instance
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_lone_instance_becomes_primary_after_window() {
    let hub = ChannelHub::default();
    let a = start(&hub, &config("app-x"));

    sleep(T - Duration::from_millis(1)).await;
    assert!(!a.is_primary());
    assert_eq!(a.role(), Role::Unknown);

    sleep(Duration::from_millis(11)).await;
    assert!(a.is_primary());

    a.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_settled_resolves_when_window_ends() {
    let hub = ChannelHub::default();
    let began = Instant::now();
    let a = start(&hub, &config("app-x"));

    assert_eq!(a.settled().await, Role::Primary);
    assert!(began.elapsed() >= T);
    assert!(began.elapsed() < T * 2);

    a.shutdown().await;
}

// =============================================================================
// Late joiners
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_late_joiner_becomes_secondary() {
    let hub = ChannelHub::default();
    let cfg = config("app-x");

    let a = start(&hub, &cfg);
    sleep(T * 2).await;
    assert!(a.is_primary());

    let joined = Instant::now();
    let b = start(&hub, &cfg);
    assert_eq!(b.settled().await, Role::Secondary);
    // Settled by the answer, not by the window
    assert!(joined.elapsed() < T);

    sleep(T + Duration::from_millis(10)).await;
    assert!(!b.is_primary());
    assert!(a.is_primary());

    let snapshot = a.snapshot().await.unwrap();
    assert_eq!(snapshot.probes_answered, 1);

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_many_late_joiners_leave_one_primary() {
    let hub = ChannelHub::default();
    let cfg = config("app-x");

    let mut all = vec![start(&hub, &cfg)];
    sleep(T * 2).await;
    for _ in 0..5 {
        all.push(start(&hub, &cfg));
        sleep(Duration::from_millis(15)).await;
    }
    sleep(T * 2).await;

    assert_eq!(primaries(&all), 1);
    assert!(all[0].is_primary());
    assert!(all[1..].iter().all(|c| c.role() == Role::Secondary));

    for c in &all {
        c.shutdown().await;
    }
    assert_eq!(hub.channel_count(), 0);
}

// =============================================================================
// Simultaneous starts (best-effort, not guaranteed)
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_app_x_scenario_with_tie_break() {
    let hub = ChannelHub::default();
    let cfg = config("app-x");

    // A1 at t=0, A2 at t=5ms, both inside each other's window
    let a1 = start(&hub, &cfg);
    sleep(Duration::from_millis(5)).await;
    let a2 = start(&hub, &cfg);

    sleep(Duration::from_millis(90)).await; // t=95ms
    assert!(!a1.is_primary());

    sleep(Duration::from_millis(15)).await; // t=T+10ms
    assert!(a1.is_primary());
    // A2 heard A1's candidate reply and deferred to the lower id
    assert!(!a2.is_primary());
    assert_eq!(a2.role(), Role::Secondary);

    a2.shutdown().await;
    a1.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_without_tie_break_simultaneous_starts_can_both_win() {
    let hub = ChannelHub::default();
    let cfg = ElectionConfig {
        tie_break: false,
        ..config("app-x")
    };

    let a1 = start(&hub, &cfg);
    sleep(Duration::from_millis(5)).await;
    let a2 = start(&hub, &cfg);

    // Neither was primary when the other probed, so nobody answered
    sleep(T + Duration::from_millis(10)).await;
    assert!(a1.is_primary());
    assert!(a2.is_primary());

    a2.shutdown().await;
    a1.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_start_with_tie_break_has_one_primary() {
    let hub = ChannelHub::default();
    let cfg = config("app-x");

    let all: Vec<_> = (0..6).map(|_| start(&hub, &cfg)).collect();
    sleep(T + Duration::from_millis(10)).await;

    assert_eq!(primaries(&all), 1);
    assert!(all[0].is_primary());

    for c in &all {
        c.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_channels_do_not_interfere() {
    let hub = ChannelHub::default();
    let x = start(&hub, &config("app-x"));
    let y = start(&hub, &config("app-y"));

    sleep(T + Duration::from_millis(10)).await;
    assert!(x.is_primary());
    assert!(y.is_primary());

    x.shutdown().await;
    y.shutdown().await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_instance_after_primary_shutdown_becomes_primary() {
    let hub = ChannelHub::default();
    let cfg = config("app-x");

    let a = start(&hub, &cfg);
    sleep(T * 2).await;
    assert!(a.is_primary());

    a.shutdown().await;
    // Role survives shutdown
    assert!(a.is_primary());

    let c = start(&hub, &cfg);
    sleep(T + Duration::from_millis(10)).await;
    assert!(c.is_primary());

    c.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_secondary_stays_secondary_without_rejoin() {
    let hub = ChannelHub::default();
    let cfg = config("app-x");

    let a = start(&hub, &cfg);
    sleep(T * 2).await;
    let b = start(&hub, &cfg);
    b.settled().await;

    a.shutdown().await;
    sleep(T * 3).await;
    assert_eq!(b.role(), Role::Secondary);

    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent_in_every_state() {
    let hub = ChannelHub::default();
    let cfg = config("app-x");

    // Never initialized
    let idle = InstanceCoordinator::new(hub.clone(), cfg.clone());
    idle.shutdown().await;
    idle.shutdown().await;

    // Awaiting responses
    let waiting = start(&hub, &cfg);
    waiting.shutdown().await;
    waiting.shutdown().await;
    assert_eq!(waiting.role(), Role::Unknown);

    // Settled primary
    let primary = start(&hub, &cfg);
    sleep(T * 2).await;
    primary.shutdown().await;
    primary.shutdown().await;
    assert!(primary.is_primary());

    let snapshot = primary.snapshot().await.unwrap();
    assert!(!snapshot.running);
    assert_eq!(snapshot.state, ElectionState::Primary);
    assert_eq!(hub.channel_count(), 0);
}

// =============================================================================
// Re-election after graceful resignation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejoin_elects_oldest_secondary() {
    let hub = ChannelHub::default();
    let cfg = ElectionConfig {
        rejoin_on_resign: true,
        ..config("app-x")
    };

    let a = start(&hub, &cfg);
    sleep(T * 2).await;
    let b = start(&hub, &cfg);
    let c = start(&hub, &cfg);
    sleep(T * 2).await;
    assert!(a.is_primary());
    assert_eq!(b.role(), Role::Secondary);
    assert_eq!(c.role(), Role::Secondary);

    a.shutdown().await;
    sleep(T + Duration::from_millis(10)).await;

    assert!(b.is_primary());
    assert_eq!(c.role(), Role::Secondary);
    assert_eq!(b.snapshot().await.unwrap().elections, 2);

    // The new primary answers newcomers
    let d = start(&hub, &cfg);
    assert_eq!(d.settled().await, Role::Secondary);

    for x in [&b, &c, &d] {
        x.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_watch_role_sees_settle() {
    let hub = ChannelHub::default();
    let a = start(&hub, &config("app-x"));
    let mut role_rx = a.watch_role();

    role_rx.changed().await.unwrap();
    assert_eq!(*role_rx.borrow(), Role::Primary);

    a.shutdown().await;
}

// =============================================================================
// Churn on a multi-threaded runtime
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_newcomers_hear_primary_while_peers_churn() {
    // Room for every probe and candidate reply in the burst
    let hub = ChannelHub::new(4096);
    let cfg = ElectionConfig {
        window_ms: 250,
        ..ElectionConfig::for_channel("app-x")
    };

    let primary = start(&hub, &cfg);
    assert_eq!(primary.settled().await, Role::Primary);

    let mut workers = Vec::new();
    for _ in 0..4 {
        let hub = hub.clone();
        let cfg = cfg.clone();
        workers.push(tokio::spawn(async move {
            let mut roles = Vec::new();
            for _ in 0..6 {
                let newcomer = InstanceCoordinator::new(hub.clone(), cfg.clone());
                newcomer.initialize().unwrap();
                roles.push(newcomer.settled().await);
                newcomer.shutdown().await;
            }
            roles
        }));
    }

    for worker in workers {
        let roles = worker.await.unwrap();
        assert!(roles.iter().all(|role| *role == Role::Secondary), "roles: {:?}", roles);
    }
    assert!(primary.is_primary());

    primary.shutdown().await;
    assert_eq!(hub.channel_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channel_survives_open_close_races() {
    let hub = ChannelHub::default();
    let cfg = ElectionConfig {
        window_ms: 250,
        ..ElectionConfig::for_channel("app-x")
    };

    // Short-lived coordinators open and close the channel from many threads
    let mut churn = Vec::new();
    for _ in 0..8 {
        let hub = hub.clone();
        let cfg = cfg.clone();
        churn.push(tokio::spawn(async move {
            for _ in 0..50 {
                let c = InstanceCoordinator::new(hub.clone(), cfg.clone());
                c.initialize().unwrap();
                c.shutdown().await;
            }
        }));
    }
    for task in churn {
        task.await.unwrap();
    }

    // Whatever the interleaving, two fresh instances still see each other
    let first = start(&hub, &cfg);
    assert_eq!(first.settled().await, Role::Primary);
    let second = start(&hub, &cfg);
    assert_eq!(second.settled().await, Role::Secondary);

    second.shutdown().await;
    first.shutdown().await;
}
