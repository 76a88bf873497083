//! Control plane against a real child process speaking over stdin/stdout

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_config::TetherConfig;
use tether_ipc::{ApiId, RewardResult, Status, VersionInfo};
use tether_runtime::ControlPlane;
use tokio::time::sleep;

fn config() -> TetherConfig {
    let mut config = TetherConfig::default();
    config.supervisor.executable = Some(PathBuf::from(env!("CARGO_BIN_EXE_tether-stub")));
    config.supervisor.identity = "shm-node-3".to_string();
    config.supervisor.terminate_grace = Duration::from_secs(2);
    config.registry.tick_interval = Duration::from_millis(100);
    config
}

async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_real_child_answers_calls() {
    tether_logging::init_test_tracing();
    let plane = ControlPlane::new(config()).unwrap();

    let versions: Arc<Mutex<Vec<(ApiId, Status, VersionInfo)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = versions.clone();
    plane.on_version(move |api_id, status, info| sink.lock().push((api_id, status, info)));

    let rewards: Arc<Mutex<Vec<(Status, RewardResult)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = rewards.clone();
    plane.on_reward(move |_, status, result| sink.lock().push((status, result)));

    plane.start().unwrap();
    assert!(eventually(|| plane.is_alive()).await);

    assert_eq!(plane.get_version(1), Status::Success);
    assert_eq!(plane.get_reward(2, 640, "v2"), Status::Success);
    assert!(eventually(|| versions.lock().len() == 1 && rewards.lock().len() == 1).await);

    let versions = versions.lock().clone();
    assert_eq!(versions[0].1, Status::Success);
    // The child received the identity as its argument
    assert_eq!(versions[0].2.version, "stub-1.0.0+shm-node-3");

    let rewards = rewards.lock().clone();
    assert_eq!(rewards[0].0, Status::Success);
    assert_eq!(rewards[0].1.height, 640);
    assert_eq!(rewards[0].1.rewards[0].amount, 6400);

    plane.stop().await.unwrap();
    assert!(!plane.is_alive());
}
