//! Stress tests for process-sandbox supervision
//!
//! These tests hammer the termination paths with concurrent callers and
//! many short-lived sandboxes.

use process_sandbox::{LaunchMode, Sandbox, SandboxBuilder, SandboxState, SpecialExitCode};
use std::io::Cursor;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

static STRESS_TEST_LOCK: Mutex<()> = Mutex::new(());

fn shell(script: &str) -> SandboxBuilder {
    SandboxBuilder::new("/bin/sh")
        .args(["-c", script])
        .launch_mode(LaunchMode::Direct)
}

/// Test many short runs in sequence
#[test]
fn stress_rapid_sequential_runs() {
    let _lock = STRESS_TEST_LOCK.lock();

    for i in 0..25 {
        let stats = shell(&format!("exit {}", i % 5))
            .total_timeout(Duration::from_secs(10))
            .build()
            .expect("Should build")
            .run();
        assert_eq!(stats.exit_code, Some(i % 5));
        assert!(stats.self_completion);
    }
}

/// Test concurrent terminate calls settle exactly one code
#[test]
fn stress_concurrent_terminate() {
    let _lock = STRESS_TEST_LOCK.lock();

    for _ in 0..5 {
        let sandbox: Arc<Sandbox> = Arc::new(shell("sleep 5").build().unwrap());
        let future = sandbox.start();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sandbox = Arc::clone(&sandbox);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    sandbox.terminate(100 + i)
                })
            })
            .collect();

        let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winner = results[0];
        assert!(results.iter().all(|code| *code == winner));
        assert!((100..108).contains(&winner));
        assert_eq!(futures::executor::block_on(future), winner);
        assert_eq!(sandbox.state(), SandboxState::Terminated);
    }
}

/// Test parallel sandboxes with different limits do not interfere
#[test]
fn stress_parallel_sandboxes() {
    let _lock = STRESS_TEST_LOCK.lock();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            thread::spawn(move || {
                let builder = if i % 2 == 0 {
                    shell("printf ok")
                } else {
                    shell("sleep 5").total_timeout(Duration::from_millis(300))
                };
                (i, builder.build().unwrap().run())
            })
        })
        .collect();

    for handle in handles {
        let (i, stats) = handle.join().unwrap();
        if i % 2 == 0 {
            assert_eq!(stats.exit_code, Some(0));
            assert_eq!(stats.stdout_length, 2);
        } else {
            assert_eq!(
                stats.exit_code,
                Some(SpecialExitCode::TotalTimeout.code())
            );
        }
    }
}

/// Test large output through a small limit
#[test]
fn stress_large_output_with_limit() {
    let _lock = STRESS_TEST_LOCK.lock();

    let stats = shell("i=0; while [ $i -lt 2000 ]; do echo 0123456789012345678901234567890123456789; i=$((i+1)); done")
        .stdout_limit(1000)
        .total_timeout(Duration::from_secs(30))
        .build()
        .unwrap()
        .run();

    assert_eq!(stats.exit_code, Some(0));
    assert_eq!(stats.stdout_length, 1000);
    assert!(stats.stdout_limit_exceeded);
}

/// Test large stdin that the child consumes fully
#[test]
fn stress_large_input_is_consumed() {
    let _lock = STRESS_TEST_LOCK.lock();

    let input = "y".repeat(512 * 1024);
    let stats = shell("wc -c")
        .stdin(Cursor::new(input))
        .total_timeout(Duration::from_secs(30))
        .build()
        .unwrap()
        .run();

    assert_eq!(stats.exit_code, Some(0));
    assert!(stats.stdout_length > 0);
}

/// Test dropping running sandboxes kills their children
#[test]
fn stress_drop_running_sandboxes() {
    let _lock = STRESS_TEST_LOCK.lock();

    for _ in 0..10 {
        let sandbox = shell("sleep 5").build().unwrap();
        let future = sandbox.start();
        drop(sandbox);
        assert_eq!(
            futures::executor::block_on(future),
            SpecialExitCode::UnexpectedError.code()
        );
    }
}
