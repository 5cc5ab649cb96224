// Engine run states and registration management.

mod common;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::SchedulerConfig;
use chrono::{DateTime, Utc, Weekday};
use cadence_scheduler::{
    EngineState, JobBuilder, JobKey, JobRegistry, JobTypeRef, SchedulerError, TriggerBuilder,
    TriggerKey,
};
use common::*;
use tokio::time::sleep;

fn slow_registry(overlap: &Overlap, delay: Duration) -> JobRegistry {
    let mut jobs = JobRegistry::new();
    let overlap = overlap.clone();
    jobs.register::<SlowJob, _>(move || {
        Ok(SlowJob {
            overlap: overlap.clone(),
            delay,
        })
    });
    jobs
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_after_shutdown_is_rejected() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let key = manager
        .schedule::<HelloJob>(|_| {}, forever_every_millis(1_000))
        .await
        .unwrap();
    manager.shutdown().await;
    assert!(manager.scheduler().is_shutdown());

    let err = manager
        .schedule::<GoodbyeJob>(|_| {}, forever_every_millis(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::EngineStopped));
    assert!(matches!(
        manager.start().await,
        Err(SchedulerError::EngineStopped)
    ));

    // Registrations outlive shutdown until removed.
    assert!(manager.scheduler().check_exists(&key).await);
    assert!(manager.delete(&key).await.unwrap());
    assert!(!manager.scheduler().check_exists(&key).await);

    // Idempotent.
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn no_fires_after_shutdown() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    manager
        .schedule::<HelloJob>(|_| {}, forever_every_millis(50))
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;
    manager.shutdown().await;

    let after_shutdown = load(&hello);
    assert!(after_shutdown >= 1);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(load(&hello), after_shutdown);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_waits_for_running_jobs() {
    let overlap = Overlap::default();
    let (manager, _) =
        manager_with(test_config(), slow_registry(&overlap, Duration::from_millis(400))).await;

    manager
        .schedule::<SlowJob>(|_| {}, every_millis(1_000, 0))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(load(&overlap.current), 1);

    manager.scheduler().shutdown(true).await;
    assert_eq!(load(&overlap.finished), 1);
    assert_eq!(load(&overlap.current), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_without_waiting_returns_immediately() {
    let overlap = Overlap::default();
    let (manager, _) =
        manager_with(test_config(), slow_registry(&overlap, Duration::from_millis(400))).await;

    manager
        .schedule::<SlowJob>(|_| {}, every_millis(1_000, 0))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    manager.scheduler().shutdown(false).await;
    assert_eq!(load(&overlap.finished), 0);

    // The in-flight run still completes on its own.
    sleep(Duration::from_millis(600)).await;
    assert_eq!(load(&overlap.finished), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_with_overrides_configured_wait() {
    let overlap = Overlap::default();
    let config = SchedulerConfig {
        wait_for_jobs_on_shutdown: true,
        ..test_config()
    };
    let (manager, _) =
        manager_with(config, slow_registry(&overlap, Duration::from_millis(400))).await;

    manager
        .schedule::<SlowJob>(|_| {}, every_millis(1_000, 0))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    manager.shutdown_with(false).await;
    assert!(manager.scheduler().is_shutdown());
    assert_eq!(load(&overlap.finished), 0);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(load(&overlap.finished), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn register_racing_shutdown_is_all_or_nothing() {
    for i in 0..20 {
        let hello = Arc::new(AtomicUsize::new(0));
        let goodbye = Arc::new(AtomicUsize::new(0));
        let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;
        let key = JobKey::new(format!("race-{i}"));

        let (registered, ()) = tokio::join!(
            manager.schedule::<HelloJob>(
                |job| {
                    job.with_identity(format!("race-{i}"));
                },
                forever_every_millis(1_000),
            ),
            manager.scheduler().shutdown(false),
        );

        assert!(manager.scheduler().is_shutdown());
        match registered {
            Ok(registered) => {
                assert_eq!(registered, key);
                assert!(manager.scheduler().check_exists(&key).await);
            }
            Err(err) => {
                assert!(matches!(err, SchedulerError::EngineStopped), "{err}");
                assert!(!manager.scheduler().check_exists(&key).await);
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn replaced_non_concurrent_job_never_overlaps_its_running_predecessor() {
    let overlap = Overlap::default();
    let (manager, observer) =
        manager_with(test_config(), slow_registry(&overlap, Duration::from_millis(400))).await;
    let non_concurrent = |job: &mut JobBuilder| {
        job.with_identity("replaced").disallow_concurrent_execution();
    };

    let key = manager
        .schedule::<SlowJob>(non_concurrent, every_millis(1_000, 0))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(load(&overlap.current), 1);

    manager
        .schedule::<SlowJob>(non_concurrent, forever_every_millis(50))
        .await
        .unwrap();
    assert!(manager.scheduler().is_running(&key));

    // The replacement's fires land while the first run is still going.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(load(&overlap.finished), 0);
    assert!(observer.skip_count() > 0);

    sleep(Duration::from_millis(300)).await;
    assert!(load(&overlap.finished) >= 1);

    manager.scheduler().shutdown(true).await;
    assert_eq!(load(&overlap.max), 1);
    assert_eq!(load(&overlap.current), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn far_future_start_registers_dormant() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let at_end = manager
        .schedule::<HelloJob>(
            |_| {},
            |t| {
                t.start_at(DateTime::<Utc>::MAX_UTC).with_daily_schedule(0, 0);
            },
        )
        .await
        .unwrap();
    let after_forever = manager
        .schedule::<GoodbyeJob>(
            |_| {},
            |t| {
                t.start_after(Duration::MAX)
                    .with_weekly_schedule(Weekday::Mon, 0, 0);
            },
        )
        .await
        .unwrap();

    let engine = manager.scheduler();
    for key in [&at_end, &after_forever] {
        assert!(engine.check_exists(key).await);
        assert_eq!(engine.next_fire_time(key).await, None);
    }
    assert_eq!(engine.state(), EngineState::Started);

    // The engine keeps serving after registering them.
    manager
        .schedule::<HelloJob>(
            |job| {
                job.with_identity("live");
            },
            every_millis(1_000, 0),
        )
        .await
        .unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(load(&hello), 1);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn standby_holds_fires_until_started() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let config = SchedulerConfig {
        auto_start: false,
        ..test_config()
    };
    let (manager, _) = manager_with(config, counting_registry(&hello, &goodbye)).await;
    assert_eq!(manager.scheduler().state(), EngineState::Standby);

    manager
        .schedule::<HelloJob>(|_| {}, forever_every_millis(100))
        .await
        .unwrap();
    sleep(Duration::from_millis(250)).await;
    assert_eq!(load(&hello), 0);

    manager.start().await.unwrap();
    manager.start().await.unwrap();
    sleep(Duration::from_millis(250)).await;
    let started_runs = load(&hello);
    assert!(started_runs >= 1);

    manager.scheduler().standby().await.unwrap();
    sleep(Duration::from_millis(30)).await;
    let paused_at = load(&hello);
    sleep(Duration::from_millis(350)).await;
    assert_eq!(load(&hello), paused_at);

    // Missed slots collapse into a single catch-up fire.
    manager.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(load(&hello), paused_at + 1);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn same_identity_replaces_registration() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    for trigger in ["first", "second"] {
        manager
            .schedule::<HelloJob>(
                |job| {
                    job.with_identity("HelloJobKey");
                },
                |t| {
                    t.with_identity(trigger)
                        .start_after(Duration::from_secs(60))
                        .with_simple_schedule(|s| s.with_repeat_count(0).build());
                },
            )
            .await
            .unwrap();
    }

    let engine = manager.scheduler();
    let key = JobKey::new("HelloJobKey");
    assert_eq!(engine.job_keys().await, vec![key.clone()]);
    assert_eq!(engine.trigger_keys(&key).await, vec![TriggerKey::new("second")]);
    assert_eq!(engine.status().await.job_count, 1);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_trigger_never_registers() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let err = manager
        .schedule::<HelloJob>(
            |job| {
                job.with_identity("HelloJobKey");
            },
            |t| {
                t.with_simple_schedule(|s| {
                    s.with_interval_in_seconds(1).with_repeat_count(-1).build()
                });
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRIGGER");

    let err = manager
        .schedule::<HelloJob>(
            |job| {
                job.with_identity("HelloJobKey");
            },
            |t| {
                t.start_now();
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRIGGER");

    assert!(!manager.scheduler().check_exists(&JobKey::new("HelloJobKey")).await);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(load(&hello), 0);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_keys_are_unique_across_jobs() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let shared = |t: &mut TriggerBuilder| {
        t.with_identity("shared")
            .start_after(Duration::from_secs(60))
            .with_simple_schedule(|s| s.with_repeat_count(0).build());
    };
    manager.schedule::<HelloJob>(|_| {}, shared).await.unwrap();
    let err = manager
        .schedule::<GoodbyeJob>(|_| {}, shared)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRIGGER");

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unschedule_last_trigger_removes_job() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let key = manager
        .schedule::<HelloJob>(
            |_| {},
            |t| {
                t.with_identity("tick").start_now().with_simple_schedule(|s| {
                    s.with_interval_in_milliseconds(50).repeat_forever().build()
                });
            },
        )
        .await
        .unwrap();
    sleep(Duration::from_millis(120)).await;

    assert!(manager.unschedule(&TriggerKey::new("tick")).await.unwrap());
    assert!(!manager.unschedule(&TriggerKey::new("tick")).await.unwrap());
    assert!(!manager.scheduler().check_exists(&key).await);

    // Let any firing already dispatched finish before sampling.
    sleep(Duration::from_millis(50)).await;
    let runs = load(&hello);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(load(&hello), runs);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn job_with_two_triggers_keeps_the_other() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let descriptor = JobBuilder::build_with(JobTypeRef::of::<HelloJob>(), |job| {
        job.with_identity("multi");
    })
    .unwrap();
    let later = |name: &'static str| {
        manager
            .trigger_builder()
            .build_with(move |t| {
                t.with_identity(name)
                    .start_after(Duration::from_secs(60))
                    .with_simple_schedule(|s| s.with_repeat_count(0).build());
            })
            .unwrap()
    };
    let key = manager
        .schedule_descriptor(descriptor, vec![later("a"), later("b")])
        .await
        .unwrap();

    assert!(manager.unschedule(&TriggerKey::new("a")).await.unwrap());
    assert!(manager.scheduler().check_exists(&key).await);
    assert_eq!(
        manager.scheduler().trigger_keys(&key).await,
        vec![TriggerKey::new("b")]
    );

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reschedule_swaps_the_trigger() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let key = manager
        .schedule::<HelloJob>(
            |_| {},
            |t| {
                t.with_identity("later")
                    .start_after(Duration::from_secs(60))
                    .with_simple_schedule(|s| s.with_repeat_count(0).build());
            },
        )
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(load(&hello), 0);

    let swapped = manager
        .reschedule(&TriggerKey::new("later"), |t| {
            t.with_identity("now")
                .start_now()
                .with_simple_schedule(|s| s.with_repeat_count(0).build());
        })
        .await
        .unwrap();
    assert!(swapped);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(load(&hello), 1);
    assert_eq!(
        manager.scheduler().trigger_keys(&key).await,
        vec![TriggerKey::new("now")]
    );

    let missing = manager
        .reschedule(&TriggerKey::new("later"), |t| {
            t.with_simple_schedule(|s| s.with_repeat_count(0).build());
        })
        .await
        .unwrap();
    assert!(!missing);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_stops_future_fires() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let key = manager
        .schedule::<HelloJob>(|_| {}, forever_every_millis(50))
        .await
        .unwrap();
    sleep(Duration::from_millis(120)).await;

    assert!(manager.delete(&key).await.unwrap());
    assert!(!manager.delete(&key).await.unwrap());
    assert!(manager.scheduler().job_keys().await.is_empty());

    sleep(Duration::from_millis(50)).await;
    let runs = load(&hello);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(load(&hello), runs);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reflects_engine() {
    let hello = Arc::new(AtomicUsize::new(0));
    let goodbye = Arc::new(AtomicUsize::new(0));
    let (manager, _) = manager_with(test_config(), counting_registry(&hello, &goodbye)).await;

    let status = manager.scheduler().status().await;
    assert_eq!(status.instance_name, "test");
    assert_eq!(status.state, EngineState::Started);
    assert_eq!(status.job_count, 0);
    assert_eq!(manager.scheduler().name(), "test");

    manager.shutdown().await;
    assert_eq!(manager.scheduler().status().await.state, EngineState::ShutDown);
}
