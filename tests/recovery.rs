#![cfg(test)]

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use gtreset::gtreset_core::{EngineId, EngineMask, Platform};
use gtreset::gtreset_hw::{regs, Hardware};
use gtreset::{
    BanPolicy, Client, Context, FenceError, RequestState, ResetError, ResetEvent, ResetOutcome,
    ResetPolicy, SubmitError,
};


mod tests {
    use super::*;
    use test_utils::{fast_policy, sim_device, sim_device_with_hooks, RecordingHooks};

    #[test]
    fn engine_reset_on_healthy_device() {
        let (hw, device) = sim_device(Platform::Skylake, fast_policy());
        let context = Context::new(&Client::new("client"), "ctx");
        let rq = device.submit(EngineId::Rcs0, &context).unwrap();

        let report = device
            .handle_error(EngineId::Rcs0.into(), false, "watchdog")
            .unwrap();

        assert_eq!(report.outcome, ResetOutcome::EngineReset);
        assert!(report.escalated.is_empty());
        assert_eq!(report.hw_attempts, 0);
        assert_eq!(rq.state(), RequestState::Skipped);
        assert!(!device.is_wedged());
        assert_eq!(device.reset_count(), 0);
        assert_eq!(hw.reset_requests(), 1);
        assert_eq!(device.forcewake().count(), 0);

        // The bit was released, a second pass is free to take it
        assert!(device.reset_single_engine(EngineId::Rcs0, "again").is_ok());
    }

    #[test]
    fn full_reset_without_engine_reset() {
        let hooks = RecordingHooks::new();
        let (hw, device) = sim_device_with_hooks(Platform::Haswell, fast_policy(), hooks.clone());
        let events = device.notifications().channel();
        let guilty = Context::new(&Client::new("guilty"), "ctx");
        let media = Context::new(&Client::new("media"), "ctx");
        let bystander = Context::new(&Client::new("bystander"), "ctx");

        let hung = device.submit(EngineId::Rcs0, &guilty).unwrap();
        let hung_media = device.submit(EngineId::Vcs0, &media).unwrap();
        let innocent = device.submit(EngineId::Bcs0, &bystander).unwrap();
        let mask = EngineId::Rcs0 | EngineId::Vcs0;

        let report = device.handle_error(mask, true, "render hang").unwrap();
        device.flush_restart();

        assert!(!device.is_engine_reset_supported());
        assert_eq!(report.outcome, ResetOutcome::FullReset);
        assert_eq!(report.escalated, mask);
        assert_eq!(report.hw_attempts, 1);
        assert_eq!(hw.reset_requests(), 1);
        assert_eq!(hooks.full_resets(), 1);
        assert_eq!(hooks.workarounds.load(Ordering::SeqCst), 1);
        assert_eq!(
            hooks.captures.lock().unwrap().as_slice(),
            &[(mask, "render hang".to_string())]
        );

        assert_eq!(hung.wait(Duration::ZERO), Err(FenceError::Io));
        assert_eq!(guilty.guilty_count(), 1);
        assert_eq!(guilty.ban_score(), 10);
        assert!(!guilty.is_banned());

        // Both named engines were hung, both active requests are blamed
        assert_eq!(hung_media.wait(Duration::ZERO), Err(FenceError::Io));
        assert_eq!(hung_media.state(), RequestState::Skipped);
        assert_eq!(media.guilty_count(), 1);
        assert_eq!(media.ban_score(), 10);
        assert!(!media.is_banned());
        assert_eq!(
            device.submit(EngineId::Vcs0, &media).unwrap().state(),
            RequestState::Submitted
        );

        // Bcs0 was not named, so its request is replayed rather than blamed
        assert_eq!(innocent.state(), RequestState::Submitted);
        assert_eq!(innocent.error(), Some(FenceError::Again));
        assert_eq!(bystander.guilty_count(), 0);
        assert_eq!(bystander.active_count(), 1);

        let events: Vec<ResetEvent> = events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ResetEvent::ErrorDetected {
                    reason: "render hang".to_string()
                },
                ResetEvent::ResetStarting,
                ResetEvent::ResetFinished,
            ]
        );
    }

    #[test]
    fn restart_job_loads_kernel_context() {
        let (_hw, device) = sim_device(Platform::Broadwell, fast_policy());
        device.full_reset(EngineMask::EMPTY, "resume").unwrap();
        device.flush_restart();

        for engine in device.engines() {
            let active = engine.active_request().unwrap();
            assert!(std::sync::Arc::ptr_eq(
                active.context(),
                device.kernel_context()
            ));
        }
    }

    #[test]
    fn retries_exhausted_wedges_device() {
        let hooks = RecordingHooks::new();
        let policy = ResetPolicy {
            reset_level: 1,
            ..fast_policy()
        };
        let (hw, device) = sim_device_with_hooks(Platform::Broadwell, policy, hooks.clone());
        let context = Context::new(&Client::new("client"), "ctx");
        let rq = device.submit(EngineId::Vcs0, &context).unwrap();
        hw.inject_ack_timeouts(u32::MAX);

        let report = device
            .handle_error(EngineId::Vcs0.into(), false, "hang")
            .unwrap();

        assert_eq!(report.outcome, ResetOutcome::Wedged);
        assert_eq!(report.hw_attempts, 3);
        assert!(device.reset_count() >= 1);
        assert!(device.is_wedged());
        assert!(device.is_tainted());
        assert_eq!(hooks.taints.load(Ordering::SeqCst), 1);
        assert_eq!(rq.wait(Duration::ZERO), Err(FenceError::Io));

        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(
                device.submit(EngineId::Rcs0, &context).unwrap_err(),
                SubmitError::DeviceLost
            );
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn retry_recovers_from_transient_timeout() {
        let policy = ResetPolicy {
            reset_level: 1,
            ..fast_policy()
        };
        let (hw, device) = sim_device(Platform::Sandybridge, policy);
        let context = Context::new(&Client::new("client"), "ctx");
        device.submit(EngineId::Rcs0, &context).unwrap();
        hw.inject_ack_timeouts(2);

        let report = device
            .handle_error(EngineId::Rcs0.into(), false, "hang")
            .unwrap();
        device.flush_restart();

        assert_eq!(report.outcome, ResetOutcome::FullReset);
        assert_eq!(report.hw_attempts, 3);
        assert!(!device.is_wedged());
        assert!(!device.is_tainted());
    }

    #[test]
    fn repeated_hangs_ban_context() {
        let policy = ResetPolicy {
            ban: BanPolicy {
                ban_threshold: 20,
                ..Default::default()
            },
            ..fast_policy()
        };
        let (_hw, device) = sim_device(Platform::Skylake, policy);
        let client = Client::new("client");
        let context = Context::new(&client, "ctx");
        let other = Context::new(&Client::new("other"), "ctx");

        let first = device.submit(EngineId::Rcs0, &context).unwrap();
        let second = device.submit(EngineId::Rcs0, &context).unwrap();
        let bystander = device.submit(EngineId::Rcs0, &other).unwrap();
        let third = device.submit(EngineId::Rcs0, &context).unwrap();
        let deferred = device.submit_deferred(EngineId::Rcs0, &context).unwrap();

        let mut scores = vec![context.ban_score()];
        for _ in 0..2 {
            device
                .handle_error(EngineId::Rcs0.into(), false, "hang")
                .unwrap();
            scores.push(context.ban_score());
        }

        assert!(scores.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(context.is_banned());
        assert_eq!(first.error(), Some(FenceError::Io));
        assert_eq!(second.error(), Some(FenceError::Io));
        assert_eq!(third.state(), RequestState::Skipped);
        assert_eq!(deferred.state(), RequestState::Skipped);
        assert_eq!(bystander.state(), RequestState::Submitted);
        assert_eq!(bystander.error(), None);

        // Second hang was fast, and it got the context banned
        let policy = device.scorer().policy();
        assert_eq!(
            client.ban_score(),
            policy.client_fast_hang_penalty + policy.client_context_ban_penalty
        );
        assert_eq!(
            device.submit(EngineId::Rcs0, &context).unwrap_err(),
            SubmitError::ContextBanned
        );
    }

    #[test]
    fn failed_single_engine_reset_escalates() {
        let hooks = RecordingHooks::new();
        let (hw, device) = sim_device_with_hooks(Platform::Skylake, fast_policy(), hooks.clone());
        let context = Context::new(&Client::new("client"), "ctx");
        device.submit(EngineId::Bcs0, &context).unwrap();

        hw.inject_not_ready(EngineId::Bcs0, 1);
        assert!(matches!(
            device.reset_single_engine(EngineId::Bcs0, "timeout"),
            Err(ResetError::Hardware(_))
        ));

        let report = device
            .handle_error(EngineId::Bcs0.into(), false, "hang")
            .unwrap();
        device.flush_restart();

        assert_eq!(report.outcome, ResetOutcome::FullReset);
        assert!(report.engines_reset.is_empty());
        assert_eq!(hooks.full_resets(), 1);
        assert_eq!(device.reset_count(), 1);
    }

    #[test]
    fn hang_clear_fallback() {
        let policy = ResetPolicy {
            hang_clear_timeout_ms: Some(5),
            ..fast_policy()
        };
        let (_hw, device) = sim_device(Platform::I830, policy);
        let context = Context::new(&Client::new("client"), "ctx");
        let rq = device.submit(EngineId::Rcs0, &context).unwrap();

        let report = device.handle_error(EngineMask::ALL, false, "hang").unwrap();

        assert_eq!(report.outcome, ResetOutcome::Wedged);
        assert!(!device.is_tainted());
        assert_eq!(rq.wait(Duration::ZERO), Err(FenceError::Io));
    }

    #[test]
    fn clear_wedged_is_idempotent() {
        let (_hw, device) = sim_device(Platform::Skylake, fast_policy());
        let events = device.notifications().channel();

        assert!(device.clear_wedged().is_ok());
        assert!(device.clear_wedged().is_ok());
        assert!(!device.is_wedged());
        assert_eq!(events.try_iter().count(), 0);
    }

    #[test]
    fn engine_reset_refused_while_wedged() {
        let (hw, device) = sim_device(Platform::Skylake, fast_policy());
        let context = Context::new(&Client::new("client"), "ctx");
        device.submit(EngineId::Rcs0, &context).unwrap();

        device.set_wedged();
        let resets = hw.reset_requests();
        let engine_resets = device.engine(EngineId::Rcs0).unwrap().reset_count();

        for _ in 0..2 {
            assert!(matches!(
                device.reset_single_engine(EngineId::Rcs0, "timeout"),
                Err(ResetError::Wedged)
            ));
        }
        assert!(device.is_wedged());
        assert_eq!(hw.reset_requests(), resets);
        assert_eq!(
            device.engine(EngineId::Rcs0).unwrap().reset_count(),
            engine_resets
        );

        // The engine bit was never taken, so recovery is not held up
        device.clear_wedged().unwrap();
        device.submit(EngineId::Rcs0, &context).unwrap();
        device.reset_single_engine(EngineId::Rcs0, "timeout").unwrap();
        assert_eq!(
            device.engine(EngineId::Rcs0).unwrap().reset_count(),
            engine_resets + 1
        );
    }

    #[test]
    fn clear_wedged_drains_waiters() {
        let (_hw, device) = sim_device(Platform::Skylake, fast_policy());
        let context = Context::new(&Client::new("client"), "ctx");

        let requests: Vec<_> = [EngineId::Rcs0, EngineId::Vcs0, EngineId::Bcs0]
            .into_iter()
            .map(|engine| device.submit(engine, &context).unwrap())
            .collect();
        let waiters: Vec<_> = requests
            .iter()
            .cloned()
            .map(|rq| std::thread::spawn(move || rq.wait(Duration::from_secs(5))))
            .collect();

        device.set_wedged();
        device.clear_wedged().unwrap();

        for rq in requests.iter() {
            assert!(rq.is_signalled());
        }
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(FenceError::Io));
        }
        assert!(device.submit(EngineId::Rcs0, &context).is_ok());
    }

    #[test]
    fn full_reset_unwedges_first() {
        let (_hw, device) = sim_device(Platform::Skylake, fast_policy());
        let events = device.notifications().channel();
        device.set_wedged();

        device.full_reset(EngineMask::EMPTY, "resume").unwrap();
        device.flush_restart();

        assert!(!device.is_wedged());
        let events: Vec<ResetEvent> = events.try_iter().collect();
        assert_eq!(events, vec![ResetEvent::Wedged, ResetEvent::Unwedged]);
    }

    #[test]
    fn watchdog_wedges_stuck_reset() {
        let hooks = RecordingHooks::new();
        hooks.init_delay_ms.store(1_000, Ordering::SeqCst);
        let policy = ResetPolicy {
            reset_level: 1,
            watchdog_timeout_ms: 100,
            ..fast_policy()
        };
        let (_hw, device) = sim_device_with_hooks(Platform::Skylake, policy, hooks.clone());
        let context = Context::new(&Client::new("client"), "ctx");
        device.submit(EngineId::Rcs0, &context).unwrap();

        let report = device
            .handle_error(EngineId::Rcs0.into(), false, "hang")
            .unwrap();

        assert_eq!(report.outcome, ResetOutcome::Wedged);
        assert!(device.is_wedged());
        assert!(!device.is_tainted());
        assert_eq!(hooks.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn address_mapping_failure_wedges() {
        let hooks = RecordingHooks::new();
        hooks.fail_address_mapping.store(true, Ordering::SeqCst);
        let policy = ResetPolicy {
            reset_level: 1,
            ..fast_policy()
        };
        let (_hw, device) = sim_device_with_hooks(Platform::Skylake, policy, hooks.clone());

        assert!(matches!(
            device.full_reset(EngineMask::ALL, "resume"),
            Err(ResetError::Wedged)
        ));
        assert!(device.is_wedged());
        assert_eq!(hooks.taints.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn init_failure_wedges() {
        let hooks = RecordingHooks::new();
        hooks.fail_init.store(true, Ordering::SeqCst);
        let (_hw, device) = sim_device_with_hooks(Platform::Skylake, fast_policy(), hooks);

        assert!(matches!(
            device.full_reset(EngineMask::EMPTY, "resume"),
            Err(ResetError::Wedged)
        ));
        assert!(device.is_wedged());
    }

    #[test]
    fn fences_survive_full_reset() {
        let (hw, device) = sim_device(Platform::G4x, fast_policy());
        assert!(device.set_fence(0, 0x0001_0001));
        assert!(device.set_fence(15, 0xdead_0000));

        device.full_reset(EngineMask::EMPTY, "resume").unwrap();
        device.flush_restart();

        assert_eq!(device.stats().capability, "g4x");
        assert_eq!(hw.read32(regs::fence_reg(0)), 0x0001_0001);
        assert_eq!(hw.read32(regs::fence_reg(15)), 0xdead_0000);
        assert_eq!(hw.read32(regs::fence_reg(3)), 0);
    }

    #[test]
    fn stats_report_resets() {
        let (_hw, device) = sim_device(Platform::Icelake, fast_policy());
        let context = Context::new(&Client::new("client"), "ctx");
        device.submit(EngineId::Vcs2, &context).unwrap();

        device
            .handle_error(EngineId::Vcs2.into(), false, "hang")
            .unwrap();

        let stats = device.stats();
        assert_eq!(stats.capability, "gen11");
        let vcs2 = stats
            .engines
            .iter()
            .find(|stats| stats.engine == EngineId::Vcs2)
            .unwrap();
        assert_eq!(vcs2.reset_count, 1);
        assert_eq!(vcs2.hw_seqno, 1);
    }
}
