// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use gtreset_core::{EngineId, EngineMask, HwResetError, Platform};
use gtreset_hw::regs::{self, NUM_FENCES};
use gtreset_hw::{ring, Hardware, ResetCapability, WaitMode};
use serde::Serialize;

use crate::config::ResetPolicy;
use crate::engine::{Engine, SubmitMode};
use crate::error::SubmitError;
use crate::flags::ResetFlags;
use crate::forcewake::Forcewake;
use crate::guilt::GuiltScorer;
use crate::hooks::{DeviceHooks, NoHooks};
use crate::lock;
use crate::notify::{NotificationBus, ResetObserver};
use crate::request::{Context, Request};

/// Shadow of the fence registers, reprogrammed after every whole device
/// reset.
pub(crate) struct FenceTable {
    values: [u32; NUM_FENCES],
}

impl FenceTable {
    pub fn revoke(&self, hw: &dyn Hardware) {
        for index in 0..self.values.len() {
            hw.write32(regs::fence_reg(index), 0);
        }
    }

    pub fn restore(&self, hw: &dyn Hardware) {
        for (index, value) in self.values.iter().enumerate() {
            hw.write32(regs::fence_reg(index), *value);
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub engine: EngineId,
    pub reset_count: u64,
    pub hw_seqno: u32,
    pub last_seqno: u32,
    pub mode: SubmitMode,
}

/// Read-only diagnostics.
#[derive(Clone, Debug, Serialize)]
pub struct ResetStats {
    pub platform: Platform,
    pub capability: &'static str,
    pub reset_count: u64,
    pub wedged: bool,
    pub tainted: bool,
    pub engines: Vec<EngineStats>,
}

pub struct Device {
    pub(crate) me: Weak<Device>,
    pub(crate) platform: Platform,
    pub(crate) hw: Arc<dyn Hardware>,
    pub(crate) engines: Vec<Engine>,
    pub(crate) engine_mask: EngineMask,
    pub(crate) policy: ResetPolicy,
    pub(crate) capability: ResetCapability,
    pub(crate) hooks: Arc<dyn DeviceHooks>,
    pub(crate) bus: NotificationBus,
    pub(crate) forcewake: Forcewake,
    pub(crate) scorer: GuiltScorer,
    pub(crate) flags: ResetFlags,
    pub(crate) fences: Mutex<FenceTable>,
    /// Serializes wedging against unwedging.
    pub(crate) wedge_lock: Mutex<()>,
    pub(crate) kernel_context: Arc<Context>,
    pub(crate) restart_pending: AtomicBool,
    pub(crate) restart: Mutex<Option<JoinHandle<()>>>,
    reset_count: AtomicU64,
    tainted: AtomicBool,
    engine_reset_failed: AtomicU32,
    recovery_allowed: AtomicBool,
}

impl Device {
    pub fn new(platform: Platform, hw: Arc<dyn Hardware>, policy: ResetPolicy) -> Arc<Self> {
        Self::with_hooks(platform, hw, policy, Arc::new(NoHooks))
    }

    pub fn with_hooks(
        platform: Platform,
        hw: Arc<dyn Hardware>,
        policy: ResetPolicy,
        hooks: Arc<dyn DeviceHooks>,
    ) -> Arc<Self> {
        let engine_mask = platform.engines();
        let capability =
            ResetCapability::resolve(platform, policy.reset_level, &policy.op_config(engine_mask));
        tracing::debug!(
            "{platform}: engines {engine_mask}, reset strategy {}",
            capability.name()
        );

        Arc::new_cyclic(|me| Device {
            me: me.clone(),
            platform,
            forcewake: Forcewake::new(hw.clone()),
            hw,
            engines: engine_mask.iter().map(Engine::new).collect(),
            engine_mask,
            scorer: GuiltScorer::new(policy.ban.clone()),
            policy,
            capability,
            hooks,
            bus: NotificationBus::default(),
            flags: ResetFlags::new(),
            fences: Mutex::new(FenceTable {
                values: [0; NUM_FENCES],
            }),
            wedge_lock: Mutex::new(()),
            kernel_context: Context::kernel(),
            restart_pending: AtomicBool::new(false),
            restart: Mutex::new(None),
            reset_count: AtomicU64::new(0),
            tainted: AtomicBool::new(false),
            engine_reset_failed: AtomicU32::new(0),
            recovery_allowed: AtomicBool::new(true),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn hardware(&self) -> &dyn Hardware {
        self.hw.as_ref()
    }

    pub fn policy(&self) -> &ResetPolicy {
        &self.policy
    }

    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }

    pub fn engine_mask(&self) -> EngineMask {
        self.engine_mask
    }

    pub fn engine(&self, id: EngineId) -> Option<&Engine> {
        self.engines.iter().find(|engine| engine.id() == id)
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn subscribe(&self, observer: Arc<dyn ResetObserver>) {
        self.bus.subscribe(observer);
    }

    pub fn scorer(&self) -> &GuiltScorer {
        &self.scorer
    }

    pub fn forcewake(&self) -> &Forcewake {
        &self.forcewake
    }

    /// Context used by the driver itself, never banned.
    pub fn kernel_context(&self) -> &Arc<Context> {
        &self.kernel_context
    }

    pub fn is_wedged(&self) -> bool {
        self.flags.is_wedged()
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::SeqCst)
    }

    /// Number of whole device resets started.
    pub fn reset_count(&self) -> u64 {
        self.reset_count.load(Ordering::SeqCst)
    }

    /// When disabled, [`Device::handle_error`] refuses to start a new pass.
    pub fn set_recovery_allowed(&self, allowed: bool) {
        self.recovery_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn is_recovery_allowed(&self) -> bool {
        self.recovery_allowed.load(Ordering::SeqCst)
    }

    pub fn set_fence(&self, index: usize, value: u32) -> bool {
        let mut fences = lock(&self.fences);
        match fences.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                self.hw.write32(regs::fence_reg(index), value);
                true
            }
            None => false,
        }
    }

    pub fn fence(&self, index: usize) -> Option<u32> {
        lock(&self.fences).values.get(index).copied()
    }

    pub fn submit(
        &self,
        engine: EngineId,
        context: &Arc<Context>,
    ) -> Result<Arc<Request>, SubmitError> {
        self.create_request(engine, context, true)
    }

    /// Queues a request whose dependencies have not signalled yet; it runs
    /// once [`Engine::release`] is called for it.
    pub fn submit_deferred(
        &self,
        engine: EngineId,
        context: &Arc<Context>,
    ) -> Result<Arc<Request>, SubmitError> {
        self.create_request(engine, context, false)
    }

    fn create_request(
        &self,
        id: EngineId,
        context: &Arc<Context>,
        ready: bool,
    ) -> Result<Arc<Request>, SubmitError> {
        if self.is_wedged() {
            return Err(SubmitError::DeviceLost);
        }
        if context.is_banned() {
            return Err(SubmitError::ContextBanned);
        }
        if let Some(client) = context.client() {
            if self.scorer.is_client_banned(&client) {
                return Err(SubmitError::ClientBanned);
            }
        }

        let engine = self.engine(id).ok_or(SubmitError::UnknownEngine(id))?;
        let rq = Request::new(id, context.clone(), ready);
        engine.submit(rq.clone());
        Ok(rq)
    }

    pub fn stats(&self) -> ResetStats {
        ResetStats {
            platform: self.platform,
            capability: self.capability.name(),
            reset_count: self.reset_count(),
            wedged: self.is_wedged(),
            tainted: self.is_tainted(),
            engines: self
                .engines
                .iter()
                .map(|engine| EngineStats {
                    engine: engine.id(),
                    reset_count: engine.reset_count(),
                    hw_seqno: engine.hw_seqno(),
                    last_seqno: engine.last_seqno(),
                    mode: engine.mode(),
                })
                .collect(),
        }
    }

    pub(crate) fn bump_reset_count(&self) {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn taint(&self) {
        if !self.tainted.swap(true, Ordering::SeqCst) {
            tracing::error!("{}: tainting host after failed GPU recovery", self.platform);
        }
        self.hooks.taint();
    }

    pub(crate) fn engine_reset_failed(&self) -> EngineMask {
        EngineMask::from_bits(self.engine_reset_failed.load(Ordering::SeqCst))
    }

    pub(crate) fn mark_engine_reset_failed(&self, engine: EngineId) {
        self.engine_reset_failed
            .fetch_or(EngineMask::from(engine).bits(), Ordering::SeqCst);
    }

    pub(crate) fn clear_engine_reset_failed(&self) {
        self.engine_reset_failed.store(0, Ordering::SeqCst);
    }

    /// Stops the engines in `engines` and resets their hardware domains.
    pub(crate) fn gpu_reset(
        &self,
        engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        let _forcewake = self.forcewake.get();

        for engine in (engines & self.engine_mask).iter() {
            ring::park(self.hardware(), engine, self.policy.stop_timeout(), mode);
        }

        self.capability.reset(self.hardware(), engines, mode)
    }
}
