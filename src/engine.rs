//! The synchronization engine.
//!
//! One task owns every context and suspends in exactly one place: a
//! `select!` over the virtual-device event channel, the hotplug channel,
//! the shutdown token, and a timer armed to the soonest of any context's
//! debounce deadline and the next hardware poll tick. Everything between
//! wake-ups runs to completion, so context state needs no locking.
//!
//! Per context the engine is a two-state machine. Idle: nothing pending.
//! Debouncing: a pending level and its deadline are recorded, hardware
//! has not been told yet. Rapid slider drags keep replacing the pending
//! level, so only the final level of a burst reaches the modules.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::brightness::Level;
use crate::context::Context;
use crate::event::{Event, EventBus};
use crate::hotplug::HotplugEvent;
use crate::reconcile;
use crate::target::{TargetRegistry, format_targets};
use crate::transport::HardwareTransport;
use crate::uleds::VirtualBacklight;

/// One decoded brightness write from a context's virtual device.
#[derive(Debug, Clone, Copy)]
pub struct LedEvent {
    pub ctx: usize,
    pub raw: u32,
}

/// Engine timing knobs, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Quiet period after the last virtual write before hardware is told.
    pub debounce: Duration,
    /// Hardware read-back cadence; None disables the reverse path.
    pub poll: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    level: Level,
    deadline: Instant,
}

struct ContextState {
    context: Context,
    backlight: Arc<dyn VirtualBacklight>,
    pending: Option<Pending>,
}

pub struct SyncEngine {
    settings: EngineSettings,
    states: Vec<ContextState>,
    transport: Arc<dyn HardwareTransport>,
    registry: TargetRegistry,
    events: EventBus,
    led_rx: mpsc::Receiver<LedEvent>,
    hotplug_rx: mpsc::Receiver<HotplugEvent>,
    hotplug_live: bool,
    next_poll: Option<Instant>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: EngineSettings,
        contexts: Vec<(Context, Arc<dyn VirtualBacklight>)>,
        transport: Arc<dyn HardwareTransport>,
        registry: TargetRegistry,
        events: EventBus,
        led_rx: mpsc::Receiver<LedEvent>,
        hotplug_rx: mpsc::Receiver<HotplugEvent>,
    ) -> Self {
        Self {
            settings,
            states: contexts
                .into_iter()
                .map(|(context, backlight)| ContextState {
                    context,
                    backlight,
                    pending: None,
                })
                .collect(),
            transport,
            registry,
            events,
            led_rx,
            hotplug_rx,
            hotplug_live: true,
            next_poll: None,
        }
    }

    /// Runs until cancelled. This is the only place the engine suspends.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        self.prime().await;
        self.next_poll = self.settings.poll.map(|interval| Instant::now() + interval);
        info!("sync engine running with {} context(s)", self.states.len());

        loop {
            let wake = self.next_wake();
            tokio::select! {
                () = token.cancelled() => break,

                event = self.led_rx.recv() => match event {
                    Some(event) => self.on_virtual_write(event),
                    None => bail!("virtual backlight event channel closed"),
                },

                event = self.hotplug_rx.recv(), if self.hotplug_live => match event {
                    Some(event) => self.on_hotplug(event).await,
                    None => {
                        self.hotplug_live = false;
                        debug!("hotplug channel closed; continuing without hotplug");
                    }
                },

                () = time::sleep_until(wake.unwrap_or_else(far_wake)), if wake.is_some() => {
                    self.on_deadline(Instant::now()).await;
                }
            }
        }

        info!("sync engine stopped");
        Ok(())
    }

    /// Startup alignment: adopt the master's actual level where readable,
    /// otherwise force a consistent off state, and seed the mirror either
    /// way.
    async fn prime(&mut self) {
        for idx in 0..self.states.len() {
            let name = self.states[idx].context.name.clone();
            let members = self.states[idx].context.members().to_vec();
            let Some(master) = self.states[idx].context.master().cloned() else {
                continue;
            };

            let readback = self.transport.read(&master).await;
            match readback {
                Ok(pct) => {
                    let level = Level::from_hw_pct(pct);
                    info!("{name}: adopting hardware level {level} ({pct}%)");
                    self.states[idx].context.level = level;
                    for target in &members {
                        if *target == master {
                            continue;
                        }
                        if let Err(e) = self.transport.apply(target, level.hw_pct()).await {
                            warn!("{name}: {e}");
                        }
                    }
                }
                Err(e) => {
                    warn!("{name}: initial read-back failed ({e}); forcing level 0");
                    self.states[idx].context.level = Level::Off;
                    for target in &members {
                        if let Err(e) = self.transport.apply(target, 0).await {
                            warn!("{name}: {e}");
                        }
                    }
                }
            }

            let backlight = self.states[idx].backlight.clone();
            let raw = self.states[idx].context.level.raw(backlight.max_raw());
            if let Err(e) = backlight.push_raw(raw).await {
                debug!("{name}: mirror push failed: {e}");
            }
        }
    }

    /// Soonest of all debounce deadlines and the poll tick.
    fn next_wake(&self) -> Option<Instant> {
        let mut wake = self.next_poll;
        for state in &self.states {
            if let Some(pending) = &state.pending {
                wake = Some(wake.map_or(pending.deadline, |w| w.min(pending.deadline)));
            }
        }
        wake
    }

    /// A raw value arrived on a context's virtual device.
    fn on_virtual_write(&mut self, event: LedEvent) {
        let Some(state) = self.states.get_mut(event.ctx) else {
            return;
        };
        let level = Level::from_raw(event.raw, state.backlight.max_raw());
        debug!(
            "{}: event raw={} level={level}",
            state.context.name, event.raw
        );

        // Steady state, or our own mirror push echoing back: nothing to
        // debounce. With a change already pending the event still counts,
        // so a burst ending on the current level commits nothing.
        if level == state.context.level && state.pending.is_none() {
            return;
        }
        state.pending = Some(Pending {
            level,
            deadline: Instant::now() + self.settings.debounce,
        });
    }

    /// Timer wake-up: commit expired debounces, then run the poll pass
    /// when its tick is due.
    async fn on_deadline(&mut self, now: Instant) {
        for idx in 0..self.states.len() {
            let due = self.states[idx]
                .pending
                .as_ref()
                .is_some_and(|p| p.deadline <= now);
            if due {
                self.commit(idx).await;
            }
        }

        if let Some(poll_at) = self.next_poll {
            if poll_at <= now {
                self.poll_contexts().await;
                if let Some(interval) = self.settings.poll {
                    self.next_poll = Some(now + interval);
                }
            }
        }
    }

    /// Debounce expired: tell the hardware.
    async fn commit(&mut self, idx: usize) {
        let Some(pending) = self.states[idx].pending.take() else {
            return;
        };
        if pending.level == self.states[idx].context.level {
            return;
        }

        let name = self.states[idx].context.name.clone();
        let members = self.states[idx].context.members().to_vec();
        let pct = pending.level.hw_pct();
        debug!(
            "{name}: apply level={} pct={pct} to {} target(s)",
            pending.level,
            members.len()
        );
        for target in &members {
            if let Err(e) = self.transport.apply(target, pct).await {
                warn!("{name}: {e}");
            }
        }
        self.states[idx].context.level = pending.level;
    }

    /// Reads each master back and reconciles externally driven changes.
    /// A context with a change already pending is skipped; the user's
    /// intent wins and the next tick re-checks.
    async fn poll_contexts(&mut self) {
        for idx in 0..self.states.len() {
            if self.states[idx].pending.is_some() {
                continue;
            }
            let Some(master) = self.states[idx].context.master().cloned() else {
                continue;
            };

            let readback = self.transport.read(&master).await;
            match readback {
                Ok(pct) => {
                    let level = Level::from_hw_pct(pct);
                    if level != self.states[idx].context.level {
                        self.adopt_external(idx, level).await;
                    }
                }
                Err(e) => debug!("{}: {e}", self.states[idx].context.name),
            }
        }
    }

    /// Hardware changed brightness behind our back (physical control on
    /// the module): fan the level out to the other members, mirror it,
    /// and announce it.
    async fn adopt_external(&mut self, idx: usize, level: Level) {
        let name = self.states[idx].context.name.clone();
        let members = self.states[idx].context.members().to_vec();
        let master = self.states[idx].context.master().cloned();

        info!("{name}: hardware level changed externally to {level}");
        self.states[idx].context.level = level;

        // The master already shows the new state; skip it.
        for target in &members {
            if Some(target) == master.as_ref() {
                continue;
            }
            if let Err(e) = self.transport.apply(target, level.hw_pct()).await {
                warn!("{name}: {e}");
            }
        }

        let backlight = self.states[idx].backlight.clone();
        if let Err(e) = backlight.push_raw(level.raw(backlight.max_raw())).await {
            warn!("{name}: mirror push failed: {e}");
        }

        self.publish(Event::LevelSynced {
            context: name,
            level,
        });
    }

    /// A kernel uevent arrived. Filter, rescan, diff each context by
    /// identity, and bring new members up to the context's current level
    /// before reporting them.
    async fn on_hotplug(&mut self, event: HotplugEvent) {
        if !event.is_relevant() {
            return;
        }
        debug!(
            "hotplug: {} event ({})",
            event.action,
            event.subsystem.as_deref().unwrap_or("?")
        );

        let fresh = self.registry.discover();
        for idx in 0..self.states.len() {
            let new_members = self.states[idx].context.select_from(&fresh);
            let d = reconcile::diff(self.states[idx].context.members(), &new_members);
            if d.is_empty() {
                // Node paths may have moved; adopt them silently.
                self.states[idx].context.set_members(new_members);
                continue;
            }

            let name = self.states[idx].context.name.clone();
            let level = self.states[idx].context.level;
            for target in &d.added {
                info!("{name}: hotplug attached {target}");
                if let Err(e) = self.transport.apply(target, level.hw_pct()).await {
                    warn!("{name}: {e}");
                }
            }
            for target in &d.removed {
                info!("{name}: hotplug detached {target}");
            }

            self.states[idx].context.set_members(new_members);
            info!(
                "{name}: targets: {}",
                format_targets(self.states[idx].context.members())
            );
            self.publish(Event::TargetsChanged {
                context: name,
                added: d.added,
                removed: d.removed,
            });
        }
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.events.publish(event) {
            debug!("event publish skipped: {e}");
        }
    }
}

fn far_wake() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Mode, partition};
    use crate::error::TransportError;
    use crate::probe::PresenceProbe;
    use crate::target::{ModuleCatalog, Target};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::broadcast::error::TryRecvError;

    const DEBOUNCE: Duration = Duration::from_millis(180);

    struct RecordingTransport {
        applies: Mutex<Vec<(Target, u8)>>,
        reads: Mutex<HashMap<(u16, u16), u8>>,
        read_calls: AtomicUsize,
        fail_applies: AtomicBool,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                applies: Mutex::new(Vec::new()),
                reads: Mutex::new(HashMap::new()),
                read_calls: AtomicUsize::new(0),
                fail_applies: AtomicBool::new(false),
            })
        }

        fn set_read(&self, vid: u16, pid: u16, pct: u8) {
            self.reads.lock().unwrap().insert((vid, pid), pct);
        }

        fn applies(&self) -> Vec<(u16, u16, u8)> {
            self.applies
                .lock()
                .unwrap()
                .iter()
                .map(|(t, pct)| (t.vid, t.pid, *pct))
                .collect()
        }

        fn clear(&self) {
            self.applies.lock().unwrap().clear();
            self.read_calls.store(0, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HardwareTransport for RecordingTransport {
        async fn apply(&self, target: &Target, pct: u8) -> Result<(), TransportError> {
            self.applies.lock().unwrap().push((target.clone(), pct));
            if self.fail_applies.load(Ordering::SeqCst) {
                return Err(TransportError::ApplyFailed {
                    target: target.to_string(),
                    reason: "simulated".into(),
                });
            }
            Ok(())
        }

        async fn read(&self, target: &Target) -> Result<u8, TransportError> {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            self.reads
                .lock()
                .unwrap()
                .get(&(target.vid, target.pid))
                .copied()
                .ok_or_else(|| TransportError::ReadFailed {
                    target: target.to_string(),
                    reason: "simulated".into(),
                })
        }
    }

    struct StubBacklight {
        name: String,
        pushed: Mutex<Vec<u32>>,
    }

    impl StubBacklight {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                pushed: Mutex::new(Vec::new()),
            })
        }

        fn pushed(&self) -> Vec<u32> {
            self.pushed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VirtualBacklight for StubBacklight {
        fn name(&self) -> &str {
            &self.name
        }

        fn max_raw(&self) -> u32 {
            100
        }

        async fn push_raw(&self, raw: u32) -> std::io::Result<()> {
            self.pushed.lock().unwrap().push(raw);
            Ok(())
        }
    }

    struct StubProbe {
        present: Mutex<HashSet<(u16, u16)>>,
        nodes: Mutex<HashMap<(u16, u16), PathBuf>>,
        calls: AtomicUsize,
    }

    impl StubProbe {
        fn new(present: &[(u16, u16)]) -> Arc<Self> {
            Arc::new(Self {
                present: Mutex::new(present.iter().copied().collect()),
                nodes: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_present(&self, present: &[(u16, u16)]) {
            *self.present.lock().unwrap() = present.iter().copied().collect();
        }

        fn set_node(&self, vid: u16, pid: u16, node: &str) {
            self.nodes
                .lock()
                .unwrap()
                .insert((vid, pid), PathBuf::from(node));
        }
    }

    impl PresenceProbe for StubProbe {
        fn present(&self, vid: u16, pid: u16) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.present.lock().unwrap().contains(&(vid, pid))
        }

        fn resolve_node(&self, vid: u16, pid: u16) -> Option<PathBuf> {
            self.nodes.lock().unwrap().get(&(vid, pid)).cloned()
        }
    }

    struct Rig {
        engine: SyncEngine,
        led_tx: mpsc::Sender<LedEvent>,
        hp_tx: mpsc::Sender<HotplugEvent>,
        transport: Arc<RecordingTransport>,
        backlights: Vec<Arc<StubBacklight>>,
        probe: Arc<StubProbe>,
        events: tokio::sync::broadcast::Receiver<Event>,
    }

    fn rig(present: &[(u16, u16)], mode: Mode, poll: Option<Duration>) -> Rig {
        let probe = StubProbe::new(present);
        let registry = TargetRegistry::new(
            probe.clone(),
            vec![0x32ac],
            ModuleCatalog::builtin(),
            vec![],
        );
        let targets = registry.discover();
        let contexts = partition(&targets, mode);

        let transport = RecordingTransport::new();
        let bus = EventBus::new();
        let events = bus.subscribe();
        let (led_tx, led_rx) = mpsc::channel(16);
        let (hp_tx, hp_rx) = mpsc::channel(16);

        let mut backlights = Vec::new();
        let pairs = contexts
            .into_iter()
            .map(|context| {
                let backlight = StubBacklight::new(&context.name);
                backlights.push(backlight.clone());
                (context, backlight as Arc<dyn VirtualBacklight>)
            })
            .collect();

        let engine = SyncEngine::new(
            EngineSettings {
                debounce: DEBOUNCE,
                poll,
            },
            pairs,
            transport.clone(),
            registry,
            bus,
            led_rx,
            hp_rx,
        );

        Rig {
            engine,
            led_tx,
            hp_tx,
            transport,
            backlights,
            probe,
            events,
        }
    }

    fn relevant_event() -> HotplugEvent {
        HotplugEvent {
            action: "add".into(),
            subsystem: Some("hid".into()),
            hid_id: None,
        }
    }

    const KBD: (u16, u16) = (0x32ac, 0x0012);
    const KBD_ISO: (u16, u16) = (0x32ac, 0x0018);
    const NUMPAD: (u16, u16) = (0x32ac, 0x0014);

    #[tokio::test]
    async fn burst_coalesces_to_the_final_level() {
        let mut r = rig(&[KBD, KBD_ISO], Mode::Unified, None);

        for raw in [10, 40, 70, 100] {
            r.engine.on_virtual_write(LedEvent { ctx: 0, raw });
        }
        r.engine.on_deadline(Instant::now() + DEBOUNCE * 2).await;

        assert_eq!(
            r.transport.applies(),
            vec![(0x32ac, 0x0012, 100), (0x32ac, 0x0018, 100)]
        );
        assert_eq!(r.engine.states[0].context.level, Level::High);
        assert!(r.engine.states[0].pending.is_none());
    }

    #[tokio::test]
    async fn steady_state_event_is_absorbed() {
        let mut r = rig(&[KBD], Mode::Unified, None);

        // Level is Off; a zero write (e.g. our own mirror echo) must not
        // arm the debounce at all.
        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 0 });
        assert!(r.engine.states[0].pending.is_none());

        r.engine.on_deadline(Instant::now() + DEBOUNCE * 2).await;
        assert!(r.transport.applies().is_empty());
    }

    #[tokio::test]
    async fn burst_returning_to_current_level_commits_nothing() {
        let mut r = rig(&[KBD], Mode::Unified, None);
        r.engine.states[0].context.level = Level::Low;

        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 100 });
        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 35 });
        r.engine.on_deadline(Instant::now() + DEBOUNCE * 2).await;

        assert!(r.transport.applies().is_empty());
        assert_eq!(r.engine.states[0].context.level, Level::Low);
    }

    #[tokio::test]
    async fn pending_survives_until_its_deadline() {
        let mut r = rig(&[KBD], Mode::Unified, None);

        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 100 });
        r.engine.on_deadline(Instant::now()).await;

        assert!(r.transport.applies().is_empty());
        assert!(r.engine.states[0].pending.is_some());
    }

    #[tokio::test]
    async fn apply_failures_are_not_fatal_and_level_still_advances() {
        let mut r = rig(&[KBD, KBD_ISO], Mode::Unified, None);
        r.transport.fail_applies.store(true, Ordering::SeqCst);

        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 100 });
        r.engine.on_deadline(Instant::now() + DEBOUNCE * 2).await;

        // Both members were attempted and the cycle completed.
        assert_eq!(r.transport.applies().len(), 2);
        assert_eq!(r.engine.states[0].context.level, Level::High);
    }

    #[tokio::test]
    async fn prime_adopts_master_readback_then_virtual_write_applies_everywhere() {
        let mut r = rig(&[KBD, KBD_ISO], Mode::Unified, None);
        r.transport.set_read(KBD.0, KBD.1, 40);

        r.engine.prime().await;

        // 40% on the master means level 1; only the other member is
        // brought in line, and the mirror is seeded.
        assert_eq!(r.engine.states[0].context.level, Level::Low);
        assert_eq!(r.transport.applies(), vec![(0x32ac, 0x0018, 35)]);
        assert_eq!(r.backlights[0].pushed(), vec![35]);

        r.transport.clear();
        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 90 });
        r.engine.on_deadline(Instant::now() + DEBOUNCE * 2).await;

        assert_eq!(
            r.transport.applies(),
            vec![(0x32ac, 0x0012, 100), (0x32ac, 0x0018, 100)]
        );
    }

    #[tokio::test]
    async fn prime_failure_forces_level_zero_everywhere() {
        let mut r = rig(&[KBD, KBD_ISO], Mode::Unified, None);

        r.engine.prime().await;

        assert_eq!(r.engine.states[0].context.level, Level::Off);
        assert_eq!(
            r.transport.applies(),
            vec![(0x32ac, 0x0012, 0), (0x32ac, 0x0018, 0)]
        );
        assert_eq!(r.backlights[0].pushed(), vec![0]);
    }

    #[tokio::test]
    async fn poll_adopts_external_change_and_fans_it_out() {
        let mut r = rig(&[KBD, KBD_ISO], Mode::Unified, None);
        r.engine.states[0].context.level = Level::Low;
        r.transport.set_read(KBD.0, KBD.1, 100);

        r.engine.poll_contexts().await;

        assert_eq!(r.engine.states[0].context.level, Level::High);
        // The master already shows the new state; only the other member
        // is written.
        assert_eq!(r.transport.applies(), vec![(0x32ac, 0x0018, 100)]);
        assert_eq!(r.backlights[0].pushed(), vec![100]);
        assert!(matches!(
            r.events.try_recv().unwrap(),
            Event::LevelSynced {
                level: Level::High,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn poll_skips_a_debouncing_context() {
        let mut r = rig(&[KBD], Mode::Unified, None);
        r.transport.set_read(KBD.0, KBD.1, 100);
        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 67 });

        r.engine.poll_contexts().await;

        assert_eq!(r.transport.read_calls.load(Ordering::SeqCst), 0);
        assert_eq!(r.engine.states[0].context.level, Level::Off);
    }

    #[tokio::test]
    async fn matching_readback_changes_nothing() {
        let mut r = rig(&[KBD], Mode::Unified, None);
        r.engine.states[0].context.level = Level::Medium;
        r.transport.set_read(KBD.0, KBD.1, 67);

        r.engine.poll_contexts().await;

        assert!(r.transport.applies().is_empty());
        assert!(r.backlights[0].pushed().is_empty());
        assert!(matches!(r.events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn hotplug_addition_adopts_context_level_before_reporting() {
        let mut r = rig(&[KBD], Mode::Unified, None);
        r.engine.states[0].context.level = Level::Medium;

        r.probe.set_present(&[KBD, NUMPAD]);
        r.engine.on_hotplug(relevant_event()).await;

        assert_eq!(r.transport.applies(), vec![(0x32ac, 0x0014, 67)]);
        assert_eq!(r.engine.states[0].context.members().len(), 2);
        match r.events.try_recv().unwrap() {
            Event::TargetsChanged { added, removed, .. } => {
                assert_eq!(added.len(), 1);
                assert_eq!(added[0].pid, 0x0014);
                assert!(removed.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let mut r = rig(&[KBD], Mode::Unified, None);
        r.probe.set_present(&[KBD, NUMPAD]);

        r.engine.on_hotplug(relevant_event()).await;
        r.transport.clear();
        let _ = r.events.try_recv();

        r.engine.on_hotplug(relevant_event()).await;

        assert!(r.transport.applies().is_empty());
        assert!(matches!(r.events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(r.engine.states[0].context.members().len(), 2);
    }

    #[tokio::test]
    async fn irrelevant_events_never_trigger_a_rescan() {
        let mut r = rig(&[KBD], Mode::Unified, None);
        r.probe.calls.store(0, Ordering::SeqCst);

        r.engine
            .on_hotplug(HotplugEvent {
                action: "add".into(),
                subsystem: Some("block".into()),
                hid_id: None,
            })
            .await;

        assert_eq!(r.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn node_churn_refreshes_silently() {
        let mut r = rig(&[KBD], Mode::Unified, None);
        r.probe.set_node(KBD.0, KBD.1, "/dev/hidraw7");

        r.engine.on_hotplug(relevant_event()).await;

        assert!(r.transport.applies().is_empty());
        assert!(matches!(r.events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(
            r.engine.states[0].context.members()[0].node,
            Some(PathBuf::from("/dev/hidraw7"))
        );
    }

    #[tokio::test]
    async fn separate_mode_removal_leaves_the_empty_context_open() {
        let mut r = rig(&[KBD, NUMPAD], Mode::Separate, None);
        assert_eq!(r.engine.states.len(), 2);

        r.probe.set_present(&[KBD]);
        r.engine.on_hotplug(relevant_event()).await;

        // One removal reported, for the numpad context only.
        match r.events.try_recv().unwrap() {
            Event::TargetsChanged {
                context,
                added,
                removed,
            } => {
                assert_eq!(context, "framework_numpad::kbd_backlight");
                assert!(added.is_empty());
                assert_eq!(removed.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(r.events.try_recv(), Err(TryRecvError::Empty)));
        assert!(r.engine.states[1].context.members().is_empty());
        assert_eq!(r.engine.states[0].context.members().len(), 1);

        // The emptied context issues no further hardware calls.
        r.transport.set_read(KBD.0, KBD.1, 0);
        r.transport.clear();
        r.engine.poll_contexts().await;
        assert_eq!(r.transport.read_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn next_wake_is_the_soonest_deadline() {
        let mut r = rig(&[KBD], Mode::Unified, Some(Duration::from_secs(5)));
        let now = Instant::now();
        r.engine.next_poll = Some(now + Duration::from_secs(5));
        assert_eq!(r.engine.next_wake(), Some(now + Duration::from_secs(5)));

        r.engine.on_virtual_write(LedEvent { ctx: 0, raw: 100 });
        let wake = r.engine.next_wake().unwrap();
        assert!(wake < now + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_commits_after_the_debounce_window() {
        let r = rig(&[KBD, KBD_ISO], Mode::Unified, None);
        let transport = r.transport.clone();
        transport.set_read(KBD.0, KBD.1, 0);

        let token = CancellationToken::new();
        let handle = tokio::spawn(r.engine.run(token.clone()));

        // Let priming finish, then drop its traffic.
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.clear();

        for raw in [35, 67, 100] {
            r.led_tx.send(LedEvent { ctx: 0, raw }).await.unwrap();
        }
        tokio::time::sleep(DEBOUNCE * 3).await;

        assert_eq!(
            transport.applies(),
            vec![(0x32ac, 0x0012, 100), (0x32ac, 0x0018, 100)]
        );

        token.cancel();
        handle.await.unwrap().unwrap();
        drop(r.hp_tx);
    }
}
