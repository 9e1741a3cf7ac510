//! In-memory state shared with the console views.
//!
//! The views only read snapshots and listen on the event channel; every
//! mutation goes through the dispatcher, the acknowledgement handling or one
//! of the explicit operator actions below.

mod ack;
mod dispatch;
mod triggers;


use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::Config;
use crate::event_log::{EventLog, LogEntry};
use crate::link::LinkState;
use crate::mission::{MissionDefaults, MissionState};
use crate::vehicle::VehicleState;

pub use triggers::{MapTriggers, TriggerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Something the operator should be told about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: Option<String>,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            title: None,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::new(NoticeLevel::Error, message)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connection(LinkState),
    VehicleUpdated,
    MissionUpdated,
    LogAppended(LogEntry),
    Trigger { kind: TriggerKind, active: bool },
    Notice(Notice),
    EndpointChanged(String),
    PlannerUpdated,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlannerState {
    /// Map point the operator picked as a possible go-to target.
    pub goto_target_candidate: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub vehicle: VehicleState,
    pub mission: MissionState,
    pub logs: Vec<LogEntry>,
    pub triggers: MapTriggers,
    pub planner: PlannerState,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub log_capacity: usize,
    pub mission_defaults: MissionDefaults,
    pub redraw_pulse: Duration,
    pub pulse: Duration,
    pub event_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            log_capacity: 50,
            mission_defaults: MissionDefaults::default(),
            redraw_pulse: Duration::from_millis(50),
            pulse: Duration::from_millis(100),
            event_capacity: 256,
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            log_capacity: config.event_log.capacity,
            mission_defaults: MissionDefaults::new(
                config.mission.default_speed,
                config.mission.default_loiter,
            )?,
            redraw_pulse: Duration::from_millis(config.triggers.redraw_pulse_ms),
            pulse: Duration::from_millis(config.triggers.pulse_ms),
            event_capacity: config.link.event_capacity.max(1),
        })
    }
}

#[derive(Debug)]
struct StoreState {
    vehicle: VehicleState,
    mission: MissionState,
    log: EventLog,
    triggers: MapTriggers,
    planner: PlannerState,
}

#[derive(Debug, Clone)]
pub struct Store {
    state: Arc<RwLock<StoreState>>,
    events: broadcast::Sender<LinkEvent>,
    options: StoreOptions,
    /// Runtime the store was built on; pulses are released there even when
    /// triggered from a thread outside it.
    runtime: Option<Handle>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl Store {
    pub fn new(options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let state = StoreState {
            vehicle: VehicleState::default(),
            mission: MissionState::new(options.mission_defaults),
            log: EventLog::new(options.log_capacity),
            triggers: MapTriggers::default(),
            planner: PlannerState::default(),
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            events,
            options,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|e| anyhow!("Lock error: {}", e))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|e| anyhow!("Lock error: {}", e))
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn notify(&self, notice: Notice) {
        debug!("Notice [{:?}] {}", notice.level, notice.message);
        self.emit(LinkEvent::Notice(notice));
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let state = self.read()?;
        Ok(Snapshot {
            vehicle: state.vehicle.clone(),
            mission: state.mission.clone(),
            logs: state.log.entries(),
            triggers: state.triggers.clone(),
            planner: state.planner.clone(),
        })
    }

    pub fn vehicle(&self) -> Result<VehicleState> {
        Ok(self.read()?.vehicle.clone())
    }

    pub fn mission(&self) -> Result<MissionState> {
        Ok(self.read()?.mission.clone())
    }

    pub fn logs(&self) -> Result<Vec<LogEntry>> {
        Ok(self.read()?.log.entries())
    }

    pub fn triggers(&self) -> Result<MapTriggers> {
        Ok(self.read()?.triggers.clone())
    }

    pub fn planner(&self) -> Result<PlannerState> {
        Ok(self.read()?.planner.clone())
    }

    pub(crate) fn set_vehicle_connected(&self, connected: bool) -> Result<()> {
        let changed = {
            let mut state = self.write()?;
            let changed = state.vehicle.connected != connected;
            state.vehicle.connected = connected;
            changed
        };
        if changed {
            self.emit(LinkEvent::VehicleUpdated);
        }
        Ok(())
    }

    // Operator actions

    pub fn update_planned_mission(&self, points: &[(f64, f64)]) -> Result<()> {
        self.write()?.mission.update_planned(points);
        self.emit(LinkEvent::MissionUpdated);
        Ok(())
    }

    pub fn set_mission_defaults(&self, speed: f64, loiter: f64) -> Result<()> {
        let defaults = MissionDefaults::new(speed, loiter)?;
        self.write()?.mission.defaults = defaults;
        self.emit(LinkEvent::MissionUpdated);
        Ok(())
    }

    /// Drops the planned mission and tells the map to clear its layers.
    pub fn clear_mission(&self) -> Result<()> {
        self.write()?.mission.clear();
        info!("Planned mission cleared");
        self.emit(LinkEvent::MissionUpdated);
        self.pulse(TriggerKind::ClearMap, self.options.pulse)
    }

    pub fn clear_trajectory(&self) -> Result<()> {
        self.write()?.vehicle.clear_trajectory();
        self.emit(LinkEvent::VehicleUpdated);
        Ok(())
    }

    pub fn set_goto_candidate(&self, candidate: Option<(f64, f64)>) -> Result<()> {
        self.write()?.planner.goto_target_candidate = candidate;
        self.emit(LinkEvent::PlannerUpdated);
        Ok(())
    }
}
