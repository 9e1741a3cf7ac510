use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::error;

use super::{LinkEvent, Store};

/// One-shot signals for the map view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TriggerKind {
    RedrawMission,
    SaveCurrentMap,
    ClearMap,
    CenterMap,
}

impl TriggerKind {
    fn index(self) -> usize {
        match self {
            TriggerKind::RedrawMission => 0,
            TriggerKind::SaveCurrentMap => 1,
            TriggerKind::ClearMap => 2,
            TriggerKind::CenterMap => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapTriggers {
    pub redraw_mission: bool,
    pub save_current_map: bool,
    pub clear_map: bool,
    pub center_map: bool,
    #[serde(skip)]
    serials: [u64; 4],
}

impl MapTriggers {
    pub fn is_active(&self, kind: TriggerKind) -> bool {
        match kind {
            TriggerKind::RedrawMission => self.redraw_mission,
            TriggerKind::SaveCurrentMap => self.save_current_map,
            TriggerKind::ClearMap => self.clear_map,
            TriggerKind::CenterMap => self.center_map,
        }
    }

    fn flag_mut(&mut self, kind: TriggerKind) -> &mut bool {
        match kind {
            TriggerKind::RedrawMission => &mut self.redraw_mission,
            TriggerKind::SaveCurrentMap => &mut self.save_current_map,
            TriggerKind::ClearMap => &mut self.clear_map,
            TriggerKind::CenterMap => &mut self.center_map,
        }
    }

    fn fire(&mut self, kind: TriggerKind) -> u64 {
        *self.flag_mut(kind) = true;
        let serial = &mut self.serials[kind.index()];
        *serial += 1;
        *serial
    }

    /// Lowers the flag unless a newer pulse of the same kind is still holding it.
    fn release(&mut self, kind: TriggerKind, serial: u64) -> bool {
        if self.serials[kind.index()] != serial {
            return false;
        }
        *self.flag_mut(kind) = false;
        true
    }
}

impl Store {
    pub fn trigger_redraw(&self) -> Result<()> {
        self.pulse(TriggerKind::RedrawMission, self.options.redraw_pulse)
    }

    pub fn trigger_map_save(&self) -> Result<()> {
        self.pulse(TriggerKind::SaveCurrentMap, self.options.pulse)
    }

    pub fn trigger_center_map(&self) -> Result<()> {
        self.pulse(TriggerKind::CenterMap, self.options.pulse)
    }

    /// Raises the flag and schedules its release on the store's runtime.
    /// Without a runtime the flag is left untouched and an error returned.
    pub(super) fn pulse(&self, kind: TriggerKind, hold: Duration) -> Result<()> {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            error!("No tokio runtime to release {:?} trigger", kind);
            bail!("{:?} trigger needs a tokio runtime", kind);
        };

        let serial = self.write()?.triggers.fire(kind);
        self.emit(LinkEvent::Trigger { kind, active: true });

        let store = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(hold).await;
            let released = match store.write() {
                Ok(mut state) => state.triggers.release(kind, serial),
                Err(e) => {
                    error!("Failed to release {:?} trigger: {}", kind, e);
                    false
                }
            };
            if released {
                store.emit(LinkEvent::Trigger {
                    kind,
                    active: false,
                });
            }
        });
        Ok(())
    }
}
