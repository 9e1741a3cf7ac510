use anyhow::Result;
use tracing::{debug, warn};

use super::{LinkEvent, Store};
use crate::event_log::{LogEntry, LogLevel};
use crate::mission::MissionProgress;
use crate::protocol::{Inbound, LogPayload, ProgressPayload};
use crate::util;

impl Store {
    /// Applies one decoded inbound message. Unknown types are skipped.
    pub fn dispatch(&self, message: Inbound) -> Result<()> {
        match message {
            Inbound::Nav(nav) => {
                self.write()?.vehicle.apply_nav(&nav);
                self.emit(LinkEvent::VehicleUpdated);
            }
            Inbound::Status(status) => {
                self.write()?.vehicle.apply_status(&status);
                self.emit(LinkEvent::VehicleUpdated);
            }
            Inbound::Log(log) => {
                self.apply_log(log)?;
            }
            Inbound::MissionProgress(progress) => {
                self.apply_progress(progress)?;
            }
            Inbound::RelayStatus(relay) => {
                self.write()?.vehicle.relay_on = relay.is_on();
                self.emit(LinkEvent::VehicleUpdated);
            }
            Inbound::Ack(ack) => {
                self.reconcile_ack(ack)?;
            }
            Inbound::Unknown(kind) => {
                debug!("Ignoring message type {}", kind);
            }
        }
        Ok(())
    }

    /// Appends to the system log, evicting the oldest entry past capacity.
    pub fn add_log(&self, text: impl Into<String>, level: LogLevel) -> Result<LogEntry> {
        let entry = self.write()?.log.push(util::local_time(), text.into(), level);
        self.emit(LinkEvent::LogAppended(entry.clone()));
        Ok(entry)
    }

    fn apply_log(&self, log: LogPayload) -> Result<()> {
        let level = LogLevel::parse(log.level.as_deref());
        self.add_log(log.text.unwrap_or_default(), level)?;
        Ok(())
    }

    fn apply_progress(&self, progress: ProgressPayload) -> Result<()> {
        let progress = MissionProgress {
            current: progress.current,
            total: progress.total,
        };
        if !progress.is_consistent() {
            warn!(
                "Backend reports mission progress {}/{} (current past total)",
                progress.current, progress.total
            );
        }
        self.write()?.mission.progress = progress;
        self.emit(LinkEvent::MissionUpdated);
        Ok(())
    }
}
