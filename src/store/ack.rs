use anyhow::Result;
use tracing::{debug, info, warn};

use super::{LinkEvent, Notice, Store};
use crate::mission::normalize_mission;
use crate::protocol::{commands, AckPayload, RawMissionItem};

/// Acknowledged often enough that a toast per ack would flood the console.
const QUIET_COMMANDS: [&str; 2] = [commands::MANUAL_CONTROL, commands::SET_RELAY];

impl Store {
    /// Matches an acknowledgement to its command by `command_type` only;
    /// the request id is not echoed back in a form we correlate on.
    pub fn reconcile_ack(&self, ack: AckPayload) -> Result<()> {
        let command = ack.command_type().to_string();

        if !ack.success {
            let message = ack
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("{} was rejected", command));
            warn!("Command {} failed: {}", command, message);
            self.notify(Notice::error("Command failed", message));
            return Ok(());
        }

        debug!("Command {} acknowledged", command);
        if !QUIET_COMMANDS.contains(&command.as_str()) {
            let message = ack
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Command executed".to_string());
            self.notify(Notice::success(message));
        }

        if command == commands::DOWNLOAD_MISSION {
            if let Some(items) = ack.mission_items {
                self.apply_downloaded_mission(&items)?;
            }
        }
        Ok(())
    }

    /// Replaces the planned mission with what the vehicle reported.
    /// Returns how many waypoints survived validation.
    pub fn apply_downloaded_mission(&self, items: &[RawMissionItem]) -> Result<usize> {
        if items.is_empty() {
            self.write()?.mission.clear();
            info!("Vehicle has no mission stored");
            self.emit(LinkEvent::MissionUpdated);
            self.trigger_redraw()?;
            self.notify(Notice::info("No mission on the vehicle"));
            return Ok(0);
        }

        let accepted = {
            let mut state = self.write()?;
            let waypoints = normalize_mission(items, &state.mission.defaults);
            let accepted = waypoints.len();
            state.mission.load(waypoints);
            accepted
        };

        if accepted < items.len() {
            debug!(
                "Dropped {} mission items without usable coordinates",
                items.len() - accepted
            );
        }
        info!("Mission downloaded: {} of {} items kept", accepted, items.len());

        self.emit(LinkEvent::MissionUpdated);
        self.trigger_redraw()?;

        if accepted == 0 {
            self.notify(Notice::info("Downloaded mission has no valid waypoints"));
        } else {
            self.notify(Notice::success(format!(
                "Mission downloaded: {} waypoints",
                accepted
            )));
        }
        Ok(accepted)
    }
}
