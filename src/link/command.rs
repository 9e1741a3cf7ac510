use anyhow::Result;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{GcsLink, LinkState};
use crate::protocol::{Command, CommandEnvelope, ManualControl};
use crate::store::Notice;
use crate::util;

impl GcsLink {
    /// Queues one command on the open connection.
    ///
    /// Returns false when nothing was sent. Outside the connected state the
    /// operator gets a warning, except for streamed stick input.
    pub fn send_packet(&self, command: Command) -> bool {
        let outbound = match self.lock() {
            Ok(session) if session.state == LinkState::Connected => session.outbound.clone(),
            Ok(_) => None,
            Err(e) => {
                error!("Cannot send {}: {}", command.kind(), e);
                None
            }
        };

        let Some(outbound) = outbound else {
            if command.is_streaming() {
                debug!("Dropping {} while disconnected", command.kind());
            } else {
                warn!("Not connected, {} not sent", command.kind());
                self.store
                    .notify(Notice::warning("Not connected to the backend"));
            }
            return false;
        };

        let envelope = CommandEnvelope::new(&command, util::new_request_id());
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode {}: {}", envelope.kind, e);
                return false;
            }
        };

        if outbound.send(Message::Text(json)).is_err() {
            warn!("Writer closed, {} not sent", envelope.kind);
            return false;
        }
        debug!("Sent {} ({})", envelope.kind, envelope.request_id);
        true
    }

    pub fn connect_vehicle(&self) -> bool {
        self.send_packet(Command::ConnectVehicle)
    }

    pub fn download_mission(&self) -> bool {
        info!("Requesting mission from vehicle");
        self.send_packet(Command::DownloadMission)
    }

    /// Sends the planned mission. An empty plan is not sent.
    pub fn upload_mission(&self) -> Result<bool> {
        let items = self.store.mission()?.upload_items();
        if items.is_empty() {
            self.store
                .notify(Notice::warning("No planned waypoints to upload"));
            return Ok(false);
        }
        info!("Uploading mission with {} waypoints", items.len());
        Ok(self.send_packet(Command::UploadMission(items)))
    }

    pub fn set_relay(&self, on: bool) -> bool {
        self.send_packet(Command::SetRelay { on })
    }

    pub fn set_home(&self, lat: f64, lon: f64, alt: f64) -> bool {
        self.send_packet(Command::SetHome { lat, lon, alt })
    }

    pub fn manual_control(&self, sticks: ManualControl) -> bool {
        self.send_packet(Command::ManualControl(sticks))
    }

    /// Any command type the backend understands but this client has no
    /// helper for.
    pub fn send_raw(&self, kind: impl Into<String>, payload: Value) -> bool {
        self.send_packet(Command::Raw {
            kind: kind.into(),
            payload,
        })
    }
}
