use serde::Serialize;

use crate::protocol::{BatteryReport, NavPayload, StatusPayload};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Battery {
    pub voltage_v: f64,
    pub remaining_percent: f64,
    pub current_a: f64,
    pub temperature: Option<f64>,
    pub alarms: Vec<String>,
}

impl From<BatteryReport> for Battery {
    fn from(report: BatteryReport) -> Self {
        Self {
            voltage_v: report.voltage_v,
            remaining_percent: report.remaining_percent,
            current_a: report.current_a,
            temperature: report.temperature,
            alarms: report.alarms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gps {
    pub sats: u32,
    pub fix: String,
}

impl Default for Gps {
    fn default() -> Self {
        Self {
            sats: 0,
            fix: "No Fix".to_string(),
        }
    }
}

/// Degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
}

impl Default for Position {
    // Map starts centred on the development field until the first fix arrives.
    fn default() -> Self {
        Self {
            lat: 45.77,
            lng: 126.67,
            alt: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Home {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Velocity {
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleState {
    // Link and system status
    pub connected: bool,
    pub armed: bool,
    pub mode: String,
    pub battery: Battery,
    pub gps: Gps,

    // Flight data
    pub attitude: Attitude,
    pub position: Position,
    pub home: Option<Home>,
    pub velocity: Velocity,
    pub trajectory: Vec<(f64, f64)>, // (latitude, longitude)

    pub relay_on: bool,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            connected: false,
            armed: false,
            mode: "UNKNOWN".to_string(),
            battery: Battery::default(),
            gps: Gps::default(),
            attitude: Attitude::default(),
            position: Position::default(),
            home: None,
            velocity: Velocity::default(),
            trajectory: Vec::new(),
            relay_on: false,
        }
    }
}

impl VehicleState {
    /// Applies a high-rate navigation sample.
    ///
    /// A missing or zero latitude leaves `position` and `trajectory` untouched,
    /// so a vehicle without a fix never snaps to the coordinate origin.
    pub fn apply_nav(&mut self, nav: &NavPayload) {
        if let Some(position) = &nav.position {
            if let Some(lat) = position.lat.filter(|lat| *lat != 0.0) {
                self.position.lat = lat;
                if let Some(lon) = position.lon {
                    self.position.lng = lon;
                }
                if let Some(alt) = position.rel_alt {
                    self.position.alt = alt;
                }
                self.trajectory.push((lat, self.position.lng));
            }
        }

        if let Some(attitude) = &nav.attitude {
            self.attitude = Attitude {
                roll: attitude.roll_deg.unwrap_or(0.0),
                pitch: attitude.pitch_deg.unwrap_or(0.0),
                yaw: attitude.yaw_deg.unwrap_or(0.0),
            };
        }

        if let Some(velocity) = &nav.velocity {
            self.velocity.speed = velocity.ground_speed_m_s.unwrap_or(0.0);
        }
    }

    /// Applies a low-rate status report. Link, arm and mode fields are always
    /// overwritten; optional sections only when present.
    pub fn apply_status(&mut self, status: &StatusPayload) {
        self.connected = status.is_connected;
        self.armed = status.is_armed;
        self.mode = status
            .flight_mode
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string());

        if let Some(battery) = &status.battery {
            self.battery = Battery::from(battery.clone());
        }

        if let Some(gps) = &status.gps {
            self.gps = Gps {
                sats: gps.sat_count,
                fix: gps.fix_type.clone().unwrap_or_else(|| "No Fix".to_string()),
            };
        }

        if let Some(home) = &status.home {
            let lat = home.lat.filter(|v| *v != 0.0);
            let lon = home.lon.filter(|v| *v != 0.0);
            if let (Some(lat), Some(lon)) = (lat, lon) {
                self.home = Some(Home { lat, lon });
            }
        }
    }

    pub fn clear_trajectory(&mut self) {
        self.trajectory.clear();
    }
}
