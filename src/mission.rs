use anyhow::{bail, Result};
use serde::Serialize;

use crate::protocol::{MissionItem, RawMissionItem};

/// Two points closer than this (degrees, per axis) are the same waypoint.
const SAME_POINT_TOLERANCE: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Waypoint {
    pub seq: u32,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    pub loiter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MissionDefaults {
    pub speed: f64,
    pub loiter: f64,
}

impl Default for MissionDefaults {
    fn default() -> Self {
        Self {
            speed: 2.0,
            loiter: 0.0,
        }
    }
}

impl MissionDefaults {
    pub fn new(speed: f64, loiter: f64) -> Result<Self> {
        if !speed.is_finite() || speed <= 0.0 {
            bail!("Default speed must be a positive number, got {}", speed);
        }
        if !loiter.is_finite() || loiter < 0.0 {
            bail!("Default loiter must be zero or positive, got {}", loiter);
        }
        Ok(Self { speed, loiter })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MissionProgress {
    pub current: u32,
    pub total: u32,
}

impl MissionProgress {
    /// False when the backend reports more executed items than exist.
    pub fn is_consistent(&self) -> bool {
        self.current <= self.total
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissionState {
    pub planned_waypoints: Vec<Waypoint>,
    /// Declared for the upload view; nothing fills it yet.
    pub uploaded_waypoints: Vec<Waypoint>,
    pub defaults: MissionDefaults,
    pub progress: MissionProgress,
}

impl MissionState {
    pub fn new(defaults: MissionDefaults) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// Rebuilds the plan from the editor's point list, keeping the speed and
    /// loiter of points that did not move.
    pub fn update_planned(&mut self, points: &[(f64, f64)]) {
        let previous = &self.planned_waypoints;
        let planned = points
            .iter()
            .enumerate()
            .map(|(index, &(lat, lng))| {
                let kept = previous.get(index).filter(|old| {
                    (old.lat - lat).abs() < SAME_POINT_TOLERANCE
                        && (old.lng - lng).abs() < SAME_POINT_TOLERANCE
                });
                Waypoint {
                    seq: index as u32 + 1,
                    lat,
                    lng,
                    speed: kept.map_or(self.defaults.speed, |old| old.speed),
                    loiter: kept.map_or(self.defaults.loiter, |old| old.loiter),
                }
            })
            .collect();
        self.planned_waypoints = planned;
    }

    pub fn clear(&mut self) {
        self.planned_waypoints = Vec::new();
        self.progress = MissionProgress::default();
    }

    /// Installs a freshly downloaded plan; it has not been executed yet.
    pub fn load(&mut self, waypoints: Vec<Waypoint>) {
        self.progress = MissionProgress {
            current: 0,
            total: waypoints.len() as u32,
        };
        self.planned_waypoints = waypoints;
    }

    pub fn upload_items(&self) -> Vec<MissionItem> {
        self.planned_waypoints
            .iter()
            .map(|wp| MissionItem {
                seq: wp.seq,
                latitude: wp.lat,
                longitude: wp.lng,
                speed_m_s: wp.speed,
                loiter: wp.loiter,
            })
            .collect()
    }
}

/// Turns backend mission records into waypoints.
///
/// Records without numeric coordinates are skipped. Survivors are renumbered
/// densely from 1 in the order received; the backend's own `seq` is ignored.
/// Speed falls back to `defaults.speed` and loiter to 0 when missing or
/// unusable.
pub fn normalize_mission(items: &[RawMissionItem], defaults: &MissionDefaults) -> Vec<Waypoint> {
    items
        .iter()
        .filter_map(|item| {
            let lat = item.latitude.filter(|v| v.is_finite())?;
            let lng = item.longitude.filter(|v| v.is_finite())?;
            Some((lat, lng, item))
        })
        .enumerate()
        .map(|(index, (lat, lng, item))| Waypoint {
            seq: index as u32 + 1,
            lat,
            lng,
            speed: item
                .speed_m_s
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(defaults.speed),
            loiter: item
                .loiter
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(0.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(lat: Option<f64>, lng: Option<f64>) -> RawMissionItem {
        RawMissionItem {
            latitude: lat,
            longitude: lng,
            ..RawMissionItem::default()
        }
    }

    #[test]
    fn drops_records_without_coordinates_and_renumbers() {
        let items = vec![
            item(Some(1.0), Some(2.0)),
            item(None, Some(3.0)),
            item(Some(4.0), Some(5.0)),
        ];
        let waypoints = normalize_mission(&items, &MissionDefaults::default());
        assert_eq!(waypoints.len(), 2);
        assert_eq!(waypoints[0].seq, 1);
        assert_eq!((waypoints[0].lat, waypoints[0].lng), (1.0, 2.0));
        assert_eq!(waypoints[1].seq, 2);
        assert_eq!((waypoints[1].lat, waypoints[1].lng), (4.0, 5.0));
    }

    #[test]
    fn server_sequence_numbers_are_discarded() {
        let items: Vec<RawMissionItem> = [10.0, 3.0, 99.0]
            .iter()
            .map(|&seq| RawMissionItem {
                seq: Some(seq),
                ..item(Some(seq), Some(seq))
            })
            .collect();
        let seqs: Vec<u32> = normalize_mission(&items, &MissionDefaults::default())
            .iter()
            .map(|wp| wp.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn nan_speed_falls_back_to_mission_default() {
        let items = vec![RawMissionItem {
            speed_m_s: Some(f64::NAN),
            loiter: Some(f64::NAN),
            ..item(Some(45.0), Some(126.0))
        }];
        let defaults = MissionDefaults::new(2.0, 5.0).expect("valid defaults");
        let waypoints = normalize_mission(&items, &defaults);
        assert_eq!(waypoints[0].speed, 2.0);
        assert_eq!(waypoints[0].loiter, 0.0);
    }

    #[test]
    fn explicit_speed_and_loiter_are_kept() {
        let items = vec![RawMissionItem {
            speed_m_s: Some(4.5),
            loiter: Some(12.0),
            ..item(Some(45.0), Some(126.0))
        }];
        let waypoints = normalize_mission(&items, &MissionDefaults::default());
        assert_eq!(waypoints[0].speed, 4.5);
        assert_eq!(waypoints[0].loiter, 12.0);
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let items = vec![
            item(Some(1.0), Some(2.0)),
            item(Some(f64::INFINITY), Some(3.0)),
            item(Some(4.0), None),
            item(Some(6.0), Some(7.0)),
        ];
        let defaults = MissionDefaults::default();
        assert_eq!(
            normalize_mission(&items, &defaults),
            normalize_mission(&items, &defaults)
        );
    }

    #[test]
    fn load_resets_progress_to_unexecuted() {
        let mut mission = MissionState::default();
        mission.progress = MissionProgress {
            current: 4,
            total: 9,
        };
        let waypoints = normalize_mission(
            &[item(Some(1.0), Some(1.0)), item(Some(2.0), Some(2.0))],
            &mission.defaults,
        );
        mission.load(waypoints);
        assert_eq!(
            mission.progress,
            MissionProgress {
                current: 0,
                total: 2
            }
        );
    }

    #[test]
    fn editing_keeps_settings_of_unmoved_points() {
        let mut mission = MissionState::new(MissionDefaults::new(3.0, 1.0).expect("valid defaults"));
        mission.update_planned(&[(45.0, 126.0), (45.1, 126.1)]);
        mission.planned_waypoints[0].speed = 7.0;
        mission.planned_waypoints[1].loiter = 30.0;

        mission.update_planned(&[(45.00005, 126.0), (45.2, 126.2), (45.3, 126.3)]);

        let planned = &mission.planned_waypoints;
        assert_eq!(planned.len(), 3);
        assert_eq!(planned[0].speed, 7.0);
        assert_eq!(planned[1].loiter, 1.0);
        assert_eq!(planned[1].speed, 3.0);
        assert_eq!(
            planned.iter().map(|wp| wp.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn defaults_reject_unusable_values() {
        assert!(MissionDefaults::new(0.0, 0.0).is_err());
        assert!(MissionDefaults::new(f64::NAN, 0.0).is_err());
        assert!(MissionDefaults::new(2.0, -1.0).is_err());
    }
}
