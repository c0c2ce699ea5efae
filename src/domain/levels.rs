//! Heat level tables
//!
//! The mat speaks in discrete levels (0 = off). Two hardware revisions are
//! known, with different Celsius scales, selected by [`DeviceVariant`].

use serde::{Deserialize, Serialize};

/// Longest timer the device accepts
pub const MAX_TIMER_HOURS: u8 = 15;

const STEPPED_TABLE: [u8; 8] = [15, 20, 25, 30, 35, 40, 45, 50];
const FINE_TABLE: [u8; 8] = [35, 36, 37, 38, 39, 40, 41, 42];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceVariant {
    /// 15-50 °C in 5 °C steps, level 0 at 15 °C
    #[default]
    Stepped,
    /// 36-42 °C in 1 °C steps, level 0 at 35 °C
    Fine,
}

impl DeviceVariant {
    pub fn level_map(&self) -> LevelMap {
        match self {
            Self::Stepped => LevelMap::new(&STEPPED_TABLE),
            Self::Fine => LevelMap::new(&FINE_TABLE),
        }
    }

    /// Temperature used when powering on with nothing remembered
    pub fn default_heat_temperature(&self) -> u8 {
        match self {
            Self::Stepped => 30,
            Self::Fine => 38,
        }
    }
}

/// Level index to Celsius table, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMap {
    celsius: Vec<u8>,
}

impl LevelMap {
    pub fn new(celsius: &[u8]) -> Self {
        Self {
            celsius: celsius.to_vec(),
        }
    }

    /// Celsius of level 0, which also means off
    pub fn min_temperature(&self) -> u8 {
        self.celsius.first().copied().unwrap_or_default()
    }

    pub fn max_temperature(&self) -> u8 {
        self.celsius.last().copied().unwrap_or_default()
    }

    /// Map a requested temperature to `(level, quantized celsius)`.
    ///
    /// Clamps into the table's range and picks the nearest step; halfway
    /// values round up. `celsius` must be finite.
    pub fn level_for(&self, celsius: f32) -> (u8, u8) {
        let clamped = celsius.clamp(
            self.min_temperature() as f32,
            self.max_temperature() as f32,
        );

        let mut best = (0u8, self.min_temperature());
        let mut best_distance = f32::MAX;
        for (level, &step) in self.celsius.iter().enumerate() {
            let distance = (step as f32 - clamped).abs();
            if distance <= best_distance {
                best_distance = distance;
                best = (level as u8, step);
            }
            if step as f32 > clamped {
                break;
            }
        }
        best
    }

    pub fn celsius_for(&self, level: u8) -> Option<u8> {
        self.celsius.get(level as usize).copied()
    }
}

/// Clamp a requested timer into `0..=MAX_TIMER_HOURS`
pub fn clamp_timer_hours(hours: i32) -> u8 {
    hours.clamp(0, MAX_TIMER_HOURS as i32) as u8
}

/// Timer hours expressed as a 0-100 percentage control
pub fn timer_brightness(hours: u8) -> u8 {
    let hours = hours.min(MAX_TIMER_HOURS) as f32;
    (hours * (100.0 / MAX_TIMER_HOURS as f32)).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stepped_rounds_to_nearest_step() {
        let map = DeviceVariant::Stepped.level_map();
        assert_eq!(map.level_for(32.0), (3, 30));
        assert_eq!(map.level_for(33.0), (4, 35));
        assert_eq!(map.level_for(32.5), (4, 35));
        assert_eq!(map.level_for(15.0), (0, 15));
    }

    #[test]
    fn test_stepped_clamps() {
        let map = DeviceVariant::Stepped.level_map();
        assert_eq!(map.level_for(-4.0), (0, 15));
        assert_eq!(map.level_for(90.0), (7, 50));
    }

    #[test]
    fn test_fine_scale() {
        let map = DeviceVariant::Fine.level_map();
        assert_eq!(map.level_for(36.0), (1, 36));
        assert_eq!(map.level_for(41.6), (7, 42));
        assert_eq!(map.level_for(20.0), (0, 35));
        assert_eq!(map.celsius_for(4), Some(39));
        assert_eq!(map.celsius_for(8), None);
    }

    #[test]
    fn test_timer_helpers() {
        assert_eq!(clamp_timer_hours(42), 15);
        assert_eq!(clamp_timer_hours(-1), 0);
        assert_eq!(timer_brightness(15), 100);
        assert_eq!(timer_brightness(3), 20);
        assert_eq!(timer_brightness(0), 0);
    }
}
