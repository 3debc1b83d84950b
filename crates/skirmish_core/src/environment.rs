//! Per-cell environmental fields: temperature, humidity, terrain, weather.
//!
//! The grids are not allocated until the first terrain or weather
//! change; until then every read returns the ambient value and
//! [`Environment::step`] is a no-op.

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, Vec2Fixed};

/// Ambient temperature in degrees.
pub const AMBIENT_TEMPERATURE: i32 = 20;
/// Ambient relative humidity in percent.
pub const AMBIENT_HUMIDITY: i32 = 50;

/// Humidity above which fire cannot persist.
const EXTINGUISH_HUMIDITY: i32 = 80;
/// Temperature above which ice melts into water.
const MELT_TEMPERATURE: i32 = 35;
/// Heat added per tick by a burning cell.
const FIRE_HEAT: i32 = 6;

/// Terrain overlay kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainKind {
    /// Sets units alight and heats the cell.
    Fire,
    /// Freezing surface; melts into water when warm.
    Ice,
    /// Slows units standing in it.
    Mud,
    /// Extinguishes burning units.
    Water,
}

impl TerrainKind {
    /// Parse the lowercase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fire" => Some(TerrainKind::Fire),
            "ice" => Some(TerrainKind::Ice),
            "mud" => Some(TerrainKind::Mud),
            "water" => Some(TerrainKind::Water),
            _ => None,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TerrainKind::Fire => "fire",
            TerrainKind::Ice => "ice",
            TerrainKind::Mud => "mud",
            TerrainKind::Water => "water",
        }
    }
}

/// Weather kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherKind {
    /// Raises humidity.
    Rain,
    /// Raises temperature.
    Heat,
    /// Lowers temperature.
    Snow,
}

impl WeatherKind {
    /// Parse the lowercase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rain" => Some(WeatherKind::Rain),
            "heat" | "heatwave" => Some(WeatherKind::Heat),
            "snow" => Some(WeatherKind::Snow),
            _ => None,
        }
    }

    /// `(temperature, humidity)` target offsets at full intensity.
    fn bias(self) -> (i32, i32) {
        match self {
            WeatherKind::Rain => (-4, 45),
            WeatherKind::Heat => (25, -30),
            WeatherKind::Snow => (-30, 10),
        }
    }
}

/// An active weather front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Weather {
    /// Kind.
    pub kind: WeatherKind,
    /// Strength in `[0, 1]`.
    pub intensity: Fixed,
    /// Tick at which the front ends.
    pub until: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TerrainPatch {
    kind: TerrainKind,
    expires_at: u64,
}

/// Environmental field state.
#[derive(Debug, Clone)]
pub struct Environment {
    width: u32,
    height: u32,
    enabled: bool,
    temperature: Vec<Fixed>,
    humidity: Vec<Fixed>,
    terrain: Vec<Option<TerrainPatch>>,
    weather: Option<Weather>,
}

impl Environment {
    /// Create a disabled environment for a `width x height` field.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            enabled: false,
            temperature: Vec::new(),
            humidity: Vec::new(),
            terrain: Vec::new(),
            weather: None,
        }
    }

    /// Whether the grids have been allocated.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self) {
        if self.enabled {
            return;
        }
        let cells = (self.width * self.height) as usize;
        self.temperature = vec![Fixed::from_num(AMBIENT_TEMPERATURE); cells];
        self.humidity = vec![Fixed::from_num(AMBIENT_HUMIDITY); cells];
        self.terrain = vec![None; cells];
        self.enabled = true;
        tracing::debug!(cells, "Environment enabled");
    }

    fn cell(&self, position: Vec2Fixed) -> Option<usize> {
        let x = position.x.floor().to_num::<i64>();
        let y = position.y.floor().to_num::<i64>();
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        Some((y * i64::from(self.width) + x) as usize)
    }

    /// Temperature at a position.
    #[must_use]
    pub fn temperature_at(&self, position: Vec2Fixed) -> Fixed {
        self.cell(position)
            .filter(|_| self.enabled)
            .map_or(Fixed::from_num(AMBIENT_TEMPERATURE), |c| self.temperature[c])
    }

    /// Humidity at a position.
    #[must_use]
    pub fn humidity_at(&self, position: Vec2Fixed) -> Fixed {
        self.cell(position)
            .filter(|_| self.enabled)
            .map_or(Fixed::from_num(AMBIENT_HUMIDITY), |c| self.humidity[c])
    }

    /// Terrain overlay at a position.
    #[must_use]
    pub fn terrain_at(&self, position: Vec2Fixed) -> Option<TerrainKind> {
        let cell = self.cell(position).filter(|_| self.enabled)?;
        self.terrain[cell].map(|patch| patch.kind)
    }

    /// Active weather front.
    #[must_use]
    pub fn weather(&self) -> Option<Weather> {
        self.weather
    }

    /// Paint a terrain disc that expires after `duration` ticks.
    pub fn paint_terrain(
        &mut self,
        center: Vec2Fixed,
        radius: Fixed,
        kind: TerrainKind,
        duration: u64,
        now: u64,
    ) {
        self.enable();
        let radius_sq = radius.saturating_mul(radius);
        let half = Fixed::from_num(0.5);
        for y in 0..self.height {
            for x in 0..self.width {
                let cell_center = Vec2Fixed::new(Fixed::from_num(x) + half, Fixed::from_num(y) + half);
                if cell_center.distance_squared(center) <= radius_sq {
                    let idx = (y * self.width + x) as usize;
                    self.terrain[idx] = Some(TerrainPatch {
                        kind,
                        expires_at: now.saturating_add(duration),
                    });
                }
            }
        }
        // Small radii may miss every cell centre; always cover the centre cell.
        if let Some(idx) = self.cell(center) {
            self.terrain[idx] = Some(TerrainPatch {
                kind,
                expires_at: now.saturating_add(duration),
            });
        }
    }

    /// Start a weather front.
    pub fn set_weather(&mut self, kind: WeatherKind, intensity: Fixed, duration: u64, now: u64) {
        self.enable();
        self.weather = Some(Weather {
            kind,
            intensity: intensity.clamp(Fixed::ZERO, Fixed::from_num(1)),
            until: now.saturating_add(duration),
        });
    }

    /// Advance one tick: expire terrain and weather, relax temperature and
    /// humidity toward their (weather-biased) targets, apply fire heat,
    /// extinguish wet fires and melt warm ice.
    pub fn step(&mut self, now: u64) {
        if !self.enabled {
            return;
        }

        if self.weather.is_some_and(|w| now >= w.until) {
            self.weather = None;
        }

        let (t_bias, h_bias) = self.weather.map_or((Fixed::ZERO, Fixed::ZERO), |w| {
            let (t, h) = w.kind.bias();
            (Fixed::from_num(t) * w.intensity, Fixed::from_num(h) * w.intensity)
        });
        let target_t = Fixed::from_num(AMBIENT_TEMPERATURE) + t_bias;
        let target_h = Fixed::from_num(AMBIENT_HUMIDITY) + h_bias;
        let relax = Fixed::from_num(10);

        for idx in 0..self.terrain.len() {
            if self.terrain[idx].is_some_and(|p| now >= p.expires_at) {
                self.terrain[idx] = None;
            }

            let (t, h) = (self.temperature[idx], self.humidity[idx]);
            self.temperature[idx] = t + (target_t - t) / relax;
            self.humidity[idx] = h + (target_h - h) / relax;

            match self.terrain[idx].map(|p| p.kind) {
                Some(TerrainKind::Fire) => {
                    self.temperature[idx] += Fixed::from_num(FIRE_HEAT);
                    if self.humidity[idx] > Fixed::from_num(EXTINGUISH_HUMIDITY) {
                        self.terrain[idx] = None;
                    }
                }
                Some(TerrainKind::Ice) => {
                    if self.temperature[idx] > Fixed::from_num(MELT_TEMPERATURE) {
                        if let Some(patch) = self.terrain[idx].as_mut() {
                            patch.kind = TerrainKind::Water;
                        }
                    }
                }
                Some(TerrainKind::Water) => {
                    self.humidity[idx] = self.humidity[idx].max(Fixed::from_num(EXTINGUISH_HUMIDITY));
                }
                Some(TerrainKind::Mud) | None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_reads_ambient() {
        let env = Environment::new(10, 10);
        assert!(!env.is_enabled());
        assert_eq!(env.temperature_at(Vec2Fixed::from_ints(3, 3)), Fixed::from_num(20));
        assert_eq!(env.humidity_at(Vec2Fixed::from_ints(3, 3)), Fixed::from_num(50));
        assert!(env.terrain_at(Vec2Fixed::from_ints(3, 3)).is_none());
    }

    #[test]
    fn test_terrain_paints_and_expires() {
        let mut env = Environment::new(10, 10);
        env.paint_terrain(Vec2Fixed::from_ints(5, 5), Fixed::from_num(1), TerrainKind::Mud, 3, 0);
        assert!(env.is_enabled());
        assert_eq!(env.terrain_at(Vec2Fixed::from_ints(5, 5)), Some(TerrainKind::Mud));
        assert!(env.terrain_at(Vec2Fixed::from_ints(9, 9)).is_none());

        env.step(1);
        env.step(2);
        assert_eq!(env.terrain_at(Vec2Fixed::from_ints(5, 5)), Some(TerrainKind::Mud));
        env.step(3);
        assert!(env.terrain_at(Vec2Fixed::from_ints(5, 5)).is_none());
    }

    #[test]
    fn test_fire_heats_cell() {
        let mut env = Environment::new(4, 4);
        env.paint_terrain(Vec2Fixed::from_ints(1, 1), Fixed::ZERO, TerrainKind::Fire, 10, 0);
        env.step(1);
        assert!(env.temperature_at(Vec2Fixed::from_ints(1, 1)) > Fixed::from_num(20));
        assert_eq!(env.temperature_at(Vec2Fixed::from_ints(3, 3)), Fixed::from_num(20));
    }

    #[test]
    fn test_rain_raises_humidity_and_puts_out_fire() {
        let mut env = Environment::new(4, 4);
        env.paint_terrain(Vec2Fixed::from_ints(2, 2), Fixed::ZERO, TerrainKind::Fire, 1000, 0);
        env.set_weather(WeatherKind::Rain, Fixed::from_num(1), 1000, 0);

        for tick in 1..60 {
            env.step(tick);
        }
        assert!(env.humidity_at(Vec2Fixed::from_ints(0, 0)) > Fixed::from_num(80));
        assert!(env.terrain_at(Vec2Fixed::from_ints(2, 2)).is_none());
    }

    #[test]
    fn test_weather_expires() {
        let mut env = Environment::new(2, 2);
        env.set_weather(WeatherKind::Snow, Fixed::from_num(1), 5, 0);
        env.step(4);
        assert!(env.weather().is_some());
        env.step(5);
        assert!(env.weather().is_none());
    }
}
