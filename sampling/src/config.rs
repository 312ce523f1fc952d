use std::collections::BTreeMap;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::bucket::CycleGrid;
use crate::error::ConfigError;
use crate::idhr::{IdhrConfig, Weighting};
use crate::shift::ShiftConfig;

/// Raw, user-facing configuration. Every field has a default; JSON keys match
/// the option names used by the API layer (`pointIntervalMs`, `windows`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingConfig {
    /// Fine sampling period.
    pub point_interval_ms: u64,

    /// Length of one mark. Must be an exact multiple of `point_interval_ms`.
    pub cycle_duration_ms: u64,

    /// Retention windows, name -> duration. Each duration must be a positive
    /// multiple of `cycle_duration_ms`; capacity is the quotient.
    #[serde(deserialize_with = "unique_windows")]
    pub windows: BTreeMap<String, u64>,

    // =========================
    // Shift detection
    // =========================
    /// Minimum relative delta (percentage points) for a cycle to count.
    pub epsilon_pct: f64,

    /// Consecutive qualifying cycles needed to fire a shift.
    pub shift_window_size: usize,

    /// Stamps retained per symbol.
    pub max_stamps: usize,

    // =========================
    // IDHR
    // =========================
    pub primary_bins: usize,
    pub secondary_bins: usize,
    pub selected_bins: usize,
    pub refine_primaries: usize,
    pub idhr_weighting: Weighting,

    /// Half-width of the anchored range around the session's opening reference.
    pub idhr_band_pct: f64,

    /// Window whose point history feeds IDHR. Defaults to the shortest one.
    pub idhr_window: Option<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let windows = [("30m", 1_800_000), ("1h", 3_600_000), ("3h", 10_800_000)]
            .into_iter()
            .map(|(name, ms)| (name.to_string(), ms))
            .collect();

        Self {
            point_interval_ms: 5_000,
            cycle_duration_ms: 40_000,
            windows,
            epsilon_pct: 0.35,
            shift_window_size: 5,
            max_stamps: 64,
            primary_bins: 16,
            secondary_bins: 16,
            selected_bins: 16,
            refine_primaries: 1,
            idhr_weighting: Weighting::Count,
            idhr_band_pct: 5.0,
            idhr_window: None,
        }
    }
}

/// Retention policy of one named window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowPolicy {
    pub name: String,
    pub duration_ms: u64,
    /// Marks retained.
    pub capacity: usize,
}

/// Checked configuration with derived values. Stores and engines only accept this.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedConfig {
    pub grid: CycleGrid,
    /// Shortest first.
    pub windows: Vec<WindowPolicy>,
    pub shift: ShiftConfig,
    pub idhr: IdhrConfig,
    pub idhr_band_pct: f64,
    pub idhr_window: String,
}

impl ValidatedConfig {
    pub fn expected_points(&self) -> usize {
        self.grid.expected_points()
    }

    pub fn window(&self, name: &str) -> Option<&WindowPolicy> {
        self.windows.iter().find(|w| w.name == name)
    }

    /// Capacity of the largest window.
    pub fn max_capacity(&self) -> usize {
        self.windows.iter().map(|w| w.capacity).max().unwrap_or(0)
    }
}

impl SamplingConfig {
    pub fn from_json_str(doc: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(doc).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults overlaid with `SAMPLER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SamplingConfig::from_env`] with an explicit variable source.
    ///
    /// `SAMPLER_WINDOWS` takes `name=durationMs` pairs separated by commas.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        set_parsed(&lookup, "SAMPLER_POINT_INTERVAL_MS", &mut cfg.point_interval_ms)?;
        set_parsed(&lookup, "SAMPLER_CYCLE_DURATION_MS", &mut cfg.cycle_duration_ms)?;
        set_parsed(&lookup, "SAMPLER_EPSILON_PCT", &mut cfg.epsilon_pct)?;
        set_parsed(&lookup, "SAMPLER_SHIFT_WINDOW_SIZE", &mut cfg.shift_window_size)?;
        set_parsed(&lookup, "SAMPLER_MAX_STAMPS", &mut cfg.max_stamps)?;
        set_parsed(&lookup, "SAMPLER_PRIMARY_BINS", &mut cfg.primary_bins)?;
        set_parsed(&lookup, "SAMPLER_SECONDARY_BINS", &mut cfg.secondary_bins)?;
        set_parsed(&lookup, "SAMPLER_SELECTED_BINS", &mut cfg.selected_bins)?;
        set_parsed(&lookup, "SAMPLER_REFINE_PRIMARIES", &mut cfg.refine_primaries)?;
        set_parsed(&lookup, "SAMPLER_IDHR_BAND_PCT", &mut cfg.idhr_band_pct)?;

        if let Some(name) = lookup("SAMPLER_IDHR_WINDOW") {
            cfg.idhr_window = Some(name);
        }

        if let Some(raw) = lookup("SAMPLER_IDHR_WEIGHTING") {
            cfg.idhr_weighting = match raw.trim().to_ascii_lowercase().as_str() {
                "count" => Weighting::Count,
                "volume" => Weighting::Volume,
                _ => {
                    return Err(ConfigError::Env {
                        key: "SAMPLER_IDHR_WEIGHTING",
                        value: raw,
                    });
                }
            };
        }

        if let Some(raw) = lookup("SAMPLER_WINDOWS") {
            cfg.windows = parse_windows(&raw)?;
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let grid = CycleGrid::new(self.point_interval_ms, self.cycle_duration_ms)?;

        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }

        let mut windows = Vec::with_capacity(self.windows.len());
        for (name, &duration_ms) in &self.windows {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyWindowName);
            }
            if duration_ms == 0 || duration_ms % self.cycle_duration_ms != 0 {
                return Err(ConfigError::WindowNotMultiple {
                    name: name.clone(),
                    duration_ms,
                    cycle_ms: self.cycle_duration_ms,
                });
            }
            windows.push(WindowPolicy {
                name: name.clone(),
                duration_ms,
                capacity: (duration_ms / self.cycle_duration_ms) as usize,
            });
        }
        windows.sort_by(|a, b| a.duration_ms.cmp(&b.duration_ms).then_with(|| a.name.cmp(&b.name)));

        for (label, n) in [
            ("shiftWindowSize", self.shift_window_size),
            ("maxStamps", self.max_stamps),
            ("primaryBins", self.primary_bins),
            ("secondaryBins", self.secondary_bins),
            ("selectedBins", self.selected_bins),
            ("refinePrimaries", self.refine_primaries),
        ] {
            if n == 0 {
                return Err(ConfigError::ZeroCount(label));
            }
        }

        if !self.epsilon_pct.is_finite() || self.epsilon_pct < 0.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "epsilonPct",
                value: self.epsilon_pct,
            });
        }
        if !self.idhr_band_pct.is_finite() || self.idhr_band_pct <= 0.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "idhrBandPct",
                value: self.idhr_band_pct,
            });
        }

        let idhr_window = match &self.idhr_window {
            Some(name) if windows.iter().any(|w| &w.name == name) => name.clone(),
            Some(name) => return Err(ConfigError::UnknownIdhrWindow(name.clone())),
            None => windows[0].name.clone(),
        };

        Ok(ValidatedConfig {
            grid,
            windows,
            shift: ShiftConfig {
                epsilon_pct: self.epsilon_pct,
                window_size: self.shift_window_size,
                max_stamps: self.max_stamps,
            },
            idhr: IdhrConfig {
                primary_bins: self.primary_bins,
                secondary_bins: self.secondary_bins,
                selected_bins: self.selected_bins,
                refine_primaries: self.refine_primaries,
                weighting: self.idhr_weighting,
            },
            idhr_band_pct: self.idhr_band_pct,
            idhr_window,
        })
    }
}

fn set_parsed<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key, value: raw })?;
    }
    Ok(())
}

fn parse_windows(raw: &str) -> Result<BTreeMap<String, u64>, ConfigError> {
    let mut windows = BTreeMap::new();
    for pair in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let parsed = pair
            .split_once('=')
            .and_then(|(name, ms)| Some((name.trim().to_string(), ms.trim().parse().ok()?)));
        let Some((name, ms)) = parsed else {
            return Err(ConfigError::Env {
                key: "SAMPLER_WINDOWS",
                value: raw.to_string(),
            });
        };
        if windows.insert(name.clone(), ms).is_some() {
            return Err(ConfigError::DuplicateWindow(name));
        }
    }
    Ok(windows)
}

/// Window map that refuses repeated names instead of keeping the last one.
fn unique_windows<'de, D>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct WindowsVisitor;

    impl<'de> Visitor<'de> for WindowsVisitor {
        type Value = BTreeMap<String, u64>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a map of window name to duration in ms")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut windows = BTreeMap::new();
            while let Some((name, ms)) = access.next_entry::<String, u64>()? {
                if windows.contains_key(&name) {
                    return Err(de::Error::custom(ConfigError::DuplicateWindow(name)));
                }
                windows.insert(name, ms);
            }
            Ok(windows)
        }
    }

    deserializer.deserialize_map(WindowsVisitor)
}
