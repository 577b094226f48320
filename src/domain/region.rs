use serde::{Deserialize, Serialize};

/// Static region attributes (collection `regions`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetadata {
    pub region_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default = "default_soil_type")]
    pub soil_type: String,
    #[serde(default = "default_permeability")]
    pub permeability_index: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_soil_type() -> String {
    "sandy_loam".to_string()
}

fn default_permeability() -> f64 {
    0.5
}

fn default_active() -> bool {
    true
}

impl RegionMetadata {
    /// Metadata used when a region has no stored record.
    pub fn fallback(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            name: String::new(),
            state: None,
            soil_type: default_soil_type(),
            permeability_index: default_permeability(),
            active: true,
        }
    }

    /// Rolling window for the net flux sum.
    ///
    /// Less permeable ground keeps the rainfall signal longer.
    pub fn flux_window_days(&self) -> usize {
        match self.soil_type.trim().to_ascii_lowercase().as_str() {
            "clay" => 30,
            "rock" => 60,
            _ => 7,
        }
    }
}
