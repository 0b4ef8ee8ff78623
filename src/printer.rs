// src/printer.rs - Printer profiles held in the optimizer's registry
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::print_job::PrintJob;

/// Layer height assumed by the scheduling estimate (mm).
const ESTIMATE_LAYER_HEIGHT_MM: f64 = 0.2;
/// Speed-to-deposition factor used to turn a layer footprint into seconds.
const DEPOSITION_FACTOR: f64 = 50.0;
const MIN_PRINT_SPEED_MM_S: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterCapability {
    Fdm,
    Sla,
    Sls,
    Mjf,
    Metal,
    MultiColor,
    LargeFormat,
    HighSpeed,
}

impl fmt::Display for PrinterCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrinterCapability::Fdm => "fdm",
            PrinterCapability::Sla => "sla",
            PrinterCapability::Sls => "sls",
            PrinterCapability::Mjf => "mjf",
            PrinterCapability::Metal => "metal",
            PrinterCapability::MultiColor => "multi_color",
            PrinterCapability::LargeFormat => "large_format",
            PrinterCapability::HighSpeed => "high_speed",
        };
        write!(f, "{}", name)
    }
}

/// Axis-aligned envelope in millimetres. Used both for a printer's build
/// volume and for a job's bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildVolume {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl BuildVolume {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// True when `other` fits inside `self` on every axis.
    pub fn contains(&self, other: &BuildVolume) -> bool {
        other.x <= self.x && other.y <= self.y && other.z <= self.z
    }
}

impl Default for BuildVolume {
    fn default() -> Self {
        Self::new(256.0, 256.0, 256.0)
    }
}

/// Why a printer cannot take a job. Checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incompatibility {
    BuildVolume,
    Material(String),
    Capability(PrinterCapability),
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::BuildVolume => write!(f, "job exceeds build volume"),
            Incompatibility::Material(m) => write!(f, "material '{}' not supported", m),
            Incompatibility::Capability(c) => write!(f, "missing capability '{}'", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterProfile {
    pub printer_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub capabilities: BTreeSet<PrinterCapability>,
    #[serde(default)]
    pub build_volume: BuildVolume,
    #[serde(default = "default_print_speed")]
    pub print_speed_mm_s: f64,
    #[serde(default)]
    pub supported_materials: Vec<String>,
    #[serde(default)]
    pub current_material: Option<String>,
    #[serde(default = "default_hourly_cost")]
    pub hourly_cost: f64,
    #[serde(default = "default_material_cost_multiplier")]
    pub material_cost_multiplier: f64,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub zone: String,

    // Live fields, only mutated through the optimizer's registry accessors.
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub current_job_id: Option<String>,
    #[serde(default)]
    pub estimated_free_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub maintenance_due: bool,
}

fn default_print_speed() -> f64 { 100.0 }
fn default_hourly_cost() -> f64 { 5.0 }
fn default_material_cost_multiplier() -> f64 { 1.0 }
fn default_available() -> bool { true }

impl PrinterProfile {
    pub fn new(printer_id: impl Into<String>, model: impl Into<String>) -> Self {
        let printer_id = printer_id.into();
        Self {
            name: printer_id.clone(),
            printer_id,
            model: model.into(),
            capabilities: BTreeSet::new(),
            build_volume: BuildVolume::default(),
            print_speed_mm_s: default_print_speed(),
            supported_materials: Vec::new(),
            current_material: None,
            hourly_cost: default_hourly_cost(),
            material_cost_multiplier: default_material_cost_multiplier(),
            location: String::new(),
            zone: String::new(),
            available: true,
            current_job_id: None,
            estimated_free_at: None,
            maintenance_due: false,
        }
    }

    pub fn with_build_volume(mut self, x: f64, y: f64, z: f64) -> Self {
        self.build_volume = BuildVolume::new(x, y, z);
        self
    }

    pub fn with_materials<I, S>(mut self, materials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_materials = materials.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capability(mut self, capability: PrinterCapability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_speed(mut self, print_speed_mm_s: f64) -> Self {
        self.print_speed_mm_s = print_speed_mm_s;
        self
    }

    pub fn with_costs(mut self, hourly_cost: f64, material_cost_multiplier: f64) -> Self {
        self.hourly_cost = hourly_cost;
        self.material_cost_multiplier = material_cost_multiplier;
        self
    }

    /// Eligible for new work at all, regardless of the job.
    pub fn is_schedulable(&self) -> bool {
        self.available && !self.maintenance_due
    }

    /// Hard constraints: build volume, then material, then capabilities.
    pub fn check(&self, job: &PrintJob) -> Result<(), Incompatibility> {
        if !self.build_volume.contains(&job.size) {
            return Err(Incompatibility::BuildVolume);
        }
        if let Some(material) = &job.material {
            if !self.supported_materials.iter().any(|m| m == material) {
                return Err(Incompatibility::Material(material.clone()));
            }
        }
        if let Some(missing) = job
            .required_capabilities
            .iter()
            .find(|c| !self.capabilities.contains(c))
        {
            return Err(Incompatibility::Capability(*missing));
        }
        Ok(())
    }

    pub fn can_print(&self, job: &PrintJob) -> bool {
        self.check(job).is_ok()
    }

    /// Rough print time in hours from the job envelope: layer count times a
    /// per-layer time derived from the footprint and this printer's speed.
    pub fn estimate_hours(&self, job: &PrintJob) -> f64 {
        let speed = self.print_speed_mm_s.max(MIN_PRINT_SPEED_MM_S);
        let layers = job.size.z / ESTIMATE_LAYER_HEIGHT_MM;
        let layer_seconds = (job.size.x * job.size.y) / (speed * DEPOSITION_FACTOR);
        (layers * layer_seconds / 3600.0).max(0.0)
    }

    pub fn estimate_cost(&self, job: &PrintJob) -> f64 {
        self.estimate_hours(job) * self.hourly_cost * self.material_cost_multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(x: f64, y: f64, z: f64) -> PrintJob {
        PrintJob::new("part", BuildVolume::new(x, y, z))
    }

    #[test]
    fn test_build_volume_checked_per_axis() {
        let printer = PrinterProfile::new("p1", "mk4").with_build_volume(250.0, 210.0, 220.0);
        assert!(printer.can_print(&job(250.0, 210.0, 220.0)));
        assert_eq!(printer.check(&job(251.0, 10.0, 10.0)), Err(Incompatibility::BuildVolume));
        assert_eq!(printer.check(&job(10.0, 211.0, 10.0)), Err(Incompatibility::BuildVolume));
        assert_eq!(printer.check(&job(10.0, 10.0, 221.0)), Err(Incompatibility::BuildVolume));
    }

    #[test]
    fn test_material_and_capability_constraints() {
        let printer = PrinterProfile::new("p1", "x1c")
            .with_materials(["pla", "petg"])
            .with_capability(PrinterCapability::Fdm);

        assert!(printer.can_print(&job(10.0, 10.0, 10.0).with_material("petg")));
        assert_eq!(
            printer.check(&job(10.0, 10.0, 10.0).with_material("abs")),
            Err(Incompatibility::Material("abs".to_string()))
        );
        assert_eq!(
            printer.check(&job(10.0, 10.0, 10.0).with_capability(PrinterCapability::MultiColor)),
            Err(Incompatibility::Capability(PrinterCapability::MultiColor))
        );
        // Volume is reported before material.
        assert_eq!(
            printer.check(&job(500.0, 10.0, 10.0).with_material("abs")),
            Err(Incompatibility::BuildVolume)
        );
    }

    #[test]
    fn test_estimates_are_monotonic() {
        let printer = PrinterProfile::new("p1", "mk4").with_costs(4.0, 1.5);
        let small = job(20.0, 20.0, 20.0);
        let large = job(40.0, 40.0, 40.0);
        assert!(printer.estimate_hours(&large) > printer.estimate_hours(&small));
        assert!(printer.estimate_cost(&large) > printer.estimate_cost(&small));

        let fast = printer.clone().with_speed(300.0);
        assert!(fast.estimate_hours(&large) < printer.estimate_hours(&large));

        let expected = printer.estimate_hours(&small) * 4.0 * 1.5;
        assert!((printer.estimate_cost(&small) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: PrinterProfile = toml::from_str(
            r#"
            printer_id = "p7"
            supported_materials = ["pla"]
            capabilities = ["fdm", "high_speed"]
            "#,
        )
        .unwrap();
        assert_eq!(profile.build_volume, BuildVolume::default());
        assert_eq!(profile.print_speed_mm_s, 100.0);
        assert!(profile.available);
        assert!(profile.capabilities.contains(&PrinterCapability::HighSpeed));
    }
}
