use serde::Serialize;

use crate::coordinator::Coordinator;
use crate::property::{Device, PropertyValue, Snapshot};
use crate::scaling;

pub const DOMAIN: &str = "hydrolink";
pub const MANUFACTURER: &str = "EcoWater";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Connectivity,
    Duration,
    Problem,
    SignalStrength,
    Water,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Config,
    Diagnostic,
}

/// Presentation metadata for a known property key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub icon: &'static str,
    pub entity_category: Option<EntityCategory>,
}

const fn describe(key: &'static str, name: &'static str, icon: &'static str) -> SensorDescription {
    SensorDescription {
        key,
        name,
        unit: None,
        device_class: None,
        state_class: None,
        icon,
        entity_category: None,
    }
}

impl SensorDescription {
    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    const fn class(mut self, class: DeviceClass) -> Self {
        self.device_class = Some(class);
        self
    }

    const fn state(mut self, state: StateClass) -> Self {
        self.state_class = Some(state);
        self
    }

    const fn diagnostic(mut self) -> Self {
        self.entity_category = Some(EntityCategory::Diagnostic);
        self
    }
}

use DeviceClass as D;
use StateClass as S;

pub const SENSOR_DESCRIPTIONS: &[SensorDescription] = &[
    // status
    describe("_internal_is_online", "Online Status", "mdi:wifi").class(D::Connectivity).diagnostic(),
    describe("rf_signal_strength_dbm", "Signal Strength", "mdi:wifi-strength-2")
        .unit("dBm")
        .class(D::SignalStrength)
        .state(S::Measurement)
        .diagnostic(),
    describe("rf_signal_bars", "Signal Bars", "mdi:signal").state(S::Measurement).diagnostic(),
    // daily
    describe("gallons_used_today", "Water Usage Today", "mdi:water")
        .unit("gal")
        .class(D::Water)
        .state(S::TotalIncreasing),
    describe("avg_daily_use_gals", "Average Daily Water Usage", "mdi:water")
        .unit("gal")
        .class(D::Water)
        .state(S::Total),
    describe("daily_avg_rock_removed_lbs", "Average Daily Hardness Removed", "mdi:diamond-stone")
        .unit("lb")
        .state(S::Measurement),
    // current
    describe("current_water_flow_gpm", "Water Flow Rate", "mdi:water-pump")
        .unit("gpm")
        .state(S::Measurement),
    describe("water_counter_gals", "Water Counter", "mdi:counter")
        .unit("gal")
        .class(D::Water)
        .state(S::TotalIncreasing),
    describe("treated_water_avail_gals", "Treated Water Available", "mdi:water-check")
        .unit("gal")
        .state(S::Measurement),
    describe("capacity_remaining_percent", "Capacity Remaining", "mdi:gauge")
        .unit("%")
        .state(S::Measurement),
    // lifetime
    describe("total_outlet_water_gals", "Total Water Usage", "mdi:water")
        .unit("gal")
        .class(D::Water)
        .state(S::TotalIncreasing),
    describe("total_regens", "Total Regenerations", "mdi:counter").state(S::TotalIncreasing),
    describe("total_rock_removed_lbs", "Total Hardness Removed", "mdi:diamond-stone")
        .unit("lb")
        .state(S::TotalIncreasing),
    describe("days_in_operation", "Days in Operation", "mdi:calendar")
        .unit("d")
        .state(S::Measurement)
        .diagnostic(),
    describe("days_since_last_regen", "Days Since Last Regeneration", "mdi:calendar-clock")
        .unit("d")
        .state(S::Measurement),
    describe("time_lost_events", "Power Outages", "mdi:power-plug-off")
        .state(S::TotalIncreasing)
        .diagnostic(),
    // salt
    describe("salt_level_tenths", "Salt Level", "mdi:grain")
        .unit("%")
        .state(S::Measurement),
    describe("out_of_salt_estimate_days", "Salt Days Remaining", "mdi:calendar-end")
        .unit("d")
        .state(S::Measurement),
    describe("low_salt_alert", "Low Salt Alert", "mdi:alert").class(D::Problem),
    describe("salt_effic_grains_per_lb", "Salt Efficiency", "mdi:chart-line")
        .unit("gr/lb")
        .state(S::Measurement)
        .diagnostic(),
    describe("total_salt_use_lbs", "Total Salt Used", "mdi:grain")
        .unit("lb")
        .state(S::TotalIncreasing),
    describe("avg_salt_per_regen_lbs", "Average Salt per Regeneration", "mdi:grain")
        .unit("lb")
        .state(S::Measurement),
    describe("salt_type_enum", "Salt Type", "mdi:shaker-outline").diagnostic(),
    // service and errors
    describe("service_reminder_alert", "Service Reminder", "mdi:wrench-clock").class(D::Problem),
    describe("error_code", "Error Code", "mdi:alert-circle-outline").diagnostic(),
    describe("error_code_alert", "System Error", "mdi:alert-circle-outline")
        .class(D::Problem)
        .diagnostic(),
    describe("floor_leak_detector_alert", "Leak Detected", "mdi:water-alert").class(D::Problem),
    describe("flow_monitor_alert", "Flow Monitor Alert", "mdi:water-alert").class(D::Problem),
    // settings
    describe("hardness_grains", "Water Hardness", "mdi:water-outline")
        .unit("gpg")
        .state(S::Measurement)
        .diagnostic(),
    describe("iron_level_tenths_ppm", "Iron Level", "mdi:water-opacity")
        .unit("ppm")
        .state(S::Measurement)
        .diagnostic(),
    describe("operating_capacity_grains", "Operating Capacity", "mdi:gauge")
        .unit("gr")
        .diagnostic(),
    describe("regen_time_secs", "Regeneration Time", "mdi:timer-outline")
        .unit("s")
        .class(D::Duration)
        .diagnostic(),
    describe("model_display_code", "Model Code", "mdi:information-outline").diagnostic(),
    describe("base_software_version", "Software Version", "mdi:information-outline").diagnostic(),
];

pub const DEFAULT_ENABLED_SENSORS: &[&str] = &[
    "_internal_is_online",
    "gallons_used_today",
    "avg_daily_use_gals",
    "current_water_flow_gpm",
    "treated_water_avail_gals",
    "capacity_remaining_percent",
    "days_since_last_regen",
    "salt_level_tenths",
    "out_of_salt_estimate_days",
    "low_salt_alert",
    "error_code",
    "error_code_alert",
    "floor_leak_detector_alert",
    "hardness_grains",
];

pub fn description(key: &str) -> Option<&'static SensorDescription> {
    SENSOR_DESCRIPTIONS.iter().find(|d| d.key == key)
}

/// Registry identity of the physical softener.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    fn for_device(device: &Device) -> Self {
        Self {
            identifiers: vec![(DOMAIN.to_string(), device.id.clone())],
            name: device.display_name().to_string(),
            manufacturer: MANUFACTURER,
            model: device
                .model_description
                .clone()
                .or_else(|| device.system_type_display.clone()),
            serial_number: device.product_serial_number.clone(),
        }
    }
}

/// One published reading: a property of one softener.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub device_id: String,
    pub key: String,
    pub name: String,
    pub unique_id: String,
    pub device_info: DeviceInfo,
    pub description: Option<&'static SensorDescription>,
    pub enabled_by_default: bool,
}

impl Sensor {
    pub fn new(device: &Device, key: &str) -> Self {
        let description = description(key);
        let label = match description {
            Some(d) => d.name.to_string(),
            None => title_case(key),
        };
        Self {
            device_id: device.id.clone(),
            key: key.to_string(),
            name: format!("{} {}", device.display_name(), label),
            unique_id: format!("{DOMAIN}_{}_{key}", device.id),
            device_info: DeviceInfo::for_device(device),
            description,
            enabled_by_default: DEFAULT_ENABLED_SENSORS.contains(&key),
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.description.and_then(|d| d.unit)
    }

    pub fn device_class(&self) -> Option<DeviceClass> {
        self.description.and_then(|d| d.device_class)
    }

    pub fn state_class(&self) -> Option<StateClass> {
        self.description.and_then(|d| d.state_class)
    }

    pub fn icon(&self) -> Option<&'static str> {
        self.description.map(|d| d.icon)
    }

    pub fn entity_category(&self) -> Option<EntityCategory> {
        self.description.and_then(|d| d.entity_category)
    }

    /// Scaled value of this reading in `snapshot`, if the device still
    /// reports it.
    pub fn value_in(&self, snapshot: &Snapshot) -> Option<PropertyValue> {
        let prop = snapshot.device(&self.device_id)?.property(&self.key)?;
        Some(scaling::scale(&self.key, &prop.value))
    }

    pub fn updated_at_in(&self, snapshot: &Snapshot) -> Option<String> {
        snapshot
            .device(&self.device_id)?
            .property(&self.key)?
            .updated_at
            .clone()
    }

    /// `None` while the coordinator is unavailable.
    pub async fn native_value(&self, coordinator: &Coordinator) -> Option<PropertyValue> {
        let snapshot = coordinator.snapshot().await?;
        self.value_in(&snapshot)
    }

    pub async fn available(&self, coordinator: &Coordinator) -> bool {
        self.native_value(coordinator).await.is_some()
    }
}

/// One sensor per property of every softener in the snapshot.
pub fn build_sensors(snapshot: &Snapshot) -> Vec<Sensor> {
    snapshot
        .softeners()
        .flat_map(|device| device.properties.keys().map(move |key| Sensor::new(device, key)))
        .collect()
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
