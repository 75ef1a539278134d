//! Categorized view of everything a device reports, used by the
//! `hydrolink-discover` tool to document new data points.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::property::{Device, Property, PropertyValue};
use crate::scaling;
use crate::traits::HandleProperty;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub value: PropertyValue,
    pub updated: Option<String>,
}

impl Reading {
    /// Applies the scaling rules for `key`.
    pub fn from_property(key: &str, prop: &Property) -> Self {
        Self {
            value: scaling::scale(key, &prop.value),
            updated: prop.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub system_type: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub nickname: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
}

impl From<&Device> for DeviceSummary {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            system_type: device.system_type.clone(),
            model: device
                .model_description
                .clone()
                .or_else(|| device.system_type_display.clone()),
            serial: device.product_serial_number.clone(),
            nickname: device.nickname.clone(),
            location: device.location.clone(),
            image_url: device.image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    pub is_online: bool,
    pub last_updated: Option<String>,
    pub signal_strength: Option<PropertyValue>,
    pub signal_bars: Option<PropertyValue>,
}

impl HandleProperty for Status {
    fn handle_property(&mut self, key: &str, reading: &Reading) -> bool {
        match key {
            "_internal_is_online" => {
                self.is_online = reading.value.as_bool().unwrap_or(false);
                self.last_updated = reading.updated.clone();
            }
            "rf_signal_strength_dbm" => self.signal_strength = Some(reading.value.clone()),
            "rf_signal_bars" => self.signal_bars = Some(reading.value.clone()),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyMetrics {
    pub usage: Option<Reading>,
    pub average_usage: Option<Reading>,
    pub rock_removed: Option<Reading>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentMetrics {
    pub flow_rate: Option<Reading>,
    pub total_usage: Option<Reading>,
    pub treated_water_remaining: Option<Reading>,
    pub capacity_remaining: Option<Reading>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LifetimeMetrics {
    pub total_usage: Option<Reading>,
    pub total_regens: Option<Reading>,
    pub rock_removed: Option<Reading>,
    pub days_in_operation: Option<Reading>,
    pub days_since_regen: Option<Reading>,
    pub time_lost_events: Option<Reading>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    pub daily: DailyMetrics,
    pub current: CurrentMetrics,
    pub lifetime: LifetimeMetrics,
}

impl HandleProperty for Metrics {
    fn handle_property(&mut self, key: &str, reading: &Reading) -> bool {
        let slot = match key {
            "gallons_used_today" => &mut self.daily.usage,
            "avg_daily_use_gals" => &mut self.daily.average_usage,
            "daily_avg_rock_removed_lbs" => &mut self.daily.rock_removed,

            "current_water_flow_gpm" => &mut self.current.flow_rate,
            "water_counter_gals" => &mut self.current.total_usage,
            "treated_water_avail_gals" => &mut self.current.treated_water_remaining,
            "capacity_remaining_percent" => &mut self.current.capacity_remaining,

            "total_outlet_water_gals" => &mut self.lifetime.total_usage,
            "total_regens" => &mut self.lifetime.total_regens,
            "total_rock_removed_lbs" => &mut self.lifetime.rock_removed,
            "days_in_operation" => &mut self.lifetime.days_in_operation,
            "days_since_last_regen" => &mut self.lifetime.days_since_regen,
            "time_lost_events" => &mut self.lifetime.time_lost_events,
            _ => return false,
        };
        *slot = Some(reading.clone());
        true
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Salt {
    pub level: Option<Reading>,
    pub days_remaining: Option<Reading>,
    pub low_alert: Option<Reading>,
    pub efficiency: Option<Reading>,
    pub total_usage: Option<Reading>,
    pub avg_per_regen: Option<Reading>,
    #[serde(rename = "type")]
    pub salt_type: Option<Reading>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Service {
    pub active: Option<Reading>,
    pub reminder_months: Option<Reading>,
    pub reminder_alert: Option<Reading>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Errors {
    pub code: Option<Reading>,
    pub alert: Option<Reading>,
    pub leak_alert: Option<Reading>,
    pub flow_alert: Option<Reading>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Maintenance {
    pub salt: Salt,
    pub service: Service,
    pub errors: Errors,
}

impl HandleProperty for Maintenance {
    fn handle_property(&mut self, key: &str, reading: &Reading) -> bool {
        let slot = match key {
            "salt_level_tenths" => &mut self.salt.level,
            "out_of_salt_estimate_days" => &mut self.salt.days_remaining,
            "low_salt_alert" => &mut self.salt.low_alert,
            "salt_effic_grains_per_lb" => &mut self.salt.efficiency,
            "total_salt_use_lbs" => &mut self.salt.total_usage,
            "avg_salt_per_regen_lbs" => &mut self.salt.avg_per_regen,
            "salt_type_enum" => &mut self.salt.salt_type,

            "service_active" => &mut self.service.active,
            "service_reminder_months" => &mut self.service.reminder_months,
            "service_reminder_alert" => &mut self.service.reminder_alert,

            "error_code" => &mut self.errors.code,
            "error_code_alert" => &mut self.errors.alert,
            "floor_leak_detector_alert" => &mut self.errors.leak_alert,
            "flow_monitor_alert" => &mut self.errors.flow_alert,
            _ => return false,
        };
        *slot = Some(reading.clone());
        true
    }
}

pub const SETTINGS_KEYS: &[&str] = &[
    "hardness_grains",
    "iron_level_tenths_ppm",
    "operating_capacity_grains",
    "regen_time_secs",
    "model_display_code",
    "base_software_version",
    "esp_software_part_number",
];

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Settings(pub BTreeMap<String, Reading>);

impl HandleProperty for Settings {
    fn handle_property(&mut self, key: &str, reading: &Reading) -> bool {
        if !SETTINGS_KEYS.contains(&key) {
            return false;
        }
        self.0.insert(key.to_string(), reading.clone());
        true
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceReport {
    pub device: DeviceSummary,
    pub status: Status,
    pub metrics: Metrics,
    pub maintenance: Maintenance,
    pub settings: Settings,
    /// Keys none of the sections above know about.
    pub unclassified: Vec<String>,
}

impl DeviceReport {
    pub fn from_device(device: &Device) -> Self {
        let mut report = DeviceReport {
            device: DeviceSummary::from(device),
            ..Default::default()
        };
        for (key, prop) in &device.properties {
            let reading = Reading::from_property(key, prop);
            let handled = report.status.handle_property(key, &reading)
                || report.metrics.handle_property(key, &reading)
                || report.maintenance.handle_property(key, &reading)
                || report.settings.handle_property(key, &reading);
            if !handled {
                debug!(device_id = %device.id, key = %key, "unclassified HydroLink property");
                report.unclassified.push(key.clone());
            }
        }
        report
    }
}

pub fn clean_devices(devices: &[Device]) -> Vec<DeviceReport> {
    devices.iter().map(DeviceReport::from_device).collect()
}
