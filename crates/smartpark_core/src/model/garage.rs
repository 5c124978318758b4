//! Garage domain model.
//!
//! # Responsibility
//! - Define the garage record with its nested value objects and lists.
//! - Fill defaults for absent fields when building from caller input.
//! - Provide the default garage validation rules.
//!
//! # Invariants
//! - A garage without rates receives the standard HOUR/HALF/FULL schedule.
//! - Every device carries an id once built.

use crate::db::schema::StructuredType;
use crate::model::address::Address;
use crate::model::entity::Entity;
use crate::model::validation::{ValidationErrors, Validator, WEEKDAYS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const RATE_TYPES: &[&str] = &["HOUR", "HALF", "FULL"];
pub const CURRENCIES: &[&str] = &["$"];
pub const DEVICE_TYPES: &[&str] = &["PROXIMITY", "CAMERA", "LIGHT", "BIOHAZARD"];

const DEFAULT_DAY: &str = "SUNDAY";
const DEFAULT_TIME: &str = "12:00AM";
const DEFAULT_DEVICE_TYPE: &str = "PROXIMITY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hours {
    pub from: String,
    pub to: String,
    pub open: String,
    pub closed: String,
}

impl Default for Hours {
    fn default() -> Self {
        Self {
            from: DEFAULT_DAY.to_string(),
            to: DEFAULT_DAY.to_string(),
            open: DEFAULT_TIME.to_string(),
            closed: DEFAULT_TIME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capacity {
    pub total: i64,
    pub reserved: i64,
    pub occupied: i64,
}

/// One price tier (`garage_rate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    #[serde(rename = "type")]
    pub kind: String,
    pub rate: i64,
    pub currency: String,
}

impl Rate {
    pub fn new(kind: &str, rate: i64) -> Self {
        Self {
            kind: kind.to_string(),
            rate,
            currency: "$".to_string(),
        }
    }

    /// Schedule applied when a garage declares no rates.
    pub fn standard_schedule() -> Vec<Self> {
        vec![Self::new("HOUR", 10), Self::new("HALF", 20), Self::new("FULL", 25)]
    }
}

/// One revenue entry (`garage_revenue`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Revenue {
    /// Calendar day, `YYYY-MM-DD`.
    pub date: Option<String>,
    pub amount: f64,
}

/// Device as supplied by callers; every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

/// Sensor or camera installed in a garage (`garage_device`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub online: bool,
    pub image: Option<String>,
    pub stream: Option<String>,
}

impl From<DeviceInput> for Device {
    fn from(input: DeviceInput) -> Self {
        Self {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: input.kind.unwrap_or_else(|| DEFAULT_DEVICE_TYPE.to_string()),
            online: input.online.unwrap_or(false),
            image: input.image,
            stream: input.stream,
        }
    }
}

/// Garage fields as supplied by callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GarageInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<Hours>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rates: Option<Vec<Rate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<Vec<Revenue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<DeviceInput>>,
}

/// Parking garage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Garage {
    pub id: String,
    pub description: Option<String>,
    pub contact: Option<String>,
    pub online: bool,
    pub image: Option<String>,
    pub address: Address,
    pub hours: Hours,
    pub location: Location,
    pub capacity: Capacity,
    pub rates: Vec<Rate>,
    pub revenue: Vec<Revenue>,
    pub devices: Vec<Device>,
}

impl Entity for Garage {
    type Input = GarageInput;

    const NAME: &'static str = "Garage";
    const TABLE: &'static str = "garage";

    fn structured_types() -> Vec<StructuredType> {
        vec![
            StructuredType::new(
                "garage_rate",
                &[("type", "text"), ("rate", "int"), ("currency", "text")],
            ),
            StructuredType::new("garage_revenue", &[("amount", "float"), ("date", "timestamp")]),
            StructuredType::new(
                "garage_device",
                &[
                    ("id", "text"),
                    ("type", "text"),
                    ("online", "boolean"),
                    ("image", "text"),
                    ("stream", "text"),
                ],
            ),
        ]
    }

    fn from_input(input: GarageInput) -> Self {
        let rates = match input.rates {
            Some(rates) if !rates.is_empty() => rates,
            _ => Rate::standard_schedule(),
        };
        Self {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            description: input.description,
            contact: input.contact,
            online: input.online.unwrap_or(false),
            image: input.image,
            address: input.address.unwrap_or_default(),
            hours: input.hours.unwrap_or_default(),
            location: input.location.unwrap_or_default(),
            capacity: input.capacity.unwrap_or_default(),
            rates,
            revenue: input.revenue.unwrap_or_default(),
            devices: input
                .devices
                .unwrap_or_default()
                .into_iter()
                .map(Device::from)
                .collect(),
        }
    }

    fn input_id(input: &GarageInput) -> Option<&str> {
        input.id.as_deref()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn seed_fixture() -> &'static str {
        include_str!("../../fixtures/garages.json")
    }

    fn default_validator() -> Arc<dyn Validator<Self>> {
        Arc::new(GarageValidator)
    }
}

/// Default garage rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct GarageValidator;

impl Validator<Garage> for GarageValidator {
    fn validate(&self, garage: &Garage) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.uuid("id", &garage.id);
        errors.optional_text("description", garage.description.as_deref());
        errors.phone("contact", garage.contact.as_deref());
        errors.optional_text("image", garage.image.as_deref());
        garage.address.check("address", &mut errors);

        errors.one_of("hours.from", &garage.hours.from, WEEKDAYS);
        errors.one_of("hours.to", &garage.hours.to, WEEKDAYS);
        errors.require_text("hours.open", Some(&garage.hours.open));
        errors.require_text("hours.closed", Some(&garage.hours.closed));

        for (index, rate) in garage.rates.iter().enumerate() {
            errors.one_of(&format!("rates[{index}].type"), &rate.kind, RATE_TYPES);
            errors.one_of(&format!("rates[{index}].currency"), &rate.currency, CURRENCIES);
        }
        for (index, entry) in garage.revenue.iter().enumerate() {
            errors.date(&format!("revenue[{index}].date"), entry.date.as_deref());
        }
        for (index, device) in garage.devices.iter().enumerate() {
            errors.one_of(&format!("devices[{index}].type"), &device.kind, DEVICE_TYPES);
        }
        errors.into_result()
    }
}
