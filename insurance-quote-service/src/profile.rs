//! The structured facts gathered about a customer during a conversation.
//!
//! Updates arrive as loose JSON objects (tool-call arguments from the language
//! model or a form submission) and are coerced, validated and applied
//! atomically: one bad field rejects the whole update.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use crate::rating::REFERENCE_YEAR;

/// Insurance product category in scope for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOfBusiness {
    Auto,
    Home,
}

impl LineOfBusiness {
    pub fn as_str(self) -> &'static str {
        match self {
            LineOfBusiness::Auto => "auto",
            LineOfBusiness::Home => "home",
        }
    }

    /// Fields that must be present before the routing policy allows a calculation
    pub fn trigger_fields(self) -> &'static [ProfileField] {
        match self {
            LineOfBusiness::Auto => &[
                ProfileField::Age,
                ProfileField::VehicleYear,
                ProfileField::YearsLicensed,
            ],
            LineOfBusiness::Home => &[
                ProfileField::YearBuilt,
                ProfileField::SquareFootage,
                ProfileField::DwellingCoverage,
            ],
        }
    }

    /// Full vocabulary collected for this line of business, required fields first
    pub fn fields(self) -> &'static [ProfileField] {
        match self {
            LineOfBusiness::Auto => &[
                ProfileField::Age,
                ProfileField::VehicleYear,
                ProfileField::YearsLicensed,
                ProfileField::Accidents,
                ProfileField::Violations,
                ProfileField::VehicleMake,
                ProfileField::VehicleModel,
                ProfileField::LiabilityLimit,
                ProfileField::Collision,
                ProfileField::Comprehensive,
                ProfileField::Deductible,
            ],
            LineOfBusiness::Home => &[
                ProfileField::YearBuilt,
                ProfileField::SquareFootage,
                ProfileField::ConstructionType,
                ProfileField::DwellingCoverage,
                ProfileField::RoofType,
                ProfileField::Stories,
                ProfileField::SecuritySystem,
                ProfileField::FireAlarm,
                ProfileField::HasPool,
            ],
        }
    }
}

impl fmt::Display for LineOfBusiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEDUCTIBLE_OPTIONS: [i64; 4] = [250, 500, 1000, 2500];
pub const ROOF_TYPES: [&str; 4] = ["asphalt_shingle", "metal", "tile", "slate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Integer,
    Flag,
    Text,
}

/// Every key of the profile vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Age,
    VehicleYear,
    YearsLicensed,
    Accidents,
    Violations,
    VehicleMake,
    VehicleModel,
    LiabilityLimit,
    Collision,
    Comprehensive,
    Deductible,
    YearBuilt,
    SquareFootage,
    ConstructionType,
    DwellingCoverage,
    RoofType,
    Stories,
    SecuritySystem,
    FireAlarm,
    HasPool,
}

impl ProfileField {
    pub fn name(self) -> &'static str {
        match self {
            ProfileField::Age => "age",
            ProfileField::VehicleYear => "vehicle_year",
            ProfileField::YearsLicensed => "years_licensed",
            ProfileField::Accidents => "accidents",
            ProfileField::Violations => "violations",
            ProfileField::VehicleMake => "vehicle_make",
            ProfileField::VehicleModel => "vehicle_model",
            ProfileField::LiabilityLimit => "liability_limit",
            ProfileField::Collision => "collision",
            ProfileField::Comprehensive => "comprehensive",
            ProfileField::Deductible => "deductible",
            ProfileField::YearBuilt => "year_built",
            ProfileField::SquareFootage => "square_footage",
            ProfileField::ConstructionType => "construction_type",
            ProfileField::DwellingCoverage => "dwelling_coverage",
            ProfileField::RoofType => "roof_type",
            ProfileField::Stories => "stories",
            ProfileField::SecuritySystem => "security_system",
            ProfileField::FireAlarm => "fire_alarm",
            ProfileField::HasPool => "has_pool",
        }
    }

    /// Resolve a key, accepting the form aliases used by the quote forms
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name.trim().to_ascii_lowercase().as_str() {
            "age" => ProfileField::Age,
            "vehicle_year" => ProfileField::VehicleYear,
            "years_licensed" => ProfileField::YearsLicensed,
            "accidents" | "accidents_3years" => ProfileField::Accidents,
            "violations" | "violations_3years" => ProfileField::Violations,
            "vehicle_make" => ProfileField::VehicleMake,
            "vehicle_model" => ProfileField::VehicleModel,
            "liability_limit" => ProfileField::LiabilityLimit,
            "collision" => ProfileField::Collision,
            "comprehensive" => ProfileField::Comprehensive,
            "deductible" => ProfileField::Deductible,
            "year_built" => ProfileField::YearBuilt,
            "square_footage" => ProfileField::SquareFootage,
            "construction_type" => ProfileField::ConstructionType,
            "dwelling_coverage" => ProfileField::DwellingCoverage,
            "roof_type" => ProfileField::RoofType,
            "stories" => ProfileField::Stories,
            "security_system" => ProfileField::SecuritySystem,
            "fire_alarm" => ProfileField::FireAlarm,
            "has_pool" => ProfileField::HasPool,
            _ => return None,
        };
        Some(field)
    }

    /// Short description used in tool schemas and follow-up questions
    pub fn description(self) -> &'static str {
        match self {
            ProfileField::Age => "Driver's age in years",
            ProfileField::VehicleYear => "Year the vehicle was manufactured",
            ProfileField::YearsLicensed => "Years the driver has been licensed",
            ProfileField::Accidents => "Number of accidents in the last 3 years",
            ProfileField::Violations => "Number of violations in the last 3 years",
            ProfileField::VehicleMake => "Vehicle make, e.g. Toyota",
            ProfileField::VehicleModel => "Vehicle model, e.g. Camry",
            ProfileField::LiabilityLimit => {
                "Liability limit: 50000/100000, 100000/300000, 250000/500000 or 500000/1000000"
            }
            ProfileField::Collision => "Whether collision coverage is wanted",
            ProfileField::Comprehensive => "Whether comprehensive coverage is wanted",
            ProfileField::Deductible => "Deductible in dollars: 250, 500, 1000 or 2500",
            ProfileField::YearBuilt => "Year the home was built",
            ProfileField::SquareFootage => "Total square footage of the home",
            ProfileField::ConstructionType => "Construction type: frame, brick, stone or concrete",
            ProfileField::DwellingCoverage => "Desired dwelling coverage in dollars",
            ProfileField::RoofType => "Roof type: asphalt_shingle, metal, tile or slate",
            ProfileField::Stories => "Number of stories (1 to 3)",
            ProfileField::SecuritySystem => "Whether the home has a monitored security system",
            ProfileField::FireAlarm => "Whether the home has fire/smoke alarms",
            ProfileField::HasPool => "Whether the property has a pool",
        }
    }

    /// JSON schema type for tool specifications
    pub fn json_type(self) -> &'static str {
        match self.kind() {
            FieldKind::Integer => "integer",
            FieldKind::Flag => "boolean",
            FieldKind::Text => "string",
        }
    }

    fn kind(self) -> FieldKind {
        match self {
            ProfileField::Age
            | ProfileField::VehicleYear
            | ProfileField::YearsLicensed
            | ProfileField::Accidents
            | ProfileField::Violations
            | ProfileField::Deductible
            | ProfileField::YearBuilt
            | ProfileField::SquareFootage
            | ProfileField::DwellingCoverage
            | ProfileField::Stories => FieldKind::Integer,
            ProfileField::Collision
            | ProfileField::Comprehensive
            | ProfileField::SecuritySystem
            | ProfileField::FireAlarm
            | ProfileField::HasPool => FieldKind::Flag,
            ProfileField::VehicleMake
            | ProfileField::VehicleModel
            | ProfileField::LiabilityLimit
            | ProfileField::ConstructionType
            | ProfileField::RoofType => FieldKind::Text,
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single rejected field of a profile update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid profile fields: {}", join_errors(.0))]
    InvalidFields(Vec<FieldError>),
}

impl ProfileError {
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ProfileError::InvalidFields(errors) => errors,
        }
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of a successful profile update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    /// Fields whose stored value changed
    pub changed: Vec<String>,
    /// Keys outside the profile vocabulary
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Integer(i64),
    Flag(bool),
    Text(String),
}

/// Accumulated profile for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_year: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years_licensed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accidents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liability_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comprehensive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deductible: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_built: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub square_footage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub construction_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwelling_coverage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roof_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stories: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_system: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_alarm: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_pool: Option<bool>,
}

impl Profile {
    pub fn contains(&self, field: ProfileField) -> bool {
        match field {
            ProfileField::Age => self.age.is_some(),
            ProfileField::VehicleYear => self.vehicle_year.is_some(),
            ProfileField::YearsLicensed => self.years_licensed.is_some(),
            ProfileField::Accidents => self.accidents.is_some(),
            ProfileField::Violations => self.violations.is_some(),
            ProfileField::VehicleMake => self.vehicle_make.is_some(),
            ProfileField::VehicleModel => self.vehicle_model.is_some(),
            ProfileField::LiabilityLimit => self.liability_limit.is_some(),
            ProfileField::Collision => self.collision.is_some(),
            ProfileField::Comprehensive => self.comprehensive.is_some(),
            ProfileField::Deductible => self.deductible.is_some(),
            ProfileField::YearBuilt => self.year_built.is_some(),
            ProfileField::SquareFootage => self.square_footage.is_some(),
            ProfileField::ConstructionType => self.construction_type.is_some(),
            ProfileField::DwellingCoverage => self.dwelling_coverage.is_some(),
            ProfileField::RoofType => self.roof_type.is_some(),
            ProfileField::Stories => self.stories.is_some(),
            ProfileField::SecuritySystem => self.security_system.is_some(),
            ProfileField::FireAlarm => self.fire_alarm.is_some(),
            ProfileField::HasPool => self.has_pool.is_some(),
        }
    }

    pub fn contains_all(&self, fields: &[ProfileField]) -> bool {
        fields.iter().all(|field| self.contains(*field))
    }

    pub fn missing(&self, fields: &[ProfileField]) -> Vec<ProfileField> {
        fields
            .iter()
            .copied()
            .filter(|field| !self.contains(*field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        *self == Profile::default()
    }

    /// Coerce, validate and apply `update`. Nothing is applied when any field is invalid.
    /// Null values leave the stored value untouched.
    pub fn apply_update(&mut self, update: &Map<String, Value>) -> Result<ProfileUpdate, ProfileError> {
        let mut staged = self.clone();
        let mut report = ProfileUpdate::default();
        let mut errors = Vec::new();

        for (key, raw) in update {
            let Some(field) = ProfileField::from_name(key) else {
                report.ignored.push(key.clone());
                continue;
            };
            if raw.is_null() {
                continue;
            }
            match coerce(field, raw).and_then(|value| validate(field, value)) {
                Ok(value) => {
                    if staged.set(field, value) {
                        report.changed.push(field.name().to_string());
                    }
                }
                Err(reason) => errors.push(FieldError {
                    field: field.name().to_string(),
                    reason,
                }),
            }
        }

        if !errors.is_empty() {
            return Err(ProfileError::InvalidFields(errors));
        }

        *self = staged;
        Ok(report)
    }

    /// Store a value; returns whether the stored value changed
    fn set(&mut self, field: ProfileField, value: FieldValue) -> bool {
        fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
            let changed = slot.as_ref() != Some(&value);
            *slot = Some(value);
            changed
        }

        match (field, value) {
            (ProfileField::Age, FieldValue::Integer(v)) => replace(&mut self.age, v),
            (ProfileField::VehicleYear, FieldValue::Integer(v)) => replace(&mut self.vehicle_year, v),
            (ProfileField::YearsLicensed, FieldValue::Integer(v)) => {
                replace(&mut self.years_licensed, v)
            }
            (ProfileField::Accidents, FieldValue::Integer(v)) => replace(&mut self.accidents, v),
            (ProfileField::Violations, FieldValue::Integer(v)) => replace(&mut self.violations, v),
            (ProfileField::VehicleMake, FieldValue::Text(v)) => replace(&mut self.vehicle_make, v),
            (ProfileField::VehicleModel, FieldValue::Text(v)) => replace(&mut self.vehicle_model, v),
            (ProfileField::LiabilityLimit, FieldValue::Text(v)) => {
                replace(&mut self.liability_limit, v)
            }
            (ProfileField::Collision, FieldValue::Flag(v)) => replace(&mut self.collision, v),
            (ProfileField::Comprehensive, FieldValue::Flag(v)) => replace(&mut self.comprehensive, v),
            (ProfileField::Deductible, FieldValue::Integer(v)) => replace(&mut self.deductible, v),
            (ProfileField::YearBuilt, FieldValue::Integer(v)) => replace(&mut self.year_built, v),
            (ProfileField::SquareFootage, FieldValue::Integer(v)) => {
                replace(&mut self.square_footage, v)
            }
            (ProfileField::ConstructionType, FieldValue::Text(v)) => {
                replace(&mut self.construction_type, v)
            }
            (ProfileField::DwellingCoverage, FieldValue::Integer(v)) => {
                replace(&mut self.dwelling_coverage, v)
            }
            (ProfileField::RoofType, FieldValue::Text(v)) => replace(&mut self.roof_type, v),
            (ProfileField::Stories, FieldValue::Integer(v)) => replace(&mut self.stories, v),
            (ProfileField::SecuritySystem, FieldValue::Flag(v)) => {
                replace(&mut self.security_system, v)
            }
            (ProfileField::FireAlarm, FieldValue::Flag(v)) => replace(&mut self.fire_alarm, v),
            (ProfileField::HasPool, FieldValue::Flag(v)) => replace(&mut self.has_pool, v),
            // coerce() only produces the kind matching the field
            _ => false,
        }
    }
}

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(\.\d+)?").expect("valid digits regex"));

fn coerce(field: ProfileField, raw: &Value) -> Result<FieldValue, String> {
    match field.kind() {
        FieldKind::Integer => coerce_integer(raw).map(FieldValue::Integer),
        FieldKind::Flag => coerce_flag(raw).map(FieldValue::Flag),
        FieldKind::Text => coerce_text(field, raw).map(FieldValue::Text),
    }
}

fn coerce_integer(raw: &Value) -> Result<i64, String> {
    match raw {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
                _ => Err("must be a whole number".to_string()),
            }
        }
        Value::String(s) => {
            let m = DIGITS
                .find(s)
                .ok_or_else(|| format!("'{}' is not a number", s))?;
            let cleaned = m.as_str().replace(',', "");
            if let Ok(v) = cleaned.parse::<i64>() {
                return Ok(v);
            }
            match cleaned.parse::<f64>() {
                Ok(v) if v.fract() == 0.0 => Ok(v as i64),
                _ => Err(format!("'{}' is not a whole number", s)),
            }
        }
        _ => Err("must be a whole number".to_string()),
    }
}

fn coerce_flag(raw: &Value) -> Result<bool, String> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err("must be true or false".to_string()),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" | "none" => Ok(false),
            other => Err(format!("'{}' is not yes or no", other)),
        },
        _ => Err("must be true or false".to_string()),
    }
}

fn coerce_text(field: ProfileField, raw: &Value) -> Result<String, String> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err("must be text".to_string()),
    };
    if text.is_empty() {
        return Err("must not be empty".to_string());
    }

    Ok(match field {
        ProfileField::ConstructionType | ProfileField::RoofType => text
            .to_ascii_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_"),
        ProfileField::LiabilityLimit => normalize_liability_limit(&text),
        _ => text,
    })
}

/// "$100,000/$300,000" and the shorthand "100/300" both become "100000/300000"
fn normalize_liability_limit(text: &str) -> String {
    let parts: Vec<String> = text
        .split('/')
        .map(|part| {
            part.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .collect();

    let amounts: Option<Vec<i64>> = parts
        .iter()
        .map(|part| {
            let (digits, thousands) = match part.strip_suffix('k') {
                Some(digits) => (digits, true),
                None => (part.as_str(), false),
            };
            digits
                .parse::<i64>()
                .ok()
                .map(|v| if thousands || v < 1000 { v * 1000 } else { v })
        })
        .collect();

    match amounts {
        Some(amounts) if amounts.len() == 2 => format!("{}/{}", amounts[0], amounts[1]),
        _ => text.to_string(),
    }
}

fn validate(field: ProfileField, value: FieldValue) -> Result<FieldValue, String> {
    let max_year = REFERENCE_YEAR + 1;
    let problem = match (field, &value) {
        (ProfileField::RoofType, FieldValue::Text(roof)) if !ROOF_TYPES.contains(&roof.as_str()) => {
            Some(format!("must be one of {}", ROOF_TYPES.join(", ")))
        }
        (ProfileField::Age, FieldValue::Integer(v)) if !(1..=120).contains(v) => {
            Some("must be between 1 and 120".to_string())
        }
        (ProfileField::VehicleYear, FieldValue::Integer(v)) if !(1900..=max_year).contains(v) => {
            Some(format!("must be between 1900 and {}", max_year))
        }
        (ProfileField::YearBuilt, FieldValue::Integer(v)) if !(1800..=max_year).contains(v) => {
            Some(format!("must be between 1800 and {}", max_year))
        }
        (
            ProfileField::YearsLicensed | ProfileField::Accidents | ProfileField::Violations,
            FieldValue::Integer(v),
        ) if *v < 0 => Some("must not be negative".to_string()),
        (ProfileField::SquareFootage | ProfileField::DwellingCoverage, FieldValue::Integer(v))
            if *v <= 0 =>
        {
            Some("must be greater than zero".to_string())
        }
        (ProfileField::Stories, FieldValue::Integer(v)) if !(1..=3).contains(v) => {
            Some("must be between 1 and 3".to_string())
        }
        (ProfileField::Deductible, FieldValue::Integer(v)) if !DEDUCTIBLE_OPTIONS.contains(v) => {
            Some("must be one of 250, 500, 1000, 2500".to_string())
        }
        _ => None,
    };

    match problem {
        Some(reason) => Err(reason),
        None => Ok(value),
    }
}
