//! Rule-based premium calculators for auto and home policies.
//!
//! Both calculators are additive-factor models: every factor contributes a
//! signed dollar amount to the annual premium and is surfaced in the quote
//! breakdown in evaluation order.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::{
    collaborators::ToolSpec,
    profile::{LineOfBusiness, Profile, ProfileField},
};

/// Calibration year for vehicle and property age
pub const REFERENCE_YEAR: i64 = 2025;

pub const DEFAULT_LIABILITY_LIMIT: &str = "100000/300000";
pub const DEFAULT_DEDUCTIBLE: i64 = 500;
const UNKNOWN: &str = "Unknown";

pub const AUTO_TOOL: &str = "calculate_auto_premium";
pub const HOME_TOOL: &str = "calculate_home_premium";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RatingError {
    #[error("missing required {line} fields: {}", .fields.join(", "))]
    MissingFields {
        line: LineOfBusiness,
        fields: Vec<&'static str>,
    },
}

fn require(profile: &Profile, line: LineOfBusiness) -> Result<(), RatingError> {
    let missing = profile.missing(line.trigger_fields());
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RatingError::MissingFields {
            line,
            fields: missing.into_iter().map(ProfileField::name).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoRatingInput {
    pub age: i64,
    pub vehicle_year: i64,
    pub years_licensed: i64,
    pub accidents: i64,
    pub violations: i64,
    pub vehicle_make: String,
    pub vehicle_model: String,
    pub liability_limit: String,
    pub collision: bool,
    pub comprehensive: bool,
    pub deductible: i64,
}

impl AutoRatingInput {
    /// Trigger fields are required, everything else takes its documented default
    pub fn from_profile(profile: &Profile) -> Result<Self, RatingError> {
        require(profile, LineOfBusiness::Auto)?;
        Ok(Self {
            age: profile.age.unwrap_or_default(),
            vehicle_year: profile.vehicle_year.unwrap_or_default(),
            years_licensed: profile.years_licensed.unwrap_or_default(),
            accidents: profile.accidents.unwrap_or(0),
            violations: profile.violations.unwrap_or(0),
            vehicle_make: profile.vehicle_make.clone().unwrap_or_else(|| UNKNOWN.into()),
            vehicle_model: profile.vehicle_model.clone().unwrap_or_else(|| UNKNOWN.into()),
            liability_limit: profile
                .liability_limit
                .clone()
                .unwrap_or_else(|| DEFAULT_LIABILITY_LIMIT.into()),
            collision: profile.collision.unwrap_or(true),
            comprehensive: profile.comprehensive.unwrap_or(true),
            deductible: profile.deductible.unwrap_or(DEFAULT_DEDUCTIBLE),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomeRatingInput {
    pub year_built: i64,
    pub square_footage: i64,
    pub construction_type: Option<String>,
    pub dwelling_coverage: i64,
    pub roof_type: Option<String>,
    pub stories: i64,
    pub security_system: bool,
    pub fire_alarm: bool,
    pub has_pool: bool,
}

impl HomeRatingInput {
    pub fn from_profile(profile: &Profile) -> Result<Self, RatingError> {
        require(profile, LineOfBusiness::Home)?;
        Ok(Self {
            year_built: profile.year_built.unwrap_or_default(),
            square_footage: profile.square_footage.unwrap_or_default(),
            construction_type: profile.construction_type.clone(),
            dwelling_coverage: profile.dwelling_coverage.unwrap_or_default(),
            roof_type: profile.roof_type.clone(),
            stories: profile.stories.unwrap_or(1),
            security_system: profile.security_system.unwrap_or(false),
            fire_alarm: profile.fire_alarm.unwrap_or(false),
            has_pool: profile.has_pool.unwrap_or(false),
        })
    }
}

/// One additive term of a premium
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub label: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Factor {
    fn new(label: &str, amount: f64) -> Self {
        Self {
            label: label.to_string(),
            amount,
            reason: None,
        }
    }

    fn with_reason(label: &str, amount: f64, reason: &str) -> Self {
        Self {
            label: label.to_string(),
            amount,
            reason: Some(reason.to_string()),
        }
    }
}

/// Inputs echoed back with a quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CoverageEcho {
    Auto {
        vehicle: String,
        driver_age: i64,
        years_licensed: i64,
        accidents: i64,
        violations: i64,
        liability_limit: String,
        collision: bool,
        comprehensive: bool,
        deductible: i64,
    },
    Home {
        year_built: i64,
        square_footage: i64,
        construction: String,
        stories: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        roof_type: Option<String>,
        dwelling_coverage: i64,
        security_system: bool,
        fire_alarm: bool,
        has_pool: bool,
    },
}

/// Result of one rating invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    line_of_business: LineOfBusiness,
    monthly_premium: f64,
    annual_premium: f64,
    breakdown: Vec<Factor>,
    coverage: CoverageEcho,
}

impl Quote {
    /// Monthly is derived from the rounded annual figure, never from the raw sum
    fn from_factors(line_of_business: LineOfBusiness, breakdown: Vec<Factor>, coverage: CoverageEcho) -> Self {
        let total: f64 = breakdown.iter().map(|factor| factor.amount).sum();
        let annual_premium = round2(total);
        Self {
            line_of_business,
            monthly_premium: round2(annual_premium / 12.0),
            annual_premium,
            breakdown,
            coverage,
        }
    }

    pub fn line_of_business(&self) -> LineOfBusiness {
        self.line_of_business
    }

    pub fn monthly_premium(&self) -> f64 {
        self.monthly_premium
    }

    pub fn annual_premium(&self) -> f64 {
        self.annual_premium
    }

    pub fn breakdown(&self) -> &[Factor] {
        &self.breakdown
    }

    pub fn coverage(&self) -> &CoverageEcho {
        &self.coverage
    }

    pub fn factor(&self, label: &str) -> Option<&Factor> {
        self.breakdown.iter().find(|factor| factor.label == label)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn rate_auto(input: &AutoRatingInput) -> Quote {
    let (age_amount, age_reason) = match input.age {
        age if age < 25 => (400.0, "Young driver surcharge"),
        age if age < 30 => (200.0, "Moderate age adjustment"),
        age if age > 65 => (150.0, "Senior driver adjustment"),
        _ => (0.0, "Optimal age range"),
    };

    let vehicle_age = REFERENCE_YEAR - input.vehicle_year;
    let (vehicle_amount, vehicle_reason) = match vehicle_age {
        v if v > 10 => (-100.0, "Older vehicle discount"),
        v if v < 3 => (200.0, "New vehicle premium"),
        _ => (0.0, "Standard vehicle age"),
    };

    let liability = match input.liability_limit.as_str() {
        "50000/100000" => 0.0,
        "100000/300000" => 150.0,
        "250000/500000" => 300.0,
        "500000/1000000" => 500.0,
        _ => 150.0,
    };

    let collision = if input.collision { 200.0 } else { 0.0 };
    let comprehensive = if input.comprehensive { 150.0 } else { 0.0 };
    let deductible = if input.deductible >= 1000 { -50.0 } else { 0.0 };
    let experience = if input.years_licensed > 10 { -100.0 } else { 0.0 };

    let breakdown = vec![
        Factor::new("base_rate", 800.0),
        Factor::with_reason("age_adjustment", age_amount, age_reason),
        Factor::with_reason("vehicle_age", vehicle_amount, vehicle_reason),
        Factor::new("liability_coverage", liability),
        Factor::new("collision_coverage", collision),
        Factor::new("comprehensive_coverage", comprehensive),
        Factor::new("deductible_discount", deductible),
        Factor::new("experience_discount", experience),
        Factor::new("accident_surcharge", input.accidents as f64 * 300.0),
        Factor::new("violation_surcharge", input.violations as f64 * 200.0),
    ];

    let coverage = CoverageEcho::Auto {
        vehicle: format!(
            "{} {} {}",
            input.vehicle_year, input.vehicle_make, input.vehicle_model
        ),
        driver_age: input.age,
        years_licensed: input.years_licensed,
        accidents: input.accidents,
        violations: input.violations,
        liability_limit: input.liability_limit.clone(),
        collision: input.collision,
        comprehensive: input.comprehensive,
        deductible: input.deductible,
    };

    Quote::from_factors(LineOfBusiness::Auto, breakdown, coverage)
}

pub fn rate_home(input: &HomeRatingInput) -> Quote {
    let property_age = REFERENCE_YEAR - input.year_built;
    let (age_amount, age_reason) = match property_age {
        a if a > 50 => (400.0, "Older home surcharge"),
        a if a > 30 => (200.0, "Mature home adjustment"),
        a if a < 10 => (-100.0, "New home discount"),
        _ => (0.0, "Standard age"),
    };

    let construction = input
        .construction_type
        .as_deref()
        .map(str::to_ascii_lowercase);
    let (construction_amount, construction_reason) = match construction.as_deref() {
        Some("frame") => (200.0, "Wood frame construction"),
        Some("brick") => (0.0, "Brick construction"),
        Some("stone") => (-100.0, "Stone construction discount"),
        Some("concrete") => (-150.0, "Concrete construction discount"),
        _ => (0.0, "Standard construction"),
    };

    let mut safety = 0.0;
    if input.security_system {
        safety -= 100.0;
    }
    if input.fire_alarm {
        safety -= 75.0;
    }

    let breakdown = vec![
        Factor::new("base_rate", 1200.0),
        Factor::new("coverage_cost", input.dwelling_coverage as f64 / 1000.0),
        Factor::with_reason("property_age", age_amount, age_reason),
        Factor::with_reason("construction", construction_amount, construction_reason),
        Factor::new("size_adjustment", (input.square_footage - 2000) as f64 / 10.0),
        Factor::new("stories_adjustment", (input.stories - 1) as f64 * 100.0),
        Factor::new("safety_discounts", safety),
        Factor::new("pool_surcharge", if input.has_pool { 150.0 } else { 0.0 }),
    ];

    let coverage = CoverageEcho::Home {
        year_built: input.year_built,
        square_footage: input.square_footage,
        construction: input
            .construction_type
            .clone()
            .unwrap_or_else(|| "unspecified".into()),
        stories: input.stories,
        roof_type: input.roof_type.clone(),
        dwelling_coverage: input.dwelling_coverage,
        security_system: input.security_system,
        fire_alarm: input.fire_alarm,
        has_pool: input.has_pool,
    };

    Quote::from_factors(LineOfBusiness::Home, breakdown, coverage)
}

/// Rate whichever line of business is requested from the accumulated profile
pub fn rate_profile(line: LineOfBusiness, profile: &Profile) -> Result<Quote, RatingError> {
    match line {
        LineOfBusiness::Auto => AutoRatingInput::from_profile(profile).map(|input| rate_auto(&input)),
        LineOfBusiness::Home => HomeRatingInput::from_profile(profile).map(|input| rate_home(&input)),
    }
}

/// Line of business served by a rating tool name
pub fn tool_line(name: &str) -> Option<LineOfBusiness> {
    match name {
        AUTO_TOOL => Some(LineOfBusiness::Auto),
        HOME_TOOL => Some(LineOfBusiness::Home),
        _ => None,
    }
}

/// Function-calling descriptions of the two calculators
pub fn tool_specs() -> Vec<ToolSpec> {
    [
        (
            LineOfBusiness::Auto,
            AUTO_TOOL,
            "Calculate an auto insurance premium once the driver's age, vehicle year and years licensed are known",
        ),
        (
            LineOfBusiness::Home,
            HOME_TOOL,
            "Calculate a home insurance premium once year built, square footage and dwelling coverage are known",
        ),
    ]
    .into_iter()
    .map(|(line, name, description)| {
        let properties: serde_json::Map<String, serde_json::Value> = line
            .fields()
            .iter()
            .map(|field| {
                (
                    field.name().to_string(),
                    json!({ "type": field.json_type(), "description": field.description() }),
                )
            })
            .collect();
        let required: Vec<&str> = line.trigger_fields().iter().map(|f| f.name()).collect();

        ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    })
    .collect()
}
