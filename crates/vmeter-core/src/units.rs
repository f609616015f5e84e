//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Unit normalisation for vendor readings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Vendors report power and energy with SI prefixes (`kW`, `MWh`, ...). The
//! integrator and value store work in W and Wh only.
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseUnit {
    Watt,
    WattHour,
}

impl BaseUnit {
    fn symbol(&self) -> &'static str {
        match self {
            BaseUnit::Watt => "W",
            BaseUnit::WattHour => "Wh",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum UnitError {
    #[error("unknown unit '{0}'")]
    Unknown(String),
    #[error("unit '{unit}' cannot be converted to {expected}")]
    Mismatch { unit: String, expected: &'static str },
}

/// Convert `value` given in `unit` to `target`. A missing unit means the value
/// is already in `target`.
pub fn scale_metric(value: f64, unit: Option<&str>, target: BaseUnit) -> Result<f64, UnitError> {
    let Some(unit) = unit.map(str::trim).filter(|unit| !unit.is_empty()) else {
        return Ok(value);
    };
    let (factor, base) = parse_unit(unit)?;
    if base != target {
        return Err(UnitError::Mismatch {
            unit: unit.to_owned(),
            expected: target.symbol(),
        });
    }
    Ok(value * factor)
}

fn parse_unit(unit: &str) -> Result<(f64, BaseUnit), UnitError> {
    let (prefix, base) = if let Some(prefix) = unit.strip_suffix("Wh") {
        (prefix, BaseUnit::WattHour)
    } else if let Some(prefix) = unit.strip_suffix('W') {
        (prefix, BaseUnit::Watt)
    } else {
        return Err(UnitError::Unknown(unit.to_owned()));
    };
    let factor = match prefix {
        "" => 1.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "m" => 1e-3,
        _ => return Err(UnitError::Unknown(unit.to_owned())),
    };
    Ok((factor, base))
}
