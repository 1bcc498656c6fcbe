//! Default definitions of the stellar parameters.

/// Effective temperature.
pub const TEFF: &str = "teff";
/// Surface gravity.
pub const LOGG: &str = "logg";
/// Metallicity.
pub const Z: &str = "z";
/// Radial velocity.
pub const RV: &str = "rv";
/// Projected rotational velocity.
pub const VROT: &str = "vrot";
/// Relative luminosity.
pub const LR: &str = "lr";

/// Parameters applied to an already synthesized spectrum (Doppler shift,
/// rotational broadening, scaling). Changing them never requires a new grid
/// interpolation.
pub const DIRECTLY_APPLIED: [&str; 3] = [RV, LR, VROT];

/// Whether changing `name` can be absorbed without re-synthesis.
pub fn is_directly_applied(name: &str) -> bool {
    DIRECTLY_APPLIED.contains(&name)
}

/// Definition of a parameter used when a component is added with defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterDefinition {
    pub name: &'static str,
    pub value: f64,
    pub vmin: f64,
    pub vmax: f64,
    pub unit: &'static str,
}

pub const DEFINITIONS: [ParameterDefinition; 6] = [
    ParameterDefinition {
        name: LR,
        value: 1.0,
        vmin: 0.0,
        vmax: 1.0,
        unit: "relative",
    },
    ParameterDefinition {
        name: LOGG,
        value: 3.5,
        vmin: 0.0,
        vmax: 5.0,
        unit: "log(g.cm^-2)",
    },
    ParameterDefinition {
        name: RV,
        value: 0.0,
        vmin: -1000.0,
        vmax: 1000.0,
        unit: "km.s^-1",
    },
    ParameterDefinition {
        name: TEFF,
        value: 10000.0,
        vmin: 6000.0,
        vmax: 50000.0,
        unit: "K",
    },
    ParameterDefinition {
        name: VROT,
        value: 0.0,
        vmin: 0.0,
        vmax: 500.0,
        unit: "km.s^-1",
    },
    ParameterDefinition {
        name: Z,
        value: 1.0,
        vmin: 0.0,
        vmax: 2.0,
        unit: "Z_solar",
    },
];

/// Look up the default definition of a parameter by name.
pub fn definition(name: &str) -> Option<&'static ParameterDefinition> {
    DEFINITIONS.iter().find(|d| d.name == name)
}
