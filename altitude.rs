//! Barometric altitude from the international standard atmosphere.

/// Standard sea-level pressure in Pascal.
pub const SEALEVEL_PA: f64 = 101_325.0;

/// Altitude in metres of `pressure_pa` above the level where the pressure is
/// `sealevel_pa`.
///
/// Altitude is advisory telemetry: any non-positive or non-finite input
/// gives `0.0` instead of a NaN.
pub fn altitude(pressure_pa: f64, sealevel_pa: f64) -> f64 {
    if !valid(pressure_pa) || !valid(sealevel_pa) {
        return 0.0;
    }
    44330.0 * (1.0 - (pressure_pa / sealevel_pa).powf(0.1903))
}

/// Sea-level reference pressure that makes `pressure_pa` read as
/// `altitude_m`. Used to zero the altimeter on the launch site.
pub fn sealevel_pressure(pressure_pa: f64, altitude_m: f64) -> f64 {
    if !valid(pressure_pa) || !altitude_m.is_finite() || altitude_m >= 44330.0 {
        return pressure_pa;
    }
    pressure_pa / (1.0 - altitude_m / 44330.0).powf(5.255)
}

fn valid(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
