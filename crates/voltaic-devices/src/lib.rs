//! Device behaviors for Voltaic.
//!
//! Each device implements the `Behavior` contract from `voltaic-core`:
//! passives, independent and controlled sources, a junction diode and an
//! ideal voltage delay. [`register_all`] fills a catalog with constructors
//! for every kind so circuits can be built from tagged specifications.

pub mod delay;
pub mod diode;
pub mod passive;
pub mod sources;
pub mod waveforms;

use voltaic_core::{Behavior, Catalog, DeviceSpec};

pub use delay::VoltageDelay;
pub use diode::{pnjlim, thermal_voltage, Diode, DiodeParams};
pub use passive::{Capacitor, Inductor, Resistor, ResistorModel};
pub use sources::{AcExcitation, CurrentSource, Vccs, VoltageSource};
pub use waveforms::Waveform;

fn param_or(spec: &DeviceSpec, key: &str, default: f64) -> f64 {
    spec.params.get(key).copied().unwrap_or(default)
}

/// Register a constructor for every device kind in this crate.
pub fn register_all(catalog: &mut Catalog) {
    catalog.register("resistor", |spec| {
        Ok(Box::new(Resistor::new(&spec.name, spec.require("resistance")?)) as Box<dyn Behavior>)
    });
    catalog.register("capacitor", |spec| {
        Ok(Box::new(Capacitor::new(&spec.name, spec.require("capacitance")?)) as Box<dyn Behavior>)
    });
    catalog.register("inductor", |spec| {
        Ok(Box::new(Inductor::new(&spec.name, spec.require("inductance")?)) as Box<dyn Behavior>)
    });
    catalog.register("vsource", |spec| {
        Ok(Box::new(VoltageSource::dc(&spec.name, spec.require("value")?)) as Box<dyn Behavior>)
    });
    catalog.register("isource", |spec| {
        Ok(Box::new(CurrentSource::dc(&spec.name, spec.require("value")?)) as Box<dyn Behavior>)
    });
    catalog.register("vccs", |spec| {
        Ok(Box::new(Vccs::new(&spec.name, spec.require("gm")?)) as Box<dyn Behavior>)
    });
    catalog.register("diode", |spec| {
        let params = DiodeParams {
            is: param_or(spec, "is", 1e-14),
            n: param_or(spec, "n", 1.0),
            temperature: param_or(spec, "temperature", 300.15),
            kf: param_or(spec, "kf", 0.0),
            af: param_or(spec, "af", 1.0),
        };
        Ok(Box::new(Diode::new(&spec.name, params)) as Box<dyn Behavior>)
    });
    catalog.register("vdelay", |spec| {
        Ok(Box::new(VoltageDelay::new(&spec.name, spec.require("delay")?)) as Box<dyn Behavior>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_creates_known_kinds() {
        let mut catalog = Catalog::new();
        register_all(&mut catalog);

        let spec = DeviceSpec::new("R1").param("resistance", 1e3);
        let behavior = catalog.create("resistor", &spec).unwrap();
        assert_eq!(behavior.name(), "R1");
        assert_eq!(behavior.pin_count(), 2);
    }

    #[test]
    fn test_catalog_rejects_unknown_kind() {
        let mut catalog = Catalog::new();
        register_all(&mut catalog);
        let spec = DeviceSpec::new("X1");
        assert!(catalog.create("memristor", &spec).is_err());
    }

    #[test]
    fn test_missing_parameter_is_error() {
        let mut catalog = Catalog::new();
        register_all(&mut catalog);
        let spec = DeviceSpec::new("C1");
        assert!(catalog.create("capacitor", &spec).is_err());
    }
}
