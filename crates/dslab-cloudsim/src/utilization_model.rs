//! Resource utilization models.
//!
//! A utilization model is a pure function of the time elapsed since the workload was admitted, returning the
//! fraction of the requested resource that is actually used. There is no trait hierarchy: the "full" model is just
//! the constant 1 function.

use std::sync::Arc;

use crate::error::{ensure_non_negative, Error, Result};
use crate::options::{parse_config_value, parse_options, required_option};

/// Maps elapsed time to a utilization fraction in `[0, 1]`.
pub type UtilizationModel = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// The resource is always fully used.
pub fn full() -> UtilizationModel {
    Arc::new(|_: f64| 1.)
}

/// The resource is never used.
pub fn null() -> UtilizationModel {
    Arc::new(|_: f64| 0.)
}

/// The resource is used at a constant fraction.
pub fn constant(fraction: f64) -> UtilizationModel {
    Arc::new(move |_: f64| fraction)
}

/// Utilization starts at `initial` and grows by `rate` per time unit until it saturates at 1.
pub fn linear(initial: f64, rate: f64) -> UtilizationModel {
    Arc::new(move |elapsed: f64| (initial + rate * elapsed).min(1.))
}

/// Evaluates the model, clamping the result into `[0, 1]` (NaN counts as idle).
pub fn sample(model: &UtilizationModel, elapsed: f64) -> f64 {
    let value = model(elapsed.max(0.));
    if value.is_nan() {
        0.
    } else {
        value.clamp(0., 1.)
    }
}

/// Builds a model from config string such as `Full`, `Null`, `Constant[fraction=0.5]` or
/// `Linear[initial=0.1,rate=0.05]`.
pub fn resolve_utilization_model(config_str: &str) -> Result<UtilizationModel> {
    let (name, options) = parse_config_value(config_str);
    let options = parse_options(&options.unwrap_or_default());
    match name.as_str() {
        "Full" => Ok(full()),
        "Null" => Ok(null()),
        "Constant" => {
            let fraction = required_option::<f64>(&options, "fraction", config_str)?;
            Ok(constant(ensure_non_negative("utilization fraction", fraction)?))
        }
        "Linear" => {
            let initial = required_option::<f64>(&options, "initial", config_str)?;
            let rate = required_option::<f64>(&options, "rate", config_str)?;
            Ok(linear(initial, rate))
        }
        _ => Err(Error::InvalidConfig(format!("unknown utilization model `{}`", config_str))),
    }
}
