//! Parsing of `Name[option=value,...]` config strings.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Splits config value string into name and options parts.
///
/// For `Constant[fraction=0.8]` the parts are `Constant` and `fraction=0.8`.
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.trim().split_once('[') {
        Some((l, r)) => (l.trim().to_string(), Some(r.replace(']', ""))),
        None => (config_str.trim().to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
///
/// # Examples
///
/// ```rust
/// use dslab_cloudsim::options::parse_options;
///
/// let options = parse_options("initial=0.2, rate=0.1");
/// assert_eq!(options.get("initial").unwrap(), "0.2");
/// assert_eq!(options.get("rate").unwrap(), "0.1");
/// assert_eq!(options.get("other"), None);
/// ```
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

/// Reads a required option and parses it into `T`.
pub fn required_option<T: FromStr>(options: &HashMap<String, String>, name: &str, config_str: &str) -> Result<T> {
    let value = options
        .get(name)
        .ok_or_else(|| Error::InvalidConfig(format!("option `{}` is missing in `{}`", name, config_str)))?;
    value
        .parse::<T>()
        .map_err(|_| Error::InvalidConfig(format!("can't parse option `{}={}` in `{}`", name, value, config_str)))
}
