//! Conversion of script values into entity properties.

use super::args::BridgeArg;
use crate::property::PropertyValue;

/// Coerces one script value, trying bool, then integer, then double, then string.
///
/// Numeric strings pass the number check but never the integer check, so they become doubles.
pub fn coerce_property(value: &BridgeArg) -> Option<PropertyValue> {
    match value {
        BridgeArg::Bool(b) => Some(PropertyValue::Bool(*b)),
        BridgeArg::Int(i) => Some(PropertyValue::Int(*i)),
        BridgeArg::Number(n) => Some(PropertyValue::Double(*n)),
        BridgeArg::Str(_) => match value.as_number() {
            Some(n) => Some(PropertyValue::Double(n)),
            None => value.as_string().map(PropertyValue::Str),
        },
        BridgeArg::Nil | BridgeArg::Table(_) | BridgeArg::Other => None,
    }
}

/// Key/value pairs of a property table. Keys must be strings or numbers, values that do not
/// coerce are dropped.
pub fn property_pairs(table: &BridgeArg) -> Option<Vec<(String, PropertyValue)>> {
    let BridgeArg::Table(pairs) = table else {
        return None;
    };
    Some(
        pairs
            .iter()
            .filter_map(|(key, value)| {
                let key = match key {
                    BridgeArg::Str(_) | BridgeArg::Int(_) | BridgeArg::Number(_) => key.as_string()?,
                    _ => return None,
                };
                Some((key, coerce_property(value)?))
            })
            .collect(),
    )
}
