use quick_xml::events::BytesStart;

use super::TmxError;
use crate::property::PropertyValue;

/// Reads every attribute of an element as unescaped `(key, value)` pairs.
pub(super) fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, TmxError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

pub(super) fn parse_attr<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, TmxError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| TmxError::InvalidAttribute {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Converts a `<property name= type= value=/>` element into a typed entry.
pub(super) fn parse_property(e: &BytesStart<'_>) -> Result<Option<(String, PropertyValue)>, TmxError> {
    let mut name = None;
    let mut kind = String::from("string");
    let mut value = String::new();
    for (key, v) in attributes(e)? {
        match key.as_str() {
            "name" => name = Some(v),
            "type" => kind = v,
            "value" => value = v,
            _ => {}
        }
    }
    let Some(name) = name else {
        return Ok(None);
    };
    let typed = match kind.as_str() {
        "bool" => PropertyValue::Bool(value.trim() == "true"),
        "int" | "object" => PropertyValue::Int(parse_attr(&name, &value)?),
        "float" => PropertyValue::Double(parse_attr(&name, &value)?),
        _ => PropertyValue::Str(value),
    };
    Ok(Some((name, typed)))
}
