pub mod config;
pub mod records;
pub mod status;

use serde_json::Value;

/// Parse a record given on the command line as a JSON object.
pub(crate) fn parse_record(input: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| anyhow::anyhow!("record is not valid JSON: {}", e))?;
    if !value.is_object() {
        return Err(anyhow::anyhow!("record must be a JSON object"));
    }
    Ok(value)
}
