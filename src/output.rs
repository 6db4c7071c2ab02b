//! Output formatting for command results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format shared by all commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Pretty table with borders (default)
    #[default]
    Table,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON with indentation
    JsonPretty,
    /// One JSON object per line
    JsonLine,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty | Self::JsonLine)
    }

    /// Get a list of all format names for help text
    pub fn all_names() -> &'static [&'static str] {
        &["table", "json", "json-pretty", "json-line"]
    }

    /// Render a list of serializable items.
    ///
    /// `Table` falls back to pretty JSON; callers with tabled rows render
    /// tables themselves.
    pub fn render_list<T: Serialize>(&self, items: &[T]) -> serde_json::Result<String> {
        match self {
            Self::Json => serde_json::to_string(items),
            Self::Table | Self::JsonPretty => serde_json::to_string_pretty(items),
            Self::JsonLine => items
                .iter()
                .map(serde_json::to_string)
                .collect::<serde_json::Result<Vec<_>>>()
                .map(|lines| lines.join("\n")),
        }
    }

    /// Render a single serializable value.
    pub fn render<T: Serialize>(&self, item: &T) -> serde_json::Result<String> {
        match self {
            Self::Json | Self::JsonLine => serde_json::to_string(item),
            Self::Table | Self::JsonPretty => serde_json::to_string_pretty(item),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
            Self::JsonLine => write!(f, "json-line"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "json-line" | "jsonline" | "jsonl" | "ndjson" => Ok(Self::JsonLine),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: {}",
                s,
                Self::all_names().join(", ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "jsonl".parse::<OutputFormat>().unwrap(),
            OutputFormat::JsonLine
        );
        assert_eq!(
            "json-pretty".parse::<OutputFormat>().unwrap(),
            OutputFormat::JsonPretty
        );
        assert!("csv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display_round_trips() {
        for name in OutputFormat::all_names() {
            let format: OutputFormat = name.parse().unwrap();
            assert_eq!(&format.to_string(), name);
        }
    }

    #[test]
    fn test_render_list() {
        let items = vec![json!({"id": 1}), json!({"id": 2})];
        assert_eq!(
            OutputFormat::Json.render_list(&items).unwrap(),
            r#"[{"id":1},{"id":2}]"#
        );
        assert_eq!(
            OutputFormat::JsonLine.render_list(&items).unwrap(),
            "{\"id\":1}\n{\"id\":2}"
        );
        assert!(OutputFormat::JsonPretty
            .render_list(&items)
            .unwrap()
            .contains('\n'));
    }

    #[test]
    fn test_is_json() {
        assert!(!OutputFormat::Table.is_json());
        assert!(OutputFormat::JsonLine.is_json());
    }
}
