//! Format Number Node
//!
//! Renders a number as text. The form controls decimal places, digit
//! grouping, abbreviation of large values and percentage output.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::form::{form_bool, form_f64, form_str};
use dataflow_engine::{
    all_are_defined_and_present, DataType, FormValues, IoValues, MetaContext, NodeDef,
    NodeDescriptor, NodeExecutionContext, NodeExecutionResult, RegisteredNodeType, Result,
    ServerNode, SocketMeta, SocketMetas,
};

const MAX_MANTISSA: f64 = 20.0;

/// Abbreviations used when averaging, largest first
const ABBREVIATIONS: [(f64, &str); 4] = [(1e12, "t"), (1e9, "b"), (1e6, "m"), (1e3, "k")];

/// How the formatted value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputStyle {
    #[default]
    Number,
    /// Multiplied by 100 and suffixed with `%`
    Percent,
}

impl OutputStyle {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "number" => Some(Self::Number),
            "percent" => Some(Self::Percent),
            _ => None,
        }
    }
}

/// Formatting options decoded from the node form
#[derive(Debug, Clone, PartialEq)]
pub struct NumberFormat {
    /// Decimal places
    pub mantissa: usize,
    /// Drop trailing zeros of the decimal places
    pub optional_mantissa: bool,
    pub thousands_separated: bool,
    /// Abbreviate large values (`1.2k`, `3m`, ...)
    pub average: bool,
    /// Put a space between the digits and a suffix
    pub space_separated: bool,
    pub output: OutputStyle,
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            mantissa: 0,
            optional_mantissa: true,
            thousands_separated: true,
            average: false,
            space_separated: true,
            output: OutputStyle::Number,
        }
    }
}

impl NumberFormat {
    /// Decode the form; `None` if a present field holds an unusable value
    pub fn from_form(form: &FormValues) -> Option<Self> {
        let defaults = Self::default();
        let mantissa = match form.get("mantissa") {
            None | Some(serde_json::Value::Null) => defaults.mantissa,
            Some(_) => {
                let raw = form_f64(form, "mantissa")?;
                if !(0.0..=MAX_MANTISSA).contains(&raw) || raw.fract() != 0.0 {
                    return None;
                }
                raw as usize
            }
        };
        let output = match form.get("output") {
            None | Some(serde_json::Value::Null) => defaults.output,
            Some(_) => OutputStyle::parse(form_str(form, "output")?)?,
        };

        Some(Self {
            mantissa,
            optional_mantissa: form_bool(form, "opt-mantissa").unwrap_or(defaults.optional_mantissa),
            thousands_separated: form_bool(form, "thousands-separated")
                .unwrap_or(defaults.thousands_separated),
            average: form_bool(form, "average").unwrap_or(defaults.average),
            space_separated: form_bool(form, "space-separated").unwrap_or(defaults.space_separated),
            output,
        })
    }
}

/// Format `value` according to `format`
pub fn format_number(value: f64, format: &NumberFormat) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let mut scaled = value;
    let mut suffix = "";
    match format.output {
        OutputStyle::Percent => {
            scaled *= 100.0;
            suffix = "%";
        }
        OutputStyle::Number if format.average => {
            if let Some(&(threshold, abbreviation)) =
                ABBREVIATIONS.iter().find(|(t, _)| value.abs() >= *t)
            {
                scaled /= threshold;
                suffix = abbreviation;
            }
        }
        OutputStyle::Number => {}
    }

    let mut digits = format!("{:.*}", format.mantissa, round_half_up(scaled, format.mantissa));
    if format.optional_mantissa && digits.contains('.') {
        digits = digits.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    if digits == "-0" {
        digits = "0".to_string();
    }
    if format.thousands_separated {
        digits = group_thousands(&digits);
    }

    let separator = if format.space_separated && !suffix.is_empty() {
        " "
    } else {
        ""
    };
    format!("{}{}{}", digits, separator, suffix)
}

/// Round to `places` decimals with ties away from zero
fn round_half_up(value: f64, places: usize) -> f64 {
    let factor = 10f64.powi(places as i32);
    let shifted = value * factor;
    if shifted.is_finite() {
        shifted.round() / factor
    } else {
        value
    }
}

fn group_thousands(digits: &str) -> String {
    let (sign, unsigned) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, c) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match fraction {
        Some(fraction) => format!("{}{}.{}", sign, grouped, fraction),
        None => format!("{}{}", sign, grouped),
    }
}

/// Format Number Node
///
/// # Inputs
/// - `number` - The number to format
///
/// # Outputs
/// - `formatted` - The formatted text
///
/// # Form
/// - `mantissa`, `opt-mantissa`, `thousands-separated`, `average`,
///   `space-separated`, `output` (`"number"` or `"percent"`)
pub struct FormatNumberNode;

impl FormatNumberNode {
    pub const TYPE: &'static str = "FormatNumber";
    pub const PORT_NUMBER: &'static str = "number";
    pub const PORT_FORMATTED: &'static str = "formatted";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for FormatNumberNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Format Number")
            .input(Self::PORT_NUMBER, DataType::Number, "Number")
            .output(Self::PORT_FORMATTED, DataType::String, "Formatted")
            .path(&["Number", "Converters"])
            .keywords(&["format", "number", "percent", "thousands"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(FormatNumberNode::registration));

#[async_trait]
impl ServerNode for FormatNumberNode {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        Ok(NumberFormat::from_form(form).is_some())
    }

    async fn is_input_valid(&self, inputs: &IoValues) -> Result<bool> {
        Ok(inputs
            .get(Self::PORT_NUMBER)
            .is_some_and(|v| v.is_number()))
    }

    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let meta = if all_are_defined_and_present(inputs) {
            SocketMeta::present(serde_json::json!({}))
        } else {
            SocketMeta::absent()
        };
        Ok(SocketMetas::from([(Self::PORT_FORMATTED.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        form: &FormValues,
        inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let format = NumberFormat::from_form(form).unwrap_or_default();
        let number = inputs
            .get(Self::PORT_NUMBER)
            .and_then(|v| v.as_f64())
            .unwrap_or_default();
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            Self::PORT_FORMATTED.to_string(),
            serde_json::Value::String(format_number(number, &format)),
        )])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use crate::NumberInputNode;
    use dataflow_engine::{GraphBuilder, InMemoryStore};
    use serde_json::json;

    fn form(entries: &[(&str, serde_json::Value)]) -> FormValues {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_default_format() {
        let format = NumberFormat::default();
        assert_eq!(format_number(1234.5, &format), "1,235");
        assert_eq!(format_number(1234567.891, &format), "1,234,568");
        assert_eq!(format_number(1000.0, &format), "1,000");
        assert_eq!(format_number(-1234.5, &format), "-1,235");
        assert_eq!(format_number(0.0, &format), "0");
        assert_eq!(format_number(-0.001, &format), "0");
    }

    #[tokio::test]
    async fn test_empty_form_uses_defaults() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("n", NumberInputNode::TYPE)
            .with_form("value", json!(1234.5))
            .add_node("fmt", FormatNumberNode::TYPE)
            .connect("n", "value", "fmt", "number")
            .build_into(&store);

        let result = test_util::execute(&store, "fmt").await.unwrap();
        assert_eq!(result.outputs["formatted"], json!("1,235"));
    }

    #[test]
    fn test_fixed_mantissa() {
        let format = NumberFormat {
            mantissa: 3,
            optional_mantissa: false,
            thousands_separated: false,
            ..NumberFormat::default()
        };
        assert_eq!(format_number(1234.5, &format), "1234.500");
    }

    #[test]
    fn test_average_and_percent() {
        let average = NumberFormat {
            average: true,
            space_separated: true,
            mantissa: 1,
            ..NumberFormat::default()
        };
        assert_eq!(format_number(1_500.0, &average), "1.5 k");
        assert_eq!(format_number(2_000_000.0, &average), "2 m");
        assert_eq!(format_number(999.0, &average), "999");

        let percent = NumberFormat {
            output: OutputStyle::Percent,
            ..NumberFormat::default()
        };
        assert_eq!(format_number(0.256, &percent), "26 %");

        let tight_percent = NumberFormat {
            mantissa: 1,
            space_separated: false,
            ..percent
        };
        assert_eq!(format_number(0.256, &tight_percent), "25.6%");
    }

    #[test]
    fn test_form_decoding() {
        let format = NumberFormat::from_form(&form(&[
            ("mantissa", json!(0)),
            ("thousands-separated", json!(false)),
            ("output", json!("percent")),
        ]))
        .unwrap();
        assert_eq!(format.mantissa, 0);
        assert!(!format.thousands_separated);
        assert_eq!(format.output, OutputStyle::Percent);

        assert_eq!(NumberFormat::from_form(&FormValues::new()), Some(NumberFormat::default()));
        assert!(NumberFormat::from_form(&form(&[("mantissa", json!(1.5))])).is_none());
        assert!(NumberFormat::from_form(&form(&[("mantissa", json!("2"))])).is_none());
        assert!(NumberFormat::from_form(&form(&[("output", json!("currency"))])).is_none());
    }

    #[tokio::test]
    async fn test_formats_upstream_number() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("n", NumberInputNode::TYPE)
            .with_form("value", json!(12345.678))
            .add_node("fmt", FormatNumberNode::TYPE)
            .with_form("mantissa", json!(1))
            .connect("n", "value", "fmt", "number")
            .build_into(&store);

        let result = test_util::execute(&store, "fmt").await.unwrap();
        assert_eq!(result.outputs["formatted"], json!("12,345.7"));

        let metas = test_util::meta_outputs(&store, "fmt").await.unwrap();
        assert!(metas["formatted"].is_present);
    }
}
