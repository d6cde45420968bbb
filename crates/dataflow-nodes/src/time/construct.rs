//! Time Construct Node
//!
//! Builds a time of day from hours, minutes and seconds. The value is a
//! UTC timestamp on the epoch day 1899-12-31, rendered as RFC 3339 text
//! like every other datetime value.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat};
use dataflow_engine::{
    all_are_defined_and_present, DataType, EngineError, FormValues, IoValues, MetaContext,
    NodeDef, NodeDescriptor, NodeExecutionContext, NodeExecutionResult, RegisteredNodeType,
    Result, ServerNode, SocketMeta, SocketMetas,
};

/// Time Construct Node
///
/// # Inputs
/// - `hours` - Integer in `0..=23`
/// - `minutes` - Integer in `0..=59`
/// - `seconds` - Integer in `0..=59`
///
/// # Outputs
/// - `value` - The constructed time
pub struct TimeConstructNode;

impl TimeConstructNode {
    pub const TYPE: &'static str = "TimeConstruct";
    pub const PORT_HOURS: &'static str = "hours";
    pub const PORT_MINUTES: &'static str = "minutes";
    pub const PORT_SECONDS: &'static str = "seconds";
    pub const PORT_VALUE: &'static str = "value";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }

    /// Whole number at `name` within `0..=max`
    fn component(inputs: &IoValues, name: &str, max: u32) -> Option<u32> {
        let value = inputs.get(name)?.as_f64()?;
        (value.fract() == 0.0 && (0.0..=f64::from(max)).contains(&value)).then_some(value as u32)
    }
}

impl NodeDescriptor for TimeConstructNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Time Construct")
            .input(Self::PORT_HOURS, DataType::Number, "Hours")
            .input(Self::PORT_MINUTES, DataType::Number, "Minutes")
            .input(Self::PORT_SECONDS, DataType::Number, "Seconds")
            .output(Self::PORT_VALUE, DataType::Datetime, "Time")
            .path(&["Time"])
            .keywords(&["time", "construct", "hours", "minutes", "seconds"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(TimeConstructNode::registration));

#[async_trait]
impl ServerNode for TimeConstructNode {
    async fn is_input_valid(&self, inputs: &IoValues) -> Result<bool> {
        Ok(Self::component(inputs, Self::PORT_HOURS, 23).is_some()
            && Self::component(inputs, Self::PORT_MINUTES, 59).is_some()
            && Self::component(inputs, Self::PORT_SECONDS, 59).is_some())
    }

    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let complete = [Self::PORT_HOURS, Self::PORT_MINUTES, Self::PORT_SECONDS]
            .iter()
            .all(|name| inputs.contains_key(*name))
            && all_are_defined_and_present(inputs);
        let meta = if complete {
            SocketMeta::present(serde_json::json!({}))
        } else {
            SocketMeta::absent()
        };
        Ok(SocketMetas::from([(Self::PORT_VALUE.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        _form: &FormValues,
        inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let (Some(hours), Some(minutes), Some(seconds)) = (
            Self::component(&inputs, Self::PORT_HOURS, 23),
            Self::component(&inputs, Self::PORT_MINUTES, 59),
            Self::component(&inputs, Self::PORT_SECONDS, 59),
        ) else {
            return Err(EngineError::InvalidInput);
        };

        let time = NaiveDate::from_ymd_opt(1899, 12, 31)
            .and_then(|day| day.and_hms_opt(hours, minutes, seconds))
            .ok_or(EngineError::InvalidInput)?
            .and_utc();
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            Self::PORT_VALUE.to_string(),
            serde_json::Value::String(time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        )])))
    }
}
