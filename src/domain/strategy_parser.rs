//! Strategy definition parser.
//!
//! Builds an [`Instruction`] tree from a JSON definition. Every node is an
//! object with a `"type"` discriminator; arrays in branch position and at the
//! root are read as compounds. Unknown types, unknown keys, missing fields,
//! wrong JSON types and expression syntax errors are reported with the path
//! of the offending node. No expression is evaluated here.

use crate::domain::bar::PriceSource;
use crate::domain::error::DslError;
use crate::domain::expr::Expr;
use crate::domain::expr_parser;
use crate::domain::instruction::{
    IndicatorInstruction, IndicatorParams, Instruction, InstructionPath, TradeInstruction,
    WaitCondition,
};
use crate::domain::strategy::Strategy;
use chrono::TimeDelta;
use serde_json::{Map, Value};
use tracing::{debug, info};

type Object = Map<String, Value>;

fn error(path: &InstructionPath, message: impl Into<String>) -> DslError {
    DslError::Parse {
        path: path.to_string(),
        message: message.into(),
    }
}

fn field_error(path: &InstructionPath, field: &str, message: impl Into<String>) -> DslError {
    DslError::Parse {
        path: format!("{}.{}", path, field),
        message: message.into(),
    }
}

/// Parse a definition given as JSON text.
pub fn parse_str(source: &str) -> Result<Instruction, DslError> {
    let value: Value = serde_json::from_str(source).map_err(|e| DslError::Parse {
        path: "root".to_string(),
        message: format!("invalid JSON: {}", e),
    })?;
    parse_definition(&value)
}

/// Parse a strategy document given as JSON text.
///
/// A document is an object with a `definition` and optional `name`,
/// `description`, `symbol` and `interval`. Anything without a `definition`
/// key is read as a bare definition.
pub fn parse_strategy_document(source: &str) -> Result<Strategy, DslError> {
    let value: Value = serde_json::from_str(source).map_err(|e| DslError::Parse {
        path: "root".to_string(),
        message: format!("invalid JSON: {}", e),
    })?;

    let obj = match &value {
        Value::Object(obj) if obj.contains_key("definition") => obj,
        _ => {
            let definition = parse_definition(&value)?;
            info!(nodes = definition.node_count(), "loaded bare strategy definition");
            return Ok(Strategy::new("unnamed", definition));
        }
    };

    const KEYS: [&str; 5] = ["name", "description", "symbol", "interval", "definition"];
    if let Some(key) = obj.keys().find(|k| !KEYS.contains(&k.as_str())) {
        return Err(DslError::Parse {
            path: "document".to_string(),
            message: format!("unknown field '{}' (expected one of: {})", key, KEYS.join(", ")),
        });
    }

    let text = |key: &str| -> Result<Option<String>, DslError> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(DslError::Parse {
                path: format!("document.{}", key),
                message: format!("expected a string, found {}", json_type(other)),
            }),
        }
    };

    let definition = parse_definition(&obj["definition"])?;
    let strategy = Strategy {
        name: text("name")?.unwrap_or_else(|| "unnamed".to_string()),
        description: text("description")?.unwrap_or_default(),
        symbol: text("symbol")?,
        interval: text("interval")?,
        definition,
    };
    info!(
        name = %strategy.name,
        nodes = strategy.definition.node_count(),
        "loaded strategy"
    );
    Ok(strategy)
}

/// Parse a definition into a tree whose root is always a `Compound`.
pub fn parse_definition(definition: &Value) -> Result<Instruction, DslError> {
    let root = InstructionPath::root();
    let tree = match definition {
        Value::Array(items) => parse_children(items, &root)?,
        Value::Object(obj) if node_type(obj, &root)? == "compound" => parse_node(definition, &root)?,
        Value::Object(_) => Instruction::Compound(vec![parse_node(definition, &root.child(0))?]),
        other => {
            return Err(error(
                &root,
                format!("expected an object or array, found {}", json_type(other)),
            ));
        }
    };
    debug!(nodes = tree.node_count(), "parsed strategy definition");
    Ok(tree)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn node_type(obj: &Object, path: &InstructionPath) -> Result<String, DslError> {
    match obj.get("type") {
        Some(Value::String(s)) => Ok(s.trim().to_ascii_lowercase()),
        Some(other) => Err(field_error(
            path,
            "type",
            format!("expected a string, found {}", json_type(other)),
        )),
        None => Err(error(path, "missing required field 'type'")),
    }
}

fn check_keys(obj: &Object, allowed: &[&str], path: &InstructionPath) -> Result<(), DslError> {
    for key in obj.keys() {
        if key != "type" && !allowed.contains(&key.as_str()) {
            return Err(error(
                path,
                format!(
                    "unknown field '{}' (expected one of: {})",
                    key,
                    allowed.join(", ")
                ),
            ));
        }
    }
    Ok(())
}

fn parse_children(items: &[Value], path: &InstructionPath) -> Result<Instruction, DslError> {
    let children = items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_node(item, &path.child(i)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Instruction::Compound(children))
}

fn parse_node(value: &Value, path: &InstructionPath) -> Result<Instruction, DslError> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(items) => return parse_children(items, path),
        other => {
            return Err(error(
                path,
                format!("expected an instruction object, found {}", json_type(other)),
            ));
        }
    };

    let kind = node_type(obj, path)?;
    let node = match kind.as_str() {
        "compound" => {
            check_keys(obj, &["children"], path)?;
            match obj.get("children") {
                Some(Value::Array(items)) => parse_children(items, path)?,
                Some(other) => {
                    return Err(field_error(
                        path,
                        "children",
                        format!("expected an array, found {}", json_type(other)),
                    ));
                }
                None => return Err(error(path, "missing required field 'children'")),
            }
        }
        "if" => parse_if(obj, path)?,
        "indicator" => parse_indicator(obj, path)?,
        "operation" => parse_operation(obj, path)?,
        "trade" => parse_trade(obj, path)?,
        "wait" => parse_wait(obj, path)?,
        other => {
            return Err(field_error(
                path,
                "type",
                format!(
                    "unknown instruction type '{}' (expected compound, if, indicator, operation, trade or wait)",
                    other
                ),
            ));
        }
    };
    debug!(path = %path, kind = node.kind_name(), "parsed node");
    Ok(node)
}

fn required<'a>(obj: &'a Object, key: &str, path: &InstructionPath) -> Result<&'a Value, DslError> {
    match obj.get(key) {
        Some(Value::Null) | None => Err(error(path, format!("missing required field '{}'", key))),
        Some(v) => Ok(v),
    }
}

fn optional<'a>(obj: &'a Object, key: &str) -> Option<&'a Value> {
    match obj.get(key) {
        Some(Value::Null) | None => None,
        Some(v) => Some(v),
    }
}

fn string_field(obj: &Object, key: &str, path: &InstructionPath) -> Result<String, DslError> {
    match required(obj, key, path)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(field_error(
            path,
            key,
            format!("expected a string, found {}", json_type(other)),
        )),
    }
}

fn parse_expression(
    source: &str,
    path: &InstructionPath,
    field: &str,
) -> Result<Expr, DslError> {
    expr_parser::parse(source)
        .map_err(|e| field_error(path, field, format!("{} in '{}'", e, source)))
}

/// An expression written either as a JSON number or as expression text.
fn numeric_expression(value: &Value, path: &InstructionPath, field: &str) -> Result<Expr, DslError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(Expr::Number)
            .ok_or_else(|| field_error(path, field, "number out of range")),
        Value::String(s) => parse_expression(s, path, field),
        other => Err(field_error(
            path,
            field,
            format!("expected a number or expression, found {}", json_type(other)),
        )),
    }
}

fn target_field(obj: &Object, key: &str, path: &InstructionPath) -> Result<String, DslError> {
    let target = string_field(obj, key, path)?;
    let target = target.trim().to_string();
    if !expr_parser::is_valid_identifier(&target) {
        return Err(field_error(
            path,
            key,
            format!("'{}' is not a valid variable name", target),
        ));
    }
    Ok(target)
}

fn parse_if(obj: &Object, path: &InstructionPath) -> Result<Instruction, DslError> {
    check_keys(obj, &["condition", "then", "else"], path)?;
    let condition = match required(obj, "condition", path)? {
        Value::String(s) => parse_expression(s, path, "condition")?,
        Value::Bool(b) => Expr::Bool(*b),
        other => {
            return Err(field_error(
                path,
                "condition",
                format!("expected an expression string, found {}", json_type(other)),
            ));
        }
    };
    let then_branch = parse_node(required(obj, "then", path)?, &path.then_branch())?;
    let else_branch = optional(obj, "else")
        .map(|v| parse_node(v, &path.else_branch()))
        .transpose()?;
    Ok(Instruction::If {
        condition,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    })
}

fn integer_param(value: &Value, path: &InstructionPath, key: &str) -> Result<i64, DslError> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(field_error(
            path,
            &format!("params.{}", key),
            format!("expected an integer, found {}", value),
        )),
    }
}

fn parse_indicator(obj: &Object, path: &InstructionPath) -> Result<Instruction, DslError> {
    check_keys(obj, &["name", "params", "target"], path)?;
    let name = string_field(obj, "name", path)?.trim().to_string();
    let target = target_field(obj, "target", path)?;

    let mut params = IndicatorParams::default();
    if let Some(raw) = optional(obj, "params") {
        let Value::Object(map) = raw else {
            return Err(field_error(
                path,
                "params",
                format!("expected an object, found {}", json_type(raw)),
            ));
        };
        for (key, value) in map {
            match key.as_str() {
                "period" => params.period = Some(integer_param(value, path, key)?),
                "fast" => params.fast = Some(integer_param(value, path, key)?),
                "slow" => params.slow = Some(integer_param(value, path, key)?),
                "signal" => params.signal = Some(integer_param(value, path, key)?),
                "window" => params.window = Some(integer_param(value, path, key)?),
                "multiplier" => {
                    params.multiplier = Some(value.as_f64().ok_or_else(|| {
                        field_error(path, "params.multiplier", "expected a number")
                    })?)
                }
                "mode" => {
                    params.mode = Some(
                        value
                            .as_str()
                            .ok_or_else(|| field_error(path, "params.mode", "expected a string"))?
                            .to_string(),
                    )
                }
                "source" => {
                    let s = value
                        .as_str()
                        .ok_or_else(|| field_error(path, "params.source", "expected a string"))?;
                    params.source = s
                        .parse::<PriceSource>()
                        .map_err(|e| field_error(path, "params.source", e))?;
                }
                other => {
                    return Err(field_error(
                        path,
                        "params",
                        format!("unknown parameter '{}'", other),
                    ));
                }
            }
        }
    }

    Ok(Instruction::Indicator(IndicatorInstruction {
        name,
        params,
        target,
    }))
}

fn parse_operation(obj: &Object, path: &InstructionPath) -> Result<Instruction, DslError> {
    check_keys(obj, &["target", "expression", "statement"], path)?;
    match (optional(obj, "statement"), optional(obj, "target")) {
        (Some(statement), None) => {
            if optional(obj, "expression").is_some() {
                return Err(error(path, "use either 'statement' or 'target'/'expression'"));
            }
            let Value::String(src) = statement else {
                return Err(field_error(path, "statement", "expected a string"));
            };
            let (target, expr) = expr_parser::parse_assignment(src)
                .map_err(|e| field_error(path, "statement", format!("{} in '{}'", e, src)))?;
            Ok(Instruction::Operation { target, expr })
        }
        (Some(_), Some(_)) => Err(error(path, "use either 'statement' or 'target'/'expression'")),
        (None, _) => {
            let target = target_field(obj, "target", path)?;
            let expr = numeric_expression(required(obj, "expression", path)?, path, "expression")?;
            Ok(Instruction::Operation { target, expr })
        }
    }
}

fn parse_trade(obj: &Object, path: &InstructionPath) -> Result<Instruction, DslError> {
    check_keys(obj, &["symbol", "side", "size", "price", "stop"], path)?;
    let symbol = string_field(obj, "symbol", path)?;
    let side = string_field(obj, "side", path)?;
    let size = numeric_expression(required(obj, "size", path)?, path, "size")?;
    let price = optional(obj, "price")
        .map(|v| numeric_expression(v, path, "price"))
        .transpose()?;
    let stop = optional(obj, "stop")
        .map(|v| numeric_expression(v, path, "stop"))
        .transpose()?;
    Ok(Instruction::Trade(TradeInstruction {
        symbol,
        side,
        size,
        price,
        stop,
    }))
}

fn parse_wait(obj: &Object, path: &InstructionPath) -> Result<Instruction, DslError> {
    check_keys(obj, &["bars", "duration", "until"], path)?;
    let present: Vec<&str> = ["bars", "duration", "until"]
        .into_iter()
        .filter(|k| optional(obj, k).is_some())
        .collect();
    if present.len() != 1 {
        return Err(error(
            path,
            "wait needs exactly one of 'bars', 'duration' or 'until'",
        ));
    }

    let condition = match present[0] {
        "bars" => {
            let raw = required(obj, "bars", path)?;
            let bars = raw
                .as_i64()
                .or_else(|| raw.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| field_error(path, "bars", "expected an integer"))?;
            WaitCondition::Bars(bars)
        }
        "duration" => {
            let raw = required(obj, "duration", path)?;
            let delta = match raw {
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| "number out of range".to_string())
                    .and_then(seconds_to_delta),
                Value::String(s) => parse_duration(s),
                other => Err(format!("expected a duration, found {}", json_type(other))),
            }
            .map_err(|e| field_error(path, "duration", e))?;
            WaitCondition::Duration(delta)
        }
        _ => {
            let src = string_field(obj, "until", path)?;
            WaitCondition::Until(parse_expression(&src, path, "until")?)
        }
    };
    Ok(Instruction::Wait(condition))
}

fn seconds_to_delta(seconds: f64) -> Result<TimeDelta, String> {
    if !seconds.is_finite() {
        return Err(format!("duration {} is not finite", seconds));
    }
    let millis = (seconds * 1000.0).round();
    if millis.abs() >= i64::MAX as f64 {
        return Err(format!("duration {}s is out of range", seconds));
    }
    TimeDelta::try_milliseconds(millis as i64)
        .ok_or_else(|| format!("duration {}s is out of range", seconds))
}

/// Parse `"<number><unit>"` with unit `s`, `m`, `h` or `d`; a bare number
/// is seconds.
pub fn parse_duration(text: &str) -> Result<TimeDelta, String> {
    let text = text.trim();
    let (number, scale) = match text.chars().last() {
        Some('s') => (&text[..text.len() - 1], 1.0),
        Some('m') => (&text[..text.len() - 1], 60.0),
        Some('h') => (&text[..text.len() - 1], 3600.0),
        Some('d') => (&text[..text.len() - 1], 86_400.0),
        Some(c) if c.is_ascii_digit() => (text, 1.0),
        _ => return Err(format!("invalid duration '{}' (expected e.g. 30s, 5m, 1h)", text)),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{}' (expected e.g. 30s, 5m, 1h)", text))?;
    seconds_to_delta(value * scale)
}
