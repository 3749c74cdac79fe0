// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Custom functions available to policy expressions

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use jmespath::functions::{ArgumentType, CustomFunction, Signature};
use jmespath::{Context, ErrorReason, JmespathError, Rcvar, Runtime, ToJmespath, Variable};
use regex::{NoExpand, Regex};
use serde_json::{Value, json};

type Handler = fn(&[Rcvar]) -> Result<Value, String>;

/// Register the policy functions on `runtime`
pub fn register_custom_functions(runtime: &mut Runtime) {
    use ArgumentType::{Number, String as Str};
    let str_or_number = || ArgumentType::Union(vec![Str, Number]);

    register(runtime, "compare", vec![Str, Str], compare);
    register(runtime, "equal_fold", vec![Str, Str], equal_fold);
    register(runtime, "replace_all", vec![Str, Str, Str], replace_all);
    register(runtime, "to_upper", vec![Str], |args| {
        Ok(json!(string_arg(args, 0)?.to_uppercase()))
    });
    register(runtime, "to_lower", vec![Str], |args| {
        Ok(json!(string_arg(args, 0)?.to_lowercase()))
    });
    register(runtime, "trim", vec![Str, Str], trim);
    register(runtime, "trim_prefix", vec![Str, Str], trim_prefix);
    register(runtime, "split", vec![Str, Str], split);
    register(runtime, "regex_match", vec![Str, str_or_number()], regex_match);
    register(
        runtime,
        "regex_replace_all",
        vec![Str, str_or_number(), str_or_number()],
        regex_replace_all,
    );
    register(
        runtime,
        "regex_replace_all_literal",
        vec![Str, str_or_number(), str_or_number()],
        regex_replace_all_literal,
    );
    register(runtime, "pattern_match", vec![Str, str_or_number()], pattern_match);
    register(runtime, "to_boolean", vec![Str], to_boolean);
    register(runtime, "base64_encode", vec![Str], |args| {
        Ok(json!(STANDARD.encode(string_arg(args, 0)?)))
    });
    register(runtime, "base64_decode", vec![Str], base64_decode);
    register(runtime, "truncate", vec![Str, Number], truncate);
    register(runtime, "label_match", vec![ArgumentType::Object, ArgumentType::Object], label_match);
    register(runtime, "parse_json", vec![Str], parse_json);
}

fn register(runtime: &mut Runtime, name: &'static str, inputs: Vec<ArgumentType>, handler: Handler) {
    let function = CustomFunction::new(
        Signature::new(inputs, None),
        Box::new(move |args: &[Rcvar], ctx: &mut Context<'_>| {
            let error = |message: String| {
                JmespathError::new(
                    ctx.expression,
                    ctx.offset,
                    ErrorReason::Parse(format!("{name}: {message}")),
                )
            };
            let value = handler(args).map_err(&error)?;
            value.to_jmespath().map_err(|err| error(err.to_string()))
        }),
    );
    runtime.register_function(name, Box::new(function));
}

fn string_arg(args: &[Rcvar], index: usize) -> Result<&str, String> {
    args.get(index)
        .and_then(|arg| arg.as_string())
        .map(String::as_str)
        .ok_or_else(|| format!("argument {} must be a string", index + 1))
}

/// Strings pass through, numbers and booleans are formatted
fn string_like(args: &[Rcvar], index: usize) -> Result<String, String> {
    match args.get(index).map(|arg| &**arg) {
        Some(Variable::String(s)) => Ok(s.clone()),
        Some(Variable::Number(n)) => Ok(n.to_string()),
        Some(Variable::Bool(b)) => Ok(b.to_string()),
        _ => Err(format!("argument {} must be a string or number", index + 1)),
    }
}

fn object_arg(args: &[Rcvar], index: usize) -> Result<serde_json::Map<String, Value>, String> {
    match args.get(index).map(|arg| serde_json::to_value(&**arg)) {
        Some(Ok(Value::Object(map))) => Ok(map),
        _ => Err(format!("argument {} must be an object", index + 1)),
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|err| err.to_string())
}

fn compare(args: &[Rcvar]) -> Result<Value, String> {
    let ordering = string_arg(args, 0)?.cmp(string_arg(args, 1)?);
    Ok(json!(ordering as i8))
}

fn equal_fold(args: &[Rcvar]) -> Result<Value, String> {
    let (a, b) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(json!(a.to_lowercase() == b.to_lowercase()))
}

fn replace_all(args: &[Rcvar]) -> Result<Value, String> {
    let (s, old, new) = (string_arg(args, 0)?, string_arg(args, 1)?, string_arg(args, 2)?);
    Ok(json!(s.replace(old, new)))
}

fn trim(args: &[Rcvar]) -> Result<Value, String> {
    let (s, cutset) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(json!(s.trim_matches(|c| cutset.contains(c))))
}

fn trim_prefix(args: &[Rcvar]) -> Result<Value, String> {
    let (s, prefix) = (string_arg(args, 0)?, string_arg(args, 1)?);
    Ok(json!(s.strip_prefix(prefix).unwrap_or(s)))
}

fn split(args: &[Rcvar]) -> Result<Value, String> {
    let (s, separator) = (string_arg(args, 0)?, string_arg(args, 1)?);
    if separator.is_empty() {
        return Ok(json!(s.chars().map(String::from).collect::<Vec<_>>()));
    }
    Ok(json!(s.split(separator).collect::<Vec<_>>()))
}

fn regex_match(args: &[Rcvar]) -> Result<Value, String> {
    let regex = compile_regex(string_arg(args, 0)?)?;
    Ok(json!(regex.is_match(&string_like(args, 1)?)))
}

fn regex_replace_all(args: &[Rcvar]) -> Result<Value, String> {
    let regex = compile_regex(string_arg(args, 0)?)?;
    let (src, replacement) = (string_like(args, 1)?, string_like(args, 2)?);
    Ok(json!(regex.replace_all(&src, replacement.as_str())))
}

fn regex_replace_all_literal(args: &[Rcvar]) -> Result<Value, String> {
    let regex = compile_regex(string_arg(args, 0)?)?;
    let (src, replacement) = (string_like(args, 1)?, string_like(args, 2)?);
    Ok(json!(regex.replace_all(&src, NoExpand(&replacement))))
}

/// Wildcard match where `*` and `?` are the only special characters
fn pattern_match(args: &[Rcvar]) -> Result<Value, String> {
    let pattern = string_arg(args, 0)?;
    let escaped: String = pattern
        .chars()
        .map(|c| match c {
            '*' | '?' => c.to_string(),
            other => glob::Pattern::escape(&other.to_string()),
        })
        .collect();
    let pattern = glob::Pattern::new(&escaped).map_err(|err| err.to_string())?;
    Ok(json!(pattern.matches(&string_like(args, 1)?)))
}

fn to_boolean(args: &[Rcvar]) -> Result<Value, String> {
    let input = string_arg(args, 0)?;
    match input.to_lowercase().as_str() {
        "true" => Ok(json!(true)),
        "false" => Ok(json!(false)),
        _ => Err(format!(
            "lowercase argument must be 'true' or 'false' (provided: '{input}')"
        )),
    }
}

fn base64_decode(args: &[Rcvar]) -> Result<Value, String> {
    let bytes = STANDARD
        .decode(string_arg(args, 0)?)
        .map_err(|err| err.to_string())?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|err| err.to_string())
}

fn truncate(args: &[Rcvar]) -> Result<Value, String> {
    let s = string_arg(args, 0)?;
    let length = args
        .get(1)
        .and_then(|arg| arg.as_number())
        .ok_or("argument 2 must be a number")?;
    let length = if length < 0.0 { 0 } else { length as usize };
    Ok(json!(s.chars().take(length).collect::<String>()))
}

/// Every entry of the selector is present with an equal value in the labels
fn label_match(args: &[Rcvar]) -> Result<Value, String> {
    let (selector, labels) = (object_arg(args, 0)?, object_arg(args, 1)?);
    let matched = selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value));
    Ok(json!(matched))
}

fn parse_json(args: &[Rcvar]) -> Result<Value, String> {
    serde_json::from_str(string_arg(args, 0)?).map_err(|err| err.to_string())
}
