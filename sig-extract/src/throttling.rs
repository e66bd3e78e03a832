// Signature descrambling core.
//
// SPDX-License-Identifier: Apache-2.0
//
// Copyright (C) 2024 sigcipher contributors. All rights reserved.
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

//! Locates the throttling array and its execution plan inside a script
//! blob.
//!
//! The throttling array is heterogeneous: integers, strings, a
//! self-reference back to the array itself (the `null-self` sentinel,
//! used for recursive calls like `c[0](c[m])`), nested arrays, function
//! primitives, and a literal `b` placeholder slot patched in at call
//! time with caller-supplied digits.

use once_cell::sync::Lazy;
use regex::Regex;

use sig_primitives::{match_throttle_primitive, ThrottlePrimitive};
use sig_scanner::{balanced_brace_body, balanced_bracket_body, split_comma_depth0};

use crate::error::ExtractError;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// One element of the throttling array.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElement {
    /// A bare integer literal.
    Integer(i64),
    /// A bare string literal (quotes stripped).
    Str(String),
    /// The array's self-reference sentinel, used for recursive calls.
    NullSelf,
    /// A nested array literal.
    Nested(Vec<ArrayElement>),
    /// A recognized throttling primitive.
    Primitive(ThrottlePrimitive),
    /// The literal `b` placeholder slot, patched in at call time.
    Placeholder,
    /// Anything else, kept verbatim for diagnostic purposes.
    Raw(String),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// One step of the throttling execution plan: a call from the array
/// into itself, `array[func_idx](array[operand_idx], ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleStep {
    /// A single-operand call.
    Unary {
        /// Index of the primitive being called.
        func_idx: usize,
        /// Index of its operand.
        operand_idx: usize,
    },
    /// A two-operand call (used by the substitution cipher primitive).
    Binary {
        /// Index of the primitive being called.
        func_idx: usize,
        /// Index of its first operand.
        operand_idx: usize,
        /// Index of its second operand.
        extra_idx: usize,
    },
}

/// The fully extracted throttling program.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct ThrottlingProgram {
    /// The heterogeneous throttling array.
    pub array: Vec<ArrayElement>,
    /// The ordered execution plan over that array.
    pub plan: Vec<ThrottleStep>,
}

static THROTTLING_FUNCTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?:^|[;\s])([a-zA-Z0-9_$]{2,})\s*=\s*function\s*\(\s*a\s*\)\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)\s*;.*for\s*\("#).unwrap(),
        Regex::new(r#"\b([a-zA-Z0-9_$]{2,})\s*=\s*function\s*\(\s*a\s*\)\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)\s*;\s*[a-zA-Z0-9_$]+\.length"#).unwrap(),
    ]
});

/// Finds the name of the throttling function, analogous to
/// [`crate::signature::find_initial_function_name`] but scoped to the
/// for-loop shape the throttling driver takes.
///
/// Current media-platform revisions do not always ship a throttling
/// stage; callers should treat a miss here as "no throttling in this
/// revision" rather than a hard failure.
pub fn find_throttling_function_name(js: &str) -> Option<String> {
    for re in THROTTLING_FUNCTION_PATTERNS.iter() {
        if let Some(caps) = re.captures(js) {
            if let Some(name) = caps.get(1) {
                return Some(name.as_str().to_string());
            }
        }
    }
    None
}

fn function_definition_offset(js: &str, name: &str) -> Option<usize> {
    let escaped = regex::escape(name);
    let form = Regex::new(&format!(r"{escaped}\s*=\s*function\s*\([^)]*\)\s*\{{")).ok()?;
    form.find(js).map(|m| m.end() - 1)
}

fn parse_array_element(item: &str, array_var: &str) -> ArrayElement {
    let item = item.trim();
    if item == array_var {
        return ArrayElement::NullSelf;
    }
    if item == "b" {
        return ArrayElement::Placeholder;
    }
    if let Ok(n) = item.parse::<i64>() {
        return ArrayElement::Integer(n);
    }
    if (item.starts_with('"') && item.ends_with('"') && item.len() >= 2)
        || (item.starts_with('\'') && item.ends_with('\'') && item.len() >= 2)
    {
        return ArrayElement::Str(item[1..item.len() - 1].to_string());
    }
    if item.starts_with('[') && item.ends_with(']') {
        let inner = &item[1..item.len() - 1];
        let elements = split_comma_depth0(inner)
            .into_iter()
            .map(|sub| parse_array_element(&sub, array_var))
            .collect();
        return ArrayElement::Nested(elements);
    }
    if item.starts_with("function") {
        if let Some(primitive) = match_throttle_primitive(item) {
            return ArrayElement::Primitive(primitive);
        }
        log::warn!("unrecognized throttling function shape: {item}");
    }
    ArrayElement::Raw(item.to_string())
}

/// Extracts the throttling array's elements for the array variable
/// `array_var`.
pub fn find_throttling_array(js: &str, array_var: &str) -> Result<Vec<ArrayElement>, ExtractError> {
    let escaped = regex::escape(array_var);
    let re = Regex::new(&format!(r"{escaped}\s*=\s*\[")).map_err(|e| {
        ExtractError::InvariantViolated(format!("failed to build throttling array regex: {e}"))
    })?;
    let m = re.find(js).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "throttling array",
        detail: format!("no array literal found for {array_var}"),
    })?;
    let range = balanced_bracket_body(js, m.start()).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "throttling array",
        detail: "array literal brackets did not balance".into(),
    })?;

    let elements = split_comma_depth0(&js[range])
        .into_iter()
        .map(|item| parse_array_element(&item, array_var))
        .collect();
    Ok(elements)
}

static STEP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+\[(\d+)\]\(\w+,\s*\w+\[(\d+)\](?:\s*,\s*\w+\[(\d+)\])?\)").unwrap());

/// Extracts the ordered call plan from the throttling function's
/// for-loop body.
pub fn find_throttling_plan(js: &str, func_name: &str) -> Result<Vec<ThrottleStep>, ExtractError> {
    let offset = function_definition_offset(js, func_name).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "throttling plan",
        detail: format!("no function definition found for {func_name}"),
    })?;
    let range = balanced_brace_body(js, offset).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "throttling plan",
        detail: "throttling function body braces did not balance".into(),
    })?;
    let body = &js[range];

    let plan = STEP_PATTERN
        .captures_iter(body)
        .filter_map(|caps| {
            let func_idx: usize = caps.get(1)?.as_str().parse().ok()?;
            let operand_idx: usize = caps.get(2)?.as_str().parse().ok()?;
            Some(match caps.get(3) {
                Some(extra) => ThrottleStep::Binary {
                    func_idx,
                    operand_idx,
                    extra_idx: extra.as_str().parse().ok()?,
                },
                None => ThrottleStep::Unary { func_idx, operand_idx },
            })
        })
        .collect();
    Ok(plan)
}

/// Runs the full throttling-extraction pipeline. Returns an empty
/// program, rather than an error, when no throttling function is
/// present in this script revision.
pub fn extract_throttling_program(js: &str) -> Result<ThrottlingProgram, ExtractError> {
    let Some(func_name) = find_throttling_function_name(js) else {
        log::debug!("no throttling function found in this script revision");
        return Ok(ThrottlingProgram::default());
    };

    let array_var_re = Regex::new(r"\bfor\s*\(\s*[a-zA-Z0-9_$]+\s*=\s*0\s*;.*?([a-zA-Z0-9_$]+)\.length")
        .map_err(|e| ExtractError::InvariantViolated(format!("failed to build array-var regex: {e}")))?;
    let offset = function_definition_offset(js, &func_name).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "throttling array variable",
        detail: format!("no function definition found for {func_name}"),
    })?;
    let body_range = balanced_brace_body(js, offset).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "throttling array variable",
        detail: "throttling function body braces did not balance".into(),
    })?;
    let body = &js[body_range];
    let array_var = array_var_re
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractError::PatternNotFound {
            stage: "throttling array variable",
            detail: "no `for (i = 0; ...; arr.length)` loop found".into(),
        })?;

    let array = find_throttling_array(js, &array_var)?;
    let plan = find_throttling_plan(js, &func_name)?;
    Ok(ThrottlingProgram { array, plan })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JS: &str = r#"
        var c=[Nc,"",2,c,function(a,b){a.push(b)},function(a){a.reverse()},b];
        Mt=function(a){a=a.split("");for(b=0;b<c.length;b++)c[4](a,c[1]);return a.join("")};
    "#;

    #[test]
    fn finds_throttling_function_name() {
        assert_eq!(find_throttling_function_name(SAMPLE_JS), Some("Mt".to_string()));
    }

    #[test]
    fn parses_array_elements() {
        let elements = find_throttling_array(SAMPLE_JS, "c").unwrap();
        assert_eq!(elements.len(), 7);
        assert_eq!(elements[1], ArrayElement::Str(String::new()));
        assert_eq!(elements[2], ArrayElement::Integer(2));
        assert_eq!(elements[3], ArrayElement::NullSelf);
        assert_eq!(elements[4], ArrayElement::Primitive(ThrottlePrimitive::Push));
        assert_eq!(elements[6], ArrayElement::Placeholder);
    }

    #[test]
    fn parses_unary_step() {
        let plan = find_throttling_plan(SAMPLE_JS, "Mt").unwrap();
        assert_eq!(plan, vec![ThrottleStep::Unary { func_idx: 4, operand_idx: 1 }]);
    }

    #[test]
    fn parses_binary_step() {
        let body_js = "Mt=function(a){a=a.split(\"\");c[5](a,c[1],c[2]);return a.join(\"\")};";
        let plan = find_throttling_plan(body_js, "Mt").unwrap();
        assert_eq!(
            plan,
            vec![ThrottleStep::Binary { func_idx: 5, operand_idx: 1, extra_idx: 2 }]
        );
    }

    #[test]
    fn full_pipeline_extracts_program() {
        let program = extract_throttling_program(SAMPLE_JS).unwrap();
        assert_eq!(program.array.len(), 7);
        assert_eq!(program.plan.len(), 1);
    }

    #[test]
    fn missing_throttling_function_yields_empty_program() {
        let program = extract_throttling_program("var x = 1;").unwrap();
        assert!(program.array.is_empty());
        assert!(program.plan.is_empty());
    }

    #[test]
    fn nested_array_element_parses_recursively() {
        let element = parse_array_element("[1,2,3]", "c");
        assert_eq!(
            element,
            ArrayElement::Nested(vec![
                ArrayElement::Integer(1),
                ArrayElement::Integer(2),
                ArrayElement::Integer(3),
            ])
        );
    }

    #[test]
    fn find_throttling_array_reports_pattern_not_found_on_malformed_script() {
        let err = find_throttling_array("Mt=function(a){return a};", "c").unwrap_err();
        assert!(matches!(err, ExtractError::PatternNotFound { stage: "throttling array", .. }));
    }

    #[test]
    fn find_throttling_plan_reports_pattern_not_found_when_function_missing() {
        let err = find_throttling_plan("var x = 1;", "Mt").unwrap_err();
        assert!(matches!(err, ExtractError::PatternNotFound { stage: "throttling plan", .. }));
    }

    #[test]
    fn extract_throttling_program_reports_pattern_not_found_without_length_loop() {
        let js = r#"Mt=function(a){a=a.split("");for(b=0;b<10;b++)c[4](a,c[1]);return a.join("")};"#;
        let err = extract_throttling_program(js).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::PatternNotFound { stage: "throttling array variable", .. }
        ));
    }
}
