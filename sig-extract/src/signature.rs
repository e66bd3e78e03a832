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

//! Locates the initial function, transform plan, and transform object
//! inside a script blob, and resolves array-indirected calls.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use sig_primitives::{match_sig_primitive, SigPrimitive};
use sig_scanner::{balanced_brace_body, balanced_bracket_body, parse_call_site, split_comma_depth0};

use crate::error::ExtractError;

/// The fully extracted signature descrambling program: an ordered
/// sequence of raw call-site strings and the map from primitive name to
/// semantics they call into.
#[derive(Debug, Clone)]
pub struct SignatureProgram {
    /// The ordered transform plan (raw call-site text, already resolved
    /// past any array indirection).
    pub plan: Vec<String>,
    /// The obfuscated-name-to-primitive lookup.
    pub map: HashMap<String, SigPrimitive>,
}

/// Script-language builtins that must never be mistaken for the initial
/// function name.
static JS_BUILTINS: Lazy<std::collections::HashSet<&'static str>> = Lazy::new(|| {
    [
        "decodeURIComponent",
        "encodeURIComponent",
        "decodeURI",
        "encodeURI",
        "escape",
        "unescape",
        "parseInt",
        "parseFloat",
        "isNaN",
        "isFinite",
        "eval",
        "Function",
        "Object",
        "Array",
        "String",
        "Number",
        "Boolean",
        "Date",
        "Math",
        "JSON",
        "RegExp",
        "Error",
        "Promise",
        "Map",
        "Set",
        "console",
        "window",
        "document",
        "undefined",
        "null",
        "true",
        "false",
        "NaN",
        "Infinity",
        "this",
        "arguments",
        "prototype",
        "constructor",
        "toString",
        "valueOf",
        "hasOwnProperty",
        "length",
        "split",
        "join",
        "reverse",
        "splice",
        "slice",
        "concat",
        "push",
        "pop",
        "shift",
        "unshift",
    ]
    .into_iter()
    .collect()
});

static INITIAL_FUNCTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?:^|[;\s])([a-zA-Z0-9_$]{2,})\s*=\s*function\s*\(\s*a\s*\)\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)"#).unwrap(),
        Regex::new(r#"var\s+([a-zA-Z0-9_$]{2,})\s*=\s*function\s*\(\s*a\s*\)\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)"#).unwrap(),
        Regex::new(r#"(?:^|[;\s])([a-zA-Z0-9_$]{2,})\s*=\s*a\s*=>\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)"#).unwrap(),
        Regex::new(r#"(?:^|[;\s])([a-zA-Z0-9_$]{2,})\s*=\s*function\s*\(\s*\w\s*\)\s*\{\s*\w\s*=\s*\w\.split\s*\(\s*""\s*\)"#).unwrap(),
        Regex::new(r#"\b[cs]\s*&&\s*[adf]\.set\([^,]+,\s*encodeURIComponent\(\s*([a-zA-Z0-9_$]{2,})\("#).unwrap(),
        Regex::new(r#"\bm\s*=\s*([a-zA-Z0-9_$]{2,})\(\s*decodeURIComponent\("#).unwrap(),
        Regex::new(r#"\b[a-zA-Z0-9_$]+\s*&&\s*\([a-zA-Z0-9_$]+\s*=\s*([a-zA-Z0-9_$]{2,})\(\s*decodeURIComponent\("#).unwrap(),
        Regex::new(r#"["']signature["']\s*,\s*([a-zA-Z0-9_$]{2,})\("#).unwrap(),
        Regex::new(r#"\.sig\s*\|\|\s*([a-zA-Z0-9_$]{2,})\("#).unwrap(),
    ]
});

/// Finds the name of the function responsible for computing the
/// signature, rejecting matches that turn out to be script-language
/// builtins.
pub fn find_initial_function_name(js: &str) -> Result<String, ExtractError> {
    for re in INITIAL_FUNCTION_PATTERNS.iter() {
        if let Some(caps) = re.captures(js) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str();
                if !JS_BUILTINS.contains(name) {
                    log::debug!("found initial function name: {name}");
                    return Ok(name.to_string());
                }
                log::debug!("pattern matched builtin {name}, trying next pattern");
            }
        }
    }
    Err(ExtractError::PatternNotFound {
        stage: "initial function name",
        detail: "no candidate pattern yielded a non-builtin identifier".into(),
    })
}

fn function_definition_offset(js: &str, name: &str) -> Option<usize> {
    let escaped = regex::escape(name);
    let function_form = Regex::new(&format!(r"{escaped}\s*=\s*function\s*\([^)]*\)\s*\{{")).ok()?;
    if let Some(m) = function_form.find(js) {
        return Some(m.end() - 1);
    }
    let arrow_form = Regex::new(&format!(r"{escaped}\s*=\s*\w+\s*=>\s*\{{")).ok()?;
    arrow_form.find(js).map(|m| m.end() - 1)
}

/// Extracts the ordered transform plan: the sequence of primitive calls
/// encoded in the initial function's body, between the initial
/// `a = a.split("...")` and the trailing `return a.join(...)`.
pub fn find_transform_plan(js: &str, name: &str) -> Result<Vec<String>, ExtractError> {
    let brace_offset = function_definition_offset(js, name).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "transform plan",
        detail: format!("no function definition found for {name}"),
    })?;

    let body_range = balanced_brace_body(js, brace_offset).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "transform plan",
        detail: "function body braces did not balance".into(),
    })?;
    let body = &js[body_range];

    let split_marker = body.find(".split(").ok_or_else(|| ExtractError::PatternNotFound {
        stage: "transform plan",
        detail: "no a.split(...) statement found in function body".into(),
    })?;
    let after_split = body[split_marker..]
        .find(';')
        .map(|rel| split_marker + rel + 1)
        .ok_or_else(|| ExtractError::PatternNotFound {
            stage: "transform plan",
            detail: "split statement missing trailing semicolon".into(),
        })?;

    let return_marker = body[after_split..].find("return").map(|rel| after_split + rel);

    let plan_region = match return_marker {
        Some(pos) => &body[after_split..pos],
        None => &body[after_split..],
    };

    let plan: Vec<String> = plan_region
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty() && (item.contains('.') || item.contains('[')) && item.contains('('))
        .map(str::to_string)
        .collect();

    if plan.is_empty() {
        return Err(ExtractError::PatternNotFound {
            stage: "transform plan",
            detail: "no call-shaped statements found between split and return".into(),
        });
    }

    Ok(plan)
}

/// Extracts the identifier of the object holding the transform
/// primitives, from the first plan item (falling back to later items if
/// the first resolves to `this`, and finally to a `var X={...function`
/// scan of the whole script).
pub fn find_object_var(js: &str, plan: &[String]) -> Result<String, ExtractError> {
    static VAR_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([a-zA-Z_$][a-zA-Z0-9_$]*)\.").unwrap());
    static VAR_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([a-zA-Z_$][a-zA-Z0-9_$]*)\[").unwrap());

    for item in plan {
        let var = VAR_DOT
            .captures(item)
            .or_else(|| VAR_BRACKET.captures(item))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        if let Some(var) = var {
            if var != "this" {
                return Ok(var.to_string());
            }
        }
    }

    static OBJECT_LITERAL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"var\s+([a-zA-Z_$][a-zA-Z0-9_$]*)\s*=\s*\{[^}]*:\s*function").unwrap());
    OBJECT_LITERAL
        .captures(js)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractError::PatternNotFound {
            stage: "transform object variable",
            detail: "plan only referenced `this` and no object literal fallback was found".into(),
        })
}

static ARRAY_INDIRECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\[(\w+)\[(\d+)\]\]\(").unwrap());

/// If the first plan item has shape `Obj[Arr[k]](...)`, resolves the
/// indirection by locating the `Arr=[...]` literal and rewriting every
/// plan item to the direct `Obj.<name>(...)` form. Returns the plan
/// unchanged (and `None` for the variable) if the first item isn't
/// array-indirected.
///
/// When the `Arr` literal can't be found, falls back to routing every
/// indirected call through the first function name found in `Obj`'s
/// object literal — a heuristic that is wrong whenever more than one
/// distinct primitive is indirected (see crate-level design notes).
pub fn resolve_array_indirection(js: &str, plan: &[String]) -> (Vec<String>, Option<String>) {
    let Some(first) = plan.first() else {
        return (plan.to_vec(), None);
    };
    let Some(caps) = ARRAY_INDIRECTION.captures(first) else {
        return (plan.to_vec(), None);
    };
    let obj_var = caps[1].to_string();
    let array_var = caps[2].to_string();

    let array_items = find_array_literal(js, &array_var);

    let resolved = match array_items {
        Some(items) => resolve_with_array(plan, &obj_var, &array_var, &items),
        None => {
            log::warn!(
                "array literal {array_var} not found; falling back to first function in {obj_var} for all indirected calls"
            );
            resolve_with_object_fallback(js, plan, &obj_var)
        }
    };

    (resolved, Some(obj_var))
}

fn find_array_literal(js: &str, array_var: &str) -> Option<Vec<String>> {
    let escaped = regex::escape(array_var);
    let re = Regex::new(&format!(r"{escaped}\s*=\s*\[")).ok()?;
    let m = re.find(js)?;
    let range = balanced_bracket_body(js, m.start())?;
    let items = split_comma_depth0(&js[range])
        .into_iter()
        .map(|item| item.trim_matches(|c| c == '"' || c == '\'').to_string())
        .collect();
    Some(items)
}

fn resolve_with_array(plan: &[String], obj_var: &str, array_var: &str, items: &[String]) -> Vec<String> {
    plan.iter()
        .map(|item| {
            let Some(caps) = ARRAY_INDIRECTION.captures(item) else {
                return item.clone();
            };
            let index: usize = match caps[3].parse() {
                Ok(i) => i,
                Err(_) => return item.clone(),
            };
            match items.get(index) {
                Some(name) => {
                    let prefix = format!("{obj_var}[{array_var}[{index}]]");
                    item.replacen(&prefix, &format!("{obj_var}.{name}"), 1)
                }
                None => {
                    log::warn!("array index {index} out of bounds for {array_var}");
                    item.clone()
                }
            }
        })
        .collect()
}

fn resolve_with_object_fallback(js: &str, plan: &[String], obj_var: &str) -> Vec<String> {
    let escaped = regex::escape(obj_var);
    let obj_re = match Regex::new(&format!(r"(?:var\s+)?{escaped}\s*=\s*\{{")) {
        Ok(re) => re,
        Err(_) => return plan.to_vec(),
    };
    let Some(m) = obj_re.find(js) else {
        return plan.to_vec();
    };
    let Some(range) = balanced_brace_body(js, m.start()) else {
        return plan.to_vec();
    };
    let func_name_re = Regex::new(r"(\w+)\s*:\s*function").unwrap();
    let Some(first_fn) = func_name_re.captures(&js[range]).and_then(|c| c.get(1)) else {
        return plan.to_vec();
    };
    let first_fn = first_fn.as_str();

    plan.iter()
        .map(|item| {
            if ARRAY_INDIRECTION.is_match(item) {
                ARRAY_INDIRECTION
                    .replace(item, format!("{obj_var}.{first_fn}("))
                    .to_string()
            } else {
                item.clone()
            }
        })
        .collect()
}

/// Extracts the transform object's raw `(name, body)` entries for the
/// variable `var_name`, keeping only entries that look like function
/// definitions.
pub fn find_transform_object(js: &str, var_name: &str) -> Result<Vec<(String, String)>, ExtractError> {
    let escaped = regex::escape(var_name);
    let re = Regex::new(&format!(r"(?:var\s+)?{escaped}\s*=\s*\{{")).map_err(|e| {
        ExtractError::InvariantViolated(format!("failed to build transform object regex: {e}"))
    })?;
    let m = re.find(js).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "transform object",
        detail: format!("no object literal found for {var_name}"),
    })?;
    let range = balanced_brace_body(js, m.start()).ok_or_else(|| ExtractError::PatternNotFound {
        stage: "transform object",
        detail: "object literal braces did not balance".into(),
    })?;

    let entries = split_comma_depth0(&js[range])
        .into_iter()
        .filter(|entry| entry.contains(':') && entry.contains("function("))
        .filter_map(|entry| {
            let (name, body) = entry.split_once(':')?;
            Some((name.trim().to_string(), body.trim().to_string()))
        })
        .collect::<Vec<_>>();

    Ok(entries)
}

/// Builds the obfuscated-name-to-primitive map from the transform
/// object's raw entries, logging and skipping malformed ones.
pub fn build_transform_map(entries: &[(String, String)]) -> HashMap<String, SigPrimitive> {
    let mut map = HashMap::with_capacity(entries.len());
    for (name, body) in entries {
        if name.is_empty() || body.is_empty() {
            log::warn!("skipping malformed transform object entry: {name:?}:{body:?}");
            continue;
        }
        map.insert(name.clone(), match_sig_primitive(body));
    }
    map
}

/// Runs the full signature-extraction pipeline: locates the initial
/// function, its transform plan (resolving array indirection), the
/// transform object variable, and the transform map.
pub fn extract_signature_program(js: &str) -> Result<SignatureProgram, ExtractError> {
    let func_name = find_initial_function_name(js)?;
    let raw_plan = find_transform_plan(js, &func_name)?;
    let (plan, indirected_var) = resolve_array_indirection(js, &raw_plan);
    let object_var = match indirected_var {
        Some(var) => var,
        None => find_object_var(js, &plan)?,
    };
    let entries = find_transform_object(js, &object_var)?;
    let map = build_transform_map(&entries);

    for call in &plan {
        let name = parse_call_site(call).map(|site| site.name).unwrap_or_default();
        if !name.contains('[') && !map.contains_key(&name) {
            return Err(ExtractError::InvariantViolated(format!(
                "transform plan calls `{name}`, which is not a key of the transform map"
            )));
        }
    }

    Ok(SignatureProgram { plan, map })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JS: &str = r#"
        var DE={
            AJ:function(a){a.reverse()},
            VR:function(a,b){a.splice(0,b)},
            kT:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b]=c}
        };
        xK=function(a){a=a.split("");DE.AJ(a,15);DE.VR(a,3);DE.kT(a,51);return a.join("")};
    "#;

    #[test]
    fn finds_initial_function_name() {
        assert_eq!(find_initial_function_name(SAMPLE_JS).unwrap(), "xK");
    }

    #[test]
    fn rejects_builtins_and_keeps_scanning() {
        let js = r#"foo=decodeURIComponent(bar);xK=function(a){a=a.split("");DE.AJ(a,1);return a.join("")};"#;
        assert_eq!(find_initial_function_name(js).unwrap(), "xK");
    }

    #[test]
    fn extracts_transform_plan() {
        let plan = find_transform_plan(SAMPLE_JS, "xK").unwrap();
        assert_eq!(plan, vec!["DE.AJ(a,15)", "DE.VR(a,3)", "DE.kT(a,51)"]);
    }

    #[test]
    fn finds_object_var_from_plan() {
        let plan = vec!["DE.AJ(a,15)".to_string()];
        assert_eq!(find_object_var(SAMPLE_JS, &plan).unwrap(), "DE");
    }

    #[test]
    fn finds_object_var_falls_back_past_this() {
        let plan = vec!["this.AJ(a,15)".to_string(), "DE.VR(a,3)".to_string()];
        assert_eq!(find_object_var(SAMPLE_JS, &plan).unwrap(), "DE");
    }

    #[test]
    fn extracts_transform_object_entries() {
        let entries = find_transform_object(SAMPLE_JS, "DE").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, "AJ");
        assert!(entries[0].1.contains("reverse"));
    }

    #[test]
    fn builds_transform_map_with_shapes() {
        let entries = find_transform_object(SAMPLE_JS, "DE").unwrap();
        let map = build_transform_map(&entries);
        assert_eq!(map.get("AJ"), Some(&SigPrimitive::Reverse));
        assert_eq!(map.get("VR"), Some(&SigPrimitive::Splice));
        assert_eq!(map.get("kT"), Some(&SigPrimitive::Swap));
    }

    #[test]
    fn full_pipeline_extracts_program() {
        let program = extract_signature_program(SAMPLE_JS).unwrap();
        assert_eq!(program.plan.len(), 3);
        assert_eq!(program.map.len(), 3);
    }

    #[test]
    fn resolves_array_indirection_with_array_literal() {
        let js = r#"G=["xx","yy","zz"];"#;
        let plan = vec!["A1[G[2]](a,9)".to_string()];
        let (resolved, var) = resolve_array_indirection(js, &plan);
        assert_eq!(resolved, vec!["A1.zz(a,9)"]);
        assert_eq!(var.as_deref(), Some("A1"));
    }

    #[test]
    fn resolves_array_indirection_falls_back_without_array_literal() {
        let js = r#"var A1={zz:function(a){a.reverse()},yy:function(a,b){a.splice(0,b)}};"#;
        let plan = vec!["A1[G[2]](a,9)".to_string()];
        let (resolved, _var) = resolve_array_indirection(js, &plan);
        assert_eq!(resolved, vec!["A1.zz(a,9)"]);
    }

    #[test]
    fn non_indirected_plan_is_untouched() {
        let plan = vec!["DE.AJ(a,15)".to_string()];
        let (resolved, var) = resolve_array_indirection(SAMPLE_JS, &plan);
        assert_eq!(resolved, plan);
        assert!(var.is_none());
    }

    #[test]
    fn extract_signature_program_reports_pattern_not_found_on_malformed_script() {
        let err = extract_signature_program("var x = 1;").unwrap_err();
        assert!(matches!(
            err,
            ExtractError::PatternNotFound { stage: "initial function name", .. }
        ));
    }

    #[test]
    fn extract_signature_program_reports_invariant_violated_on_plan_map_mismatch() {
        let js = r#"
            var DE={
                AJ:function(a){a.reverse()}
            };
            xK=function(a){a=a.split("");DE.AJ(a,1);DE.zz(a,2);return a.join("")};
        "#;
        let err = extract_signature_program(js).unwrap_err();
        assert!(matches!(err, ExtractError::InvariantViolated(detail) if detail.contains("zz")));
    }
}
