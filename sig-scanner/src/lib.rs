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

//! Regex-and-brace-balance utilities over minified script sources.
//!
//! These are intentionally dumb: no string-literal or comment awareness,
//! just depth counting. That is acceptable because the inputs this crate
//! is aimed at are minified, whitespace-poor, and never carry braces
//! inside the strings this crate's callers care about.

#![deny(missing_docs)]

use once_cell::sync::Lazy;
use regex::Regex;

/// The three call-site shapes a transform call can take:
/// `Var.name(a,N)`, `Var["name"](a,N)`, `Var[Arr[k]](a,N)`.
static CALL_SHAPES: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"^\w+\.(\w+)\(\w,(-?\d+)\)").unwrap(),
        Regex::new(r#"^\w+\["(\w+)"\]\(\w,(-?\d+)\)"#).unwrap(),
        Regex::new(r"^\w+\[(\w+\[\d+\])\]\(\w,(-?\d+)\)").unwrap(),
    ]
});

/// A parsed call site: the primitive name (or, for array-indirected calls,
/// the unresolved `Arr[k]` token) and its integer argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// The primitive name, or an unresolved indirection token.
    pub name: String,
    /// The integer argument at the call site.
    pub arg: i64,
}

/// Parses a single call-site string (e.g. `"DE.AJ(a,15)"`) into a
/// [`CallSite`], trying each of the three known call shapes in order.
pub fn parse_call_site(text: &str) -> Option<CallSite> {
    for re in CALL_SHAPES.iter() {
        if let Some(caps) = re.captures(text) {
            let name = caps.get(1)?.as_str().to_string();
            let arg = caps.get(2)?.as_str().parse().ok()?;
            return Some(CallSite { name, arg });
        }
    }
    None
}

/// Finds the balanced `{...}` body starting at or after `from`, returning
/// the byte range of the content strictly inside the outermost braces
/// (excluding the braces themselves).
///
/// Scans forward from `from` for the first `{`, then tracks brace depth
/// until it returns to zero. Returns `None` if no opening brace is found
/// or the braces never balance.
pub fn balanced_brace_body(src: &str, from: usize) -> Option<std::ops::Range<usize>> {
    let bytes = src.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i] != b'{' {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    let body_start = i + 1;
    let mut depth = 1usize;
    let mut j = body_start;
    while j < bytes.len() {
        match bytes[j] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(body_start..j);
                }
            }
            _ => {}
        }
        j += 1;
    }
    None
}

/// Finds the balanced `[...]` body starting at or after `from`, analogous
/// to [`balanced_brace_body`] but for square brackets.
pub fn balanced_bracket_body(src: &str, from: usize) -> Option<std::ops::Range<usize>> {
    let bytes = src.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i] != b'[' {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    let body_start = i + 1;
    let mut depth = 1usize;
    let mut j = body_start;
    while j < bytes.len() {
        match bytes[j] {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(body_start..j);
                }
            }
            _ => {}
        }
        j += 1;
    }
    None
}

/// Splits `content` on `,` only where the running depth of `{` and `[` is
/// zero, trimming whitespace from each resulting item and dropping empty
/// items.
pub fn split_comma_depth0(content: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();

    for ch in content.chars() {
        match ch {
            '{' | '[' => {
                depth += 1;
                current.push(ch);
            }
            '}' | ']' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    items.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        items.push(trimmed.to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dot_call_shape() {
        let call = parse_call_site("DE.AJ(a,15)").unwrap();
        assert_eq!(call.name, "AJ");
        assert_eq!(call.arg, 15);
    }

    #[test]
    fn parses_bracket_string_call_shape() {
        let call = parse_call_site(r#"A1["VR"](a,3)"#).unwrap();
        assert_eq!(call.name, "VR");
        assert_eq!(call.arg, 3);
    }

    #[test]
    fn parses_array_indirected_call_shape() {
        let call = parse_call_site("A1[G[4]](p,28)").unwrap();
        assert_eq!(call.name, "G[4]");
        assert_eq!(call.arg, 28);
    }

    #[test]
    fn unparseable_call_is_none() {
        assert!(parse_call_site("not a call at all").is_none());
    }

    #[test]
    fn finds_balanced_brace_body() {
        let src = "foo=function(a){a.reverse();return a}bar";
        let range = balanced_brace_body(src, 0).unwrap();
        assert_eq!(&src[range], "a.reverse();return a");
    }

    #[test]
    fn balanced_brace_body_handles_nesting() {
        let src = "{outer{inner}tail}";
        let range = balanced_brace_body(src, 0).unwrap();
        assert_eq!(&src[range], "outer{inner}tail");
    }

    #[test]
    fn finds_balanced_bracket_body() {
        let src = r#"G=["xx","yy","zz"];"#;
        let range = balanced_bracket_body(src, 0).unwrap();
        assert_eq!(&src[range], r#""xx","yy","zz""#);
    }

    #[test]
    fn splits_comma_list_respecting_depth() {
        let items = split_comma_depth0("AJ:function(a){a.reverse()}, VR:function(a,b){a.splice(0,b)}");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], "AJ:function(a){a.reverse()}");
        assert_eq!(items[1], "VR:function(a,b){a.splice(0,b)}");
    }

    #[test]
    fn splits_comma_list_ignoring_nested_commas() {
        let items = split_comma_depth0(r#""xx,yy",[1,2,3],"zz""#);
        // nested commas inside quotes are not brace/bracket-protected by design;
        // only {} and [] depth is tracked, matching the scanner's documented scope.
        assert_eq!(items, vec!["\"xx", "yy\"", "[1,2,3]", "\"zz\""]);
    }
}
