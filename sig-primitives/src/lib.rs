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

//! Semantic operations the descrambling program is built from, plus the
//! shape matcher that recognizes them inside obfuscated function bodies.
//!
//! Primitives are modeled as plain enums rather than boxed closures: the
//! obfuscated script renames every primitive on each release, but the
//! *shape* of each primitive's body is stable, so classification happens
//! once (by regex fingerprint, see [`match_sig_primitive`] and
//! [`match_throttle_primitive`]) and dispatch afterwards is a `match`.

#![deny(missing_docs)]

use once_cell::sync::Lazy;
use regex::Regex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A signature-transform primitive, identified by the shape of its body.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SigPrimitive {
    /// `function(a){a.reverse()}`
    Reverse,
    /// `function(a,b){a.splice(0,b)}`
    Splice,
    /// `function(a,b){var c=a[0];a[0]=a[b%a.length];a[b]=c}`
    Swap,
}

impl SigPrimitive {
    /// Applies this primitive to `buf` with integer operand `arg`.
    ///
    /// `arg` is accepted but ignored by [`SigPrimitive::Reverse`], matching
    /// the obfuscated script where every transform call carries two
    /// arguments regardless of whether the primitive uses the second one.
    pub fn apply(self, buf: &mut Vec<char>, arg: i64) {
        match self {
            SigPrimitive::Reverse => buf.reverse(),
            SigPrimitive::Splice => {
                let k = arg.max(0) as usize;
                let k = k.min(buf.len());
                buf.drain(0..k);
            }
            SigPrimitive::Swap => {
                if buf.is_empty() {
                    return;
                }
                let r = arg.rem_euclid(buf.len() as i64) as usize;
                buf.swap(0, r);
            }
        }
    }
}

/// A throttling-VM primitive, identified by the shape of its body.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ThrottlePrimitive {
    /// `function(d,e){d.push(e)}`
    Push,
    /// `function(d,e){for(e=(e%d.length+d.length)%d.length;e--;)d.unshift(d.pop())}`
    UnshiftRotate,
    /// `function(d,e){e=(e%d.length+d.length)%d.length;d.splice(-e).reverse().forEach(function(f){d.unshift(f)})}`
    PrependRotate,
    /// `function(d,e){var f=d[0];e=(e%d.length+d.length)%d.length;d[0]=d[e];d[e]=f}`
    SwapZeroK,
    /// `function(d,e){e=(e%d.length+d.length)%d.length;d.splice(0,1,d.splice(e,1,d[0])[0])}`
    NestedSplice,
    /// Substitution cipher over the 64-character alphabet.
    CipherSubstitute,
    /// General `Array.prototype.splice` emulation: `function(d,e){...d.splice(e,1)}`
    JsSplice,
}

const CIPHER_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

impl ThrottlePrimitive {
    /// Applies a unary throttling primitive to `d` with an integer operand
    /// `e` (the decoded form of whatever array entry the throttling plan
    /// pointed at).
    ///
    /// [`ThrottlePrimitive::CipherSubstitute`] takes a string operand
    /// instead — call [`ThrottlePrimitive::cipher_substitute`] directly for
    /// that shape; the VM dispatches on the resolved operand's own type to
    /// pick between the two entry points.
    pub fn apply_unary(self, d: &mut Vec<char>, e: i64) {
        match self {
            ThrottlePrimitive::Push => d.push(char::from_u32(e as u32).unwrap_or('\0')),
            ThrottlePrimitive::UnshiftRotate | ThrottlePrimitive::PrependRotate => {
                rotate_right(d, e)
            }
            ThrottlePrimitive::SwapZeroK | ThrottlePrimitive::NestedSplice => swap_zero_k(d, e),
            // function(d,e){...d.splice(e,1)} — start=e, delete one, insert nothing.
            ThrottlePrimitive::JsSplice => {
                Self::js_splice(d, e, Some(1), &[]);
            }
            ThrottlePrimitive::CipherSubstitute => {
                log::warn!("cipher-substitute invoked via apply_unary; ignoring");
            }
        }
    }

    /// `cipher-substitute(str)`: see module docs on [`SigPrimitive`] for the
    /// signature-side sibling; this is the throttling-side substitution
    /// cipher over the 64-character alphabet.
    pub fn cipher_substitute(d: &mut Vec<char>, operand: &str) {
        let alphabet: Vec<char> = CIPHER_ALPHABET.chars().collect();
        let index_of = |c: char| alphabet.iter().position(|&a| a == c).unwrap_or(0) as i64;

        let mut this: Vec<char> = operand.chars().collect();
        let mut f: i64 = 96;
        let copied = d.clone();

        for (m, &l) in copied.iter().enumerate() {
            let this_m = *this.get(m).unwrap_or(&'\0');
            let idx = (index_of(l) - index_of(this_m) + m as i64 - 32 + f)
                .rem_euclid(alphabet.len() as i64) as usize;
            let replaced = alphabet[idx];
            this.push(replaced);
            d[m] = replaced;
            f -= 1;
        }
    }

    /// `js-splice(start, delete_count, items)`: faithful emulation of the
    /// script language's `Array.prototype.splice`. Returns the removed
    /// elements, mutating `d` in place.
    ///
    /// The negative-`start` branch intentionally mirrors the obfuscated
    /// script's own formula (`start = len - start`) rather than the
    /// corrected `max(0, len + start)` from the language specification —
    /// see the crate-level design notes on why the observable behavior is
    /// preserved.
    pub fn js_splice(d: &mut Vec<char>, start: i64, delete_count: Option<i64>, items: &[char]) -> Vec<char> {
        let len = d.len() as i64;
        let mut start = start;
        if start > len {
            start = len;
        }
        if start < 0 {
            start = len - start;
        }
        let start = start.clamp(0, len) as usize;

        let delete_count = match delete_count {
            Some(dc) if dc >= 0 && (dc as usize) < d.len().saturating_sub(start) => dc as usize,
            _ => d.len() - start,
        };

        let removed: Vec<char> = d.splice(start..start + delete_count, items.iter().copied()).collect();
        removed
    }
}

fn throttle_mod(len: usize, e: i64) -> usize {
    if len == 0 {
        return 0;
    }
    e.rem_euclid(len as i64) as usize
}

fn rotate_right(d: &mut Vec<char>, e: i64) {
    let k = throttle_mod(d.len(), e);
    if k == 0 || d.is_empty() {
        return;
    }
    d.rotate_right(k);
}

fn swap_zero_k(d: &mut [char], e: i64) {
    if d.is_empty() {
        return;
    }
    let k = throttle_mod(d.len(), e);
    d.swap(0, k);
}

/// Ordered list of `(fingerprint, primitive)` pairs for signature primitives.
/// The first match wins; a final permissive fallback (see
/// [`match_sig_primitive`]) classifies anything unrecognized as `Reverse`.
static SIG_SHAPES: Lazy<Vec<(Regex, SigPrimitive)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^\{\w\.reverse\(\)\}$").unwrap(), SigPrimitive::Reverse),
        (
            Regex::new(r"function\s*\([^)]*\)\s*\{\s*\w+\.reverse\(\)\s*\}").unwrap(),
            SigPrimitive::Reverse,
        ),
        (Regex::new(r"\{\s*\w+\.reverse\(\)\s*\}").unwrap(), SigPrimitive::Reverse),
        (Regex::new(r"^\{\w\.splice\(0,\w\)\}$").unwrap(), SigPrimitive::Splice),
        (
            Regex::new(r"\{\s*\w+\.splice\(0,\s*\w+\)\s*\}").unwrap(),
            SigPrimitive::Splice,
        ),
        (
            Regex::new(r"^\{var\s\w=\w\[0\];\w\[0\]=\w\[\w%\w\.length\];\w\[\w\]=\w\}$").unwrap(),
            SigPrimitive::Swap,
        ),
        (
            Regex::new(r"^\{var\s\w=\w\[0\];\w\[0\]=\w\[\w%\w\.length\];\w\[\w%\w\.length\]=\w\}$")
                .unwrap(),
            SigPrimitive::Swap,
        ),
        (
            Regex::new(r"\{\s*var\s+\w+\s*=\s*\w+\[0\];\s*\w+\[0\]\s*=\s*\w+\[\w+\s*%\s*\w+\.length\];\s*\w+\[\w+\]\s*=\s*\w+\s*\}")
                .unwrap(),
            SigPrimitive::Swap,
        ),
    ]
});

/// Classifies the body of a signature-transform primitive by regex
/// fingerprint. Unrecognized bodies fall back to [`SigPrimitive::Reverse`]
/// rather than failing — a deliberate robustness choice: a wrong signature
/// is something the caller can detect (the media fetch fails) and retry
/// with a different client profile, but an extraction abort loses the
/// whole script release.
pub fn match_sig_primitive(body: &str) -> SigPrimitive {
    for (re, prim) in SIG_SHAPES.iter() {
        if re.is_match(body) {
            return *prim;
        }
    }
    log::warn!("primitive body did not match any known shape, defaulting to reverse: {body}");
    SigPrimitive::Reverse
}

/// Ordered list of `(fingerprint, primitive)` pairs for throttling
/// primitives. Unlike [`match_sig_primitive`], there is no permissive
/// fallback: a throttling array entry that matches nothing is kept as a
/// raw string by the extractor instead of being misclassified.
static THROTTLE_SHAPES: Lazy<Vec<(Regex, ThrottlePrimitive)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"for\(\w=\(\w%\w\.length\+\w\.length\)%\w\.length;\w--;\)\w\.unshift\(\w\.pop\(\)\)")
                .unwrap(),
            ThrottlePrimitive::UnshiftRotate,
        ),
        (
            Regex::new(r"for\(var \w=\w\.length;\w;\)\w\.push\(\w\.splice\(--\w,1\)\[0\]\)")
                .unwrap(),
            ThrottlePrimitive::UnshiftRotate,
        ),
        (Regex::new(r"\{\w\.push\(\w\)\}").unwrap(), ThrottlePrimitive::Push),
        (
            Regex::new(r";var\s\w=\w\[0\];\w\[0\]=\w\[\w\];\w\[\w\]=\w\}").unwrap(),
            ThrottlePrimitive::SwapZeroK,
        ),
        (
            Regex::new(r"\w\.splice\(0,1,\w\.splice\(\w,1,\w\[0\]\)\[0\]\)").unwrap(),
            ThrottlePrimitive::NestedSplice,
        ),
        (
            Regex::new(r"\w\.splice\(-\w\)\.reverse\(\)\.forEach\(function\(\w\)\{\w\.unshift\(\w\)\}\)")
                .unwrap(),
            ThrottlePrimitive::PrependRotate,
        ),
        (Regex::new(r"case\s\d+").unwrap(), ThrottlePrimitive::CipherSubstitute),
        (Regex::new(r";\w\.splice\(\w,1\)\}").unwrap(), ThrottlePrimitive::JsSplice),
    ]
});

/// Classifies the body of a throttling-array function entry by regex
/// fingerprint, or returns `None` if no shape matches — the extractor
/// preserves such an entry as a raw string rather than a primitive.
pub fn match_throttle_primitive(body: &str) -> Option<ThrottlePrimitive> {
    THROTTLE_SHAPES
        .iter()
        .find(|(re, _)| re.is_match(body))
        .map(|(_, prim)| *prim)
}
