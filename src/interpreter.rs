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

//! Walks an extracted [`SignatureProgram`] over a concrete input string.

use std::collections::HashMap;
use std::sync::Mutex;

use sig_extract::SignatureProgram;
use sig_scanner::{parse_call_site, CallSite};

use crate::error::CipherError;

/// Applies every step of `program`'s transform plan to `input` in order,
/// returning the deciphered signature.
///
/// `call_cache` memoizes call-site parsing by the literal call text, so a
/// plan that repeats the same call-site string across releases or across
/// plan steps only parses it once.
pub fn run_signature_plan(
    program: &SignatureProgram,
    input: &str,
    call_cache: &Mutex<HashMap<String, CallSite>>,
) -> Result<String, CipherError> {
    let mut buf: Vec<char> = input.chars().collect();

    for (step, call) in program.plan.iter().enumerate() {
        let site = match call_cache.lock().unwrap().get(call) {
            Some(cached) => cached.clone(),
            None => {
                let site = parse_call_site(call).ok_or_else(|| CipherError::MalformedCallSite(call.clone()))?;
                call_cache.lock().unwrap().insert(call.clone(), site.clone());
                site
            }
        };
        if site.name.contains('[') {
            return Err(CipherError::MalformedCallSite(format!(
                "call site `{call}` still references an unresolved indirection `{}`",
                site.name
            )));
        }
        let primitive = program
            .map
            .get(&site.name)
            .ok_or_else(|| CipherError::UnknownPrimitive(site.name.clone()))?;
        log::debug!("signature step {step}: {} (arg={})", site.name, site.arg);
        primitive.apply(&mut buf, site.arg);
    }

    Ok(buf.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sig_primitives::SigPrimitive;

    fn empty_cache() -> Mutex<HashMap<String, CallSite>> {
        Mutex::new(HashMap::new())
    }

    #[test]
    fn runs_plan_matching_concrete_scenario() {
        let mut map = HashMap::new();
        map.insert("kT".to_string(), SigPrimitive::Swap);
        map.insert("AJ".to_string(), SigPrimitive::Reverse);
        map.insert("VR".to_string(), SigPrimitive::Splice);
        let program = SignatureProgram {
            plan: vec!["DE.kT(a,2)".to_string(), "DE.AJ(a,0)".to_string(), "DE.VR(a,1)".to_string()],
            map,
        };
        let result = run_signature_plan(&program, "ABCDEF", &empty_cache()).unwrap();
        assert_eq!(result, "EDABC");
    }

    #[test]
    fn unknown_primitive_errors() {
        let program = SignatureProgram {
            plan: vec!["DE.zz(a,1)".to_string()],
            map: HashMap::new(),
        };
        assert!(matches!(
            run_signature_plan(&program, "abc", &empty_cache()),
            Err(CipherError::UnknownPrimitive(name)) if name == "zz"
        ));
    }

    #[test]
    fn unresolved_indirection_errors() {
        let program = SignatureProgram {
            plan: vec!["DE[G[1]](a,1)".to_string()],
            map: HashMap::new(),
        };
        assert!(matches!(
            run_signature_plan(&program, "abc", &empty_cache()),
            Err(CipherError::MalformedCallSite(_))
        ));
    }

    #[test]
    fn repeated_call_site_is_parsed_once() {
        let mut map = HashMap::new();
        map.insert("AJ".to_string(), SigPrimitive::Reverse);
        let program = SignatureProgram {
            plan: vec!["DE.AJ(a,0)".to_string(), "DE.AJ(a,0)".to_string()],
            map,
        };
        let cache = empty_cache();
        let result = run_signature_plan(&program, "abc", &cache).unwrap();
        assert_eq!(result, "abc");
        assert_eq!(cache.lock().unwrap().len(), 1);
    }
}
