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

//! The public entry point: extracts both programs once per script blob
//! and answers repeated deciphering/throttling queries against them.

use std::collections::HashMap;
use std::sync::Mutex;

use sig_extract::{extract_signature_program, extract_throttling_program, SignatureProgram, ThrottlingProgram};
use sig_scanner::CallSite;

use crate::error::CipherError;
use crate::interpreter::run_signature_plan;
use crate::throttle_vm::run_throttling_plan;

/// Extracts the signature and throttling programs from a script blob
/// once, then answers `decipher_signature`/`compute_throttling` calls
/// against them.
///
/// Cheap to call repeatedly: deciphered signatures are memoized per
/// distinct input and call-site parses are memoized by their literal
/// text, so a client revalidating the same signature twice only runs
/// the plan once. The throttling result, like the original
/// implementation's `calculated_n` singleton, is memoized once for the
/// lifetime of the `Facade` regardless of input: every later
/// `compute_throttling` call returns that first result verbatim.
/// `Facade` is `Sync`, so a single instance can be shared across worker
/// threads serving the same script release.
pub struct Facade {
    signature: SignatureProgram,
    throttling: ThrottlingProgram,
    signature_cache: Mutex<HashMap<String, String>>,
    throttling_result: Mutex<Option<String>>,
    call_cache: Mutex<HashMap<String, CallSite>>,
}

impl Facade {
    /// Extracts both programs from `js`, a complete script blob.
    pub fn new(js: &str) -> Result<Facade, CipherError> {
        let signature = extract_signature_program(js)?;
        let throttling = extract_throttling_program(js)?;
        Ok(Facade {
            signature,
            throttling,
            signature_cache: Mutex::new(HashMap::new()),
            throttling_result: Mutex::new(None),
            call_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Deciphers `signature` using the extracted transform plan.
    pub fn decipher_signature(&self, signature: &str) -> Result<String, CipherError> {
        if let Some(cached) = self.signature_cache.lock().unwrap().get(signature) {
            return Ok(cached.clone());
        }
        let result = run_signature_plan(&self.signature, signature, &self.call_cache)?;
        self.signature_cache
            .lock()
            .unwrap()
            .insert(signature.to_string(), result.clone());
        Ok(result)
    }

    /// Computes the throttling-resistant form of `input` using the
    /// extracted throttling plan.
    ///
    /// Memoized as a single slot, not per input: once computed, every
    /// later call returns that first result regardless of the `input`
    /// passed in, matching the source's own singleton memo.
    pub fn compute_throttling(&self, input: &[char]) -> Result<String, CipherError> {
        if let Some(cached) = self.throttling_result.lock().unwrap().as_ref() {
            return Ok(cached.clone());
        }
        let input: String = input.iter().collect();
        let result = run_throttling_plan(&self.throttling, &input)?;
        *self.throttling_result.lock().unwrap() = Some(result.clone());
        Ok(result)
    }
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
        xK=function(a){a=a.split("");DE.kT(a,2);DE.AJ(a,0);DE.VR(a,1);return a.join("")};
    "#;

    #[test]
    fn facade_extracts_and_deciphers() {
        let facade = Facade::new(SAMPLE_JS).unwrap();
        let result = facade.decipher_signature("ABCDEF").unwrap();
        assert_eq!(result, "EDABC");
    }

    #[test]
    fn facade_caches_repeated_signature_calls() {
        let facade = Facade::new(SAMPLE_JS).unwrap();
        let first = facade.decipher_signature("ABCDEF").unwrap();
        let second = facade.decipher_signature("ABCDEF").unwrap();
        assert_eq!(first, second);
        assert_eq!(facade.signature_cache.lock().unwrap().len(), 1);
    }

    #[test]
    fn facade_throttling_is_identity_when_absent() {
        let facade = Facade::new(SAMPLE_JS).unwrap();
        let digits: Vec<char> = "12345".chars().collect();
        assert_eq!(facade.compute_throttling(&digits).unwrap(), "12345");
    }

    #[test]
    fn facade_throttling_memoizes_a_single_result_regardless_of_input() {
        let facade = Facade::new(SAMPLE_JS).unwrap();
        let first: Vec<char> = "12345".chars().collect();
        let second: Vec<char> = "67890".chars().collect();
        let first_result = facade.compute_throttling(&first).unwrap();
        let second_result = facade.compute_throttling(&second).unwrap();
        assert_eq!(first_result, "12345");
        assert_eq!(second_result, first_result);
    }

    #[test]
    fn facade_new_surfaces_pattern_not_found_on_malformed_script() {
        let err = Facade::new("var x = 1;").unwrap_err();
        assert!(matches!(
            err,
            CipherError::Extract(sig_extract::ExtractError::PatternNotFound { .. })
        ));
    }
}
