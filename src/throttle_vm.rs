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

//! Executes an extracted [`ThrottlingProgram`] over a concrete input
//! string.
//!
//! The throttling array is self-referential and heterogeneous, so
//! unlike [`crate::interpreter`] this VM resolves each step's operands
//! from the array itself rather than from literal call-site arguments.

use sig_extract::{ArrayElement, ThrottleStep, ThrottlingProgram};

use crate::error::CipherError;

enum ResolvedOperand {
    Int(i64),
    Str(String),
}

/// Resolves array element `idx` to a value a primitive can consume.
///
/// The `null-self` sentinel and the literal `b` placeholder slot don't
/// carry a value of their own; both resolve to the current buffer
/// length, matching the only role either plays in the plans this crate
/// has observed (a length-derived operand, never a literal).
fn resolve_operand(array: &[ArrayElement], idx: usize, buf_len: usize) -> Result<ResolvedOperand, CipherError> {
    match array.get(idx) {
        Some(ArrayElement::Integer(n)) => Ok(ResolvedOperand::Int(*n)),
        Some(ArrayElement::Str(s)) => Ok(ResolvedOperand::Str(s.clone())),
        Some(ArrayElement::NullSelf) | Some(ArrayElement::Placeholder) => Ok(ResolvedOperand::Int(buf_len as i64)),
        Some(other) => Err(CipherError::ThrottlingInvariant(format!(
            "array index {idx} resolved to non-scalar element {other:?}"
        ))),
        None => Err(CipherError::ThrottlingInvariant(format!(
            "array index {idx} out of bounds"
        ))),
    }
}

fn resolve_primitive(array: &[ArrayElement], idx: usize) -> Result<sig_primitives::ThrottlePrimitive, CipherError> {
    match array.get(idx) {
        Some(ArrayElement::Primitive(p)) => Ok(*p),
        other => Err(CipherError::ThrottlingInvariant(format!(
            "array index {idx} is not a primitive: {other:?}"
        ))),
    }
}

/// Runs `program`'s plan over `input`, returning the transformed string.
///
/// An empty plan (the common case for media-platform revisions that
/// don't currently ship a throttling stage) is a no-op: `input` is
/// returned unchanged.
pub fn run_throttling_plan(program: &ThrottlingProgram, input: &str) -> Result<String, CipherError> {
    let mut buf: Vec<char> = input.chars().collect();

    for (step_idx, step) in program.plan.iter().enumerate() {
        match *step {
            ThrottleStep::Unary { func_idx, operand_idx } => {
                let primitive = resolve_primitive(&program.array, func_idx)?;
                match resolve_operand(&program.array, operand_idx, buf.len())? {
                    ResolvedOperand::Int(e) => {
                        log::debug!("throttling step {step_idx}: {primitive:?}(buf, {e})");
                        primitive.apply_unary(&mut buf, e);
                    }
                    ResolvedOperand::Str(s) => {
                        log::debug!("throttling step {step_idx}: cipher_substitute(buf, {s:?})");
                        sig_primitives::ThrottlePrimitive::cipher_substitute(&mut buf, &s);
                    }
                }
            }
            ThrottleStep::Binary { func_idx, operand_idx, extra_idx } => {
                let primitive = resolve_primitive(&program.array, func_idx)?;
                match resolve_operand(&program.array, operand_idx, buf.len())? {
                    ResolvedOperand::Str(s) => {
                        log::debug!("throttling step {step_idx}: cipher_substitute(buf, {s:?}) [extra_idx={extra_idx} unused]");
                        sig_primitives::ThrottlePrimitive::cipher_substitute(&mut buf, &s);
                    }
                    ResolvedOperand::Int(e) => {
                        log::debug!("throttling step {step_idx}: {primitive:?}(buf, {e}) [extra_idx={extra_idx} unused]");
                        primitive.apply_unary(&mut buf, e);
                    }
                }
            }
        }
    }

    Ok(buf.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sig_primitives::ThrottlePrimitive;

    #[test]
    fn empty_plan_is_identity() {
        let program = ThrottlingProgram::default();
        assert_eq!(run_throttling_plan(&program, "abcdef").unwrap(), "abcdef");
    }

    #[test]
    fn runs_unary_push_step() {
        let program = ThrottlingProgram {
            array: vec![ArrayElement::Primitive(ThrottlePrimitive::Push), ArrayElement::Integer(65)],
            plan: vec![ThrottleStep::Unary { func_idx: 0, operand_idx: 1 }],
        };
        let result = run_throttling_plan(&program, "bcd").unwrap();
        assert_eq!(result, "bcdA");
    }

    #[test]
    fn null_self_resolves_to_buffer_length() {
        let program = ThrottlingProgram {
            array: vec![ArrayElement::Primitive(ThrottlePrimitive::SwapZeroK), ArrayElement::NullSelf],
            plan: vec![ThrottleStep::Unary { func_idx: 0, operand_idx: 1 }],
        };
        // buf_len = 4, operand resolves to 4, 4 % 4 == 0 -> swap(0,0) is a no-op.
        let result = run_throttling_plan(&program, "abcd").unwrap();
        assert_eq!(result, "abcd");
    }

    #[test]
    fn out_of_bounds_func_idx_errors() {
        let program = ThrottlingProgram {
            array: vec![ArrayElement::Integer(1)],
            plan: vec![ThrottleStep::Unary { func_idx: 5, operand_idx: 0 }],
        };
        assert!(matches!(
            run_throttling_plan(&program, "abc"),
            Err(CipherError::ThrottlingInvariant(_))
        ));
    }
}
