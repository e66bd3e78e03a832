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

//! Extracts the signature transform program and the throttling program
//! from a script blob.
//!
//! This crate owns everything that requires scanning raw script text:
//! locating functions, objects and arrays by shape, and turning them
//! into the typed programs the interpreter and VM execute. It builds on
//! [`sig_scanner`] for the low-level text scanning and [`sig_primitives`]
//! for classifying function bodies into semantic primitives.

#![deny(missing_docs)]

pub mod error;
pub mod signature;
pub mod throttling;

pub use error::ExtractError;
pub use signature::{extract_signature_program, SignatureProgram};
pub use throttling::{extract_throttling_program, ArrayElement, ThrottleStep, ThrottlingProgram};
