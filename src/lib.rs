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

//! Extraction and interpretation of a media platform's obfuscated
//! signature-descrambling and throttling-resistance programs.
//!
//! A script blob embeds two small, heavily obfuscated programs: one that
//! descrambles a signature token, and one (not present in every script
//! revision) that defeats download throttling. This crate locates both
//! inside the blob, classifies their primitives by the stable *shape* of
//! each obfuscated function body rather than by name, and executes them
//! against caller-supplied values.
//!
//! [`Facade`] is the entry point most callers want: it runs extraction
//! once per script blob and answers repeated queries against the
//! result.
//!
//! ```no_run
//! use sigcipher::Facade;
//!
//! # fn fetch_script() -> String { String::new() }
//! let js = fetch_script();
//! let facade = Facade::new(&js)?;
//! let deciphered = facade.decipher_signature("obfuscated-token")?;
//! # Ok::<(), sigcipher::CipherError>(())
//! ```

#![deny(missing_docs)]

mod error;
mod facade;
mod interpreter;
mod throttle_vm;

pub use error::CipherError;
pub use facade::Facade;

pub use sig_extract::{ArrayElement, ExtractError, SignatureProgram, ThrottleStep, ThrottlingProgram};
pub use sig_primitives::{SigPrimitive, ThrottlePrimitive};
