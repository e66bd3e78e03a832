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

/// Errors that can surface from the facade: either an extraction
/// failure while parsing the script, or a runtime failure while walking
/// an extracted plan.
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum CipherError {
    /// The extraction stage could not locate or parse some part of the
    /// deciphering program inside the script blob.
    #[error(transparent)]
    Extract(#[from] sig_extract::ExtractError),

    /// A call site in an extracted plan referenced a primitive name the
    /// transform map doesn't contain.
    #[error("unknown primitive `{0}` referenced by transform plan")]
    UnknownPrimitive(String),

    /// A call site string in a plan didn't parse as any recognized call
    /// shape.
    #[error("malformed call site: {0}")]
    MalformedCallSite(String),

    /// A throttling-plan step referenced an array index that either
    /// doesn't exist or resolved to a value of the wrong kind (e.g. a
    /// nested array where an integer was expected).
    #[error("throttling invariant violated: {0}")]
    ThrottlingInvariant(String),
}
