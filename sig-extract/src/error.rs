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

/// Failures raised while locating or parsing the extracted program inside
/// a script blob.
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum ExtractError {
    /// Every alternative pattern for a given extraction stage was
    /// exhausted without a match.
    #[error("pattern not found while extracting {stage}: {detail}")]
    PatternNotFound {
        /// Which extraction stage failed (e.g. `"initial function name"`).
        stage: &'static str,
        /// Additional context for diagnosing the miss.
        detail: String,
    },

    /// A structural assumption about the extracted data was violated,
    /// e.g. an array index the plan references fell out of bounds.
    #[error("extraction invariant violated: {0}")]
    InvariantViolated(String),
}
