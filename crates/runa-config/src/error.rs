// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The input could not be parsed at all (syntax error, wrong type).
    #[error("could not parse configuration: {0}")]
    Parse(String),

    /// The input parsed but contained a field the loop does not recognize.
    /// Unknown keys are rejected rather than silently dropped so that a typo
    /// in an option name surfaces immediately.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
