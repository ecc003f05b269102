// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors produced while decoding a single statsd record.
///
/// Neither variant is ever fatal for ingestion: malformed records are skipped
/// and unsupported types are dropped with a diagnostic, while the rest of the
/// datagram keeps flowing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Record had fewer than two `|`-delimited fields.
    #[error("record has fewer than two '|'-delimited fields")]
    Malformed,
    /// Record carried a type token other than `ms`, `c` or `g`.
    #[error("unsupported metric type '{0}'")]
    UnsupportedType(String),
}
