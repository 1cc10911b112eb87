// Copyright 2026 LabJack Corporation
//
// SPDX-License-Identifier: BSD-3-Clause

//! Small `Display` wrappers used by the CLI for human-readable output.
//!
//! Wraps a primitive so `{}` picks the right rendering without every
//! call site repeating the same `if`/`match`.

use std::fmt::{self, Debug, Display};

use log::error;
use num_traits::ToPrimitive;
use number_prefix::NumberPrefix;

/// Prints a number as bytes with an IEC binary prefix: one decimal place
/// when a prefix applies, none when the value is small enough to stand
/// alone.
pub struct BinaryBytesOne<T>(pub T)
where
    T: ToPrimitive;

impl<T> Display for BinaryBytesOne<T>
where
    T: ToPrimitive + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let num = self.0.to_f64().unwrap_or_else(|| {
            error!("could not convert number/type {:?} to f64 to display it in bytes, using f64::NAN instead", self.0);
            f64::NAN
        });
        match NumberPrefix::binary(num) {
            NumberPrefix::Standalone(number) => write!(f, "{number:.0} B"),
            NumberPrefix::Prefixed(prefix, number) => write!(f, "{number:.1} {prefix}B"),
        }
    }
}

/// Renders a `bool` as `ON`/`OFF`, for property-style flags like
/// [`crate::pipeline::PipelineConfig::verify_image`].
pub struct OnOffBool(pub bool);

impl Display for OnOffBool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0 { "ON" } else { "OFF" })
    }
}
