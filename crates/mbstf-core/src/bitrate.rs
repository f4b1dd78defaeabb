use crate::error::CoreError;
use std::fmt;

/// A bit rate in bits per second, parsed from the `<decimal>[ <unit>]`
/// grammar used by `mbr` and rate-limit configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitRate(f64);

const TBPS: f64 = 1e12;
const GBPS: f64 = 1e9;
const MBPS: f64 = 1e6;
const KBPS: f64 = 1e3;

impl BitRate {
    pub fn from_bps(bps: f64) -> Self {
        Self(bps)
    }

    pub fn bits_per_second(self) -> f64 {
        self.0
    }

    /// Parse `"1500000"` or `"1.5 Mbps"`. Unit-less values are bits/second.
    /// The entire numeric substring must be consumed before any unit; a
    /// unit must be one of `bps`, `Kbps`, `Mbps`, `Gbps`, `Tbps`.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::SessionConfigError("empty bitrate value".into()));
        }
        let (num_part, unit_part) = match s.find(char::is_whitespace) {
            Some(idx) => (&s[..idx], s[idx..].trim()),
            None => (s, ""),
        };
        let value: f64 = num_part
            .parse()
            .map_err(|_| CoreError::SessionConfigError(format!("invalid bitrate value: {s}")))?;
        let multiplier = match unit_part {
            "" | "bps" => 1.0,
            "Kbps" => KBPS,
            "Mbps" => MBPS,
            "Gbps" => GBPS,
            "Tbps" => TBPS,
            other => {
                return Err(CoreError::SessionConfigError(format!(
                    "unrecognised bitrate unit: {other}"
                )))
            }
        };
        Ok(Self(value * multiplier))
    }

    /// Render with the unit auto-selected by magnitude.
    pub fn format_auto(self) -> String {
        let bps = self.0;
        if bps >= TBPS {
            format!("{} Tbps", bps / TBPS)
        } else if bps >= GBPS {
            format!("{} Gbps", bps / GBPS)
        } else if bps >= MBPS {
            format!("{} Mbps", bps / MBPS)
        } else if bps >= KBPS {
            format!("{} Kbps", bps / KBPS)
        } else {
            format!("{bps}")
        }
    }
}

impl fmt::Display for BitRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_auto())
    }
}
