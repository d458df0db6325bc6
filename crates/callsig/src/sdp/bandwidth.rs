//! Bandwidth-restriction editing of SDP text
//!
//! Edits operate on whole CRLF-terminated lines. Lines are never re-wrapped,
//! so everything other than the bandwidth attribute comes back byte for byte.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const CRLF: &str = "\r\n";
const CONNECTION_PREFIX: &str = "c=IN ";
const AS_PREFIX: &str = "b=AS:";
const TIAS_PREFIX: &str = "b=TIAS:";

/// Cap on the media bitrate of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthLimit {
    /// No cap; bandwidth lines are stripped
    #[default]
    Unlimited,
    /// Cap in kilobits per second (always > 0)
    Kbps(u32),
}

impl BandwidthLimit {
    /// Build a kbps limit, rejecting zero
    pub fn kbps(kbps: u32) -> Result<Self> {
        if kbps == 0 {
            return Err(Error::InvalidConfig(
                "bandwidth limit must be a positive number of kbps".to_string(),
            ));
        }
        Ok(BandwidthLimit::Kbps(kbps))
    }

    /// Limit in bits per second as used by sender encoding parameters
    pub fn max_bitrate_bps(&self) -> Option<u64> {
        match self {
            BandwidthLimit::Unlimited => None,
            BandwidthLimit::Kbps(kbps) => Some(u64::from(*kbps) * 1000),
        }
    }

    /// Rewrite `sdp` so that it carries this limit
    pub fn apply_to(&self, sdp: &str) -> Result<String> {
        match self {
            BandwidthLimit::Unlimited => Ok(remove_limit(sdp)),
            BandwidthLimit::Kbps(kbps) => apply_limit(sdp, *kbps),
        }
    }
}

impl fmt::Display for BandwidthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandwidthLimit::Unlimited => write!(f, "unlimited"),
            BandwidthLimit::Kbps(kbps) => write!(f, "{} kbps", kbps),
        }
    }
}

impl FromStr for BandwidthLimit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(BandwidthLimit::Unlimited);
        }
        let kbps: u32 = s.parse().map_err(|_| {
            Error::InvalidConfig(format!(
                "bandwidth must be 'unlimited' or a positive kbps value, got '{}'",
                s
            ))
        })?;
        BandwidthLimit::kbps(kbps)
    }
}

/// Split into CRLF-terminated lines, each slice keeping its terminator.
/// A trailing fragment without CRLF is returned as its own slice.
fn lines_with_terminators(sdp: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = sdp;
    while !rest.is_empty() {
        match rest.find(CRLF) {
            Some(idx) => {
                let end = idx + CRLF.len();
                lines.push(&rest[..end]);
                rest = &rest[end..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

fn is_terminated(line: &str) -> bool {
    line.ends_with(CRLF)
}

/// Set the session bandwidth cap to `kbps`.
///
/// Without an existing `b=AS:` line a new one is inserted directly after the
/// first connection-information line. With one, the first is rewritten in
/// place and any later duplicates are dropped, so the result always holds
/// exactly one.
///
/// # Errors
///
/// [`Error::MalformedInputError`] when the blob has no CRLF-terminated
/// `c=IN ` line, [`Error::InvalidConfig`] when `kbps` is zero. No partial
/// output is produced.
pub fn apply_limit(sdp: &str, kbps: u32) -> Result<String> {
    if kbps == 0 {
        return Err(Error::InvalidConfig(
            "bandwidth limit must be a positive number of kbps".to_string(),
        ));
    }

    let lines = lines_with_terminators(sdp);
    let anchor = lines
        .iter()
        .position(|line| line.starts_with(CONNECTION_PREFIX) && is_terminated(line))
        .ok_or_else(|| {
            Error::MalformedInputError(
                "SDP has no connection-information (c=IN) line".to_string(),
            )
        })?;

    let bandwidth_line = format!("{}{}{}", AS_PREFIX, kbps, CRLF);
    // An unterminated trailing `b=AS:` still counts; it comes back with CRLF
    let has_existing = lines.iter().any(|line| line.starts_with(AS_PREFIX));

    let mut out = String::with_capacity(sdp.len() + bandwidth_line.len());
    let mut replaced = false;
    for (idx, line) in lines.iter().enumerate() {
        if has_existing && line.starts_with(AS_PREFIX) {
            if !replaced {
                out.push_str(&bandwidth_line);
                replaced = true;
            }
            continue;
        }
        out.push_str(line);
        if !has_existing && idx == anchor {
            out.push_str(&bandwidth_line);
        }
    }

    Ok(out)
}

/// Strip every `b=AS:` and `b=TIAS:` line. No-op when none are present.
pub fn remove_limit(sdp: &str) -> String {
    lines_with_terminators(sdp)
        .into_iter()
        .filter(|line| !(line.starts_with(AS_PREFIX) || line.starts_with(TIAS_PREFIX)))
        .collect()
}

/// Value of the first `b=AS:` line, if any
pub fn current_limit(sdp: &str) -> Option<u32> {
    lines_with_terminators(sdp)
        .into_iter()
        .find_map(|line| line.strip_prefix(AS_PREFIX))
        .and_then(|value| value.trim_end().parse().ok())
}
