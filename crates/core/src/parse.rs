//! Small parsers shared by the dispatcher and image resolver: byte-size
//! suffixes for sandbox/memory limits, and the progress markers image pulls
//! and builds print to their logs.

/// Parse a `<num>[K|M|G|T|P]B`-style byte size into bytes (P10).
///
/// `"512"` is bytes, `"512k"`/`"512K"` is kibibytes, and so on through
/// petabytes; empty input returns `None`. Matching the legacy-compatible
/// behaviour called out in the Open Questions, an unrecognised suffix is
/// treated as bytes rather than rejected.
pub fn parse_memory_bytes(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let num: u64 = digits.parse().ok()?;
    let suffix = suffix.trim().trim_end_matches(['b', 'B']);
    let multiplier: u64 = match suffix.to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1024,
        "m" => 1024u64.pow(2),
        "g" => 1024u64.pow(3),
        "t" => 1024u64.pow(4),
        "p" => 1024u64.pow(5),
        _ => 1, // unrecognised suffix: treat as bytes (Open Question ii)
    };
    Some(num * multiplier)
}

/// Convert whole CPUs to the nanoCPU unit most container engines expect
/// (`cpu * 1e9`).
pub fn cpus_to_nanocpus(cpu: f64) -> i64 {
    (cpu * 1_000_000_000.0).round() as i64
}

/// Convert a MiB quantity to bytes.
pub fn mib_to_bytes(mib: u64) -> u64 {
    mib * 1024 * 1024
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;
