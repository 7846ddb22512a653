//! Human-readable duration rendering for timing reports.

use std::time::Duration;

const SCALES: [(u128, &str); 7] = [
    (86_400_000_000_000, "d"),
    (3_600_000_000_000, "h"),
    (60_000_000_000, "m"),
    (1_000_000_000, "s"),
    (1_000_000, "ms"),
    (1_000, "µs"),
    (1, "ns"),
];

/// Render a duration in its largest whole unit with up to three decimals,
/// e.g. `12.5 ms` or `2 s`.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0 ns".to_string();
    }
    for (divisor, unit) in SCALES {
        if nanos >= divisor {
            let value = nanos as f64 / divisor as f64;
            return format!("{} {unit}", trim_decimals(&format!("{value:.3}")));
        }
    }
    format!("{nanos} ns")
}

fn trim_decimals(raw: &str) -> &str {
    if !raw.contains('.') {
        return raw;
    }
    raw.trim_end_matches('0').trim_end_matches('.')
}
