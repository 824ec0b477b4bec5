//! Human-readable byte counts.
//!
//! A unit is used once the value exceeds a hundredth of it, so 20 MB is
//! reported as `0.020GB`.

const BINARY_UNITS: [(f64, &str); 3] = [
    (1024.0 * 1024.0 * 1024.0, "GiB"),
    (1024.0 * 1024.0, "MiB"),
    (1024.0, "KiB"),
];

const DECIMAL_UNITS: [(f64, &str); 3] = [
    (1000.0 * 1000.0 * 1000.0, "GB"),
    (1000.0 * 1000.0, "MB"),
    (1000.0, "KB"),
];

const THRESHOLD_DIVISOR: f64 = 100.0;

fn format_with(value: f64, units: &[(f64, &str)]) -> String {
    for (unit, suffix) in units {
        if value > unit / THRESHOLD_DIVISOR {
            return format!("{:.3}{}", value / unit, suffix);
        }
    }
    format!("{value:.3}B")
}

/// Formats with powers of 1024 (`B`, `KiB`, `MiB`, `GiB`).
pub fn human_readable_binary_unit(value: f64) -> String {
    format_with(value, &BINARY_UNITS)
}

/// Formats with powers of 1000 (`B`, `KB`, `MB`, `GB`).
pub fn human_readable_unit(value: f64) -> String {
    format_with(value, &DECIMAL_UNITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, "0.000B")]
    #[case(10.0, "10.000B")]
    #[case(512.0, "0.500KiB")]
    #[case(1024.0, "1.000KiB")]
    #[case(1536.0, "1.500KiB")]
    #[case(5.0 * 1024.0 * 1024.0, "5.000MiB")]
    #[case(20.0 * 1024.0 * 1024.0, "0.020GiB")]
    #[case(2.25 * 1024.0 * 1024.0 * 1024.0, "2.250GiB")]
    fn test_binary_units(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(human_readable_binary_unit(value), expected);
    }

    #[rstest]
    #[case(10.0, "10.000B")]
    #[case(999.0, "0.999KB")]
    #[case(1000.0, "1.000KB")]
    #[case(1_500_000.0, "1.500MB")]
    #[case(10_000_000.0, "10.000MB")]
    #[case(20_000_000.0, "0.020GB")]
    #[case(3_000_000_000.0, "3.000GB")]
    fn test_decimal_units(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(human_readable_unit(value), expected);
    }
}
