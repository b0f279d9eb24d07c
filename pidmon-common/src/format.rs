//! Human-readable formatting for frontend caches

/// Scaling base for byte counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// 1024-based units: B, KiB, MiB, ...
    Binary,
    /// 1000-based units: B, KB, MB, ...
    Decimal,
}

const BINARY_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
const DECIMAL_UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

impl Base {
    pub const fn value(&self) -> u64 {
        match self {
            Base::Binary => 1024,
            Base::Decimal => 1000,
        }
    }

    const fn units(&self) -> &'static [&'static str; 7] {
        match self {
            Base::Binary => &BINARY_UNITS,
            Base::Decimal => &DECIMAL_UNITS,
        }
    }
}

/// Format a byte count, e.g. `1536` -> `"1.5KiB"`
///
/// Values below the base are printed as plain integers (`"0B"`, `"999B"`).
/// Larger values are divided by the base until they drop below it or the
/// largest unit is reached, then rounded to two decimals.
pub fn to_human_readable(num: u64, base: Base) -> String {
    let units = base.units();
    let divisor = base.value() as f64;

    if num < base.value() {
        return format!("{}{}", num, units[0]);
    }

    let mut value = num as f64;
    let mut step = 0;
    while value >= divisor && step < units.len() - 1 {
        value /= divisor;
        step += 1;
    }

    format!("{}{}", format_mantissa(value), units[step])
}

/// Round to two decimals, keeping at least one fractional digit
fn format_mantissa(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    // Debug keeps a trailing `.0` on integral floats: 1.0 -> "1.0", 1.25 -> "1.25"
    format!("{:?}", rounded)
}

/// Format a percentage with two decimals, e.g. `12.345` -> `"12.35%"`
pub fn format_percent(percent: f64) -> String {
    format!("{:.2}%", percent)
}

/// Format `numerator / denominator` as a percentage
///
/// A zero denominator yields `"0.00%"` rather than dividing.
pub fn format_ratio(numerator: u64, denominator: u64) -> String {
    if denominator == 0 {
        return format_percent(0.0);
    }
    format_percent(numerator as f64 / denominator as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_bytes() {
        assert_eq!(to_human_readable(0, Base::Binary), "0B");
        assert_eq!(to_human_readable(0, Base::Decimal), "0B");
    }

    #[test]
    fn test_exact_unit_boundary() {
        assert_eq!(to_human_readable(1024, Base::Binary), "1.0KiB");
        assert_eq!(to_human_readable(1000, Base::Decimal), "1.0KB");
    }

    #[test]
    fn test_below_base_stays_in_bytes() {
        assert_eq!(to_human_readable(999, Base::Decimal), "999B");
        assert_eq!(to_human_readable(1023, Base::Binary), "1023B");
    }

    #[test]
    fn test_fractional_rounding() {
        assert_eq!(to_human_readable(1536, Base::Binary), "1.5KiB");
        assert_eq!(to_human_readable(1280, Base::Binary), "1.25KiB");
        assert_eq!(to_human_readable(2_333_333, Base::Decimal), "2.33MB");
        assert_eq!(to_human_readable(3 * 1024 * 1024 * 1024, Base::Binary), "3.0GiB");
    }

    #[test]
    fn test_largest_unit_caps_scaling() {
        assert_eq!(to_human_readable(u64::MAX, Base::Binary), "16.0EiB");
        assert!(to_human_readable(u64::MAX, Base::Decimal).ends_with("EB"));
    }

    #[test]
    fn test_mantissa_idempotent() {
        for value in [1.0, 1.5, 1.25, 2.33, 999.99] {
            let once = format_mantissa(value);
            let parsed: f64 = once.parse().unwrap();
            assert_eq!(format_mantissa(parsed), once);
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(format_percent(12.345), "12.35%");
        assert_eq!(format_percent(0.0), "0.00%");
        assert_eq!(format_percent(100.0), "100.00%");
    }

    #[test]
    fn test_ratio_zero_denominator() {
        assert_eq!(format_ratio(0, 0), "0.00%");
        assert_eq!(format_ratio(512, 0), "0.00%");
    }

    #[test]
    fn test_ratio() {
        assert_eq!(format_ratio(1, 4), "25.00%");
        assert_eq!(format_ratio(4, 4), "100.00%");
        assert_eq!(format_ratio(0, 4), "0.00%");
    }
}
