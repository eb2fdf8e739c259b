use crate::estimator::ClearanceEstimate;
use crate::models::Count;

/// Placeholder printed for null counts.
pub const NULL_CELL: &str = "-";

/// Format a number with comma digit groups and a fixed number of decimals.
///
/// # Examples
///
/// ```
/// use immistat_core::formatting::format_number;
///
/// assert_eq!(format_number(1234.5, 1), "1,234.5");
/// assert_eq!(format_number(1234567.0, 0), "1,234,567");
/// assert_eq!(format_number(0.0, 2), "0.00");
/// assert_eq!(format_number(-9876.5, 1), "-9,876.5");
/// ```
pub fn format_number(value: f64, decimals: u32) -> String {
    let negative = value < 0.0;
    let abs_value = value.abs();

    // Nudge by a scaled epsilon so exact binary midpoints round away from zero.
    let factor = 10_f64.powi(decimals as i32);
    let epsilon = f64::EPSILON * abs_value * factor;
    let rounded = ((abs_value * factor) + epsilon).round() / factor;

    let grouped = group_thousands(&(rounded.trunc() as u64).to_string());

    let result = if decimals == 0 {
        grouped
    } else {
        let frac = format!(
            "{:.prec$}",
            rounded - rounded.trunc(),
            prec = decimals as usize
        );
        // "0.50" → ".50"
        format!("{}{}", grouped, &frac[1..])
    };

    if negative {
        format!("-{}", result)
    } else {
        result
    }
}

/// Format a cleaned count; whole numbers print without decimals.
///
/// ```
/// use immistat_core::formatting::format_count;
///
/// assert_eq!(format_count(Some(12345.0)), "12,345");
/// assert_eq!(format_count(Some(2.5)), "2.50");
/// assert_eq!(format_count(None), "-");
/// ```
pub fn format_count(count: Count) -> String {
    match count {
        Some(v) if v.fract() == 0.0 => format_number(v, 0),
        Some(v) => format_number(v, 2),
        None => NULL_CELL.to_string(),
    }
}

/// Human-readable clearance estimate.
///
/// ```
/// use immistat_core::estimator::ClearanceEstimate;
/// use immistat_core::formatting::format_clearance;
///
/// assert_eq!(format_clearance(&ClearanceEstimate::Days(1234.567)), "1,234.57 days");
/// assert_eq!(format_clearance(&ClearanceEstimate::Days(1.0)), "1.00 day");
/// assert_eq!(
///     format_clearance(&ClearanceEstimate::Undefined),
///     "undefined (no applications processed)"
/// );
/// ```
pub fn format_clearance(estimate: &ClearanceEstimate) -> String {
    match estimate {
        ClearanceEstimate::Days(d) if (*d - 1.0).abs() < f64::EPSILON => {
            format!("{} day", format_number(*d, 2))
        }
        ClearanceEstimate::Days(d) => format!("{} days", format_number(*d, 2)),
        ClearanceEstimate::Undefined => "undefined (no applications processed)".to_string(),
    }
}

/// `(part / whole) * 100`, rounded to `decimal_places`; `0.0` when `whole`
/// is zero.
pub fn percentage(part: f64, whole: f64, decimal_places: u32) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    let raw = (part / whole) * 100.0;
    let factor = 10_f64.powi(decimal_places as i32);
    (raw * factor).round() / factor
}

/// Insert commas every three digits from the right of an integer string.
fn group_thousands(s: &str) -> String {
    if s.len() <= 3 {
        return s.to_string();
    }
    let remainder = s.len() % 3;
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i != 0 && i % 3 == remainder {
            result.push(',');
        }
        result.push(c);
    }
    result
}
