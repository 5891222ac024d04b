//! Decimal rendering matching printf's `%.Ng` family.
//!
//! Counters are folded as `f64` and re-rendered every time a sample lands
//! against them. The wire format expects the shortest `%.15g`-equivalent
//! text, not Rust's default `Display` (which can run longer than 15
//! significant digits for values that need the extra precision to
//! round-trip).

/// Render `value` the way `printf("%.*g", precision, value)` would.
///
/// `precision` is the number of significant digits; the relay always calls
/// this with `15`, matching the reference implementation's `"%.15g|c\n"`.
#[must_use]
pub fn format_g(value: f64, precision: usize) -> String {
    debug_assert!(precision >= 1, "precision must be at least one digit");

    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_negative() {
            "-inf".to_string()
        } else {
            "inf".to_string()
        };
    }

    // Formatting in scientific notation first gives us a correctly-rounded
    // mantissa and exponent (Rust's formatter renormalizes after rounding),
    // which sidesteps the edge cases a hand-rolled log10 approach runs into
    // near powers of ten.
    let sci = format!("{:.*e}", precision - 1, value);
    let (mantissa, exp_str) = sci
        .split_once('e')
        .expect("scientific formatting always contains 'e'");
    let exp: i32 = exp_str
        .parse()
        .expect("exponent rendered by {:e} is always a valid integer");

    if exp < -4 || exp >= precision as i32 {
        let mantissa = trim_trailing_zeros(mantissa);
        let sign = if exp < 0 { "-" } else { "+" };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        trim_trailing_zeros(&fixed)
    }
}

fn trim_trailing_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::format_g;

    #[test]
    fn integers_render_without_decimal() {
        assert_eq!(format_g(8.0, 15), "8");
        assert_eq!(format_g(3.0, 15), "3");
        assert_eq!(format_g(0.0, 15), "0");
    }

    #[test]
    fn sums_render_exactly() {
        assert_eq!(format_g(3.0 + 5.0, 15), "8");
    }

    #[test]
    fn rate_division_renders_exactly() {
        assert_eq!(format_g(1.0 / 0.25, 15), "4");
    }

    #[test]
    fn fractional_values_keep_precision() {
        assert_eq!(format_g(0.1 + 0.2, 15), "0.3");
    }

    #[test]
    fn negative_values_keep_sign() {
        assert_eq!(format_g(-42.5, 15), "-42.5");
    }

    #[test]
    fn large_exponents_use_scientific_form() {
        assert_eq!(format_g(1.0e20, 15), "1e+20");
    }

    #[test]
    fn small_exponents_use_scientific_form() {
        assert_eq!(format_g(1.5e-5, 15), "1.5e-05");
    }

    #[test]
    fn nan_and_inf_have_stable_renderings() {
        assert_eq!(format_g(f64::NAN, 15), "nan");
        assert_eq!(format_g(f64::INFINITY, 15), "inf");
        assert_eq!(format_g(f64::NEG_INFINITY, 15), "-inf");
    }
}
