/// Compact label for volumes: `1234.5` → `1.23k`, `2_500_000` → `2.5m`.
pub fn abbr_large_numbers(value: f32) -> String {
    let abs = value.abs();
    let sign = if value < 0.0 { "-" } else { "" };

    let (scaled, suffix, decimals) = if abs >= 1_000_000_000.0 {
        (abs / 1_000_000_000.0, "b", 2)
    } else if abs >= 1_000_000.0 {
        (abs / 1_000_000.0, "m", 2)
    } else if abs >= 1_000.0 {
        (abs / 1_000.0, "k", 2)
    } else if abs >= 1.0 {
        (abs, "", 2)
    } else {
        (abs, "", 4)
    };

    let digits = trim_fraction(format!("{scaled:.decimals$}"));
    if digits == "0" {
        return digits;
    }
    format!("{sign}{digits}{suffix}")
}

/// Like [`abbr_large_numbers`] but always shows the sign of non-zero values.
pub fn format_signed(value: f32) -> String {
    let abbr = abbr_large_numbers(value);
    if value > 0.0 && abbr != "0" {
        format!("+{abbr}")
    } else {
        abbr
    }
}

pub fn format_with_commas(num: u64) -> String {
    let digits = num.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn trim_fraction(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviates_by_magnitude() {
        assert_eq!(abbr_large_numbers(5.0), "5");
        assert_eq!(abbr_large_numbers(0.25), "0.25");
        assert_eq!(abbr_large_numbers(1234.5), "1.23k");
        assert_eq!(abbr_large_numbers(2_500_000.0), "2.5m");
        assert_eq!(abbr_large_numbers(-3_000_000_000.0), "-3b");
        assert_eq!(abbr_large_numbers(0.0), "0");
    }

    #[test]
    fn signed_values() {
        assert_eq!(format_signed(3.0), "+3");
        assert_eq!(format_signed(-1500.0), "-1.5k");
        assert_eq!(format_signed(0.0), "0");
        assert_eq!(format_signed(0.00001), "0");
    }

    #[test]
    fn commas() {
        assert_eq!(format_with_commas(0), "0");
        assert_eq!(format_with_commas(999), "999");
        assert_eq!(format_with_commas(1_234_567), "1,234,567");
    }
}
