use regex::Regex;

pub fn validate_phone(phone: &str) -> bool {
    Regex::new(r"^\+?[0-9]{7,15}$")
        .map(|re| re.is_match(phone))
        .unwrap_or(false)
}

pub fn validate_email(email: &str) -> bool {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

pub fn validate_coordinates(longitude: f64, latitude: f64) -> bool {
    (-180.0..=180.0).contains(&longitude) && (-90.0..=90.0).contains(&latitude)
}

pub fn generate_otp() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let otp: u32 = rng.gen_range(100000..1000000);
    otp.to_string()
}

/// Builds a case-insensitive "contains" pattern safe to hand to `$regex`.
pub fn search_pattern(term: &str) -> String {
    regex::escape(term.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_numbers() {
        assert!(validate_phone("+9779812345678"));
        assert!(validate_phone("9812345678"));
        assert!(!validate_phone("98-123"));
        assert!(!validate_phone("call me"));
    }

    #[test]
    fn emails() {
        assert!(validate_email("ram@example.com"));
        assert!(!validate_email("ram@example"));
        assert!(!validate_email("not an email"));
    }

    #[test]
    fn coordinates_are_bounded() {
        assert!(validate_coordinates(85.324, 27.7172));
        assert!(!validate_coordinates(181.0, 0.0));
        assert!(!validate_coordinates(0.0, -91.0));
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn search_terms_are_escaped() {
        assert_eq!(search_pattern(" drill (cordless) "), r"drill \(cordless\)");
        assert_eq!(search_pattern("a.b*"), r"a\.b\*");
    }
}
