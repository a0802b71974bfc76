use std::fmt;

/// A rational number as coded in the file, numerator over denominator.
///
/// Values are kept exactly as read. Time bases are validated to be in lowest
/// terms by the main header parser, sample rates are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self { num: 0, den: 1 }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[test]
fn test_gcd() {
    assert_eq!(gcd(48000, 1001), 1);
    assert_eq!(gcd(30000, 1001), 1);
    assert_eq!(gcd(25, 50), 25);
}
