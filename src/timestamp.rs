use nut::structs::rational::Rational;

/// Formats `seconds` as `HH:MM:SS.mmm`, rounded to the millisecond.
pub fn time_str(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let ms = (seconds.abs() * 1000.0).round() as u64;

    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let secs = ms / 1000 % 60;
    let millis = ms % 1000;

    format!("{sign}{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

/// Formats a span of `ticks` in `time_base`.
pub fn pts_str(ticks: i64, time_base: Rational) -> String {
    time_str(ticks as f64 * time_base.to_f64())
}

#[test]
fn test_time_str() {
    assert_eq!(time_str(0.0), "00:00:00.000");
    assert_eq!(time_str(3723.0456), "01:02:03.046");
    assert_eq!(time_str(-1.5), "-00:00:01.500");
    assert_eq!(time_str(360_000.0), "100:00:00.000");
}

#[test]
fn test_pts_str() {
    assert_eq!(pts_str(8000, Rational::new(1, 8000)), "00:00:01.000");
    assert_eq!(pts_str(90, Rational::new(1001, 30000)), "00:00:03.003");
}
