//! Resource quantity parsing (`250m`, `1Gi`, `128974848`).

/// Parses a CPU quantity into millicores.
pub fn parse_cpu_millicores(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let (number, scale) = if let Some(n) = raw.strip_suffix('n') {
        (n, 1e-6)
    } else if let Some(n) = raw.strip_suffix('u') {
        (n, 1e-3)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 1.0)
    } else {
        (raw, 1000.0)
    };

    number.parse::<f64>().ok().map(|v| v * scale)
}

/// Parses a memory or storage quantity into bytes.
pub fn parse_bytes(raw: &str) -> Option<u64> {
    const SUFFIXES: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let raw = raw.trim();
    let (number, scale) = SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| raw.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((raw, 1.0));

    let value = number.parse::<f64>().ok()? * scale;
    (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("250m", Some(250.0))]
    #[case("1", Some(1000.0))]
    #[case("0.5", Some(500.0))]
    #[case("1500u", Some(1.5))]
    #[case("2000000n", Some(2.0))]
    #[case("lots", None)]
    fn test_parse_cpu(#[case] raw: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_cpu_millicores(raw), expected);
    }

    #[rstest]
    #[case("128974848", Some(128_974_848))]
    #[case("64Mi", Some(67_108_864))]
    #[case("1Gi", Some(1_073_741_824))]
    #[case("100Ki", Some(102_400))]
    #[case("1k", Some(1000))]
    #[case("1.5G", Some(1_500_000_000))]
    #[case("-1", None)]
    #[case("", None)]
    fn test_parse_bytes(#[case] raw: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_bytes(raw), expected);
    }
}
