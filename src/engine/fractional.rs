use super::error::{Error, Result};

// '0'..'9' < 'A'..'Z' < 'a'..'z' in ASCII, so plain string comparison
// orders keys correctly.
const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = DIGITS.len();

fn digit_index(digit: u8) -> usize {
    match digit {
        b'0'..=b'9' => usize::from(digit - b'0'),
        b'A'..=b'Z' => usize::from(digit - b'A') + 10,
        b'a'..=b'z' => usize::from(digit - b'a') + 36,
        other => panic!("invalid fractional index digit {:?}", other as char),
    }
}

/// Returns a key strictly between `a` and `b`, either of which may be an
/// open end. Generated keys never end in the minimum digit, so every key
/// keeps room below itself.
pub fn key_between(a: Option<&str>, b: Option<&str>) -> Result<String> {
    if b == Some("") {
        return Err(Error::FractionalIndexBounds);
    }
    if let (Some(a), Some(b)) = (a, b) {
        if a >= b {
            return Err(Error::FractionalIndexBounds);
        }
    }
    for bound in [a, b].into_iter().flatten() {
        assert!(
            !bound.ends_with('0'),
            "fractional index key ends in the minimum digit: {bound:?}"
        );
    }
    Ok(midpoint(a.unwrap_or(""), b))
}

fn midpoint(a: &str, b: Option<&str>) -> String {
    if let Some(b) = b {
        // strip the longest common prefix, reading missing digits of `a`
        // as the minimum digit
        let mut n = 0;
        while b
            .as_bytes()
            .get(n)
            .is_some_and(|digit| *digit == *a.as_bytes().get(n).unwrap_or(&b'0'))
        {
            n += 1;
        }
        if n > 0 {
            let a_rest = a.get(n..).unwrap_or("");
            return format!("{}{}", &b[..n], midpoint(a_rest, Some(&b[n..])));
        }
    }
    let digit_a = a.as_bytes().first().map_or(0, |digit| digit_index(*digit));
    let digit_b = b.map_or(BASE, |b| digit_index(b.as_bytes()[0]));
    if digit_b - digit_a > 1 {
        // round half up keeps the midpoint off the minimum digit
        let mid = (digit_a + digit_b + 1) / 2;
        (DIGITS[mid] as char).to_string()
    } else {
        match b {
            // consecutive first digits: the upper bound's own first digit
            // already sits strictly between
            Some(b) if b.len() > 1 => b[..1].to_string(),
            // extend below the upper bound
            _ => format!(
                "{}{}",
                DIGITS[digit_a] as char,
                midpoint(a.get(1..).unwrap_or(""), None)
            ),
        }
    }
}
