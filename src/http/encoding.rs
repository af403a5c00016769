//! Content codings and `Accept-Encoding` negotiation

use std::fmt;

/// A content coding the engine can apply and remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
    Bzip2,
}

impl Encoding {
    pub const ALL: [Encoding; 4] = [
        Encoding::Identity,
        Encoding::Gzip,
        Encoding::Deflate,
        Encoding::Bzip2,
    ];

    /// Looks a coding token up, case-insensitively. `x-gzip` and `x-bzip2` are
    /// accepted as aliases.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();

        [
            ("identity", Encoding::Identity),
            ("gzip", Encoding::Gzip),
            ("x-gzip", Encoding::Gzip),
            ("deflate", Encoding::Deflate),
            ("bzip2", Encoding::Bzip2),
            ("x-bzip2", Encoding::Bzip2),
        ]
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(token))
        .map(|(_, encoding)| encoding)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Bzip2 => "bzip2",
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// QVALUE

/// Parses a qvalue into thousandths: `"0.001"` is `1`, `"1.000"` is `1000`.
///
/// Values above one are clamped to `1000`; anything unparsable counts as `1000`
/// so a sloppy client is never locked out.
pub fn parse_qvalue(value: &str) -> u16 {
    let value = value.trim();
    let (int, frac) = value.split_once('.').unwrap_or((value, ""));

    let valid = |digits: &str| digits.bytes().all(|b| b.is_ascii_digit());
    if int.is_empty() || !valid(int) || !valid(frac) {
        return 1000;
    }
    if int.bytes().any(|b| b != b'0') {
        return 1000;
    }

    frac.bytes()
        .chain(std::iter::repeat(b'0'))
        .take(3)
        .fold(0u16, |acc, b| acc * 10 + (b - b'0') as u16)
}

/// Splits `token;q=0.5` into the token and its weight.
pub(crate) fn weighted(item: &str) -> (&str, u16) {
    let mut parts = item.split(';');
    let token = parts.next().unwrap_or("").trim();

    let weight = parts
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
        .map_or(1000, |(_, value)| parse_qvalue(value));

    (token, weight)
}

// NEGOTIATION

/// Picks the coding for a response from the client's `Accept-Encoding`.
///
/// `available` reports which codings the response can produce. Without the
/// header, identity is preferred. Among codings of equal weight the compressed
/// ones win, in the order of [`Encoding::ALL`] after identity. Returns `None`
/// when nothing acceptable can be produced, which the caller answers with
/// `406 Not Acceptable`.
pub(crate) fn negotiate<F>(accept: Option<&str>, available: F) -> Option<Encoding>
where
    F: Fn(Encoding) -> bool,
{
    let Some(accept) = accept else {
        return [Encoding::Identity, Encoding::Gzip, Encoding::Deflate, Encoding::Bzip2]
            .into_iter()
            .find(|&e| available(e));
    };

    let mut explicit = [None::<u16>; 4];
    let mut wildcard = None;

    for item in accept.split(',').filter(|item| !item.trim().is_empty()) {
        let (token, weight) = weighted(item);

        match (token, Encoding::from_token(token)) {
            ("*", _) => wildcard = Some(weight),
            (_, Some(encoding)) => explicit[encoding.index()] = Some(weight),
            _ => {}
        }
    }

    let weight_of = |encoding: Encoding| match (explicit[encoding.index()], wildcard) {
        (Some(weight), _) => weight,
        (None, Some(weight)) => weight,
        (None, None) if encoding == Encoding::Identity => 1,
        (None, None) => 0,
    };

    [Encoding::Gzip, Encoding::Deflate, Encoding::Bzip2, Encoding::Identity]
        .into_iter()
        .filter(|&e| available(e))
        .map(|e| (e, weight_of(e)))
        .filter(|&(_, weight)| weight > 0)
        .fold(None, |best: Option<(Encoding, u16)>, candidate| match best {
            Some((_, weight)) if weight >= candidate.1 => best,
            _ => Some(candidate),
        })
        .map(|(encoding, _)| encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qvalues() {
        #[rustfmt::skip]
        let cases = [
            ("0.001", 1), ("1.000", 1000), ("1", 1000), ("0", 0),
            ("0.5", 500), ("0.75", 750), ("0.125", 125), ("0.1234", 123),
            ("1.5", 1000), ("2", 1000), (" 0.3 ", 300), ("0.", 0),
            ("", 1000), ("abc", 1000), (".5", 1000), ("-1", 1000), ("0.x", 1000),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_qvalue(input), expected, "{input:?}");
        }
    }

    #[test]
    fn qvalues_are_monotonic() {
        let values = ["0", "0.001", "0.01", "0.1", "0.5", "0.999", "1.000"];

        for pair in values.windows(2) {
            assert!(parse_qvalue(pair[0]) < parse_qvalue(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn weighted_items() {
        assert_eq!(weighted("gzip"), ("gzip", 1000));
        assert_eq!(weighted(" gzip ;q=0.2"), ("gzip", 200));
        assert_eq!(weighted("br; level=1; Q=0"), ("br", 0));
    }

    #[test]
    fn tokens() {
        assert_eq!(Encoding::from_token("GZIP"), Some(Encoding::Gzip));
        assert_eq!(Encoding::from_token(" x-bzip2"), Some(Encoding::Bzip2));
        assert_eq!(Encoding::from_token("br"), None);
    }

    #[test]
    fn negotiation() {
        let identity_only = |e: Encoding| e == Encoding::Identity;
        let with_gzip = |e: Encoding| matches!(e, Encoding::Identity | Encoding::Gzip);
        let gzip_only = |e: Encoding| e == Encoding::Gzip;

        #[rustfmt::skip]
        let cases: [(Option<&str>, &dyn Fn(Encoding) -> bool, Option<Encoding>); 12] = [
            (None, &identity_only, Some(Encoding::Identity)),
            (None, &with_gzip, Some(Encoding::Identity)),
            (None, &gzip_only, Some(Encoding::Gzip)),
            (Some("gzip, deflate"), &with_gzip, Some(Encoding::Gzip)),
            (Some("gzip;q=0.5, identity"), &with_gzip, Some(Encoding::Identity)),
            (Some("deflate"), &with_gzip, Some(Encoding::Identity)),
            (Some("identity;q=0"), &identity_only, None),
            (Some("*;q=0"), &identity_only, None),
            (Some("*;q=0, gzip"), &with_gzip, Some(Encoding::Gzip)),
            (Some("*"), &gzip_only, Some(Encoding::Gzip)),
            (Some("deflate"), &gzip_only, None),
            (Some(""), &identity_only, Some(Encoding::Identity)),
        ];

        for (accept, available, expected) in cases {
            assert_eq!(negotiate(accept, available), expected, "{accept:?}");
        }
    }
}
