use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} fields, found {found}")]
pub struct FieldCountError {
    pub expected: usize,
    pub found: usize,
}

/// Remove a single trailing `\n` or `\r\n`.
pub fn strip_terminator(raw: &str) -> &str {
    raw.strip_suffix('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .unwrap_or(raw)
}

/// Split a delimited reply into exactly `N` fields.
///
/// The terminator is stripped first; empty segments (including trailing ones)
/// count as fields, so `"a,b,"` has three.
pub fn split_fields<const N: usize>(
    raw: &str,
    delimiter: char,
) -> Result<[&str; N], FieldCountError> {
    let mut fields = [""; N];
    let mut found = 0;
    for field in strip_terminator(raw).split(delimiter) {
        if let Some(slot) = fields.get_mut(found) {
            *slot = field;
        }
        found += 1;
    }

    if found == N {
        Ok(fields)
    } else {
        Err(FieldCountError { expected: N, found })
    }
}

pub fn parse_field<T: FromStr>(field: &str) -> Option<T> {
    field.trim().parse().ok()
}
