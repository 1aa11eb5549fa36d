use url::form_urlencoded;

/// Ordered multi-valued mapping of URL-encoded form parameters
///
/// Keys keep the order in which they were first seen; every key maps to its
/// values in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormValues {
    entries: Vec<(String, Vec<String>)>,
}

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `key`, creating the key if needed
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Appends every value of `other` after the values already present
    pub fn extend_from(&mut self, other: &FormValues) {
        for (key, value) in other.iter() {
            self.append(key, value);
        }
    }

    /// Returns the first value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// Returns every value for `key`
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over every `(key, value)` pair, one item per value
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |v| (key.as_str(), v.as_str())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormParseError {
    #[error("invalid percent escape at byte {0}")]
    InvalidEscape(usize),
    #[error("invalid semicolon separator in form data")]
    Semicolon,
}

/// Parses `application/x-www-form-urlencoded` input.
///
/// Rejects malformed percent escapes and `;` separators. Escapes that do not
/// decode to UTF-8 are kept with replacement characters. A pair without `=`
/// yields the key with an empty value; empty pairs are skipped.
pub fn parse(input: &[u8]) -> Result<FormValues, FormParseError> {
    validate(input)?;

    let mut values = FormValues::new();
    for (key, value) in form_urlencoded::parse(input) {
        values.append(key.into_owned(), value.into_owned());
    }
    Ok(values)
}

/// Like [`parse`], but maps any failure to an empty set
pub fn parse_lenient(input: &[u8]) -> FormValues {
    match parse(input) {
        Ok(values) => values,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable form data");
            FormValues::new()
        }
    }
}

/// Parses `input` and keeps only the pairs that carry an explicit `=`.
///
/// Used to decide whether an arbitrary body "looks like" form data: a JSON
/// document or free text parses as a single bare key, which is not reported.
pub fn parse_pairs(input: &[u8]) -> FormValues {
    let explicit = input
        .split(|&b| b == b'&')
        .filter(|segment| segment.contains(&b'='))
        .collect::<Vec<_>>()
        .join(&b'&');
    parse_lenient(&explicit)
}

/// Returns true when the media type of `content_type` is URL-encoded form data
pub fn is_form_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|media| media.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
}

fn validate(input: &[u8]) -> Result<(), FormParseError> {
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b';' => return Err(FormParseError::Semicolon),
            b'%' => {
                let escape = input.get(i + 1..i + 3);
                if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                    return Err(FormParseError::InvalidEscape(i));
                }
                i += 3;
            }
            _ => i += 1,
        }
    }
    Ok(())
}
