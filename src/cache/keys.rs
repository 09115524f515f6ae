//! Cache Key Builder Module
//!
//! Builds canonical keys of the form
//! `<prefix>:<environment>:http:<METHOD>:<discriminator>`.
//!
//! The discriminator is either a caller supplied explicit key, a rendered
//! key template such as `events:item:{id}`, or the normalized request path
//! followed by `?` and the sorted query string.

use axum::http::Method;
use thiserror::Error;

use crate::backend::prefix_pattern;

/// Scope segment for keys derived from HTTP requests.
pub const HTTP_SCOPE: &str = "http";

/// Maximum length of an explicit key or rendered template, in bytes.
pub const MAX_EXPLICIT_KEY_LENGTH: usize = 256;

// == Key Error ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed cache key '{key}': {reason}")]
    Malformed { key: String, reason: &'static str },
}

impl KeyError {
    fn malformed(key: &str, reason: &'static str) -> Self {
        KeyError::Malformed {
            key: key.to_string(),
            reason,
        }
    }
}

// == Validation ==
/// Checks a literal key fragment: non-empty, bounded, and free of
/// whitespace, control characters, glob metacharacters and braces.
pub fn validate_explicit_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::malformed(key, "key is empty"));
    }
    if key.len() > MAX_EXPLICIT_KEY_LENGTH {
        return Err(KeyError::malformed(key, "key is too long"));
    }
    validate_fragment(key)?;
    if key.contains(['{', '}']) {
        return Err(KeyError::malformed(key, "braces are only allowed in templates"));
    }
    Ok(())
}

fn validate_fragment(key: &str) -> Result<(), KeyError> {
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(KeyError::malformed(key, "contains whitespace or control characters"));
    }
    if key.contains(['*', '?', '[', ']', '\\']) {
        return Err(KeyError::malformed(key, "contains glob metacharacters"));
    }
    Ok(())
}

/// Template segment: literal text or a named placeholder.
#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn parse_template(template: &str) -> Result<Vec<Segment<'_>>, KeyError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(KeyError::malformed(template, "unbalanced '}' in template"));
        }
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| KeyError::malformed(template, "unclosed '{' in template"))?;
        let name = &after[..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(KeyError::malformed(template, "invalid placeholder name"));
        }
        segments.push(Segment::Placeholder(name));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Validates a key template at route registration time.
pub fn validate_template(template: &str) -> Result<(), KeyError> {
    if template.is_empty() {
        return Err(KeyError::malformed(template, "key is empty"));
    }
    let segments = parse_template(template)?;
    if !segments.iter().any(|s| matches!(s, Segment::Placeholder(_))) {
        return validate_explicit_key(template);
    }
    for segment in segments {
        if let Segment::Literal(text) = segment {
            validate_fragment(text).map_err(|_| {
                KeyError::malformed(template, "template contains forbidden characters")
            })?;
        }
    }
    Ok(())
}

/// Fills a template's placeholders from `params`.
///
/// The first pair with a matching name wins. The rendered key is validated
/// like an explicit key.
pub fn render_template<K, V>(template: &str, params: &[(K, V)]) -> Result<String, KeyError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut rendered = String::with_capacity(template.len());
    for segment in parse_template(template)? {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Placeholder(name) => {
                let value = params
                    .iter()
                    .find(|(k, _)| k.as_ref() == name)
                    .map(|(_, v)| v.as_ref())
                    .ok_or_else(|| KeyError::malformed(template, "placeholder has no value"))?;
                rendered.push_str(value);
            }
        }
    }
    validate_explicit_key(&rendered)?;
    Ok(rendered)
}

// == Normalization ==
/// Sorts query pairs by name, then value, keeping repeated names.
///
/// Pairs are decoded before sorting and re-encoded afterwards so that
/// equivalent encodings produce the same string.
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Collapses duplicate slashes and drops a trailing slash.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

// == Key Builder ==
/// Namespaced key construction shared by the interceptor and by writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
    environment: String,
}

impl KeyBuilder {
    // == Constructor ==
    /// Creates a builder for one prefix and environment.
    ///
    /// # Arguments
    /// * `prefix` - Logical namespace, e.g. `cache`
    /// * `environment` - Deployment tag, e.g. `production`
    pub fn new(prefix: impl Into<String>, environment: impl Into<String>) -> Result<Self, KeyError> {
        let prefix = prefix.into();
        let environment = environment.into();
        for part in [&prefix, &environment] {
            validate_explicit_key(part)?;
            if part.contains(':') {
                return Err(KeyError::malformed(part, "namespace parts cannot contain ':'"));
            }
        }
        Ok(Self {
            prefix,
            environment,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// `prefix:environment`, the root of every key this builder makes.
    pub fn namespace(&self) -> String {
        format!("{}:{}", self.prefix, self.environment)
    }

    /// `prefix:environment:http:METHOD:`
    pub fn method_prefix(&self, method: &Method) -> String {
        format!("{}:{}:{}:", self.namespace(), HTTP_SCOPE, method.as_str())
    }

    // == Keys ==
    /// Key derived from the request path and query.
    pub fn implicit_key(&self, method: &Method, path: &str, query: Option<&str>) -> String {
        let query = query.map(canonical_query).unwrap_or_default();
        format!("{}{}?{}", self.method_prefix(method), normalize_path(path), query)
    }

    /// Key with a literal discriminator.
    pub fn explicit_key(&self, method: &Method, discriminator: &str) -> Result<String, KeyError> {
        validate_explicit_key(discriminator)?;
        Ok(format!("{}{}", self.method_prefix(method), discriminator))
    }

    /// Key whose discriminator is a rendered template.
    ///
    /// Writers call this with the resource id to compute the exact key the
    /// read route stores under.
    pub fn template_key<K, V>(
        &self,
        method: &Method,
        template: &str,
        params: &[(K, V)],
    ) -> Result<String, KeyError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let discriminator = render_template(template, params)?;
        Ok(format!("{}{}", self.method_prefix(method), discriminator))
    }

    // == Prefixes ==
    /// Key prefix shared by every query variant of one path.
    pub fn route_family_prefix(&self, method: &Method, path: &str) -> String {
        format!("{}{}?", self.method_prefix(method), normalize_path(path))
    }

    /// Scan pattern covering everything in this namespace.
    pub fn namespace_pattern(&self) -> String {
        prefix_pattern(&format!("{}:", self.namespace()))
    }
}
