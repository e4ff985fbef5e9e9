use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use url::{Position, Url};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Maximum number of redirect URIs per client.
pub const MAX_REDIRECT_URIS: usize = 50;

const WILDCARD: char = '*';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Scheme,
    Host,
    Path,
    Query,
}

const SECTIONS: [Section; 4] = [Section::Scheme, Section::Host, Section::Path, Section::Query];

/// One piece of a redirect pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Wildcard,
}

/// A redirect URI pattern split into literals and `*` wildcards.
///
/// A wildcard stands for exactly one host label or one path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPattern<'a> {
    raw: &'a str,
    segments: Vec<Segment<'a>>,
}

impl<'a> RedirectPattern<'a> {
    pub fn new(raw: &'a str) -> Self {
        let mut segments = Vec::new();
        for (i, literal) in raw.split(WILDCARD).enumerate() {
            if i > 0 {
                segments.push(Segment::Wildcard);
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(literal));
            }
        }

        Self { raw, segments }
    }

    pub fn segments(&self) -> &[Segment<'a>] {
        &self.segments
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.contains(&Segment::Wildcard)
    }

    /// Checks whether `uri` is allowed by this pattern.
    ///
    /// Without wildcards the URI must equal the pattern byte for byte.
    /// Unparsable URIs never match.
    pub fn matches(&self, uri: &str) -> bool {
        let Ok(parsed) = Url::parse(uri) else {
            return false;
        };

        if !self.has_wildcard() {
            return uri == self.raw;
        }

        let Some(mut cursor) = Cursor::new(uri, &parsed) else {
            return false;
        };

        let mut wildcard = false;
        for segment in &self.segments {
            match segment {
                Segment::Wildcard => wildcard = true,
                Segment::Literal(literal) => {
                    let Some(idx) = cursor.find(literal) else {
                        return false;
                    };

                    let skipped = cursor.advance(idx);
                    if wildcard {
                        if !valid_wildcard_skip(&skipped) {
                            return false;
                        }
                        wildcard = false;
                    } else if !skipped.is_empty() {
                        return false;
                    }

                    cursor.advance(idx + literal.len());
                }
            }
        }

        if wildcard && !valid_wildcard_skip(&cursor.advance_end()) {
            return false;
        }

        cursor.exhausted()
    }
}

/// Checks `uri` against a single redirect pattern.
pub fn redirect_uri_matches(pattern: &str, uri: &str) -> bool {
    RedirectPattern::new(pattern).matches(uri)
}

/// What a wildcard consumed within one section: the skipped text and the
/// rest of that section after it.
#[derive(Debug)]
struct Skip<'u> {
    section: Section,
    skipped: &'u str,
    remaining: &'u str,
}

/// Walks a URL in its `scheme://host[:port]path[?query]` form.
struct Cursor<'u> {
    url: &'u str,
    offsets: [usize; 4],
    pos: usize,
}

impl<'u> Cursor<'u> {
    /// Splits `uri` into sections, or refuses if the string is not already
    /// in canonical form (userinfo, fragments, empty queries, case changes,
    /// backslashes, encoded or numeric hosts).
    fn new(uri: &'u str, parsed: &Url) -> Option<Self> {
        if !is_canonical(uri, parsed)
            || parsed.fragment().is_some()
            || !parsed.username().is_empty()
            || parsed.password().is_some()
            || !parsed.has_host()
        {
            return None;
        }

        let (scheme, rest) = uri.split_once("://")?;
        if scheme != parsed.scheme() {
            return None;
        }

        let authority_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, rest) = rest.split_at(authority_len);
        if authority.is_empty() || authority.contains('@') {
            return None;
        }

        let path_len = rest.find(['?', '#']).unwrap_or(rest.len());
        let (path, rest) = rest.split_at(path_len);
        let query = rest.strip_prefix('?').unwrap_or(rest);
        if query.contains('#') || (rest.starts_with('?') && query.is_empty()) {
            return None;
        }

        let host = scheme.len() + "://".len();
        let path_start = host + authority.len();
        let query_start = path_start + path.len();

        Some(Self {
            url: uri,
            offsets: [0, host, path_start, query_start],
            pos: 0,
        })
    }

    fn offset(&self, section: Section) -> usize {
        self.offsets[section as usize]
    }

    fn section_end(&self, section: Section) -> usize {
        match section {
            Section::Query => self.url.len(),
            _ => self.offsets[section as usize + 1],
        }
    }

    fn find(&self, literal: &str) -> Option<usize> {
        self.url[self.pos..].find(literal).map(|i| self.pos + i)
    }

    /// Moves to `idx` and reports, per section, what was stepped over.
    fn advance(&mut self, idx: usize) -> Vec<Skip<'u>> {
        let mut skipped = Vec::new();

        for section in SECTIONS {
            let end_of_section = self.section_end(section);
            let touches = section == Section::Query || self.pos < end_of_section;

            if touches && idx > self.offset(section) {
                let start = self.pos.max(self.offset(section));
                let end = end_of_section.min(idx);

                skipped.push(Skip {
                    section,
                    skipped: &self.url[start..end],
                    remaining: &self.url[end..end_of_section],
                });
            }
        }

        self.pos = idx;
        skipped
    }

    fn advance_end(&mut self) -> Vec<Skip<'u>> {
        self.advance(self.url.len())
    }

    fn exhausted(&self) -> bool {
        self.pos >= self.url.len()
    }
}

/// Whether `uri` reads exactly like its parsed form. The only tolerated
/// difference is the `/` the parser adds for an empty path.
fn is_canonical(uri: &str, parsed: &Url) -> bool {
    if uri == parsed.as_str() {
        return true;
    }

    parsed.path() == "/"
        && uri.len() + 1 == parsed.as_str().len()
        && uri.starts_with(&parsed[..Position::BeforePath])
        && uri.ends_with(&parsed[Position::AfterPath..])
}

fn valid_wildcard_skip(skipped: &[Skip<'_>]) -> bool {
    let [skip] = skipped else {
        return false;
    };

    match skip.section {
        // "*.gw2auth.com" is fine, "*.com" is not
        Section::Host => {
            !skip.skipped.contains('.')
                && skip.remaining.starts_with('.')
                && skip.remaining.matches('.').count() >= 2
        }
        Section::Path => !skip.skipped.contains('/'),
        Section::Scheme | Section::Query => false,
    }
}

/// Expands `$application_id`/`$client_id` placeholders and drops empty and
/// duplicate entries, keeping first-seen order.
pub fn preprocess_redirect_uris(
    application_id: Uuid,
    client_id: Uuid,
    redirect_uris: &[String],
) -> Vec<String> {
    let application_id = application_id.to_string();
    let client_id = client_id.to_string();
    let mut seen = HashSet::new();

    redirect_uris
        .iter()
        .map(|uri| {
            uri.replace("$application_id", &application_id)
                .replace("$client_id", &client_id)
        })
        .filter(|uri| !uri.is_empty() && seen.insert(uri.clone()))
        .collect()
}

/// Validates redirect URIs before they are stored for a client.
///
/// A wildcard pattern is accepted only if it matches itself with every `*`
/// replaced by a single label, which rules out patterns that could never
/// match anything or would match too broadly.
pub fn validate_redirect_uris(redirect_uris: &[String]) -> Result<()> {
    if redirect_uris.is_empty() || redirect_uris.len() > MAX_REDIRECT_URIS {
        return Err(AppError::Validation(format!(
            "At least one and at most {} redirect URIs might be added",
            MAX_REDIRECT_URIS
        )));
    }

    let problems: Vec<String> = redirect_uris
        .iter()
        .filter_map(|uri| validate_redirect_uri(uri).err())
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(problems.join("; ")))
    }
}

fn validate_redirect_uri(pattern: &str) -> std::result::Result<(), String> {
    let candidate = if pattern.contains(WILDCARD) {
        let digest = Sha256::digest(pattern.as_bytes());
        // hosts are lowercased by the parser
        let label = format!("a{}z", URL_SAFE_NO_PAD.encode(digest)).to_ascii_lowercase();
        pattern.replace(WILDCARD, &label)
    } else {
        pattern.to_string()
    };

    let url = Url::parse(&candidate).map_err(|e| format!("{}: {}", pattern, e))?;

    match url.host_str() {
        None | Some("") => return Err(format!("{}: invalid hostname", pattern)),
        Some("localhost") => return Err(format!("{}: localhost is not allowed", pattern)),
        Some(_) => {}
    }

    if candidate != pattern && !redirect_uri_matches(pattern, &candidate) {
        return Err(format!("{}: invalid pattern", pattern));
    }

    Ok(())
}
