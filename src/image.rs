//! Container image reference parsing.
//!
//! An image reference is split into a repository path and either a tag or a
//! digest:
//!
//! - `repository:tag`
//! - `repository@sha256:digest`
//!
//! Everything left of the separator is the repository. The parser never
//! guesses a registry host: ECR repository names may contain `.`, so
//! `my.team/service:1` names the repository `my.team/service`. Stripping the
//! managed host is done beforehand by [`crate::registry::filter`].
//!
//! Parsing is total: malformed input yields [`NotParseable`], never a
//! partially filled reference.

use std::fmt;

/// Separator between a repository and its content digest.
pub const DIGEST_SEPARATOR: char = '@';

/// Separator between a repository and its tag.
pub const TAG_SEPARATOR: char = ':';

/// Either a mutable tag or a content-addressed digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagOrDigest {
    /// Image tag, e.g. `40d6072`.
    Tag(String),
    /// Image digest including its algorithm prefix, e.g. `sha256:e5e2...`.
    Digest(String),
}

impl TagOrDigest {
    /// The raw tag or digest value.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(tag) => tag,
            Self::Digest(digest) => digest,
        }
    }

    /// Whether a value is actually present.
    pub fn is_set(&self) -> bool {
        !self.as_str().is_empty()
    }
}

/// A parsed container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host. [`ImageReference::parse`] always leaves it empty; only
    /// [`crate::registry::filter::RegistryFilter::reference`] fills it from
    /// the host it strips.
    pub registry: String,
    /// Repository path, possibly namespaced (`team/service`).
    pub repository: String,
    /// Tag or digest selecting one image in the repository.
    pub tag_or_digest: TagOrDigest,
}

/// Returned when a string is not a valid image reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("image reference '{raw}' is not parseable: {detail}")]
pub struct NotParseable {
    /// The rejected input.
    pub raw: String,
    /// What was wrong with it.
    pub detail: &'static str,
}

impl ImageReference {
    /// Parse a raw image string.
    ///
    /// The digest separator wins over the tag separator, so
    /// `repo@sha256:abc` yields a digest rather than a tag of `abc`.
    ///
    /// # Errors
    ///
    /// Returns [`NotParseable`] when neither separator is present, or when the
    /// repository, tag or digest segment is empty.
    pub fn parse(raw: &str) -> Result<Self, NotParseable> {
        let fail = |detail| NotParseable {
            raw: raw.to_owned(),
            detail,
        };

        let (repository, tag_or_digest) =
            if let Some((repo, digest)) = raw.split_once(DIGEST_SEPARATOR) {
                if digest.is_empty() {
                    return Err(fail("empty digest"));
                }
                (repo, TagOrDigest::Digest(digest.to_owned()))
            } else if let Some((repo, tag)) = raw.rsplit_once(TAG_SEPARATOR) {
                if tag.is_empty() {
                    return Err(fail("empty tag"));
                }
                if tag.contains('/') {
                    return Err(fail("tag contains a path separator"));
                }
                (repo, TagOrDigest::Tag(tag.to_owned()))
            } else {
                return Err(fail("missing tag or digest"));
            };

        if repository.is_empty() {
            return Err(fail("empty repository"));
        }

        Ok(Self {
            registry: String::new(),
            repository: repository.to_owned(),
            tag_or_digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        match &self.tag_or_digest {
            TagOrDigest::Tag(tag) => write!(f, "{}{TAG_SEPARATOR}{tag}", self.repository),
            TagOrDigest::Digest(digest) => {
                write!(f, "{}{DIGEST_SEPARATOR}{digest}", self.repository)
            }
        }
    }
}
