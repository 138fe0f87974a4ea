use std::fmt;

use serde::{Deserialize, Serialize};

use crate::labels::shorten_id;

/// Normalized identity of an image resolved against the local engine.
///
/// Effectively a tagged union over by-digest / by-tag / by-local-id, with
/// precedence digest > tag > id both for display and for choosing the
/// reference string to pull on rollback. Empty strings mean "absent", which
/// is how the engine reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Content-addressed id assigned by the engine (`sha256:…`).
    pub id: String,
    /// Registry digest (`repo@sha256:…`), present iff pulled with a known digest.
    pub repo_digest: String,
    /// Repository tag (`repo:tag`), present iff the image is tagged locally.
    pub tag: String,
    /// The reference string originally asked for; re-resolved on future updates.
    pub original: String,
    /// `<arch>/<os>`.
    pub platform: String,
}

impl ImageReference {
    /// Whether the exact image bytes can be re-fetched: either a registry
    /// digest or an already-local id pins the version.
    pub fn is_exact(&self) -> bool {
        !self.repo_digest.is_empty() || !self.id.is_empty()
    }

    /// Best reference string available: digest, else tag, else local id.
    pub fn best_reference(&self) -> &str {
        if !self.repo_digest.is_empty() {
            &self.repo_digest
        } else if !self.tag.is_empty() {
            &self.tag
        } else {
            &self.id
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.repo_digest.is_empty() {
            write!(f, "{} ({})", self.repo_digest, shorten_id(&self.id))
        } else if !self.tag.is_empty() {
            write!(f, "{} ({})", self.tag, shorten_id(&self.id))
        } else {
            write!(f, "{}", shorten_id(&self.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_ref() -> ImageReference {
        ImageReference {
            id: "sha256:0123456789abcdef0123456789abcdef".to_string(),
            repo_digest: "nginx@sha256:abc".to_string(),
            tag: "nginx:1.24".to_string(),
            original: "nginx:1.24".to_string(),
            platform: "amd64/linux".to_string(),
        }
    }

    #[test]
    fn best_reference_prefers_digest_then_tag_then_id() {
        let mut img = full_ref();
        assert_eq!(img.best_reference(), "nginx@sha256:abc");

        img.repo_digest.clear();
        assert_eq!(img.best_reference(), "nginx:1.24");

        img.tag.clear();
        assert_eq!(img.best_reference(), img.id);
    }

    #[test]
    fn exactness_requires_digest_or_id() {
        let mut img = full_ref();
        assert!(img.is_exact());

        img.repo_digest.clear();
        assert!(img.is_exact(), "local id still pins the version");

        img.id.clear();
        assert!(!img.is_exact(), "tag alone cannot guarantee the bytes");
    }

    #[test]
    fn display_shortens_the_id() {
        let img = full_ref();
        assert_eq!(
            img.to_string(),
            "nginx@sha256:abc (sha256:01234)"
        );
    }
}
