// ABOUTME: Node names for hosts-file backends: {source}__{host}__{index}.
// ABOUTME: Dots in the host become underscores; the host part can be read back from a name.

const SEPARATOR: &str = "__";

/// Builds and parses node names of one source.
#[derive(Debug, Clone)]
pub struct NodeNameBuilder {
    source: String,
}

impl NodeNameBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Host as it appears inside node names.
    pub fn slug(host: &str) -> String {
        host.replace('.', "_")
    }

    pub fn name(&self, host: &str, index: u32) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.source,
            Self::slug(host),
            index
        )
    }

    /// Host slug of a name built by this builder.
    pub fn host_slug<'a>(&self, node: &'a str) -> Option<&'a str> {
        let rest = node.strip_prefix(self.source.as_str())?;
        let rest = rest.strip_prefix(SEPARATOR)?;
        let (slug, index) = rest.rsplit_once(SEPARATOR)?;
        if slug.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(slug)
    }

    /// Whether `node` was built by this builder for `host`.
    pub fn belongs_to(&self, node: &str, host: &str) -> bool {
        self.host_slug(node) == Some(Self::slug(host).as_str())
    }
}
