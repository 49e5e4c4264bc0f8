// ABOUTME: Launch and removal command templates with named placeholders.
// ABOUTME: Renders once for execution and once with credentials hidden for descriptions.

use std::fmt;
use thiserror::Error;

/// Text shown in place of credentials in anything that is logged or persisted.
pub const HIDDEN_CREDENTIALS: &str = "[CREDENTIALS]";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("command template cannot be empty")]
    Empty,

    #[error("unknown placeholder {{{0}}} (expected one of host, node, source, url, credentials)")]
    UnknownPlaceholder(String),

    #[error("unclosed placeholder starting at byte {0}")]
    Unclosed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Host,
    Node,
    Source,
    Url,
    Credentials,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "host" => Some(Self::Host),
            "node" => Some(Self::Node),
            "source" => Some(Self::Source),
            "url" => Some(Self::Url),
            "credentials" => Some(Self::Credentials),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Values substituted into a template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub host: &'a str,
    pub node: &'a str,
    pub source: &'a str,
    /// Registration URL the launched node reports back to.
    pub url: &'a str,
    pub credentials: Option<&'a str>,
}

/// A shell command with `{host}`, `{node}`, `{source}`, `{url}` and
/// `{credentials}` placeholders.
///
/// Shell parameter expansions such as `${HOME}` are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        if raw.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;
        let mut offset = 0;

        while let Some(open) = rest.find('{') {
            let shell_expansion = rest[..open].ends_with('$');
            let Some(close) = rest[open..].find('}') else {
                if shell_expansion {
                    break;
                }
                return Err(TemplateError::Unclosed(offset + open));
            };
            let close = open + close;

            if shell_expansion {
                literal.push_str(&rest[..=close]);
            } else {
                literal.push_str(&rest[..open]);
                let name = &rest[open + 1..close];
                let placeholder = Placeholder::parse(name)
                    .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(placeholder));
            }

            offset += close + 1;
            rest = &rest[close + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Command to execute.
    pub fn render(&self, vars: &TemplateVars<'_>) -> String {
        self.render_with(vars, vars.credentials.unwrap_or(""))
    }

    /// Command as it may be logged or persisted.
    pub fn render_hidden(&self, vars: &TemplateVars<'_>) -> String {
        let credentials = if vars.credentials.is_some() {
            HIDDEN_CREDENTIALS
        } else {
            ""
        };
        self.render_with(vars, credentials)
    }

    fn render_with(&self, vars: &TemplateVars<'_>, credentials: &str) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Host) => out.push_str(vars.host),
                Segment::Placeholder(Placeholder::Node) => out.push_str(vars.node),
                Segment::Placeholder(Placeholder::Source) => out.push_str(vars.source),
                Segment::Placeholder(Placeholder::Url) => out.push_str(vars.url),
                Segment::Placeholder(Placeholder::Credentials) => out.push_str(credentials),
            }
        }
        out
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
