use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A literal value with optional datatype or language tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Literal {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Literal {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }
}

/// Object position of a triple: a named resource or a literal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Term {
    Named(String),
    Literal(Literal),
}

impl Term {
    pub fn named(iri: impl Into<String>) -> Self {
        Self::Named(iri.into())
    }

    /// Returns the IRI when this is a named resource
    pub fn as_named(&self) -> Option<&str> {
        match self {
            Self::Named(iri) => Some(iri),
            Self::Literal(_) => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Database discriminator for the term kind
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Named(_) => "named",
            Self::Literal(_) => "literal",
        }
    }

    /// Key under which this term appears in a path's node history
    ///
    /// Named resources use their IRI; literals use their N-Triples form, which
    /// always starts with a quote and therefore never collides with an IRI.
    pub fn node_key(&self) -> String {
        match self {
            Self::Named(iri) => iri.clone(),
            Self::Literal(literal) => literal.to_string(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.value.replace('\\', "\\\\").replace('"', "\\\""))?;
        if let Some(language) = &self.language {
            write!(f, "@{}", language)
        } else if let Some(datatype) = &self.datatype {
            write!(f, "^^<{}>", datatype)
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(iri) => write!(f, "<{}>", iri),
            Self::Literal(literal) => literal.fmt(f),
        }
    }
}

/// A single fact: subject, predicate, object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }

    /// Subject and object equal (a resource pointing at itself)
    pub fn is_reflexive(&self) -> bool {
        self.object.as_named() == Some(self.subject.as_str())
    }

    /// Named nodes of this triple (`nodes` in the store's lookup index)
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes = vec![self.subject.as_str()];
        if let Some(object) = self.object.as_named() {
            if object != self.subject {
                nodes.push(object);
            }
        }
        nodes
    }

    /// Whether the given IRI appears as subject or named object
    pub fn touches(&self, node: &str) -> bool {
        self.subject == node || self.object.as_named() == Some(node)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> {} .", self.subject, self.predicate, self.object)
    }
}

/// A triple as persisted in the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTriple {
    pub id: i64,
    pub triple: Triple,
}

/// Selection of stored triples offered to a path for extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripleFilter {
    /// Node that must appear as subject or named object
    pub node: String,
}

/// Removes duplicates from an incoming batch, preserving first-seen order
pub fn dedup_batch(triples: &[Triple]) -> Vec<Triple> {
    let mut seen = HashSet::new();
    triples
        .iter()
        .filter(|t| seen.insert(*t))
        .cloned()
        .collect()
}
