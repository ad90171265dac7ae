//! RDF parsing for fetched documents
//!
//! Parsers are selected by media type. N-Triples is built in; other syntaxes
//! plug in through [`RdfParser`].

use crate::graph::{Literal, Term, Triple};
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while1, take_while_m_n};
use nom::character::complete::{char as pchar, space0};
use nom::combinator::{all_consuming, map, map_opt, opt, rest, value, verify};
use nom::sequence::{delimited, preceded, terminated, tuple};
use nom::IResult;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Turns a document body into triples
pub trait RdfParser: Send + Sync {
    /// Media types this parser accepts, most preferred first
    fn media_types(&self) -> &[&'static str];

    fn parse(&self, body: &str) -> Result<Vec<Triple>, ParseError>;
}

/// Line-based N-Triples parser
///
/// Triples with blank nodes are dropped: their labels are only meaningful
/// within one document.
#[derive(Debug, Default, Clone, Copy)]
pub struct NTriplesParser;

impl RdfParser for NTriplesParser {
    fn media_types(&self) -> &[&'static str] {
        &["application/n-triples", "text/plain"]
    }

    fn parse(&self, body: &str) -> Result<Vec<Triple>, ParseError> {
        let mut triples = Vec::new();
        for (index, line) in body.lines().enumerate() {
            let trimmed = line.trim_start_matches([' ', '\t']);
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some(triple) = parse_line(line, index + 1)? {
                triples.push(triple);
            }
        }
        Ok(triples)
    }
}

/// Accept header value advertising every parser, in order of preference
pub fn accept_header(parsers: &[Box<dyn RdfParser>]) -> String {
    let mut parts = Vec::new();
    let mut quality = 10u32;
    for parser in parsers {
        for media_type in parser.media_types() {
            if quality == 10 {
                parts.push(media_type.to_string());
            } else {
                parts.push(format!("{};q=0.{}", media_type, quality));
            }
            quality = quality.saturating_sub(1).max(1);
        }
    }
    parts.join(", ")
}

/// Finds the parser for a Content-Type header value
pub fn parser_for<'a>(
    parsers: &'a [Box<dyn RdfParser>],
    content_type: &str,
) -> Option<&'a dyn RdfParser> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    parsers
        .iter()
        .find(|p| p.media_types().iter().any(|m| *m == media_type))
        .map(|p| p.as_ref())
}

enum Node {
    Iri(String),
    Blank,
    Literal(Literal),
}

enum Annotation {
    Language(String),
    Datatype(String),
}

fn parse_line(line: &str, number: usize) -> Result<Option<Triple>, ParseError> {
    let (_, (subject, predicate, object)) = all_consuming(statement)(line).map_err(|e| {
        let message = match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let near: String = e.input.chars().take(20).collect();
                if near.is_empty() {
                    format!("{:?} at end of line", e.code)
                } else {
                    format!("{:?} near '{}'", e.code, near)
                }
            }
            nom::Err::Incomplete(_) => "incomplete statement".to_string(),
        };
        ParseError {
            line: number,
            message,
        }
    })?;
    let error = |message: &str| ParseError {
        line: number,
        message: message.to_string(),
    };

    let subject = match subject {
        Node::Iri(iri) => iri,
        Node::Blank => return Ok(None),
        Node::Literal(_) => return Err(error("literal in subject position")),
    };
    let predicate = match predicate {
        Node::Iri(iri) => iri,
        _ => return Err(error("predicate must be an IRI")),
    };
    let object = match object {
        Node::Iri(iri) => Term::Named(iri),
        Node::Literal(literal) => Term::Literal(literal),
        Node::Blank => return Ok(None),
    };
    Ok(Some(Triple::new(subject, predicate, object)))
}

fn statement(input: &str) -> IResult<&str, (Node, Node, Node)> {
    terminated(
        tuple((ws(node), ws(node), ws(node))),
        tuple((pchar('.'), space0, opt(comment))),
    )(input)
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(space0, inner, space0)
}

fn comment(input: &str) -> IResult<&str, &str> {
    preceded(pchar('#'), rest)(input)
}

fn node(input: &str) -> IResult<&str, Node> {
    alt((
        map(iri, Node::Iri),
        map(blank_node, |_| Node::Blank),
        map(literal, Node::Literal),
    ))(input)
}

fn iri(input: &str) -> IResult<&str, String> {
    let content = escaped_transform(is_not("\\> \t"), '\\', unicode_escape);
    verify(
        delimited(
            pchar('<'),
            map(opt(content), Option::unwrap_or_default),
            pchar('>'),
        ),
        |iri: &String| !iri.is_empty(),
    )(input)
}

fn blank_node(input: &str) -> IResult<&str, &str> {
    preceded(tag("_:"), take_while1(|c: char| !c.is_whitespace()))(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    map(
        tuple((quoted, opt(annotation))),
        |(text, annotation)| {
            let mut literal = Literal::plain(text);
            match annotation {
                Some(Annotation::Language(language)) => literal.language = Some(language),
                Some(Annotation::Datatype(datatype)) => literal.datatype = Some(datatype),
                None => {}
            }
            literal
        },
    )(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    let content = escaped_transform(
        is_not("\\\""),
        '\\',
        alt((
            value('\t', pchar('t')),
            value('\u{8}', pchar('b')),
            value('\n', pchar('n')),
            value('\r', pchar('r')),
            value('\u{c}', pchar('f')),
            value('"', pchar('"')),
            value('\'', pchar('\'')),
            value('\\', pchar('\\')),
            unicode_escape,
        )),
    );
    delimited(
        pchar('"'),
        map(opt(content), Option::unwrap_or_default),
        pchar('"'),
    )(input)
}

fn annotation(input: &str) -> IResult<&str, Annotation> {
    alt((
        map(
            preceded(
                pchar('@'),
                take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-'),
            ),
            |language: &str| Annotation::Language(language.to_ascii_lowercase()),
        ),
        map(preceded(tag("^^"), iri), Annotation::Datatype),
    ))(input)
}

/// `uXXXX` or `UXXXXXXXX` after a backslash
fn unicode_escape(input: &str) -> IResult<&str, char> {
    alt((
        map_opt(preceded(pchar('u'), hex_digits(4)), code_point),
        map_opt(preceded(pchar('U'), hex_digits(8)), code_point),
    ))(input)
}

fn hex_digits<'a>(count: usize) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    take_while_m_n(count, count, |c: char| c.is_ascii_hexdigit())
}

fn code_point(hex: &str) -> Option<char> {
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}
