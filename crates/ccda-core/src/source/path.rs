//! Restricted path-query language over [`SourceTree`]
//!
//! Supported syntax:
//! - absolute (`/a/b`, `//b`) and relative (`a/b`) paths
//! - qualified step names (`cda:entry`), wildcard `*`, `.` and `..`
//! - descendant steps (`a//b`)
//! - predicates: attribute value (`[@code='X']`), attribute existence
//!   (`[@nullFlavor]`), nested relative paths (`[cda:templateId[@root='1.2']]`,
//!   `[code/@code='X']`, `[title='Problems']`), `and`-joined conditions, and
//!   1-based positions (`[2]`) counted per parent
//!
//! Results are always in document order without duplicates.

use super::Namespaces;
use super::tree::{QName, SourceNode, SourceTree};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A path expression that failed to compile
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path expression '{expression}' at offset {offset}: {message}")]
pub struct PathSyntaxError {
    pub message: String,
    pub offset: usize,
    pub expression: String,
}

/// A compiled path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    anchor: Anchor,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Context,
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    SelfNode,
    Parent,
    Element {
        descendant: bool,
        test: NameTest,
        predicates: Vec<Predicate>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Name(QName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Conditions(Vec<Condition>),
}

/// `steps` navigate from the candidate node, then either an attribute or the
/// reached nodes' text is compared against `value` (existence when `None`)
#[derive(Debug, Clone, PartialEq, Eq)]
struct Condition {
    steps: Vec<Step>,
    attribute: Option<QName>,
    value: Option<String>,
}

impl PathExpr {
    /// Compile `expr`, resolving prefixes against `namespaces`
    pub fn compile(expr: &str, namespaces: &Namespaces) -> Result<Self, PathSyntaxError> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            expression: expr,
            tokens,
            pos: 0,
            namespaces,
        };
        let (anchor, steps) = parser.parse_expression()?;
        Ok(Self {
            source: expr.to_string(),
            anchor,
            steps,
        })
    }

    /// Compile against the CDA namespace table
    pub fn cda(expr: &str) -> Result<Self, PathSyntaxError> {
        Self::compile(expr, &Namespaces::cda())
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate with `context` as the starting node
    pub fn select<'t>(&self, context: SourceNode<'t>) -> Vec<SourceNode<'t>> {
        let start = match self.anchor {
            Anchor::Context => Item::Node(context),
            Anchor::Root => Item::Document(context.tree()),
        };
        evaluate(vec![start], &self.steps)
            .into_iter()
            .filter_map(Item::node)
            .collect()
    }

    /// First match in document order
    pub fn select_one<'t>(&self, context: SourceNode<'t>) -> Option<SourceNode<'t>> {
        self.select(context).into_iter().next()
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for PathExpr {
    type Err = PathSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::cda(s)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// The document node sits above the root element so absolute paths can
/// select the root element itself.
#[derive(Clone, Copy)]
enum Item<'t> {
    Document(&'t SourceTree),
    Node(SourceNode<'t>),
}

impl<'t> Item<'t> {
    fn key(&self) -> usize {
        match self {
            Item::Document(_) => 0,
            Item::Node(node) => node.index() + 1,
        }
    }

    fn node(self) -> Option<SourceNode<'t>> {
        match self {
            Item::Document(_) => None,
            Item::Node(node) => Some(node),
        }
    }

    fn children(&self) -> Vec<SourceNode<'t>> {
        match self {
            Item::Document(tree) => vec![tree.root()],
            Item::Node(node) => node.children().collect(),
        }
    }

    fn parent(&self) -> Option<Item<'t>> {
        match self {
            Item::Document(_) => None,
            Item::Node(node) => Some(match node.parent() {
                Some(parent) => Item::Node(parent),
                None => Item::Document(node.tree()),
            }),
        }
    }

    fn self_and_descendants(&self) -> Vec<Item<'t>> {
        match self {
            Item::Document(tree) => {
                let root = tree.root();
                let mut items = vec![*self, Item::Node(root)];
                items.extend(root.descendants().map(Item::Node));
                items
            }
            Item::Node(node) => {
                let mut items = vec![*self];
                items.extend(node.descendants().map(Item::Node));
                items
            }
        }
    }
}

fn evaluate<'t>(mut current: Vec<Item<'t>>, steps: &[Step]) -> Vec<Item<'t>> {
    for step in steps {
        let mut next = Vec::new();
        for item in &current {
            match step {
                Step::SelfNode => next.push(*item),
                Step::Parent => next.extend(item.parent()),
                Step::Element {
                    descendant,
                    test,
                    predicates,
                } => {
                    let parents = if *descendant {
                        item.self_and_descendants()
                    } else {
                        vec![*item]
                    };
                    for parent in parents {
                        let mut matched: Vec<SourceNode<'t>> = parent
                            .children()
                            .into_iter()
                            .filter(|child| test.matches(child))
                            .collect();
                        for predicate in predicates {
                            matched = predicate.apply(matched);
                        }
                        next.extend(matched.into_iter().map(Item::Node));
                    }
                }
            }
        }
        next.sort_by_key(Item::key);
        next.dedup_by_key(|item| item.key());
        current = next;
        if current.is_empty() {
            break;
        }
    }
    current
}

impl NameTest {
    fn matches(&self, node: &SourceNode<'_>) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Name(name) => node.is(name.namespace.as_deref(), &name.local),
        }
    }
}

impl Predicate {
    fn apply<'t>(&self, nodes: Vec<SourceNode<'t>>) -> Vec<SourceNode<'t>> {
        match self {
            Predicate::Position(position) => nodes.into_iter().nth(position - 1).into_iter().collect(),
            Predicate::Conditions(conditions) => nodes
                .into_iter()
                .filter(|node| conditions.iter().all(|c| c.holds(*node)))
                .collect(),
        }
    }
}

impl Condition {
    fn holds(&self, node: SourceNode<'_>) -> bool {
        let reached: Vec<SourceNode<'_>> = evaluate(vec![Item::Node(node)], &self.steps)
            .into_iter()
            .filter_map(Item::node)
            .collect();

        match (&self.attribute, &self.value) {
            (Some(attr), expected) => reached.iter().any(|n| {
                match n.attribute_ns(attr.namespace.as_deref(), &attr.local) {
                    Some(actual) => expected.as_deref().is_none_or(|e| e == actual),
                    None => false,
                }
            }),
            (None, None) => !reached.is_empty(),
            (None, Some(expected)) => reached
                .iter()
                .any(|n| n.text().unwrap_or_default().trim() == expected),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    Star,
    At,
    LBracket,
    RBracket,
    Eq,
    Colon,
    Name(String),
    Number(usize),
    Literal(String),
}

fn syntax_error(expression: &str, offset: usize, message: impl Into<String>) -> PathSyntaxError {
    PathSyntaxError {
        message: message.into(),
        offset,
        expression: expression.to_string(),
    }
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '-'
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, PathSyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        let token = match ch {
            c if c.is_whitespace() => continue,
            '/' => {
                if chars.next_if(|&(_, c)| c == '/').is_some() {
                    Token::DoubleSlash
                } else {
                    Token::Slash
                }
            }
            '.' => {
                if chars.next_if(|&(_, c)| c == '.').is_some() {
                    Token::DotDot
                } else {
                    Token::Dot
                }
            }
            '*' => Token::Star,
            '@' => Token::At,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '=' => Token::Eq,
            ':' => Token::Colon,
            '\'' | '"' => {
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(syntax_error(input, start, "unterminated string literal"));
                }
                Token::Literal(value)
            }
            c if c.is_ascii_digit() => {
                let mut end = start + c.len_utf8();
                while let Some((i, d)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
                    end = i + d.len_utf8();
                }
                let number = input[start..end]
                    .parse()
                    .map_err(|_| syntax_error(input, start, "position out of range"))?;
                Token::Number(number)
            }
            c if is_name_start(c) => {
                let mut end = start + c.len_utf8();
                while let Some((i, d)) = chars.next_if(|&(_, d)| is_name_char(d)) {
                    end = i + d.len_utf8();
                }
                Token::Name(input[start..end].to_string())
            }
            other => {
                return Err(syntax_error(
                    input,
                    start,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        tokens.push((token, start));
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
    namespaces: &'a Namespaces,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, offset)| *offset)
            .unwrap_or(self.expression.len())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> PathSyntaxError {
        syntax_error(self.expression, self.offset(), message)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), PathSyntaxError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn parse_expression(&mut self) -> Result<(Anchor, Vec<Step>), PathSyntaxError> {
        let (anchor, descendant) = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                (Anchor::Root, false)
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                (Anchor::Root, true)
            }
            _ => (Anchor::Context, false),
        };

        let (steps, attribute) = self.parse_relative(descendant)?;
        if attribute.is_some() {
            return Err(syntax_error(
                self.expression,
                self.offset(),
                "attributes can only be selected inside predicates",
            ));
        }
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok((anchor, steps))
    }

    /// Steps separated by `/` or `//`, optionally ending in `@attr`
    fn parse_relative(
        &mut self,
        mut descendant: bool,
    ) -> Result<(Vec<Step>, Option<QName>), PathSyntaxError> {
        let mut steps = Vec::new();
        loop {
            if self.peek() == Some(&Token::At) && !descendant {
                self.pos += 1;
                let attribute = self.parse_qname(false)?;
                return Ok((steps, Some(attribute)));
            }
            steps.push(self.parse_step(descendant)?);
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    descendant = false;
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    descendant = true;
                }
                _ => return Ok((steps, None)),
            }
        }
    }

    fn parse_step(&mut self, descendant: bool) -> Result<Step, PathSyntaxError> {
        let test = match self.peek() {
            Some(Token::Dot | Token::DotDot) if descendant => {
                return Err(self.error("'.' and '..' cannot follow '//'"));
            }
            Some(Token::Dot) => {
                self.pos += 1;
                return Ok(Step::SelfNode);
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                return Ok(Step::Parent);
            }
            Some(Token::Star) => {
                self.pos += 1;
                NameTest::Any
            }
            Some(Token::Name(_)) => NameTest::Name(self.parse_qname(true)?),
            _ => return Err(self.error("expected a step")),
        };

        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            predicates.push(self.parse_predicate()?);
            self.expect(Token::RBracket, "']'")?;
        }

        Ok(Step::Element {
            descendant,
            test,
            predicates,
        })
    }

    fn parse_predicate(&mut self) -> Result<Predicate, PathSyntaxError> {
        if let Some(Token::Number(position)) = self.peek() {
            let position = *position;
            if position == 0 {
                return Err(self.error("positions are 1-based"));
            }
            self.pos += 1;
            return Ok(Predicate::Position(position));
        }

        let mut conditions = vec![self.parse_condition()?];
        while matches!(self.peek(), Some(Token::Name(word)) if word == "and") {
            self.pos += 1;
            conditions.push(self.parse_condition()?);
        }
        Ok(Predicate::Conditions(conditions))
    }

    fn parse_condition(&mut self) -> Result<Condition, PathSyntaxError> {
        let (steps, attribute) = self.parse_relative(false)?;
        let value = if self.peek() == Some(&Token::Eq) {
            self.pos += 1;
            match self.peek() {
                Some(Token::Literal(value)) => {
                    let value = value.clone();
                    self.pos += 1;
                    Some(value)
                }
                _ => return Err(self.error("expected a quoted literal")),
            }
        } else {
            None
        };
        Ok(Condition {
            steps,
            attribute,
            value,
        })
    }

    /// `name` or `prefix:name`; unprefixed elements take the default namespace
    fn parse_qname(&mut self, element: bool) -> Result<QName, PathSyntaxError> {
        let start = self.offset();
        let Some(Token::Name(first)) = self.advance() else {
            return Err(syntax_error(self.expression, start, "expected a name"));
        };

        if self.peek() != Some(&Token::Colon) {
            let namespace = if element {
                self.namespaces.default_namespace()
            } else {
                None
            };
            return Ok(QName::new(namespace, first));
        }

        self.pos += 1;
        let Some(Token::Name(local)) = self.advance() else {
            return Err(self.error("expected a local name after ':'"));
        };
        let namespace = self.namespaces.resolve(&first).ok_or_else(|| {
            syntax_error(
                self.expression,
                start,
                format!("unknown namespace prefix '{first}'"),
            )
        })?;
        Ok(QName::new(Some(namespace), local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<ClinicalDocument xmlns="urn:hl7-org:v3" xmlns:sdtc="urn:hl7-org:sdtc">
  <recordTarget><patientRole><id root="1.1" extension="P1"/></patientRole></recordTarget>
  <component>
    <structuredBody>
      <component>
        <section>
          <templateId root="2.16.840.1.113883.10.20.22.2.5.1"/>
          <code code="11450-4"/>
          <title>Problems</title>
          <entry><act><id root="a1"/></act></entry>
          <entry><act><id root="a2"/></act></entry>
        </section>
      </component>
      <component>
        <section>
          <code code="48765-2"/>
          <entry><act><id root="b1"/></act></entry>
          <sdtc:extra/>
        </section>
      </component>
    </structuredBody>
  </component>
</ClinicalDocument>"#;

    fn tree() -> SourceTree {
        SourceTree::parse_str(DOC).unwrap()
    }

    fn ids(nodes: &[SourceNode<'_>]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| n.attribute("root").unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_attribute_predicate() {
        let tree = tree();
        let expr = PathExpr::cda(
            "component/structuredBody/component/section[code/@code='11450-4']/entry/act/id",
        )
        .unwrap();

        assert_eq!(ids(&expr.select(tree.root())), vec!["a1", "a2"]);
    }

    #[test]
    fn test_nested_path_predicate() {
        let tree = tree();
        let expr = PathExpr::cda(
            "//cda:section[cda:templateId[@root='2.16.840.1.113883.10.20.22.2.5.1']]/cda:title",
        )
        .unwrap();

        let found = expr.select_one(tree.root()).unwrap();
        assert_eq!(found.text(), Some("Problems"));
    }

    #[test]
    fn test_descendants_in_document_order() {
        let tree = tree();
        let expr = PathExpr::cda("//act/id").unwrap();

        assert_eq!(ids(&expr.select(tree.root())), vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_position_is_per_parent() {
        let tree = tree();
        let expr = PathExpr::cda("//section/entry[1]/act/id").unwrap();
        assert_eq!(ids(&expr.select(tree.root())), vec!["a1", "b1"]);

        let second = PathExpr::cda("//section/entry[2]/act/id").unwrap();
        assert_eq!(ids(&second.select(tree.root())), vec!["a2"]);
    }

    #[test]
    fn test_parent_and_self_steps() {
        let tree = tree();
        let id = PathExpr::cda("//act/id[@root='b1']")
            .unwrap()
            .select_one(tree.root())
            .unwrap();

        let section = PathExpr::cda("../../..").unwrap().select_one(id).unwrap();
        assert_eq!(section.local_name(), "section");
        assert_eq!(PathExpr::cda(".").unwrap().select_one(id), Some(id));
    }

    #[test]
    fn test_absolute_path_ignores_context() {
        let tree = tree();
        let id = PathExpr::cda("//act/id").unwrap().select_one(tree.root()).unwrap();
        let patient = PathExpr::cda("/ClinicalDocument/recordTarget/patientRole/id")
            .unwrap()
            .select_one(id)
            .unwrap();

        assert_eq!(patient.attribute("extension"), Some("P1"));
    }

    #[test]
    fn test_attribute_existence_and_conjunction() {
        let tree = tree();
        let expr = PathExpr::cda("//id[@root and @extension='P1']").unwrap();
        assert_eq!(expr.select(tree.root()).len(), 1);

        let none = PathExpr::cda("//id[@nullFlavor]").unwrap();
        assert!(none.select(tree.root()).is_empty());
    }

    #[test]
    fn test_wildcard_and_foreign_namespace() {
        let tree = tree();
        let extra = PathExpr::cda("//section/sdtc:extra").unwrap();
        assert_eq!(extra.select(tree.root()).len(), 1);

        // unprefixed names never match the sdtc namespace
        let unprefixed = PathExpr::cda("//section/extra").unwrap();
        assert!(unprefixed.select(tree.root()).is_empty());

        let children = PathExpr::cda("recordTarget/*").unwrap();
        assert_eq!(children.select(tree.root()).len(), 1);
    }

    #[test]
    fn test_text_predicate() {
        let tree = tree();
        let expr = PathExpr::cda("//section[title='Problems']/code").unwrap();
        assert_eq!(
            expr.select_one(tree.root()).unwrap().attribute("code"),
            Some("11450-4")
        );
    }

    #[test]
    fn test_syntax_errors_carry_offset() {
        let err = PathExpr::cda("section[@code='X'").unwrap_err();
        assert_eq!(err.offset, 17);

        let err = PathExpr::cda("foo:bar").unwrap_err();
        assert_eq!(err.offset, 0);
        insta::assert_snapshot!(
            err.to_string(),
            @"invalid path expression 'foo:bar' at offset 0: unknown namespace prefix 'foo'"
        );

        assert!(PathExpr::cda("entry[0]").is_err());
        assert!(PathExpr::cda("a//..").is_err());
        assert!(PathExpr::cda("a/@code").is_err());
        assert!(PathExpr::cda("a[@code='x]").is_err());
    }
}
