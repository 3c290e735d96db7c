//! Markup literal lowering.
//!
//! Component source is Rhai with JSX-like markup literals. This pass rewrites
//! every literal into plain Rhai calls and copies everything else through
//! untouched:
//!
//! ```text
//! <div class="card">{title}</div>   →  el("div", #{"class": "card"}, [title])
//! <Card title="x">body</Card>       →  Card(#{"title": "x", "children": ["body"]})
//! <><b/>text</>                     →  fragment([el("b", #{}, []), "text"])
//! ```
//!
//! A `<` only opens markup where an expression may start, so `a < b` keeps
//! meaning "less than". String literals and comments are copied verbatim.
//! Newlines swallowed by a literal are re-emitted after it, which keeps the
//! line numbers of later Rhai parse errors pointing at the author's text.

use super::artifact::rhai_string_literal;
use std::fmt;

/// Characters after which `<` starts markup rather than a comparison.
const EXPRESSION_PUNCT: &[char] = &[
    '(', '[', '{', ',', '=', ':', ';', '|', '!', '?', '&', '+', '-', '*', '/', '%', '^', '~', '>',
];

/// Keywords after which `<` starts markup.
const EXPRESSION_KEYWORDS: &[&str] = &["return", "throw"];

/// A compile failure with its position in the author's text when known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{} (line {}, position {})", self.message, line, column)
            }
            (Some(line), None) => write!(f, "{} (line {})", self.message, line),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

type Result<T> = std::result::Result<T, CompileError>;

/// Lower all markup literals in `source` to plain Rhai.
///
/// Elements may nest at most `max_depth` deep; deeper input is rejected
/// before it can exhaust the stack.
pub fn lower(source: &str, max_depth: usize) -> Result<String> {
    let mut lowerer = Lowerer {
        src: source.chars().collect(),
        pos: 0,
        depth: 0,
        max_depth,
    };
    Ok(lowerer.code(false)?.text)
}

/// Lowered code plus whether it held anything besides whitespace and comments.
struct Segment {
    text: String,
    significant: bool,
}

struct Lowerer {
    src: Vec<char>,
    pos: usize,
    /// Elements currently open.
    depth: usize,
    max_depth: usize,
}

impl Lowerer {
    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    fn error_at(&self, idx: usize, message: impl Into<String>) -> CompileError {
        let before = &self.src[..idx.min(self.src.len())];
        let line = before.iter().filter(|&&c| c == '\n').count() + 1;
        let column = before.iter().rev().take_while(|&&c| c != '\n').count() + 1;
        CompileError::at(message, line, column)
    }

    /// Copy code through, lowering markup found in expression position.
    ///
    /// With `nested` set the cursor sits just past the `{` of an expression
    /// hole, and scanning stops after the matching `}`.
    fn code(&mut self, nested: bool) -> Result<Segment> {
        let open = self.pos.saturating_sub(1);
        let mut out = String::new();
        let mut depth = 0usize;
        let mut last: Option<char> = None;
        let mut word = String::new();
        let mut significant = false;

        loop {
            let Some(c) = self.peek() else {
                if nested {
                    return Err(self.error_at(open, "Unterminated {expression} in markup"));
                }
                break;
            };

            match c {
                '"' | '\'' | '`' => {
                    self.quoted(c, &mut out);
                    last = Some(c);
                    word.clear();
                    significant = true;
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        out.push(c);
                        self.pos += 1;
                    }
                }
                '/' if self.peek_at(1) == Some('*') => self.block_comment(&mut out),
                '<' if self.starts_markup(last, &word) => {
                    let start = self.pos;
                    let lowered = self.element()?;
                    out.push_str(&lowered);
                    let swallowed = count_newlines(&self.src[start..self.pos]);
                    let emitted = lowered.matches('\n').count();
                    for _ in emitted..swallowed {
                        out.push('\n');
                    }
                    last = Some(')');
                    word.clear();
                    significant = true;
                }
                '{' => {
                    depth += 1;
                    out.push(c);
                    self.pos += 1;
                    last = Some(c);
                    word.clear();
                    significant = true;
                }
                '}' => {
                    self.pos += 1;
                    if nested && depth == 0 {
                        break;
                    }
                    depth = depth.saturating_sub(1);
                    out.push(c);
                    last = Some(c);
                    word.clear();
                    significant = true;
                }
                c if c.is_whitespace() => {
                    out.push(c);
                    self.pos += 1;
                }
                c => {
                    if is_ident_char(c) {
                        let continues = last.is_some_and(is_ident_char)
                            && self.pos > 0
                            && is_ident_char(self.src[self.pos - 1]);
                        if !continues {
                            word.clear();
                        }
                        word.push(c);
                    } else {
                        word.clear();
                    }
                    out.push(c);
                    self.pos += 1;
                    last = Some(c);
                    significant = true;
                }
            }
        }

        Ok(Segment {
            text: out,
            significant,
        })
    }

    fn starts_markup(&self, last: Option<char>, word: &str) -> bool {
        let opens_tag = matches!(self.peek_at(1), Some(c) if c.is_alphabetic() || c == '>');
        if !opens_tag {
            return false;
        }
        match last {
            None => true,
            Some(c) if EXPRESSION_PUNCT.contains(&c) => true,
            Some(_) => EXPRESSION_KEYWORDS.contains(&word),
        }
    }

    /// Copy a quoted literal. Unterminated literals are left for the Rhai
    /// parser to report.
    fn quoted(&mut self, quote: char, out: &mut String) {
        out.push(quote);
        self.pos += 1;
        while let Some(c) = self.peek() {
            out.push(c);
            self.pos += 1;
            if c == '\\' {
                if let Some(escaped) = self.peek() {
                    out.push(escaped);
                    self.pos += 1;
                }
            } else if c == quote {
                return;
            }
        }
    }

    fn block_comment(&mut self, out: &mut String) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            if c == '/' && self.peek_at(1) == Some('*') {
                depth += 1;
                out.push_str("/*");
                self.pos += 2;
            } else if c == '*' && self.peek_at(1) == Some('/') {
                depth -= 1;
                out.push_str("*/");
                self.pos += 2;
                if depth == 0 {
                    return;
                }
            } else {
                out.push(c);
                self.pos += 1;
            }
        }
    }

    /// Lower one element or fragment. The cursor sits on its `<`.
    fn element(&mut self) -> Result<String> {
        if self.depth >= self.max_depth {
            return Err(self.error_at(
                self.pos,
                format!("Markup nested too deeply (limit {})", self.max_depth),
            ));
        }
        self.depth += 1;
        let lowered = self.element_body();
        self.depth -= 1;
        lowered
    }

    fn element_body(&mut self) -> Result<String> {
        let start = self.pos;
        self.pos += 1;

        if self.peek() == Some('>') {
            self.pos += 1;
            let children = self.children(start, "")?;
            return Ok(format!("fragment([{}])", children.join(", ")));
        }

        let name = self.name();
        let mut attrs: Vec<(String, String)> = Vec::new();
        let self_closing = loop {
            self.skip_whitespace();
            match self.peek() {
                None => {
                    return Err(self.error_at(start, format!("Unterminated element <{}>", name)))
                }
                Some('/') => {
                    self.pos += 1;
                    if self.peek() != Some('>') {
                        return Err(self.error_at(
                            self.pos,
                            format!("Expected '>' after '/' in <{}>", name),
                        ));
                    }
                    self.pos += 1;
                    break true;
                }
                Some('>') => {
                    self.pos += 1;
                    break false;
                }
                Some(c) if is_attr_char(c) => {
                    let at = self.pos;
                    let (key, value) = self.attribute()?;
                    if attrs.iter().any(|(existing, _)| *existing == key) {
                        return Err(self.error_at(
                            at,
                            format!("Duplicate attribute '{}' in <{}>", key, name),
                        ));
                    }
                    attrs.push((key, value));
                }
                Some(c) => {
                    return Err(self.error_at(
                        self.pos,
                        format!("Malformed attribute in <{}>: unexpected '{}'", name, c),
                    ))
                }
            }
        };

        let children = if self_closing {
            Vec::new()
        } else {
            self.children(start, &name)?
        };

        let mut props: Vec<String> = attrs
            .iter()
            .map(|(key, value)| format!("{}: {}", rhai_string_literal(key), value))
            .collect();

        if !is_component(&name) {
            return Ok(format!(
                "el({}, #{{{}}}, [{}])",
                rhai_string_literal(&name),
                props.join(", "),
                children.join(", ")
            ));
        }

        if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(self.error_at(start + 1, format!("Invalid component name '{}'", name)));
        }
        let explicit_children = attrs.iter().any(|(key, _)| key == "children");
        if explicit_children && !children.is_empty() {
            return Err(self.error_at(
                start,
                format!("<{}> has both a children attribute and child content", name),
            ));
        }
        if !explicit_children {
            props.push(format!("\"children\": [{}]", children.join(", ")));
        }
        Ok(format!("{}(#{{{}}})", name, props.join(", ")))
    }

    fn attribute(&mut self) -> Result<(String, String)> {
        let mut key = String::new();
        while let Some(c) = self.peek().filter(|&c| is_attr_char(c)) {
            key.push(c);
            self.pos += 1;
        }
        self.skip_whitespace();
        if self.peek() != Some('=') {
            return Ok((key, "true".to_string()));
        }
        self.pos += 1;
        self.skip_whitespace();

        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                let begin = self.pos;
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.peek() {
                        None => {
                            return Err(self.error_at(
                                begin,
                                format!("Unterminated value for attribute '{}'", key),
                            ))
                        }
                        Some(c) if c == quote => {
                            self.pos += 1;
                            break;
                        }
                        Some(c) => {
                            value.push(c);
                            self.pos += 1;
                        }
                    }
                }
                Ok((key, rhai_string_literal(&decode_entities(&value))))
            }
            Some('{') => {
                let begin = self.pos;
                self.pos += 1;
                let segment = self.code(true)?;
                if !segment.significant {
                    return Err(self.error_at(
                        begin,
                        format!("Attribute '{}' has an empty expression", key),
                    ));
                }
                Ok((key, parenthesize(&segment.text)))
            }
            _ => Err(self.error_at(
                self.pos,
                format!(
                    "Malformed attribute '{}': expected a quoted value or {{expression}}",
                    key
                ),
            )),
        }
    }

    /// Lower children up to and including the closing tag for `tag`
    /// (empty for fragments).
    fn children(&mut self, start: usize, tag: &str) -> Result<Vec<String>> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => {
                    let shown = if tag.is_empty() { "<>".to_string() } else { format!("<{}>", tag) };
                    return Err(self.error_at(start, format!("Unterminated element {}", shown)));
                }
                Some('<') if self.peek_at(1) == Some('/') => {
                    let close_at = self.pos;
                    self.pos += 2;
                    self.skip_whitespace();
                    let name = self.name();
                    self.skip_whitespace();
                    if self.peek() != Some('>') {
                        return Err(self.error_at(
                            self.pos,
                            format!("Expected '>' to finish closing tag </{}", name),
                        ));
                    }
                    self.pos += 1;
                    if name != tag {
                        return Err(self.error_at(
                            close_at,
                            format!(
                                "Mismatched closing tag: expected </{}> but found </{}>",
                                tag, name
                            ),
                        ));
                    }
                    return Ok(children);
                }
                Some('<') => children.push(self.element()?),
                Some('{') => {
                    self.pos += 1;
                    let segment = self.code(true)?;
                    if segment.significant {
                        children.push(parenthesize(&segment.text));
                    }
                }
                Some(_) => {
                    let begin = self.pos;
                    while let Some(c) = self.peek() {
                        if c == '<' || c == '{' {
                            break;
                        }
                        self.pos += 1;
                    }
                    let raw: String = self.src[begin..self.pos].iter().collect();
                    if let Some(text) = jsx_text(&raw) {
                        children.push(rhai_string_literal(&decode_entities(&text)));
                    }
                }
            }
        }
    }

    fn name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self
            .peek()
            .filter(|&c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            name.push(c);
            self.pos += 1;
        }
        name
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_attr_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | ':')
}

fn is_component(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn count_newlines(chars: &[char]) -> usize {
    chars.iter().filter(|&&c| c == '\n').count()
}

/// Wrap an expression hole. A trailing line comment would swallow the
/// closing paren, so it gets its own line.
fn parenthesize(code: &str) -> String {
    let code = code.trim();
    if code.contains("//") {
        format!("({}\n)", code)
    } else {
        format!("({})", code)
    }
}

/// Collapse element text the way JSX does: lines are trimmed where they meet
/// a line break, blank lines vanish, and the rest join with one space.
fn jsx_text(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len() - 1;
    let parts: Vec<&str> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let mut line = *line;
            if i != 0 {
                line = line.trim_start();
            }
            if i != last {
                line = line.trim_end();
            }
            line
        })
        .filter(|line| !line.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(source: &str) -> Result<String> {
        super::lower(source, 64)
    }

    #[test]
    fn test_element_with_attributes() {
        assert_eq!(
            lower(r#"render(<div class="card" id='x'>hi</div>);"#).unwrap(),
            r#"render(el("div", #{"class": "card", "id": "x"}, ["hi"]));"#
        );
    }

    #[test]
    fn test_flag_and_expression_attributes() {
        assert_eq!(
            lower("let i = <input disabled value={1 + 2}/>;").unwrap(),
            r#"let i = el("input", #{"disabled": true, "value": (1 + 2)}, []);"#
        );
    }

    #[test]
    fn test_component_call() {
        assert_eq!(
            lower(r#"<Card title="x">body</Card>"#).unwrap(),
            r#"Card(#{"title": "x", "children": ["body"]})"#
        );
        assert_eq!(lower("<Spacer/>").unwrap(), r#"Spacer(#{"children": []})"#);
    }

    #[test]
    fn test_fragment() {
        assert_eq!(
            lower("<><b/>text</>").unwrap(),
            r#"fragment([el("b", #{}, []), "text"])"#
        );
    }

    #[test]
    fn test_nested_expression_holes() {
        assert_eq!(
            lower("<ul>{items.map(|i| <li>{ i }</li>)}</ul>").unwrap(),
            r#"el("ul", #{}, [(items.map(|i| el("li", #{}, [(i)])))])"#
        );
    }

    #[test]
    fn test_empty_and_comment_holes_dropped() {
        assert_eq!(
            lower("<p>{/* note */}{ }a</p>").unwrap(),
            r#"el("p", #{}, ["a"])"#
        );
    }

    #[test]
    fn test_return_keyword_opens_markup() {
        assert_eq!(
            lower("fn f() { return <b/>; }").unwrap(),
            r#"fn f() { return el("b", #{}, []); }"#
        );
    }

    #[test]
    fn test_comparisons_untouched() {
        for source in ["let x = a < b;", "if a<b { 1 }", "x.len()<3", "a << 2", "a <= b"] {
            assert_eq!(lower(source).unwrap(), source);
        }
    }

    #[test]
    fn test_strings_and_comments_untouched() {
        for source in [
            r#"let s = "<div>";"#,
            "let c = '<';",
            "let t = `<p>${x}</p>`;",
            "// <div>\nlet a = 1;",
            "/* outer /* <inner> */ <still comment> */ 1",
            r#"let s = "esc \" <b>";"#,
        ] {
            assert_eq!(lower(source).unwrap(), source);
        }
    }

    #[test]
    fn test_jsx_text_rules() {
        assert_eq!(
            lower("<p>\n  hello\n\n  world  \n</p>").unwrap(),
            "el(\"p\", #{}, [\"hello world\"])\n\n\n\n"
        );
        assert_eq!(lower("<b> hi </b>").unwrap(), r#"el("b", #{}, [" hi "])"#);
        assert_eq!(lower("<b>a &amp; b</b>").unwrap(), r#"el("b", #{}, ["a & b"])"#);
    }

    #[test]
    fn test_newlines_preserved_after_literal() {
        let lowered = lower("let a = <div\n  id=\"x\"\n/>;\nlet b = 1;").unwrap();
        assert_eq!(lowered.lines().count(), 4);
        assert_eq!(lowered.lines().last(), Some("let b = 1;"));
    }

    #[test]
    fn test_mismatched_closing_tag() {
        let err = lower("<a></b>").unwrap_err();
        assert!(err.message.contains("Mismatched closing tag"));
        assert_eq!((err.line, err.column), (Some(1), Some(4)));
        assert_eq!(
            err.to_string(),
            "Mismatched closing tag: expected </a> but found </b> (line 1, position 4)"
        );
    }

    #[test]
    fn test_unterminated_element() {
        let err = lower("let x = 1;\nlet y = <div>\n").unwrap_err();
        assert_eq!(err.message, "Unterminated element <div>");
        assert_eq!((err.line, err.column), (Some(2), Some(9)));
    }

    #[test]
    fn test_malformed_attribute() {
        let err = lower("<a href=x/>").unwrap_err();
        assert!(err.message.starts_with("Malformed attribute 'href'"));
        let err = lower("<a \"x\"/>").unwrap_err();
        assert!(err.message.starts_with("Malformed attribute in <a>"));
    }

    #[test]
    fn test_unterminated_expression() {
        let err = lower("<a>{1 + </a>").unwrap_err();
        assert_eq!(err.message, "Unterminated {expression} in markup");
        assert_eq!(err.column, Some(4));
    }

    #[test]
    fn test_duplicate_attribute() {
        let err = lower(r#"<a x="1" x="2"/>"#).unwrap_err();
        assert!(err.message.contains("Duplicate attribute 'x'"));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let err = lower(&"<a>".repeat(10_000)).unwrap_err();
        assert_eq!(err.message, "Markup nested too deeply (limit 64)");
        assert_eq!((err.line, err.column), (Some(1), Some(64 * 3 + 1)));

        let nested = format!("{}{}", "<a>{".repeat(200), "}</a>".repeat(200));
        assert!(lower(&nested).is_err());
    }

    #[test]
    fn test_nesting_at_limit_accepted() {
        let source = format!("{}{}", "<a>".repeat(64), "</a>".repeat(64));
        let lowered = lower(&source).unwrap();
        assert_eq!(lowered.matches("el(\"a\"").count(), 64);
    }

    #[test]
    fn test_error_display_without_position() {
        assert_eq!(CompileError::new("boom").to_string(), "boom");
    }
}
