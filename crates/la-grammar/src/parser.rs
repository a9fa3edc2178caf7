use std::collections::HashMap;

use crate::element::{GrammarElement, Rule};
use crate::error::{GrammarError, Result};

/// Output of the GBNF text parser: rules indexed by symbol id.
#[derive(Debug, Clone, Default)]
pub struct ParsedGrammar {
    pub symbols: HashMap<String, usize>,
    pub rules: Vec<Rule>,
}

impl ParsedGrammar {
    /// Reverse lookup of a symbol name, used for error messages.
    pub fn symbol_name(&self, id: usize) -> String {
        self.symbols
            .iter()
            .find(|(_, &v)| v == id)
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| format!("#{}", id))
    }
}

/// Parse GBNF grammar text into a flat rule set.
///
/// Supported syntax:
/// - `name ::= alternates` (one rule per line, `|` separates alternates)
/// - string literals `"..."` and character classes `[a-z]`, `[^"\\]`
/// - `.` for any code point, `( ... )` groups
/// - repetition with `*`, `+`, `?`, `{m}`, `{m,}` and `{m,n}`
/// - `#` comments, and newlines inside groups
///
/// Every rule reference must resolve to a defined rule.
pub fn parse(text: &str) -> Result<ParsedGrammar> {
    Parser::new(text).parse()
}

struct Parser {
    src: Vec<char>,
    pos: usize,
    symbols: HashMap<String, usize>,
    rules: Vec<Rule>,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            src: text.chars().collect(),
            pos: 0,
            symbols: HashMap::new(),
            rules: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> GrammarError {
        GrammarError::Parse {
            pos: self.pos,
            message: message.into(),
        }
    }

    fn symbol_id(&mut self, name: &str) -> usize {
        let next = self.symbols.len();
        *self.symbols.entry(name.to_string()).or_insert(next)
    }

    fn generate_symbol_id(&mut self, base: &str) -> usize {
        let id = self.symbols.len();
        self.symbols.insert(format!("{}_{}", base, id), id);
        id
    }

    fn add_rule(&mut self, id: usize, rule: Rule) {
        if self.rules.len() <= id {
            self.rules.resize(id + 1, Vec::new());
        }
        self.rules[id] = rule;
    }

    fn skip_space(&mut self, newline_ok: bool) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' => self.pos += 1,
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\r' || c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '\r' | '\n' if newline_ok => self.pos += 1,
                _ => break,
            }
        }
    }

    fn parse_name(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().is_some_and(is_word_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expecting name"));
        }
        Ok(self.src[start..self.pos].iter().collect())
    }

    fn parse_int(&mut self) -> Result<usize> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expecting an int"));
        }
        let digits: String = self.src[start..self.pos].iter().collect();
        digits
            .parse()
            .map_err(|_| self.error(format!("integer out of range: {}", digits)))
    }

    fn parse_hex(&mut self, size: usize) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..size {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error(format!("expecting {} hex chars", size)))?;
            value = (value << 4) | digit;
            self.pos += 1;
        }
        Ok(value)
    }

    fn parse_char(&mut self) -> Result<u32> {
        match self.bump() {
            Some('\\') => match self.bump() {
                Some('x') => self.parse_hex(2),
                Some('u') => self.parse_hex(4),
                Some('U') => self.parse_hex(8),
                Some('t') => Ok('\t' as u32),
                Some('r') => Ok('\r' as u32),
                Some('n') => Ok('\n' as u32),
                Some(c @ ('\\' | '"' | '[' | ']')) => Ok(c as u32),
                Some(c) => {
                    self.pos -= 1;
                    Err(self.error(format!("unknown escape \\{}", c)))
                }
                None => Err(self.error("unexpected end of input")),
            },
            Some(c) => Ok(c as u32),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse(mut self) -> Result<ParsedGrammar> {
        self.skip_space(true);
        while self.peek().is_some() {
            self.parse_rule()?;
        }

        let parsed = ParsedGrammar {
            symbols: self.symbols,
            rules: self.rules,
        };

        for rule in &parsed.rules {
            for element in rule {
                if let GrammarElement::RuleRef(id) = *element {
                    if parsed.rules.get(id).map_or(true, |r| r.is_empty()) {
                        return Err(GrammarError::UndefinedRule(parsed.symbol_name(id)));
                    }
                }
            }
        }

        Ok(parsed)
    }

    fn parse_rule(&mut self) -> Result<()> {
        let name = self.parse_name()?;
        self.skip_space(false);
        let rule_id = self.symbol_id(&name);

        if !(self.peek() == Some(':') && self.peek_at(1) == Some(':') && self.peek_at(2) == Some('='))
        {
            return Err(self.error("expecting ::="));
        }
        self.pos += 3;
        self.skip_space(true);

        self.parse_alternates(&name, rule_id, false)?;

        match self.peek() {
            Some('\r') => {
                self.pos += 1;
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
            }
            Some('\n') => self.pos += 1,
            None => {}
            Some(_) => return Err(self.error("expecting newline or end")),
        }
        self.skip_space(true);
        Ok(())
    }

    fn parse_alternates(&mut self, rule_name: &str, rule_id: usize, nested: bool) -> Result<()> {
        let mut rule = Vec::new();
        self.parse_sequence(rule_name, &mut rule, nested)?;
        while self.peek() == Some('|') {
            rule.push(GrammarElement::Alt);
            self.pos += 1;
            self.skip_space(true);
            self.parse_sequence(rule_name, &mut rule, nested)?;
        }
        rule.push(GrammarElement::End);
        self.add_rule(rule_id, rule);
        Ok(())
    }

    fn parse_sequence(&mut self, rule_name: &str, out: &mut Rule, nested: bool) -> Result<()> {
        // start of the most recent symbol, used by repetition operators
        let mut last_sym_start = out.len();

        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.pos += 1;
                    last_sym_start = out.len();
                    while self.peek() != Some('"') {
                        if self.peek().is_none() {
                            return Err(self.error("unexpected end of input"));
                        }
                        let c = self.parse_char()?;
                        out.push(GrammarElement::Char(c));
                    }
                    self.pos += 1;
                    self.skip_space(nested);
                }
                '[' => {
                    self.pos += 1;
                    let negated = self.peek() == Some('^');
                    if negated {
                        self.pos += 1;
                    }
                    last_sym_start = out.len();
                    while self.peek() != Some(']') {
                        if self.peek().is_none() {
                            return Err(self.error("unexpected end of input"));
                        }
                        let c = self.parse_char()?;
                        let element = if last_sym_start < out.len() {
                            GrammarElement::CharAlt(c)
                        } else if negated {
                            GrammarElement::CharNot(c)
                        } else {
                            GrammarElement::Char(c)
                        };
                        out.push(element);
                        if self.peek() == Some('-') && self.peek_at(1).is_some_and(|n| n != ']') {
                            self.pos += 1;
                            let upper = self.parse_char()?;
                            out.push(GrammarElement::CharRangeUpper(upper));
                        }
                    }
                    self.pos += 1;
                    self.skip_space(nested);
                }
                c if is_word_char(c) => {
                    let name = self.parse_name()?;
                    let ref_id = self.symbol_id(&name);
                    self.skip_space(nested);
                    last_sym_start = out.len();
                    out.push(GrammarElement::RuleRef(ref_id));
                }
                '(' => {
                    self.pos += 1;
                    self.skip_space(true);
                    let sub_id = self.generate_symbol_id(rule_name);
                    self.parse_alternates(rule_name, sub_id, true)?;
                    last_sym_start = out.len();
                    out.push(GrammarElement::RuleRef(sub_id));
                    if self.peek() != Some(')') {
                        return Err(self.error("expecting ')'"));
                    }
                    self.pos += 1;
                    self.skip_space(nested);
                }
                '.' => {
                    last_sym_start = out.len();
                    out.push(GrammarElement::CharAny);
                    self.pos += 1;
                    self.skip_space(nested);
                }
                '*' | '+' | '?' => {
                    if last_sym_start == out.len() {
                        return Err(self.error(format!("expecting preceding item to {}", c)));
                    }
                    self.pos += 1;
                    self.skip_space(nested);
                    let (min, max) = match c {
                        '*' => (0, None),
                        '+' => (1, None),
                        _ => (0, Some(1)),
                    };
                    self.handle_repetitions(rule_name, out, last_sym_start, min, max);
                }
                '{' => {
                    if last_sym_start == out.len() {
                        return Err(self.error("expecting preceding item to {"));
                    }
                    self.pos += 1;
                    self.skip_space(nested);
                    let min = self.parse_int()?;
                    self.skip_space(nested);
                    let max = match self.peek() {
                        Some('}') => Some(min),
                        Some(',') => {
                            self.pos += 1;
                            self.skip_space(nested);
                            let max = if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                                let max = self.parse_int()?;
                                self.skip_space(nested);
                                Some(max)
                            } else {
                                None
                            };
                            if self.peek() != Some('}') {
                                return Err(self.error("expecting '}'"));
                            }
                            max
                        }
                        _ => return Err(self.error("expecting ','")),
                    };
                    self.pos += 1;
                    self.skip_space(nested);
                    if max.is_some_and(|max| max < min) {
                        return Err(self.error("repetition upper bound is below lower bound"));
                    }
                    self.handle_repetitions(rule_name, out, last_sym_start, min, max);
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Rewrite the last symbol `S` of `out` for `S{min,max}`.
    ///
    /// `S{m,n}` becomes `S S ... S` (m times) followed by a chain of optional
    /// rules `S_1 ::= S S_2 |`, and an unbounded tail becomes `S_1 ::= S S_1 |`.
    fn handle_repetitions(
        &mut self,
        rule_name: &str,
        out: &mut Rule,
        last_sym_start: usize,
        min: usize,
        max: Option<usize>,
    ) {
        let prev: Rule = out[last_sym_start..].to_vec();
        if min == 0 {
            out.truncate(last_sym_start);
        } else {
            for _ in 1..min {
                out.extend_from_slice(&prev);
            }
        }

        let n_opt = match max {
            Some(max) => max - min,
            None => 1,
        };
        let mut last_rec_rule_id = 0;
        for i in 0..n_opt {
            let mut rec_rule = prev.clone();
            let rec_rule_id = self.generate_symbol_id(rule_name);
            if max.is_none() {
                rec_rule.push(GrammarElement::RuleRef(rec_rule_id));
            } else if i > 0 {
                rec_rule.push(GrammarElement::RuleRef(last_rec_rule_id));
            }
            rec_rule.push(GrammarElement::Alt);
            rec_rule.push(GrammarElement::End);
            self.add_rule(rec_rule_id, rec_rule);
            last_rec_rule_id = rec_rule_id;
        }
        if n_opt > 0 {
            out.push(GrammarElement::RuleRef(last_rec_rule_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GrammarElement::*;

    fn rule<'a>(parsed: &'a ParsedGrammar, name: &str) -> &'a Rule {
        &parsed.rules[parsed.symbols[name]]
    }

    #[test]
    fn test_parse_literal_and_alternates() {
        let parsed = parse(r#"root ::= "ab" | "c""#).unwrap();
        assert_eq!(
            rule(&parsed, "root"),
            &vec![Char('a' as u32), Char('b' as u32), Alt, Char('c' as u32), End]
        );
    }

    #[test]
    fn test_parse_char_class() {
        let parsed = parse("root ::= [a-z_]").unwrap();
        assert_eq!(
            rule(&parsed, "root"),
            &vec![
                Char('a' as u32),
                CharRangeUpper('z' as u32),
                CharAlt('_' as u32),
                End
            ]
        );
    }

    #[test]
    fn test_parse_negated_class_and_any() {
        let parsed = parse(r#"root ::= [^"\\] ."#).unwrap();
        assert_eq!(
            rule(&parsed, "root"),
            &vec![CharNot('"' as u32), CharAlt('\\' as u32), CharAny, End]
        );
    }

    #[test]
    fn test_parse_escapes() {
        let parsed = parse(r#"root ::= "\x41\u00e9\n\t\"""#).unwrap();
        assert_eq!(
            rule(&parsed, "root"),
            &vec![Char(0x41), Char(0xe9), Char(10), Char(9), Char('"' as u32), End]
        );
    }

    #[test]
    fn test_parse_rule_refs_and_comments() {
        let text = "# leading comment\nroot ::= item item # trailing\nitem ::= \"x\"\n";
        let parsed = parse(text).unwrap();
        let item = parsed.symbols["item"];
        assert_eq!(rule(&parsed, "root"), &vec![RuleRef(item), RuleRef(item), End]);
        assert_eq!(rule(&parsed, "item"), &vec![Char('x' as u32), End]);
    }

    #[test]
    fn test_parse_group_spans_lines() {
        let text = "root ::= (\n  \"a\"\n  | \"b\"\n)\n";
        let parsed = parse(text).unwrap();
        let root = rule(&parsed, "root");
        assert_eq!(root.len(), 2);
        let RuleRef(group) = root[0] else {
            panic!("expected group reference, got {:?}", root[0]);
        };
        assert_eq!(
            parsed.rules[group],
            vec![Char('a' as u32), Alt, Char('b' as u32), End]
        );
    }

    #[test]
    fn test_parse_star_creates_recursive_rule() {
        let parsed = parse(r#"root ::= "a"*"#).unwrap();
        let root = rule(&parsed, "root");
        let RuleRef(rec) = root[0] else {
            panic!("expected repetition rule, got {:?}", root[0]);
        };
        assert_eq!(parsed.rules[rec], vec![Char('a' as u32), RuleRef(rec), Alt, End]);
    }

    #[test]
    fn test_parse_bounded_repetition() {
        let parsed = parse(r#"root ::= "a"{2,3}"#).unwrap();
        let root = rule(&parsed, "root");
        assert_eq!(root[0], Char('a' as u32));
        assert_eq!(root[1], Char('a' as u32));
        let RuleRef(opt) = root[2] else {
            panic!("expected optional tail, got {:?}", root[2]);
        };
        assert_eq!(parsed.rules[opt], vec![Char('a' as u32), Alt, End]);
    }

    #[test]
    fn test_parse_exact_repetition_has_no_tail() {
        let parsed = parse(r#"root ::= [0-9]{3}"#).unwrap();
        let root = rule(&parsed, "root");
        assert_eq!(root.len(), 7);
        assert_eq!(root[6], End);
    }

    #[test]
    fn test_parse_undefined_rule() {
        let err = parse("root ::= missing").unwrap_err();
        assert_eq!(err, GrammarError::UndefinedRule("missing".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("root = \"a\""), Err(GrammarError::Parse { .. })));
        assert!(matches!(parse("root ::= \"a"), Err(GrammarError::Parse { .. })));
        assert!(matches!(parse("root ::= \"\\q\""), Err(GrammarError::Parse { .. })));
        assert!(matches!(parse("root ::= *"), Err(GrammarError::Parse { .. })));
        assert!(matches!(parse("root ::= \"a\"{3,1}"), Err(GrammarError::Parse { .. })));
        assert!(matches!(parse("root ::= (\"a\""), Err(GrammarError::Parse { .. })));
    }
}
