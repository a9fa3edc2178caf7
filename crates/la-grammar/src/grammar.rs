use std::collections::HashMap;

use log::debug;

use crate::element::{ElementPos, GrammarElement, Rule, Stack};
use crate::error::{GrammarError, Result};
use crate::matcher;
use crate::parser::{self, ParsedGrammar};

/// A compiled grammar definition.
///
/// Immutable once built; parser state lives in [`crate::GrammarState`], so
/// one definition can back any number of independent evaluation states.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<Rule>,
    symbols: HashMap<String, usize>,
    root: usize,
    root_name: String,
}

impl Grammar {
    pub const DEFAULT_ROOT: &'static str = "root";

    /// Compile GBNF text using the `root` rule as the start symbol.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_root(text, Self::DEFAULT_ROOT)
    }

    /// Compile GBNF text using `root_name` as the start symbol.
    ///
    /// Fails on syntax errors, undefined rule references, a missing root rule
    /// and left-recursive rules.
    pub fn parse_with_root(text: &str, root_name: &str) -> Result<Self> {
        let parsed = parser::parse(text)?;
        if parsed.rules.is_empty() {
            return Err(GrammarError::Empty);
        }

        let root = parsed
            .symbols
            .get(root_name)
            .copied()
            .filter(|&id| parsed.rules.get(id).is_some_and(|r| !r.is_empty()))
            .ok_or_else(|| GrammarError::MissingRoot(root_name.to_string()))?;

        check_left_recursion(&parsed)?;

        debug!(
            "compiled grammar: {} rules, root '{}'",
            parsed.rules.len(),
            root_name
        );

        Ok(Self {
            rules: parsed.rules,
            symbols: parsed.symbols,
            root,
            root_name: root_name.to_string(),
        })
    }

    /// Compiled rules, indexed by symbol id.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Symbol id of the start rule.
    pub fn root(&self) -> usize {
        self.root
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Symbol id of the rule called `name`.
    pub fn symbol_id(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    /// Stacks for the start of the root rule, one per reachable terminal.
    pub fn initial_stacks(&self) -> Vec<Stack> {
        let root = &self.rules[self.root];
        let mut stacks = Vec::new();
        let mut i = 0;
        loop {
            let mut stack = Vec::new();
            if !root[i].is_end_of_sequence() {
                stack.push(ElementPos {
                    rule: self.root,
                    index: i,
                });
            }
            matcher::advance_stack(&self.rules, stack, &mut stacks);

            while !root[i].is_end_of_sequence() {
                i += 1;
            }
            if root[i] == GrammarElement::Alt {
                i += 1;
            } else {
                break;
            }
        }
        stacks
    }

    /// Whether `text` as a whole is a complete sentence of this grammar.
    pub fn is_text_compatible(&self, text: &str) -> bool {
        let mut stacks = self.initial_stacks();
        for c in text.chars() {
            stacks = matcher::accept(&self.rules, &stacks, c as u32);
            if stacks.is_empty() {
                return false;
            }
        }
        stacks.iter().any(|stack| stack.is_empty())
    }
}

/// Rules that can derive the empty string, computed to a fixpoint.
fn nullable_rules(rules: &[Rule]) -> Vec<bool> {
    let mut nullable = vec![false; rules.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for (id, rule) in rules.iter().enumerate() {
            if nullable[id] || rule.is_empty() {
                continue;
            }
            let mut alternate_nullable = true;
            for element in rule {
                match *element {
                    GrammarElement::End | GrammarElement::Alt => {
                        if alternate_nullable {
                            nullable[id] = true;
                            changed = true;
                            break;
                        }
                        alternate_nullable = true;
                    }
                    GrammarElement::RuleRef(sub) => {
                        alternate_nullable = alternate_nullable && nullable[sub];
                    }
                    _ => alternate_nullable = false,
                }
            }
        }
    }
    nullable
}

fn check_left_recursion(parsed: &ParsedGrammar) -> Result<()> {
    let rules = &parsed.rules;
    let nullable = nullable_rules(rules);
    let mut visited = vec![false; rules.len()];
    let mut in_progress = vec![false; rules.len()];

    for id in 0..rules.len() {
        if !visited[id] && detect_left_recursion(rules, id, &nullable, &mut visited, &mut in_progress)
        {
            return Err(GrammarError::LeftRecursion(parsed.symbol_name(id)));
        }
    }
    Ok(())
}

fn detect_left_recursion(
    rules: &[Rule],
    id: usize,
    nullable: &[bool],
    visited: &mut [bool],
    in_progress: &mut [bool],
) -> bool {
    if in_progress[id] {
        return true;
    }
    if visited[id] {
        return false;
    }
    in_progress[id] = true;

    // follow the leftmost non-terminals, and the next ones while the previous may be empty
    let mut at_left_edge = true;
    for element in &rules[id] {
        match *element {
            GrammarElement::RuleRef(sub) if at_left_edge => {
                if detect_left_recursion(rules, sub, nullable, visited, in_progress) {
                    return true;
                }
                at_left_edge = nullable[sub];
            }
            GrammarElement::End | GrammarElement::Alt => at_left_edge = true,
            _ => at_left_edge = false,
        }
    }

    in_progress[id] = false;
    visited[id] = true;
    false
}
