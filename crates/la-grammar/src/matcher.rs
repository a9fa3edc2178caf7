use std::collections::HashSet;

use crate::element::{ElementPos, GrammarElement, Rule, Stack};
use crate::utf8::PartialUtf8;

/// Match `chr` against the character class starting at `rule[pos]`.
///
/// Returns whether it matched and the position just past the class.
pub fn match_char(rule: &Rule, pos: usize, chr: u32) -> (bool, usize) {
    let is_positive = matches!(rule[pos], GrammarElement::Char(_) | GrammarElement::CharAny);
    let mut found = false;
    let mut pos = pos;

    loop {
        if let Some(GrammarElement::CharRangeUpper(upper)) = rule.get(pos + 1) {
            found = found || (rule[pos].code_point() <= chr && chr <= *upper);
            pos += 2;
        } else if rule[pos] == GrammarElement::CharAny {
            found = true;
            pos += 1;
        } else {
            found = found || rule[pos].code_point() == chr;
            pos += 1;
        }
        if !rule.get(pos).is_some_and(GrammarElement::is_char_alt) {
            break;
        }
    }

    (found == is_positive, pos)
}

/// Whether some completion of the pending `partial` sequence could match the
/// character class starting at `rule[pos]`.
pub fn match_partial_char(rule: &Rule, pos: usize, partial: PartialUtf8) -> bool {
    let is_positive = matches!(rule[pos], GrammarElement::Char(_) | GrammarElement::CharAny);
    let n_remain = u32::from(partial.n_remain);
    let value = partial.value;

    // overlong two-byte sequence
    if n_remain == 1 && value < 2 {
        return false;
    }

    let mut low = value << (n_remain * 6);
    let high = low | ((1 << (n_remain * 6)) - 1);
    if low == 0 {
        if n_remain == 2 {
            low = 1 << 11;
        } else if n_remain == 3 {
            low = 1 << 16;
        }
    }

    let mut pos = pos;
    loop {
        if let Some(GrammarElement::CharRangeUpper(upper)) = rule.get(pos + 1) {
            if low <= *upper && high >= rule[pos].code_point() {
                return is_positive;
            }
            pos += 2;
        } else if rule[pos] == GrammarElement::CharAny {
            return true;
        } else {
            let cp = rule[pos].code_point();
            if low <= cp && cp <= high {
                return is_positive;
            }
            pos += 1;
        }
        if !rule.get(pos).is_some_and(GrammarElement::is_char_alt) {
            break;
        }
    }

    !is_positive
}

/// Expand `stack` until every resulting stack has a terminal on top (or is
/// empty), appending the results to `new_stacks` without duplicates.
///
/// Requires a grammar without left recursion.
pub fn advance_stack(rules: &[Rule], stack: Stack, new_stacks: &mut Vec<Stack>) {
    let mut todo = vec![stack];
    let mut seen: HashSet<Stack> = HashSet::new();

    while let Some(stack) = todo.pop() {
        if !seen.insert(stack.clone()) {
            continue;
        }

        let Some(&pos) = stack.last() else {
            if !new_stacks.contains(&stack) {
                new_stacks.push(stack);
            }
            continue;
        };

        match rules[pos.rule][pos.index] {
            GrammarElement::RuleRef(sub_id) => {
                let subrule = &rules[sub_id];
                let continues = !rules[pos.rule][pos.index + 1].is_end_of_sequence();
                let mut i = 0;
                loop {
                    let mut next = stack[..stack.len() - 1].to_vec();
                    if continues {
                        next.push(ElementPos {
                            rule: pos.rule,
                            index: pos.index + 1,
                        });
                    }
                    if !subrule[i].is_end_of_sequence() {
                        next.push(ElementPos {
                            rule: sub_id,
                            index: i,
                        });
                    }
                    todo.push(next);

                    while !subrule[i].is_end_of_sequence() {
                        i += 1;
                    }
                    if subrule[i] == GrammarElement::Alt {
                        i += 1;
                    } else {
                        break;
                    }
                }
            }
            GrammarElement::Char(_) | GrammarElement::CharNot(_) | GrammarElement::CharAny => {
                if !new_stacks.contains(&stack) {
                    new_stacks.push(stack);
                }
            }
            // never on top of a stack: classes are entered at their first element
            GrammarElement::End
            | GrammarElement::Alt
            | GrammarElement::CharAlt(_)
            | GrammarElement::CharRangeUpper(_) => {}
        }
    }
}

/// Consume one code point from every stack, returning the surviving stacks.
///
/// An empty result means `chr` is rejected in this state.
pub fn accept(rules: &[Rule], stacks: &[Stack], chr: u32) -> Vec<Stack> {
    let mut new_stacks = Vec::new();

    for stack in stacks {
        let Some(&pos) = stack.last() else {
            continue;
        };
        let rule = &rules[pos.rule];
        let (matched, next) = match_char(rule, pos.index, chr);
        if !matched {
            continue;
        }

        let mut next_stack = stack[..stack.len() - 1].to_vec();
        if !rule[next].is_end_of_sequence() {
            next_stack.push(ElementPos {
                rule: pos.rule,
                index: next,
            });
        }
        advance_stack(rules, next_stack, &mut new_stacks);
    }

    new_stacks
}

#[cfg(test)]
mod tests {
    use super::*;
    use GrammarElement::*;

    #[test]
    fn test_match_char_range_and_alt() {
        // [a-c_]
        let rule = vec![Char('a' as u32), CharRangeUpper('c' as u32), CharAlt('_' as u32), End];
        assert_eq!(match_char(&rule, 0, 'b' as u32), (true, 3));
        assert_eq!(match_char(&rule, 0, '_' as u32), (true, 3));
        assert_eq!(match_char(&rule, 0, 'd' as u32), (false, 3));
    }

    #[test]
    fn test_match_char_negated() {
        // [^"]
        let rule = vec![CharNot('"' as u32), End];
        assert!(match_char(&rule, 0, 'x' as u32).0);
        assert!(!match_char(&rule, 0, '"' as u32).0);
    }

    #[test]
    fn test_match_partial_char() {
        // [€]
        let rule = vec![Char(0x20ac), End];
        let euro_lead = PartialUtf8 {
            value: 0x02,
            n_remain: 2,
        };
        assert!(match_partial_char(&rule, 0, euro_lead));

        let other_lead = PartialUtf8 {
            value: 0x0f,
            n_remain: 2,
        };
        assert!(!match_partial_char(&rule, 0, other_lead));
    }

    #[test]
    fn test_accept_walks_sequence() {
        // root ::= "ab"
        let rules = vec![vec![Char('a' as u32), Char('b' as u32), End]];
        let mut stacks = Vec::new();
        advance_stack(&rules, vec![ElementPos { rule: 0, index: 0 }], &mut stacks);
        assert_eq!(stacks.len(), 1);

        let stacks = accept(&rules, &stacks, 'a' as u32);
        assert_eq!(stacks, vec![vec![ElementPos { rule: 0, index: 1 }]]);

        let stacks = accept(&rules, &stacks, 'b' as u32);
        assert_eq!(stacks, vec![Vec::<ElementPos>::new()]);

        assert!(accept(&rules, &stacks, 'c' as u32).is_empty());
    }

    #[test]
    fn test_advance_stack_expands_alternates() {
        // root ::= item ; item ::= "x" | "y"
        let rules = vec![
            vec![RuleRef(1), End],
            vec![Char('x' as u32), Alt, Char('y' as u32), End],
        ];
        let mut stacks = Vec::new();
        advance_stack(&rules, vec![ElementPos { rule: 0, index: 0 }], &mut stacks);
        assert_eq!(stacks.len(), 2);
        assert!(stacks.contains(&vec![ElementPos { rule: 1, index: 0 }]));
        assert!(stacks.contains(&vec![ElementPos { rule: 1, index: 2 }]));
    }
}
