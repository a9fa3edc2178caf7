/// One element of a compiled rule.
///
/// A rule is stored as a flat sequence of alternates. Each alternate is
/// terminated by `Alt` when another alternate follows, and the last one by
/// `End`. Character classes are encoded as a leading `Char`/`CharNot`
/// followed by any number of `CharAlt`, each optionally followed by a
/// `CharRangeUpper` that turns the preceding element into an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrammarElement {
    /// End of the rule definition.
    End,
    /// Start of another alternate.
    Alt,
    /// Non-terminal reference to the rule with the given id.
    RuleRef(usize),
    /// Terminal code point, or the first entry of a positive class.
    Char(u32),
    /// First entry of a negated class (`[^...]`).
    CharNot(u32),
    /// Upper bound of an inclusive range started by the previous element.
    CharRangeUpper(u32),
    /// Additional entry of a class.
    CharAlt(u32),
    /// Any code point (`.`).
    CharAny,
}

impl GrammarElement {
    /// True for the markers that close an alternate or a rule.
    pub fn is_end_of_sequence(&self) -> bool {
        matches!(self, GrammarElement::End | GrammarElement::Alt)
    }

    pub(crate) fn is_char_alt(&self) -> bool {
        matches!(self, GrammarElement::CharAlt(_))
    }

    pub(crate) fn code_point(&self) -> u32 {
        match *self {
            GrammarElement::Char(c)
            | GrammarElement::CharNot(c)
            | GrammarElement::CharRangeUpper(c)
            | GrammarElement::CharAlt(c) => c,
            _ => 0,
        }
    }
}

/// A compiled rule: alternates of elements, see [`GrammarElement`].
pub type Rule = Vec<GrammarElement>;

/// Position of an element inside the rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementPos {
    pub rule: usize,
    pub index: usize,
}

/// A partial-match trace. The top of the stack is always a terminal element;
/// an empty stack means the grammar has been fully matched.
pub type Stack = Vec<ElementPos>;
