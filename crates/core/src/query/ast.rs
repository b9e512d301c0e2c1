use std::fmt;

/// One analyzed term of a phrase and its offset from the first term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseTerm {
    pub term: String,
    pub offset: u32,
}

impl PhraseTerm {
    pub fn new(term: impl Into<String>, offset: u32) -> Self {
        Self { term: term.into(), offset }
    }
}

/// Parsed query tree
///
/// Leaves carry analyzed terms. `field: None` searches every field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryNode {
    /// Matches nothing, neutral inside boolean combinators
    #[default]
    Empty,
    Term {
        field: Option<String>,
        term: String,
    },
    /// Every dictionary term starting with `prefix`
    Prefix {
        field: Option<String>,
        prefix: String,
    },
    /// Terms at fixed relative positions, in order
    Phrase {
        field: Option<String>,
        terms: Vec<PhraseTerm>,
    },
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    /// Documents matching `include` but not `exclude`
    Not {
        include: Box<QueryNode>,
        exclude: Box<QueryNode>,
    },
}

impl QueryNode {
    pub fn term(field: Option<&str>, term: impl Into<String>) -> Self {
        Self::Term { field: field.map(str::to_string), term: term.into() }
    }

    pub fn prefix(field: Option<&str>, prefix: impl Into<String>) -> Self {
        Self::Prefix { field: field.map(str::to_string), prefix: prefix.into() }
    }

    /// A phrase with a single term collapses into a term, an empty one into `Empty`
    pub fn phrase(field: Option<&str>, mut terms: Vec<PhraseTerm>) -> Self {
        match terms.len() {
            0 => Self::Empty,
            1 => Self::term(field, terms.remove(0).term),
            _ => Self::Phrase { field: field.map(str::to_string), terms },
        }
    }

    /// Conjunction with `Empty` operands dropped and nested `And`s flattened
    pub fn and(nodes: impl IntoIterator<Item = QueryNode>) -> Self {
        Self::combine(nodes, true)
    }

    /// Disjunction with `Empty` operands dropped and nested `Or`s flattened
    pub fn or(nodes: impl IntoIterator<Item = QueryNode>) -> Self {
        Self::combine(nodes, false)
    }

    /// Difference; an empty exclusion leaves `include` unchanged
    pub fn not(include: QueryNode, exclude: QueryNode) -> Self {
        match (include, exclude) {
            (Self::Empty, _) => Self::Empty,
            (include, Self::Empty) => include,
            (include, exclude) => Self::Not { include: Box::new(include), exclude: Box::new(exclude) },
        }
    }

    fn combine(nodes: impl IntoIterator<Item = QueryNode>, conjunction: bool) -> Self {
        let mut flat = Vec::new();
        for node in nodes {
            match node {
                Self::Empty => {}
                Self::And(children) if conjunction => flat.extend(children),
                Self::Or(children) if !conjunction => flat.extend(children),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => Self::Empty,
            1 => flat.remove(0),
            _ if conjunction => Self::And(flat),
            _ => Self::Or(flat),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Field scope of a leaf node
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Term { field, .. } | Self::Prefix { field, .. } | Self::Phrase { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn scope(f: &mut fmt::Formatter<'_>, field: &Option<String>) -> fmt::Result {
            match field {
                Some(field) => write!(f, "{field}:"),
                None => Ok(()),
            }
        }

        fn join(f: &mut fmt::Formatter<'_>, children: &[QueryNode], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::Empty => write!(f, "<empty>"),
            Self::Term { field, term } => {
                scope(f, field)?;
                write!(f, "{term}")
            }
            Self::Prefix { field, prefix } => {
                scope(f, field)?;
                write!(f, "{prefix}*")
            }
            Self::Phrase { field, terms } => {
                scope(f, field)?;
                let words: Vec<_> = terms.iter().map(|t| t.term.as_str()).collect();
                write!(f, "\"{}\"", words.join(" "))
            }
            Self::And(children) => join(f, children, "AND"),
            Self::Or(children) => join(f, children, "OR"),
            Self::Not { include, exclude } => write!(f, "({include} NOT {exclude})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinators_drop_empty() {
        let fox = QueryNode::term(None, "fox");
        assert_eq!(QueryNode::and([QueryNode::Empty, fox.clone()]), fox);
        assert_eq!(QueryNode::or([QueryNode::Empty, QueryNode::Empty]), QueryNode::Empty);
        assert_eq!(QueryNode::not(fox.clone(), QueryNode::Empty), fox);
        assert_eq!(QueryNode::not(QueryNode::Empty, fox), QueryNode::Empty);
    }

    #[test]
    fn test_combinators_flatten() {
        let a = QueryNode::term(None, "a");
        let b = QueryNode::term(None, "b");
        let c = QueryNode::term(None, "c");
        let nested = QueryNode::and([QueryNode::and([a.clone(), b.clone()]), c.clone()]);
        assert_eq!(nested, QueryNode::And(vec![a.clone(), b.clone(), c.clone()]));

        let mixed = QueryNode::or([QueryNode::and([a.clone(), b.clone()]), c.clone()]);
        assert_eq!(mixed, QueryNode::Or(vec![QueryNode::And(vec![a, b]), c]));
    }

    #[test]
    fn test_phrase_collapses() {
        assert_eq!(QueryNode::phrase(None, vec![]), QueryNode::Empty);
        assert_eq!(
            QueryNode::phrase(Some("title"), vec![PhraseTerm::new("fox", 0)]),
            QueryNode::term(Some("title"), "fox")
        );
    }

    #[test]
    fn test_display() {
        let node = QueryNode::not(
            QueryNode::and([
                QueryNode::term(Some("title"), "fox"),
                QueryNode::phrase(None, vec![PhraseTerm::new("quick", 0), PhraseTerm::new("brown", 1)]),
            ]),
            QueryNode::prefix(None, "sl"),
        );
        assert_eq!(node.to_string(), "((title:fox AND \"quick brown\") NOT sl*)");
    }
}
