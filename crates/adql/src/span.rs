/// A region of the query text, as 1-based line/column pairs.
///
/// The end position points at the last character of the spanned region,
/// not one past it. Spans survive on AST nodes until the node (or one of
/// its children) is mutated, at which point the cached span is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub begin_line: u32,
    pub begin_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(begin_line: u32, begin_col: u32, end_line: u32, end_col: u32) -> Self {
        Span {
            begin_line,
            begin_col,
            end_line,
            end_col,
        }
    }

    pub fn point(line: u32, col: u32) -> Self {
        Span::new(line, col, line, col)
    }

    /// The smallest span covering both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        let (begin_line, begin_col) =
            if (other.begin_line, other.begin_col) < (self.begin_line, self.begin_col) {
                (other.begin_line, other.begin_col)
            } else {
                (self.begin_line, self.begin_col)
            };
        let (end_line, end_col) = if (other.end_line, other.end_col) > (self.end_line, self.end_col)
        {
            (other.end_line, other.end_col)
        } else {
            (self.end_line, self.end_col)
        };
        Span {
            begin_line,
            begin_col,
            end_line,
            end_col,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.begin_line == self.end_line {
            write!(
                f,
                "line {}, columns {}-{}",
                self.begin_line, self.begin_col, self.end_col
            )
        } else {
            write!(
                f,
                "line {} col {} to line {} col {}",
                self.begin_line, self.begin_col, self.end_line, self.end_col
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Span;

    #[test]
    fn test_merge_is_commutative() {
        let a = Span::new(1, 8, 1, 14);
        let b = Span::new(2, 1, 2, 5);
        assert_eq!(a.merge(b), b.merge(a));
        assert_eq!(a.merge(b), Span::new(1, 8, 2, 5));
    }

    #[test]
    fn test_merge_contained() {
        let outer = Span::new(1, 1, 3, 10);
        let inner = Span::new(2, 4, 2, 9);
        assert_eq!(outer.merge(inner), outer);
    }
}
