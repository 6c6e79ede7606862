use serde_json::Value;

/// A leaf predicate against a single payload field.
#[derive(Debug, Clone)]
pub enum FilterClause {
    Match { key: String, value: Value },
    MatchAny { key: String, values: Vec<Value> },
    Range { key: String, gte: Option<Value>, lte: Option<Value> },
    /// True only when the field exists and is literally null. An absent field never
    /// satisfies this — callers that want "absent or null" must say so explicitly by
    /// combining `IsNull` with their own knowledge of the schema's defaults.
    IsNull { key: String },
    IsNotNull { key: String },
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<FilterClause>,
    pub must_not: Vec<FilterClause>,
    pub should: Vec<FilterClause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, clause: FilterClause) -> Self {
        self.must.push(clause);
        self
    }

    pub fn must_not(mut self, clause: FilterClause) -> Self {
        self.must_not.push(clause);
        self
    }

    pub fn should(mut self, clause: FilterClause) -> Self {
        self.should.push(clause);
        self
    }

    /// The filter every search path starts from: only head chunks (no `superseded_by`)
    /// that are not soft-deleted are visible.
    pub fn visible_heads() -> Self {
        Self::new()
            .must(FilterClause::IsNull {
                key: "superseded_by".to_string(),
            })
            .must_not(FilterClause::Match {
                key: "deletion_eligible".to_string(),
                value: Value::Bool(true),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_heads_excludes_superseded_and_deleted() {
        let filter = Filter::visible_heads();
        assert_eq!(filter.must.len(), 1);
        assert_eq!(filter.must_not.len(), 1);
        assert!(matches!(filter.must[0], FilterClause::IsNull { .. }));
    }
}
