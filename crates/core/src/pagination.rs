use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("page size {0} is not one of 10, 25, 50, 100, 200, 500")]
    UnsupportedLimit(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PageLimit {
    Ten,
    TwentyFive,
    #[default]
    Fifty,
    Hundred,
    TwoHundred,
    FiveHundred,
}

impl PageLimit {
    pub const ALL: [Self; 6] = [
        Self::Ten,
        Self::TwentyFive,
        Self::Fifty,
        Self::Hundred,
        Self::TwoHundred,
        Self::FiveHundred,
    ];

    #[must_use]
    pub fn rows(self) -> u32 {
        match self {
            Self::Ten => 10,
            Self::TwentyFive => 25,
            Self::Fifty => 50,
            Self::Hundred => 100,
            Self::TwoHundred => 200,
            Self::FiveHundred => 500,
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        let index = self.position();
        Self::ALL[(index + 1).min(Self::ALL.len() - 1)]
    }

    #[must_use]
    pub fn previous(self) -> Self {
        Self::ALL[self.position().saturating_sub(1)]
    }

    fn position(self) -> usize {
        Self::ALL
            .iter()
            .position(|limit| *limit == self)
            .unwrap_or_default()
    }
}

impl TryFrom<u32> for PageLimit {
    type Error = PaginationError;

    fn try_from(rows: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|limit| limit.rows() == rows)
            .ok_or(PaginationError::UnsupportedLimit(rows))
    }
}

/// One window of rows: `LIMIT limit OFFSET (page - 1) * limit`. Pages are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageQuery {
    pub table: String,
    pub limit: PageLimit,
    page: u32,
}

impl PageQuery {
    #[must_use]
    pub fn new(table: impl Into<String>, limit: PageLimit, page: u32) -> Self {
        Self {
            table: table.into(),
            limit,
            page: page.max(1),
        }
    }

    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    #[must_use]
    pub fn limit_rows(&self) -> u64 {
        u64::from(self.limit.rows())
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * self.limit_rows()
    }
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Statement for engines that bind `[limit, offset]` as parameters.
#[must_use]
pub fn bound_select_sql(table: &str) -> String {
    format!("SELECT * FROM {} LIMIT ? OFFSET ?", quote_identifier(table))
}

/// Statement with the window written into the SQL text, for the in-process engine.
#[must_use]
pub fn inline_select_sql(query: &PageQuery) -> String {
    format!(
        "SELECT * FROM {} LIMIT {} OFFSET {}",
        quote_identifier(&query.table),
        query.limit_rows(),
        query.offset()
    )
}

#[cfg(test)]
mod tests {
    use super::{
        bound_select_sql, inline_select_sql, quote_identifier, PageLimit, PageQuery,
        PaginationError,
    };

    #[test]
    fn offset_is_page_minus_one_times_limit_for_every_allowed_limit() {
        for limit in PageLimit::ALL {
            for page in [1_u32, 2, 3, 17] {
                let query = PageQuery::new("users", limit, page);
                assert_eq!(query.limit_rows(), u64::from(limit.rows()));
                assert_eq!(
                    query.offset(),
                    u64::from(page - 1) * u64::from(limit.rows())
                );
            }
        }
    }

    #[test]
    fn page_zero_is_clamped_to_first_page() {
        let query = PageQuery::new("users", PageLimit::Ten, 0);
        assert_eq!(query.page(), 1);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn limit_conversion_accepts_only_allowed_values() {
        assert_eq!(PageLimit::try_from(200), Ok(PageLimit::TwoHundred));
        assert_eq!(
            PageLimit::try_from(30),
            Err(PaginationError::UnsupportedLimit(30))
        );
    }

    #[test]
    fn limit_stepping_saturates_at_both_ends() {
        assert_eq!(PageLimit::Ten.previous(), PageLimit::Ten);
        assert_eq!(PageLimit::Ten.next(), PageLimit::TwentyFive);
        assert_eq!(PageLimit::FiveHundred.next(), PageLimit::FiveHundred);
        assert_eq!(PageLimit::default().rows(), 50);
    }

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn select_statements_match_each_engine() {
        assert_eq!(
            bound_select_sql("orders"),
            "SELECT * FROM \"orders\" LIMIT ? OFFSET ?"
        );
        let query = PageQuery::new("orders", PageLimit::TwentyFive, 3);
        assert_eq!(
            inline_select_sql(&query),
            "SELECT * FROM \"orders\" LIMIT 25 OFFSET 50"
        );
    }
}
