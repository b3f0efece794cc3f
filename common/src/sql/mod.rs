pub mod guard;
pub mod rows;
pub mod sqlite;

pub use guard::{find_denied_keyword, strip_code_fences, DENIED_KEYWORDS};
pub use rows::RowSet;
pub use sqlite::SqliteDatabase;

use crate::error::Result;
use async_trait::async_trait;

/// checks and runs queries against the target database
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// dialect name used in prompts, e.g. "sqlite" or "mssql"
    fn dialect_name(&self) -> &str;

    /// syntax and safety check without running the query
    async fn check(&self, query: &str) -> Result<()>;

    async fn execute(&self, query: &str) -> Result<RowSet>;
}
