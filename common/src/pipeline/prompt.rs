use crate::sql::RowSet;

pub fn table_selection_prompt(tables: &[String], question: &str) -> String {
    format!(
        "Given these available tables: {}\n\n\
         User question: {}\n\n\
         Which tables are most relevant? Return ONLY comma-separated table names, no explanation.",
        tables.join(", "),
        question
    )
}

fn namespace_instruction(schema_name: Option<&str>) -> String {
    match schema_name {
        Some(name) => format!(
            "\n11. Use TWO-PART table names: {}.tablename\n\
             12. NEVER use three-part names - omit 'dbo'",
            name
        ),
        None => "\n11. Use table names exactly as they appear in the schema above".to_string(),
    }
}

pub fn generation_prompt(
    question: &str,
    schema_context: &str,
    schema_name: Option<&str>,
    dialect: &str,
) -> String {
    format!(
        "Given the following database schema:\n\
         {schema}\n\n\
         User question: {question}\n\n\
         Generate a SQL query to answer this question.\n\n\
         CRITICAL Requirements:\n\
         1. ONLY use columns that are explicitly listed in the schema above\n\
         2. ONLY use tables that are shown in the schema above\n\
         3. If a descriptive column is not available, use the ID or foreign key columns that are\n\
         4. Include a row-limit clause for potentially large result sets (LIMIT, or TOP for SQL Server)\n\
         5. Use proper JOIN conditions with the foreign key relationships from the schema\n\
         6. Return ONLY the SQL query - no explanations, comments, or markdown formatting\n\
         7. Ensure the query is syntactically correct for {dialect}\n\
         8. For aggregate queries across multiple tables, use UNION ALL appropriately\n\
         9. Handle NULL values properly with COALESCE() or the dialect equivalent\n\
         10. Use WHERE clauses to filter data efficiently{namespace}\n\n\
         DO NOT INVENT COLUMN NAMES - if a column is not in the schema above, you CANNOT use it!\n\n\
         SQL Query:",
        schema = schema_context,
        question = question,
        dialect = dialect,
        namespace = namespace_instruction(schema_name),
    )
}

pub fn validation_prompt(sql: &str, question: &str, dialect: &str) -> String {
    format!(
        "Validate this SQL query for correctness and relevance:\n\n\
         Query: {sql}\n\n\
         User Question: {question}\n\n\
         Validation Checklist:\n\
         1. JOIN conditions: Are all joins properly specified with correct keys?\n\
         2. Column references: Are all columns qualified with table names when needed?\n\
         3. Query relevance: Does the query actually answer the user's question?\n\
         4. Performance: Is there a row-limit clause for potentially large result sets?\n\
         5. Logical correctness: Are aggregations, GROUP BY, WHERE and NULL handling correct?\n\
         6. SQL dialect: Is the syntax correct for {dialect}?\n\n\
         Respond with:\n\
         - \"VALID\" - if all checks pass\n\
         - \"ERROR: <specific issue>\" - if any check fails (be specific about the problem)",
        sql = sql,
        question = question,
        dialect = dialect,
    )
}

pub fn recovery_prompt(
    failed_sql: &str,
    error: &str,
    question: &str,
    schema_context: &str,
    schema_name: Option<&str>,
    dialect: &str,
) -> String {
    let schema_note = match schema_name {
        Some(name) => format!(
            "\nIMPORTANT: Use TWO-PART table names: schema.tablename (e.g., {name}.Employee)\n\
             NEVER use three-part names like {name}.dbo.Employee - omit the middle 'dbo' part",
            name = name
        ),
        None => String::new(),
    };

    format!(
        "The following SQL query failed and needs correction:\n\n\
         Failed Query:\n{failed_sql}\n\n\
         Error Message:\n{error}\n\n\
         Original User Question:\n{question}\n\n\
         Database Schema:\n{schema}{schema_note}\n\n\
         Common fixes to consider:\n\
         - Check column names exist in the schema\n\
         - Verify table names are correct (with schema prefix if needed, but NO middle 'dbo' part)\n\
         - Fix JOIN conditions and foreign key references\n\
         - Correct SQL syntax for {dialect}\n\
         - Add/fix the row-limit clause syntax\n\
         - Handle NULL values properly\n\n\
         Generate a corrected SQL query that fixes the error.\n\
         Return ONLY the corrected SQL query, no explanations or formatting.",
        failed_sql = failed_sql,
        error = error,
        question = question,
        schema = schema_context,
        schema_note = schema_note,
        dialect = dialect,
    )
}

pub fn formatting_prompt(question: &str, sql: &str, result: &RowSet) -> String {
    format!(
        "User asked: {question}\n\n\
         SQL query executed:\n{sql}\n\n\
         Query returned:\n{result}\n\n\
         Provide a clear, concise natural language answer to the user's question based on these results.\n\
         If the result is empty, explain that no matching data was found.\n\
         Format numbers and data in a readable way.",
        question = question,
        sql = sql,
        result = result,
    )
}

/// fixed apology for an exhausted retry budget; never touches a backend
pub fn apology_message(question: &str, error: Option<&str>) -> String {
    format!(
        "I apologize, but I was unable to generate a valid SQL query for your question: \"{}\"\n\n\
         Error: {}\n\n\
         Please try rephrasing your question or providing more specific details.",
        question,
        error.unwrap_or("Unknown error")
    )
}
