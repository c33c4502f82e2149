use super::*;
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_data_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' \
         AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> = [
        "kb_entries",
        "kb_chunks",
        "conversations",
        "unanswered_questions",
        "meta",
    ]
    .into_iter()
    .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_migrations_are_idempotent() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database.run_migrations().await?;

    let revision = MetaQueries::kb_revision(database.pool()).await?;
    assert_eq!(revision, 0);

    Ok(())
}

#[tokio::test]
async fn integration_reopen_preserves_data() -> Result<()> {
    let temp_dir = TempDir::new()?;

    {
        let database = Database::initialize_from_data_dir(temp_dir.path()).await?;
        KnowledgeQueries::create(database.pool(), NewKnowledgeEntry {
            category: "Hours".to_string(),
            title: "Opening Hours".to_string(),
            content: "Open 9-18, closed Saturday.".to_string(),
        })
        .await?;
    }

    let reopened = Database::initialize_from_data_dir(temp_dir.path()).await?;
    let entries = KnowledgeQueries::list_active(reopened.pool()).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title, "Opening Hours");
    assert_eq!(MetaQueries::kb_revision(reopened.pool()).await?, 1);

    Ok(())
}
