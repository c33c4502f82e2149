use anyhow::{Context, Result};
use console::style;
use indicatif::ProgressBar;
use std::io::{BufRead, Write as _};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::database::sqlite::{
    ConversationQueries, Database, KnowledgeQueries, MessageRole, NewKnowledgeEntry,
    UnansweredQueries,
};
use crate::indexer::Indexer;
use crate::pipeline::AnswerPipeline;

async fn open(data_dir: &Path) -> Result<(Config, Database)> {
    let config = Config::load(data_dir).context("Failed to load configuration")?;
    let database = Database::initialize_from_data_dir(data_dir)
        .await
        .context("Failed to initialize database")?;
    Ok((config, database))
}

/// Demo knowledge base for a small beauty salon.
fn demo_entries() -> Vec<NewKnowledgeEntry> {
    let entry = |category: &str, title: &str, content: &str| NewKnowledgeEntry {
        category: category.to_string(),
        title: title.to_string(),
        content: content.to_string(),
    };

    vec![
        entry(
            "Services",
            "Hair Services",
            "Dana's Beauty Salon offers a full range of professional hair services.\n\n\
             HAIRCUTS: Women's haircut and style includes consultation, wash, cut, and \
             blow-dry. Men's haircut covers classic or modern styles with precision cutting. \
             Children under 12 get a gentle, fun experience. A quick bang trim is available \
             between appointments.\n\n\
             HAIR COLORING: Full single-process color, highlights and lowlights with foil or \
             balayage technique, hand-painted balayage for a natural sun-kissed look, root \
             touch-ups, and color correction (consultation required).\n\n\
             TREATMENTS: Deep conditioning for moisture and repair, keratin smoothing that \
             reduces frizz for 3-4 months, targeted scalp treatments, and Olaplex \
             bond-building for damaged hair.",
        ),
        entry(
            "Services",
            "Nail Services",
            "MANICURE: Classic manicure with nail shaping, cuticle care, hand massage, and \
             polish. Gel manicure with long-lasting gel polish (2-3 weeks of wear). Luxury \
             spa manicure with exfoliation, mask, and hot towel.\n\n\
             PEDICURE: Classic pedicure with foot soak, nail care, callus removal, and \
             polish. Gel pedicure for long-lasting color. Luxury spa pedicure with sugar \
             scrub, mask, and extended massage.\n\n\
             NAIL ART: Simple accent designs, full custom nail art, and classic or colored \
             French tips. Acrylic full sets, fills, and soft gel extensions are available.",
        ),
        entry(
            "Hours",
            "Opening Hours",
            "Opening hours: Sunday through Thursday 9:00-18:00, Friday 8:30-14:00, closed \
             Saturday. Appointments outside regular hours may be arranged in advance for \
             bridal and event styling.",
        ),
        entry(
            "Pricing",
            "Price List",
            "Women's haircut: 120. Men's haircut: 60. Children's haircut: 45. Blow-dry and \
             style: 80. Full color: from 220. Balayage: from 350. Keratin treatment: from \
             400. Classic manicure: 70. Gel manicure: 110. Classic pedicure: 90. Classic \
             facial: 180. Prices are in local currency; exact quotes for color work are \
             given after a short consultation.",
        ),
        entry(
            "Policies",
            "Cancellation Policy",
            "Appointments can be cancelled or rescheduled free of charge up to 24 hours in \
             advance. Late cancellations or no-shows may be charged 50% of the service \
             price. Arriving more than 15 minutes late may require rescheduling. For \
             bridal packages a deposit is required and is refundable up to one week before \
             the event.",
        ),
    ]
}

/// Populate the knowledge base with demo data and build the index.
#[inline]
pub async fn seed(data_dir: &Path) -> Result<()> {
    let (config, database) = open(data_dir).await?;

    if KnowledgeQueries::count_active(database.pool()).await? > 0 {
        println!("Knowledge base already has entries; skipping seed.");
        return Ok(());
    }

    let entries = demo_entries();
    let count = entries.len();
    for new_entry in entries {
        let created = KnowledgeQueries::create(database.pool(), new_entry).await?;
        println!("Seeded entry {} ({})", created.id, created.source_label());
    }

    info!("Seeded {} demo entries; building index", count);
    rebuild_with_progress(&config, database).await?;
    println!(
        "{}",
        style(format!("Seeded {} entries and built the index.", count)).green()
    );
    Ok(())
}

/// Add a knowledge base entry. The index becomes stale until a rebuild.
#[inline]
pub async fn kb_add(data_dir: &Path, category: String, title: String, content: String) -> Result<()> {
    let (_config, database) = open(data_dir).await?;

    let created = KnowledgeQueries::create(database.pool(), NewKnowledgeEntry {
        category,
        title,
        content,
    })
    .await?;

    println!("Created entry {} ({})", created.id, created.source_label());
    println!("Run 'frontdesk rebuild' to refresh the index.");
    Ok(())
}

#[inline]
pub async fn kb_list(data_dir: &Path) -> Result<()> {
    let (_config, database) = open(data_dir).await?;
    let entries = KnowledgeQueries::list_all(database.pool()).await?;

    if entries.is_empty() {
        println!("The knowledge base is empty.");
        println!("Use 'frontdesk seed' for demo data or 'frontdesk kb add' to add entries.");
        return Ok(());
    }

    println!("Knowledge base ({} entries):", entries.len());
    for entry in &entries {
        let marker = if entry.is_active { "" } else { " [inactive]" };
        println!(
            "  {} — {}{}",
            entry.id,
            entry.source_label(),
            style(marker).dim()
        );
    }
    Ok(())
}

#[inline]
pub async fn kb_deactivate(data_dir: &Path, id: i64) -> Result<()> {
    let (_config, database) = open(data_dir).await?;

    if KnowledgeQueries::deactivate(database.pool(), id).await? {
        println!("Deactivated entry {}.", id);
        println!("Run 'frontdesk rebuild' to refresh the index.");
    } else {
        println!("Entry {} not found or already inactive.", id);
    }
    Ok(())
}

/// Rebuild the vector index from the current knowledge base.
#[inline]
pub async fn rebuild(data_dir: &Path) -> Result<()> {
    let (config, database) = open(data_dir).await?;
    rebuild_with_progress(&config, database).await
}

async fn rebuild_with_progress(config: &Config, database: Database) -> Result<()> {
    let indexer = Indexer::new(config, database).await?;

    let progress = ProgressBar::new_spinner();
    progress.set_message("Chunking and embedding knowledge base...");
    progress.enable_steady_tick(Duration::from_millis(120));

    let status = indexer.build_index().await;
    progress.finish_and_clear();

    let status = status?;
    println!(
        "Index built: {} chunks from {} entries (strategy: {}).",
        status.chunk_count,
        status.entry_count,
        status
            .strategy
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}

/// Show the state of the index relative to the knowledge base.
#[inline]
pub async fn show_status(data_dir: &Path) -> Result<()> {
    let (config, database) = open(data_dir).await?;
    let indexer = Indexer::new(&config, database.clone()).await?;
    let status = indexer.status().await?;

    println!("Frontdesk status");
    println!(
        "  Knowledge entries: {} active (revision {})",
        KnowledgeQueries::count_active(database.pool()).await?,
        status.current_revision
    );

    if status.built {
        println!(
            "  Index: {} chunks from {} entries",
            status.chunk_count, status.entry_count
        );
        if let Some(strategy) = status.strategy {
            println!("  Embedding strategy: {}", strategy);
        }
        if let Some(built_at) = status.built_at {
            println!(
                "  Built: {} (revision {})",
                built_at.format("%Y-%m-%d %H:%M:%S"),
                status.built_from_revision.unwrap_or_default()
            );
        }
        if status.is_stale {
            println!(
                "  {}",
                style("Index is STALE — run 'frontdesk rebuild'").yellow()
            );
        } else {
            println!("  Index is up to date");
        }
    } else {
        println!(
            "  {}",
            style("Index: not built — run 'frontdesk rebuild'").yellow()
        );
    }

    let open_questions = UnansweredQueries::count_open(database.pool()).await?;
    if open_questions > 0 {
        println!(
            "  {}",
            style(format!("Open knowledge gaps: {}", open_questions)).yellow()
        );
    }

    Ok(())
}

/// List open knowledge gaps, or mark one resolved.
#[inline]
pub async fn gaps(data_dir: &Path, resolve: Option<i64>) -> Result<()> {
    let (_config, database) = open(data_dir).await?;

    if let Some(id) = resolve {
        if UnansweredQueries::resolve(database.pool(), id).await? {
            println!("Marked question {} as resolved.", id);
        } else {
            println!("Question {} not found or already resolved.", id);
        }
        return Ok(());
    }

    let open_questions = UnansweredQueries::list_open(database.pool(), 50).await?;
    if open_questions.is_empty() {
        println!("No open knowledge gaps.");
        return Ok(());
    }

    println!("Open knowledge gaps ({}):", open_questions.len());
    for question in &open_questions {
        println!(
            "  {} — {} (asked by {} on {})",
            question.id,
            question.question,
            if question.user_id.is_empty() {
                "unknown"
            } else {
                question.user_id.as_str()
            },
            question.created_at.format("%Y-%m-%d")
        );
    }
    println!("Fill the gap with 'frontdesk kb add', then 'frontdesk gaps --resolve <id>'.");
    Ok(())
}

/// Answer a single question through the full pipeline.
#[inline]
pub async fn ask(data_dir: &Path, question: &str, user_id: &str) -> Result<()> {
    let (config, database) = open(data_dir).await?;
    let indexer = Arc::new(Indexer::new(&config, database.clone()).await?);
    let pipeline = AnswerPipeline::new(&config, database.clone(), indexer);

    let answer = answer_turn(&config, &database, &pipeline, question, user_id).await?;
    println!("{}", answer);
    Ok(())
}

/// Interactive REPL over the same entry point the bot front-end uses.
#[inline]
pub async fn chat(data_dir: &Path, user_id: &str) -> Result<()> {
    let (config, database) = open(data_dir).await?;
    let indexer = Arc::new(Indexer::new(&config, database.clone()).await?);
    let pipeline = AnswerPipeline::new(&config, database.clone(), indexer);

    println!(
        "Chatting with {} — type 'exit' to quit.",
        style(&config.business.name).bold()
    );

    let stdin = std::io::stdin();
    loop {
        print!("{} ", style("you>").cyan().bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        let answer = answer_turn(&config, &database, &pipeline, question, user_id).await?;
        println!("{} {}", style("bot>").green().bold(), answer);
    }

    Ok(())
}

async fn answer_turn(
    config: &Config,
    database: &Database,
    pipeline: &AnswerPipeline,
    question: &str,
    user_id: &str,
) -> Result<String> {
    let history = ConversationQueries::recent_messages(
        database.pool(),
        user_id,
        config.pipeline.history_limit,
    )
    .await?;

    let answer = pipeline.answer(question, user_id, &history).await?;

    ConversationQueries::append(database.pool(), user_id, "", MessageRole::User, question, "")
        .await?;
    ConversationQueries::append(
        database.pool(),
        user_id,
        "",
        MessageRole::Assistant,
        &answer.text,
        &answer.source_labels.join("; "),
    )
    .await?;

    Ok(answer.text)
}

/// Print the effective configuration.
#[inline]
pub fn show_config(data_dir: &Path) -> Result<()> {
    let config = Config::load(data_dir)?;
    println!("Data directory: {}", data_dir.display());
    println!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to render configuration")?
    );
    Ok(())
}
