mod cli;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use batchline::config::BatchlineConfig;
use batchline::desk::{Callback, FrontDesk, Inbound, Request};
use batchline::fixture::Fixture;
use batchline::logging;
use batchline::model::ConversationId;
use batchline::notify::ConsoleNotifier;
use batchline::progress::StageCompletionEngine;
use batchline::store::RedbStore;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BatchlineConfig::load(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose);

    let store = Arc::new(
        RedbStore::open(&config.database)
            .with_context(|| format!("opening {}", config.database.display()))?,
    );
    let engine = StageCompletionEngine::new(store.clone(), config.lease_policy())
        .with_auto_fix_on_view(config.lease.auto_fix_on_view);

    let request = match cli.command {
        Command::Seed { file } => {
            let progress = ui::SeedProgress::start(&file.display().to_string());
            let fixture = match Fixture::load(&file) {
                Ok(fixture) => fixture,
                Err(err) => {
                    progress.abandon();
                    return Err(err).with_context(|| format!("loading {}", file.display()));
                }
            };
            let counts = (
                fixture.actors().len(),
                fixture.stages().len(),
                fixture.batches().len(),
            );
            if let Err(err) = store.seed(fixture).await {
                progress.abandon();
                return Err(err.into());
            }
            progress.finish(counts.0, counts.1, counts.2);
            info!(database = %config.database.display(), "fixture seeded");
            return Ok(());
        }
        Command::History { batch } => {
            let state = engine.state(batch).await?;
            let summary = engine.query().summary(batch).await?;
            ui::print_history(state, &summary);
            return Ok(());
        }
        Command::Status { identifier } => Request::Identifier(identifier),
        Command::Done { batch } => Request::Callback(Callback::done(batch).to_string()),
        Command::Cancel { batch } => Request::Callback(Callback::cancel(batch).to_string()),
        Command::Send { text } => Request::Text(text),
    };

    // Sessions and message ids live in the database, so a prompt from one
    // invocation is answered by the next and its message retracted.
    let notifier = ConsoleNotifier::starting_at(store.reserve_message_id().await?);
    let desk = FrontDesk::new(
        engine,
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(notifier),
    )
    .with_translators(config.translators())
    .with_session_ttl(config.session_ttl());

    let conversation = ConversationId::new(cli.conversation);
    if desk
        .handle(Inbound::new(conversation.clone(), request))
        .await?
        .is_none()
    {
        anyhow::bail!("no active worker is linked to conversation {conversation}");
    }
    Ok(())
}
