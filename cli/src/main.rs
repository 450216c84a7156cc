//! Demo binary: drives one EB-1A petition workflow run end-to-end against
//! in-memory backends and a mock model provider, printing the live-preview
//! event stream to stdout as the run progresses.
//!
//! Grounded in the teacher's `cli::main` shape (`clap::Parser` args, a
//! `#[tokio::main] async fn main()` that loads config, initializes logging,
//! then drives one backend call) but scaled down from the teacher's
//! local/remote/REPL/serve surface to the one path this demo needs: build an
//! [`Orchestrator`], compile a three-section graph, run it, print what comes
//! out.

mod logging;
mod node;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use config::Settings;
use node::ModelSectionWriterNode;
use orchestrator::workflow::{WorkflowGraphBuilder, WorkflowState};
use orchestrator::{CaseType, Orchestrator};

const SECTION_TITLES: &[&str] = &["Cover Letter", "Criteria Summary", "Recommendation Digest"];

#[derive(Parser, Debug)]
#[command(name = "eb1a-orchestrator", about = "Runs one EB-1A petition workflow end-to-end")]
struct Args {
    /// User id the demo case and run are attributed to.
    #[arg(long, default_value = "demo-user")]
    user_id: String,

    /// Case title.
    #[arg(long, default_value = "EB-1A Petition Demo")]
    title: String,

    /// Thread id for this run; a fresh one is derived from the case id if omitted.
    #[arg(long)]
    thread_id: Option<String>,

    /// Print the full audit trail after the run completes.
    #[arg(long)]
    show_audit: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    config::load_and_apply("eb1a-orchestrator", None::<&std::path::Path>).ok();
    logging::init();

    let settings = Settings::from_env();
    let orchestrator = Orchestrator::init(&settings)?;

    let case = orchestrator
        .cases
        .create(&args.user_id, &args.title, CaseType::Eb1a, orchestrator.clock.now())
        .await
        .map_err(|e| format!("case create failed: {e}"))?;

    let thread_id = args
        .thread_id
        .unwrap_or_else(|| format!("thread-{}", case.case_id));

    let graph = WorkflowGraphBuilder::new()
        .add_node(Arc::new(ModelSectionWriterNode::new(
            "draft-cover-letter",
            "section-1",
            format!("Draft the cover letter section of an EB-1A petition for: {}", case.title),
            orchestrator.router.clone(),
        )))
        .add_node(Arc::new(ModelSectionWriterNode::new(
            "draft-criteria-summary",
            "section-2",
            format!("Summarize which EB-1A criteria the petitioner for '{}' satisfies.", case.title),
            orchestrator.router.clone(),
        )))
        .add_node(Arc::new(ModelSectionWriterNode::new(
            "draft-recommendation-digest",
            "section-3",
            format!("Digest the recommendation letters supporting '{}'.", case.title),
            orchestrator.router.clone(),
        )))
        .compile()?;

    let engine = orchestrator.build_engine(graph);

    // The preview broadcaster's subscribe loads the current state as its
    // snapshot, so the state row must exist before anyone subscribes.
    // `resume` (rather than `start`, which also saves) picks the run up from
    // that pre-saved row and drives it from the entry node.
    let initial_state = WorkflowState::new(thread_id.as_str(), case.case_id.as_str(), SECTION_TITLES, orchestrator.clock.now());
    orchestrator.state_store.save(initial_state).await?;

    let mut preview = orchestrator.preview.subscribe(&thread_id).await?;
    println!("{}", preview.initial);
    let mut events: broadcast::Receiver<_> = preview.receiver;
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Ok(value) = event.to_value() {
                println!("{value}");
            }
        }
    });

    let final_state = engine.resume(&thread_id, &args.user_id).await?;

    println!(
        "run finished: status={:?} sections_completed={}/{}",
        final_state.status,
        final_state.progress().0,
        final_state.progress().1
    );

    if args.show_audit {
        let trail = orchestrator.audit.all().await.map_err(|e| format!("audit read failed: {e}"))?;
        for event in trail {
            println!("audit: {} {} {}", event.source, event.action, event.payload);
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
