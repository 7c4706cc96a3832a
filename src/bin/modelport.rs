//! Modelport CLI
//!
//! Runs conversion batches against a JSON-serialized host document, standing
//! in for the transport collaborator: `send` produces an interchange graph,
//! `receive` applies one to the document.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use modelport::{
    convert_inbound, convert_outbound, BatchOptions, Document, Node, Settings, Status,
};

#[derive(Parser)]
#[command(name = "modelport")]
#[command(about = "Convert between a host document and an interchange graph")]
struct Cli {
    /// Optional settings file (modelport.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Setting overrides as key=value pairs
    #[arg(short, long = "setting", value_name = "KEY=VALUE")]
    settings: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert host elements into an interchange graph
    Send {
        /// Host document (JSON)
        document: PathBuf,
        /// Output graph file
        #[arg(short, long)]
        out: PathBuf,
        /// Element uids to send; all elements when omitted
        #[arg(long)]
        select: Vec<String>,
    },

    /// Apply an interchange graph to a host document
    Receive {
        /// Host document (JSON)
        document: PathBuf,
        /// Interchange graph file (a root node or an array of nodes)
        graph: PathBuf,
        /// Where to write the updated document
        #[arg(short, long)]
        out: PathBuf,
    },

    /// List the setting keys the engine consults
    Keys,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = match cli.config.as_deref() {
        Some(path) => Settings::load_from(Some(path))?,
        None => Settings::load().unwrap_or_default(),
    };
    for pair in &cli.settings {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("setting '{pair}' is not of the form key=value"))?;
        settings.set(key, value);
    }

    match cli.command {
        Commands::Send { document, out, select } => {
            let doc = load_document(&document)?;

            let selection: Vec<_> = if select.is_empty() {
                doc.ids()
            } else {
                select
                    .iter()
                    .map(|uid| {
                        doc.find_by_uid(uid)
                            .map(|el| el.id)
                            .with_context(|| format!("no element with uid '{uid}'"))
                    })
                    .collect::<anyhow::Result<_>>()?
            };

            let (root, report) =
                convert_outbound(&doc, &selection, &settings, BatchOptions::default())?;

            std::fs::write(&out, serde_json::to_string_pretty(&root)?)?;
            println!("Sent {} -> {}", report.summary(), out.display());
            print_failures(&report);
            Ok(())
        }

        Commands::Receive { document, graph, out } => {
            let mut doc = load_document(&document)?;

            let content = std::fs::read_to_string(&graph)
                .with_context(|| format!("reading {}", graph.display()))?;
            let nodes = parse_graph(&content)?;

            let (results, report) =
                convert_inbound(&mut doc, &nodes, &settings, BatchOptions::default())?;

            std::fs::write(&out, serde_json::to_string_pretty(&doc)?)?;
            println!("Received {} -> {}", report.summary(), out.display());
            for result in results.iter().filter(|r| r.status == Status::Failed) {
                let notes = report
                    .get(&result.key)
                    .map(|e| e.notes.join("; "))
                    .unwrap_or_default();
                println!("  failed: {} ({notes})", result.key);
            }
            Ok(())
        }

        Commands::Keys => {
            for key in modelport::settings::KNOWN_KEYS {
                println!("{key}");
            }
            Ok(())
        }
    }
}

fn load_document(path: &PathBuf) -> anyhow::Result<Document> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc = serde_json::from_str(&content)
        .with_context(|| format!("parsing host document {}", path.display()))?;
    Ok(doc)
}

/// Accepts either a single root node (children are the batch) or a flat array
fn parse_graph(content: &str) -> anyhow::Result<Vec<Node>> {
    if let Ok(nodes) = serde_json::from_str::<Vec<Node>>(content) {
        return Ok(nodes);
    }
    let root: Node = serde_json::from_str(content).context("parsing interchange graph")?;
    if root.is_aggregate() {
        Ok(root.children.into_iter().map(|link| link.node).collect())
    } else {
        Ok(vec![root])
    }
}

fn print_failures(report: &modelport::ConversionReport) {
    for (key, entry) in report.entries().filter(|(_, e)| e.status == Status::Failed) {
        println!("  failed: {key} ({})", entry.notes.join("; "));
    }
}
