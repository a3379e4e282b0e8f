//! tom: build and query a typed knowledge graph from text.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tom_core::{Config, ModelTier};
use tom_graph::{Category, GraphEngine, TraversalOptions, VectorField};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "tom")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Model tier for extraction: fast, balanced, best
    #[arg(long, global = true)]
    tier: Option<String>,

    /// SQLite database path (overrides the configured location)
    #[arg(long, global = true, env = "TOM_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and store entities and relations from text
    Ingest {
        /// File whose contents to ingest
        #[arg(required_unless_present = "text")]
        file: Option<PathBuf>,

        /// Inline text instead of a file
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
    },

    /// Ingest every matching file directly inside a directory
    IngestDir {
        dir: PathBuf,

        /// File extension, with or without the dot (default from config)
        #[arg(long)]
        ext: Option<String>,
    },

    /// List entities, optionally restricted to one category
    Entities {
        #[arg(long)]
        category: Option<String>,
    },

    /// Show one entity
    Entity { eid: String },

    /// List relations, outgoing with --from or incoming with --to
    Relations {
        #[arg(long, conflicts_with = "to")]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },

    /// Entities most similar to an existing entity
    Nearest {
        eid: String,

        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Targets of `<eid> -[<relation>]-> *`
    Connected { eid: String, relation: String },

    /// Breadth-first walk over outgoing relations
    Traverse {
        eid: String,

        #[arg(long, default_value = "2")]
        depth: usize,

        /// Follow only this relation name
        #[arg(long)]
        relation: Option<String>,

        #[arg(long, default_value = "100")]
        max_nodes: usize,
    },

    /// Semantic search over entities (or relations with --relations)
    Search {
        query: String,

        /// Vector field: primary or secondary
        #[arg(long, default_value = "primary")]
        field: String,

        #[arg(long)]
        relations: bool,

        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    init_logging(cli.verbose, config.log_level());

    let mut settings = config.graph_settings();
    if let Some(tier) = &cli.tier {
        settings.default_tier = tier.parse::<ModelTier>()?;
    }
    if let Some(db) = cli.db.clone() {
        settings.db_path_override = Some(db);
    }

    let engine = GraphEngine::open_sqlite(settings, config.llm_api_key()).await?;
    let result = run(&engine, cli.command).await;
    engine.close().await;
    result
}

async fn run(engine: &GraphEngine, command: Commands) -> CliResult<()> {
    let query = engine.query();
    match command {
        Commands::Ingest { file, text } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(file)) => tokio::fs::read_to_string(&file).await?,
                (None, None) => return Err("either a file or --text is required".into()),
            };
            print_json(&engine.ingest_text(&text).await?)
        }
        Commands::IngestDir { dir, ext } => {
            let reports = engine.ingest_directory(&dir, ext.as_deref()).await?;
            let failed = reports.iter().filter(|r| !r.ok).count();
            print_json(&reports)?;
            if failed > 0 {
                tracing::warn!(failed, "Some files were not ingested");
            }
            Ok(())
        }
        Commands::Entities { category } => {
            let entities = match category {
                Some(category) => {
                    query
                        .get_entities_by_category(category.parse::<Category>()?)
                        .await?
                }
                None => query.get_all_entities().await?,
            };
            print_json(&entities)
        }
        Commands::Entity { eid } => print_json(&query.get_entity(&eid).await?),
        Commands::Relations { from, to } => {
            let relations = match (from, to) {
                (Some(source), _) => query.get_relations_for_entity(&source).await?,
                (None, Some(dest)) => query.get_incoming_relations(&dest).await?,
                (None, None) => query.get_all_relations().await?,
            };
            print_json(&relations)
        }
        Commands::Nearest { eid, limit } => {
            print_json(&query.find_nearest_entities_by_entity(&eid, limit).await?)
        }
        Commands::Connected { eid, relation } => {
            print_json(&query.find_connected_entities(&eid, &relation).await?)
        }
        Commands::Traverse {
            eid,
            depth,
            relation,
            max_nodes,
        } => {
            let options = TraversalOptions {
                max_depth: depth,
                relation,
                max_nodes,
            };
            print_json(&query.traverse(&eid, &options).await?)
        }
        Commands::Search {
            query: text,
            field,
            relations,
            limit,
        } => {
            let field = field.parse::<VectorField>()?;
            if relations {
                print_json(&engine.search_relations(&text, field, limit).await?)
            } else {
                print_json(&engine.search_entities(&text, field, limit).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_traverse_with_defaults() {
        let cli =
            Cli::try_parse_from(["tom", "traverse", "asthma", "--relation", "treats"]).unwrap();
        match cli.command {
            Commands::Traverse {
                eid,
                depth,
                relation,
                max_nodes,
            } => {
                assert_eq!(eid, "asthma");
                assert_eq!(depth, 2);
                assert_eq!(relation.as_deref(), Some("treats"));
                assert_eq!(max_nodes, 100);
            }
            _ => panic!("expected traverse"),
        }
    }

    #[test]
    fn ingest_requires_file_or_text() {
        assert!(Cli::try_parse_from(["tom", "ingest"]).is_err());
        assert!(Cli::try_parse_from(["tom", "ingest", "notes.txt", "--text", "a"]).is_err());
        assert!(Cli::try_parse_from(["tom", "ingest", "notes.txt"]).is_ok());
        assert!(Cli::try_parse_from(["tom", "ingest", "--text", "Asthma"]).is_ok());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tom", "entities", "--category", "organ", "--tier", "fast"])
            .unwrap();
        assert_eq!(cli.tier.as_deref(), Some("fast"));
        assert!(matches!(
            cli.command,
            Commands::Entities { category: Some(ref c) } if c == "organ"
        ));
    }
}
