//! pm-reach CLI: policy-machine reachability engine.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use pm_reach::element::{AssociationId, NodeId};
use pm_reach::engine::{Engine, EngineConfig};
use pm_reach::snapshot::GraphSnapshot;
use pm_reach::strategy::StrategyKind;

#[derive(Parser)]
#[command(name = "pm-reach", version, about = "Policy-machine reachability engine")]
struct Cli {
    /// TOML config file (strategy, data_dir, reject_cycles).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent storage (default: .pm-reach).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Reachability strategy: materialized or on_demand.
    #[arg(long, global = true)]
    strategy: Option<StrategyKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a JSON graph snapshot.
    Load {
        /// Path to the snapshot file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Show engine info and statistics.
    Info,

    /// Check whether one node reaches another.
    Reachable {
        /// Source node (id or unique identifier).
        from: String,
        /// Target node (id or unique identifier).
        to: String,
        /// Follow logical links instead of assignments.
        #[arg(long)]
        logical_links: bool,
    },

    /// List the descendants of one or more nodes.
    Descendants {
        /// Comma-separated ids or unique identifiers.
        nodes: String,
        #[arg(long)]
        logical_links: bool,
    },

    /// List the ancestors of one or more nodes.
    Ancestors {
        /// Comma-separated ids or unique identifiers.
        nodes: String,
        #[arg(long)]
        logical_links: bool,
        /// Group the result by node, listing direct parents.
        #[arg(long)]
        by_node: bool,
    },

    /// Nearest ancestors carrying one of the given associations.
    Filtered {
        /// Start node (id or unique identifier).
        start: String,
        /// Comma-separated association ids.
        #[arg(long)]
        associations: String,
        /// Search descendants instead of ancestors.
        #[arg(long)]
        descendants: bool,
    },

    /// Operation-set roots that contain an operation.
    ResolveOpsets {
        /// Comma-separated candidate roots.
        roots: String,
        /// Unique identifier of the operation.
        #[arg(long)]
        operation: String,
        /// Print the path from each root to the operation.
        #[arg(long)]
        paths: bool,
    },

    /// Compare the materialized closure with the assignment graph.
    Verify {
        /// Rebuild the closure from scratch afterwards.
        #[arg(long)]
        rebuild: bool,
    },

    /// Export the graph as a JSON snapshot.
    Export {
        /// Output file (stdout if omitted).
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let engine = Engine::new(engine_config(&cli)?)?;
    execute(&engine, cli.command, &mut std::io::stdout().lock())
}

/// Config file first, then command-line overrides. Persistent by default.
fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match cli.config {
        Some(ref path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(PathBuf::from(".pm-reach"));
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    Ok(config)
}

fn execute(engine: &Engine, command: Commands, out: &mut dyn Write) -> Result<()> {
    match command {
        Commands::Load { file } => {
            let snapshot = GraphSnapshot::from_json_file(&file)?;
            let report = engine.load_snapshot(&snapshot)?;
            writeln!(out, "{report} from {}", file.display()).into_diagnostic()?;
            writeln!(out, "{}", engine.info()?).into_diagnostic()?;
        }

        Commands::Info => {
            writeln!(out, "{}", engine.info()?).into_diagnostic()?;
        }

        Commands::Reachable {
            from,
            to,
            logical_links,
        } => {
            let from = resolve_node(engine, &from)?;
            let to = resolve_node(engine, &to)?;
            let reachable = if logical_links {
                engine.logical_link_reachable(from, to)?
            } else {
                engine.is_reachable(from, to)?
            };
            writeln!(out, "{reachable}").into_diagnostic()?;
        }

        Commands::Descendants {
            nodes,
            logical_links,
        } => {
            let roots = resolve_nodes(engine, &nodes)?;
            let found = if logical_links {
                engine.logical_link_descendants_of(&roots)?
            } else {
                engine.descendants_of(&roots)?
            };
            print_nodes(engine, found, out)?;
        }

        Commands::Ancestors {
            nodes,
            logical_links,
            by_node,
        } => {
            let roots = resolve_nodes(engine, &nodes)?;
            if by_node {
                let grouped = engine.parent_ids_by_node(&roots)?;
                let mut keys: Vec<NodeId> = grouped.keys().copied().collect();
                keys.sort();
                for node in keys {
                    let mut parents: Vec<NodeId> = grouped[&node].iter().copied().collect();
                    parents.sort();
                    let parents: Vec<String> = parents.iter().map(|p| label(engine, *p)).collect();
                    writeln!(out, "{}: {}", label(engine, node), parents.join(", "))
                        .into_diagnostic()?;
                }
            } else {
                let found = if logical_links {
                    engine.logical_link_ancestors_of(&roots)?
                } else {
                    engine.ancestors_of(&roots)?
                };
                print_nodes(engine, found, out)?;
            }
        }

        Commands::Filtered {
            start,
            associations,
            descendants,
        } => {
            let start = resolve_node(engine, &start)?;
            let candidates = parse_associations(&associations)?;
            let found = if descendants {
                engine.filtered_descendants(start, &candidates)?
            } else {
                engine.filtered_ancestors(start, &candidates)?
            };
            print_nodes(engine, found, out)?;
        }

        Commands::ResolveOpsets {
            roots,
            operation,
            paths,
        } => {
            let roots = resolve_nodes(engine, &roots)?;
            if paths {
                for m in engine.resolve_operation_set_paths(&roots, &operation)? {
                    let path: Vec<String> = m.path.iter().map(|n| label(engine, *n)).collect();
                    writeln!(out, "{}: {}", label(engine, m.root), path.join(" -> "))
                        .into_diagnostic()?;
                }
            } else {
                for root in engine.resolve_operation_sets(&roots, &operation)? {
                    writeln!(out, "{}", label(engine, root)).into_diagnostic()?;
                }
            }
        }

        Commands::Verify { rebuild } => match engine.verify_closure()? {
            None => {
                let strategy = engine.config().strategy;
                writeln!(out, "strategy {strategy} keeps no closure").into_diagnostic()?;
            }
            Some(drift) => {
                writeln!(out, "{drift}").into_diagnostic()?;
                for (a, d) in drift.missing.iter().take(20) {
                    writeln!(out, "  missing {a} -> {d}").into_diagnostic()?;
                }
                for (a, d) in drift.extra.iter().take(20) {
                    writeln!(out, "  extra   {a} -> {d}").into_diagnostic()?;
                }
                if rebuild {
                    let written = engine.rebuild_closure()?.unwrap_or(0);
                    writeln!(out, "rebuilt closure: {written} tuples").into_diagnostic()?;
                } else if !drift.is_clean() {
                    miette::bail!("closure drift detected; rerun with --rebuild to repair");
                }
            }
        },

        Commands::Export { file } => {
            let json = engine.snapshot().to_json()?;
            match file {
                Some(path) => {
                    std::fs::write(&path, json).into_diagnostic()?;
                    writeln!(out, "Exported snapshot to {}", path.display()).into_diagnostic()?;
                }
                None => writeln!(out, "{json}").into_diagnostic()?,
            }
        }
    }

    Ok(())
}

/// Resolve a node by numeric id or unique identifier.
fn resolve_node(engine: &Engine, token: &str) -> Result<NodeId> {
    let token = token.trim();
    if let Ok(raw) = token.parse::<u64>() {
        return Ok(NodeId::try_from_raw(raw)?);
    }
    match engine.lookup_unique(token) {
        Some(id) => Ok(id),
        None => miette::bail!("no policy element with unique identifier \"{token}\""),
    }
}

fn resolve_nodes(engine: &Engine, list: &str) -> Result<Vec<NodeId>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| resolve_node(engine, s))
        .collect()
}

fn parse_associations(list: &str) -> Result<HashSet<AssociationId>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            let raw: u64 = s.trim().parse().into_diagnostic()?;
            match AssociationId::new(raw) {
                Some(id) => Ok(id),
                None => miette::bail!("association ids are non-zero"),
            }
        })
        .collect()
}

fn label(engine: &Engine, id: NodeId) -> String {
    match engine.element(id) {
        Some(element) => format!("{id} \"{}\" ({})", element.unique_identifier, element.kind),
        None => id.to_string(),
    }
}

fn print_nodes(engine: &Engine, nodes: HashSet<NodeId>, out: &mut dyn Write) -> Result<()> {
    let mut nodes: Vec<NodeId> = nodes.into_iter().collect();
    nodes.sort();
    writeln!(out, "{} node(s)", nodes.len()).into_diagnostic()?;
    for node in nodes {
        writeln!(out, "  {}", label(engine, node)).into_diagnostic()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "elements": [
            { "id": 1, "kind": "user", "unique_identifier": "alice" },
            { "id": 2, "kind": "user_attribute", "unique_identifier": "staff" },
            { "id": 3, "kind": "policy_class", "unique_identifier": "pc" }
        ],
        "assignments": [
            { "parent": 2, "child": 1 },
            { "parent": 3, "child": 2 }
        ]
    }"#;

    fn cli(dir: &std::path::Path, args: &[&str]) -> Cli {
        let mut argv = vec!["pm-reach", "--data-dir", dir.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    /// Open the engine the way `main` does and capture what the command prints.
    fn run(dir: &std::path::Path, args: &[&str]) -> Result<String> {
        let cli = cli(dir, args);
        let engine = Engine::new(engine_config(&cli)?)?;
        let mut out = Vec::new();
        execute(&engine, cli.command, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn flags_override_the_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let cli = cli(dir.path(), &["--strategy", "on-demand", "info"]);
        let config = engine_config(&cli).unwrap();
        assert_eq!(config.strategy, StrategyKind::OnDemand);
        assert_eq!(config.data_dir.as_deref(), Some(dir.path()));
        assert!(config.reject_cycles);
    }

    #[test]
    fn load_then_query_across_invocations() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("graph.json");
        std::fs::write(&file, SNAPSHOT).unwrap();
        let data = dir.path().join("data");

        let loaded = run(&data, &["load", "--file", file.to_str().unwrap()]).unwrap();
        assert!(loaded.starts_with("loaded 3 elements, 2 assignments"), "{loaded}");

        assert_eq!(run(&data, &["reachable", "pc", "alice"]).unwrap(), "true\n");
        assert_eq!(run(&data, &["reachable", "1", "3"]).unwrap(), "false\n");

        let below = run(&data, &["descendants", "pc"]).unwrap();
        assert_eq!(
            below,
            "2 node(s)\n  pe:1 \"alice\" (user)\n  pe:2 \"staff\" (user_attribute)\n"
        );

        // Both strategies read the same stored graph.
        let on_demand = run(&data, &["--strategy", "on_demand", "reachable", "staff", "alice"]);
        assert_eq!(on_demand.unwrap(), "true\n");
        let verified = run(&data, &["verify"]).unwrap();
        assert!(verified.starts_with("closure is consistent"), "{verified}");
    }

    #[test]
    fn unknown_identifiers_and_zero_ids_are_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(run(dir.path(), &["reachable", "nobody", "1"]).is_err());
        assert!(run(dir.path(), &["reachable", "0", "1"]).is_err());
        assert_eq!(parse_associations("1, 2").unwrap().len(), 2);
        assert!(parse_associations("0").is_err());
    }
}
