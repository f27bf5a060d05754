use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;

// Import the library
use vast_chain::fetch::{AsyncFetcher, Fetcher, HttpFetcher};
use vast_chain::resolver::{ResolveOptions, ResolvedAd, Resolver, Source};
use vast_chain::schema::SchemaVersion;
use vast_chain::validator::{Validator, ValidatorOptions};
use vast_chain::{ResolveError, parser, stitcher};

/// VAST validator and wrapper chain resolver
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log every chain step and fetch
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a VAST file or URL and print it back as normalised XML
    Parse {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,
    },

    /// Validate a VAST file or URL against a schema revision
    Validate {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Schema revision (3, 4)
        #[arg(short, long, default_value = "4")]
        schema: SchemaVersion,

        /// Reject tags the schema does not know
        #[arg(long)]
        strict: bool,
    },

    /// Follow the wrapper chain of a VAST file or URL down to the InLine ad
    Resolve {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Block on each fetch instead of running on the async runtime
        #[arg(long)]
        sync: bool,

        /// Maximum number of wrappers to follow
        #[arg(long, default_value_t = ResolveOptions::default().max_depth)]
        max_depth: usize,

        /// Timeout for each fetch, in milliseconds
        #[arg(long, default_value_t = ResolveOptions::default().fetch_timeout_ms)]
        timeout_ms: u64,

        /// Print one stitched VAST document instead of the tracker summary
        #[arg(long)]
        stitch: bool,

        /// Print the resolution as JSON
        #[arg(long)]
        json: bool,

        /// Pretty print the JSON output (requires --json)
        #[arg(short, long, requires = "json")]
        pretty: bool,

        /// Append the InLine document as XML to the tracker summary
        #[arg(long, conflicts_with_all = ["json", "stitch"])]
        with_inline: bool,

        /// Output file path (if not specified, prints to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Err(e) = run(cli.command) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = HttpFetcher::new();
    let timeout = ResolveOptions::default().fetch_timeout();

    match command {
        Commands::Parse { input } => {
            let content = Fetcher::fetch(&fetcher, &input, timeout)?;
            let tree = parser::parse_tree(&content)?;
            println!("{}", stitcher::to_xml(&tree));
        }
        Commands::Validate { input, schema, strict } => {
            let content = Fetcher::fetch(&fetcher, &input, timeout)?;
            let tree = parser::parse_tree(&content)?;
            let validator = Validator::with_options(
                schema,
                ValidatorOptions {
                    strict_unknown_tags: strict,
                    ..ValidatorOptions::default()
                },
            );
            validator.validate(&tree)?;
            println!("{} is a valid VAST {} document", input, schema);
        }
        Commands::Resolve {
            input,
            sync,
            max_depth,
            timeout_ms,
            stitch,
            json,
            pretty,
            with_inline,
            output,
        } => {
            let resolver = Resolver::new(ResolveOptions {
                max_depth,
                fetch_timeout_ms: timeout_ms,
            });
            let source = Source::detect(&input);

            let resolved = if sync {
                resolver.resolve_sync(source, &fetcher)
            } else {
                // Use a runtime to run the async resolution
                let rt = tokio::runtime::Runtime::new()?;
                let fetcher: &dyn AsyncFetcher = &fetcher;
                rt.block_on(resolver.resolve_async(source, fetcher))
            };

            let ad = match resolved {
                Ok(ad) => ad,
                Err(ResolveError::Chain { source, partial }) => {
                    eprintln!(
                        "Chain stopped after {} document(s): {}",
                        partial.documents.len(),
                        source
                    );
                    for (category, urls) in partial.trackers.categories() {
                        eprintln!("  {} ({}): {}", category, urls.len(), urls.join(", "));
                    }
                    return Err(source.into());
                }
                Err(e) => return Err(e.into()),
            };

            let rendered = render(&ad, stitch, json, pretty, with_inline)?;
            if let Some(output_path) = output {
                std::fs::write(&output_path, &rendered)?;
                println!("Resolved VAST written to {}", output_path.display());
            } else {
                println!("{}", rendered);
            }
        }
    }

    Ok(())
}

fn render(
    ad: &ResolvedAd,
    stitch: bool,
    json: bool,
    pretty: bool,
    with_inline: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    if stitch {
        return Ok(stitcher::to_xml(&ad.stitch()?));
    }
    if json {
        let out = if pretty {
            serde_json::to_string_pretty(ad)?
        } else {
            serde_json::to_string(ad)?
        };
        return Ok(out);
    }

    let mut out = String::new();
    out.push_str(&format!("Chain ({} wrapper(s)):\n", ad.depth));
    for doc in &ad.chain {
        out.push_str(&format!("  [{}] {}\n", doc.depth, doc.source));
    }
    for (category, urls) in ad.trackers.categories() {
        out.push_str(&format!("{}:\n", category));
        for url in urls {
            out.push_str(&format!("  {}\n", url));
        }
    }
    if with_inline {
        if let Some(inline) = ad.inline() {
            out.push_str(&stitcher::to_xml(&inline.tree));
        }
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vast_chain::fetch::CachedFetcher;

    fn resolved() -> ResolvedAd {
        let xml = r#"<VAST version="4.0"><Ad><InLine>
            <AdSystem>sys</AdSystem>
            <Impression>http://imp</Impression>
        </InLine></Ad></VAST>"#;
        Resolver::default()
            .resolve_sync(Source::detect(xml), &CachedFetcher::new())
            .unwrap()
    }

    #[test]
    fn test_pretty_only_applies_to_json() {
        assert!(Cli::try_parse_from(["vast-chain", "resolve", "-i", "a.xml", "--pretty"]).is_err());
        assert!(Cli::try_parse_from(["vast-chain", "resolve", "-i", "a.xml", "--json", "--pretty"]).is_ok());
        assert!(Cli::try_parse_from(["vast-chain", "resolve", "-i", "a.xml", "--json", "--with-inline"]).is_err());
    }

    #[test]
    fn test_summary_appends_inline_xml_on_request() {
        let ad = resolved();
        let summary = render(&ad, false, false, false, false).unwrap();
        assert!(summary.contains("Impression:\n  http://imp"));
        assert!(!summary.contains("<VAST"));

        let with_inline = render(&ad, false, false, false, true).unwrap();
        assert!(with_inline.contains("<VAST version=\"4.0\">"));
    }
}
