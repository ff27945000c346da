//! loris-resolve: probe identifiers against a resolver configuration.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use loris_resolver::{Config, Resolver};

/// Resolve image identifiers with the configured strategy
#[derive(Parser)]
#[command(name = "loris-resolve")]
#[command(version = loris_resolver::PKG_VERSION)]
#[command(about = "Resolve image identifiers to local source files")]
struct Args {
    /// Config file (default: ~/.loris/resolver.toml, then /etc/loris/resolver.toml)
    #[arg(short, long, env = "LORIS_RESOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// Only probe with is_resolvable; never fetch or copy
    #[arg(long)]
    check: bool,

    /// Percent-encoded identifiers
    #[arg(required = true)]
    idents: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // default: warn; override with RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let resolver = match Config::load(args.config.as_deref()).and_then(|c| c.resolver.build()) {
        Ok(resolver) => resolver,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let mut failed = false;
    for ident in &args.idents {
        if args.check {
            let resolvable = resolver.is_resolvable(ident).await;
            println!("{ident}\t{}", if resolvable { "resolvable" } else { "not resolvable" });
            failed |= !resolvable;
            continue;
        }

        match resolver.resolve(ident).await {
            Ok(image) => println!("{}\t{}", image.path.display(), image.format),
            Err(e) => {
                eprintln!("{ident}: {} ({})", e.public_message(), e.status_code());
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
