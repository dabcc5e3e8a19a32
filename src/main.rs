use std::io::{self, Write};

use clap::Parser;
use vendorstore::cli::{Cli, Commands};
use vendorstore::commands::{self, Session, parse_handle};
use vendorstore::config::Config;
use vendorstore::logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::parse_from(["vendorstore", "--help"]);
        return Ok(());
    };

    let config = Config::load()?;
    logging::init(&logging::directive(cli.verbose, &config.logging.level))?;
    let session = Session::open(config, cli.root, cli.protocol)?;

    match command {
        Commands::Put { file } => {
            let handle = commands::put(&session, file.as_deref())?;
            println!("{handle}");
        }
        Commands::New => {
            println!("{}", commands::new_data(&session)?);
        }
        Commands::Assign { handle, file } => {
            let handle = parse_handle(&handle)?;
            commands::assign(&session, &handle, file.as_deref())?;
        }
        Commands::Get { handle, output } => {
            let handle = parse_handle(&handle)?;
            match output {
                Some(path) => {
                    commands::get_to_file(&session, &handle, &path)?;
                }
                None => {
                    commands::get(&session, &handle, &mut io::stdout().lock())?;
                }
            }
        }
        Commands::Available { handle } => {
            println!("{}", commands::available(&session, &parse_handle(&handle)?));
        }
        Commands::Size { handle } => {
            println!("{}", commands::size(&session, &parse_handle(&handle)?)?);
        }
        Commands::Delete { handle } => {
            commands::delete(&session, &parse_handle(&handle)?)?;
        }
        Commands::Copy { handle } => {
            println!("{}", commands::copy(&session, &parse_handle(&handle)?)?);
        }
        Commands::Stats => {
            let stats = commands::stats(&session);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Capabilities => {
            let caps = commands::capabilities(&session);
            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
        Commands::Check { payload_size } => {
            let report = commands::check(&session, payload_size)?;
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{report}")?;
            if !report.passed() {
                anyhow::bail!("{} conformance check(s) failed", report.failures().count());
            }
        }
    }

    Ok(())
}
