// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

use structpack_core::Namespace;
use structpack_dwarf::load_namespace;

trait CliCommand {
    fn run(&self) -> Result<()>;
}

#[derive(Args)]
struct BinarySource {
    /// Path to a binary with DWARF debug info.
    path: PathBuf,
}

impl BinarySource {
    fn namespace(&self) -> Result<Namespace> {
        let data = std::fs::read(&self.path)?;
        Ok(load_namespace(&data)?)
    }
}

#[derive(Parser)]
struct PrintStructs {
    #[command(flatten)]
    source: BinarySource,
}

impl CliCommand for PrintStructs {
    fn run(&self) -> Result<()> {
        let ns = self.source.namespace()?;

        for (i, st) in ns.struct_types().into_iter().enumerate() {
            if i > 0 {
                println!();
            }
            println!("{}", ns.pretty_struct(st));
        }

        Ok(())
    }
}

#[derive(Parser)]
struct StructSize {
    #[command(flatten)]
    source: BinarySource,

    /// Struct name to look up.
    name: String,
}

impl CliCommand for StructSize {
    fn run(&self) -> Result<()> {
        let ns = self.source.namespace()?;

        let st = ns
            .struct_type(&self.name)
            .ok_or_else(|| anyhow!("no struct named {}", self.name))?;

        match ns.size_of(st) {
            Some(size) => println!("{size}"),
            None => println!("unresolved"),
        }

        Ok(())
    }
}

#[derive(Subcommand)]
enum Subcommands {
    /// Print every struct in the binary's debug info as a C-like declaration.
    PrintStructs(PrintStructs),
    /// Print the computed byte size of one struct.
    StructSize(StructSize),
}

impl Subcommands {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Self::PrintStructs(c) => c,
            Self::StructSize(c) => c,
        }
    }
}

#[derive(Parser)]
struct Cli {
    /// Increase logging verbosity. Can be specified multiple times
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Subcommands,
}

impl Cli {
    fn run() -> Result<()> {
        let cli = Self::parse();

        let log_level = match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(log_level.as_str()),
        );

        builder.init();

        let command = cli.command.as_cli_command();

        command.run()
    }
}

fn main() {
    let exit_code = match Cli::run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    };

    std::process::exit(exit_code)
}
