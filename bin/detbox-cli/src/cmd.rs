use clap::Parser;

/// Main command enumeration for the detbox CLI tool
#[derive(Parser, Debug)]
#[command(infer_subcommands = true, version = "0.1")]
pub enum MainCmd {
    /// Run the entry point of a class in a fresh sandbox
    Run(crate::run::Cmd),
    /// Print the rewritten image of a class
    Rewrite(crate::rewrite::Cmd),
    /// Load every class of the sources and report which ones are rejected
    Check(crate::check::Cmd),
}

/// Error types for the main command system
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error of one of the commands
    #[error("{0}")]
    Cli(#[from] crate::common::CliError),
}

impl MainCmd {
    /// Execute the main command
    pub fn run(&self) -> Result<(), Error> {
        match self {
            Self::Run(cmd) => cmd.run()?,
            Self::Rewrite(cmd) => cmd.run()?,
            Self::Check(cmd) => cmd.run()?,
        }
        Ok(())
    }
}
