use clap::Parser;
use detbox::SandboxClassLoader;
use tracing::info;

use crate::common::{print_json, ClassArgs, LogArgs, ProfileArgs, Result, SourceArgs};

/// Print the rewritten image of a class
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Class sources
    #[command(flatten)]
    pub source_args: SourceArgs,

    /// Class to rewrite
    #[command(flatten)]
    pub class_args: ClassArgs,

    /// Execution profile baked into the rewritten class
    #[command(flatten)]
    pub profile_args: ProfileArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,
}

impl Cmd {
    /// Execute the rewrite command
    pub fn run(&self) -> Result<()> {
        self.log_args.init()?;

        let loader = SandboxClassLoader::new(self.profile_args.configuration()?, self.source_args.class_sources());
        let class = loader.load(&self.class_args.class_name())?;
        info!(class = %class.original_name(), sandboxed = %class.name(), origin = class.origin().label(), "rewrote class");
        print_json(class.definition())
    }
}
