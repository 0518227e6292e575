use clap::Parser;
use detbox::{
    test_utils::{ReferenceRuntime, Value},
    CostReport, SandboxExecutor,
};
use serde::Serialize;
use tracing::info;

use crate::common::{print_json, ClassArgs, CliError, LogArgs, ProfileArgs, Result, SourceArgs};

/// Run the static `apply(input)` entry point of a class
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Integer handed to the entry point
    #[arg(long = "input", default_value = "0", allow_negative_numbers = true)]
    pub input: i64,

    /// Maximum call depth of the reference runtime
    #[arg(long = "max-depth", default_value_t = detbox::test_utils::DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Class sources
    #[command(flatten)]
    pub source_args: SourceArgs,

    /// Entry class
    #[command(flatten)]
    pub class_args: ClassArgs,

    /// Execution profile
    #[command(flatten)]
    pub profile_args: ProfileArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,
}

/// The printed outcome of a run.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum RunOutcome {
    Completed { result: Value, costs: CostReport },
    Failed { kind: &'static str, message: String, costs: CostReport },
}

impl Cmd {
    /// Execute the run command
    pub fn run(&self) -> Result<()> {
        self.log_args.init()?;

        let configuration = self.profile_args.configuration()?;
        let executor = SandboxExecutor::new(configuration, ReferenceRuntime::new(self.max_depth));
        let class = self.class_args.class_name();
        info!(%class, input = self.input, "running sandboxed entry point");

        match executor.run(self.source_args.class_sources(), &class, Value::Int(self.input)) {
            Ok(summary) => print_json(&RunOutcome::Completed { result: summary.result, costs: summary.costs }),
            Err(exception) => {
                let kind = exception.cause.kind();
                print_json(&RunOutcome::Failed {
                    kind,
                    message: exception.cause.to_string(),
                    costs: exception.costs,
                })?;
                Err(CliError::ExecutionFailed(kind))
            }
        }
    }
}
