use clap::Parser;
use detbox::{ClassName, SandboxClassLoader};
use serde::Serialize;
use tracing::warn;

use crate::common::{print_json, CliError, LogArgs, ProfileArgs, Result, SourceArgs};

/// Load every class declared by the sources and report the ones that are rejected
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Class sources
    #[command(flatten)]
    pub source_args: SourceArgs,

    /// Execution profile
    #[command(flatten)]
    pub profile_args: ProfileArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,
}

#[derive(Debug, Default, Serialize)]
struct CheckReport {
    loaded: Vec<LoadedEntry>,
    rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Serialize)]
struct LoadedEntry {
    class: ClassName,
    sandboxed: ClassName,
}

#[derive(Debug, Serialize)]
struct RejectedEntry {
    class: ClassName,
    stage: String,
    message: String,
}

impl Cmd {
    /// Execute the check command
    pub fn run(&self) -> Result<()> {
        self.log_args.init()?;

        let report = self.check()?;
        print_json(&report)?;
        if report.rejected.is_empty() {
            Ok(())
        } else {
            Err(CliError::Rejected(report.rejected.len()))
        }
    }

    fn check(&self) -> Result<CheckReport> {
        let loader = SandboxClassLoader::new(self.profile_args.configuration()?, self.source_args.class_sources());
        let mut report = CheckReport::default();
        for name in loader.sources().class_names()? {
            match loader.load(&name) {
                Ok(class) => report.loaded.push(LoadedEntry { class: name, sandboxed: class.name().clone() }),
                Err(error) => {
                    warn!(class = %name, %error, "class rejected");
                    report.rejected.push(RejectedEntry {
                        class: name,
                        stage: error.stage().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use detbox::{
        test_utils::{ClassBuilder, CodeBuilder},
        ClassDefinition, Instruction,
    };

    use super::*;

    fn write(root: &std::path::Path, class: &ClassDefinition) {
        let path = root.join(class.name.entry_path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, class.encode().unwrap()).unwrap();
    }

    #[test]
    fn test_check_reports_rejected_classes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &ClassBuilder::new("com.acme.Good").build());
        write(
            dir.path(),
            &ClassBuilder::new("com.acme.Clock")
                .static_method(
                    "now",
                    0,
                    true,
                    CodeBuilder::new(0)
                        .invoke_static("java.lang.System", "currentTimeMillis", 0)
                        .push(Instruction::ReturnValue),
                )
                .build(),
        );

        let cmd = Cmd {
            source_args: SourceArgs { sources: vec![dir.path().to_path_buf()] },
            profile_args: ProfileArgs::default(),
            log_args: LogArgs::default(),
        };
        let report = cmd.check().unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.loaded[0].sandboxed, "sandbox.com.acme.Good");
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].class, "com.acme.Clock");
        assert_eq!(report.rejected[0].stage, "rule:disallow-api-references");
    }
}
