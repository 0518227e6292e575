use std::{fs, path::PathBuf, sync::Arc};

use clap::Parser;
use detbox::{
    test_utils::standard_analysis, ClassName, ClassSource, ExecutionProfile, SandboxConfiguration,
    Threshold,
};

use super::{CliError, Result};

/// Class source arguments.
#[derive(Parser, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Class sources, searched in order. Directories hold one image per class at its entry
    /// path; files are JSON archives.
    #[arg(long = "source", short = 's', value_name = "PATH", num_args = 1..)]
    pub sources: Vec<PathBuf>,
}

impl SourceArgs {
    /// The configured class sources.
    pub fn class_sources(&self) -> Vec<ClassSource> {
        self.sources.iter().map(ClassSource::from_path).collect()
    }
}

/// Entry class argument.
#[derive(Parser, Debug, Clone)]
pub struct ClassArgs {
    /// Fully qualified name of the class, e.g. `com.acme.Contract`
    #[arg(long = "class", short = 'c', value_name = "NAME")]
    pub class: String,
}

impl ClassArgs {
    /// The class name.
    pub fn class_name(&self) -> ClassName {
        ClassName::new(self.class.as_str())
    }
}

/// Execution profile arguments.
#[derive(Parser, Debug, Clone)]
pub struct ProfileArgs {
    /// Base profile: `default`, `unlimited`, or a path to a JSON profile file
    #[arg(long = "profile", default_value = "default")]
    pub profile: String,

    /// Override the allocation threshold
    #[arg(long = "allocations")]
    pub allocations: Option<u64>,

    /// Override the invocation threshold
    #[arg(long = "invocations")]
    pub invocations: Option<u64>,

    /// Override the jump threshold
    #[arg(long = "jumps")]
    pub jumps: Option<u64>,

    /// Override the throw threshold
    #[arg(long = "throws")]
    pub throws: Option<u64>,

    /// Threads exempt from thresholds
    #[arg(long = "exempt-thread", value_name = "NAME")]
    pub exempt_threads: Vec<String>,
}

impl Default for ProfileArgs {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            allocations: None,
            invocations: None,
            jumps: None,
            throws: None,
            exempt_threads: Vec::new(),
        }
    }
}

impl ProfileArgs {
    /// Resolves the base profile and applies the overrides.
    pub fn execution_profile(&self) -> Result<ExecutionProfile> {
        let mut profile = match self.profile.as_str() {
            "default" => ExecutionProfile::DEFAULT,
            "unlimited" => ExecutionProfile::UNLIMITED,
            path => {
                let contents = fs::read(path)?;
                serde_json::from_slice(&contents)
                    .map_err(|e| CliError::InvalidProfile(format!("{path}: {e}")))?
            }
        };
        let overrides = [
            (&mut profile.allocations, self.allocations),
            (&mut profile.invocations, self.invocations),
            (&mut profile.jumps, self.jumps),
            (&mut profile.throws, self.throws),
        ];
        for (threshold, value) in overrides {
            if let Some(value) = value {
                *threshold = Threshold::Limited(value);
            }
        }
        profile.exempt_threads.extend(self.exempt_threads.iter().cloned());
        Ok(profile)
    }

    /// Builds the sandbox configuration: the built-in policy over the standard host.
    pub fn configuration(&self) -> Result<Arc<SandboxConfiguration>> {
        let profile = self.execution_profile()?;
        Ok(Arc::new(SandboxConfiguration::default_with(standard_analysis()).with_profile(profile)))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn args(profile: &str) -> ProfileArgs {
        ProfileArgs { profile: profile.to_string(), ..Default::default() }
    }

    #[rstest]
    #[case("default", ExecutionProfile::DEFAULT)]
    #[case("unlimited", ExecutionProfile::UNLIMITED)]
    fn test_presets(#[case] name: &str, #[case] expected: ExecutionProfile) {
        assert_eq!(args(name).execution_profile().unwrap(), expected);
    }

    #[test]
    fn test_overrides_apply_to_base_profile() {
        let args = ProfileArgs { jumps: Some(0), exempt_threads: vec!["main".to_string()], ..args("unlimited") };
        let profile = args.execution_profile().unwrap();
        assert_eq!(profile.jumps, Threshold::Limited(0));
        assert_eq!(profile.allocations, Threshold::Unlimited);
        assert!(profile.exempt_threads.contains("main"));
    }

    #[test]
    fn test_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(&path, r#"{"throws": {"limited": 3}}"#).unwrap();
        let profile = args(path.to_str().unwrap()).execution_profile().unwrap();
        assert_eq!(profile.throws, Threshold::Limited(3));
        assert_eq!(profile.jumps, Threshold::Unlimited);
    }

    #[test]
    fn test_invalid_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(&path, "[]").unwrap();
        assert!(matches!(
            args(path.to_str().unwrap()).execution_profile(),
            Err(CliError::InvalidProfile(_))
        ));
        assert!(matches!(args("/nonexistent/profile.json").execution_profile(), Err(CliError::FileRead(_))));
    }
}
