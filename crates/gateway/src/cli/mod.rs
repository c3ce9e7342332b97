//! Command-line interface for the `gatekeeper` binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gatekeeper", about = "Policy enforcement gateway for agent tool calls")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway server (default).
    Serve,
    /// Policy file operations.
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Print the version and exit.
    Version,
}

#[derive(Subcommand)]
pub enum PolicyCommand {
    /// Load and validate the policy file, then exit.
    Validate,
}

pub mod policy_cmd {
    use gk_policy::{FilePolicySource, PolicySnapshot, PolicySource};

    /// Validate the policy at `path`.  Returns `false` when it fails to
    /// load or compile.
    pub fn validate(path: &str) -> bool {
        let source = FilePolicySource::new(path);
        match source.load().and_then(PolicySnapshot::build) {
            Ok(snapshot) => {
                println!("policy ok: {}", snapshot.hash);
                println!(
                    "  tools: {}  principals: {}  global patterns: {}",
                    snapshot.policy.tools.len(),
                    snapshot.policy.principals.len(),
                    snapshot.policy.global_deny_patterns.len(),
                );
                true
            }
            Err(e) => {
                eprintln!("policy invalid: {e}");
                false
            }
        }
    }
}
