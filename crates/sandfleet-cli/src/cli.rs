//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use sandfleet_core::DEFAULT_IMAGE;

/// Provision fleets of idle container sandboxes.
#[derive(Debug, Parser)]
#[command(name = "sandfleet", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a batch of sandboxes named PREFIX_1..PREFIX_N
    Provision(ProvisionArgs),

    /// List sandboxes under a prefix
    List {
        /// Name prefix of the batch
        #[arg(short, long)]
        prefix: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Remove every sandbox under a prefix
    Destroy {
        /// Name prefix of the batch
        #[arg(short, long)]
        prefix: String,
    },
}

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Number of sandboxes
    #[arg(short = 'n', long)]
    pub count: u32,

    /// Name prefix; sandboxes are named PREFIX_1..PREFIX_N
    #[arg(short, long)]
    pub prefix: String,

    /// Image to run
    #[arg(long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Seconds the default idle workload sleeps
    #[arg(long, default_value_t = 3600)]
    pub idle_secs: u64,

    /// Maximum simultaneous create calls [default: min(count, 8)]
    #[arg(short = 'j', long)]
    pub limit: Option<usize>,

    /// Cancel whatever is still pending after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Simulate against an in-memory runtime
    #[arg(long)]
    pub dry_run: bool,

    /// Remove the sandboxes this run created unless the whole batch succeeded
    #[arg(long)]
    pub rollback_on_failure: bool,

    /// Print the batch result as JSON
    #[arg(long)]
    pub json: bool,

    /// Command to run instead of `sleep IDLE_SECS`
    #[arg(last = true)]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_provision() {
        let cli = Cli::try_parse_from([
            "sandfleet", "provision", "-n", "5", "-p", "web", "-j", "2", "--dry-run", "--",
            "sh", "-c", "sleep 60",
        ])
        .unwrap();

        let Command::Provision(args) = cli.command else {
            panic!("expected provision");
        };
        assert_eq!(args.count, 5);
        assert_eq!(args.prefix, "web");
        assert_eq!(args.limit, Some(2));
        assert_eq!(args.image, DEFAULT_IMAGE);
        assert!(args.dry_run);
        assert_eq!(args.command, vec!["sh", "-c", "sleep 60"]);
    }

    #[test]
    fn test_parse_destroy() {
        let cli = Cli::try_parse_from(["sandfleet", "destroy", "--prefix", "web"]).unwrap();
        assert!(matches!(cli.command, Command::Destroy { prefix } if prefix == "web"));
    }
}
