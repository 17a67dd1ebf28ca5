//! CLI argument definitions using clap.

use std::path::PathBuf;

use activation_core::Plan;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "activate")]
#[command(version)]
#[command(about = "Activate a subscription plan and obtain a feature key", long_about = None)]
pub struct Cli {
    /// Backend base URL (overrides ACTIVATION_API_BASE_URL)
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// User API key (falls back to ACTIVATION_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save the profile, pay if needed and issue a feature key
    Activate(ActivateArgs),

    /// Summarize logged API usage
    Analytics(AnalyticsArgs),

    /// Show the current subscription
    Subscription,
}

#[derive(Args, Debug)]
pub struct ActivateArgs {
    /// Plan to activate
    #[arg(value_enum, default_value = "starter")]
    pub plan: PlanArg,

    /// JSON file with the profile form
    #[arg(short, long)]
    pub profile: PathBuf,

    /// Ask the backend to cancel the order if polling is abandoned
    #[arg(long, default_value = "false")]
    pub cancel_on_abandon: bool,
}

#[derive(Args, Debug)]
pub struct AnalyticsArgs {
    /// How many endpoints to list
    #[arg(long, default_value = "5")]
    pub top: usize,

    /// Print the raw records as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanArg {
    /// Free plan, activated right after the profile is saved
    Starter,
    /// Paid plan
    Professional,
    /// Paid plan
    Enterprise,
}

impl PlanArg {
    pub fn plan(self) -> Plan {
        match self {
            PlanArg::Starter => Plan::starter(),
            PlanArg::Professional => Plan::professional(),
            PlanArg::Enterprise => Plan::enterprise(),
        }
    }
}
