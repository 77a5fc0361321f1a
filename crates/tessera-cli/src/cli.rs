use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tessera: compile, inspect and call composites of the sample assembly",
    version
)]
pub struct Cli {
    /// Runtime config TOML path
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the compiled model of one capability
    Plan {
        /// Capability to compile (e.g. `Greeter`)
        capability: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a composite and call one of its methods
    Invoke {
        /// Capability to build
        capability: String,

        /// Method to call
        method: String,

        /// Arguments, one JSON value each; anything that is not JSON is passed as a string
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile every declared capability and report failures
    Check {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
