use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "fundsnipe", version, about = "Time-aligned futures entry with guaranteed protection")]
pub struct Cli {
    /// Emit JSON logs regardless of APP_ENV
    #[clap(long, global = true)]
    pub json_logs: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run cycles on the configured daily triggers until Ctrl-C
    Run {
        /// Do not subscribe to account updates (disables funding-fee signals)
        #[clap(long)]
        no_user_stream: bool,
    },

    /// Run a single cycle now
    Cycle {
        /// Trade this symbol instead of BINANCE_SYMBOL
        #[clap(long)]
        symbol: Option<String>,
    },

    /// Print the last traded price
    Price { symbol: String },

    /// Wait for the first streamed top-of-book quote and print it
    Book {
        symbol: String,

        #[clap(long, default_value_t = 5)]
        timeout_secs: u64,
    },

    /// Check signed connectivity by reading the quote-asset balance
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["fundsnipe", "cycle", "--symbol", "ETHUSDT"]);
        assert!(matches!(cli.command, Command::Cycle { symbol: Some(ref s) } if s == "ETHUSDT"));

        let cli = Cli::parse_from(["fundsnipe", "--json-logs", "run", "--no-user-stream"]);
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Command::Run { no_user_stream: true }));

        let cli = Cli::parse_from(["fundsnipe", "book", "BTCUSDT"]);
        assert!(matches!(cli.command, Command::Book { timeout_secs: 5, .. }));
    }
}
