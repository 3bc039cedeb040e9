use clap::builder::styling::AnsiColor;
use clap::builder::{PossibleValue, Styles};
use clap::Parser;
use envoy_probe::service::DEFAULT_TARGET_ENDPOINT;

fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::BrightGreen.on_default())
        .placeholder(AnsiColor::Cyan.on_default())
}

/// Probe candidate proxy/front urls against a captive-portal style endpoint.
#[derive(Parser, Debug, Clone)]
#[command(
    after_help = "Strategies: 0 UNMODIFIED, 1 ELEVATED_COUNT, 2 TRUNCATED_RESERVED, 3 MULTI_BYTE,\n\
                  4 MULTI_BYTE_ELEVATED_COUNT, 5 COMPRESSED. The first url is always tried with all of them.",
    styles=get_styles()
)]
pub struct Cli {
    /// Candidate urls to probe.
    #[arg(num_args(1..), required_unless_present("query"))]
    pub urls: Vec<String>,

    /// Strategy code used for every url after the first; out of range means 0.
    #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
    pub strategy: i64,

    /// Endpoint requested through every candidate.
    #[arg(long, default_value = DEFAULT_TARGET_ENDPOINT)]
    pub target: String,

    /// Timeout in milliseconds for each request.
    #[arg(long, default_value = "10000", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Seconds to wait for every probe to resolve before giving up.
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    pub deadline: u64,

    /// File the valid urls are persisted to. Defaults to the user data directory.
    #[arg(long)]
    pub storage: Option<std::path::PathBuf>,

    /// Print the current valid urls without probing anything.
    #[arg(short, long, conflicts_with("urls"))]
    pub query: bool,

    /// Log level for application output.
    #[arg(
        long = "log",
        default_value = "off",
        value_parser([
            PossibleValue::new("debug"),
            PossibleValue::new("info"),
            PossibleValue::new("warn"),
            PossibleValue::new("error"),
            PossibleValue::new("trace"),
            PossibleValue::new("off"),
        ])
    )]
    pub log_level: String,

    /// Output format for the results.
    #[arg(
        short,
        long,
        default_value = "default",
        value_parser([
            PossibleValue::new("default"),
            PossibleValue::new("json"),
        ])
    )]
    pub format: String,
}
